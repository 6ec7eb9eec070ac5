//! Error types for the retroc backend

use thiserror::Error;

/// Backend errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Lowering errors
    /// The front end handed the IR builder a construct with no IR opcode
    ///
    /// **Triggered by:** inline assembly, aggregate-typed locals, void values used as operands
    /// **Example:** `asm { di }` inside a function body
    #[error("{function}:{line}:{column}: unsupported operation: {construct}")]
    Unsupported {
        /// Function being lowered
        function: String,
        /// Source line reported by the front end
        line: u32,
        /// Source column reported by the front end
        column: u32,
        /// Description of the offending construct
        construct: String,
    },

    /// A name the front end claimed to have resolved is unknown to the builder
    ///
    /// **Triggered by:** front-end bugs only; the builder never resolves names itself
    #[error("{function}:{line}:{column}: unresolved {kind} '{name}'")]
    UnresolvedName {
        /// Function being lowered
        function: String,
        /// Source line reported by the front end
        line: u32,
        /// Source column reported by the front end
        column: u32,
        /// What kind of name (local, global, type parameter, string)
        kind: &'static str,
        /// The name itself
        name: String,
    },

    // Instantiation errors
    /// Generic expansion does not terminate
    ///
    /// **Triggered by:** a generic function that instantiates itself with an ever-growing type
    /// **Example:** `nest<T>(x: T)` calling `nest<*T>(...)`
    #[error("instantiation of '{template}' exceeds depth {depth}: {}", chain.join(" -> "))]
    InstantiationLimit {
        /// Template whose expansion overflowed
        template: String,
        /// Configured depth limit
        depth: usize,
        /// Symbols instantiated on the way, outermost first
        chain: Vec<String>,
    },

    // Capability errors
    /// The optimized IR needs a feature the selected target lacks
    ///
    /// **Triggered by:** SMC functions sent to a non-SMC target, 24/32-bit values or globals on the Z80
    #[error("{function}: target '{target}' does not support {feature}")]
    Capability {
        /// Offending function symbol, or the qualified name of a global
        function: String,
        /// Target identifier
        target: String,
        /// Missing feature
        feature: String,
    },

    // Convention conflicts
    /// A function requested the SMC convention but is still reentrant
    ///
    /// **Triggered by:** non-tail self recursion or a call cycle through an SMC function
    /// **Prevention:** make every recursive call a tail call, or drop the SMC request
    #[error("{function}: cannot use self-modifying calling convention: {reason}")]
    ConventionConflict {
        /// Offending function symbol
        function: String,
        /// Why the convention is unsafe
        reason: String,
    },

    // Emitter errors
    /// The emitter cannot express an instruction on its target
    ///
    /// **Triggered by:** frame offsets outside the target's addressing range
    #[error("{function}: {target} emitter: {message}")]
    Emitter {
        /// Function being emitted
        function: String,
        /// Target identifier
        target: String,
        /// Error description
        message: String,
    },

    /// IR failed a well-formedness check between passes
    #[error("{function}: invalid IR: {message}")]
    InvalidIr {
        /// Function whose IR is malformed
        function: String,
        /// What the verifier found
        message: String,
    },

    /// One or more functions failed; sibling functions were still processed
    #[error("build failed: {} function(s) reported errors", errors.len())]
    Build {
        /// Per-function errors, in function order
        errors: Vec<Error>,
    },

    // Configuration
    /// Unknown target identifier
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    /// Invalid compile options
    #[error("configuration error: {0}")]
    Config(String),

    // IR interpreter
    /// Fault while executing IR
    ///
    /// **Triggered by:** division by zero, out-of-range memory access, step or depth limits
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Aborts the whole build
    Fatal,
    /// Fails one function; independent functions keep compiling
    FunctionLocal,
}

impl Error {
    /// Create an interpreter error with a message
    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime(msg.into())
    }

    /// Create an emitter error
    pub fn emitter(
        function: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Error::Emitter {
            function: function.into(),
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create an IR well-formedness error
    pub fn invalid_ir(function: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::InvalidIr {
            function: function.into(),
            message: msg.into(),
        }
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::InstantiationLimit { .. } => ErrorSeverity::Fatal,
            Error::Capability { .. } => ErrorSeverity::Fatal,
            Error::Build { .. } => ErrorSeverity::Fatal,
            Error::UnknownTarget(_) => ErrorSeverity::Fatal,
            Error::Config(_) => ErrorSeverity::Fatal,

            _ => ErrorSeverity::FunctionLocal,
        }
    }

    /// Flatten nested build errors into the per-function list
    pub fn flatten(&self) -> Vec<&Error> {
        match self {
            Error::Build { errors } => errors.iter().flat_map(|e| e.flatten()).collect(),
            other => vec![other],
        }
    }

    /// Collapse a list of per-function failures into one error
    pub fn from_failures(mut errors: Vec<Error>) -> Self {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            Error::Build { errors }
        }
    }
}

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let cap = Error::Capability {
            function: "m_f".into(),
            target: "c99".into(),
            feature: "self-modifying code".into(),
        };
        assert_eq!(cap.classify(), ErrorSeverity::Fatal);
        let conflict = Error::ConventionConflict {
            function: "m_f".into(),
            reason: "recursive".into(),
        };
        assert_eq!(conflict.classify(), ErrorSeverity::FunctionLocal);
    }

    #[test]
    fn test_flatten_and_collapse() {
        let one = Error::from_failures(vec![Error::runtime("a")]);
        assert_eq!(one, Error::runtime("a"));

        let many = Error::from_failures(vec![Error::runtime("a"), Error::runtime("b")]);
        assert_eq!(many.flatten().len(), 2);
        assert!(many.to_string().contains("2 function(s)"));
    }

    #[test]
    fn test_instantiation_chain_message() {
        let err = Error::InstantiationLimit {
            template: "nest".into(),
            depth: 2,
            chain: vec!["nest$u8".into(), "nest$p_u8".into()],
        };
        assert!(err.to_string().contains("nest$u8 -> nest$p_u8"));
    }
}
