//! # Backend dispatcher
//!
//! Capability gate and routing layer between the optimized IR and the
//! per-target emitters. The dispatcher never transforms code: it checks every
//! global and function against the selected [`TargetDescriptor`], then hands the whole
//! program to exactly one emitter chosen by an exhaustive `match` over
//! [`Target`].
//!
//! ## Module Structure
//!
//! ```text
//! backend/
//! ├── mod.rs      # Emitter trait, capability gate, dispatch
//! ├── z80.rs      # Z80, stack frames through IX plus the SMC convention
//! ├── mos6502.rs  # 6502, software stack addressed through (fp),Y
//! ├── m68k.rs     # 68000, link/unlk frames, GNU as syntax
//! ├── ssa.rs      # LLVM-style SSA text
//! └── c.rs        # C99 reference emitter
//! ```

mod c;
mod m68k;
mod mos6502;
mod ssa;
mod z80;

pub use c::CEmitter;
pub use m68k::M68kEmitter;
pub use mos6502::Mos6502Emitter;
pub use ssa::SsaEmitter;
pub use z80::Z80Emitter;

use super::ir::{Callee, IrFunction, IrInstruction, IrProgram, RuntimeFn};
use super::target::{Target, TargetDescriptor};
use crate::{Error, Result};
use rayon::prelude::*;
use tracing::{debug, info};

/// One target's translation of the shared IR.
///
/// Functions are emitted independently (and possibly in parallel); the
/// header and footer see the whole program and carry module-level output
/// such as runtime declarations, globals and the string pool.
pub trait Emitter: Sync {
    fn target(&self) -> Target;

    fn emit_header(&self, program: &IrProgram) -> Result<String>;

    fn emit_function(&self, func: &IrFunction, program: &IrProgram) -> Result<String>;

    fn emit_footer(&self, program: &IrProgram) -> Result<String>;
}

/// Emitted module text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitOutput {
    pub target: Target,
    pub text: String,
    pub functions: usize,
}

/// Capability errors for every global and function needing a feature
/// `target` lacks
pub fn check_capabilities(program: &IrProgram, target: &TargetDescriptor) -> Vec<Error> {
    let mut errors = Vec::new();
    for global in &program.globals {
        for feature in target.missing_type_features(&global.ty) {
            errors.push(Error::Capability {
                function: global.qualified(),
                target: target.name.to_string(),
                feature: feature.to_string(),
            });
        }
    }
    for func in &program.functions {
        for feature in target.missing_features(func) {
            errors.push(Error::Capability {
                function: func.name(),
                target: target.name.to_string(),
                feature: feature.to_string(),
            });
        }
    }
    errors
}

/// Validate and emit the whole program for `target`
pub fn emit(program: &IrProgram, target: Target) -> Result<EmitOutput> {
    let descriptor = target.descriptor();
    let errors = check_capabilities(program, descriptor);
    if !errors.is_empty() {
        return Err(Error::from_failures(errors));
    }

    match target {
        Target::Z80Smc => run(&Z80Emitter::new(), program),
        Target::Mos6502 => run(&Mos6502Emitter::new(), program),
        Target::M68k => run(&M68kEmitter::new(), program),
        Target::PortableSsa => run(&SsaEmitter::new(), program),
        Target::C99 => run(&CEmitter::new(), program),
    }
}

/// Drive one emitter over the program; function failures are collected and
/// do not affect the output of sibling functions.
pub fn run<E: Emitter>(emitter: &E, program: &IrProgram) -> Result<EmitOutput> {
    let bodies: Vec<Result<String>> = program
        .functions
        .par_iter()
        .map(|f| emitter.emit_function(f, program))
        .collect();

    let mut text = emitter.emit_header(program)?;
    let mut errors = Vec::new();
    for (func, body) in program.functions.iter().zip(bodies) {
        match body {
            Ok(body) => {
                debug!(function = %func.name(), bytes = body.len(), "emitted function");
                text.push_str(&body);
            }
            Err(e) => errors.push(e),
        }
    }
    if !errors.is_empty() {
        return Err(Error::from_failures(errors));
    }
    text.push_str(&emitter.emit_footer(program)?);

    info!(
        target = %emitter.target(),
        functions = program.functions.len(),
        bytes = text.len(),
        "emitted module"
    );
    Ok(EmitOutput {
        target: emitter.target(),
        text,
        functions: program.functions.len(),
    })
}

/// Runtime helpers referenced anywhere in `program`
pub(crate) fn runtime_used(program: &IrProgram) -> Vec<RuntimeFn> {
    RuntimeFn::ALL
        .into_iter()
        .filter(|rt| {
            program.functions.iter().any(|f| {
                f.instructions.iter().any(
                    |i| matches!(i, IrInstruction::Call(_, Callee::Runtime(r), _) if r == rt),
                )
            })
        })
        .collect()
}

/// Line-oriented assembly text builder shared by the assembly emitters
#[derive(Debug)]
pub(crate) struct AsmWriter {
    out: String,
    comment: &'static str,
}

impl AsmWriter {
    pub(crate) fn new(comment: &'static str) -> Self {
        Self {
            out: String::new(),
            comment,
        }
    }

    /// Indented instruction
    pub(crate) fn ins(&mut self, text: impl AsRef<str>) {
        self.out.push_str(&format!("    {}\n", text.as_ref()));
    }

    pub(crate) fn label(&mut self, name: impl AsRef<str>) {
        self.out.push_str(&format!("{}:\n", name.as_ref()));
    }

    pub(crate) fn comment(&mut self, text: impl AsRef<str>) {
        self.out.push_str(&format!("    {} {}\n", self.comment, text.as_ref()));
    }

    /// Unindented line (directives, blank lines)
    pub(crate) fn raw(&mut self, text: impl AsRef<str>) {
        self.out.push_str(&format!("{}\n", text.as_ref()));
    }

    pub(crate) fn finish(self) -> String {
        self.out
    }
}

/// Bytes of `value` in little-endian order, `n` of them
pub(crate) fn le_bytes(value: i64, n: usize) -> Vec<u8> {
    (0..n).map(|i| (value >> (8 * i)) as u8).collect()
}

/// Escape a pooled string for assembler `"..."` literals (printable ASCII
/// only; everything else is emitted as numeric bytes by the caller)
pub(crate) fn is_plain_ascii(byte: u8) -> bool {
    (0x20..0x7F).contains(&byte) && byte != b'"' && byte != b'\\'
}

/// Comma-separated byte list mixing quoted runs and numeric bytes
pub(crate) fn byte_list(bytes: &[u8], hex: impl Fn(u8) -> String) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut run = String::new();
    for &b in bytes {
        if is_plain_ascii(b) {
            run.push(char::from(b));
        } else {
            if !run.is_empty() {
                parts.push(format!("\"{}\"", run));
                run.clear();
            }
            parts.push(hex(b));
        }
    }
    if !run.is_empty() {
        parts.push(format!("\"{}\"", run));
    }
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{CallingConvention, IrInstruction, Symbol};
    use crate::compiler::types::Type;

    fn leaf(smc: bool) -> IrProgram {
        let mut f = IrFunction::new(Symbol::new("m", "leaf", vec![]), Type::Void);
        f.instructions.push(IrInstruction::Return(None));
        if smc {
            f.convention = CallingConvention::Smc;
        }
        let mut p = IrProgram::new("m");
        p.functions.push(f);
        p
    }

    #[test]
    fn test_smc_function_rejected_by_non_smc_targets() {
        let p = leaf(true);
        for target in Target::ALL {
            let result = emit(&p, target);
            if target == Target::Z80Smc {
                assert!(result.is_ok(), "{:?}", result);
            } else {
                assert!(
                    matches!(&result, Err(Error::Capability { function, .. }) if function == "m_leaf"),
                    "{}: {:?}",
                    target,
                    result
                );
            }
        }
    }

    #[test]
    fn test_every_target_emits_a_trivial_program() {
        let p = leaf(false);
        for target in Target::ALL {
            let out = emit(&p, target).unwrap();
            assert_eq!(out.target, target);
            assert_eq!(out.functions, 1);
            assert!(out.text.contains("m_leaf"), "{}:\n{}", target, out.text);
        }
    }

    #[test]
    fn test_byte_list() {
        assert_eq!(byte_list(b"hi\n", |b| format!("${:02X}", b)), "\"hi\",$0A");
        assert_eq!(le_bytes(0x1234, 2), vec![0x34, 0x12]);
    }
}
