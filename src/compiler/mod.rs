//! # retroc compiler pipeline
//!
//! Lowers a resolved front-end [`Module`](ast::Module) to assembly or C text
//! for one retro target.
//!
//! ## Architecture
//!
//! ```text
//! Module → IR (+ generic instances) → Optimize → Conventions → Dispatch → Emit
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use retroc::compiler::{CompileOptions, Compiler};
//! use retroc::compiler::target::Target;
//!
//! let options = CompileOptions { target: Target::Z80Smc, ..CompileOptions::default() };
//! let result = Compiler::new(options).compile(&module)?;
//! std::fs::write("game.asm", result.output.text)?;
//! ```

pub mod ast;
pub mod backend;
pub mod debug;
pub mod instantiate;
pub mod interp;
pub mod ir;
pub mod optimizer;
pub mod target;
pub mod types;
pub mod verifier;

pub use backend::{EmitOutput, Emitter};
pub use debug::{format_function, format_program};
pub use instantiate::{InstantiationCache, Instantiator};
pub use interp::Interpreter;
pub use ir::{IrFunction, IrGenerator, IrInstruction, IrProgram, IrReg};
pub use optimizer::{OptimizationStats, Optimizer};
pub use target::{Feature, Target, TargetDescriptor};
pub use types::Type;
pub use verifier::{Verifier, VerifyResult};

use crate::{Error, Result};
use ast::Module;
use ir::{GlobalVariable, LoweringContext, StringPool};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Compilation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Output target
    pub target: Target,
    /// Optimization level (0 = none, 1 = peephole, 2 = peephole + tail loops)
    pub opt_level: u8,
    /// Use the self-modifying convention for every eligible function
    pub smc_by_default: bool,
    /// Longest allowed chain of nested generic instantiations
    pub max_instantiation_depth: usize,
    /// Lower, optimize and emit functions on a worker pool
    pub parallel: bool,
    /// Worker count when `parallel` is set
    pub threads: usize,
    /// Run the IR verifier between stages
    pub verify_ir: bool,
    /// Keep a text dump of the final IR in the result
    pub dump_ir: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            target: Target::C99,
            opt_level: 2,
            smc_by_default: false,
            max_instantiation_depth: 32,
            parallel: true,
            threads: num_cpus::get(),
            verify_ir: true,
            dump_ir: false,
        }
    }
}

impl CompileOptions {
    /// Parse options from JSON; missing fields take their defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid compile options: {}", e)))?;
        if options.opt_level > 2 {
            return Err(Error::Config(format!(
                "opt_level must be 0, 1 or 2 (got {})",
                options.opt_level
            )));
        }
        Ok(options)
    }

    fn worker_count(&self) -> usize {
        if self.parallel {
            self.threads.max(1)
        } else {
            1
        }
    }
}

/// Compilation result with metadata
#[derive(Debug)]
pub struct CompileResult {
    /// Emitted text for the selected target
    pub output: EmitOutput,
    /// Final IR, after optimization and convention assignment
    pub program: IrProgram,
    /// Optimizer counters
    pub stats: OptimizationStats,
    /// Number of generic instantiations lowered
    pub instances: usize,
    /// Text dump of `program` when `dump_ir` is set
    pub ir_text: Option<String>,
    /// Warnings generated during compilation
    pub warnings: Vec<String>,
}

/// Module to target-text compiler
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    /// Create a new compiler with options
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile one module for the configured target
    pub fn compile(&self, module: &Module) -> Result<CompileResult> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.worker_count())
            .build()
            .map_err(|e| Error::Config(format!("cannot start worker pool: {}", e)))?;
        pool.install(|| self.run(module))
    }

    fn run(&self, module: &Module) -> Result<CompileResult> {
        let mut warnings = Vec::new();

        // Phase 1: Lower to IR, instantiating generics on demand
        let (mut program, instances) = self.lower(module)?;

        // Phase 2: Optimize
        let stats = self.optimize(&mut program)?;
        if stats.non_tail_recursive > 0 {
            let names: Vec<String> = program
                .functions
                .iter()
                .filter(|f| f.calls_self())
                .map(IrFunction::name)
                .collect();
            let message = format!(
                "{} function(s) keep non-tail self calls: {}",
                names.len(),
                names.join(", ")
            );
            warn!("{}", message);
            warnings.push(message);
        }

        // Phase 3: Capability gate and emission
        let output = self.emit(&program)?;

        let ir_text = self.options.dump_ir.then(|| format_program(&program));
        info!(
            module = %module.name,
            target = self.options.target.id(),
            functions = output.functions,
            instances,
            warnings = warnings.len(),
            "compiled module"
        );

        Ok(CompileResult {
            output,
            program,
            stats,
            instances,
            ir_text,
            warnings,
        })
    }

    /// Lower a module to unoptimized IR
    pub fn build_ir(&self, module: &Module) -> Result<IrProgram> {
        self.lower(module).map(|(program, _)| program)
    }

    fn lower(&self, module: &Module) -> Result<(IrProgram, usize)> {
        // Strings and globals are fixed before any body is lowered
        let mut strings = StringPool::new();
        for s in module.string_literals() {
            strings.intern(s);
        }
        let globals: Vec<GlobalVariable> = module
            .globals
            .iter()
            .map(|g| GlobalVariable {
                module: module.name.clone(),
                name: g.name.clone(),
                ty: g.ty.clone(),
                init: g.init,
            })
            .collect();
        debug!(
            module = %module.name,
            strings = strings.len(),
            globals = globals.len(),
            "built module tables"
        );

        let lowered = {
            let ctx = LoweringContext {
                module: &module.name,
                globals: &globals,
                strings: &strings,
            };
            Instantiator::new(ctx, module, self.options.max_instantiation_depth).run()?
        };
        if !lowered.errors.is_empty() {
            return Err(Error::from_failures(lowered.errors));
        }

        let program = IrProgram {
            module: module.name.clone(),
            functions: lowered.functions,
            globals,
            strings,
        };
        self.verify(&program)?;
        Ok((program, lowered.instances))
    }

    /// Optimize in place, then fix every function's calling convention
    pub fn optimize(&self, program: &mut IrProgram) -> Result<OptimizationStats> {
        let stats = Optimizer::new(self.options.opt_level).optimize(program);
        self.verify(program)?;

        let conflicts = optimizer::assign_conventions(
            program,
            self.options.target.descriptor(),
            self.options.smc_by_default,
        );
        if !conflicts.is_empty() {
            return Err(Error::from_failures(conflicts));
        }
        Ok(stats)
    }

    /// Dispatch optimized IR to the configured target
    pub fn emit(&self, program: &IrProgram) -> Result<EmitOutput> {
        backend::emit(program, self.options.target)
    }

    fn verify(&self, program: &IrProgram) -> Result<()> {
        if self.options.verify_ir {
            Verifier::new().verify_program(program)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ast::{bin, local, ret, FunctionDecl};
    use ir::BinOp;

    fn module() -> Module {
        Module::new("m").with_function(FunctionDecl::new(
            "twice",
            vec![("x", Type::U8.into())],
            Type::U8,
            vec![ret(bin(BinOp::Add, local("x", Type::U8), local("x", Type::U8)))],
        ))
    }

    #[test]
    fn test_default_options() {
        let options = CompileOptions::default();
        assert_eq!(options.target, Target::C99);
        assert_eq!(options.opt_level, 2);
        assert!(options.verify_ir);
        assert!(options.threads >= 1);
    }

    #[test]
    fn test_options_from_json() {
        let options = CompileOptions::from_json(r#"{"target": "z80-smc", "smc_by_default": true}"#).unwrap();
        assert_eq!(options.target, Target::Z80Smc);
        assert!(options.smc_by_default);
        assert_eq!(options.max_instantiation_depth, 32);

        assert!(matches!(
            CompileOptions::from_json(r#"{"opt_level": 7}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            CompileOptions::from_json(r#"{"target": "vax"}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_compile_sequential() {
        let options = CompileOptions {
            parallel: false,
            dump_ir: true,
            ..CompileOptions::default()
        };
        let result = Compiler::new(options).compile(&module()).unwrap();
        assert!(result.output.text.contains("m_twice"));
        assert_eq!(result.instances, 0);
        assert!(result.ir_text.unwrap().contains("twice"));
        assert!(result.warnings.is_empty());
    }
}
