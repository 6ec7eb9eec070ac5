//! # IR Optimizer
//!
//! Semantics-preserving passes over one function at a time:
//! - Peephole rewriting to a fixed point (level 1+)
//! - Self tail call to loop conversion (level 2+)
//!
//! Calling-convention assignment runs after optimization, once the set of
//! remaining self calls is final; it lives here because it consumes the
//! tail-recursion analysis.

mod convention;
mod peephole;
mod tail_call;

pub use convention::{assign_conventions, CallGraph, Recursion};
pub use peephole::Peephole;
pub use tail_call::{sequence_moves, TailCallPass, LOOP_LABEL};

use super::ir::{IrFunction, IrInstruction, IrProgram};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Per-program optimization counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptimizationStats {
    pub instructions_before: usize,
    pub instructions_after: usize,
    /// Functions whose self tail calls became loops
    pub tail_loops: usize,
    /// Functions that call themselves outside tail position
    pub non_tail_recursive: usize,
}

/// What happened to one function
#[derive(Debug, Clone, Copy, Default)]
struct FunctionReport {
    before: usize,
    after: usize,
    tail_loop: bool,
    non_tail_recursive: bool,
}

/// Optimizer with configurable optimization level
#[derive(Debug, Clone, Copy)]
pub struct Optimizer {
    level: u8,
}

impl Optimizer {
    /// Create a new optimizer with the specified optimization level (0-2)
    pub fn new(level: u8) -> Self {
        Self { level }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Optimize every function, in parallel
    pub fn optimize(&self, program: &mut IrProgram) -> OptimizationStats {
        let reports: Vec<FunctionReport> = program
            .functions
            .par_iter_mut()
            .map(|f| self.optimize_function(f))
            .collect();

        let stats = reports.iter().fold(OptimizationStats::default(), |mut acc, r| {
            acc.instructions_before += r.before;
            acc.instructions_after += r.after;
            acc.tail_loops += usize::from(r.tail_loop);
            acc.non_tail_recursive += usize::from(r.non_tail_recursive);
            acc
        });
        info!(
            level = self.level,
            before = stats.instructions_before,
            after = stats.instructions_after,
            tail_loops = stats.tail_loops,
            "optimized program"
        );
        stats
    }

    /// Run the pass pipeline over one function
    fn optimize_function(&self, func: &mut IrFunction) -> FunctionReport {
        let mut report = FunctionReport {
            before: func.instructions.len(),
            ..FunctionReport::default()
        };
        let peephole = Peephole::new();
        let tail = TailCallPass::new();

        if self.level >= 1 {
            peephole.run(func);
        }

        func.is_tail_recursive = tail.analyze(func);
        if func.calls_self() && !func.is_tail_recursive {
            report.non_tail_recursive = true;
            warn!(
                function = %func.name(),
                "recursive call outside tail position; keeping call/return"
            );
        }

        if self.level >= 2 && func.is_tail_recursive {
            report.tail_loop = tail.run(func);
            peephole.run(func);
        }

        // Always remove Nops
        func.instructions.retain(|i| !matches!(i, IrInstruction::Nop));

        report.after = func.instructions.len();
        debug!(
            function = %func.name(),
            before = report.before,
            after = report.after,
            tail_recursive = func.is_tail_recursive,
            "optimized function"
        );
        report
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{BinOp, Callee, CmpOp, IrParam, IrReg, Operand, Symbol};
    use crate::compiler::types::Type;

    /// sum(n, acc) = if n == 0 { acc } else { sum(n - 1, acc + n) }
    fn sum() -> IrProgram {
        let sym = Symbol::new("m", "sum", vec![]);
        let mut f = IrFunction::new(sym.clone(), Type::U8);
        let n = f.registers.alloc(Type::U8);
        let acc = f.registers.alloc(Type::U8);
        f.params = vec![
            IrParam { name: "n".into(), reg: n },
            IrParam { name: "acc".into(), reg: acc },
        ];
        let c = f.registers.alloc(Type::Bool);
        let one = f.registers.alloc(Type::U8);
        let n1 = f.registers.alloc(Type::U8);
        let acc1 = f.registers.alloc(Type::U8);
        let res = f.registers.alloc(Type::U8);
        f.instructions = vec![
            IrInstruction::Compare(CmpOp::Eq, c, n, Operand::Imm(0)),
            IrInstruction::JumpIfNot(c, "if_else_0".into()),
            IrInstruction::Return(Some(acc)),
            IrInstruction::Jump("if_end_0".into()),
            IrInstruction::Label("if_else_0".into()),
            IrInstruction::Label("if_end_0".into()),
            IrInstruction::Const(one, 1),
            IrInstruction::Binary(BinOp::Sub, n1, n, Operand::Reg(one)),
            IrInstruction::Binary(BinOp::Add, acc1, acc, Operand::Reg(n)),
            IrInstruction::Call(Some(res), Callee::Function(sym), vec![n1, acc1]),
            IrInstruction::Return(Some(res)),
            IrInstruction::Nop,
        ];
        let mut p = IrProgram::new("m");
        p.functions.push(f);
        p
    }

    #[test]
    fn test_level_zero_only_drops_nops() {
        let mut p = sum();
        let stats = Optimizer::new(0).optimize(&mut p);
        assert_eq!(stats.instructions_before, stats.instructions_after + 1);
        assert!(p.functions[0].is_tail_recursive);
        assert!(p.functions[0].calls_self());
    }

    #[test]
    fn test_level_two_converts_to_loop() {
        let mut p = sum();
        let stats = Optimizer::new(2).optimize(&mut p);
        assert_eq!(stats.tail_loops, 1);
        let f = &p.functions[0];
        assert!(!f.calls_self());
        assert!(f
            .instructions
            .iter()
            .any(|i| matches!(i, IrInstruction::Jump(l) if l == LOOP_LABEL)));
        assert!(f
            .instructions
            .iter()
            .all(|i| !matches!(i, IrInstruction::Nop)));
        // The constant 1 was folded into the subtraction.
        assert!(f.instructions.iter().any(|i| matches!(
            i,
            IrInstruction::Binary(BinOp::Sub, _, IrReg(0), Operand::Imm(1))
        )));
    }
}
