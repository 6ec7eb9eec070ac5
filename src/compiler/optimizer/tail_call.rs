//! Self tail call to loop conversion
//!
//! `dst = call self(a0..an); return dst` becomes a simultaneous assignment of
//! the arguments to the parameter registers followed by a jump to a label at
//! the top of the body. The assignment is sequenced so that no parameter is
//! overwritten while another pending move still reads it; a cycle is broken
//! through one fresh temporary.

use crate::compiler::ir::{IrFunction, IrInstruction, IrReg, RegisterTable};
use tracing::debug;

/// Entry label the converted tail calls jump back to
pub const LOOP_LABEL: &str = "tail_loop";

#[derive(Debug, Default, Clone, Copy)]
pub struct TailCallPass;

impl TailCallPass {
    pub fn new() -> Self {
        Self
    }

    /// True when the function calls itself and every such call is a tail
    /// call with matching arity.
    pub fn analyze(&self, func: &IrFunction) -> bool {
        let mut found = false;
        for (i, instr) in func.instructions.iter().enumerate() {
            if !func.is_self_call(instr) {
                continue;
            }
            found = true;
            if tail_call_at(func, i).is_none() {
                return false;
            }
        }
        found
    }

    /// Rewrite every self tail call of a function `analyze` accepted. The
    /// result contains no self call.
    pub fn run(&self, func: &mut IrFunction) -> bool {
        if !func.is_tail_recursive {
            return false;
        }
        let mut rewritten = 0usize;
        let mut out: Vec<IrInstruction> = Vec::with_capacity(func.instructions.len() + 1);
        out.push(IrInstruction::Label(LOOP_LABEL.to_string()));

        let mut i = 0;
        while i < func.instructions.len() {
            match tail_call_at(func, i) {
                Some(args) => {
                    let moves: Vec<(IrReg, IrReg)> =
                        func.param_regs().into_iter().zip(args).collect();
                    for (dst, src) in sequence_moves(moves, &mut func.registers) {
                        out.push(IrInstruction::Move(dst, src));
                    }
                    out.push(IrInstruction::Jump(LOOP_LABEL.to_string()));
                    rewritten += 1;
                    // Skip the call and its return.
                    i += 2;
                }
                None => {
                    out.push(func.instructions[i].clone());
                    i += 1;
                }
            }
        }
        func.instructions = out;
        debug!(function = %func.name(), rewritten, "converted tail calls to loop");
        rewritten > 0
    }
}

/// Arguments of the self tail call at `index`, if it is one
fn tail_call_at(func: &IrFunction, index: usize) -> Option<Vec<IrReg>> {
    let instr = &func.instructions[index];
    if !func.is_self_call(instr) {
        return None;
    }
    let IrInstruction::Call(dst, _, args) = instr else {
        return None;
    };
    if args.len() != func.params.len() {
        return None;
    }
    match (func.instructions.get(index + 1), dst) {
        (Some(IrInstruction::Return(Some(r))), Some(d)) if r == d => Some(args.clone()),
        (Some(IrInstruction::Return(None)), None) => Some(args.clone()),
        _ => None,
    }
}

/// Order a parallel assignment `dst_i := src_i` into sequential moves.
///
/// A move is emitted once its destination is no longer read by any other
/// pending move. When every pending destination is still read (a cycle), the
/// first destination is saved to a fresh register and its readers redirected.
pub fn sequence_moves(moves: Vec<(IrReg, IrReg)>, registers: &mut RegisterTable) -> Vec<(IrReg, IrReg)> {
    let mut pending: Vec<(IrReg, IrReg)> = moves.into_iter().filter(|(d, s)| d != s).collect();
    let mut out = Vec::with_capacity(pending.len() + 1);

    while !pending.is_empty() {
        let ready = pending.iter().position(|(d, _)| {
            !pending.iter().any(|(other_d, s)| s == d && other_d != d)
        });
        match ready {
            Some(idx) => out.push(pending.remove(idx)),
            None => {
                let (blocked, _) = pending[0];
                let tmp = registers.alloc(registers.ty(blocked).clone());
                out.push((tmp, blocked));
                for (_, s) in pending.iter_mut() {
                    if *s == blocked {
                        *s = tmp;
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{BinOp, Callee, IrParam, Operand, Symbol};
    use crate::compiler::types::Type;
    use std::collections::HashMap;

    fn simulate(moves: &[(IrReg, IrReg)], init: &HashMap<IrReg, i64>) -> HashMap<IrReg, i64> {
        let mut env = init.clone();
        for (d, s) in moves {
            let v = env.get(s).copied().unwrap_or(0);
            env.insert(*d, v);
        }
        env
    }

    #[test]
    fn test_swap_uses_one_temporary() {
        let mut regs = RegisterTable::new();
        let a = regs.alloc(Type::U16);
        let b = regs.alloc(Type::U16);
        let seq = sequence_moves(vec![(a, b), (b, a)], &mut regs);
        assert_eq!(seq.len(), 3);
        assert_eq!(regs.len(), 3);

        let init: HashMap<IrReg, i64> = [(a, 1), (b, 2)].into_iter().collect();
        let env = simulate(&seq, &init);
        assert_eq!(env[&a], 2);
        assert_eq!(env[&b], 1);
    }

    #[test]
    fn test_rotation_and_chain() {
        let mut regs = RegisterTable::new();
        let r: Vec<IrReg> = (0..5).map(|_| regs.alloc(Type::U8)).collect();
        // r0 <- r1 <- r2 <- r0 (cycle), r3 <- r4 (independent), r4 <- r0
        let moves = vec![(r[0], r[1]), (r[1], r[2]), (r[2], r[0]), (r[3], r[4]), (r[4], r[0])];
        let init: HashMap<IrReg, i64> = r.iter().enumerate().map(|(i, x)| (*x, i as i64 * 10)).collect();
        let seq = sequence_moves(moves.clone(), &mut regs);
        let env = simulate(&seq, &init);
        for (d, s) in moves {
            assert_eq!(env[&d], init[&s], "{} := {}", d, s);
        }
    }

    fn countdown() -> IrFunction {
        // f(n, acc) = if n == 0 { acc } else { f(n - 1, acc + n) }
        let mut f = IrFunction::new(Symbol::new("m", "f", vec![]), Type::U16);
        let n = f.registers.alloc(Type::U8);
        let acc = f.registers.alloc(Type::U16);
        f.params = vec![
            IrParam { name: "n".into(), reg: n },
            IrParam { name: "acc".into(), reg: acc },
        ];
        let c = f.registers.alloc(Type::Bool);
        let n1 = f.registers.alloc(Type::U8);
        let wide = f.registers.alloc(Type::U16);
        let acc1 = f.registers.alloc(Type::U16);
        let res = f.registers.alloc(Type::U16);
        f.instructions = vec![
            IrInstruction::Compare(crate::compiler::ir::CmpOp::Eq, c, n, Operand::Imm(0)),
            IrInstruction::JumpIfNot(c, "if_else_0".into()),
            IrInstruction::Return(Some(acc)),
            IrInstruction::Label("if_else_0".into()),
            IrInstruction::Binary(BinOp::Sub, n1, n, Operand::Imm(1)),
            IrInstruction::Convert(wide, n),
            IrInstruction::Binary(BinOp::Add, acc1, acc, Operand::Reg(wide)),
            IrInstruction::Call(Some(res), Callee::Function(f.symbol.clone()), vec![n1, acc1]),
            IrInstruction::Return(Some(res)),
        ];
        f
    }

    #[test]
    fn test_converts_tail_recursion() {
        let pass = TailCallPass::new();
        let mut f = countdown();
        assert!(pass.analyze(&f));
        f.is_tail_recursive = true;
        assert!(pass.run(&mut f));
        assert!(!f.calls_self());
        assert_eq!(f.instructions[0], IrInstruction::Label(LOOP_LABEL.into()));
        assert_eq!(
            f.instructions.last(),
            Some(&IrInstruction::Jump(LOOP_LABEL.into()))
        );
    }

    #[test]
    fn test_non_tail_self_call_is_rejected() {
        let mut f = countdown();
        // Use the call result before returning it.
        let len = f.instructions.len();
        let res = IrReg(6);
        let out = f.registers.alloc(Type::U16);
        f.instructions[len - 1] =
            IrInstruction::Binary(BinOp::Add, out, res, Operand::Imm(1));
        f.instructions.push(IrInstruction::Return(Some(out)));
        assert!(!TailCallPass::new().analyze(&f));
    }

    #[test]
    fn test_run_without_flag_is_noop() {
        let mut f = countdown();
        let before = f.clone();
        assert!(!TailCallPass::new().run(&mut f));
        assert_eq!(f, before);
    }
}
