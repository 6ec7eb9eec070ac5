//! # Peephole pass
//!
//! Rewrites small windows (2-4 instructions) of one function until no
//! pattern matches. Patterns are matched on opcode shape and operand
//! dependency (def/use counts), never on register numbers, so renumbering a
//! function cannot change what the pass does to it.
//!
//! Every rewrite removes an instruction or turns an arithmetic instruction
//! into a plain copy, so the loop terminates; running the pass on its own
//! output changes nothing.

use crate::compiler::ir::{BinOp, CmpOp, IrFunction, IrInstruction, IrReg, Operand};
use std::collections::HashMap;
use tracing::debug;

/// Furthest distance from a definition to the use it may be folded into
const WINDOW: usize = 3;

/// Static def/use counts of one function
#[derive(Debug, Default)]
struct UseDef {
    defs: HashMap<IrReg, usize>,
    uses: HashMap<IrReg, usize>,
}

impl UseDef {
    fn compute(func: &IrFunction) -> Self {
        let mut ud = UseDef::default();
        // Parameters are defined by the caller.
        for p in &func.params {
            *ud.defs.entry(p.reg).or_default() += 1;
        }
        for instr in &func.instructions {
            if let Some(d) = instr.dest() {
                *ud.defs.entry(d).or_default() += 1;
            }
            for u in instr.uses() {
                *ud.uses.entry(u).or_default() += 1;
            }
        }
        ud
    }

    fn uses(&self, r: IrReg) -> usize {
        self.uses.get(&r).copied().unwrap_or(0)
    }

    /// Defined once and read once: a pure expression temporary
    fn is_temp(&self, r: IrReg) -> bool {
        self.defs.get(&r).copied() == Some(1) && self.uses(r) == 1
    }
}

/// Peephole optimizer over one function
#[derive(Debug, Default, Clone, Copy)]
pub struct Peephole;

type Rule = fn(&mut IrFunction, &UseDef) -> bool;

impl Peephole {
    pub fn new() -> Self {
        Self
    }

    /// Run to a fixed point; returns whether anything changed
    pub fn run(&self, func: &mut IrFunction) -> bool {
        let rules: [(&str, Rule); 13] = [
            ("remove_nops", remove_nops),
            ("dead_after_terminator", dead_after_terminator),
            ("jump_to_next", jump_to_next),
            ("merge_adjacent_labels", merge_adjacent_labels),
            ("unused_labels", unused_labels),
            ("redundant_moves", redundant_moves),
            ("copy_forward", copy_forward),
            ("retarget_copy", retarget_copy),
            ("fold_immediate", fold_immediate),
            ("cancel_inc_dec", cancel_inc_dec),
            ("zero_test", zero_test),
            ("algebraic_identity", algebraic_identity),
            ("dead_definition", dead_definition),
        ];

        let before = func.instructions.len();
        let mut rewrites = 0usize;
        loop {
            let ud = UseDef::compute(func);
            let fired = rules.iter().find(|(_, rule)| rule(func, &ud));
            match fired {
                Some((name, _)) => {
                    rewrites += 1;
                    debug!(function = %func.name(), rule = name, "peephole rewrite");
                }
                None => break,
            }
        }
        if rewrites > 0 {
            debug!(
                function = %func.name(),
                rewrites,
                before,
                after = func.instructions.len(),
                "peephole fixed point"
            );
        }
        rewrites > 0
    }
}

fn remove_nops(func: &mut IrFunction, _: &UseDef) -> bool {
    let before = func.instructions.len();
    func.instructions.retain(|i| !matches!(i, IrInstruction::Nop));
    func.instructions.len() != before
}

/// Code after `Return`/`Jump` up to the next label is unreachable
fn dead_after_terminator(func: &mut IrFunction, _: &UseDef) -> bool {
    let code = &mut func.instructions;
    for i in 0..code.len().saturating_sub(1) {
        if code[i].is_terminator() && !matches!(code[i + 1], IrInstruction::Label(_)) {
            code.remove(i + 1);
            return true;
        }
    }
    false
}

/// A branch whose target is reached by falling through (only labels between)
fn jump_to_next(func: &mut IrFunction, _: &UseDef) -> bool {
    let code = &mut func.instructions;
    for i in 0..code.len() {
        let Some(target) = code[i].jump_target() else {
            continue;
        };
        let falls_through = code[i + 1..]
            .iter()
            .take_while(|n| matches!(n, IrInstruction::Label(_)))
            .any(|n| matches!(n, IrInstruction::Label(l) if l == target));
        if falls_through {
            code.remove(i);
            return true;
        }
    }
    false
}

/// `A: B:` collapses into `B:`
fn merge_adjacent_labels(func: &mut IrFunction, _: &UseDef) -> bool {
    let code = &mut func.instructions;
    for i in 0..code.len().saturating_sub(1) {
        if let (IrInstruction::Label(a), IrInstruction::Label(b)) = (&code[i], &code[i + 1]) {
            let (a, b) = (a.clone(), b.clone());
            for instr in code.iter_mut() {
                if let Some(t) = instr.jump_target_mut() {
                    if *t == a {
                        *t = b.clone();
                    }
                }
            }
            code.remove(i);
            return true;
        }
    }
    false
}

fn unused_labels(func: &mut IrFunction, _: &UseDef) -> bool {
    let code = &mut func.instructions;
    let targeted: Vec<String> = code
        .iter()
        .filter_map(|i| i.jump_target().map(str::to_string))
        .collect();
    let pos = code
        .iter()
        .position(|i| matches!(i, IrInstruction::Label(l) if !targeted.contains(l)));
    match pos {
        Some(i) => {
            code.remove(i);
            true
        }
        None => false,
    }
}

/// `a = a`, and the second half of `b = a; a = b`
fn redundant_moves(func: &mut IrFunction, _: &UseDef) -> bool {
    let code = &mut func.instructions;
    for i in 0..code.len() {
        if let IrInstruction::Move(d, s) = code[i] {
            if d == s {
                code.remove(i);
                return true;
            }
            if let Some(IrInstruction::Move(d2, s2)) = code.get(i + 1) {
                if *d2 == s && *s2 == d {
                    code.remove(i + 1);
                    return true;
                }
            }
        }
    }
    false
}

/// `t = h; ... use t` becomes `... use h` when nothing in between redefines `h`
fn copy_forward(func: &mut IrFunction, ud: &UseDef) -> bool {
    for i in 0..func.instructions.len() {
        let IrInstruction::Move(t, h) = func.instructions[i] else {
            continue;
        };
        if t == h || !ud.is_temp(t) || func.is_param(t) || func.reg_type(t) != func.reg_type(h) {
            continue;
        }
        let end = (i + WINDOW).min(func.instructions.len() - 1);
        for j in i + 1..=end {
            let next = &func.instructions[j];
            if next.uses().contains(&t) {
                func.instructions[j].map_uses(|r| if r == t { h } else { r });
                func.instructions.remove(i);
                return true;
            }
            if !next.is_straight_line() || next.dest() == Some(h) {
                break;
            }
        }
    }
    false
}

/// `t = op ...; d = t` becomes `d = op ...`
fn retarget_copy(func: &mut IrFunction, ud: &UseDef) -> bool {
    for i in 0..func.instructions.len().saturating_sub(1) {
        let Some(t) = func.instructions[i].dest() else {
            continue;
        };
        let IrInstruction::Move(d, s) = func.instructions[i + 1] else {
            continue;
        };
        if s != t || d == t || !ud.is_temp(t) || func.is_param(t) {
            continue;
        }
        if func.reg_type(t) != func.reg_type(d) {
            continue;
        }
        if let Some(dst) = func.instructions[i].dest_mut() {
            *dst = d;
        }
        func.instructions.remove(i + 1);
        return true;
    }
    false
}

/// A single-use constant becomes an immediate operand
fn fold_immediate(func: &mut IrFunction, ud: &UseDef) -> bool {
    for i in 0..func.instructions.len() {
        let IrInstruction::Const(t, k) = func.instructions[i] else {
            continue;
        };
        if !ud.is_temp(t) || func.is_param(t) {
            continue;
        }
        let end = (i + WINDOW).min(func.instructions.len() - 1);
        for j in i + 1..=end {
            let next = &func.instructions[j];
            if next.uses().contains(&t) {
                let folded = match next {
                    IrInstruction::Binary(op, d, l, Operand::Reg(r)) if *r == t && *l != t => {
                        Some(IrInstruction::Binary(*op, *d, *l, Operand::Imm(k)))
                    }
                    IrInstruction::Binary(op, d, l, Operand::Reg(r))
                        if *l == t && *r != t && op.is_commutative() =>
                    {
                        Some(IrInstruction::Binary(*op, *d, *r, Operand::Imm(k)))
                    }
                    IrInstruction::Compare(op, d, l, Operand::Reg(r)) if *r == t && *l != t => {
                        Some(IrInstruction::Compare(*op, *d, *l, Operand::Imm(k)))
                    }
                    IrInstruction::Compare(op, d, l, Operand::Reg(r)) if *l == t && *r != t => {
                        Some(IrInstruction::Compare(op.mirror(), *d, *r, Operand::Imm(k)))
                    }
                    _ => None,
                };
                match folded {
                    Some(instr) => {
                        func.instructions[j] = instr;
                        func.instructions.remove(i);
                        return true;
                    }
                    None => break,
                }
            }
            if !next.is_straight_line() {
                break;
            }
        }
    }
    false
}

/// `t = x + k; d = t - k` becomes `d = x` (and the mirrored pair)
fn cancel_inc_dec(func: &mut IrFunction, ud: &UseDef) -> bool {
    for i in 0..func.instructions.len().saturating_sub(1) {
        let (IrInstruction::Binary(op1, t, x, Operand::Imm(k1)), IrInstruction::Binary(op2, d, t2, Operand::Imm(k2))) =
            (&func.instructions[i], &func.instructions[i + 1])
        else {
            continue;
        };
        let inverse = matches!(
            (op1, op2),
            (BinOp::Add, BinOp::Sub) | (BinOp::Sub, BinOp::Add)
        );
        if !inverse || t != t2 || k1 != k2 || !ud.is_temp(*t) || func.is_param(*t) {
            continue;
        }
        let (d, x) = (*d, *x);
        if func.reg_type(d) != func.reg_type(x) {
            continue;
        }
        func.instructions[i + 1] = IrInstruction::Move(d, x);
        func.instructions.remove(i);
        return true;
    }
    false
}

/// `t = a - b; c = t == 0` becomes `c = a == b` (likewise `!=`)
fn zero_test(func: &mut IrFunction, ud: &UseDef) -> bool {
    for i in 0..func.instructions.len().saturating_sub(1) {
        let (IrInstruction::Binary(BinOp::Sub, t, a, b), IrInstruction::Compare(op, c, t2, Operand::Imm(0))) =
            (&func.instructions[i], &func.instructions[i + 1])
        else {
            continue;
        };
        if !matches!(op, CmpOp::Eq | CmpOp::Ne) || t != t2 || !ud.is_temp(*t) || func.is_param(*t) {
            continue;
        }
        let fused = IrInstruction::Compare(*op, *c, *a, *b);
        func.instructions[i + 1] = fused;
        func.instructions.remove(i);
        return true;
    }
    false
}

/// `x + 0`, `x - 0`, `x | 0`, `x ^ 0`, shifts by 0, and integer `x * 1`, `x / 1`
fn algebraic_identity(func: &mut IrFunction, _: &UseDef) -> bool {
    for i in 0..func.instructions.len() {
        let IrInstruction::Binary(op, d, x, Operand::Imm(k)) = func.instructions[i] else {
            continue;
        };
        let identity = match op {
            BinOp::Add | BinOp::Sub | BinOp::Or | BinOp::Xor | BinOp::Shl | BinOp::Shr => k == 0,
            BinOp::Mul | BinOp::Div => k == 1 && func.reg_type(x).is_integer(),
            _ => false,
        };
        if identity && func.reg_type(d) == func.reg_type(x) {
            func.instructions[i] = IrInstruction::Move(d, x);
            return true;
        }
    }
    false
}

/// Side-effect-free definition nobody reads
fn dead_definition(func: &mut IrFunction, ud: &UseDef) -> bool {
    let pos = func.instructions.iter().position(|instr| {
        let pure = matches!(
            instr,
            IrInstruction::Const(..)
                | IrInstruction::LoadString(..)
                | IrInstruction::Move(..)
                | IrInstruction::Unary(..)
                | IrInstruction::Compare(..)
                | IrInstruction::Convert(..)
                | IrInstruction::AddressOf(..)
        ) || matches!(instr, IrInstruction::Binary(op, ..) if !matches!(op, BinOp::Div | BinOp::Rem));
        pure && instr.dest().map_or(false, |d| ud.uses(d) == 0)
    });
    match pos {
        Some(i) => {
            func.instructions.remove(i);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{IrParam, Symbol};
    use crate::compiler::types::Type;

    fn function(params: &[Type], temps: &[Type], code: Vec<IrInstruction>) -> IrFunction {
        let mut f = IrFunction::new(Symbol::new("t", "f", vec![]), Type::U8);
        for (i, ty) in params.iter().enumerate() {
            let reg = f.registers.alloc(ty.clone());
            f.params.push(IrParam {
                name: format!("p{}", i),
                reg,
            });
        }
        for ty in temps {
            f.registers.alloc(ty.clone());
        }
        f.instructions = code;
        f
    }

    #[test]
    fn test_const_copy_collapses() {
        // r1 = 0; r2 = r1; return r2
        let mut f = function(
            &[],
            &[Type::U8, Type::U8],
            vec![
                IrInstruction::Const(IrReg(0), 0),
                IrInstruction::Move(IrReg(1), IrReg(0)),
                IrInstruction::Return(Some(IrReg(1))),
            ],
        );
        assert!(Peephole::new().run(&mut f));
        assert_eq!(
            f.instructions,
            vec![
                IrInstruction::Const(IrReg(0), 0),
                IrInstruction::Return(Some(IrReg(0)))
            ]
        );
    }

    #[test]
    fn test_inc_dec_cancel() {
        let mut f = function(
            &[Type::U8],
            &[Type::U8, Type::U8],
            vec![
                IrInstruction::Binary(BinOp::Add, IrReg(1), IrReg(0), Operand::Imm(1)),
                IrInstruction::Binary(BinOp::Sub, IrReg(2), IrReg(1), Operand::Imm(1)),
                IrInstruction::Return(Some(IrReg(2))),
            ],
        );
        Peephole::new().run(&mut f);
        assert_eq!(f.instructions, vec![IrInstruction::Return(Some(IrReg(0)))]);
    }

    #[test]
    fn test_sub_then_zero_test() {
        let mut f = function(
            &[Type::U8, Type::U8],
            &[Type::U8, Type::Bool],
            vec![
                IrInstruction::Binary(BinOp::Sub, IrReg(2), IrReg(0), Operand::Reg(IrReg(1))),
                IrInstruction::Compare(CmpOp::Eq, IrReg(3), IrReg(2), Operand::Imm(0)),
                IrInstruction::Return(Some(IrReg(3))),
            ],
        );
        Peephole::new().run(&mut f);
        assert_eq!(
            f.instructions,
            vec![
                IrInstruction::Compare(CmpOp::Eq, IrReg(3), IrReg(0), Operand::Reg(IrReg(1))),
                IrInstruction::Return(Some(IrReg(3)))
            ]
        );
    }

    #[test]
    fn test_empty_else_skeleton_is_removed() {
        // jifnot c else; return 1; jmp end; else:; end:; return 0
        let mut f = function(
            &[Type::Bool],
            &[Type::U8, Type::U8],
            vec![
                IrInstruction::JumpIfNot(IrReg(0), "if_else_0".into()),
                IrInstruction::Const(IrReg(1), 1),
                IrInstruction::Return(Some(IrReg(1))),
                IrInstruction::Jump("if_end_0".into()),
                IrInstruction::Label("if_else_0".into()),
                IrInstruction::Label("if_end_0".into()),
                IrInstruction::Const(IrReg(2), 0),
                IrInstruction::Return(Some(IrReg(2))),
            ],
        );
        Peephole::new().run(&mut f);
        assert_eq!(
            f.instructions,
            vec![
                IrInstruction::JumpIfNot(IrReg(0), "if_end_0".into()),
                IrInstruction::Const(IrReg(1), 1),
                IrInstruction::Return(Some(IrReg(1))),
                IrInstruction::Label("if_end_0".into()),
                IrInstruction::Const(IrReg(2), 0),
                IrInstruction::Return(Some(IrReg(2))),
            ]
        );
    }

    #[test]
    fn test_call_arguments_are_not_reordered() {
        // Side-effecting calls keep their order and argument registers.
        let mut f = function(
            &[Type::U8],
            &[Type::U8, Type::U8],
            vec![
                IrInstruction::Move(IrReg(1), IrReg(0)),
                IrInstruction::Call(
                    None,
                    crate::compiler::ir::Callee::Runtime(crate::compiler::ir::RuntimeFn::PrintU8),
                    vec![IrReg(1)],
                ),
                IrInstruction::Const(IrReg(2), 7),
                IrInstruction::Call(
                    None,
                    crate::compiler::ir::Callee::Runtime(crate::compiler::ir::RuntimeFn::PrintU8),
                    vec![IrReg(2)],
                ),
                IrInstruction::Return(Some(IrReg(0))),
            ],
        );
        Peephole::new().run(&mut f);
        let calls: Vec<_> = f
            .instructions
            .iter()
            .filter(|i| matches!(i, IrInstruction::Call(..)))
            .collect();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&f.instructions[0], IrInstruction::Call(_, _, a) if a == &vec![IrReg(0)]));
    }

    #[test]
    fn test_second_run_is_noop() {
        let mut f = function(
            &[Type::U8],
            &[Type::U8, Type::U8, Type::U8],
            vec![
                IrInstruction::Move(IrReg(1), IrReg(0)),
                IrInstruction::Const(IrReg(2), 0),
                IrInstruction::Binary(BinOp::Add, IrReg(3), IrReg(1), Operand::Reg(IrReg(2))),
                IrInstruction::Return(Some(IrReg(3))),
            ],
        );
        let p = Peephole::new();
        assert!(p.run(&mut f));
        let once = f.clone();
        assert!(!p.run(&mut f));
        assert_eq!(f, once);
    }
}
