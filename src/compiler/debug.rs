//! Debug utilities for inspecting IR
//!
//! Text rendering used by logs, tests and the `emit_ir` option.

use super::ir::{Callee, IrFunction, IrInstruction, IrProgram, StringPool, UnOp};

/// Format a single IR instruction
pub fn format_instruction(instr: &IrInstruction) -> String {
    match instr {
        IrInstruction::Const(dst, val) => format!("{} = {}", dst, val),
        IrInstruction::LoadString(dst, idx) => format!("{} = &{}", dst, StringPool::label(*idx)),
        IrInstruction::Move(dst, src) => format!("{} = {}", dst, src),
        IrInstruction::Unary(UnOp::Neg, dst, src) => format!("{} = -{}", dst, src),
        IrInstruction::Unary(UnOp::Not, dst, src) => format!("{} = ~{}", dst, src),
        IrInstruction::Binary(op, dst, a, b) => format!("{} = {} {} {}", dst, a, op.symbol(), b),
        IrInstruction::Compare(op, dst, a, b) => format!("{} = {} {} {}", dst, a, op.symbol(), b),
        IrInstruction::Convert(dst, src) => format!("{} = convert {}", dst, src),
        IrInstruction::AddressOf(dst, name) => format!("{} = &{}", dst, name),
        IrInstruction::Load(dst, ptr) => format!("{} = [{}]", dst, ptr),
        IrInstruction::Store(ptr, src) => format!("[{}] = {}", ptr, src),
        IrInstruction::Index(dst, base, idx) => format!("{} = {}[{}]", dst, base, idx),
        IrInstruction::IndexStore(base, idx, src) => format!("{}[{}] = {}", base, idx, src),
        IrInstruction::Label(name) => format!("{}:", name),
        IrInstruction::Jump(target) => format!("jmp {}", target),
        IrInstruction::JumpIf(cond, target) => format!("jif {}, {}", cond, target),
        IrInstruction::JumpIfNot(cond, target) => format!("jifnot {}, {}", cond, target),
        IrInstruction::Call(dst, callee, args) => {
            let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            let callee = match callee {
                Callee::Function(sym) => sym.mangled(),
                Callee::Runtime(rt) => rt.name().to_string(),
            };
            match dst {
                Some(d) => format!("{} = call {}({})", d, callee, args.join(", ")),
                None => format!("call {}({})", callee, args.join(", ")),
            }
        }
        IrInstruction::Return(Some(r)) => format!("ret {}", r),
        IrInstruction::Return(None) => "ret".to_string(),
        IrInstruction::Nop => "nop".to_string(),
    }
}

/// Header line plus one instruction per line; labels flush left
pub fn format_function(func: &IrFunction) -> String {
    let mut out = String::new();
    let params: Vec<String> = func
        .params
        .iter()
        .map(|p| format!("{}: {} {}", p.reg, func.reg_type(p.reg), p.name))
        .collect();
    out.push_str(&format!(
        "fn {}({}) -> {} [{}{}]\n",
        func.symbol.mangled(),
        params.join(", "),
        func.return_type,
        match func.convention {
            super::ir::CallingConvention::Stack => "stack",
            super::ir::CallingConvention::Smc => "smc",
        },
        if func.is_tail_recursive { ", tail" } else { "" },
    ));
    for instr in &func.instructions {
        match instr {
            IrInstruction::Label(_) => {
                out.push_str(&format!("{}\n", format_instruction(instr)));
            }
            _ => {
                out.push_str(&format!("    {}\n", format_instruction(instr)));
            }
        }
    }
    out
}

/// Whole-program dump: globals, string pool, then functions
pub fn format_program(program: &IrProgram) -> String {
    let mut out = String::new();
    out.push_str(&format!("module {}\n", program.module));
    for g in &program.globals {
        match g.init {
            Some(v) => {
                out.push_str(&format!("global {}: {} = {}\n", g.qualified(), g.ty, v));
            }
            None => {
                out.push_str(&format!("global {}: {}\n", g.qualified(), g.ty));
            }
        }
    }
    for (i, s) in program.strings.iter() {
        out.push_str(&format!("{} = {:?}\n", StringPool::label(i), s));
    }
    for func in &program.functions {
        out.push('\n');
        out.push_str(&format_function(func));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{BinOp, IrParam, IrReg, Operand, Symbol};
    use crate::compiler::types::Type;

    #[test]
    fn test_format_function() {
        let mut f = IrFunction::new(Symbol::new("m", "inc", vec![Type::U8]), Type::U8);
        let x = f.registers.alloc(Type::U8);
        f.params.push(IrParam {
            name: "x".into(),
            reg: x,
        });
        let y = f.registers.alloc(Type::U8);
        f.instructions = vec![
            IrInstruction::Label("top".into()),
            IrInstruction::Binary(BinOp::Add, y, x, Operand::Imm(1)),
            IrInstruction::Return(Some(y)),
        ];
        let text = format_function(&f);
        assert_eq!(
            text,
            "fn inc$u8(r0: u8 x) -> u8 [stack]\ntop:\n    r1 = r0 + #1\n    ret r1\n"
        );
        assert_eq!(
            format_instruction(&IrInstruction::Store(IrReg(3), IrReg(4))),
            "[r3] = r4"
        );
    }
}
