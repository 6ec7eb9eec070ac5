//! # 68000 emitter (GNU as syntax)
//!
//! Every virtual register owns a 4-byte slot in a `link %a6` frame and is
//! kept normalized there: zero-extended or sign-extended to 32 bits
//! according to its IR type. Operations run on `%d0`/`%d1` at long width
//! and renormalize the result, so narrow and 24-bit types need no special
//! instruction forms.
//!
//! Arguments are pushed right to left as longs (C calling convention);
//! parameter `i` lives at `8+4i(%a6)`, results return in `%d0`. Pointers
//! are 32-bit. Wide multiply/divide and 24-bit fixed-point use libgcc-style
//! helpers.

use super::{runtime_used, AsmWriter, Emitter};
use crate::compiler::ir::{
    BinOp, Callee, CmpOp, IrFunction, IrInstruction, IrProgram, IrReg, Operand, StringPool, UnOp,
};
use crate::compiler::target::Target;
use crate::compiler::types::Type;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct M68kEmitter;

impl M68kEmitter {
    pub fn new() -> Self {
        Self
    }
}

/// Quoted symbol; `$` is not an identifier character in m68k GNU as
fn quoted(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Bytes a value of this type occupies in memory on the 68000
fn mem_size(ty: &Type) -> u32 {
    match ty {
        Type::Pointer(_) => 4,
        Type::Array(elem, len) => mem_size(elem) * u32::from(*len),
        other => other.storage_bytes(),
    }
}

fn suffix(size: u32) -> &'static str {
    match size {
        1 => "b",
        2 => "w",
        _ => "l",
    }
}

/// Helper routine for operations without a single-instruction form
fn helper(op: BinOp, ty: &Type) -> Option<&'static str> {
    let shift = ty.fixed_shift();
    let bits = ty.bits();
    let signed = ty.is_signed();
    match op {
        BinOp::Mul if shift > 0 && bits == 24 => Some(if shift == 8 { "__fxmul16_8" } else { "__fxmul8_16" }),
        BinOp::Div if shift > 0 && bits == 24 => Some(if shift == 8 { "__fxdiv16_8" } else { "__fxdiv8_16" }),
        _ if shift > 0 || bits <= 16 => None,
        BinOp::Mul => Some("__mulsi3"),
        BinOp::Div if signed => Some("__divsi3"),
        BinOp::Div => Some("__udivsi3"),
        BinOp::Rem if signed => Some("__modsi3"),
        BinOp::Rem => Some("__umodsi3"),
        _ => None,
    }
}

fn helpers_used(program: &IrProgram) -> BTreeSet<&'static str> {
    let mut out = BTreeSet::new();
    for func in &program.functions {
        for instr in &func.instructions {
            if let IrInstruction::Binary(op, d, _, rhs) = instr {
                let ty = func.reg_type(*d);
                if let Some(h) = helper(*op, ty) {
                    out.insert(h);
                }
                if matches!(op, BinOp::Shl | BinOp::Shr) && ty.bits() == 24 && rhs.reg().is_some() {
                    out.insert("__umodsi3");
                }
            }
        }
    }
    out
}

struct FunctionWriter<'a> {
    func: &'a IrFunction,
    program: &'a IrProgram,
    sym: String,
    asm: AsmWriter,
    /// `%a6` displacement of every live register
    slots: BTreeMap<IrReg, i32>,
    frame: u32,
}

impl<'a> FunctionWriter<'a> {
    fn new(func: &'a IrFunction, program: &'a IrProgram) -> Result<Self> {
        let mut slots = BTreeMap::new();
        let mut below = 0i32;
        for r in func.live_registers() {
            let slot = match func.params.iter().position(|p| p.reg == r) {
                Some(i) => 8 + 4 * i as i32,
                None => {
                    below += 4;
                    -below
                }
            };
            slots.insert(r, slot);
        }
        let writer = Self {
            func,
            program,
            sym: func.name(),
            asm: AsmWriter::new("|"),
            slots,
            frame: below as u32,
        };
        if below > 32768 {
            return Err(writer.error(format!("frame of {} bytes exceeds link displacement", below)));
        }
        Ok(writer)
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Error::emitter(self.func.name(), Target::M68k.id(), msg)
    }

    fn slot(&self, r: IrReg) -> String {
        format!("{}(%a6)", self.slots[&r])
    }

    fn load(&mut self, r: IrReg, dreg: &str) {
        let slot = self.slot(r);
        self.asm.ins(format!("move.l {},{}", slot, dreg));
    }

    fn store(&mut self, r: IrReg, dreg: &str) {
        let slot = self.slot(r);
        self.asm.ins(format!("move.l {},{}", dreg, slot));
    }

    fn operand(&mut self, op: Operand, dreg: &str) {
        match op {
            Operand::Reg(r) => self.load(r, dreg),
            Operand::Imm(k) => self.asm.ins(format!("move.l #{},{}", k as i32, dreg)),
        }
    }

    /// Bring `%d0` back into the canonical long form of `ty`
    fn normalize(&mut self, ty: &Type) {
        match (ty, ty.bits(), ty.is_signed()) {
            (Type::Bool, _, _) => {
                self.asm.ins("tst.l %d0");
                self.asm.ins("sne %d0");
                self.asm.ins("and.l #1,%d0");
            }
            (Type::Pointer(_), _, _) | (_, 32, _) => {}
            (_, 8, false) => self.asm.ins("and.l #0xFF,%d0"),
            (_, 16, false) => self.asm.ins("and.l #0xFFFF,%d0"),
            (_, 24, false) => self.asm.ins("and.l #0xFFFFFF,%d0"),
            (_, 8, true) => {
                self.asm.ins("ext.w %d0");
                self.asm.ins("ext.l %d0");
            }
            (_, 16, true) => self.asm.ins("ext.l %d0"),
            _ => {
                self.asm.ins("lsl.l #8,%d0");
                self.asm.ins("asr.l #8,%d0");
            }
        }
    }

    fn shift_imm(&mut self, mnemonic: &str, count: u32, dreg: &str) {
        match count {
            0 => {}
            1..=8 => self.asm.ins(format!("{}.l #{},{}", mnemonic, count, dreg)),
            _ => {
                self.asm.ins(format!("moveq #{},%d2", count));
                self.asm.ins(format!("{}.l %d2,{}", mnemonic, dreg));
            }
        }
    }

    fn call_helper(&mut self, name: &str) {
        self.asm.ins("move.l %d1,-(%sp)");
        self.asm.ins("move.l %d0,-(%sp)");
        self.asm.ins(format!("jsr {}", name));
        self.asm.ins("addq.l #8,%sp");
    }

    fn binary(&mut self, op: BinOp, d: IrReg, a: IrReg, b: Operand) -> Result<()> {
        let ty = self.func.reg_type(d);
        let signed = ty.is_signed();
        let bits = ty.bits();
        let shift = ty.fixed_shift();

        self.operand(b, "%d1");
        self.load(a, "%d0");

        if let Some(h) = helper(op, ty) {
            self.call_helper(h);
            self.normalize(ty);
            self.store(d, "%d0");
            return Ok(());
        }

        match op {
            BinOp::Add => self.asm.ins("add.l %d1,%d0"),
            BinOp::Sub => self.asm.ins("sub.l %d1,%d0"),
            BinOp::And => self.asm.ins("and.l %d1,%d0"),
            BinOp::Or => self.asm.ins("or.l %d1,%d0"),
            BinOp::Xor => self.asm.ins("eor.l %d1,%d0"),
            BinOp::Mul => {
                self.asm.ins(if signed { "muls.w %d1,%d0" } else { "mulu.w %d1,%d0" });
                if shift == 16 {
                    self.asm.ins("clr.w %d0");
                    self.asm.ins("swap %d0");
                } else if shift > 0 {
                    self.shift_imm(if signed { "asr" } else { "lsr" }, shift, "%d0");
                }
            }
            BinOp::Div | BinOp::Rem => {
                if shift > 0 {
                    self.shift_imm("asl", shift, "%d0");
                }
                self.asm.ins(if signed { "divs.w %d1,%d0" } else { "divu.w %d1,%d0" });
                if op == BinOp::Rem {
                    self.asm.ins("swap %d0");
                }
                self.asm.ins(if signed { "ext.l %d0" } else { "and.l #0xFFFF,%d0" });
            }
            BinOp::Shl | BinOp::Shr => {
                let mnemonic = match op {
                    BinOp::Shl => "lsl",
                    _ if signed => "asr",
                    _ => "lsr",
                };
                match b {
                    Operand::Imm(k) => {
                        let count = if bits == 24 {
                            (k as u32) % 24
                        } else {
                            (k as u32) & (bits - 1)
                        };
                        self.shift_imm(mnemonic, count, "%d0");
                    }
                    Operand::Reg(_) if bits == 24 => {
                        self.asm.ins("move.l %d0,-(%sp)");
                        self.asm.ins("pea 24.w");
                        self.asm.ins("move.l %d1,-(%sp)");
                        self.asm.ins("jsr __umodsi3");
                        self.asm.ins("addq.l #8,%sp");
                        self.asm.ins("move.l %d0,%d1");
                        self.asm.ins("move.l (%sp)+,%d0");
                        self.asm.ins(format!("{}.l %d1,%d0", mnemonic));
                    }
                    Operand::Reg(_) => {
                        self.asm.ins(format!("and.l #{},%d1", bits - 1));
                        self.asm.ins(format!("{}.l %d1,%d0", mnemonic));
                    }
                }
            }
        }
        self.normalize(ty);
        self.store(d, "%d0");
        Ok(())
    }

    fn compare(&mut self, op: CmpOp, d: IrReg, a: IrReg, b: Operand) {
        let signed = self.func.reg_type(a).is_signed();
        self.operand(b, "%d1");
        self.load(a, "%d0");
        self.asm.ins("cmp.l %d1,%d0");
        let cc = match (op, signed) {
            (CmpOp::Eq, _) => "seq",
            (CmpOp::Ne, _) => "sne",
            (CmpOp::Lt, true) => "slt",
            (CmpOp::Le, true) => "sle",
            (CmpOp::Gt, true) => "sgt",
            (CmpOp::Ge, true) => "sge",
            (CmpOp::Lt, false) => "scs",
            (CmpOp::Le, false) => "sls",
            (CmpOp::Gt, false) => "shi",
            (CmpOp::Ge, false) => "scc",
        };
        self.asm.ins(format!("{} %d0", cc));
        self.asm.ins("and.l #1,%d0");
        self.store(d, "%d0");
    }

    fn convert(&mut self, d: IrReg, s: IrReg) {
        let func = self.func;
        let (from, to) = (func.reg_type(s), func.reg_type(d));
        self.load(s, "%d0");
        if *to == Type::Bool {
            self.normalize(to);
        } else if !matches!(to, Type::Pointer(_)) {
            let (sf, st) = (from.fixed_shift(), to.fixed_shift());
            if st > sf {
                self.shift_imm("lsl", st - sf, "%d0");
            } else if sf > st {
                self.shift_imm(if from.is_signed() { "asr" } else { "lsr" }, sf - st, "%d0");
            }
            self.normalize(to);
        }
        self.store(d, "%d0");
    }

    /// Move a sized value from `(%a0)`/indexed into `%d0`, normalized
    fn load_sized(&mut self, ty: &Type, src: &str) {
        let size = mem_size(ty);
        if size < 4 {
            self.asm.ins("moveq #0,%d0");
        }
        self.asm.ins(format!("move.{} {},%d0", suffix(size), src));
        if size < 4 {
            self.normalize(ty);
        }
    }

    fn element(&mut self, base: IrReg, idx: IrReg) -> Result<Type> {
        let func = self.func;
        let elem = func
            .reg_type(base)
            .element()
            .cloned()
            .ok_or_else(|| self.error(format!("indexing non-pointer register {}", base)))?;
        self.load(base, "%a0");
        self.load(idx, "%d1");
        let scale = mem_size(&elem).trailing_zeros();
        if scale > 0 {
            self.asm.ins(format!("lsl.l #{},%d1", scale));
        }
        Ok(elem)
    }

    fn call(&mut self, dst: Option<IrReg>, callee: &Callee, args: &[IrReg]) -> Result<()> {
        let name = match callee {
            Callee::Function(sym) => {
                if self.program.function(sym).is_none() {
                    return Err(self.error(format!("call to unknown function '{}'", sym)));
                }
                quoted(&sym.qualified())
            }
            Callee::Runtime(rt) => rt.name().to_string(),
        };
        for &arg in args.iter().rev() {
            let slot = self.slot(arg);
            self.asm.ins(format!("move.l {},-(%sp)", slot));
        }
        self.asm.ins(format!("jsr {}", name));
        match args.len() * 4 {
            0 => {}
            n @ 1..=8 => self.asm.ins(format!("addq.l #{},%sp", n)),
            n => self.asm.ins(format!("lea {}(%sp),%sp", n)),
        }
        if let Some(d) = dst {
            self.store(d, "%d0");
        }
        Ok(())
    }

    fn label_name(&self, name: &str) -> String {
        quoted(&format!("{}.{}", self.sym, name))
    }

    fn instruction(&mut self, instr: &IrInstruction) -> Result<()> {
        match instr {
            IrInstruction::Const(d, k) => {
                let v = self.func.reg_type(*d).wrap(*k) as i32;
                self.asm.ins(format!("move.l #{},%d0", v));
                self.store(*d, "%d0");
            }
            IrInstruction::LoadString(d, idx) => {
                self.asm.ins(format!("move.l #{},%d0", StringPool::label(*idx)));
                self.store(*d, "%d0");
            }
            IrInstruction::Move(d, s) => {
                self.load(*s, "%d0");
                self.store(*d, "%d0");
            }
            IrInstruction::Unary(op, d, s) => {
                let ty = self.func.reg_type(*d);
                self.load(*s, "%d0");
                match op {
                    UnOp::Neg => self.asm.ins("neg.l %d0"),
                    UnOp::Not if *ty == Type::Bool => self.asm.ins("eor.l #1,%d0"),
                    UnOp::Not => self.asm.ins("not.l %d0"),
                }
                self.normalize(ty);
                self.store(*d, "%d0");
            }
            IrInstruction::Binary(op, d, a, b) => self.binary(*op, *d, *a, *b)?,
            IrInstruction::Compare(op, d, a, b) => self.compare(*op, *d, *a, *b),
            IrInstruction::Convert(d, s) => self.convert(*d, *s),
            IrInstruction::AddressOf(d, name) => {
                let global = self
                    .program
                    .global(name)
                    .ok_or_else(|| self.error(format!("unknown global '{}'", name)))?;
                self.asm.ins(format!("move.l #{},%d0", quoted(&global.qualified())));
                self.store(*d, "%d0");
            }
            IrInstruction::Load(d, p) => {
                let func = self.func;
                self.load(*p, "%a0");
                self.load_sized(func.reg_type(*d), "(%a0)");
                self.store(*d, "%d0");
            }
            IrInstruction::Store(p, s) => {
                let size = mem_size(self.func.reg_type(*s));
                self.load(*p, "%a0");
                self.load(*s, "%d0");
                self.asm.ins(format!("move.{} %d0,(%a0)", suffix(size)));
            }
            IrInstruction::Index(d, b, i) => {
                let elem = self.element(*b, *i)?;
                self.load_sized(&elem, "(0,%a0,%d1.l)");
                self.store(*d, "%d0");
            }
            IrInstruction::IndexStore(b, i, s) => {
                let elem = self.element(*b, *i)?;
                self.load(*s, "%d0");
                self.asm
                    .ins(format!("move.{} %d0,(0,%a0,%d1.l)", suffix(mem_size(&elem))));
            }
            IrInstruction::Label(name) => {
                let l = self.label_name(name);
                self.asm.label(l);
            }
            IrInstruction::Jump(l) => {
                let l = self.label_name(l);
                self.asm.ins(format!("jra {}", l));
            }
            IrInstruction::JumpIf(c, l) | IrInstruction::JumpIfNot(c, l) => {
                self.load(*c, "%d0");
                self.asm.ins("tst.l %d0");
                let branch = if matches!(instr, IrInstruction::JumpIf(..)) {
                    "jne"
                } else {
                    "jeq"
                };
                let l = self.label_name(l);
                self.asm.ins(format!("{} {}", branch, l));
            }
            IrInstruction::Call(dst, callee, args) => self.call(*dst, callee, args)?,
            IrInstruction::Return(value) => {
                if let Some(r) = value {
                    self.load(*r, "%d0");
                }
                self.asm.ins("unlk %a6");
                self.asm.ins("rts");
            }
            IrInstruction::Nop => {}
        }
        Ok(())
    }

    fn finish(mut self) -> Result<String> {
        let func = self.func;
        self.asm.raw("");
        self.asm.comment(func.symbol.mangled());
        let sym = quoted(&self.sym);
        self.asm.label(&sym);
        self.asm.ins(format!("link %a6,#-{}", self.frame));
        for instr in &func.instructions {
            self.instruction(instr)?;
        }
        if !func.instructions.last().is_some_and(|i| i.is_terminator()) {
            self.asm.ins("unlk %a6");
            self.asm.ins("rts");
        }
        Ok(self.asm.finish())
    }
}

impl Emitter for M68kEmitter {
    fn target(&self) -> Target {
        Target::M68k
    }

    fn emit_header(&self, program: &IrProgram) -> Result<String> {
        let mut asm = AsmWriter::new("|");
        asm.comment(format!("retroc: module {} (m68k)", program.module));
        for rt in runtime_used(program) {
            asm.raw(format!("    .extern {}", rt.name()));
        }
        for h in helpers_used(program) {
            asm.raw(format!("    .extern {}", h));
        }
        for func in &program.functions {
            asm.raw(format!("    .globl {}", quoted(&func.name())));
        }
        asm.raw("    .text");
        asm.raw("    .even");
        Ok(asm.finish())
    }

    fn emit_function(&self, func: &IrFunction, program: &IrProgram) -> Result<String> {
        FunctionWriter::new(func, program)?.finish()
    }

    fn emit_footer(&self, program: &IrProgram) -> Result<String> {
        let mut asm = AsmWriter::new("|");
        asm.raw("");
        asm.raw("    .data");
        for g in &program.globals {
            asm.raw("    .even");
            asm.label(quoted(&g.qualified()));
            match &g.ty {
                Type::Array(..) => asm.ins(format!(".space {}", mem_size(&g.ty))),
                ty => {
                    let v = g.init.map(|v| ty.wrap(v)).unwrap_or(0);
                    let directive = match mem_size(ty) {
                        1 => ".byte",
                        2 => ".word",
                        _ => ".long",
                    };
                    asm.ins(format!("{} {}", directive, v));
                }
            }
        }
        for (i, s) in program.strings.iter() {
            let label = StringPool::label(i);
            asm.raw("    .even");
            asm.label(&label);
            asm.ins(format!(".word {}", s.len()));
            asm.ins(format!(".long {}.data", label));
            asm.label(format!("{}.data", label));
            let bytes: Vec<String> = s.bytes().map(|b| b.to_string()).collect();
            if !bytes.is_empty() {
                asm.ins(format!(".byte {}", bytes.join(",")));
            }
        }
        Ok(asm.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{IrParam, Symbol};
    use crate::compiler::types::FixedKind;

    fn single(op: BinOp, ty: Type) -> IrFunction {
        let mut f = IrFunction::new(Symbol::new("m", "op", vec![]), ty.clone());
        let a = f.registers.alloc(ty.clone());
        let b = f.registers.alloc(ty.clone());
        f.params = vec![
            IrParam { name: "a".into(), reg: a },
            IrParam { name: "b".into(), reg: b },
        ];
        let r = f.registers.alloc(ty);
        f.instructions = vec![
            IrInstruction::Binary(op, r, a, Operand::Reg(b)),
            IrInstruction::Return(Some(r)),
        ];
        f
    }

    #[test]
    fn test_frame_and_arguments() {
        let f = single(BinOp::Add, Type::I8);
        let p = IrProgram::new("m");
        let text = M68kEmitter::new().emit_function(&f, &p).unwrap();
        assert!(text.contains("\"m_op\":\n    link %a6,#-4\n"));
        assert!(text.contains("    move.l 12(%a6),%d1\n    move.l 8(%a6),%d0\n    add.l %d1,%d0\n"));
        assert!(text.contains("    ext.w %d0\n    ext.l %d0\n    move.l %d0,-4(%a6)\n"));
        assert!(text.trim_end().ends_with("rts"));
    }

    #[test]
    fn test_wide_operations_use_helpers() {
        let p = IrProgram::new("m");
        let text = M68kEmitter::new()
            .emit_function(&single(BinOp::Div, Type::U32), &p)
            .unwrap();
        assert!(text.contains("jsr __udivsi3"));
        let text = M68kEmitter::new()
            .emit_function(&single(BinOp::Mul, Type::Fixed(FixedKind::F8_8)), &p)
            .unwrap();
        assert!(text.contains("muls.w %d1,%d0\n    asr.l #8,%d0\n"));
    }

    #[test]
    fn test_unsigned_compare_conditions() {
        let mut f = IrFunction::new(Symbol::new("m", "lt", vec![]), Type::Bool);
        let a = f.registers.alloc(Type::U16);
        let c = f.registers.alloc(Type::Bool);
        f.params.push(IrParam { name: "a".into(), reg: a });
        f.instructions = vec![
            IrInstruction::Compare(CmpOp::Lt, c, a, Operand::Imm(10)),
            IrInstruction::Return(Some(c)),
        ];
        let p = IrProgram::new("m");
        let text = M68kEmitter::new().emit_function(&f, &p).unwrap();
        assert!(text.contains("    move.l #10,%d1\n"));
        assert!(text.contains("    scs %d0\n    and.l #1,%d0\n"));
    }

    #[test]
    fn test_frame_holds_live_registers_only() {
        let mut f = single(BinOp::Add, Type::U16);
        // Leftover temporaries from an optimized-away computation.
        f.registers.alloc(Type::U32);
        f.registers.alloc(Type::U32);
        let p = IrProgram::new("m");
        let text = M68kEmitter::new().emit_function(&f, &p).unwrap();
        assert!(text.contains("link %a6,#-4\n"));
    }
}
