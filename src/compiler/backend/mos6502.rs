//! # 6502 emitter (ca65 syntax)
//!
//! The 6502 has one 8-bit accumulator and a 256-byte hardware stack, so
//! every virtual register lives in a frame on a software stack addressed
//! through the zero-page pointer `fp`:
//!
//! ```text
//! fp+0 .. fp+L-1      registers (non-parameters)
//! fp+L, fp+L+1        caller's fp
//! fp+L+2 ..           arguments, in parameter order
//! ```
//!
//! All arithmetic is unrolled byte by byte through `A`. Values are returned
//! in the zero-page block `ret`; multiplication, division and variable
//! shifts call helpers that take their operands in `arg0`/`arg1`.

use super::{byte_list, le_bytes, runtime_used, AsmWriter, Emitter};
use crate::compiler::ir::{
    BinOp, Callee, CmpOp, IrFunction, IrInstruction, IrProgram, IrReg, Operand, StringPool, UnOp,
};
use crate::compiler::target::Target;
use crate::compiler::types::Type;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

const ZERO_PAGE: &str = "sp, fp, ptr, tmp, ret, arg0, arg1";

#[derive(Debug, Default)]
pub struct Mos6502Emitter;

impl Mos6502Emitter {
    pub fn new() -> Self {
        Self
    }
}

/// ca65 identifiers cannot contain `.`
fn global_label(qualified: &str) -> String {
    qualified.replace('.', "__")
}

/// Register bytes of a type; 24-bit values occupy three bytes in a frame
fn reg_bytes(ty: &Type) -> Option<u32> {
    match ty {
        Type::Fixed(_) | Type::String | Type::Array(..) | Type::Void => None,
        other => Some(other.bits() / 8),
    }
}

fn helper(op: BinOp, ty: &Type, rhs: Operand) -> Option<String> {
    let signed = ty.is_signed();
    let base = match op {
        BinOp::Mul => "mul",
        BinOp::Div if signed => "divs",
        BinOp::Div => "divu",
        BinOp::Rem if signed => "rems",
        BinOp::Rem => "remu",
        BinOp::Shl if rhs.reg().is_some() => "shl",
        BinOp::Shr if rhs.reg().is_some() && signed => "sar",
        BinOp::Shr if rhs.reg().is_some() => "shr",
        _ => return None,
    };
    Some(format!("__{}{}", base, ty.bits()))
}

fn helpers_used(program: &IrProgram) -> BTreeSet<String> {
    program
        .functions
        .iter()
        .flat_map(|f| {
            f.instructions.iter().filter_map(move |i| match i {
                IrInstruction::Binary(op, d, _, rhs) => helper(*op, f.reg_type(*d), *rhs),
                _ => None,
            })
        })
        .collect()
}

fn imm_byte(k: i64, i: u32) -> u8 {
    (k >> (8 * i)) as u8
}

struct FunctionWriter<'a> {
    func: &'a IrFunction,
    program: &'a IrProgram,
    sym: String,
    asm: AsmWriter,
    /// Frame offset of every live register
    offsets: BTreeMap<IrReg, u32>,
    locals: u32,
    labels: usize,
}

impl<'a> FunctionWriter<'a> {
    fn new(func: &'a IrFunction, program: &'a IrProgram) -> Result<Self> {
        let mut writer = Self {
            func,
            program,
            sym: func.name(),
            asm: AsmWriter::new(";"),
            offsets: BTreeMap::new(),
            locals: 0,
            labels: 0,
        };
        writer.layout()?;
        Ok(writer)
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Error::emitter(self.func.name(), Target::Mos6502.id(), msg)
    }

    fn bytes(&self, r: IrReg) -> Result<u32> {
        let ty = self.func.reg_type(r);
        reg_bytes(ty).ok_or_else(|| self.error(format!("no 6502 representation for type {}", ty)))
    }

    fn layout(&mut self) -> Result<()> {
        let func = self.func;
        let mut next = 0;
        for r in func.live_registers() {
            if !func.is_param(r) {
                self.offsets.insert(r, next);
                next += self.bytes(r)?;
            }
        }
        self.locals = next;
        let mut arg = next + 2;
        for p in &func.params {
            self.offsets.insert(p.reg, arg);
            arg += self.bytes(p.reg)?;
        }
        if arg > 256 {
            return Err(self.error(format!(
                "frame of {} bytes exceeds the (fp),Y addressing range",
                arg
            )));
        }
        Ok(())
    }

    fn label_name(&self, name: &str) -> String {
        format!("{}__{}", self.sym, name)
    }

    fn local_label(&mut self) -> String {
        self.labels += 1;
        format!("{}__L{}", self.sym, self.labels)
    }

    /// Load byte `i` of a register into A
    fn lda(&mut self, r: IrReg, i: u32) {
        self.asm.ins(format!("LDY #{}", self.offsets[&r] + i));
        self.asm.ins("LDA (fp),Y");
    }

    fn sta(&mut self, r: IrReg, i: u32) {
        self.asm.ins(format!("LDY #{}", self.offsets[&r] + i));
        self.asm.ins("STA (fp),Y");
    }

    /// `mnemonic` applied to byte `i` of an operand
    fn with_operand(&mut self, mnemonic: &str, op: Operand, i: u32) {
        match op {
            Operand::Reg(r) => {
                self.asm.ins(format!("LDY #{}", self.offsets[&r] + i));
                self.asm.ins(format!("{} (fp),Y", mnemonic));
            }
            Operand::Imm(k) => self.asm.ins(format!("{} #{}", mnemonic, imm_byte(k, i))),
        }
    }

    fn load_operand(&mut self, op: Operand, i: u32) {
        self.with_operand("LDA", op, i);
    }

    fn adjust_sp(&mut self, sub: bool, amount: u32) {
        let (carry, inst) = if sub { ("SEC", "SBC") } else { ("CLC", "ADC") };
        self.asm.ins("LDA sp");
        self.asm.ins(carry);
        self.asm.ins(format!("{} #{}", inst, amount));
        self.asm.ins("STA sp");
        self.asm.ins("LDA sp+1");
        self.asm.ins(format!("{} #0", inst));
        self.asm.ins("STA sp+1");
    }

    fn copy(&mut self, d: IrReg, s: IrReg, n: u32) {
        for i in 0..n {
            self.lda(s, i);
            self.sta(d, i);
        }
    }

    fn sign_fill(&mut self, signed: bool) {
        if signed {
            // A = top byte; C = its sign bit; A = 0x00 or 0xFF
            self.asm.ins("ASL A");
            self.asm.ins("LDA #0");
            self.asm.ins("ADC #$FF");
            self.asm.ins("EOR #$FF");
        } else {
            self.asm.ins("LDA #0");
        }
    }

    fn binary(&mut self, op: BinOp, d: IrReg, a: IrReg, b: Operand) -> Result<()> {
        let ty = self.func.reg_type(d);
        let n = self.bytes(d)?;
        let signed = ty.is_signed();

        if let Some(h) = helper(op, ty, b) {
            for i in 0..n {
                self.lda(a, i);
                self.asm.ins(format!("STA arg0+{}", i));
            }
            let count = if matches!(op, BinOp::Shl | BinOp::Shr) { 1 } else { n };
            for i in 0..count {
                self.load_operand(b, i);
                self.asm.ins(format!("STA arg1+{}", i));
            }
            self.asm.ins(format!("JSR {}", h));
            for i in 0..n {
                self.asm.ins(format!("LDA arg0+{}", i));
                self.sta(d, i);
            }
            return Ok(());
        }

        match (op, b) {
            (BinOp::Shl | BinOp::Shr, Operand::Imm(k)) => {
                let bits = ty.bits();
                let count = if bits == 24 {
                    (k as u32) % 24
                } else {
                    (k as u32) & (bits - 1)
                };
                if d != a {
                    self.copy(d, a, n);
                }
                for _ in 0..count {
                    if op == BinOp::Shl {
                        for i in 0..n {
                            self.lda(d, i);
                            self.asm.ins(if i == 0 { "ASL A" } else { "ROL A" });
                            self.sta(d, i);
                        }
                    } else {
                        for i in (0..n).rev() {
                            self.lda(d, i);
                            if i == n - 1 {
                                if signed {
                                    self.asm.ins("CMP #$80");
                                    self.asm.ins("ROR A");
                                } else {
                                    self.asm.ins("LSR A");
                                }
                            } else {
                                self.asm.ins("ROR A");
                            }
                            self.sta(d, i);
                        }
                    }
                }
            }
            _ => {
                let (setup, inst) = match op {
                    BinOp::Add => (Some("CLC"), "ADC"),
                    BinOp::Sub => (Some("SEC"), "SBC"),
                    BinOp::And => (None, "AND"),
                    BinOp::Or => (None, "ORA"),
                    BinOp::Xor => (None, "EOR"),
                    other => {
                        return Err(self.error(format!("no inline form for {:?}", other)));
                    }
                };
                if let Some(s) = setup {
                    self.asm.ins(s);
                }
                for i in 0..n {
                    self.lda(a, i);
                    self.with_operand(inst, b, i);
                    self.sta(d, i);
                }
            }
        }
        Ok(())
    }

    fn compare(&mut self, op: CmpOp, d: IrReg, a: IrReg, b: Operand) -> Result<()> {
        let n = self.bytes(a)?;
        let signed = self.func.reg_type(a).is_signed();

        if matches!(op, CmpOp::Eq | CmpOp::Ne) {
            let (hit, miss) = if op == CmpOp::Eq { (1, 0) } else { (0, 1) };
            let differ = self.local_label();
            let done = self.local_label();
            for i in 0..n {
                self.lda(a, i);
                self.with_operand("CMP", b, i);
                self.asm.ins(format!("BNE {}", differ));
            }
            self.asm.ins(format!("LDA #{}", hit));
            self.asm.ins(format!("JMP {}", done));
            self.asm.label(&differ);
            self.asm.ins(format!("LDA #{}", miss));
            self.asm.label(&done);
            self.sta(d, 0);
            return Ok(());
        }

        // x - y; ordered compares reduce to "x < y" or its negation
        let (x, y) = match op {
            CmpOp::Gt | CmpOp::Le => (b, Operand::Reg(a)),
            _ => (Operand::Reg(a), b),
        };
        let negate = matches!(op, CmpOp::Ge | CmpOp::Le);
        self.asm.ins("SEC");
        for i in 0..n {
            self.load_operand(x, i);
            self.with_operand("SBC", y, i);
        }
        if signed {
            let skip = self.local_label();
            self.asm.ins(format!("BVC {}", skip));
            self.asm.ins("EOR #$80");
            self.asm.label(&skip);
            // C = N xor V = (x < y)
            self.asm.ins("ASL A");
            self.asm.ins("LDA #0");
            self.asm.ins("ROL A");
            if negate {
                self.asm.ins("EOR #1");
            }
        } else {
            // C = (x >= y)
            self.asm.ins("LDA #0");
            self.asm.ins("ROL A");
            if !negate {
                self.asm.ins("EOR #1");
            }
        }
        self.sta(d, 0);
        Ok(())
    }

    fn unary(&mut self, op: UnOp, d: IrReg, s: IrReg) -> Result<()> {
        let n = self.bytes(d)?;
        match op {
            UnOp::Neg => {
                self.asm.ins("SEC");
                for i in 0..n {
                    self.asm.ins("LDA #0");
                    self.with_operand("SBC", Operand::Reg(s), i);
                    self.sta(d, i);
                }
            }
            UnOp::Not => {
                let mask = if *self.func.reg_type(d) == Type::Bool { "#1" } else { "#$FF" };
                for i in 0..n {
                    self.lda(s, i);
                    self.asm.ins(format!("EOR {}", mask));
                    self.sta(d, i);
                }
            }
        }
        Ok(())
    }

    fn convert(&mut self, d: IrReg, s: IrReg) -> Result<()> {
        let func = self.func;
        let (from, to) = (func.reg_type(s), func.reg_type(d));
        let (nf, nt) = (self.bytes(s)?, self.bytes(d)?);

        if *to == Type::Bool {
            self.lda(s, 0);
            for i in 1..nf {
                self.with_operand("ORA", Operand::Reg(s), i);
            }
            let skip = self.local_label();
            self.asm.ins(format!("BEQ {}", skip));
            self.asm.ins("LDA #1");
            self.asm.label(&skip);
            self.sta(d, 0);
            return Ok(());
        }

        self.copy(d, s, nf.min(nt));
        if nt > nf {
            self.lda(s, nf - 1);
            self.sign_fill(from.is_signed());
            for i in nf..nt {
                self.sta(d, i);
            }
        }
        Ok(())
    }

    fn pointer_to_zp(&mut self, p: IrReg) {
        self.lda(p, 0);
        self.asm.ins("STA ptr");
        self.lda(p, 1);
        self.asm.ins("STA ptr+1");
    }

    /// `ptr = base + idx * stride`; returns the element's register bytes
    fn element_address(&mut self, base: IrReg, idx: IrReg) -> Result<u32> {
        let func = self.func;
        let elem = func
            .reg_type(base)
            .element()
            .ok_or_else(|| self.error(format!("indexing non-pointer register {}", base)))?;
        let bytes = reg_bytes(elem)
            .ok_or_else(|| self.error(format!("no 6502 representation for type {}", elem)))?;
        let stride = elem.storage_bytes();

        self.lda(idx, 0);
        self.asm.ins("STA tmp");
        if self.bytes(idx)? > 1 {
            self.lda(idx, 1);
        } else {
            self.sign_fill(func.reg_type(idx).is_signed());
        }
        self.asm.ins("STA tmp+1");
        for _ in 0..stride.trailing_zeros() {
            self.asm.ins("ASL tmp");
            self.asm.ins("ROL tmp+1");
        }
        self.asm.ins("CLC");
        self.lda(base, 0);
        self.asm.ins("ADC tmp");
        self.asm.ins("STA ptr");
        self.lda(base, 1);
        self.asm.ins("ADC tmp+1");
        self.asm.ins("STA ptr+1");
        Ok(bytes)
    }

    fn load_via_ptr(&mut self, d: IrReg, n: u32) {
        for i in 0..n {
            self.asm.ins(format!("LDY #{}", i));
            self.asm.ins("LDA (ptr),Y");
            self.sta(d, i);
        }
    }

    fn store_via_ptr(&mut self, s: IrReg, n: u32) {
        for i in 0..n {
            self.lda(s, i);
            self.asm.ins(format!("LDY #{}", i));
            self.asm.ins("STA (ptr),Y");
        }
    }

    fn call(&mut self, dst: Option<IrReg>, callee: &Callee, args: &[IrReg]) -> Result<()> {
        let program = self.program;
        let (name, params) = match callee {
            Callee::Function(sym) => {
                let target = program
                    .function(sym)
                    .ok_or_else(|| self.error(format!("call to unknown function '{}'", sym)))?;
                (sym.qualified(), target.param_types())
            }
            Callee::Runtime(rt) => (rt.name().to_string(), rt.params()),
        };
        let mut sizes = Vec::with_capacity(params.len());
        for ty in &params {
            sizes.push(
                reg_bytes(ty)
                    .ok_or_else(|| self.error(format!("no 6502 representation for type {}", ty)))?,
            );
        }
        let total: u32 = sizes.iter().sum();

        if total > 0 {
            self.adjust_sp(true, total);
        }
        let mut offset = 0;
        for (&arg, &size) in args.iter().zip(&sizes) {
            for i in 0..size {
                self.lda(arg, i);
                self.asm.ins(format!("LDY #{}", offset + i));
                self.asm.ins("STA (sp),Y");
            }
            offset += size;
        }
        self.asm.ins(format!("JSR {}", name));
        if total > 0 {
            self.adjust_sp(false, total);
        }

        if let Some(d) = dst {
            for i in 0..self.bytes(d)? {
                self.asm.ins(format!("LDA ret+{}", i));
                self.sta(d, i);
            }
        }
        Ok(())
    }

    fn prologue(&mut self) {
        let func = self.func;
        self.asm.raw("");
        self.asm.comment(format!(
            "{} frame: {} register bytes, {} argument bytes",
            func.symbol.mangled(),
            self.locals,
            func.params
                .iter()
                .map(|p| reg_bytes(func.reg_type(p.reg)).unwrap_or(0))
                .sum::<u32>()
        ));
        let sym = self.sym.clone();
        self.asm.label(&sym);
        self.adjust_sp(true, 2);
        self.asm.ins("LDY #0");
        self.asm.ins("LDA fp");
        self.asm.ins("STA (sp),Y");
        self.asm.ins("INY");
        self.asm.ins("LDA fp+1");
        self.asm.ins("STA (sp),Y");
        if self.locals > 0 {
            self.adjust_sp(true, self.locals);
        }
        self.asm.ins("LDA sp");
        self.asm.ins("STA fp");
        self.asm.ins("LDA sp+1");
        self.asm.ins("STA fp+1");
    }

    fn epilogue(&mut self) {
        self.asm.ins("LDA fp");
        self.asm.ins("CLC");
        self.asm.ins(format!("ADC #{}", self.locals));
        self.asm.ins("STA sp");
        self.asm.ins("LDA fp+1");
        self.asm.ins("ADC #0");
        self.asm.ins("STA sp+1");
        self.asm.ins("LDY #0");
        self.asm.ins("LDA (sp),Y");
        self.asm.ins("STA fp");
        self.asm.ins("INY");
        self.asm.ins("LDA (sp),Y");
        self.asm.ins("STA fp+1");
        self.adjust_sp(false, 2);
        self.asm.ins("RTS");
    }

    fn instruction(&mut self, instr: &IrInstruction) -> Result<()> {
        match instr {
            IrInstruction::Const(d, k) => {
                for i in 0..self.bytes(*d)? {
                    self.asm.ins(format!("LDA #{}", imm_byte(*k, i)));
                    self.sta(*d, i);
                }
            }
            IrInstruction::LoadString(d, idx) => {
                let label = StringPool::label(*idx);
                self.asm.ins(format!("LDA #<{}", label));
                self.sta(*d, 0);
                self.asm.ins(format!("LDA #>{}", label));
                self.sta(*d, 1);
            }
            IrInstruction::Move(d, s) => {
                let n = self.bytes(*d)?;
                self.copy(*d, *s, n);
            }
            IrInstruction::Unary(op, d, s) => self.unary(*op, *d, *s)?,
            IrInstruction::Binary(op, d, a, b) => self.binary(*op, *d, *a, *b)?,
            IrInstruction::Compare(op, d, a, b) => self.compare(*op, *d, *a, *b)?,
            IrInstruction::Convert(d, s) => self.convert(*d, *s)?,
            IrInstruction::AddressOf(d, name) => {
                let global = self
                    .program
                    .global(name)
                    .ok_or_else(|| self.error(format!("unknown global '{}'", name)))?;
                let label = global_label(&global.qualified());
                self.asm.ins(format!("LDA #<{}", label));
                self.sta(*d, 0);
                self.asm.ins(format!("LDA #>{}", label));
                self.sta(*d, 1);
            }
            IrInstruction::Load(d, p) => {
                let n = self.bytes(*d)?;
                self.pointer_to_zp(*p);
                self.load_via_ptr(*d, n);
            }
            IrInstruction::Store(p, s) => {
                let n = self.bytes(*s)?;
                self.pointer_to_zp(*p);
                self.store_via_ptr(*s, n);
            }
            IrInstruction::Index(d, b, i) => {
                let n = self.element_address(*b, *i)?;
                self.load_via_ptr(*d, n);
            }
            IrInstruction::IndexStore(b, i, s) => {
                let n = self.element_address(*b, *i)?;
                self.store_via_ptr(*s, n);
            }
            IrInstruction::Label(name) => {
                let l = self.label_name(name);
                self.asm.label(l);
            }
            IrInstruction::Jump(l) => {
                let l = self.label_name(l);
                self.asm.ins(format!("JMP {}", l));
            }
            IrInstruction::JumpIf(c, l) | IrInstruction::JumpIfNot(c, l) => {
                self.lda(*c, 0);
                for i in 1..self.bytes(*c)? {
                    self.with_operand("ORA", Operand::Reg(*c), i);
                }
                let skip = self.local_label();
                let inverse = if matches!(instr, IrInstruction::JumpIf(..)) {
                    "BEQ"
                } else {
                    "BNE"
                };
                self.asm.ins(format!("{} {}", inverse, skip));
                let l = self.label_name(l);
                self.asm.ins(format!("JMP {}", l));
                self.asm.label(&skip);
            }
            IrInstruction::Call(dst, callee, args) => self.call(*dst, callee, args)?,
            IrInstruction::Return(value) => {
                if let Some(r) = value {
                    for i in 0..self.bytes(*r)? {
                        self.lda(*r, i);
                        self.asm.ins(format!("STA ret+{}", i));
                    }
                }
                self.epilogue();
            }
            IrInstruction::Nop => {}
        }
        Ok(())
    }

    fn finish(mut self) -> Result<String> {
        let func = self.func;
        self.prologue();
        for instr in &func.instructions {
            self.instruction(instr)?;
        }
        if !func.instructions.last().is_some_and(|i| i.is_terminator()) {
            self.epilogue();
        }
        Ok(self.asm.finish())
    }
}

impl Emitter for Mos6502Emitter {
    fn target(&self) -> Target {
        Target::Mos6502
    }

    fn emit_header(&self, program: &IrProgram) -> Result<String> {
        let mut asm = AsmWriter::new(";");
        asm.comment(format!("retroc: module {} (mos6502)", program.module));
        asm.raw(".feature dollar_in_identifiers");
        asm.raw(format!(".importzp {}", ZERO_PAGE));
        let imports: Vec<String> = runtime_used(program)
            .into_iter()
            .map(|rt| rt.name().to_string())
            .chain(helpers_used(program))
            .collect();
        if !imports.is_empty() {
            asm.raw(format!(".import {}", imports.join(", ")));
        }
        for func in &program.functions {
            asm.raw(format!(".export {}", func.name()));
        }
        asm.raw(".segment \"CODE\"");
        Ok(asm.finish())
    }

    fn emit_function(&self, func: &IrFunction, program: &IrProgram) -> Result<String> {
        FunctionWriter::new(func, program)?.finish()
    }

    fn emit_footer(&self, program: &IrProgram) -> Result<String> {
        let mut asm = AsmWriter::new(";");
        asm.raw("");
        asm.raw(".segment \"DATA\"");
        for g in &program.globals {
            asm.label(global_label(&g.qualified()));
            match &g.ty {
                Type::Array(..) => asm.ins(format!(".res {}", g.ty.storage_bytes())),
                ty => {
                    let bytes: Vec<String> =
                        le_bytes(g.init.unwrap_or(0), ty.storage_bytes() as usize)
                            .iter()
                            .map(|b| format!("${:02X}", b))
                            .collect();
                    asm.ins(format!(".byte {}", bytes.join(",")));
                }
            }
        }
        for (i, s) in program.strings.iter() {
            let label = StringPool::label(i);
            asm.label(&label);
            asm.ins(format!(".word {}, {}_data", s.len(), label));
            asm.label(format!("{}_data", label));
            if !s.is_empty() {
                asm.ins(format!(
                    ".byte {}",
                    byte_list(s.as_bytes(), |b| format!("${:02X}", b))
                ));
            }
        }
        Ok(asm.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{IrParam, Symbol};

    fn add16() -> IrFunction {
        let mut f = IrFunction::new(Symbol::new("m", "add", vec![]), Type::U16);
        let a = f.registers.alloc(Type::U16);
        let b = f.registers.alloc(Type::U16);
        f.params = vec![
            IrParam { name: "a".into(), reg: a },
            IrParam { name: "b".into(), reg: b },
        ];
        let s = f.registers.alloc(Type::U16);
        f.instructions = vec![
            IrInstruction::Binary(BinOp::Add, s, a, Operand::Reg(b)),
            IrInstruction::Return(Some(s)),
        ];
        f
    }

    #[test]
    fn test_frame_layout() {
        let f = add16();
        let p = IrProgram::new("m");
        let w = FunctionWriter::new(&f, &p).unwrap();
        // s at 0..1, saved fp at 2..3, a at 4..5, b at 6..7
        let offsets: Vec<u32> = w.offsets.values().copied().collect();
        assert_eq!(offsets, vec![4, 6, 0]);
        assert_eq!(w.locals, 2);
    }

    #[test]
    fn test_add_is_byte_unrolled_with_carry() {
        let f = add16();
        let p = IrProgram::new("m");
        let text = Mos6502Emitter::new().emit_function(&f, &p).unwrap();
        assert!(text.contains(
            "    CLC\n    LDY #4\n    LDA (fp),Y\n    LDY #6\n    ADC (fp),Y\n    LDY #0\n    STA (fp),Y\n"
        ));
        assert!(text.contains("    LDY #5\n    LDA (fp),Y\n    LDY #7\n    ADC (fp),Y\n"));
        assert!(text.contains("STA ret+1"));
        assert!(text.trim_end().ends_with("RTS"));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut f = IrFunction::new(Symbol::new("m", "big", vec![]), Type::Void);
        for k in 0..70 {
            let r = f.registers.alloc(Type::U32);
            f.instructions.push(IrInstruction::Const(r, k));
        }
        f.instructions.push(IrInstruction::Return(None));
        let p = IrProgram::new("m");
        assert!(matches!(
            Mos6502Emitter::new().emit_function(&f, &p),
            Err(Error::Emitter { .. })
        ));

        // The same arena with nothing referencing it fits.
        f.instructions = vec![IrInstruction::Return(None)];
        let w = FunctionWriter::new(&f, &p).unwrap();
        assert_eq!(w.locals, 0);
    }

    #[test]
    fn test_globals_use_ca65_labels() {
        let mut p = IrProgram::new("m");
        p.globals.push(crate::compiler::ir::GlobalVariable {
            module: "m".into(),
            name: "count".into(),
            ty: Type::U16,
            init: Some(0x1234),
        });
        let footer = Mos6502Emitter::new().emit_footer(&p).unwrap();
        assert!(footer.contains("m__count:\n    .byte $34,$12\n"));
    }
}
