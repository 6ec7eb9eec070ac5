//! # Z80 emitter
//!
//! Two calling conventions share one instruction selector:
//!
//! - **Stack**: reentrant. Arguments are pushed right to left as 16-bit
//!   words, the callee builds an `IX` frame and addresses parameters at
//!   `IX+4+2i` and its other registers at negative displacements.
//! - **SMC**: every parameter is the immediate operand of a load at the top
//!   of the callee. The caller patches those immediates through the exported
//!   `<fn>$<param>$imm` anchors, then `CALL`s. Registers live in static
//!   storage, so SMC functions must never be re-entered.
//!
//! Values are 8-bit (`A`, `B`) or 16-bit (`HL`, `DE`); results return in
//! `A` or `HL`. Multiplication, division and variable shifts go through
//! runtime helpers declared in the module header.

use super::{byte_list, runtime_used, AsmWriter, Emitter};
use crate::compiler::ir::{
    BinOp, Callee, CmpOp, IrFunction, IrInstruction, IrProgram, IrReg, Operand, StringPool, UnOp,
};
use crate::compiler::target::Target;
use crate::compiler::types::Type;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct Z80Emitter;

impl Z80Emitter {
    pub fn new() -> Self {
        Self
    }
}

/// Patchable immediate of an SMC parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmcSlot {
    pub function: String,
    pub param: String,
    /// Exported anchor addressing the immediate bytes
    pub symbol: String,
    /// Byte offset of the immediate from the function entry
    pub offset: u32,
    pub size: u32,
}

/// `<fn>$<param>$imm`
pub fn imm_symbol(function: &str, param: &str) -> String {
    format!("{}${}$imm", function, param)
}

/// Patch slots of an SMC function in entry order
pub fn smc_slots(func: &IrFunction) -> Vec<SmcSlot> {
    let name = func.name();
    let mut offset = 0;
    let mut slots = Vec::with_capacity(func.params.len());
    for p in &func.params {
        let size = func.reg_type(p.reg).bits() / 8;
        slots.push(SmcSlot {
            function: name.clone(),
            param: p.name.clone(),
            symbol: imm_symbol(&name, &p.name),
            offset: offset + 1,
            size,
        });
        // LD A,n + LD (nn),A, or LD HL,nn + LD (nn),HL
        offset += if size == 1 { 5 } else { 6 };
    }
    slots
}

/// Runtime helper implementing `op` on `ty`, if the Z80 has no inline form
fn helper(op: BinOp, ty: &Type, rhs: Operand) -> Option<String> {
    let bits = ty.bits();
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
    Some(format!("__{}{}", base, bits))
}

fn helpers_used(program: &IrProgram) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for func in &program.functions {
        for instr in &func.instructions {
            if let IrInstruction::Binary(op, d, _, rhs) = instr {
                if let Some(h) = helper(*op, func.reg_type(*d), *rhs) {
                    out.insert(h);
                }
            }
        }
    }
    out
}

fn byte(k: i64) -> u8 {
    k as u8
}

fn word(k: i64) -> u16 {
    k as u16
}

/// Where a virtual register lives
#[derive(Debug, Clone)]
enum Home {
    /// Signed displacement from IX
    Frame(i32),
    /// Static storage label (SMC functions)
    Static(String),
}

fn ix(d: i32) -> String {
    if d < 0 {
        format!("(IX-{})", -d)
    } else {
        format!("(IX+{})", d)
    }
}

struct FunctionWriter<'a> {
    func: &'a IrFunction,
    program: &'a IrProgram,
    sym: String,
    asm: AsmWriter,
    /// Homes of the live registers only
    homes: BTreeMap<IrReg, Home>,
    frame_bytes: u32,
    labels: usize,
}

impl<'a> FunctionWriter<'a> {
    fn new(func: &'a IrFunction, program: &'a IrProgram) -> Result<Self> {
        let sym = func.name();
        let mut writer = Self {
            func,
            program,
            sym,
            asm: AsmWriter::new(";"),
            homes: BTreeMap::new(),
            frame_bytes: 0,
            labels: 0,
        };
        writer.layout()?;
        Ok(writer)
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Error::emitter(self.func.name(), Target::Z80Smc.id(), msg)
    }

    /// Bytes a register of this type needs on the Z80
    fn width(&self, ty: &Type) -> Result<u32> {
        match ty.bits() {
            8 if !matches!(ty, Type::Fixed(_)) => Ok(1),
            16 if !matches!(ty, Type::Fixed(_)) => Ok(2),
            _ => Err(self.error(format!("no Z80 representation for type {}", ty))),
        }
    }

    fn is_wide(&self, r: IrReg) -> Result<bool> {
        Ok(self.width(self.func.reg_type(r))? == 2)
    }

    fn layout(&mut self) -> Result<()> {
        let func = self.func;
        let live = func.live_registers();
        if func.uses_smc_convention() {
            for r in live {
                self.width(func.reg_type(r))?;
                self.homes.insert(r, Home::Static(format!("{}.r{}", self.sym, r.0)));
            }
            return Ok(());
        }

        let mut below = 0i32;
        for r in live {
            let size = self.width(func.reg_type(r))? as i32;
            let disp = match func.params.iter().position(|p| p.reg == r) {
                Some(i) => 4 + 2 * i as i32,
                None => {
                    below += size;
                    -below
                }
            };
            if disp < -128 || disp + size - 1 > 127 {
                return Err(self.error(format!(
                    "register {} at IX{:+} is outside the IX displacement range",
                    r, disp
                )));
            }
            self.homes.insert(r, Home::Frame(disp));
        }
        self.frame_bytes = below as u32;
        Ok(())
    }

    fn label_name(&self, name: &str) -> String {
        format!("{}.{}", self.sym, name)
    }

    fn local_label(&mut self) -> String {
        self.labels += 1;
        format!("{}.L{}", self.sym, self.labels)
    }

    fn load_a(&mut self, r: IrReg) {
        match &self.homes[&r] {
            Home::Frame(d) => self.asm.ins(format!("LD A,{}", ix(*d))),
            Home::Static(l) => self.asm.ins(format!("LD A,({})", l)),
        }
    }

    fn store_a(&mut self, r: IrReg) {
        match &self.homes[&r] {
            Home::Frame(d) => self.asm.ins(format!("LD {},A", ix(*d))),
            Home::Static(l) => self.asm.ins(format!("LD ({}),A", l)),
        }
    }

    fn load_hl(&mut self, r: IrReg) {
        match &self.homes[&r] {
            Home::Frame(d) => {
                let d = *d;
                self.asm.ins(format!("LD L,{}", ix(d)));
                self.asm.ins(format!("LD H,{}", ix(d + 1)));
            }
            Home::Static(l) => self.asm.ins(format!("LD HL,({})", l)),
        }
    }

    fn store_hl(&mut self, r: IrReg) {
        match &self.homes[&r] {
            Home::Frame(d) => {
                let d = *d;
                self.asm.ins(format!("LD {},L", ix(d)));
                self.asm.ins(format!("LD {},H", ix(d + 1)));
            }
            Home::Static(l) => self.asm.ins(format!("LD ({}),HL", l)),
        }
    }

    /// 8-bit operand into B (clobbers A)
    fn operand_b(&mut self, op: Operand, flip: bool) {
        match op {
            Operand::Reg(r) => {
                self.load_a(r);
                if flip {
                    self.asm.ins("XOR 80h");
                }
                self.asm.ins("LD B,A");
            }
            Operand::Imm(k) => {
                let v = if flip { byte(k) ^ 0x80 } else { byte(k) };
                self.asm.ins(format!("LD B,{}", v));
            }
        }
    }

    /// 8-bit operand into A
    fn operand_a(&mut self, op: Operand, flip: bool) {
        match op {
            Operand::Reg(r) => {
                self.load_a(r);
                if flip {
                    self.asm.ins("XOR 80h");
                }
            }
            Operand::Imm(k) => {
                let v = if flip { byte(k) ^ 0x80 } else { byte(k) };
                self.asm.ins(format!("LD A,{}", v));
            }
        }
    }

    /// 16-bit operand into HL
    fn operand_hl(&mut self, op: Operand, flip: bool) {
        match op {
            Operand::Reg(r) => {
                self.load_hl(r);
                if flip {
                    self.asm.ins("LD A,H");
                    self.asm.ins("XOR 80h");
                    self.asm.ins("LD H,A");
                }
            }
            Operand::Imm(k) => {
                let v = if flip { word(k) ^ 0x8000 } else { word(k) };
                self.asm.ins(format!("LD HL,{}", v));
            }
        }
    }

    /// 16-bit operand into DE (clobbers HL)
    fn operand_de(&mut self, op: Operand, flip: bool) {
        match op {
            Operand::Reg(_) => {
                self.operand_hl(op, flip);
                self.asm.ins("EX DE,HL");
            }
            Operand::Imm(k) => {
                let v = if flip { word(k) ^ 0x8000 } else { word(k) };
                self.asm.ins(format!("LD DE,{}", v));
            }
        }
    }

    fn bytewise_hl_de(&mut self, mnemonic: &str) {
        self.asm.ins("LD A,L");
        self.asm.ins(format!("{} E", mnemonic));
        self.asm.ins("LD L,A");
        self.asm.ins("LD A,H");
        self.asm.ins(format!("{} D", mnemonic));
        self.asm.ins("LD H,A");
    }

    fn binary(&mut self, op: BinOp, d: IrReg, a: IrReg, b: Operand) -> Result<()> {
        let ty = self.func.reg_type(d);
        let signed = ty.is_signed();
        let helper = helper(op, ty, b);

        if !self.is_wide(d)? {
            match (op, b) {
                (BinOp::Shl | BinOp::Shr, Operand::Imm(k)) => {
                    self.load_a(a);
                    let step = match op {
                        BinOp::Shl => "SLA A",
                        _ if signed => "SRA A",
                        _ => "SRL A",
                    };
                    for _ in 0..(k & 7) {
                        self.asm.ins(step);
                    }
                }
                (BinOp::Add | BinOp::Sub | BinOp::And | BinOp::Or | BinOp::Xor, Operand::Imm(k)) => {
                    self.load_a(a);
                    self.asm.ins(format!("{}{}", alu8(op), byte(k)));
                }
                _ => {
                    self.operand_b(b, false);
                    self.load_a(a);
                    match &helper {
                        Some(h) => self.asm.ins(format!("CALL {}", h)),
                        None => self.asm.ins(format!("{}B", alu8(op))),
                    }
                }
            }
            self.store_a(d);
            return Ok(());
        }

        match (op, b) {
            (BinOp::Shl | BinOp::Shr, Operand::Imm(k)) => {
                self.load_hl(a);
                for _ in 0..(k & 15) {
                    match op {
                        BinOp::Shl => self.asm.ins("ADD HL,HL"),
                        _ => {
                            self.asm.ins(if signed { "SRA H" } else { "SRL H" });
                            self.asm.ins("RR L");
                        }
                    }
                }
            }
            _ => {
                self.operand_de(b, false);
                self.load_hl(a);
                match (&helper, op) {
                    (Some(h), _) => self.asm.ins(format!("CALL {}", h)),
                    (None, BinOp::Add) => self.asm.ins("ADD HL,DE"),
                    (None, BinOp::Sub) => {
                        self.asm.ins("OR A");
                        self.asm.ins("SBC HL,DE");
                    }
                    (None, BinOp::And) => self.bytewise_hl_de("AND"),
                    (None, BinOp::Or) => self.bytewise_hl_de("OR"),
                    (None, BinOp::Xor) => self.bytewise_hl_de("XOR"),
                    (None, other) => {
                        return Err(self.error(format!("no inline form for 16-bit {:?}", other)))
                    }
                }
            }
        }
        self.store_hl(d);
        Ok(())
    }

    /// Flags-only comparison followed by materializing 0/1 in A.
    ///
    /// The Z80 has no signed condition codes, so ordered signed compares flip
    /// the sign bit of both operands and compare unsigned.
    fn compare(&mut self, op: CmpOp, d: IrReg, a: IrReg, b: Operand) -> Result<()> {
        let ty = self.func.reg_type(a);
        let flip = ty.is_signed() && !matches!(op, CmpOp::Eq | CmpOp::Ne);
        let (x, y) = match op {
            CmpOp::Gt | CmpOp::Le => (b, Operand::Reg(a)),
            _ => (Operand::Reg(a), b),
        };
        let cc = match op {
            CmpOp::Eq => "Z",
            CmpOp::Ne => "NZ",
            CmpOp::Lt | CmpOp::Gt => "C",
            CmpOp::Ge | CmpOp::Le => "NC",
        };

        if self.is_wide(a)? {
            self.operand_de(y, flip);
            self.operand_hl(x, flip);
            self.asm.ins("OR A");
            self.asm.ins("SBC HL,DE");
        } else {
            self.operand_b(y, flip);
            self.operand_a(x, flip);
            self.asm.ins("CP B");
        }
        let skip = self.local_label();
        self.asm.ins("LD A,1");
        self.asm.ins(format!("JR {},{}", cc, skip));
        self.asm.ins("XOR A");
        self.asm.label(&skip);
        self.store_a(d);
        Ok(())
    }

    fn unary(&mut self, op: UnOp, d: IrReg, s: IrReg) -> Result<()> {
        let is_bool = *self.func.reg_type(d) == Type::Bool;
        if self.is_wide(d)? {
            self.load_hl(s);
            self.asm.ins("LD A,L");
            self.asm.ins("CPL");
            self.asm.ins("LD L,A");
            self.asm.ins("LD A,H");
            self.asm.ins("CPL");
            self.asm.ins("LD H,A");
            if op == UnOp::Neg {
                self.asm.ins("INC HL");
            }
            self.store_hl(d);
        } else {
            self.load_a(s);
            match op {
                UnOp::Neg => self.asm.ins("NEG"),
                UnOp::Not if is_bool => self.asm.ins("XOR 1"),
                UnOp::Not => self.asm.ins("CPL"),
            }
            self.store_a(d);
        }
        Ok(())
    }

    fn convert(&mut self, d: IrReg, s: IrReg) -> Result<()> {
        let func = self.func;
        let from = func.reg_type(s);
        let to = func.reg_type(d);
        let (wide_from, wide_to) = (self.is_wide(s)?, self.is_wide(d)?);

        if *to == Type::Bool {
            if wide_from {
                self.load_hl(s);
                self.asm.ins("LD A,H");
                self.asm.ins("OR L");
            } else {
                self.load_a(s);
                self.asm.ins("OR A");
            }
            let skip = self.local_label();
            self.asm.ins(format!("JR Z,{}", skip));
            self.asm.ins("LD A,1");
            self.asm.label(&skip);
            self.store_a(d);
            return Ok(());
        }

        match (wide_from, wide_to) {
            (false, false) => {
                self.load_a(s);
                self.store_a(d);
            }
            (true, true) => {
                self.load_hl(s);
                self.store_hl(d);
            }
            (true, false) => {
                self.load_hl(s);
                self.asm.ins("LD A,L");
                self.store_a(d);
            }
            (false, true) => {
                self.load_a(s);
                self.asm.ins("LD L,A");
                if from.is_signed() {
                    self.asm.ins("RLA");
                    self.asm.ins("SBC A,A");
                    self.asm.ins("LD H,A");
                } else {
                    self.asm.ins("LD H,0");
                }
                self.store_hl(d);
            }
        }
        Ok(())
    }

    /// Element address of `base[idx]` into HL
    fn element_address(&mut self, base: IrReg, idx: IrReg) -> Result<u32> {
        let elem = self
            .func
            .reg_type(base)
            .element()
            .ok_or_else(|| self.error(format!("indexing non-pointer register {}", base)))?;
        let size = self.width(elem)?;
        if self.is_wide(idx)? {
            self.load_hl(idx);
        } else {
            self.load_a(idx);
            self.asm.ins("LD L,A");
            if self.func.reg_type(idx).is_signed() {
                self.asm.ins("RLA");
                self.asm.ins("SBC A,A");
                self.asm.ins("LD H,A");
            } else {
                self.asm.ins("LD H,0");
            }
        }
        if size == 2 {
            self.asm.ins("ADD HL,HL");
        }
        self.asm.ins("EX DE,HL");
        self.load_hl(base);
        self.asm.ins("ADD HL,DE");
        Ok(size)
    }

    fn load_through_hl(&mut self, d: IrReg, size: u32) {
        if size == 2 {
            self.asm.ins("LD E,(HL)");
            self.asm.ins("INC HL");
            self.asm.ins("LD D,(HL)");
            self.asm.ins("EX DE,HL");
            self.store_hl(d);
        } else {
            self.asm.ins("LD A,(HL)");
            self.store_a(d);
        }
    }

    fn call(&mut self, dst: Option<IrReg>, callee: &Callee, args: &[IrReg]) -> Result<()> {
        let program = self.program;
        let (name, smc_target) = match callee {
            Callee::Function(sym) => {
                let target = program
                    .function(sym)
                    .ok_or_else(|| self.error(format!("call to unknown function '{}'", sym)))?;
                (sym.qualified(), target.uses_smc_convention().then_some(target))
            }
            Callee::Runtime(rt) => (rt.name().to_string(), None),
        };

        match smc_target {
            Some(target) => {
                for (p, &arg) in target.params.iter().zip(args) {
                    let anchor = imm_symbol(&name, &p.name);
                    if self.is_wide(arg)? {
                        self.load_hl(arg);
                        self.asm.ins(format!("LD ({}),HL", anchor));
                    } else {
                        self.load_a(arg);
                        self.asm.ins(format!("LD ({}),A", anchor));
                    }
                }
                self.asm.ins(format!("CALL {}", name));
            }
            None => {
                for &arg in args.iter().rev() {
                    if self.is_wide(arg)? {
                        self.load_hl(arg);
                    } else {
                        self.load_a(arg);
                        self.asm.ins("LD L,A");
                        self.asm.ins("LD H,0");
                    }
                    self.asm.ins("PUSH HL");
                }
                self.asm.ins(format!("CALL {}", name));
                for _ in args {
                    self.asm.ins("POP BC");
                }
            }
        }

        if let Some(d) = dst {
            if self.is_wide(d)? {
                self.store_hl(d);
            } else {
                self.store_a(d);
            }
        }
        Ok(())
    }

    fn epilogue(&mut self) {
        if !self.func.uses_smc_convention() {
            self.asm.ins("LD SP,IX");
            self.asm.ins("POP IX");
        }
        self.asm.ins("RET");
    }

    fn instruction(&mut self, instr: &IrInstruction) -> Result<()> {
        match instr {
            IrInstruction::Const(d, k) => {
                if self.is_wide(*d)? {
                    self.asm.ins(format!("LD HL,{}", word(*k)));
                    self.store_hl(*d);
                } else {
                    self.asm.ins(format!("LD A,{}", byte(*k)));
                    self.store_a(*d);
                }
            }
            IrInstruction::LoadString(d, idx) => {
                self.asm.ins(format!("LD HL,{}", StringPool::label(*idx)));
                self.store_hl(*d);
            }
            IrInstruction::Move(d, s) => {
                if self.is_wide(*d)? {
                    self.load_hl(*s);
                    self.store_hl(*d);
                } else {
                    self.load_a(*s);
                    self.store_a(*d);
                }
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
                self.asm.ins(format!("LD HL,{}", global.qualified()));
                self.store_hl(*d);
            }
            IrInstruction::Load(d, p) => {
                let size = self.width(self.func.reg_type(*d))?;
                self.load_hl(*p);
                self.load_through_hl(*d, size);
            }
            IrInstruction::Store(p, s) => {
                if self.is_wide(*s)? {
                    self.load_hl(*s);
                    self.asm.ins("EX DE,HL");
                    self.load_hl(*p);
                    self.asm.ins("LD (HL),E");
                    self.asm.ins("INC HL");
                    self.asm.ins("LD (HL),D");
                } else {
                    self.load_hl(*p);
                    self.load_a(*s);
                    self.asm.ins("LD (HL),A");
                }
            }
            IrInstruction::Index(d, b, i) => {
                let size = self.element_address(*b, *i)?;
                self.load_through_hl(*d, size);
            }
            IrInstruction::IndexStore(b, i, s) => {
                let size = self.element_address(*b, *i)?;
                if size == 2 {
                    self.asm.ins("PUSH HL");
                    self.load_hl(*s);
                    self.asm.ins("EX DE,HL");
                    self.asm.ins("POP HL");
                    self.asm.ins("LD (HL),E");
                    self.asm.ins("INC HL");
                    self.asm.ins("LD (HL),D");
                } else {
                    self.load_a(*s);
                    self.asm.ins("LD (HL),A");
                }
            }
            IrInstruction::Label(name) => {
                let l = self.label_name(name);
                self.asm.label(l);
            }
            IrInstruction::Jump(l) => {
                let l = self.label_name(l);
                self.asm.ins(format!("JP {}", l));
            }
            IrInstruction::JumpIf(c, l) | IrInstruction::JumpIfNot(c, l) => {
                if self.is_wide(*c)? {
                    self.load_hl(*c);
                    self.asm.ins("LD A,H");
                    self.asm.ins("OR L");
                } else {
                    self.load_a(*c);
                    self.asm.ins("OR A");
                }
                let cc = if matches!(instr, IrInstruction::JumpIf(..)) {
                    "NZ"
                } else {
                    "Z"
                };
                let l = self.label_name(l);
                self.asm.ins(format!("JP {},{}", cc, l));
            }
            IrInstruction::Call(dst, callee, args) => self.call(*dst, callee, args)?,
            IrInstruction::Return(value) => {
                if let Some(r) = value {
                    if self.is_wide(*r)? {
                        self.load_hl(*r);
                    } else {
                        self.load_a(*r);
                    }
                }
                self.epilogue();
            }
            IrInstruction::Nop => {}
        }
        Ok(())
    }

    fn prologue(&mut self) -> Result<()> {
        let func = self.func;
        self.asm.raw("");
        self.asm.comment(format!(
            "{} ({})",
            func.symbol.mangled(),
            if func.uses_smc_convention() { "smc" } else { "stack" }
        ));
        let sym = self.sym.clone();
        self.asm.label(&sym);

        if func.uses_smc_convention() {
            for p in &func.params {
                let anchor = imm_symbol(&sym, &p.name);
                self.asm.label(format!("{}OP", anchor));
                if self.is_wide(p.reg)? {
                    self.asm.ins("LD HL,0");
                    self.store_hl(p.reg);
                } else {
                    self.asm.ins("LD A,0");
                    self.store_a(p.reg);
                }
            }
        } else {
            self.asm.ins("PUSH IX");
            self.asm.ins("LD IX,0");
            self.asm.ins("ADD IX,SP");
            if self.frame_bytes > 0 {
                self.asm.ins(format!("LD HL,-{}", self.frame_bytes));
                self.asm.ins("ADD HL,SP");
                self.asm.ins("LD SP,HL");
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<String> {
        let func = self.func;
        if func.uses_smc_convention() && func.calls_self() {
            return Err(Error::ConventionConflict {
                function: func.name(),
                reason: "self-recursive call in a self-modifying function".into(),
            });
        }

        self.prologue()?;
        for instr in &func.instructions {
            self.instruction(instr)?;
        }
        if !func.instructions.last().is_some_and(|i| i.is_terminator()) {
            self.epilogue();
        }

        if func.uses_smc_convention() {
            for p in &func.params {
                let anchor = imm_symbol(&self.sym, &p.name);
                self.asm.raw(format!("{} EQU {}OP+1", anchor, anchor));
            }
            let statics: Vec<(IrReg, String)> = self
                .homes
                .iter()
                .filter_map(|(r, home)| match home {
                    Home::Static(l) => Some((*r, l.clone())),
                    Home::Frame(_) => None,
                })
                .collect();
            for (r, l) in statics {
                let size = self.width(func.reg_type(r))?;
                self.asm.label(l);
                self.asm.ins(format!("DS {}", size));
            }
        }
        Ok(self.asm.finish())
    }
}

fn alu8(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "ADD A,",
        BinOp::Sub => "SUB ",
        BinOp::And => "AND ",
        BinOp::Or => "OR ",
        _ => "XOR ",
    }
}

impl Emitter for Z80Emitter {
    fn target(&self) -> Target {
        Target::Z80Smc
    }

    fn emit_header(&self, program: &IrProgram) -> Result<String> {
        let mut asm = AsmWriter::new(";");
        asm.comment(format!("retroc: module {} (z80-smc)", program.module));
        for rt in runtime_used(program) {
            asm.ins(format!("EXTERN {}", rt.name()));
        }
        for h in helpers_used(program) {
            asm.ins(format!("EXTERN {}", h));
        }
        for func in &program.functions {
            asm.ins(format!("PUBLIC {}", func.name()));
            if func.uses_smc_convention() {
                for slot in smc_slots(func) {
                    asm.ins(format!("PUBLIC {}", slot.symbol));
                }
            }
        }
        Ok(asm.finish())
    }

    fn emit_function(&self, func: &IrFunction, program: &IrProgram) -> Result<String> {
        FunctionWriter::new(func, program)?.finish()
    }

    fn emit_footer(&self, program: &IrProgram) -> Result<String> {
        let mut asm = AsmWriter::new(";");
        asm.raw("");
        asm.comment("data");
        for g in &program.globals {
            asm.label(g.qualified());
            match (&g.ty, g.init) {
                (Type::Array(..), _) => asm.ins(format!("DS {}", g.ty.storage_bytes())),
                (ty, init) if ty.storage_bytes() == 1 => {
                    asm.ins(format!("DB {}", byte(init.unwrap_or(0))))
                }
                (_, init) => asm.ins(format!("DW {}", word(init.unwrap_or(0)))),
            }
        }
        for (i, s) in program.strings.iter() {
            let label = StringPool::label(i);
            asm.label(&label);
            asm.ins(format!("DW {},{}.data", s.len(), label));
            asm.label(format!("{}.data", label));
            if !s.is_empty() {
                asm.ins(format!("DB {}", byte_list(s.as_bytes(), |b| format!("{}", b))));
            }
        }

        let slots: Vec<SmcSlot> = program
            .functions
            .iter()
            .filter(|f| f.uses_smc_convention())
            .flat_map(smc_slots)
            .collect();
        if !slots.is_empty() {
            asm.raw("");
            asm.comment("PATCH-TABLE: function, parameter, offset, size");
            for slot in &slots {
                asm.comment(format!(
                    "{} {} +{} {}",
                    slot.function, slot.param, slot.offset, slot.size
                ));
            }
            asm.label("PATCH_TABLE");
            for slot in &slots {
                asm.ins(format!("DW {}", slot.symbol));
                asm.ins(format!("DB {}", slot.size));
            }
            asm.ins("DW 0");
        }
        Ok(asm.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::backend::run;
    use crate::compiler::ir::{CallingConvention, IrParam, Symbol};

    fn add_smc() -> IrFunction {
        let mut f = IrFunction::new(Symbol::new("m", "add_smc", vec![]), Type::U8);
        let a = f.registers.alloc(Type::U8);
        let b = f.registers.alloc(Type::U16);
        f.params = vec![
            IrParam { name: "a".into(), reg: a },
            IrParam { name: "b".into(), reg: b },
        ];
        let t = f.registers.alloc(Type::U8);
        f.instructions = vec![
            IrInstruction::Convert(t, b),
            IrInstruction::Binary(BinOp::Add, t, t, Operand::Reg(a)),
            IrInstruction::Return(Some(t)),
        ];
        f.convention = CallingConvention::Smc;
        f
    }

    fn caller() -> IrFunction {
        let mut f = IrFunction::new(Symbol::new("m", "main", vec![]), Type::U8);
        let x = f.registers.alloc(Type::U8);
        let y = f.registers.alloc(Type::U16);
        let r = f.registers.alloc(Type::U8);
        f.instructions = vec![
            IrInstruction::Const(x, 3),
            IrInstruction::Const(y, 4),
            IrInstruction::Call(
                Some(r),
                Callee::Function(Symbol::new("m", "add_smc", vec![])),
                vec![x, y],
            ),
            IrInstruction::Return(Some(r)),
        ];
        f
    }

    #[test]
    fn test_smc_slots() {
        let slots = smc_slots(&add_smc());
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].symbol, "m_add_smc$a$imm");
        assert_eq!((slots[0].offset, slots[0].size), (1, 1));
        assert_eq!((slots[1].offset, slots[1].size), (6, 2));
    }

    #[test]
    fn test_smc_call_patches_immediates() {
        let mut p = IrProgram::new("m");
        p.functions = vec![add_smc(), caller()];
        let out = run(&Z80Emitter::new(), &p).unwrap().text;

        assert!(out.contains("m_add_smc$a$immOP:\n    LD A,0\n    LD (m_add_smc.r0),A\n"));
        assert!(out.contains("m_add_smc$a$imm EQU m_add_smc$a$immOP+1"));
        assert!(out.contains("    LD (m_add_smc$a$imm),A\n"));
        assert!(out.contains("    LD (m_add_smc$b$imm),HL\n    CALL m_add_smc\n"));
        assert!(out.contains("PATCH_TABLE:\n    DW m_add_smc$a$imm\n    DB 1\n"));
        // Stack-convention caller builds an IX frame.
        assert!(out.contains("m_main:\n    PUSH IX\n"));
    }

    #[test]
    fn test_smc_self_recursion_rejected() {
        let mut f = add_smc();
        f.instructions.insert(
            0,
            IrInstruction::Call(
                None,
                Callee::Function(f.symbol.clone()),
                vec![f.params[0].reg, f.params[1].reg],
            ),
        );
        let p = IrProgram::new("m");
        let err = Z80Emitter::new().emit_function(&f, &p).unwrap_err();
        assert!(matches!(err, Error::ConventionConflict { .. }));
    }

    #[test]
    fn test_signed_compare_flips_sign_bits() {
        let mut f = IrFunction::new(Symbol::new("m", "neg", vec![]), Type::Bool);
        let x = f.registers.alloc(Type::I8);
        let c = f.registers.alloc(Type::Bool);
        f.params.push(IrParam { name: "x".into(), reg: x });
        f.instructions = vec![
            IrInstruction::Compare(CmpOp::Lt, c, x, Operand::Imm(0)),
            IrInstruction::Return(Some(c)),
        ];
        let p = IrProgram::new("m");
        let text = Z80Emitter::new().emit_function(&f, &p).unwrap();
        assert!(text.contains("    LD B,128\n    LD A,(IX+4)\n    XOR 80h\n    CP B\n"));
        assert!(text.contains("JR C,m_neg.L1"));
    }

    #[test]
    fn test_frame_range_checked() {
        let mut f = IrFunction::new(Symbol::new("m", "big", vec![]), Type::Void);
        for k in 0..70 {
            let r = f.registers.alloc(Type::U16);
            f.instructions.push(IrInstruction::Const(r, k));
        }
        f.instructions.push(IrInstruction::Return(None));
        let p = IrProgram::new("m");
        let err = Z80Emitter::new().emit_function(&f, &p).unwrap_err();
        assert!(matches!(err, Error::Emitter { .. }));
    }

    #[test]
    fn test_dead_registers_take_no_slot() {
        let mut f = IrFunction::new(Symbol::new("m", "lean", vec![]), Type::U8);
        // Arena entries the optimizer no longer references, one of them
        // wider than the Z80 can hold.
        for _ in 0..70 {
            f.registers.alloc(Type::U16);
        }
        f.registers.alloc(Type::U32);
        let x = f.registers.alloc(Type::U8);
        f.instructions = vec![IrInstruction::Const(x, 5), IrInstruction::Return(Some(x))];
        let p = IrProgram::new("m");
        let text = Z80Emitter::new().emit_function(&f, &p).unwrap();
        assert!(text.contains("LD (IX-1),A"));
        assert!(!text.contains("IX-2"));
    }
}
