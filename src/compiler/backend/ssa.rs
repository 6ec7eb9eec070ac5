//! LLVM-style SSA text emitter
//!
//! Every virtual register gets one `alloca` slot in the entry block; each IR
//! instruction loads its operands into fresh SSA temporaries, computes, and
//! stores the result back. Basic blocks are opened at labels and after every
//! terminator so the text stays well formed.

use super::{runtime_used, Emitter};
use crate::compiler::ir::{
    BinOp, Callee, CmpOp, IrFunction, IrInstruction, IrProgram, IrReg, Operand, RuntimeFn,
    StringPool, UnOp,
};
use crate::compiler::target::Target;
use crate::compiler::types::Type;
use crate::{Error, Result};
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct SsaEmitter;

impl SsaEmitter {
    pub fn new() -> Self {
        Self
    }
}

/// SSA spelling of a scalar IR type
pub fn ssa_type(ty: &Type) -> String {
    match ty {
        Type::Bool => "i1".into(),
        Type::Pointer(_) => "ptr".into(),
        Type::String => "%String".into(),
        Type::Array(elem, len) => format!("[{} x {}]", len, ssa_type(elem)),
        Type::Void => "void".into(),
        other => format!("i{}", other.bits()),
    }
}

fn symbol(name: &str) -> String {
    format!("@\"{}\"", name)
}

/// Constant spelled as a signed value of the type's width
fn constant(ty: &Type, k: i64) -> String {
    match ty {
        Type::Bool => (if k != 0 { "true" } else { "false" }).into(),
        Type::Pointer(_) => "null".into(),
        _ => {
            let bits = ty.bits();
            let low = k & ((1i64 << bits) - 1);
            let signed = if low & (1i64 << (bits - 1)) != 0 {
                low - (1i64 << bits)
            } else {
                low
            };
            signed.to_string()
        }
    }
}

const RUNTIME_FORMATS: &str = r#"@fmt.u = private constant [3 x i8] c"%u\00"
@fmt.d = private constant [3 x i8] c"%d\00"
@fmt.s = private constant [5 x i8] c"%.*s\00"
"#;

/// libc entry point a runtime helper's fallback body calls
fn libc_decl(rt: RuntimeFn) -> &'static str {
    match rt {
        RuntimeFn::PrintChar | RuntimeFn::PrintNewline => "declare i32 @putchar(i32)",
        _ => "declare i32 @printf(ptr, ...)",
    }
}

fn print_int(ty: &str, ext: &str, fmt: &str) -> String {
    format!(
        "  %w = {} {} %v to i32\n  call i32 (ptr, ...) @printf(ptr @{}, i32 %w)\n",
        ext, ty, fmt
    )
}

/// Fallback definition of a runtime helper over libc. Weak, so a runtime
/// linked alongside the module takes precedence.
fn runtime_def(rt: RuntimeFn) -> String {
    let params: Vec<String> = rt
        .params()
        .iter()
        .map(|ty| format!("{} %v", ssa_type(ty)))
        .collect();
    let body = match rt {
        RuntimeFn::PrintChar => "  %w = zext i8 %v to i32\n  call i32 @putchar(i32 %w)\n".to_string(),
        RuntimeFn::PrintU8 => print_int("i8", "zext", "fmt.u"),
        RuntimeFn::PrintU16 => print_int("i16", "zext", "fmt.u"),
        RuntimeFn::PrintU24 => print_int("i24", "zext", "fmt.u"),
        RuntimeFn::PrintI8 => print_int("i8", "sext", "fmt.d"),
        RuntimeFn::PrintI16 => print_int("i16", "sext", "fmt.d"),
        RuntimeFn::PrintNewline => "  call i32 @putchar(i32 10)\n".to_string(),
        RuntimeFn::PrintString => concat!(
            "  %len = load i16, ptr %v\n",
            "  %n = zext i16 %len to i32\n",
            "  %field = getelementptr %String, ptr %v, i32 0, i32 1\n",
            "  %data = load ptr, ptr %field\n",
            "  call i32 (ptr, ...) @printf(ptr @fmt.s, i32 %n, ptr %data)\n",
        )
        .to_string(),
    };
    format!(
        "define weak void @{}({}) {{\nentry:\n{}  ret void\n}}\n",
        rt.name(),
        params.join(", "),
        body
    )
}

/// Per-function emission state
struct FunctionWriter<'a> {
    func: &'a IrFunction,
    program: &'a IrProgram,
    out: String,
    temp: usize,
    block: usize,
    open: bool,
}

impl<'a> FunctionWriter<'a> {
    fn new(func: &'a IrFunction, program: &'a IrProgram) -> Self {
        Self {
            func,
            program,
            out: String::new(),
            temp: 0,
            block: 0,
            open: true,
        }
    }

    fn fresh(&mut self) -> String {
        self.temp += 1;
        format!("%t{}", self.temp)
    }

    fn line(&mut self, text: impl AsRef<str>) {
        self.out.push_str(&format!("  {}\n", text.as_ref()));
    }

    fn ty(&self, r: IrReg) -> &'a Type {
        self.func.reg_type(r)
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Error::emitter(self.func.name(), Target::PortableSsa.id(), msg)
    }

    /// Load a register into a fresh temporary
    fn load(&mut self, r: IrReg) -> String {
        let t = self.fresh();
        let ty = ssa_type(self.ty(r));
        self.line(format!("{} = load {}, ptr %r{}", t, ty, r.0));
        t
    }

    fn store(&mut self, r: IrReg, value: &str) {
        let ty = ssa_type(self.ty(r));
        self.line(format!("store {} {}, ptr %r{}", ty, value, r.0));
    }

    /// Operand value in the type `ty`
    fn operand(&mut self, op: Operand, ty: &Type) -> String {
        match op {
            Operand::Reg(r) => self.load(r),
            Operand::Imm(k) => constant(ty, k),
        }
    }

    /// Resize an integer value between widths
    fn resize(&mut self, value: &str, from: &Type, to_bits: u32, signed: bool) -> String {
        let from_bits = if *from == Type::Bool { 1 } else { from.bits() };
        if from_bits == to_bits {
            return value.to_string();
        }
        let t = self.fresh();
        let op = if to_bits < from_bits {
            "trunc"
        } else if signed {
            "sext"
        } else {
            "zext"
        };
        self.line(format!("{} = {} i{} {} to i{}", t, op, from_bits, value, to_bits));
        t
    }

    /// Open a new block if the previous one was terminated
    fn ensure_block(&mut self) {
        if !self.open {
            self.block += 1;
            self.out.push_str(&format!("b{}:\n", self.block));
            self.open = true;
        }
    }

    fn terminate(&mut self, text: impl AsRef<str>) {
        self.line(text);
        self.open = false;
    }

    fn shift_count(&mut self, op: Operand, count_ty: &Type, lhs: &Type) -> String {
        let bits = lhs.bits();
        match op {
            Operand::Imm(k) => {
                let n = if bits == 24 {
                    (k as u32) % 24
                } else {
                    (k & i64::from(bits - 1)) as u32
                };
                n.to_string()
            }
            Operand::Reg(r) => {
                let c = self.load(r);
                let c32 = self.resize(&c, count_ty, 32, count_ty.is_signed());
                let m = self.fresh();
                if bits == 24 {
                    self.line(format!("{} = urem i32 {}, 24", m, c32));
                } else {
                    self.line(format!("{} = and i32 {}, {}", m, c32, bits - 1));
                }
                self.resize(&m, &Type::U32, bits, false)
            }
        }
    }

    fn binary(&mut self, op: BinOp, d: IrReg, a: IrReg, b: Operand) {
        let ty = self.ty(d);
        let t = ssa_type(ty);
        let lhs = self.load(a);
        let shift = ty.fixed_shift();
        let signed = ty.is_signed();

        if shift > 0 && matches!(op, BinOp::Mul | BinOp::Div) {
            let rhs = self.operand(b, ty);
            let wa = self.resize(&lhs, ty, 64, signed);
            let wb = self.resize(&rhs, ty, 64, signed);
            let r = self.fresh();
            if op == BinOp::Mul {
                let p = self.fresh();
                self.line(format!("{} = mul i64 {}, {}", p, wa, wb));
                let sh = if signed { "ashr" } else { "lshr" };
                self.line(format!("{} = {} i64 {}, {}", r, sh, p, shift));
            } else {
                let s = self.fresh();
                self.line(format!("{} = shl i64 {}, {}", s, wa, shift));
                let div = if signed { "sdiv" } else { "udiv" };
                self.line(format!("{} = {} i64 {}, {}", r, div, s, wb));
            }
            let out = self.fresh();
            self.line(format!("{} = trunc i64 {} to {}", out, r, t));
            self.store(d, &out);
            return;
        }

        let rhs = match (op, b) {
            (BinOp::Shl | BinOp::Shr, Operand::Reg(r)) => {
                let count_ty = self.ty(r);
                self.shift_count(b, count_ty, ty)
            }
            (BinOp::Shl | BinOp::Shr, Operand::Imm(_)) => self.shift_count(b, ty, ty),
            _ => self.operand(b, ty),
        };
        let inst = match op {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div if signed => "sdiv",
            BinOp::Div => "udiv",
            BinOp::Rem if signed => "srem",
            BinOp::Rem => "urem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::Shr if signed => "ashr",
            BinOp::Shr => "lshr",
        };
        let r = self.fresh();
        self.line(format!("{} = {} {} {}, {}", r, inst, t, lhs, rhs));
        self.store(d, &r);
    }

    fn compare(&mut self, op: CmpOp, d: IrReg, a: IrReg, b: Operand) {
        let ty = self.ty(a);
        let lhs = self.load(a);
        let rhs = self.operand(b, ty);
        let signed = ty.is_signed();
        let pred = match op {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt if signed => "slt",
            CmpOp::Le if signed => "sle",
            CmpOp::Gt if signed => "sgt",
            CmpOp::Ge if signed => "sge",
            CmpOp::Lt => "ult",
            CmpOp::Le => "ule",
            CmpOp::Gt => "ugt",
            CmpOp::Ge => "uge",
        };
        let r = self.fresh();
        self.line(format!("{} = icmp {} {} {}, {}", r, pred, ssa_type(ty), lhs, rhs));
        let dt = self.ty(d);
        let v = self.resize(&r, &Type::Bool, if *dt == Type::Bool { 1 } else { dt.bits() }, false);
        self.store(d, &v);
    }

    fn convert(&mut self, d: IrReg, s: IrReg) {
        let (from, to) = (self.ty(s), self.ty(d));
        let v = self.load(s);
        if *to == Type::Bool {
            let r = self.fresh();
            let zero = constant(from, 0);
            self.line(format!("{} = icmp ne {} {}, {}", r, ssa_type(from), v, zero));
            self.store(d, &r);
            return;
        }
        if matches!(to, Type::Pointer(_)) {
            self.store(d, &v);
            return;
        }
        let signed = from.is_signed();
        let wide = self.resize(&v, from, 64, signed);
        let (sf, st) = (from.fixed_shift(), to.fixed_shift());
        let scaled = if st > sf {
            let r = self.fresh();
            self.line(format!("{} = shl i64 {}, {}", r, wide, st - sf));
            r
        } else if sf > st {
            let r = self.fresh();
            let sh = if signed { "ashr" } else { "lshr" };
            self.line(format!("{} = {} i64 {}, {}", r, sh, wide, sf - st));
            r
        } else {
            wide
        };
        let r = self.fresh();
        self.line(format!("{} = trunc i64 {} to {}", r, scaled, ssa_type(to)));
        self.store(d, &r);
    }

    /// Address of element `idx` of the array based at `base`
    fn element(&mut self, base: IrReg, idx: IrReg) -> Result<String> {
        let elem = self
            .ty(base)
            .element()
            .cloned()
            .ok_or_else(|| self.error(format!("indexing non-pointer register {}", base)))?;
        let b = self.load(base);
        let i = self.load(idx);
        let idx_ty = self.ty(idx);
        let i64v = self.resize(&i, idx_ty, 64, idx_ty.is_signed());
        let p = self.fresh();
        self.line(format!(
            "{} = getelementptr {}, ptr {}, i64 {}",
            p,
            ssa_type(&elem),
            b,
            i64v
        ));
        Ok(p)
    }

    fn truthy(&mut self, c: IrReg) -> String {
        let v = self.load(c);
        let ty = self.ty(c);
        if *ty == Type::Bool {
            return v;
        }
        let r = self.fresh();
        self.line(format!("{} = icmp ne {} {}, 0", r, ssa_type(ty), v));
        r
    }

    fn instruction(&mut self, instr: &IrInstruction) -> Result<()> {
        if let IrInstruction::Label(name) = instr {
            if self.open {
                self.line(format!("br label %{}", name));
            }
            self.out.push_str(&format!("{}:\n", name));
            self.open = true;
            return Ok(());
        }
        if matches!(instr, IrInstruction::Nop) {
            return Ok(());
        }
        self.ensure_block();

        match instr {
            IrInstruction::Const(d, k) => {
                let v = constant(self.ty(*d), *k);
                self.store(*d, &v);
            }
            IrInstruction::LoadString(d, idx) => {
                self.store(*d, &format!("@{}", StringPool::label(*idx)));
            }
            IrInstruction::Move(d, s) => {
                let v = self.load(*s);
                self.store(*d, &v);
            }
            IrInstruction::Unary(op, d, s) => {
                let ty = self.ty(*d);
                let v = self.load(*s);
                let r = self.fresh();
                match op {
                    UnOp::Neg => self.line(format!("{} = sub {} 0, {}", r, ssa_type(ty), v)),
                    UnOp::Not if *ty == Type::Bool => {
                        self.line(format!("{} = xor i1 {}, true", r, v))
                    }
                    UnOp::Not => self.line(format!("{} = xor {} {}, -1", r, ssa_type(ty), v)),
                }
                self.store(*d, &r);
            }
            IrInstruction::Binary(op, d, a, b) => self.binary(*op, *d, *a, *b),
            IrInstruction::Compare(op, d, a, b) => self.compare(*op, *d, *a, *b),
            IrInstruction::Convert(d, s) => self.convert(*d, *s),
            IrInstruction::AddressOf(d, name) => {
                let global = self
                    .program
                    .global(name)
                    .ok_or_else(|| self.error(format!("unknown global '{}'", name)))?;
                let sym = symbol(&global.qualified());
                self.store(*d, &sym);
            }
            IrInstruction::Load(d, p) => {
                let ptr = self.load(*p);
                let r = self.fresh();
                let ty = ssa_type(self.ty(*d));
                self.line(format!("{} = load {}, ptr {}", r, ty, ptr));
                self.store(*d, &r);
            }
            IrInstruction::Store(p, s) => {
                let ptr = self.load(*p);
                let v = self.load(*s);
                let ty = ssa_type(self.ty(*s));
                self.line(format!("store {} {}, ptr {}", ty, v, ptr));
            }
            IrInstruction::Index(d, b, i) => {
                let p = self.element(*b, *i)?;
                let r = self.fresh();
                let ty = ssa_type(self.ty(*d));
                self.line(format!("{} = load {}, ptr {}", r, ty, p));
                self.store(*d, &r);
            }
            IrInstruction::IndexStore(b, i, s) => {
                let p = self.element(*b, *i)?;
                let v = self.load(*s);
                let ty = ssa_type(self.ty(*s));
                self.line(format!("store {} {}, ptr {}", ty, v, p));
            }
            IrInstruction::Jump(l) => self.terminate(format!("br label %{}", l)),
            IrInstruction::JumpIf(c, l) | IrInstruction::JumpIfNot(c, l) => {
                let cond = self.truthy(*c);
                let next = format!("b{}", self.block + 1);
                let text = if matches!(instr, IrInstruction::JumpIf(..)) {
                    format!("br i1 {}, label %{}, label %{}", cond, l, next)
                } else {
                    format!("br i1 {}, label %{}, label %{}", cond, next, l)
                };
                self.terminate(text);
                self.ensure_block();
            }
            IrInstruction::Call(dst, callee, args) => {
                let mut rendered = Vec::with_capacity(args.len());
                for a in args {
                    let v = self.load(*a);
                    rendered.push(format!("{} {}", ssa_type(self.ty(*a)), v));
                }
                let (name, ret) = match callee {
                    Callee::Function(sym) => {
                        let target = self.program.function(sym).ok_or_else(|| {
                            self.error(format!("call to unknown function '{}'", sym))
                        })?;
                        (symbol(&sym.qualified()), ssa_type(&target.return_type))
                    }
                    Callee::Runtime(rt) => (format!("@{}", rt.name()), "void".to_string()),
                };
                match dst {
                    Some(d) => {
                        let r = self.fresh();
                        self.line(format!("{} = call {} {}({})", r, ret, name, rendered.join(", ")));
                        self.store(*d, &r);
                    }
                    None => self.line(format!("call {} {}({})", ret, name, rendered.join(", "))),
                }
            }
            IrInstruction::Return(Some(r)) => {
                let v = self.load(*r);
                let ty = ssa_type(self.ty(*r));
                self.terminate(format!("ret {} {}", ty, v));
            }
            IrInstruction::Return(None) => self.terminate("ret void"),
            IrInstruction::Label(_) | IrInstruction::Nop => {}
        }
        Ok(())
    }

    fn finish(mut self) -> Result<String> {
        let func = self.func;
        let params: Vec<String> = func
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{} %p{}", ssa_type(func.reg_type(p.reg)), i))
            .collect();
        let mut text = String::new();
        text.push_str(&format!(
            "define {} {}({}) {{\n",
            ssa_type(&func.return_type),
            symbol(&func.name()),
            params.join(", "),
        ));
        text.push_str("entry:\n");
        for r in func.live_registers() {
            text.push_str(&format!("  %r{} = alloca {}\n", r.0, ssa_type(func.reg_type(r))));
        }
        for (i, p) in func.params.iter().enumerate() {
            text.push_str(&format!(
                "  store {} %p{}, ptr %r{}\n",
                ssa_type(func.reg_type(p.reg)),
                i,
                p.reg.0,
            ));
        }

        for instr in &func.instructions {
            self.instruction(instr)?;
        }
        if self.open {
            self.line("unreachable");
        }
        text.push_str(&self.out);
        text.push_str("}\n\n");
        Ok(text)
    }
}

fn escape_bytes(s: &str) -> String {
    let mut out = String::new();
    for b in s.bytes() {
        if (0x20..0x7F).contains(&b) && b != b'"' && b != b'\\' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("\\{:02X}", b));
        }
    }
    out
}

fn zero_init(ty: &Type) -> String {
    match ty {
        Type::Array(..) => "zeroinitializer".into(),
        Type::Pointer(_) => "null".into(),
        _ => "0".into(),
    }
}

impl Emitter for SsaEmitter {
    fn target(&self) -> Target {
        Target::PortableSsa
    }

    fn emit_header(&self, program: &IrProgram) -> Result<String> {
        let mut out = String::new();
        out.push_str(&format!("; retroc: module {}\n", program.module));
        out.push_str("%String = type { i16, ptr }\n");
        out.push('\n');
        for (i, s) in program.strings.iter() {
            let label = StringPool::label(i);
            out.push_str(&format!(
                "@{}.data = private constant [{} x i8] c\"{}\"\n",
                label,
                s.len(),
                escape_bytes(s),
            ));
            out.push_str(&format!(
                "@{} = internal global %String {{ i16 {}, ptr @{}.data }}\n",
                label,
                s.len(),
                label,
            ));
        }
        for g in &program.globals {
            let init = match (&g.ty, g.init) {
                (Type::Array(..), _) | (Type::Pointer(_), _) | (_, None) => zero_init(&g.ty),
                (ty, Some(v)) => constant(ty, v),
            };
            out.push_str(&format!(
                "{} = internal global {} {}\n",
                symbol(&g.qualified()),
                ssa_type(&g.ty),
                init,
            ));
        }
        out.push('\n');
        Ok(out)
    }

    fn emit_function(&self, func: &IrFunction, program: &IrProgram) -> Result<String> {
        FunctionWriter::new(func, program).finish()
    }

    fn emit_footer(&self, program: &IrProgram) -> Result<String> {
        let mut out = String::new();
        let used = runtime_used(program);
        if !used.is_empty() {
            out.push_str(RUNTIME_FORMATS);
            let externs: BTreeSet<&str> = used.iter().map(|rt| libc_decl(*rt)).collect();
            for decl in externs {
                out.push_str(decl);
                out.push('\n');
            }
            out.push('\n');
            for rt in used {
                out.push_str(&runtime_def(rt));
                out.push('\n');
            }
        }

        let entry = program
            .function_by_name("main")
            .filter(|f| f.params.is_empty());
        if let Some(main) = entry {
            out.push_str("define i32 @main() {\nentry:\n");
            out.push_str(&format!(
                "  call {} {}()\n",
                ssa_type(&main.return_type),
                symbol(&main.name())
            ));
            out.push_str("  ret i32 0\n}\n");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{IrParam, Symbol};

    fn countdown() -> IrProgram {
        let mut f = IrFunction::new(Symbol::new("m", "down", vec![Type::U8]), Type::U8);
        let n = f.registers.alloc(Type::U8);
        f.params.push(IrParam {
            name: "n".into(),
            reg: n,
        });
        let c = f.registers.alloc(Type::Bool);
        f.instructions = vec![
            IrInstruction::Label("tail_loop".into()),
            IrInstruction::Compare(CmpOp::Eq, c, n, Operand::Imm(0)),
            IrInstruction::JumpIf(c, "done".into()),
            IrInstruction::Binary(BinOp::Sub, n, n, Operand::Imm(1)),
            IrInstruction::Jump("tail_loop".into()),
            IrInstruction::Label("done".into()),
            IrInstruction::Return(Some(n)),
        ];
        let mut p = IrProgram::new("m");
        p.functions.push(f);
        p
    }

    #[test]
    fn test_blocks_are_well_formed() {
        let p = countdown();
        let text = SsaEmitter::new().emit_function(&p.functions[0], &p).unwrap();
        assert!(text.starts_with("define i8 @\"m_down$u8\"(i8 %p0) {\nentry:\n"));
        assert!(text.contains("  %r0 = alloca i8\n"));
        assert!(text.contains("  %r1 = alloca i1\n"));
        // Falling into a label closes the entry block explicitly.
        assert!(text.contains("  br label %tail_loop\ntail_loop:\n"));
        assert!(text.contains("label %done, label %b1\nb1:\n"));
        assert!(text.contains("icmp eq i8"));
        assert!(!text.contains("unreachable"));
    }

    #[test]
    fn test_signed_constants_and_strings() {
        assert_eq!(constant(&Type::U8, 200), "-56");
        assert_eq!(constant(&Type::U24, 0xFFFFFF), "-1");
        assert_eq!(constant(&Type::Bool, 1), "true");

        let mut p = IrProgram::new("m");
        p.strings.intern("hi\n");
        let header = SsaEmitter::new().emit_header(&p).unwrap();
        assert!(header.contains("@str_0.data = private constant [3 x i8] c\"hi\\0A\""));
        assert!(header.contains("@str_0 = internal global %String { i16 3, ptr @str_0.data }"));
    }

    #[test]
    fn test_runtime_defined_once() {
        let mut p = countdown();
        let mut main = IrFunction::new(Symbol::new("m", "main", vec![]), Type::Void);
        let x = main.registers.alloc(Type::U8);
        main.instructions = vec![
            IrInstruction::Const(x, 7),
            IrInstruction::Call(None, Callee::Runtime(RuntimeFn::PrintU8), vec![x]),
            IrInstruction::Call(None, Callee::Runtime(RuntimeFn::PrintU8), vec![x]),
            IrInstruction::Call(None, Callee::Runtime(RuntimeFn::PrintI8), vec![x]),
            IrInstruction::Call(None, Callee::Runtime(RuntimeFn::PrintNewline), vec![]),
            IrInstruction::Return(None),
        ];
        p.functions.push(main);

        let text = crate::compiler::backend::run(&SsaEmitter::new(), &p).unwrap().text;
        let count = |needle: &str| text.matches(needle).count();
        assert_eq!(count("declare i32 @printf(ptr, ...)"), 1);
        assert_eq!(count("declare i32 @putchar(i32)"), 1);
        assert_eq!(count("define weak void @print_u8(i8 %v)"), 1);
        assert_eq!(count("define weak void @print_i8(i8 %v)"), 1);
        assert_eq!(count("@print_u16"), 0);
        assert_eq!(count("declare void"), 0);
        assert!(text.contains("define i32 @main() {\nentry:\n  call void @\"m_main\"()\n  ret i32 0\n}\n"));
    }
}
