//! C99 reference emitter
//!
//! Used as the semantic oracle: every other backend must agree with the
//! output of this one compiled by a host C compiler. Virtual registers become
//! function locals, labels become `goto` targets, and every arithmetic result
//! is explicitly wrapped to its IR type so host integer promotion never leaks
//! through.

use super::Emitter;
use crate::compiler::ir::{
    BinOp, Callee, CmpOp, IrFunction, IrInstruction, IrProgram, IrReg, Operand, StringPool,
    UnOp,
};
use crate::compiler::target::Target;
use crate::compiler::types::Type;
use crate::{Error, Result};

const PRELUDE: &str = r#"#include <stdint.h>
#include <stdbool.h>
#include <stdio.h>

typedef struct { uint16_t len; const char *data; } String;

static inline uint32_t norm_u24(uint32_t v) { return v & 0xFFFFFFu; }
static inline int32_t norm_i24(int32_t v) { return (int32_t)((uint32_t)v << 8) >> 8; }
"#;

const RUNTIME: &str = r#"#ifndef RETROC_NO_RUNTIME
static void print_char(uint8_t c) { putchar(c); }
static void print_u8(uint8_t v) { printf("%u", (unsigned)v); }
static void print_u16(uint16_t v) { printf("%u", (unsigned)v); }
static void print_u24(uint32_t v) { printf("%lu", (unsigned long)v); }
static void print_i8(int8_t v) { printf("%d", (int)v); }
static void print_i16(int16_t v) { printf("%d", (int)v); }
static void print_newline(void) { putchar('\n'); }
static void print_string(String *s) { fwrite(s->data, 1, s->len, stdout); }
#else
void print_char(uint8_t c);
void print_u8(uint8_t v);
void print_u16(uint16_t v);
void print_u24(uint32_t v);
void print_i8(int8_t v);
void print_i16(int16_t v);
void print_newline(void);
void print_string(String *s);
#endif
"#;

#[derive(Debug, Default)]
pub struct CEmitter;

impl CEmitter {
    pub fn new() -> Self {
        Self
    }
}

/// C spelling of an IR type
pub fn c_type(ty: &Type) -> String {
    match ty {
        Type::U8 => "uint8_t".into(),
        Type::U16 => "uint16_t".into(),
        Type::U24 | Type::U32 => "uint32_t".into(),
        Type::I8 => "int8_t".into(),
        Type::I16 => "int16_t".into(),
        Type::I24 | Type::I32 => "int32_t".into(),
        Type::Fixed(kind) => match (kind.bits(), kind.is_signed()) {
            (8, false) => "uint8_t".into(),
            (16, false) => "uint16_t".into(),
            (16, true) => "int16_t".into(),
            _ => "int32_t".into(),
        },
        Type::Bool => "bool".into(),
        Type::String => "String".into(),
        Type::Pointer(inner) => match inner.as_ref() {
            Type::Array(elem, _) => format!("{}*", c_type(elem)),
            other => format!("{}*", c_type(other)),
        },
        Type::Array(elem, _) => format!("{}*", c_type(elem)),
        Type::Void => "void".into(),
    }
}

/// Global identifier: `Module.name` is not a C identifier
fn global_name(qualified: &str) -> String {
    qualified.replace('.', "_")
}

/// Bring `expr` (computed in 32-bit host arithmetic) back into `ty`'s range
fn wrap(ty: &Type, expr: &str) -> String {
    match ty {
        Type::U24 => format!("norm_u24((uint32_t)({}))", expr),
        Type::I24 => format!("norm_i24((int32_t)({}))", expr),
        Type::Fixed(kind) if kind.bits() == 24 => format!("norm_i24((int32_t)({}))", expr),
        other => format!("({})({})", c_type(other), expr),
    }
}

/// Width-appropriate host type for intermediate arithmetic
fn wide(ty: &Type) -> &'static str {
    if ty.is_signed() {
        "int32_t"
    } else {
        "uint32_t"
    }
}

fn reg(r: IrReg) -> String {
    format!("r{}", r.0)
}

fn operand(op: Operand) -> String {
    match op {
        Operand::Reg(r) => reg(r),
        Operand::Imm(k) => format!("({})", k),
    }
}

/// Shift count reduced modulo the operand width
fn shift_count(ty: &Type, count: &str) -> String {
    match ty.bits() {
        24 => format!("((uint32_t){} % 24u)", count),
        bits => format!("((uint32_t){} & {}u)", count, bits - 1),
    }
}

fn binary(op: BinOp, ty: &Type, a: &str, b: &str) -> String {
    let shift = ty.fixed_shift();
    let w = wide(ty);
    let expr = match op {
        BinOp::Mul if shift > 0 => format!("((int64_t){} * (int64_t){}) >> {}", a, b, shift),
        BinOp::Div if shift > 0 => {
            format!("((int64_t){} * (INT64_C(1) << {})) / (int64_t){}", a, shift, b)
        }
        BinOp::Add => format!("(uint32_t){} + (uint32_t){}", a, b),
        BinOp::Sub => format!("(uint32_t){} - (uint32_t){}", a, b),
        BinOp::Mul => format!("(uint32_t){} * (uint32_t){}", a, b),
        BinOp::Div => format!("({}){} / ({}){}", w, a, w, b),
        BinOp::Rem => format!("({}){} % ({}){}", w, a, w, b),
        BinOp::And => format!("(uint32_t){} & (uint32_t){}", a, b),
        BinOp::Or => format!("(uint32_t){} | (uint32_t){}", a, b),
        BinOp::Xor => format!("(uint32_t){} ^ (uint32_t){}", a, b),
        BinOp::Shl => format!("(uint32_t){} << {}", a, shift_count(ty, b)),
        BinOp::Shr => format!("({}){} >> {}", w, a, shift_count(ty, b)),
    };
    wrap(ty, &expr)
}

fn convert(from: &Type, to: &Type, src: &str) -> String {
    if *to == Type::Bool {
        return format!("({} != 0)", src);
    }
    if matches!(to, Type::Pointer(_)) || matches!(from, Type::Pointer(_)) {
        return format!("({}){}", c_type(to), src);
    }
    let (sf, st) = (from.fixed_shift(), to.fixed_shift());
    let w = wide(from);
    let expr = if st > sf {
        format!("(uint32_t)({}){} << {}", w, src, st - sf)
    } else if sf > st {
        format!("({}){} >> {}", w, src, sf - st)
    } else {
        format!("({}){}", w, src)
    };
    wrap(to, &expr)
}

fn constant(ty: &Type, k: i64) -> String {
    match ty {
        Type::Pointer(_) => format!("({})0", c_type(ty)),
        Type::Bool => (if k != 0 { "true" } else { "false" }).to_string(),
        _ => format!("({})({})", c_type(ty), ty.wrap(k)),
    }
}

fn c_string_literal(s: &str) -> String {
    let mut out = String::from("\"");
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(char::from(b)),
            other => {
                out.push_str(&format!("\\{:03o}", other));
            }
        }
    }
    out.push('"');
    out
}

fn signature(func: &IrFunction) -> String {
    let params: Vec<String> = func
        .params
        .iter()
        .map(|p| format!("{} {}", c_type(func.reg_type(p.reg)), reg(p.reg)))
        .collect();
    let params = if params.is_empty() {
        "void".to_string()
    } else {
        params.join(", ")
    };
    format!("{} {}({})", c_type(&func.return_type), func.name(), params)
}

impl CEmitter {
    fn instruction(
        &self,
        func: &IrFunction,
        program: &IrProgram,
        instr: &IrInstruction,
        out: &mut String,
    ) -> Result<()> {
        let ty = |r: IrReg| func.reg_type(r);
        let line = match instr {
            IrInstruction::Const(d, k) => format!("{} = {};", reg(*d), constant(ty(*d), *k)),
            IrInstruction::LoadString(d, idx) => {
                format!("{} = &{};", reg(*d), StringPool::label(*idx))
            }
            IrInstruction::Move(d, s) => format!("{} = {};", reg(*d), reg(*s)),
            IrInstruction::Unary(op, d, s) => {
                let t = ty(*d);
                let expr = match op {
                    UnOp::Not if *t == Type::Bool => format!("!{}", reg(*s)),
                    UnOp::Not => wrap(t, &format!("~(uint32_t){}", reg(*s))),
                    UnOp::Neg => wrap(t, &format!("0u - (uint32_t){}", reg(*s))),
                };
                format!("{} = {};", reg(*d), expr)
            }
            IrInstruction::Binary(op, d, a, b) => {
                format!("{} = {};", reg(*d), binary(*op, ty(*d), &reg(*a), &operand(*b)))
            }
            IrInstruction::Compare(op, d, a, b) => {
                let sym = match op {
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                };
                format!("{} = ({} {} {});", reg(*d), reg(*a), sym, operand(*b))
            }
            IrInstruction::Convert(d, s) => {
                format!("{} = {};", reg(*d), convert(ty(*s), ty(*d), &reg(*s)))
            }
            IrInstruction::AddressOf(d, name) => {
                let global = program.global(name).ok_or_else(|| {
                    Error::emitter(func.name(), Target::C99.id(), format!("unknown global '{}'", name))
                })?;
                let cname = global_name(&global.qualified());
                match &global.ty {
                    Type::Array(..) => format!("{} = {};", reg(*d), cname),
                    _ => format!("{} = &{};", reg(*d), cname),
                }
            }
            IrInstruction::Load(d, p) => format!("{} = *{};", reg(*d), reg(*p)),
            IrInstruction::Store(p, s) => format!("*{} = {};", reg(*p), reg(*s)),
            IrInstruction::Index(d, b, i) => format!("{} = {}[{}];", reg(*d), reg(*b), reg(*i)),
            IrInstruction::IndexStore(b, i, s) => {
                format!("{}[{}] = {};", reg(*b), reg(*i), reg(*s))
            }
            IrInstruction::Label(name) => {
                out.push_str(&format!("{}:;\n", name));
                return Ok(());
            }
            IrInstruction::Jump(l) => format!("goto {};", l),
            IrInstruction::JumpIf(c, l) => format!("if ({}) goto {};", reg(*c), l),
            IrInstruction::JumpIfNot(c, l) => format!("if (!{}) goto {};", reg(*c), l),
            IrInstruction::Call(dst, callee, args) => {
                let name = match callee {
                    Callee::Function(sym) => sym.qualified(),
                    Callee::Runtime(rt) => rt.name().to_string(),
                };
                let args: Vec<String> = args.iter().map(|a| reg(*a)).collect();
                match dst {
                    Some(d) => format!("{} = {}({});", reg(*d), name, args.join(", ")),
                    None => format!("{}({});", name, args.join(", ")),
                }
            }
            IrInstruction::Return(Some(r)) => format!("return {};", reg(*r)),
            IrInstruction::Return(None) => "return;".to_string(),
            IrInstruction::Nop => return Ok(()),
        };
        out.push_str(&format!("    {}\n", line));
        Ok(())
    }
}

impl Emitter for CEmitter {
    fn target(&self) -> Target {
        Target::C99
    }

    fn emit_header(&self, program: &IrProgram) -> Result<String> {
        let mut out = String::new();
        out.push_str(&format!("/* retroc: module {} */\n", program.module));
        out.push_str(PRELUDE);
        out.push('\n');
        out.push_str(RUNTIME);
        out.push('\n');

        for (i, s) in program.strings.iter() {
            out.push_str(&format!(
                "static String {} = {{ {}, {} }};\n",
                StringPool::label(i),
                s.len(),
                c_string_literal(s),
            ));
        }
        for g in &program.globals {
            let name = global_name(&g.qualified());
            match &g.ty {
                Type::Array(elem, len) => {
                    out.push_str(&format!("static {} {}[{}];\n", c_type(elem), name, len));
                }
                ty => {
                    let init = g.init.map(|v| ty.wrap(v)).unwrap_or(0);
                    out.push_str(&format!("static {} {} = {};\n", c_type(ty), name, init));
                }
            }
        }
        out.push('\n');
        for func in &program.functions {
            out.push_str(&format!("{};\n", signature(func)));
        }
        out.push('\n');
        Ok(out)
    }

    fn emit_function(&self, func: &IrFunction, program: &IrProgram) -> Result<String> {
        let mut out = String::new();
        out.push_str(&format!("{} {{\n", signature(func)));
        for (r, t) in func.registers.iter() {
            if !func.is_param(r) {
                out.push_str(&format!("    {} {};\n", c_type(t), reg(r)));
            }
        }
        for instr in &func.instructions {
            self.instruction(func, program, instr, &mut out)?;
        }
        out.push_str("}\n\n");
        Ok(out)
    }

    fn emit_footer(&self, program: &IrProgram) -> Result<String> {
        let mut out = String::new();
        let entry = program
            .function_by_name("main")
            .filter(|f| f.params.is_empty());
        if let Some(main) = entry {
            out.push_str("#ifndef RETROC_NO_MAIN\n");
            out.push_str("int main(void) {\n");
            out.push_str(&format!("    {}();\n", main.name()));
            out.push_str("    return 0;\n");
            out.push_str("}\n");
            out.push_str("#endif\n");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::backend::run;
    use crate::compiler::ir::{GlobalVariable, IrParam, Symbol};
    use crate::compiler::types::FixedKind;

    #[test]
    fn test_wrapped_arithmetic() {
        assert_eq!(
            binary(BinOp::Add, &Type::U8, "r0", "r1"),
            "(uint8_t)((uint32_t)r0 + (uint32_t)r1)"
        );
        assert_eq!(
            binary(BinOp::Shl, &Type::U24, "r0", "r1"),
            "norm_u24((uint32_t)((uint32_t)r0 << ((uint32_t)r1 % 24u)))"
        );
        assert_eq!(
            binary(BinOp::Mul, &Type::Fixed(FixedKind::F8_8), "r0", "r1"),
            "(int16_t)(((int64_t)r0 * (int64_t)r1) >> 8)"
        );
        assert_eq!(convert(&Type::U16, &Type::Bool, "r3"), "(r3 != 0)");
    }

    #[test]
    fn test_function_and_globals() {
        let mut p = IrProgram::new("m");
        p.globals.push(GlobalVariable {
            module: "m".into(),
            name: "count".into(),
            ty: Type::U16,
            init: Some(7),
        });
        let mut f = IrFunction::new(Symbol::new("m", "main", vec![]), Type::U16);
        let a = f.registers.alloc(Type::ptr(Type::U16));
        let v = f.registers.alloc(Type::U16);
        f.instructions = vec![
            IrInstruction::AddressOf(a, "count".into()),
            IrInstruction::Load(v, a),
            IrInstruction::Return(Some(v)),
        ];
        p.functions.push(f);

        let out = run(&CEmitter::new(), &p).unwrap();
        assert!(out.text.contains("static uint16_t m_count = 7;"));
        assert!(out.text.contains("uint16_t m_main(void);"));
        assert!(out.text.contains("    r0 = &m_count;"));
        assert!(out.text.contains("    m_main();"));
    }

    #[test]
    fn test_params_are_not_redeclared() {
        let mut f = IrFunction::new(Symbol::new("m", "id", vec![Type::U8]), Type::U8);
        let x = f.registers.alloc(Type::U8);
        f.params.push(IrParam {
            name: "x".into(),
            reg: x,
        });
        f.instructions = vec![IrInstruction::Return(Some(x))];
        let p = IrProgram::new("m");
        let text = CEmitter::new().emit_function(&f, &p).unwrap();
        assert!(text.starts_with("uint8_t m_id$u8(uint8_t r0) {\n"));
        assert!(!text.contains("uint8_t r0;"));
    }
}
