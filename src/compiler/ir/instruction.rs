//! IR instruction definitions

use crate::compiler::types::Type;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Virtual register (unbounded supply per function, typed by the function's
/// register table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrReg(pub u32);

impl IrReg {
    /// Creates a new virtual register with the given ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for IrReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Right-hand operand of binary and compare instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Reg(IrReg),
    /// Immediate, already wrapped to the left operand's type
    Imm(i64),
}

impl Operand {
    pub fn reg(self) -> Option<IrReg> {
        match self {
            Operand::Reg(r) => Some(r),
            Operand::Imm(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Imm(k) => write!(f, "#{}", k),
        }
    }
}

/// Arithmetic and bitwise operators (result has the operands' type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl BinOp {
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mul | BinOp::And | BinOp::Or | BinOp::Xor
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }
}

/// Comparison operators (result is `bool`; signedness follows the operands)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Operator with swapped operands: `a < b` == `b > a`
    pub fn mirror(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    /// Two's complement negation
    Neg,
    /// Bitwise complement; logical not on `bool`
    Not,
}

/// Runtime support routines the core only knows by signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeFn {
    PrintChar,
    PrintU8,
    PrintU16,
    PrintU24,
    PrintI8,
    PrintI16,
    PrintNewline,
    PrintString,
}

impl RuntimeFn {
    pub const ALL: [RuntimeFn; 8] = [
        RuntimeFn::PrintChar,
        RuntimeFn::PrintU8,
        RuntimeFn::PrintU16,
        RuntimeFn::PrintU24,
        RuntimeFn::PrintI8,
        RuntimeFn::PrintI16,
        RuntimeFn::PrintNewline,
        RuntimeFn::PrintString,
    ];

    /// Link-level symbol
    pub fn name(self) -> &'static str {
        match self {
            RuntimeFn::PrintChar => "print_char",
            RuntimeFn::PrintU8 => "print_u8",
            RuntimeFn::PrintU16 => "print_u16",
            RuntimeFn::PrintU24 => "print_u24",
            RuntimeFn::PrintI8 => "print_i8",
            RuntimeFn::PrintI16 => "print_i16",
            RuntimeFn::PrintNewline => "print_newline",
            RuntimeFn::PrintString => "print_string",
        }
    }

    /// Parameter types; every helper returns void
    pub fn params(self) -> Vec<Type> {
        match self {
            RuntimeFn::PrintChar | RuntimeFn::PrintU8 => vec![Type::U8],
            RuntimeFn::PrintU16 => vec![Type::U16],
            RuntimeFn::PrintU24 => vec![Type::U24],
            RuntimeFn::PrintI8 => vec![Type::I8],
            RuntimeFn::PrintI16 => vec![Type::I16],
            RuntimeFn::PrintNewline => vec![],
            RuntimeFn::PrintString => vec![Type::ptr(Type::String)],
        }
    }
}

/// Structured function symbol: base name plus the concrete type tuple of an
/// instantiation. Only serialized to the `$type` form at emission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    pub module: String,
    pub name: String,
    pub type_args: Vec<Type>,
}

impl Symbol {
    pub fn new(module: impl Into<String>, name: impl Into<String>, type_args: Vec<Type>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            type_args,
        }
    }

    /// `name$t1$t2`, unique within the module
    pub fn mangled(&self) -> String {
        let mut out = self.name.clone();
        for ty in &self.type_args {
            out.push('$');
            out.push_str(&ty.short_name());
        }
        out
    }

    /// `module_name$t1$t2`, the emitted symbol
    pub fn qualified(&self) -> String {
        format!("{}_{}", self.module, self.mangled())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// Call target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Callee {
    Function(Symbol),
    Runtime(RuntimeFn),
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Function(sym) => write!(f, "{}", sym),
            Callee::Runtime(rt) => write!(f, "{}", rt.name()),
        }
    }
}

/// IR instruction (three-address code)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrInstruction {
    // Constants
    /// Load immediate: dst = k
    Const(IrReg, i64),
    /// dst = address of pooled string `str_N`
    LoadString(IrReg, usize),

    // Register operations
    /// Move/copy register: dst = src
    Move(IrReg, IrReg),
    /// dst = op src
    Unary(UnOp, IrReg, IrReg),
    /// dst = lhs op rhs
    Binary(BinOp, IrReg, IrReg, Operand),
    /// dst = (lhs op rhs), dst is bool
    Compare(CmpOp, IrReg, IrReg, Operand),
    /// dst = src converted to dst's type (the only width-changing instruction)
    Convert(IrReg, IrReg),

    // Memory
    /// dst = address of module global
    AddressOf(IrReg, String),
    /// dst = *ptr
    Load(IrReg, IrReg),
    /// *ptr = src
    Store(IrReg, IrReg),
    /// dst = base[index]
    Index(IrReg, IrReg, IrReg),
    /// base[index] = src
    IndexStore(IrReg, IrReg, IrReg),

    // Control flow
    /// Define a jump target label
    Label(String),
    /// Unconditional jump to label
    Jump(String),
    /// Jump if register is non-zero
    JumpIf(IrReg, String),
    /// Jump if register is zero
    JumpIfNot(IrReg, String),
    /// Call function: dst = f(args...)
    Call(Option<IrReg>, Callee, Vec<IrReg>),
    /// Return from function
    Return(Option<IrReg>),

    /// No operation
    Nop,
}

impl IrInstruction {
    /// Register written by this instruction
    pub fn dest(&self) -> Option<IrReg> {
        match self {
            IrInstruction::Const(d, _)
            | IrInstruction::LoadString(d, _)
            | IrInstruction::Move(d, _)
            | IrInstruction::Unary(_, d, _)
            | IrInstruction::Binary(_, d, _, _)
            | IrInstruction::Compare(_, d, _, _)
            | IrInstruction::Convert(d, _)
            | IrInstruction::AddressOf(d, _)
            | IrInstruction::Load(d, _)
            | IrInstruction::Index(d, _, _) => Some(*d),
            IrInstruction::Call(d, _, _) => *d,
            _ => None,
        }
    }

    /// Mutable access to the written register
    pub fn dest_mut(&mut self) -> Option<&mut IrReg> {
        match self {
            IrInstruction::Const(d, _)
            | IrInstruction::LoadString(d, _)
            | IrInstruction::Move(d, _)
            | IrInstruction::Unary(_, d, _)
            | IrInstruction::Binary(_, d, _, _)
            | IrInstruction::Compare(_, d, _, _)
            | IrInstruction::Convert(d, _)
            | IrInstruction::AddressOf(d, _)
            | IrInstruction::Load(d, _)
            | IrInstruction::Index(d, _, _) => Some(d),
            IrInstruction::Call(d, _, _) => d.as_mut(),
            _ => None,
        }
    }

    /// Registers read by this instruction, in operand order
    pub fn uses(&self) -> Vec<IrReg> {
        match self {
            IrInstruction::Move(_, s)
            | IrInstruction::Unary(_, _, s)
            | IrInstruction::Convert(_, s)
            | IrInstruction::Load(_, s)
            | IrInstruction::JumpIf(s, _)
            | IrInstruction::JumpIfNot(s, _) => vec![*s],
            IrInstruction::Binary(_, _, l, r) | IrInstruction::Compare(_, _, l, r) => {
                let mut v = vec![*l];
                v.extend(r.reg());
                v
            }
            IrInstruction::Store(p, s) => vec![*p, *s],
            IrInstruction::Index(_, b, i) => vec![*b, *i],
            IrInstruction::IndexStore(b, i, s) => vec![*b, *i, *s],
            IrInstruction::Call(_, _, args) => args.clone(),
            IrInstruction::Return(r) => r.iter().copied().collect(),
            _ => vec![],
        }
    }

    /// Rewrite every read of a register
    pub fn map_uses(&mut self, mut f: impl FnMut(IrReg) -> IrReg) {
        match self {
            IrInstruction::Move(_, s)
            | IrInstruction::Unary(_, _, s)
            | IrInstruction::Convert(_, s)
            | IrInstruction::Load(_, s)
            | IrInstruction::JumpIf(s, _)
            | IrInstruction::JumpIfNot(s, _) => *s = f(*s),
            IrInstruction::Binary(_, _, l, r) | IrInstruction::Compare(_, _, l, r) => {
                *l = f(*l);
                if let Operand::Reg(r) = r {
                    *r = f(*r);
                }
            }
            IrInstruction::Store(p, s) => {
                *p = f(*p);
                *s = f(*s);
            }
            IrInstruction::Index(_, b, i) => {
                *b = f(*b);
                *i = f(*i);
            }
            IrInstruction::IndexStore(b, i, s) => {
                *b = f(*b);
                *i = f(*i);
                *s = f(*s);
            }
            IrInstruction::Call(_, _, args) => {
                for a in args.iter_mut() {
                    *a = f(*a);
                }
            }
            IrInstruction::Return(Some(r)) => *r = f(*r),
            _ => {}
        }
    }

    /// Rewrite every register, reads and writes alike
    pub fn map_regs(&mut self, mut f: impl FnMut(IrReg) -> IrReg) {
        self.map_uses(&mut f);
        if let Some(d) = self.dest_mut() {
            *d = f(*d);
        }
    }

    /// Label this instruction may transfer control to
    pub fn jump_target(&self) -> Option<&str> {
        match self {
            IrInstruction::Jump(l) | IrInstruction::JumpIf(_, l) | IrInstruction::JumpIfNot(_, l) => {
                Some(l)
            }
            _ => None,
        }
    }

    pub fn jump_target_mut(&mut self) -> Option<&mut String> {
        match self {
            IrInstruction::Jump(l) | IrInstruction::JumpIf(_, l) | IrInstruction::JumpIfNot(_, l) => {
                Some(l)
            }
            _ => None,
        }
    }

    /// Control never falls through to the next instruction
    pub fn is_terminator(&self) -> bool {
        matches!(self, IrInstruction::Jump(_) | IrInstruction::Return(_))
    }

    /// Straight-line instruction: no label, branch, call or return
    pub fn is_straight_line(&self) -> bool {
        !matches!(
            self,
            IrInstruction::Label(_)
                | IrInstruction::Jump(_)
                | IrInstruction::JumpIf(..)
                | IrInstruction::JumpIfNot(..)
                | IrInstruction::Call(..)
                | IrInstruction::Return(_)
        )
    }
}
