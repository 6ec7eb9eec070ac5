//! # Front-end interface
//!
//! Resolved, type-checked function bodies as handed over by the external
//! front end. Every identifier is already resolved and every expression
//! carries its static type; the IR builder makes no decisions of its own.
//!
//! The small constructor helpers at the bottom keep test fixtures and
//! front-end glue readable:
//!
//! ```ignore
//! let body = vec![ret(bin(BinOp::Add, local("a", Type::U8), local("b", Type::U8)))];
//! ```

use super::ir::{BinOp, CmpOp, ConventionRequest, RuntimeFn, UnOp};
use super::types::Type;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Position reported by the front end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Type as written in a (possibly generic) declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Concrete(Type),
    /// Index into the enclosing function's `type_params`
    Param(usize),
    Pointer(Box<TypeRef>),
    Array(Box<TypeRef>, u16),
}

impl TypeRef {
    /// Substitute generic parameters; `None` names the unbound index
    pub fn resolve(&self, args: &[Type]) -> std::result::Result<Type, usize> {
        Ok(match self {
            TypeRef::Concrete(t) => t.clone(),
            TypeRef::Param(i) => args.get(*i).cloned().ok_or(*i)?,
            TypeRef::Pointer(inner) => Type::ptr(inner.resolve(args)?),
            TypeRef::Array(elem, len) => Type::array(elem.resolve(args)?, *len),
        })
    }

    pub fn ptr(inner: impl Into<TypeRef>) -> TypeRef {
        TypeRef::Pointer(Box::new(inner.into()))
    }
}

impl From<Type> for TypeRef {
    fn from(t: Type) -> Self {
        TypeRef::Concrete(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// Call target as resolved by the front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Callee {
    /// Function of the same module; `type_args` non-empty for generic calls
    Function { name: String, type_args: Vec<TypeRef> },
    Runtime(RuntimeFn),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprKind {
    Int(i64),
    Bool(bool),
    /// String literal; evaluates to `*string`
    Str(String),
    Local(String),
    /// Scalar global read
    Global(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    /// Short-circuit `&&` / `||`
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    /// Explicit conversion to the expression's type
    Cast(Box<Expr>),
    Call(Callee, Vec<Expr>),
    /// `base[index]` where `base` is a pointer
    Index(Box<Expr>, Box<Expr>),
    Deref(Box<Expr>),
    /// Address of a module global
    AddressOf(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeRef,
    pub pos: SourcePos,
}

/// Assignment target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Place {
    Local(String),
    Global(String),
    Deref(Expr),
    Index(Expr, Expr),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt {
    Let {
        name: String,
        ty: TypeRef,
        init: Option<Expr>,
        pos: SourcePos,
    },
    Assign {
        target: Place,
        value: Expr,
        pos: SourcePos,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
        pos: SourcePos,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        pos: SourcePos,
    },
    /// `for var in start..end` (half-open, `end` evaluated once)
    For {
        var: String,
        ty: TypeRef,
        start: Expr,
        end: Expr,
        body: Vec<Stmt>,
        pos: SourcePos,
    },
    Return(Option<Expr>, SourcePos),
    /// No IR opcode exists for inline assembly
    InlineAsm { text: String, pos: SourcePos },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    /// Non-empty for generic templates
    pub type_params: Vec<String>,
    pub params: Vec<ParamDecl>,
    pub return_type: TypeRef,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub convention: ConventionRequest,
    #[serde(default)]
    pub pos: SourcePos,
}

impl FunctionDecl {
    pub fn new(
        name: impl Into<String>,
        params: Vec<(&str, TypeRef)>,
        return_type: impl Into<TypeRef>,
        body: Vec<Stmt>,
    ) -> Self {
        Self {
            name: name.into(),
            type_params: Vec::new(),
            params: params
                .into_iter()
                .map(|(n, ty)| ParamDecl {
                    name: n.to_string(),
                    ty,
                })
                .collect(),
            return_type: return_type.into(),
            body,
            convention: ConventionRequest::Auto,
            pos: SourcePos::default(),
        }
    }

    pub fn generic(mut self, type_params: &[&str]) -> Self {
        self.type_params = type_params.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_convention(mut self, convention: ConventionRequest) -> Self {
        self.convention = convention;
        self
    }

    pub fn is_template(&self) -> bool {
        !self.type_params.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: Type,
    pub init: Option<i64>,
}

/// One compilation unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub globals: Vec<GlobalDecl>,
    pub functions: Vec<FunctionDecl>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            globals: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn with_function(mut self, f: FunctionDecl) -> Self {
        self.functions.push(f);
        self
    }

    pub fn with_global(mut self, name: &str, ty: Type, init: Option<i64>) -> Self {
        self.globals.push(GlobalDecl {
            name: name.to_string(),
            ty,
            init,
        });
        self
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Deserialize a module handed over as JSON by an out-of-process front end
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid module JSON: {}", e)))
    }

    /// Every string literal, in declaration order
    pub fn string_literals(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for f in &self.functions {
            for s in &f.body {
                collect_stmt_strings(s, &mut out);
            }
        }
        out
    }
}

fn collect_stmt_strings<'a>(stmt: &'a Stmt, out: &mut Vec<&'a str>) {
    match stmt {
        Stmt::Let { init, .. } => {
            if let Some(e) = init {
                collect_expr_strings(e, out);
            }
        }
        Stmt::Assign { target, value, .. } => {
            match target {
                Place::Deref(e) => collect_expr_strings(e, out),
                Place::Index(b, i) => {
                    collect_expr_strings(b, out);
                    collect_expr_strings(i, out);
                }
                Place::Local(_) | Place::Global(_) => {}
            }
            collect_expr_strings(value, out);
        }
        Stmt::Expr(e) => collect_expr_strings(e, out),
        Stmt::If {
            cond,
            then_body,
            else_body,
            ..
        } => {
            collect_expr_strings(cond, out);
            then_body.iter().for_each(|s| collect_stmt_strings(s, out));
            if let Some(body) = else_body {
                body.iter().for_each(|s| collect_stmt_strings(s, out));
            }
        }
        Stmt::While { cond, body, .. } => {
            collect_expr_strings(cond, out);
            body.iter().for_each(|s| collect_stmt_strings(s, out));
        }
        Stmt::For {
            start, end, body, ..
        } => {
            collect_expr_strings(start, out);
            collect_expr_strings(end, out);
            body.iter().for_each(|s| collect_stmt_strings(s, out));
        }
        Stmt::Return(Some(e), _) => collect_expr_strings(e, out),
        Stmt::Return(None, _) | Stmt::InlineAsm { .. } => {}
    }
}

fn collect_expr_strings<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match &expr.kind {
        ExprKind::Str(s) => out.push(s),
        ExprKind::Unary(_, e) | ExprKind::Cast(e) | ExprKind::Deref(e) => {
            collect_expr_strings(e, out)
        }
        ExprKind::Binary(_, a, b)
        | ExprKind::Compare(_, a, b)
        | ExprKind::Logical(_, a, b)
        | ExprKind::Index(a, b) => {
            collect_expr_strings(a, out);
            collect_expr_strings(b, out);
        }
        ExprKind::Call(_, args) => args.iter().for_each(|a| collect_expr_strings(a, out)),
        ExprKind::Int(_)
        | ExprKind::Bool(_)
        | ExprKind::Local(_)
        | ExprKind::Global(_)
        | ExprKind::AddressOf(_) => {}
    }
}

// =============================================================================
// CONSTRUCTION HELPERS
// =============================================================================

fn expr(kind: ExprKind, ty: impl Into<TypeRef>) -> Expr {
    Expr {
        kind,
        ty: ty.into(),
        pos: SourcePos::default(),
    }
}

impl Expr {
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.pos = SourcePos::new(line, column);
        self
    }
}

pub fn int(value: i64, ty: impl Into<TypeRef>) -> Expr {
    expr(ExprKind::Int(value), ty)
}

pub fn boolean(value: bool) -> Expr {
    expr(ExprKind::Bool(value), Type::Bool)
}

pub fn string(s: &str) -> Expr {
    expr(ExprKind::Str(s.to_string()), Type::ptr(Type::String))
}

pub fn local(name: &str, ty: impl Into<TypeRef>) -> Expr {
    expr(ExprKind::Local(name.to_string()), ty)
}

pub fn global(name: &str, ty: impl Into<TypeRef>) -> Expr {
    expr(ExprKind::Global(name.to_string()), ty)
}

pub fn address_of(name: &str, ty: impl Into<TypeRef>) -> Expr {
    expr(ExprKind::AddressOf(name.to_string()), ty)
}

/// Binary arithmetic; result type is the left operand's
pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    let ty = lhs.ty.clone();
    expr(ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)), ty)
}

pub fn cmp(op: CmpOp, lhs: Expr, rhs: Expr) -> Expr {
    expr(
        ExprKind::Compare(op, Box::new(lhs), Box::new(rhs)),
        Type::Bool,
    )
}

pub fn logical(op: LogicalOp, lhs: Expr, rhs: Expr) -> Expr {
    expr(
        ExprKind::Logical(op, Box::new(lhs), Box::new(rhs)),
        Type::Bool,
    )
}

pub fn unary(op: UnOp, operand: Expr) -> Expr {
    let ty = operand.ty.clone();
    expr(ExprKind::Unary(op, Box::new(operand)), ty)
}

pub fn cast(operand: Expr, ty: impl Into<TypeRef>) -> Expr {
    expr(ExprKind::Cast(Box::new(operand)), ty)
}

pub fn call(name: &str, args: Vec<Expr>, ret: impl Into<TypeRef>) -> Expr {
    expr(
        ExprKind::Call(
            Callee::Function {
                name: name.to_string(),
                type_args: Vec::new(),
            },
            args,
        ),
        ret,
    )
}

pub fn call_generic(
    name: &str,
    type_args: Vec<TypeRef>,
    args: Vec<Expr>,
    ret: impl Into<TypeRef>,
) -> Expr {
    expr(
        ExprKind::Call(
            Callee::Function {
                name: name.to_string(),
                type_args,
            },
            args,
        ),
        ret,
    )
}

pub fn runtime(f: RuntimeFn, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call(Callee::Runtime(f), args), Type::Void)
}

pub fn index(base: Expr, idx: Expr, elem: impl Into<TypeRef>) -> Expr {
    expr(ExprKind::Index(Box::new(base), Box::new(idx)), elem)
}

pub fn deref(ptr: Expr, ty: impl Into<TypeRef>) -> Expr {
    expr(ExprKind::Deref(Box::new(ptr)), ty)
}

pub fn let_(name: &str, ty: impl Into<TypeRef>, init: Expr) -> Stmt {
    Stmt::Let {
        name: name.to_string(),
        ty: ty.into(),
        init: Some(init),
        pos: SourcePos::default(),
    }
}

pub fn assign(name: &str, value: Expr) -> Stmt {
    Stmt::Assign {
        target: Place::Local(name.to_string()),
        value,
        pos: SourcePos::default(),
    }
}

pub fn assign_to(target: Place, value: Expr) -> Stmt {
    Stmt::Assign {
        target,
        value,
        pos: SourcePos::default(),
    }
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::Return(Some(value), SourcePos::default())
}

pub fn ret_void() -> Stmt {
    Stmt::Return(None, SourcePos::default())
}

pub fn if_(cond: Expr, then_body: Vec<Stmt>, else_body: Option<Vec<Stmt>>) -> Stmt {
    Stmt::If {
        cond,
        then_body,
        else_body,
        pos: SourcePos::default(),
    }
}

pub fn while_(cond: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::While {
        cond,
        body,
        pos: SourcePos::default(),
    }
}

pub fn for_range(var: &str, ty: impl Into<TypeRef>, start: Expr, end: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::For {
        var: var.to_string(),
        ty: ty.into(),
        start,
        end,
        body,
        pos: SourcePos::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ref_resolve() {
        let t = TypeRef::ptr(TypeRef::Param(1));
        assert_eq!(t.resolve(&[Type::U8, Type::U16]), Ok(Type::ptr(Type::U16)));
        assert_eq!(TypeRef::Param(2).resolve(&[Type::U8]), Err(2));
    }

    #[test]
    fn test_string_literals_in_order() {
        let f = FunctionDecl::new(
            "greet",
            vec![],
            Type::Void,
            vec![
                Stmt::Expr(runtime(RuntimeFn::PrintString, vec![string("hello")])),
                if_(
                    boolean(true),
                    vec![Stmt::Expr(runtime(RuntimeFn::PrintString, vec![string("world")]))],
                    None,
                ),
            ],
        );
        let m = Module::new("m").with_function(f);
        assert_eq!(m.string_literals(), vec!["hello", "world"]);
    }

    #[test]
    fn test_module_json_round_trip() {
        let m = Module::new("m")
            .with_global("counter", Type::U16, Some(3))
            .with_function(FunctionDecl::new(
                "id",
                vec![("x", Type::U8.into())],
                Type::U8,
                vec![ret(local("x", Type::U8))],
            ));
        let text = serde_json::to_string(&m).unwrap();
        assert_eq!(Module::from_json(&text).unwrap(), m);
    }
}
