//! IR Generator - lowers one resolved function body to IR
//!
//! ## Adding New Constructs
//!
//! 1. Add the variant to `ast::ExprKind` / `ast::Stmt`
//! 2. Use `self.alloc_reg(ty)` for every value it produces
//! 3. Use `self.emit(IrInstruction::...)` to generate IR
//! 4. Return `Ok(Some(result_reg))`, or `Ok(None)` for void

use super::instruction::{BinOp, Callee, CmpOp, IrInstruction, IrReg, Operand, Symbol};
use super::program::{GlobalVariable, IrFunction, IrParam, LocalVar, StringPool};
use crate::compiler::ast::{
    self, Expr, ExprKind, FunctionDecl, LogicalOp, Place, SourcePos, Stmt, TypeRef,
};
use crate::compiler::types::Type;
use crate::{Error, Result};
use std::collections::HashMap;

/// Read-only module state shared by every lowering job
#[derive(Debug, Clone, Copy)]
pub struct LoweringContext<'a> {
    pub module: &'a str,
    pub globals: &'a [GlobalVariable],
    pub strings: &'a StringPool,
}

/// IR Generator - transforms one resolved function body to IR
pub struct IrGenerator<'a> {
    ctx: LoweringContext<'a>,
    decl: &'a FunctionDecl,
    type_args: &'a [Type],
    func: IrFunction,
    /// Lexical scopes mapping source names to home registers
    scopes: Vec<HashMap<String, IrReg>>,
    /// Label counter for generating unique labels
    next_label: u32,
}

impl<'a> IrGenerator<'a> {
    /// Create a generator for `decl` with its type parameters bound to `type_args`
    pub fn new(ctx: LoweringContext<'a>, decl: &'a FunctionDecl, type_args: &'a [Type]) -> Self {
        let symbol = Symbol::new(ctx.module, decl.name.clone(), type_args.to_vec());
        let mut func = IrFunction::new(symbol, Type::Void);
        func.requested_convention = decl.convention;
        func.line = decl.pos.line;
        Self {
            ctx,
            decl,
            type_args,
            func,
            scopes: vec![HashMap::new()],
            next_label: 0,
        }
    }

    /// Lower the whole body
    pub fn generate(mut self) -> Result<IrFunction> {
        let decl = self.decl;
        if decl.type_params.len() != self.type_args.len() {
            return Err(self.unsupported(
                decl.pos,
                format!(
                    "{} type argument(s) for {} type parameter(s)",
                    self.type_args.len(),
                    decl.type_params.len()
                ),
            ));
        }

        self.func.return_type = self.resolve(&decl.return_type, decl.pos)?;

        for param in &decl.params {
            let ty = self.resolve(&param.ty, decl.pos)?;
            if !ty.is_scalar() {
                return Err(self.unsupported(
                    decl.pos,
                    format!("parameter '{}' of aggregate type {}", param.name, ty),
                ));
            }
            let reg = self.alloc_reg(ty);
            self.bind(&param.name, reg);
            self.func.params.push(IrParam {
                name: param.name.clone(),
                reg,
            });
        }

        for stmt in &decl.body {
            self.generate_statement(stmt)?;
        }

        let terminated = self
            .func
            .instructions
            .last()
            .map_or(false, IrInstruction::is_terminator);
        if !terminated {
            if self.func.return_type == Type::Void {
                self.emit(IrInstruction::Return(None));
            } else {
                // Unreachable when every path returns; keeps the body well formed.
                let ty = self.func.return_type.clone();
                let zero = self.alloc_reg(ty);
                self.emit(IrInstruction::Const(zero, 0));
                self.emit(IrInstruction::Return(Some(zero)));
            }
        }

        Ok(self.func)
    }

    /// Allocate a fresh virtual register
    fn alloc_reg(&mut self, ty: Type) -> IrReg {
        self.func.registers.alloc(ty)
    }

    fn label_id(&mut self) -> u32 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    /// Emit an IR instruction
    fn emit(&mut self, instr: IrInstruction) {
        self.func.instructions.push(instr);
    }

    fn bind(&mut self, name: &str, reg: IrReg) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), reg);
        }
    }

    fn lookup(&self, name: &str) -> Option<IrReg> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn unsupported(&self, pos: SourcePos, construct: impl Into<String>) -> Error {
        Error::Unsupported {
            function: self.func.name(),
            line: pos.line,
            column: pos.column,
            construct: construct.into(),
        }
    }

    fn unresolved(&self, pos: SourcePos, kind: &'static str, name: &str) -> Error {
        Error::UnresolvedName {
            function: self.func.name(),
            line: pos.line,
            column: pos.column,
            kind,
            name: name.to_string(),
        }
    }

    fn resolve(&self, ty: &TypeRef, pos: SourcePos) -> Result<Type> {
        ty.resolve(self.type_args).map_err(|idx| {
            let name = self
                .decl
                .type_params
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("#{}", idx));
            self.unresolved(pos, "type parameter", &name)
        })
    }

    fn global(&self, name: &str, pos: SourcePos) -> Result<GlobalVariable> {
        self.ctx
            .globals
            .iter()
            .find(|g| g.name == name)
            .cloned()
            .ok_or_else(|| self.unresolved(pos, "global", name))
    }

    fn local_home(&self, name: &str, pos: SourcePos) -> Result<IrReg> {
        self.lookup(name)
            .ok_or_else(|| self.unresolved(pos, "local", name))
    }

    fn generate_block(&mut self, body: &[Stmt]) -> Result<()> {
        self.scopes.push(HashMap::new());
        let result = body.iter().try_for_each(|s| self.generate_statement(s));
        self.scopes.pop();
        result
    }

    fn generate_statement(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Let {
                name,
                ty,
                init,
                pos,
            } => {
                let ty = self.resolve(ty, *pos)?;
                if !ty.is_scalar() {
                    return Err(self.unsupported(*pos, format!("local '{}' of aggregate type {}", name, ty)));
                }
                let home = self.alloc_reg(ty.clone());
                match init {
                    Some(e) => {
                        let value = self.generate_value(e)?;
                        self.emit(IrInstruction::Move(home, value));
                    }
                    None => self.emit(IrInstruction::Const(home, 0)),
                }
                self.bind(name, home);
                self.func.locals.push(LocalVar {
                    name: name.clone(),
                    ty,
                    home,
                });
            }

            Stmt::Assign { target, value, pos } => match target {
                Place::Local(name) => {
                    let home = self.local_home(name, *pos)?;
                    let v = self.generate_value(value)?;
                    self.emit(IrInstruction::Move(home, v));
                }
                Place::Global(name) => {
                    let g = self.global(name, *pos)?;
                    let v = self.generate_value(value)?;
                    let ptr = self.alloc_reg(Type::ptr(g.ty));
                    self.emit(IrInstruction::AddressOf(ptr, g.name));
                    self.emit(IrInstruction::Store(ptr, v));
                }
                Place::Deref(ptr) => {
                    let p = self.generate_value(ptr)?;
                    let v = self.generate_value(value)?;
                    self.emit(IrInstruction::Store(p, v));
                }
                Place::Index(base, idx) => {
                    let b = self.generate_value(base)?;
                    let i = self.generate_value(idx)?;
                    let v = self.generate_value(value)?;
                    self.emit(IrInstruction::IndexStore(b, i, v));
                }
            },

            Stmt::Expr(e) => {
                self.generate_expr(e)?;
            }

            // cond; JumpIfNot else; then; Jump end; else:; [else]; end:
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                let c = self.generate_value(cond)?;
                let id = self.label_id();
                let else_label = format!("if_else_{}", id);
                let end_label = format!("if_end_{}", id);
                self.emit(IrInstruction::JumpIfNot(c, else_label.clone()));
                self.generate_block(then_body)?;
                self.emit(IrInstruction::Jump(end_label.clone()));
                self.emit(IrInstruction::Label(else_label));
                if let Some(body) = else_body {
                    self.generate_block(body)?;
                }
                self.emit(IrInstruction::Label(end_label));
            }

            Stmt::While { cond, body, .. } => {
                let id = self.label_id();
                let head = format!("while_head_{}", id);
                let exit = format!("while_exit_{}", id);
                self.emit(IrInstruction::Label(head.clone()));
                let c = self.generate_value(cond)?;
                self.emit(IrInstruction::JumpIfNot(c, exit.clone()));
                self.generate_block(body)?;
                self.emit(IrInstruction::Jump(head));
                self.emit(IrInstruction::Label(exit));
            }

            Stmt::For {
                var,
                ty,
                start,
                end,
                body,
                pos,
            } => {
                let ty = self.resolve(ty, *pos)?;
                if !ty.is_integer() {
                    return Err(self.unsupported(*pos, format!("for-range over {}", ty)));
                }
                let home = self.alloc_reg(ty.clone());
                let s = self.generate_value(start)?;
                self.emit(IrInstruction::Move(home, s));
                let limit = self.generate_value(end)?;

                let id = self.label_id();
                let head = format!("for_head_{}", id);
                let exit = format!("for_exit_{}", id);
                self.emit(IrInstruction::Label(head.clone()));
                let c = self.alloc_reg(Type::Bool);
                self.emit(IrInstruction::Compare(CmpOp::Lt, c, home, Operand::Reg(limit)));
                self.emit(IrInstruction::JumpIfNot(c, exit.clone()));

                self.scopes.push(HashMap::new());
                self.bind(var, home);
                self.func.locals.push(LocalVar {
                    name: var.clone(),
                    ty: ty.clone(),
                    home,
                });
                let result = body.iter().try_for_each(|s| self.generate_statement(s));
                self.scopes.pop();
                result?;

                let next = self.alloc_reg(ty);
                self.emit(IrInstruction::Binary(BinOp::Add, next, home, Operand::Imm(1)));
                self.emit(IrInstruction::Move(home, next));
                self.emit(IrInstruction::Jump(head));
                self.emit(IrInstruction::Label(exit));
            }

            Stmt::Return(value, pos) => {
                let is_void = self.func.return_type == Type::Void;
                match (value, is_void) {
                    (Some(e), false) => {
                        let v = self.generate_value(e)?;
                        self.emit(IrInstruction::Return(Some(v)));
                    }
                    (None, true) => self.emit(IrInstruction::Return(None)),
                    (Some(_), true) => {
                        return Err(self.unsupported(*pos, "value returned from void function"))
                    }
                    (None, false) => return Err(self.unsupported(*pos, "return without value")),
                }
            }

            Stmt::InlineAsm { pos, .. } => {
                return Err(self.unsupported(*pos, "inline assembly"));
            }
        }
        Ok(())
    }

    /// Lower an expression that must produce a value
    fn generate_value(&mut self, expr: &Expr) -> Result<IrReg> {
        match self.generate_expr(expr)? {
            Some(r) => Ok(r),
            None => Err(self.unsupported(expr.pos, "void value used as operand")),
        }
    }

    fn generate_expr(&mut self, expr: &Expr) -> Result<Option<IrReg>> {
        let pos = expr.pos;
        let reg = match &expr.kind {
            ExprKind::Int(value) => {
                let ty = self.resolve(&expr.ty, pos)?;
                let wrapped = ty.wrap(*value);
                let dst = self.alloc_reg(ty);
                self.emit(IrInstruction::Const(dst, wrapped));
                dst
            }

            ExprKind::Bool(value) => {
                let dst = self.alloc_reg(Type::Bool);
                self.emit(IrInstruction::Const(dst, i64::from(*value)));
                dst
            }

            ExprKind::Str(s) => {
                let idx = self
                    .ctx
                    .strings
                    .index_of(s)
                    .ok_or_else(|| self.unresolved(pos, "string literal", s))?;
                let dst = self.alloc_reg(Type::ptr(Type::String));
                self.emit(IrInstruction::LoadString(dst, idx));
                dst
            }

            ExprKind::Local(name) => {
                let home = self.local_home(name, pos)?;
                let ty = self.func.registers.ty(home).clone();
                let dst = self.alloc_reg(ty);
                self.emit(IrInstruction::Move(dst, home));
                dst
            }

            ExprKind::Global(name) => {
                let g = self.global(name, pos)?;
                if !g.ty.is_scalar() {
                    return Err(self.unsupported(pos, format!("read of aggregate global '{}'", name)));
                }
                let ptr = self.alloc_reg(Type::ptr(g.ty.clone()));
                self.emit(IrInstruction::AddressOf(ptr, g.name));
                let dst = self.alloc_reg(g.ty);
                self.emit(IrInstruction::Load(dst, ptr));
                dst
            }

            ExprKind::AddressOf(name) => {
                let g = self.global(name, pos)?;
                let dst = self.alloc_reg(Type::ptr(g.ty));
                self.emit(IrInstruction::AddressOf(dst, g.name));
                dst
            }

            ExprKind::Unary(op, operand) => {
                let v = self.generate_value(operand)?;
                let ty = self.resolve(&expr.ty, pos)?;
                let dst = self.alloc_reg(ty);
                self.emit(IrInstruction::Unary(*op, dst, v));
                dst
            }

            ExprKind::Binary(op, lhs, rhs) => {
                let l = self.generate_value(lhs)?;
                let r = self.generate_value(rhs)?;
                let ty = self.resolve(&expr.ty, pos)?;
                let dst = self.alloc_reg(ty);
                self.emit(IrInstruction::Binary(*op, dst, l, Operand::Reg(r)));
                dst
            }

            ExprKind::Compare(op, lhs, rhs) => {
                let l = self.generate_value(lhs)?;
                let r = self.generate_value(rhs)?;
                let dst = self.alloc_reg(Type::Bool);
                self.emit(IrInstruction::Compare(*op, dst, l, Operand::Reg(r)));
                dst
            }

            // res = lhs; branch past rhs if decided; res = rhs; end:
            ExprKind::Logical(op, lhs, rhs) => {
                let res = self.alloc_reg(Type::Bool);
                let l = self.generate_value(lhs)?;
                self.emit(IrInstruction::Move(res, l));
                let end = format!("logic_end_{}", self.label_id());
                match op {
                    LogicalOp::And => self.emit(IrInstruction::JumpIfNot(res, end.clone())),
                    LogicalOp::Or => self.emit(IrInstruction::JumpIf(res, end.clone())),
                }
                let r = self.generate_value(rhs)?;
                self.emit(IrInstruction::Move(res, r));
                self.emit(IrInstruction::Label(end));
                res
            }

            ExprKind::Cast(operand) => {
                let v = self.generate_value(operand)?;
                let from = self.func.registers.ty(v).clone();
                let to = self.resolve(&expr.ty, pos)?;
                let pointer_mix = matches!(from, Type::Pointer(_)) != matches!(to, Type::Pointer(_));
                if !to.is_scalar() || pointer_mix {
                    return Err(self.unsupported(pos, format!("cast from {} to {}", from, to)));
                }
                let same = from == to;
                let dst = self.alloc_reg(to);
                if same {
                    self.emit(IrInstruction::Move(dst, v));
                } else {
                    self.emit(IrInstruction::Convert(dst, v));
                }
                dst
            }

            ExprKind::Call(callee, args) => {
                let callee = match callee {
                    ast::Callee::Function { name, type_args } => {
                        let resolved = type_args
                            .iter()
                            .map(|t| self.resolve(t, pos))
                            .collect::<Result<Vec<_>>>()?;
                        Callee::Function(Symbol::new(self.ctx.module, name.clone(), resolved))
                    }
                    ast::Callee::Runtime(f) => Callee::Runtime(*f),
                };
                let mut arg_regs = Vec::with_capacity(args.len());
                for a in args {
                    arg_regs.push(self.generate_value(a)?);
                }
                let ret = self.resolve(&expr.ty, pos)?;
                if ret == Type::Void {
                    self.emit(IrInstruction::Call(None, callee, arg_regs));
                    return Ok(None);
                }
                let dst = self.alloc_reg(ret);
                self.emit(IrInstruction::Call(Some(dst), callee, arg_regs));
                dst
            }

            ExprKind::Index(base, idx) => {
                let b = self.generate_value(base)?;
                let i = self.generate_value(idx)?;
                let elem = self.resolve(&expr.ty, pos)?;
                let dst = self.alloc_reg(elem);
                self.emit(IrInstruction::Index(dst, b, i));
                dst
            }

            ExprKind::Deref(ptr) => {
                let p = self.generate_value(ptr)?;
                let ty = self.resolve(&expr.ty, pos)?;
                let dst = self.alloc_reg(ty);
                self.emit(IrInstruction::Load(dst, p));
                dst
            }
        };
        Ok(Some(reg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::*;
    use crate::compiler::ir::{Callee, CmpOp, RuntimeFn, Symbol};

    fn lower(decl: &FunctionDecl) -> Result<IrFunction> {
        let strings = StringPool::new();
        let ctx = LoweringContext {
            module: "t",
            globals: &[],
            strings: &strings,
        };
        IrGenerator::new(ctx, decl, &[]).generate()
    }

    #[test]
    fn test_if_without_else_keeps_skeleton() {
        let decl = FunctionDecl::new(
            "f",
            vec![("x", Type::U8.into())],
            Type::U8,
            vec![
                if_(
                    cmp(CmpOp::Eq, local("x", Type::U8), int(0, Type::U8)),
                    vec![ret(int(1, Type::U8))],
                    None,
                ),
                ret(local("x", Type::U8)),
            ],
        );
        let f = lower(&decl).unwrap();
        let labels: Vec<_> = f
            .instructions
            .iter()
            .filter_map(|i| match i {
                IrInstruction::Label(l) => Some(l.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["if_else_0", "if_end_0"]);
        assert!(f
            .instructions
            .iter()
            .any(|i| matches!(i, IrInstruction::Jump(l) if l == "if_end_0")));
    }

    #[test]
    fn test_fresh_register_per_expression() {
        let decl = FunctionDecl::new(
            "add",
            vec![("a", Type::U8.into()), ("b", Type::U8.into())],
            Type::U8,
            vec![ret(bin(BinOp::Add, local("a", Type::U8), local("b", Type::U8)))],
        );
        let f = lower(&decl).unwrap();
        let mut defined = std::collections::HashSet::new();
        for instr in &f.instructions {
            if let Some(d) = instr.dest() {
                assert!(defined.insert(d), "register {} defined twice", d);
            }
        }
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.registers.len(), 5);
    }

    #[test]
    fn test_inline_asm_is_unsupported() {
        let decl = FunctionDecl::new(
            "f",
            vec![],
            Type::Void,
            vec![Stmt::InlineAsm {
                text: "di".into(),
                pos: SourcePos::new(7, 3),
            }],
        );
        match lower(&decl) {
            Err(Error::Unsupported { line, column, .. }) => assert_eq!((line, column), (7, 3)),
            other => panic!("expected unsupported, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_call_carries_type_tuple() {
        let decl = FunctionDecl::new(
            "caller",
            vec![],
            Type::Void,
            vec![Stmt::Expr(call_generic(
                "show",
                vec![Type::U16.into()],
                vec![int(5, Type::U16)],
                Type::Void,
            ))],
        );
        let f = lower(&decl).unwrap();
        let callee = f.instructions.iter().find_map(|i| match i {
            IrInstruction::Call(None, Callee::Function(sym), _) => Some(sym.clone()),
            _ => None,
        });
        assert_eq!(callee, Some(Symbol::new("t", "show", vec![Type::U16])));
        assert!(matches!(f.instructions.last(), Some(IrInstruction::Return(None))));
    }

    #[test]
    fn test_unknown_string_is_unresolved() {
        let decl = FunctionDecl::new(
            "f",
            vec![],
            Type::Void,
            vec![Stmt::Expr(runtime(RuntimeFn::PrintString, vec![string("hi")]))],
        );
        assert!(matches!(lower(&decl), Err(Error::UnresolvedName { kind: "string literal", .. })));
    }
}
