//! IR function and program definitions

use super::instruction::{Callee, IrInstruction, IrReg, Symbol};
use crate::compiler::types::Type;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-function register arena: index is the register id, entry its type.
///
/// Owned by exactly one function; ids never escape it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTable {
    types: Vec<Type>,
}

impl RegisterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh register of the given type
    pub fn alloc(&mut self, ty: Type) -> IrReg {
        let reg = IrReg::new(self.types.len() as u32);
        self.types.push(ty);
        reg
    }

    /// Type of a register; panics on a foreign id (an arena invariant violation)
    pub fn ty(&self, reg: IrReg) -> &Type {
        &self.types[reg.index()]
    }

    pub fn get(&self, reg: IrReg) -> Option<&Type> {
        self.types.get(reg.index())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IrReg, &Type)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, t)| (IrReg::new(i as u32), t))
    }

    /// Rebuild the table under a register permutation (`map[old] = new`)
    pub fn permuted(&self, map: &[IrReg]) -> RegisterTable {
        let mut types = self.types.clone();
        for (old, new) in map.iter().enumerate() {
            types[new.index()] = self.types[old].clone();
        }
        RegisterTable { types }
    }
}

/// Convention requested by the front end for one function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConventionRequest {
    /// Let compile options decide
    #[default]
    Auto,
    /// Always pass arguments on the stack
    Stack,
    /// Self-modifying code; never silently downgraded
    Smc,
}

/// Calling convention the function is emitted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallingConvention {
    /// Reentrant, arguments on the (hardware or software) stack
    #[default]
    Stack,
    /// Arguments patched into the callee's own immediates; non-reentrant
    Smc,
}

/// Formal parameter: source name bound to a parameter register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrParam {
    pub name: String,
    pub reg: IrReg,
}

/// Source-level local, kept for diagnostics and debug-mapped storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVar {
    pub name: String,
    pub ty: Type,
    pub home: IrReg,
}

/// One lowered (and possibly monomorphized) function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrFunction {
    pub symbol: Symbol,
    pub params: Vec<IrParam>,
    pub return_type: Type,
    pub locals: Vec<LocalVar>,
    pub registers: RegisterTable,
    pub instructions: Vec<IrInstruction>,
    /// Every self call is a tail call (set by the optimizer)
    pub is_tail_recursive: bool,
    pub requested_convention: ConventionRequest,
    pub convention: CallingConvention,
    /// Source line of the declaration
    pub line: u32,
}

impl IrFunction {
    pub fn new(symbol: Symbol, return_type: Type) -> Self {
        Self {
            symbol,
            params: Vec::new(),
            return_type,
            locals: Vec::new(),
            registers: RegisterTable::new(),
            instructions: Vec::new(),
            is_tail_recursive: false,
            requested_convention: ConventionRequest::Auto,
            convention: CallingConvention::Stack,
            line: 0,
        }
    }

    /// Emitted symbol (`module_name$t1...`)
    pub fn name(&self) -> String {
        self.symbol.qualified()
    }

    pub fn uses_smc_convention(&self) -> bool {
        self.convention == CallingConvention::Smc
    }

    pub fn param_regs(&self) -> Vec<IrReg> {
        self.params.iter().map(|p| p.reg).collect()
    }

    pub fn param_types(&self) -> Vec<Type> {
        self.params
            .iter()
            .map(|p| self.registers.ty(p.reg).clone())
            .collect()
    }

    pub fn is_param(&self, reg: IrReg) -> bool {
        self.params.iter().any(|p| p.reg == reg)
    }

    pub fn reg_type(&self, reg: IrReg) -> &Type {
        self.registers.ty(reg)
    }

    /// Registers the body reads or writes, plus the parameters.
    ///
    /// Arena entries left behind by the optimizer are not included.
    pub fn live_registers(&self) -> BTreeSet<IrReg> {
        let mut live: BTreeSet<IrReg> = self.params.iter().map(|p| p.reg).collect();
        for instr in &self.instructions {
            live.extend(instr.uses());
            live.extend(instr.dest());
        }
        live
    }

    /// Does the body contain a call to itself?
    pub fn calls_self(&self) -> bool {
        self.instructions.iter().any(|i| self.is_self_call(i))
    }

    pub fn is_self_call(&self, instr: &IrInstruction) -> bool {
        matches!(instr, IrInstruction::Call(_, Callee::Function(s), _) if *s == self.symbol)
    }

    /// Renumber every register (`map[old] = new`, must be a permutation)
    pub fn renumber(&mut self, map: &[IrReg]) {
        for instr in &mut self.instructions {
            instr.map_regs(|r| map[r.index()]);
        }
        for p in &mut self.params {
            p.reg = map[p.reg.index()];
        }
        for l in &mut self.locals {
            l.home = map[l.home.index()];
        }
        self.registers = self.registers.permuted(map);
    }
}

/// Module-level global variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub module: String,
    pub name: String,
    pub ty: Type,
    pub init: Option<i64>,
}

impl GlobalVariable {
    /// `Module.name`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }
}

/// Pooled string literals, addressed `str_0, str_1, ...` in declaration order.
///
/// Populated before any function is lowered; read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringPool {
    entries: Vec<String>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a literal, reusing an equal entry
    pub fn intern(&mut self, s: &str) -> usize {
        match self.index_of(s) {
            Some(i) => i,
            None => {
                self.entries.push(s.to_string());
                self.entries.len() - 1
            }
        }
    }

    pub fn index_of(&self, s: &str) -> Option<usize> {
        self.entries.iter().position(|e| e == s)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn label(index: usize) -> String {
        format!("str_{}", index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries.iter().enumerate().map(|(i, s)| (i, s.as_str()))
    }
}

/// Complete IR program: one module's functions, globals and string pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrProgram {
    pub module: String,
    /// Declaration order, instantiations appended in discovery order
    pub functions: Vec<IrFunction>,
    pub globals: Vec<GlobalVariable>,
    pub strings: StringPool,
}

impl IrProgram {
    /// Create a new empty IR program
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            ..Self::default()
        }
    }

    pub fn function(&self, symbol: &Symbol) -> Option<&IrFunction> {
        self.functions.iter().find(|f| &f.symbol == symbol)
    }

    /// Look up by mangled name (`fib_tail$u8$u16$u16`)
    pub fn function_by_name(&self, mangled: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.symbol.mangled() == mangled)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|f| f.instructions.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_arena() {
        let mut regs = RegisterTable::new();
        let a = regs.alloc(Type::U8);
        let b = regs.alloc(Type::U16);
        assert_eq!(a, IrReg(0));
        assert_eq!(b, IrReg(1));
        assert_eq!(regs.ty(b), &Type::U16);
        let swapped = regs.permuted(&[IrReg(1), IrReg(0)]);
        assert_eq!(swapped.ty(IrReg(0)), &Type::U16);
    }

    #[test]
    fn test_string_pool_order() {
        let mut pool = StringPool::new();
        assert_eq!(pool.intern("hello"), 0);
        assert_eq!(pool.intern("world"), 1);
        assert_eq!(pool.intern("hello"), 0);
        assert_eq!(StringPool::label(1), "str_1");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_live_registers_skip_dead_entries() {
        let mut f = IrFunction::new(Symbol::new("m", "f", vec![]), Type::U8);
        let x = f.registers.alloc(Type::U8);
        let _dead = f.registers.alloc(Type::U32);
        let y = f.registers.alloc(Type::U8);
        f.params.push(IrParam {
            name: "x".into(),
            reg: x,
        });
        f.instructions = vec![IrInstruction::Const(y, 1), IrInstruction::Return(Some(y))];
        let live: Vec<IrReg> = f.live_registers().into_iter().collect();
        assert_eq!(live, vec![x, y]);
    }

    #[test]
    fn test_global_qualified_name() {
        let g = GlobalVariable {
            module: "Game".into(),
            name: "score".into(),
            ty: Type::U16,
            init: None,
        };
        assert_eq!(g.qualified(), "Game.score");
    }
}
