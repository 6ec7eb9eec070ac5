//! # IR Verifier
//!
//! Well-formedness checks run on the IR between passes. A pass that breaks
//! one of these rules is a compiler bug, so failures surface as
//! [`Error::InvalidIr`] naming the function.

use super::ir::{BinOp, Callee, IrFunction, IrInstruction, IrProgram, IrReg, Operand, StringPool};
use super::types::Type;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Verification result with warnings
#[derive(Debug)]
pub struct VerifyResult {
    /// Function is well formed
    pub valid: bool,
    /// Violations that make the IR unusable
    pub errors: Vec<VerifyError>,
    /// Warnings (non-fatal)
    pub warnings: Vec<String>,
    /// Statistics
    pub stats: FunctionStats,
}

/// Function statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FunctionStats {
    pub instruction_count: usize,
    pub register_count: usize,
    pub label_count: usize,
    pub call_count: usize,
}

/// Verification error types
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyError {
    /// Function exceeds the instruction limit
    TooManyInstructions { count: usize, limit: usize },

    /// Register id outside the function's register table
    UnknownRegister { index: usize, reg: IrReg },

    /// Register typed with something a register cannot hold
    NonScalarRegister { reg: IrReg, ty: Type },

    /// Label defined more than once
    DuplicateLabel { label: String },

    /// Jump to a label that is never defined
    UndefinedLabel { index: usize, label: String },

    /// Operand types disagree with the instruction
    TypeMismatch { index: usize, message: String },

    /// Call to a function the program does not contain
    UnknownCallee { index: usize, callee: String },

    /// Call with the wrong number of arguments
    ArityMismatch {
        index: usize,
        callee: String,
        expected: usize,
        found: usize,
    },

    /// Control can run past the last instruction
    FallsOffEnd,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyError::TooManyInstructions { count, limit } => {
                write!(f, "Too many instructions: {} (limit: {})", count, limit)
            }
            VerifyError::UnknownRegister { index, reg } => {
                write!(f, "Unknown register {} at instruction {}", reg, index)
            }
            VerifyError::NonScalarRegister { reg, ty } => {
                write!(f, "Register {} has non-scalar type {}", reg, ty)
            }
            VerifyError::DuplicateLabel { label } => write!(f, "Label '{}' defined twice", label),
            VerifyError::UndefinedLabel { index, label } => {
                write!(f, "Jump at instruction {} to undefined label '{}'", index, label)
            }
            VerifyError::TypeMismatch { index, message } => {
                write!(f, "Type error at instruction {}: {}", index, message)
            }
            VerifyError::UnknownCallee { index, callee } => {
                write!(f, "Call at instruction {} to unknown function '{}'", index, callee)
            }
            VerifyError::ArityMismatch {
                index,
                callee,
                expected,
                found,
            } => write!(
                f,
                "Call at instruction {} to '{}' passes {} argument(s), expected {}",
                index, callee, found, expected
            ),
            VerifyError::FallsOffEnd => write!(f, "Control falls off the end of the function"),
        }
    }
}

/// IR verifier
pub struct Verifier {
    /// Maximum instructions per function
    max_instructions: usize,
    /// Strict mode (treat warnings as errors)
    strict: bool,
}

impl Verifier {
    pub fn new() -> Self {
        Self {
            max_instructions: 1 << 16,
            strict: false,
        }
    }

    /// Enable strict mode
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Set custom instruction limit
    pub fn max_instructions(mut self, limit: usize) -> Self {
        self.max_instructions = limit;
        self
    }

    /// Verify every function and the program-level symbol table
    pub fn verify_program(&self, program: &IrProgram) -> Result<()> {
        let mut failures = Vec::new();

        let mut seen = HashSet::new();
        for func in &program.functions {
            if !seen.insert(&func.symbol) {
                failures.push(Error::invalid_ir(func.name(), "symbol emitted twice"));
            }
        }

        for func in &program.functions {
            let result = self.verify_function(func, program);
            if !result.valid {
                let mut messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
                if self.strict {
                    messages.extend(result.warnings);
                }
                failures.push(Error::invalid_ir(func.name(), messages.join("; ")));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::from_failures(failures))
        }
    }

    /// Verify one function against its program context
    pub fn verify_function(&self, func: &IrFunction, program: &IrProgram) -> VerifyResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut stats = FunctionStats {
            instruction_count: func.instructions.len(),
            register_count: func.registers.len(),
            ..FunctionStats::default()
        };

        if stats.instruction_count > self.max_instructions {
            errors.push(VerifyError::TooManyInstructions {
                count: stats.instruction_count,
                limit: self.max_instructions,
            });
        }

        for (reg, ty) in func.registers.iter() {
            if !ty.is_scalar() {
                errors.push(VerifyError::NonScalarRegister {
                    reg,
                    ty: ty.clone(),
                });
            }
        }

        // Labels
        let mut labels: HashMap<&str, usize> = HashMap::new();
        for instr in &func.instructions {
            if let IrInstruction::Label(l) = instr {
                *labels.entry(l.as_str()).or_default() += 1;
            }
        }
        stats.label_count = labels.len();
        let mut duplicates: Vec<&str> = labels
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(l, _)| *l)
            .collect();
        duplicates.sort_unstable();
        for label in duplicates {
            errors.push(VerifyError::DuplicateLabel {
                label: label.to_string(),
            });
        }

        let mut defined: HashSet<IrReg> = func.param_regs().into_iter().collect();
        for (index, instr) in func.instructions.iter().enumerate() {
            let regs = instr.uses().into_iter().chain(instr.dest());
            let mut registers_ok = true;
            for reg in regs {
                if func.registers.get(reg).is_none() {
                    errors.push(VerifyError::UnknownRegister { index, reg });
                    registers_ok = false;
                }
            }
            if let Some(label) = instr.jump_target() {
                if !labels.contains_key(label) {
                    errors.push(VerifyError::UndefinedLabel {
                        index,
                        label: label.to_string(),
                    });
                }
            }
            if matches!(instr, IrInstruction::Call(..)) {
                stats.call_count += 1;
            }
            if !registers_ok {
                continue;
            }
            for reg in instr.uses() {
                if !defined.contains(&reg) && !is_defined_anywhere(func, reg) {
                    warnings.push(format!("register {} is read but never written", reg));
                }
            }
            if let Some(d) = instr.dest() {
                defined.insert(d);
            }
            if let Err(e) = check_instruction(func, program, index, instr) {
                errors.push(e);
            }
        }

        match func.instructions.last() {
            Some(last) if last.is_terminator() => {}
            _ => errors.push(VerifyError::FallsOffEnd),
        }

        let valid = errors.is_empty() && (!self.strict || warnings.is_empty());

        VerifyResult {
            valid,
            errors,
            warnings,
            stats,
        }
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

fn is_defined_anywhere(func: &IrFunction, reg: IrReg) -> bool {
    func.instructions.iter().any(|i| i.dest() == Some(reg))
}

fn mismatch(index: usize, message: impl Into<String>) -> VerifyError {
    VerifyError::TypeMismatch {
        index,
        message: message.into(),
    }
}

/// Type rules of a single instruction
fn check_instruction(
    func: &IrFunction,
    program: &IrProgram,
    index: usize,
    instr: &IrInstruction,
) -> std::result::Result<(), VerifyError> {
    let ty = |r: IrReg| func.reg_type(r);
    let same = |a: IrReg, b: IrReg, what: &str| {
        if ty(a) == ty(b) {
            Ok(())
        } else {
            Err(mismatch(index, format!("{}: {} vs {}", what, ty(a), ty(b))))
        }
    };

    match instr {
        IrInstruction::Const(d, k) => {
            if ty(*d).wrap(*k) != *k {
                return Err(mismatch(index, format!("constant {} out of range for {}", k, ty(*d))));
            }
        }
        IrInstruction::LoadString(d, idx) => {
            if *ty(*d) != Type::ptr(Type::String) {
                return Err(mismatch(index, "string address must be *string"));
            }
            if *idx >= program.strings.len() {
                return Err(mismatch(index, format!("no pooled string {}", StringPool::label(*idx))));
            }
        }
        IrInstruction::Move(d, s) => same(*d, *s, "move")?,
        IrInstruction::Unary(_, d, s) => {
            same(*d, *s, "unary")?;
            if matches!(ty(*s), Type::Pointer(_)) {
                return Err(mismatch(index, "unary operator on pointer"));
            }
        }
        IrInstruction::Binary(op, d, l, r) => {
            same(*d, *l, "binary result")?;
            if matches!(ty(*l), Type::Pointer(_)) {
                return Err(mismatch(index, "arithmetic on pointer"));
            }
            if let Operand::Reg(r) = r {
                if matches!(op, BinOp::Shl | BinOp::Shr) {
                    if !ty(*r).is_integer() {
                        return Err(mismatch(index, "shift count must be an integer"));
                    }
                } else {
                    same(*l, *r, "binary operands")?;
                }
            }
        }
        IrInstruction::Compare(_, d, l, r) => {
            if *ty(*d) != Type::Bool {
                return Err(mismatch(index, "comparison result must be bool"));
            }
            if let Operand::Reg(r) = r {
                same(*l, *r, "comparison operands")?;
            }
        }
        IrInstruction::Convert(d, s) => {
            let (to, from) = (ty(*d), ty(*s));
            if matches!(to, Type::Pointer(_)) != matches!(from, Type::Pointer(_)) {
                return Err(mismatch(index, format!("conversion from {} to {}", from, to)));
            }
        }
        IrInstruction::AddressOf(d, name) => {
            let g = program
                .global(name)
                .ok_or_else(|| mismatch(index, format!("unknown global '{}'", name)))?;
            if *ty(*d) != Type::ptr(g.ty.clone()) {
                return Err(mismatch(index, format!("address of {} typed {}", g.qualified(), ty(*d))));
            }
        }
        IrInstruction::Load(d, p) | IrInstruction::Store(p, d) => match ty(*p) {
            Type::Pointer(inner) if **inner == *ty(*d) => {}
            other => return Err(mismatch(index, format!("memory access of {} through {}", ty(*d), other))),
        },
        IrInstruction::Index(d, b, i) | IrInstruction::IndexStore(b, i, d) => {
            if ty(*b).element() != Some(ty(*d)) {
                return Err(mismatch(index, format!("element {} through {}", ty(*d), ty(*b))));
            }
            if !ty(*i).is_integer() {
                return Err(mismatch(index, "index must be an integer"));
            }
        }
        IrInstruction::JumpIf(c, _) | IrInstruction::JumpIfNot(c, _) => {
            if !(ty(*c).is_integer() || *ty(*c) == Type::Bool) {
                return Err(mismatch(index, format!("branch on {}", ty(*c))));
            }
        }
        IrInstruction::Call(dst, callee, args) => {
            let (name, params, ret) = match callee {
                Callee::Function(sym) => {
                    let target = program.function(sym).ok_or_else(|| VerifyError::UnknownCallee {
                        index,
                        callee: sym.qualified(),
                    })?;
                    (sym.qualified(), target.param_types(), target.return_type.clone())
                }
                Callee::Runtime(rt) => (rt.name().to_string(), rt.params(), Type::Void),
            };
            if params.len() != args.len() {
                return Err(VerifyError::ArityMismatch {
                    index,
                    callee: name,
                    expected: params.len(),
                    found: args.len(),
                });
            }
            for (a, p) in args.iter().zip(&params) {
                if ty(*a) != p {
                    return Err(mismatch(index, format!("argument {} to {} where {} expected", ty(*a), name, p)));
                }
            }
            // A discarded result (`dst == None`) is allowed.
            if let Some(d) = dst {
                if *ty(*d) != ret {
                    return Err(mismatch(index, format!("result of {} typed {}, returns {}", name, ty(*d), ret)));
                }
            }
        }
        IrInstruction::Return(r) => match (r, &func.return_type) {
            (None, Type::Void) => {}
            (Some(r), ret) if ty(*r) == ret => {}
            _ => return Err(mismatch(index, format!("return does not match {}", func.return_type))),
        },
        IrInstruction::Label(_) | IrInstruction::Jump(_) | IrInstruction::Nop => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{RuntimeFn, Symbol};

    fn program_with(f: IrFunction) -> IrProgram {
        let mut p = IrProgram::new("m");
        p.functions.push(f);
        p
    }

    fn add_one() -> IrFunction {
        let mut f = IrFunction::new(Symbol::new("m", "inc", vec![]), Type::U8);
        let x = f.registers.alloc(Type::U8);
        f.params.push(crate::compiler::ir::IrParam {
            name: "x".into(),
            reg: x,
        });
        let y = f.registers.alloc(Type::U8);
        f.instructions = vec![
            IrInstruction::Binary(BinOp::Add, y, x, Operand::Imm(1)),
            IrInstruction::Return(Some(y)),
        ];
        f
    }

    #[test]
    fn test_valid_function() {
        let p = program_with(add_one());
        let r = Verifier::new().verify_function(&p.functions[0], &p);
        assert!(r.valid, "{:?}", r.errors);
        assert_eq!(r.stats.register_count, 2);
        assert!(Verifier::new().verify_program(&p).is_ok());
    }

    #[test]
    fn test_detects_undefined_label_and_fall_off() {
        let mut f = add_one();
        f.instructions.insert(0, IrInstruction::Jump("nowhere".into()));
        f.instructions.pop();
        let p = program_with(f);
        let r = Verifier::new().verify_function(&p.functions[0], &p);
        assert!(!r.valid);
        assert!(r.errors.contains(&VerifyError::UndefinedLabel {
            index: 0,
            label: "nowhere".into()
        }));
        assert!(r.errors.contains(&VerifyError::FallsOffEnd));
    }

    #[test]
    fn test_detects_type_and_arity_errors() {
        let mut f = add_one();
        let wide = f.registers.alloc(Type::U16);
        f.instructions.insert(0, IrInstruction::Move(wide, IrReg(0)));
        f.instructions.insert(
            0,
            IrInstruction::Call(None, Callee::Runtime(RuntimeFn::PrintU8), vec![]),
        );
        let p = program_with(f);
        let r = Verifier::new().verify_function(&p.functions[0], &p);
        assert!(matches!(r.errors[0], VerifyError::ArityMismatch { expected: 1, found: 0, .. }));
        assert!(matches!(r.errors[1], VerifyError::TypeMismatch { index: 1, .. }));
        assert!(matches!(
            Verifier::new().verify_program(&p),
            Err(Error::InvalidIr { .. })
        ));
    }

    #[test]
    fn test_duplicate_symbol_rejected() {
        let mut p = program_with(add_one());
        p.functions.push(add_one());
        assert!(matches!(
            Verifier::new().verify_program(&p),
            Err(Error::InvalidIr { message, .. }) if message.contains("twice")
        ));
    }
}
