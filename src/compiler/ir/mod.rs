//! # Intermediate Representation (IR)
//!
//! Typed three-address code shared by every target emitter.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition and re-exports
//! ├── instruction.rs  # IrReg, Operand, IrInstruction, Symbol, RuntimeFn
//! ├── program.rs      # RegisterTable, IrFunction, GlobalVariable, StringPool, IrProgram
//! └── generator.rs    # IrGenerator: front-end function bodies to IR
//! ```
//!
//! ## Key Types
//!
//! - [`IrReg`] - Virtual register, an index into its function's [`RegisterTable`]
//! - [`IrInstruction`] - Three-address instruction (arithmetic, memory, control flow)
//! - [`IrFunction`] - One function body plus its register arena and convention flags
//! - [`IrProgram`] - Functions, globals and the string pool of one module
//! - [`IrGenerator`] - Lowering of one resolved function body
//!
//! ## Shape guarantees
//!
//! Every expression gets a fresh register; mutable locals live in a home
//! register re-defined by `Move`. `if` always lowers to
//! `JumpIfNot else; then; Jump end; else:; ...; end:` even without an else
//! branch, and loops to `head:; cond; JumpIfNot exit; body; Jump head; exit:`.

mod generator;
mod instruction;
mod program;

// Re-export all public types
pub use generator::{IrGenerator, LoweringContext};
pub use instruction::{
    BinOp, Callee, CmpOp, IrInstruction, IrReg, Operand, RuntimeFn, Symbol, UnOp,
};
pub use program::{
    CallingConvention, ConventionRequest, GlobalVariable, IrFunction, IrParam, IrProgram,
    LocalVar, RegisterTable, StringPool,
};
