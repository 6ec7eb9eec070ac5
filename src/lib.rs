//! # retroc - A Retargetable Backend for Retro CPUs
//!
//! Compiles a resolved, type-checked module of a small systems language to
//! Z80, 6502 and 68000 assembly, a portable SSA text form, and C99.
//!
//! ## Features
//!
//! - **Typed three-address IR** with per-function register arenas
//! - **Generic instantiation** on demand, one body per concrete type tuple
//! - **Optimizer**: fixed-point peephole rewriting and self tail call to loop conversion
//! - **Z80 self-modifying calls**: arguments patched straight into the callee's
//!   immediate operands, with a patch table for tooling
//! - **C99 oracle** and an IR interpreter for cross-checking every other target
//!
//! ## Quick Start
//!
//! ```rust
//! use retroc::compiler::ast::{bin, local, ret, FunctionDecl, Module};
//! use retroc::compiler::ir::BinOp;
//! use retroc::compiler::{CompileOptions, Compiler, Target, Type};
//!
//! # fn main() -> retroc::Result<()> {
//! let module = Module::new("demo").with_function(FunctionDecl::new(
//!     "add",
//!     vec![("a", Type::U8.into()), ("b", Type::U8.into())],
//!     Type::U8,
//!     vec![ret(bin(BinOp::Add, local("a", Type::U8), local("b", Type::U8)))],
//! ));
//!
//! let options = CompileOptions {
//!     target: Target::Z80Smc,
//!     ..CompileOptions::default()
//! };
//! let result = Compiler::new(options).compile(&module)?;
//! assert!(result.output.text.contains("demo_add"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Targets
//!
//! | Id        | Output                          | SMC | Widths      | Fixed point |
//! |-----------|---------------------------------|-----|-------------|-------------|
//! | `z80-smc` | Z80 assembly (z80asm syntax)    | yes | 8, 16       | no          |
//! | `mos6502` | 6502 assembly (ca65 syntax)     | no  | 8 to 32     | no          |
//! | `m68k`    | 68000 assembly (GNU as syntax)  | no  | 8 to 32     | yes         |
//! | `ssa`     | LLVM-flavoured SSA text         | no  | 8 to 32     | yes         |
//! | `c99`     | Portable C99                    | no  | 8 to 32     | yes         |
//!
//! A function whose IR needs a feature the selected target lacks is rejected
//! at dispatch with [`Error::Capability`] before any text is produced.
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T>`]. [`Error::classify`] tells
//! build-wide failures apart from failures local to one function.

pub mod compiler;
pub mod error;

pub use error::{Error, ErrorSeverity, Result};
