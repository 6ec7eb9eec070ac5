//! # IR interpreter
//!
//! Executes an [`IrProgram`] directly with the same width semantics the C
//! reference emitter produces: every value is wrapped to its register type
//! after each operation, shifts take their count modulo the operand width,
//! fixed-point multiply/divide rescale by the fraction bits.
//!
//! Memory is a flat 64 KiB little-endian byte array. Globals are laid out
//! from `0x0100` in declaration order, followed by the string pool (each
//! entry a `{ len: u16, data: *u8 }` record directly followed by its
//! bytes). Runtime print helpers append to a captured output buffer.

use super::ir::{
    BinOp, Callee, IrFunction, IrInstruction, IrProgram, IrReg, Operand, RuntimeFn, Symbol, UnOp,
};
use super::types::Type;
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

pub const MEMORY_SIZE: usize = 0x1_0000;
pub const DATA_BASE: usize = 0x0100;

/// One activation on the interpreter's call stack
struct Frame<'p> {
    func: &'p IrFunction,
    pc: usize,
    regs: Vec<i64>,
    /// Caller register that receives the return value
    ret_dst: Option<IrReg>,
}

/// IR interpreter over one program.
///
/// Calls push a [`Frame`] on an explicit stack, so the depth limit is a
/// recoverable [`Error::Runtime`] rather than host stack exhaustion.
pub struct Interpreter<'p> {
    program: &'p IrProgram,
    functions: HashMap<&'p Symbol, &'p IrFunction>,
    /// Label positions, built once per function
    labels: HashMap<&'p Symbol, HashMap<&'p str, usize>>,
    memory: Vec<u8>,
    globals: HashMap<&'p str, usize>,
    strings: Vec<usize>,
    output: String,
    steps: u64,
    max_steps: u64,
    max_depth: usize,
}

impl<'p> Interpreter<'p> {
    /// Lay out globals and strings; fails if they do not fit in memory
    pub fn new(program: &'p IrProgram) -> Result<Self> {
        let mut interp = Self {
            program,
            functions: HashMap::new(),
            labels: HashMap::new(),
            memory: vec![0; MEMORY_SIZE],
            globals: HashMap::new(),
            strings: Vec::new(),
            output: String::new(),
            steps: 0,
            max_steps: 10_000_000,
            max_depth: 256,
        };

        for func in &program.functions {
            let labels = func
                .instructions
                .iter()
                .enumerate()
                .filter_map(|(i, instr)| match instr {
                    IrInstruction::Label(l) => Some((l.as_str(), i)),
                    _ => None,
                })
                .collect();
            interp.functions.insert(&func.symbol, func);
            interp.labels.insert(&func.symbol, labels);
        }

        let mut next = DATA_BASE;
        for g in &program.globals {
            let size = g.ty.storage_bytes() as usize;
            interp.check_range(next, size.max(1))?;
            interp.globals.insert(g.name.as_str(), next);
            if let Some(init) = g.init {
                interp.write(next, &g.ty, init)?;
            }
            next += size.max(1);
        }
        for (_, s) in program.strings.iter() {
            let bytes = s.as_bytes();
            interp.check_range(next, 4 + bytes.len())?;
            interp.write(next, &Type::U16, bytes.len() as i64)?;
            interp.write(next + 2, &Type::ptr(Type::U8), (next + 4) as i64)?;
            interp.memory[next + 4..next + 4 + bytes.len()].copy_from_slice(bytes);
            interp.strings.push(next);
            next += 4 + bytes.len();
        }
        Ok(interp)
    }

    /// Override the step and call-depth limits
    pub fn with_limits(mut self, max_steps: u64, max_depth: usize) -> Self {
        self.max_steps = max_steps;
        self.max_depth = max_depth;
        self
    }

    /// Text written by the runtime print helpers so far
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Current value of a scalar global
    pub fn global(&self, name: &str) -> Result<i64> {
        let g = self
            .program
            .global(name)
            .ok_or_else(|| Error::runtime(format!("unknown global '{}'", name)))?;
        let addr = self.global_address(name)?;
        self.read(addr, &g.ty)
    }

    fn global_address(&self, name: &str) -> Result<usize> {
        self.globals
            .get(name)
            .copied()
            .ok_or_else(|| Error::runtime(format!("unknown global '{}'", name)))
    }

    /// Call a function by mangled name (`fib_tail$u8$u16$u16`)
    pub fn call(&mut self, name: &str, args: &[i64]) -> Result<Option<i64>> {
        let program = self.program;
        let func = program
            .function_by_name(name)
            .ok_or_else(|| Error::runtime(format!("unknown function '{}'", name)))?;
        if func.params.len() != args.len() {
            return Err(Error::runtime(format!(
                "{} expects {} argument(s), got {}",
                name,
                func.params.len(),
                args.len()
            )));
        }
        let args: Vec<i64> = func
            .param_types()
            .iter()
            .zip(args)
            .map(|(ty, v)| ty.wrap(*v))
            .collect();
        let result = self.execute(func, &args);
        debug!(function = name, steps = self.steps, "interpreted call");
        result
    }

    fn function(&self, sym: &Symbol) -> Result<&'p IrFunction> {
        self.functions
            .get(sym)
            .copied()
            .ok_or_else(|| Error::runtime(format!("unknown function '{}'", sym)))
    }

    fn jump(&self, func: &IrFunction, label: &str) -> Result<usize> {
        self.labels
            .get(&func.symbol)
            .and_then(|labels| labels.get(label))
            .copied()
            .ok_or_else(|| Error::runtime(format!("undefined label '{}' in {}", label, func.name())))
    }

    /// Push an activation, failing once `max_depth` frames are live
    fn enter(
        &self,
        stack: &mut Vec<Frame<'p>>,
        func: &'p IrFunction,
        args: &[i64],
        ret_dst: Option<IrReg>,
    ) -> Result<()> {
        if stack.len() >= self.max_depth {
            return Err(Error::runtime(format!(
                "call depth limit {} reached in {}",
                self.max_depth,
                func.name()
            )));
        }
        let mut regs = vec![0i64; func.registers.len()];
        for (p, v) in func.params.iter().zip(args) {
            regs[p.reg.index()] = *v;
        }
        stack.push(Frame {
            func,
            pc: 0,
            regs,
            ret_dst,
        });
        Ok(())
    }

    fn execute(&mut self, entry: &'p IrFunction, args: &[i64]) -> Result<Option<i64>> {
        let mut stack: Vec<Frame<'p>> = Vec::new();
        self.enter(&mut stack, entry, args, None)?;

        loop {
            let frame = stack
                .last_mut()
                .ok_or_else(|| Error::runtime("empty call stack"))?;
            let func = frame.func;
            let instr = func
                .instructions
                .get(frame.pc)
                .ok_or_else(|| Error::runtime(format!("{} fell off its end", func.name())))?;
            self.steps += 1;
            if self.steps > self.max_steps {
                return Err(Error::runtime(format!("step limit {} exceeded", self.max_steps)));
            }
            frame.pc += 1;
            let regs = &mut frame.regs;

            match instr {
                IrInstruction::Const(d, k) => regs[d.index()] = func.reg_type(*d).wrap(*k),
                IrInstruction::LoadString(d, idx) => {
                    let addr = self
                        .strings
                        .get(*idx)
                        .copied()
                        .ok_or_else(|| Error::runtime(format!("no string {}", idx)))?;
                    regs[d.index()] = addr as i64;
                }
                IrInstruction::Move(d, s) => regs[d.index()] = regs[s.index()],
                IrInstruction::Unary(op, d, s) => {
                    let ty = func.reg_type(*d);
                    let v = regs[s.index()];
                    regs[d.index()] = match (op, ty) {
                        (UnOp::Neg, _) => ty.wrap(v.wrapping_neg()),
                        (UnOp::Not, Type::Bool) => i64::from(v == 0),
                        (UnOp::Not, _) => ty.wrap(!v),
                    };
                }
                IrInstruction::Binary(op, d, l, r) => {
                    let ty = func.reg_type(*l);
                    let b = match r {
                        Operand::Reg(r) => regs[r.index()],
                        Operand::Imm(k) => *k,
                    };
                    regs[d.index()] = binary(*op, ty, regs[l.index()], b)?;
                }
                IrInstruction::Compare(op, d, l, r) => {
                    let b = match r {
                        Operand::Reg(r) => regs[r.index()],
                        Operand::Imm(k) => *k,
                    };
                    regs[d.index()] = i64::from(op.eval(regs[l.index()], b));
                }
                IrInstruction::Convert(d, s) => {
                    regs[d.index()] = convert(func.reg_type(*s), func.reg_type(*d), regs[s.index()]);
                }
                IrInstruction::AddressOf(d, name) => {
                    regs[d.index()] = self.global_address(name)? as i64;
                }
                IrInstruction::Load(d, p) => {
                    regs[d.index()] = self.read(address(regs[p.index()])?, func.reg_type(*d))?;
                }
                IrInstruction::Store(p, s) => {
                    self.write(address(regs[p.index()])?, func.reg_type(*s), regs[s.index()])?;
                }
                IrInstruction::Index(d, b, i) => {
                    let ty = func.reg_type(*d);
                    let addr = element_address(regs[b.index()], regs[i.index()], ty)?;
                    regs[d.index()] = self.read(addr, ty)?;
                }
                IrInstruction::IndexStore(b, i, s) => {
                    let ty = func.reg_type(*s);
                    let addr = element_address(regs[b.index()], regs[i.index()], ty)?;
                    self.write(addr, ty, regs[s.index()])?;
                }
                IrInstruction::Label(_) | IrInstruction::Nop => {}
                IrInstruction::Jump(l) => frame.pc = self.jump(func, l)?,
                IrInstruction::JumpIf(c, l) => {
                    if regs[c.index()] != 0 {
                        frame.pc = self.jump(func, l)?;
                    }
                }
                IrInstruction::JumpIfNot(c, l) => {
                    if regs[c.index()] == 0 {
                        frame.pc = self.jump(func, l)?;
                    }
                }
                IrInstruction::Call(dst, callee, args) => {
                    let values: Vec<i64> = args.iter().map(|a| regs[a.index()]).collect();
                    match callee {
                        Callee::Function(sym) => {
                            let target = self.function(sym)?;
                            self.enter(&mut stack, target, &values, *dst)?;
                        }
                        Callee::Runtime(rt) => {
                            if dst.is_some() {
                                return Err(Error::runtime(format!("{} returned no value", callee)));
                            }
                            self.runtime(*rt, &values)?;
                        }
                    }
                }
                IrInstruction::Return(r) => {
                    let value = r.map(|r| regs[r.index()]);
                    let ret_dst = frame.ret_dst;
                    stack.pop();
                    let Some(caller) = stack.last_mut() else {
                        return Ok(value);
                    };
                    if let Some(d) = ret_dst {
                        let v = value.ok_or_else(|| {
                            Error::runtime(format!("{} returned no value", func.name()))
                        })?;
                        caller.regs[d.index()] = caller.func.reg_type(d).wrap(v);
                    }
                }
            }
        }
    }

    fn runtime(&mut self, f: RuntimeFn, args: &[i64]) -> Result<()> {
        let arg = |i: usize| {
            args.get(i)
                .copied()
                .ok_or_else(|| Error::runtime(format!("{} missing argument", f.name())))
        };
        match f {
            RuntimeFn::PrintChar => self.output.push(char::from(arg(0)? as u8)),
            RuntimeFn::PrintU8
            | RuntimeFn::PrintU16
            | RuntimeFn::PrintU24
            | RuntimeFn::PrintI8
            | RuntimeFn::PrintI16 => {
                let v = arg(0)?;
                self.output.push_str(&v.to_string());
            }
            RuntimeFn::PrintNewline => self.output.push('\n'),
            RuntimeFn::PrintString => {
                let rec = address(arg(0)?)?;
                let len = self.read(rec, &Type::U16)? as usize;
                let data = address(self.read(rec + 2, &Type::ptr(Type::U8))?)?;
                self.check_range(data, len)?;
                let text: String = self.memory[data..data + len]
                    .iter()
                    .map(|b| char::from(*b))
                    .collect();
                self.output.push_str(&text);
            }
        }
        Ok(())
    }

    fn check_range(&self, addr: usize, len: usize) -> Result<()> {
        if addr == 0 || addr + len > MEMORY_SIZE {
            return Err(Error::runtime(format!(
                "memory access at {:#06x}+{} out of range",
                addr, len
            )));
        }
        Ok(())
    }

    fn read(&self, addr: usize, ty: &Type) -> Result<i64> {
        let n = ty.storage_bytes() as usize;
        self.check_range(addr, n)?;
        let raw = self.memory[addr..addr + n]
            .iter()
            .rev()
            .fold(0i64, |acc, b| (acc << 8) | i64::from(*b));
        Ok(ty.wrap(raw))
    }

    fn write(&mut self, addr: usize, ty: &Type, value: i64) -> Result<()> {
        let n = ty.storage_bytes() as usize;
        self.check_range(addr, n)?;
        let v = ty.wrap(value);
        for (i, byte) in self.memory[addr..addr + n].iter_mut().enumerate() {
            *byte = (v >> (8 * i)) as u8;
        }
        Ok(())
    }
}

fn address(value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::runtime(format!("negative address {}", value)))
}

fn element_address(base: i64, index: i64, elem: &Type) -> Result<usize> {
    let offset = index
        .checked_mul(i64::from(elem.storage_bytes()))
        .and_then(|o| o.checked_add(base))
        .ok_or_else(|| Error::runtime("element address overflow"))?;
    address(offset)
}

/// Shift count reduced modulo the operand width
pub fn shift_count(ty: &Type, count: i64) -> u32 {
    let bits = i64::from(ty.bits());
    if bits == 24 {
        (count as u32) % 24
    } else {
        (count & (bits - 1)) as u32
    }
}

/// Result of `lhs op rhs` on values of type `ty`
pub fn binary(op: BinOp, ty: &Type, a: i64, b: i64) -> Result<i64> {
    let shift = ty.fixed_shift();
    let v = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul if shift > 0 => a.wrapping_mul(b) >> shift,
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => {
            return Err(Error::runtime("division by zero"));
        }
        BinOp::Div if shift > 0 => (a << shift) / b,
        BinOp::Div => a.wrapping_div(b),
        BinOp::Rem => a.wrapping_rem(b),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => a << shift_count(ty, b),
        // Values are kept sign-extended, so this is arithmetic for signed
        // types and logical for unsigned ones.
        BinOp::Shr => a >> shift_count(ty, b),
    };
    Ok(ty.wrap(v))
}

/// Value of `v: from` converted to `to`
pub fn convert(from: &Type, to: &Type, v: i64) -> i64 {
    if *to == Type::Bool {
        return i64::from(v != 0);
    }
    let (sf, st) = (from.fixed_shift(), to.fixed_shift());
    let scaled = if st >= sf { v << (st - sf) } else { v >> (sf - st) };
    to.wrap(scaled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{CmpOp, GlobalVariable, IrParam, Symbol};
    use crate::compiler::types::FixedKind;

    #[test]
    fn test_binary_wraps() {
        assert_eq!(binary(BinOp::Mul, &Type::U8, 120, 6).unwrap(), 208);
        assert_eq!(binary(BinOp::Add, &Type::I8, 127, 1).unwrap(), -128);
        assert_eq!(binary(BinOp::Shr, &Type::I16, -4, 1).unwrap(), -2);
        assert_eq!(binary(BinOp::Shr, &Type::U16, 0x8000, 15).unwrap(), 1);
        assert_eq!(binary(BinOp::Shl, &Type::U8, 1, 9).unwrap(), 2);
        assert_eq!(binary(BinOp::Shl, &Type::U24, 1, 25).unwrap(), 2);
        assert_eq!(binary(BinOp::Div, &Type::I8, -7, 2).unwrap(), -3);
        assert!(binary(BinOp::Rem, &Type::U8, 1, 0).is_err());
    }

    #[test]
    fn test_fixed_point() {
        let f = Type::Fixed(FixedKind::F8_8);
        // 1.5 * 2.0 = 3.0
        assert_eq!(binary(BinOp::Mul, &f, 0x180, 0x200).unwrap(), 0x300);
        // 3.0 / 2.0 = 1.5
        assert_eq!(binary(BinOp::Div, &f, 0x300, 0x200).unwrap(), 0x180);
        assert_eq!(convert(&Type::U8, &f, 3), 0x300);
        assert_eq!(convert(&f, &Type::U8, 0x3FF), 3);
        assert_eq!(convert(&Type::U16, &Type::Bool, 256), 1);
        assert_eq!(convert(&Type::I8, &Type::U16, -1), 0xFFFF);
    }

    #[test]
    fn test_globals_strings_and_output() {
        let mut p = IrProgram::new("m");
        p.globals.push(GlobalVariable {
            module: "m".into(),
            name: "count".into(),
            ty: Type::U16,
            init: Some(7),
        });
        p.strings.intern("hi");

        let mut f = IrFunction::new(Symbol::new("m", "main", vec![]), Type::U16);
        let ptr = f.registers.alloc(Type::ptr(Type::U16));
        let v = f.registers.alloc(Type::U16);
        let w = f.registers.alloc(Type::U16);
        let s = f.registers.alloc(Type::ptr(Type::String));
        f.instructions = vec![
            IrInstruction::AddressOf(ptr, "count".into()),
            IrInstruction::Load(v, ptr),
            IrInstruction::Binary(BinOp::Add, w, v, Operand::Imm(1)),
            IrInstruction::Store(ptr, w),
            IrInstruction::LoadString(s, 0),
            IrInstruction::Call(None, Callee::Runtime(RuntimeFn::PrintString), vec![s]),
            IrInstruction::Call(None, Callee::Runtime(RuntimeFn::PrintU16), vec![w]),
            IrInstruction::Return(Some(w)),
        ];
        p.functions.push(f);

        let mut interp = Interpreter::new(&p).unwrap();
        assert_eq!(interp.call("main", &[]).unwrap(), Some(8));
        assert_eq!(interp.output(), "hi8");
        assert_eq!(interp.global("count").unwrap(), 8);
    }

    #[test]
    fn test_depth_limit() {
        let sym = Symbol::new("m", "forever", vec![]);
        let mut f = IrFunction::new(sym.clone(), Type::U8);
        let x = f.registers.alloc(Type::U8);
        f.params.push(IrParam {
            name: "x".into(),
            reg: x,
        });
        let r = f.registers.alloc(Type::U8);
        let c = f.registers.alloc(Type::Bool);
        f.instructions = vec![
            IrInstruction::Compare(CmpOp::Eq, c, x, Operand::Imm(0)),
            IrInstruction::Call(Some(r), Callee::Function(sym), vec![x]),
            IrInstruction::Return(Some(r)),
        ];
        let mut p = IrProgram::new("m");
        p.functions.push(f);
        let mut interp = Interpreter::new(&p).unwrap().with_limits(1_000, 16);
        let err = interp.call("forever", &[1]).unwrap_err();
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn test_deep_call_chain_uses_heap_frames() {
        // countdown(n) = n == 0 ? 0 : countdown(n - 1)
        let sym = Symbol::new("m", "countdown", vec![]);
        let mut f = IrFunction::new(sym.clone(), Type::U16);
        let n = f.registers.alloc(Type::U16);
        f.params.push(IrParam {
            name: "n".into(),
            reg: n,
        });
        let c = f.registers.alloc(Type::Bool);
        let m = f.registers.alloc(Type::U16);
        let r = f.registers.alloc(Type::U16);
        f.instructions = vec![
            IrInstruction::Compare(CmpOp::Eq, c, n, Operand::Imm(0)),
            IrInstruction::JumpIfNot(c, "recurse".into()),
            IrInstruction::Return(Some(n)),
            IrInstruction::Label("recurse".into()),
            IrInstruction::Binary(BinOp::Sub, m, n, Operand::Imm(1)),
            IrInstruction::Call(Some(r), Callee::Function(sym), vec![m]),
            IrInstruction::Return(Some(r)),
        ];
        let mut p = IrProgram::new("m");
        p.functions.push(f);

        let mut interp = Interpreter::new(&p).unwrap().with_limits(10_000_000, 60_001);
        assert_eq!(interp.call("countdown", &[60_000]).unwrap(), Some(0));
        let mut interp = Interpreter::new(&p).unwrap().with_limits(10_000_000, 60_000);
        assert!(matches!(interp.call("countdown", &[60_000]), Err(Error::Runtime(_))));
    }
}
