//! Shared fixtures for the integration tests
#![allow(dead_code)]

use retroc::compiler::ast::*;
use retroc::compiler::ir::{BinOp, CmpOp, ConventionRequest, RuntimeFn};
use retroc::compiler::{CompileOptions, Compiler, IrProgram, Target, Type};

/// `fib_tail<N, A, B>(n, a, b)`: tail-recursive Fibonacci step
pub fn fib_tail() -> FunctionDecl {
    let n = || local("n", TypeRef::Param(0));
    let a = || local("a", TypeRef::Param(1));
    let b = || local("b", TypeRef::Param(2));
    FunctionDecl::new(
        "fib_tail",
        vec![
            ("n", TypeRef::Param(0)),
            ("a", TypeRef::Param(1)),
            ("b", TypeRef::Param(2)),
        ],
        TypeRef::Param(1),
        vec![
            if_(
                cmp(CmpOp::Eq, n(), int(0, TypeRef::Param(0))),
                vec![ret(a())],
                None,
            ),
            ret(call_generic(
                "fib_tail",
                vec![TypeRef::Param(0), TypeRef::Param(1), TypeRef::Param(2)],
                vec![
                    bin(BinOp::Sub, n(), int(1, TypeRef::Param(0))),
                    b(),
                    bin(BinOp::Add, a(), b()),
                ],
                TypeRef::Param(1),
            )),
        ],
    )
    .generic(&["N", "A", "B"])
}

fn fib_call(n: Expr) -> Expr {
    call_generic(
        "fib_tail",
        vec![Type::U8.into(), Type::U16.into(), Type::U16.into()],
        vec![n, int(0, Type::U16), int(1, Type::U16)],
        Type::U16,
    )
}

/// `fibonacci(n: u8) -> u16`
pub fn fibonacci() -> FunctionDecl {
    FunctionDecl::new(
        "fibonacci",
        vec![("n", Type::U8.into())],
        Type::U16,
        vec![ret(fib_call(local("n", Type::U8)))],
    )
}

/// Second caller of the same instantiation
pub fn fib_twice() -> FunctionDecl {
    FunctionDecl::new(
        "fib_twice",
        vec![("n", Type::U8.into())],
        Type::U16,
        vec![ret(bin(
            BinOp::Add,
            fib_call(local("n", Type::U8)),
            fib_call(local("n", Type::U8)),
        ))],
    )
}

/// `factorial(n: u8) -> u8`, recursive outside tail position
pub fn factorial() -> FunctionDecl {
    let n = || local("n", Type::U8);
    FunctionDecl::new(
        "factorial",
        vec![("n", Type::U8.into())],
        Type::U8,
        vec![
            if_(
                cmp(CmpOp::Le, n(), int(1, Type::U8)),
                vec![ret(int(1, Type::U8))],
                None,
            ),
            ret(bin(
                BinOp::Mul,
                n(),
                call("factorial", vec![bin(BinOp::Sub, n(), int(1, Type::U8))], Type::U8),
            )),
        ],
    )
}

/// `is_even(n: u8) -> bool`
pub fn is_even() -> FunctionDecl {
    FunctionDecl::new(
        "is_even",
        vec![("n", Type::U8.into())],
        Type::Bool,
        vec![ret(cmp(
            CmpOp::Eq,
            bin(BinOp::And, local("n", Type::U8), int(1, Type::U8)),
            int(0, Type::U8),
        ))],
    )
}

/// `add_smc(a: u16, b: u16) -> u16` under the self-modifying convention
pub fn add_smc() -> FunctionDecl {
    FunctionDecl::new(
        "add_smc",
        vec![("a", Type::U16.into()), ("b", Type::U16.into())],
        Type::U16,
        vec![ret(bin(BinOp::Add, local("a", Type::U16), local("b", Type::U16)))],
    )
    .with_convention(ConventionRequest::Smc)
}

/// `loop_test(count: u8) -> u16`: sums `add_smc(sum, i)` over `0..count`
pub fn loop_test() -> FunctionDecl {
    FunctionDecl::new(
        "loop_test",
        vec![("count", Type::U8.into())],
        Type::U16,
        vec![
            let_("sum", Type::U16, int(0, Type::U16)),
            for_range(
                "i",
                Type::U8,
                int(0, Type::U8),
                local("count", Type::U8),
                vec![assign(
                    "sum",
                    call(
                        "add_smc",
                        vec![local("sum", Type::U16), cast(local("i", Type::U8), Type::U16)],
                        Type::U16,
                    ),
                )],
            ),
            ret(local("sum", Type::U16)),
        ],
    )
}

/// `main()`: prints every fixture's result, one per line
pub fn main_fn() -> FunctionDecl {
    let print = |f: RuntimeFn, e: Expr| Stmt::Expr(runtime(f, vec![e]));
    let newline = || Stmt::Expr(runtime(RuntimeFn::PrintNewline, vec![]));
    FunctionDecl::new(
        "main",
        vec![],
        Type::Void,
        vec![
            Stmt::Expr(runtime(RuntimeFn::PrintString, vec![string("fib=")])),
            print(RuntimeFn::PrintU16, call("fibonacci", vec![int(10, Type::U8)], Type::U16)),
            newline(),
            print(RuntimeFn::PrintU8, call("factorial", vec![int(6, Type::U8)], Type::U8)),
            newline(),
            print(
                RuntimeFn::PrintU8,
                cast(call("is_even", vec![int(4, Type::U8)], Type::Bool), Type::U8),
            ),
            print(
                RuntimeFn::PrintU8,
                cast(call("is_even", vec![int(7, Type::U8)], Type::Bool), Type::U8),
            ),
            newline(),
            print(RuntimeFn::PrintU16, call("loop_test", vec![int(10, Type::U8)], Type::U16)),
            newline(),
            Stmt::Expr(runtime(RuntimeFn::PrintString, vec![string("count=")])),
            print(RuntimeFn::PrintU16, global("count", Type::U16)),
            newline(),
            ret_void(),
        ],
    )
}

/// Stdout `main_fn` produces
pub const EXPECTED_OUTPUT: &str = "fib=55\n208\n10\n45\ncount=7\n";

/// The whole fixture module
pub fn demo_module() -> Module {
    Module::new("demo")
        .with_global("count", Type::U16, Some(7))
        .with_function(fib_tail())
        .with_function(fibonacci())
        .with_function(fib_twice())
        .with_function(factorial())
        .with_function(is_even())
        .with_function(add_smc())
        .with_function(loop_test())
        .with_function(main_fn())
}

/// `demo_module` without SMC requests, for targets lacking the feature
pub fn portable_module() -> Module {
    let mut module = demo_module();
    for f in &mut module.functions {
        f.convention = ConventionRequest::Auto;
    }
    module
}

pub fn options(target: Target) -> CompileOptions {
    CompileOptions {
        target,
        threads: 2,
        ..CompileOptions::default()
    }
}

/// Lowered and optimized IR for `module` at `opt_level`
pub fn optimized(module: &Module, opt_level: u8) -> IrProgram {
    let compiler = Compiler::new(CompileOptions {
        opt_level,
        ..options(Target::C99)
    });
    let mut program = compiler.build_ir(module).unwrap();
    compiler.optimize(&mut program).unwrap();
    program
}
