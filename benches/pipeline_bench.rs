use criterion::{black_box, criterion_group, criterion_main, Criterion};
use retroc::compiler::ast::*;
use retroc::compiler::ir::{BinOp, CmpOp};
use retroc::compiler::{CompileOptions, Compiler, Optimizer, Target, Type};

/// `sum_N(n) { let s = 0; for i in 0..n { s = s + i * N; } return s; }` for N in 0..count
fn wide_module(count: usize) -> Module {
    let mut module = Module::new("bench");
    for k in 0..count {
        module = module.with_function(FunctionDecl::new(
            format!("sum_{}", k),
            vec![("n", Type::U16.into())],
            Type::U16,
            vec![
                let_("s", Type::U16, int(0, Type::U16)),
                for_range(
                    "i",
                    Type::U16,
                    int(0, Type::U16),
                    local("n", Type::U16),
                    vec![assign(
                        "s",
                        bin(
                            BinOp::Add,
                            local("s", Type::U16),
                            bin(BinOp::Mul, local("i", Type::U16), int(k as i64, Type::U16)),
                        ),
                    )],
                ),
                if_(
                    cmp(CmpOp::Eq, local("s", Type::U16), int(0, Type::U16)),
                    vec![ret(int(1, Type::U16))],
                    None,
                ),
                ret(local("s", Type::U16)),
            ],
        ));
    }
    module
}

fn pipeline_benchmark(c: &mut Criterion) {
    let module = wide_module(64);

    for target in Target::ALL {
        let compiler = Compiler::new(CompileOptions {
            target,
            ..CompileOptions::default()
        });
        c.bench_function(&format!("compile 64 functions ({})", target.id()), |b| {
            b.iter(|| compiler.compile(black_box(&module)).unwrap())
        });
    }

    let sequential = Compiler::new(CompileOptions {
        parallel: false,
        ..CompileOptions::default()
    });
    c.bench_function("compile 64 functions (c99, sequential)", |b| {
        b.iter(|| sequential.compile(black_box(&module)).unwrap())
    });
}

fn optimizer_benchmark(c: &mut Criterion) {
    let compiler = Compiler::new(CompileOptions {
        opt_level: 0,
        ..CompileOptions::default()
    });
    let program = compiler.build_ir(&wide_module(64)).unwrap();

    c.bench_function("optimize 64 functions", |b| {
        b.iter(|| {
            let mut p = program.clone();
            Optimizer::new(2).optimize(black_box(&mut p))
        })
    });
}

criterion_group!(benches, pipeline_benchmark, optimizer_benchmark);
criterion_main!(benches);
