use autotrace::{CallArgs, Signature, Symbolic, Tensor, Var, VectorArgs, VectorMode};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Chained Rosenbrock over a length-n vector.
fn rosenbrock(x: Var, n: usize) -> Var {
    let head = x.slice(0, n - 1);
    let tail = x.slice(1, n);
    let a = (head - 1.0).square();
    let b = (tail - head.square()).square();
    (a + b * 100.0).sum()
}

fn point(n: usize) -> Tensor {
    let values: Vec<f64> = (0..n).map(|i| 0.5 + 0.01 * i as f64).collect();
    Tensor::vector(&values)
}

/// Trace + differentiate + compile, from scratch each iteration.
fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_gradient");
    for n in [2, 10, 100] {
        let call = CallArgs::new().arg(point(n));
        group.bench_with_input(BenchmarkId::new("fresh", n), &call, |b, call| {
            b.iter(|| {
                let mut g = autotrace::gradient(
                    Signature::new(["x"]),
                    move |fr| Ok(rosenbrock(fr.arg("x")?, n)),
                    Vec::new(),
                );
                black_box(g.compile_function(black_box(call)).unwrap())
            })
        });
    }
    group.finish();
}

/// Cached call path: bind, key lookup and evaluation only.
fn bench_cached_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_gradient_call");
    for n in [2, 10, 100] {
        let call = CallArgs::new().arg(point(n));
        let mut g = autotrace::gradient(
            Signature::new(["x"]),
            move |fr| Ok(rosenbrock(fr.arg("x")?, n)),
            Vec::new(),
        );
        g.call(&call).unwrap();
        group.bench_with_input(BenchmarkId::new("call", n), &call, |b, call| {
            b.iter(|| black_box(g.call(black_box(call)).unwrap()))
        });
    }
    group.finish();
}

/// Flat-vector value, gradient and Hessian-vector product in one evaluation.
fn bench_vector_args(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_args");
    for n in [10, 100] {
        let call = CallArgs::new().arg(point(n));
        let s = Symbolic::new(Signature::new(["x"]), move |fr| Ok(rosenbrock(fr.arg("x")?, n)));
        let va = VectorArgs::new(s, &call, VectorMode::ALL).unwrap();
        let theta = va.initial_vector().to_vec();
        let dir = vec![1.0; n];
        group.bench_with_input(BenchmarkId::new("all", n), &theta, |b, theta| {
            b.iter(|| black_box(va.call(black_box(theta), Some(dir.as_slice())).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_cached_call, bench_vector_args);
criterion_main!(benches);
