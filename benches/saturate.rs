use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tensor_eqsat::*;

const EXPRS: &[&str] = &[
    "(add 1 (add 2 (add 3 (add 4 (add 5 (add 6 7))))))",
    "(mul (add x 0) (mul 1 (add y (neg (neg z)))))",
    "(add (mul (sub a b) 1) (add (mul c 0) (get@0 (tuple d e f))))",
    "(neg (neg (add (mul x y) (mul y x))))",
];

const PIPELINE: &str = "(relu:f32[64,128] (add:f32[64,128] \
    (marker:f32[64,128] (matmul:f32[64,128] \
        (identity:f32[64,256] a:f32[64,256]) \
        (transpose:f32[256,128] (transpose:f32[128,256] b:f32[256,128])))) \
    (add:f32[128] c:f32[128] 0)))";

fn saturate_algebraic(expr: &RecExpr, scheduler: bool) -> Runner {
    let runner = Runner::default().with_iter_limit(10).with_expr(expr);
    let runner = if scheduler {
        runner.with_scheduler(BackoffScheduler::default())
    } else {
        runner
    };
    runner.run(&rules::algebraic().rules).unwrap()
}

fn saturation_benches(c: &mut Criterion) {
    let mut group = c.benchmark_group("saturate");
    for (i, s) in EXPRS.iter().enumerate() {
        let expr: RecExpr = s.parse().unwrap();
        group.bench_with_input(BenchmarkId::new("simple", i), &expr, |b, e| {
            b.iter(|| saturate_algebraic(e, false))
        });
        group.bench_with_input(BenchmarkId::new("backoff", i), &expr, |b, e| {
            b.iter(|| saturate_algebraic(e, true))
        });
    }
    group.finish();
}

fn pipeline_benches(c: &mut Criterion) {
    let session = Session::new();
    let expr: RecExpr = PIPELINE.parse().unwrap();
    let sets = ["markers", "algebraic", "lowering", "fusion"];
    c.bench_function("optimize_pipeline", |b| {
        b.iter(|| session.optimize(black_box(&expr), &sets).unwrap())
    });
}

fn search_and_extract_benches(c: &mut Criterion) {
    let runners: Vec<Runner> = EXPRS
        .iter()
        .map(|s| saturate_algebraic(&s.parse().unwrap(), false))
        .collect();

    let patterns: Vec<Pattern> = [
        "(add ?a (add ?b ?c))",
        "(mul ?a (add ?b ?c))",
        "(neg ?x)",
        "(get@?i (tuple ?xs...))",
    ]
    .iter()
    .map(|s| s.parse().unwrap())
    .collect();

    let mut group = c.benchmark_group("search");
    for (i, runner) in runners.iter().enumerate() {
        group.bench_with_input(BenchmarkId::from_parameter(i), &runner.egraph, |b, egraph| {
            b.iter(|| {
                for pat in &patterns {
                    black_box(pat.search(egraph));
                }
            })
        });
    }
    group.finish();

    let mut group = c.benchmark_group("extract");
    for (i, runner) in runners.iter().enumerate() {
        group.bench_with_input(BenchmarkId::from_parameter(i), runner, |b, runner| {
            b.iter(|| {
                Extractor::new(&runner.egraph, NodeCount)
                    .find_best(runner.roots[0])
                    .unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    saturation_benches,
    pipeline_benches,
    search_and_extract_benches
);
criterion_main!(benches);
