use criterion::{criterion_group, criterion_main, Criterion};
use flowplan_core::prelude::{DataType, FieldSchema, OptimizerConfig, Schema};
use flowplan_operators::{Expr, LogicalPlan};
use flowplan_optimizer::PlanOptimizer;
use flowplan_planner::{ItemSpec, PlanBuilder};

/// Load followed by `depth` rounds of ForEach + conjunctive Filter.
fn make_plan(depth: usize) -> LogicalPlan {
    let mut b = PlanBuilder::new();
    let fields = (0..8)
        .map(|i| FieldSchema::new(format!("c{i}"), DataType::Int))
        .collect();
    b.load("L0", "/bench/in", Some(Schema::new(fields))).unwrap();
    let mut input = "L0".to_string();
    for d in 0..depth {
        let project = format!("P{d}");
        let items = (0..8)
            .map(|i| ItemSpec::new(Expr::named(format!("c{i}"))))
            .collect();
        b.foreach(&project, &input, items).unwrap();
        let filter = format!("F{d}");
        let pred = Expr::named(format!("c{}", d % 8))
            .gt(Expr::lit(d as i32))
            .and(Expr::named(format!("c{}", (d + 1) % 8)).lt(Expr::lit(1000)));
        b.filter(&filter, &project, pred).unwrap();
        input = filter;
    }
    b.store(&input, "/bench/out").unwrap();
    b.into_plan()
}

fn bench_optimize(c: &mut Criterion) {
    let plan = make_plan(16);
    let optimizer = PlanOptimizer::with_default_rules(OptimizerConfig::default());
    c.bench_function("optimize_depth_16", |b| {
        b.iter(|| {
            let mut p = plan.clone();
            optimizer.optimize(&mut p).unwrap();
        })
    });
}

fn bench_schema(c: &mut Criterion) {
    let plan = make_plan(32);
    c.bench_function("schema_resolution_depth_32", |b| {
        b.iter(|| {
            let mut p = plan.clone();
            p.invalidate_all();
            p.resolve_schemas().unwrap();
        })
    });
}

criterion_group!(planning, bench_optimize, bench_schema);
criterion_main!(planning);
