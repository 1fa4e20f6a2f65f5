//! Structural properties of plans: cloning, edge bookkeeping, schema pins.

use flowplan_core::prelude::{DataType, FieldSchema, OperatorGraph, Schema};
use flowplan_operators::{Expr, ExpressionPlan, LogicalPlan, Operator};
use flowplan_planner::{ItemSpec, PlanBuilder};

fn schema(fields: &[(&str, DataType)]) -> Schema {
    Schema::new(
        fields
            .iter()
            .map(|(n, t)| FieldSchema::new(*n, *t))
            .collect(),
    )
}

#[test]
fn clone_is_equal_and_independent() {
    let mut b = PlanBuilder::new();
    b.load(
        "A",
        "/a",
        Some(schema(&[("x", DataType::Int), ("y", DataType::CharArray)])),
    )
    .unwrap();
    let f = b.filter("B", "A", Expr::named("x").gt(Expr::lit(1))).unwrap();
    b.foreach("C", "B", vec![ItemSpec::new(Expr::named("y"))])
        .unwrap();
    b.store("C", "/out").unwrap();
    let plan = b.into_plan();

    let (mut copy, map) = plan.clone_with_map().unwrap();
    assert!(copy.is_equal(&plan));
    assert_eq!(copy.fingerprint().unwrap(), plan.fingerprint().unwrap());

    let copied_filter = map[&f];
    let replacement = ExpressionPlan::from_expr(&Expr::col(0).lt(Expr::lit(0))).unwrap();
    *copy
        .operator_mut(copied_filter)
        .unwrap()
        .predicate_mut()
        .unwrap() = replacement;

    assert!(!copy.is_equal(&plan));
    assert_eq!(
        plan.operator(f).unwrap().predicate().unwrap().to_string(),
        "(x > 1)"
    );
}

#[test]
fn disconnect_restores_edge_lists() {
    let mut g: OperatorGraph<&str> = OperatorGraph::new();
    let a = g.add("a");
    let b = g.add("b");
    let u = g.add("u");
    g.connect(a, u).unwrap();
    g.connect(b, u).unwrap();
    let preds = g.predecessors(u).to_vec();
    let succs = g.successors(a).to_vec();

    let c = g.add("c");
    g.connect(c, u).unwrap();
    g.connect(a, c).unwrap();
    g.disconnect(a, c).unwrap();
    g.disconnect(c, u).unwrap();

    assert_eq!(g.predecessors(u), preds.as_slice());
    assert_eq!(g.successors(a), succs.as_slice());
    assert!(g.predecessors(c).is_empty());
    assert!(g.successors(c).is_empty());
    g.check_consistency().unwrap();
}

#[test]
fn union_of_identical_inputs_keeps_the_schema() {
    let mut b = PlanBuilder::new();
    b.load("A", "/a", Some(schema(&[("x", DataType::Int)]))).unwrap();
    b.load("B", "/b", Some(schema(&[("x", DataType::Int)]))).unwrap();
    let u = b.union("U", &["A", "B"]).unwrap();
    let mut plan = b.into_plan();

    let out = plan.schema(u).unwrap().unwrap();
    assert_eq!(out.len(), 1);
    let field = out.field(0).unwrap();
    assert_eq!(field.alias.as_deref(), Some("x"));
    assert_eq!(field.data_type, DataType::Int);
}

#[test]
fn union_of_incompatible_inputs_is_unknown() {
    let mut b = PlanBuilder::new();
    b.load("A", "/a", Some(schema(&[("x", DataType::Int)]))).unwrap();
    b.load("B", "/b", Some(schema(&[("y", DataType::CharArray)])))
        .unwrap();
    let u = b.union("U", &["A", "B"]).unwrap();
    let mut plan = b.into_plan();
    assert_eq!(plan.schema(u).unwrap(), None);
}

#[test]
fn cross_prefixes_fields_with_input_aliases() {
    let mut b = PlanBuilder::new();
    b.load("A", "/a", Some(schema(&[("x", DataType::Int)]))).unwrap();
    b.load("B", "/b", Some(schema(&[("x", DataType::Int)]))).unwrap();
    let x = b.cross("X", &["A", "B"]).unwrap();
    let mut plan = b.into_plan();

    let out = plan.schema(x).unwrap().unwrap();
    let names: Vec<_> = (0..out.len())
        .map(|i| out.field(i).unwrap().alias.clone().unwrap_or_default())
        .collect();
    assert_eq!(names, vec!["A::x", "B::x"]);
}

#[test]
fn schemas_recompute_after_upstream_change() {
    let mut plan = LogicalPlan::new();
    let l = plan.add(Operator::load("/a", Some(schema(&[("x", DataType::Int)]))));
    let f = plan.add(Operator::filter(
        ExpressionPlan::from_expr(&Expr::col(0).gt(Expr::lit(0))).unwrap(),
    ));
    plan.connect(l, f).unwrap();
    assert_eq!(plan.schema(f).unwrap().map(|s| s.len()), Some(1));

    if let flowplan_operators::OperatorKind::Load(load) = &mut plan.operator_mut(l).unwrap().kind {
        load.declared = Some(schema(&[("x", DataType::Int), ("y", DataType::Long)]));
    }
    assert_eq!(plan.schema(f).unwrap().map(|s| s.len()), Some(2));
}
