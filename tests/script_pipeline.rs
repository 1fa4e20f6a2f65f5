//! YAML scripts through the whole stack: parse, dependency resolution,
//! optimization, explain and local execution.

use flowplan_core::error::Error;
use flowplan_core::types::Value;
use flowplan_exec::json::{from_json_lines, to_json_lines};
use flowplan_exec::{ExecutionEngine, JobStatus, LocalEngine, MemoryStorage};
use flowplan_operators::OperatorType;
use flowplan_optimizer::PlanOptimizer;
use flowplan_planner::{explain, parse_script};

const SCRIPT: &str = r#"
optimizer:
  max_iterations: 20
statements:
  - op: load
    alias: users
    path: data/users
    schema:
      - { name: name, type: chararray }
      - { name: age, type: int }
      - { name: props, type: map }
  - op: foreach
    alias: slim
    input: users
    generate:
      - { expr: { col: name } }
      - { expr: { col: age } }
      - { expr: { lookup: [ { col: props }, city ] }, as: city }
  - op: filter
    alias: adults
    input: slim
    by: { and: [ { ge: [ { col: age }, 18 ] }, { not: { is_null: { col: name } } } ] }
  - op: store
    input: adults
    path: tmp/adults
  - op: load
    alias: again
    path: tmp/adults
    schema:
      - { name: name, type: chararray }
      - { name: age, type: int }
      - { name: city, type: bytearray }
  - op: sort
    alias: ordered
    input: again
    by:
      - { expr: { col: age }, desc: true }
  - op: store
    input: ordered
    path: out/sorted
"#;

const USERS: &str = r#"["ann", 31, {"city": "Oslo", "zip": "0150"}]
["bob", 12, {"city": "Rome"}]
[null, 40, {}]
["cyd", 18, {"zip": "1000"}]
"#;

#[test]
fn script_runs_end_to_end_after_optimization() {
    let parsed = parse_script(SCRIPT, "/work").unwrap();
    assert_eq!(parsed.config.max_iterations, 20);
    let mut session = parsed.session;

    // the second load waits on the first store
    let again = session.node("again").unwrap();
    let waits_on = session.plan().predecessors(again).to_vec();
    assert_eq!(waits_on.len(), 1);
    assert_eq!(session.plan().op_type(waits_on[0]).unwrap(), OperatorType::Store);

    let report = PlanOptimizer::with_default_rules(parsed.config)
        .optimize(session.plan_mut())
        .unwrap();
    assert!(report.applied("SplitFilter") >= 1);
    assert!(report.applied("FilterAboveForeach") >= 1);
    assert!(report.applied("MergeFilter") >= 1);
    assert_eq!(report.map_key_loads, 1);

    let users = session.node("users").unwrap();
    let below_load = session.plan().successors(users).to_vec();
    assert_eq!(session.plan().op_type(below_load[0]).unwrap(), OperatorType::Filter);

    let listing = explain(session.plan_mut()).unwrap();
    assert!(listing.contains("KEYS"));

    let storage = MemoryStorage::new();
    storage
        .insert("/work/data/users", from_json_lines(USERS).unwrap())
        .unwrap();
    let engine = LocalEngine::new(storage.clone());
    let physical = engine.compile(session.plan()).unwrap();
    assert_eq!(physical.stages.len(), 2);
    assert_eq!(physical.stages[1].depends_on, vec![0]);

    let jobs = engine.execute(&physical).unwrap();
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
    let sorted = storage.get("/work/out/sorted").unwrap().unwrap();
    assert_eq!(
        to_json_lines(&sorted).unwrap(),
        "[\"ann\",31,\"Oslo\"]\n[\"cyd\",18,null]\n"
    );
    assert_eq!(sorted[0][0], Value::CharArray("ann".into()));
}

#[test]
fn unknown_alias_reports_the_statement() {
    let src = r#"
statements:
  - op: load
    alias: a
    path: in
    schema:
      - { name: x, type: int }
  - op: filter
    alias: b
    input: a
    by: { gt: [ { col: missing }, 1 ] }
"#;
    match parse_script(src, "/work") {
        Err(Error::UnknownAlias { alias, operator }) => {
            assert_eq!(alias, "missing");
            assert_eq!(operator, "Filter 'b'");
        }
        other => panic!("expected unknown alias, got {other:?}"),
    }
}

#[test]
fn duplicate_output_names_are_rejected() {
    let src = r#"
statements:
  - op: load
    alias: a
    path: in
    schema:
      - { name: x, type: int }
      - { name: y, type: int }
  - op: foreach
    alias: b
    input: a
    generate:
      - { expr: { col: x }, as: z }
      - { expr: { col: y }, as: z }
"#;
    assert!(matches!(
        parse_script(src, "/work"),
        Err(Error::DuplicateSchemaAlias { .. })
    ));
}
