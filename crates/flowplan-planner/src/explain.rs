//! Human-readable plan listings.

use std::collections::HashMap;
use std::fmt::Write as _;

use flowplan_core::error::Result;
use flowplan_core::id::NodeId;
use flowplan_operators::LogicalPlan;
use serde::Serialize;

/// One operator of an explained plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplainRow {
    pub index: usize,
    pub operator: String,
    pub inputs: Vec<usize>,
    /// `None` when the schema cannot be derived.
    pub schema: Option<String>,
}

/// Rows in topological order. Inputs refer to row indices.
pub fn explain_rows(plan: &mut LogicalPlan) -> Result<Vec<ExplainRow>> {
    let order = plan.graph().topological_order()?;
    let index: HashMap<NodeId, usize> = order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
    let mut rows = Vec::with_capacity(order.len());
    for (i, id) in order.iter().enumerate() {
        let schema = plan.schema(*id)?.map(|s| s.to_string());
        let inputs = plan
            .predecessors(*id)
            .iter()
            .filter_map(|p| index.get(p).copied())
            .collect();
        rows.push(ExplainRow {
            index: i,
            operator: plan.operator(*id)?.to_string(),
            inputs,
            schema,
        });
    }
    Ok(rows)
}

/// Text listing headed by the plan fingerprint.
pub fn explain(plan: &mut LogicalPlan) -> Result<String> {
    let rows = explain_rows(plan)?;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "plan {} ({} operators)",
        plan.fingerprint()?.short(),
        rows.len()
    );
    for row in &rows {
        let _ = write!(out, "  {}: {}", row.index, row.operator);
        if !row.inputs.is_empty() {
            let inputs: Vec<String> = row.inputs.iter().map(usize::to_string).collect();
            let _ = write!(out, " <- [{}]", inputs.join(","));
        }
        let _ = writeln!(
            out,
            "\n       schema: {}",
            row.schema.as_deref().unwrap_or("unknown")
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ItemSpec, PlanBuilder};
    use flowplan_core::schema::{DataType, FieldSchema, Schema};
    use flowplan_operators::Expr;

    #[test]
    fn lists_operators_with_inputs_and_schemas() {
        let mut b = PlanBuilder::new();
        let schema = Schema::new(vec![FieldSchema::new("a", DataType::Int)]);
        b.load("A", "/in", Some(schema)).unwrap();
        b.load("raw", "/raw", None).unwrap();
        b.filter("B", "A", Expr::named("a").gt(Expr::lit(1))).unwrap();
        b.foreach("C", "raw", vec![ItemSpec::new(Expr::named("$0"))])
            .unwrap();
        let mut plan = b.into_plan();

        let rows = explain_rows(&mut plan).unwrap();
        assert_eq!(rows.len(), 4);
        let filter = rows.iter().find(|r| r.operator.starts_with("B =")).unwrap();
        assert_eq!(filter.inputs.len(), 1);
        assert_eq!(filter.schema.as_deref(), Some("(a:int#1)"));
        let foreach = rows.iter().find(|r| r.operator.starts_with("C =")).unwrap();
        assert_eq!(foreach.schema, None);

        let text = explain(&mut plan).unwrap();
        assert!(text.starts_with("plan "));
        assert!(text.contains("(4 operators)"));
        assert!(text.contains("schema: unknown"));
    }
}
