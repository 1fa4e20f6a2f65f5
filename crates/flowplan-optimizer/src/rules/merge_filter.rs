use flowplan_core::error::Result;
use flowplan_operators::{ExpressionPlan, LogicalPlan, OperatorType};
use tracing::debug;

use super::{filter_predicate, set_filter_predicate};
use crate::pattern::{Match, Pattern};
use crate::rule::{ChangedRegion, Rule};

/// `Filter(a) -> Filter(b)` becomes `Filter(a AND b)`.
///
/// The combined predicate is built from deep copies of both predicates. The
/// lower filter's alias survives, since it names the rows downstream sees.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeFilter;

impl Rule for MergeFilter {
    fn name(&self) -> &str {
        "MergeFilter"
    }

    fn description(&self) -> &str {
        "Coalesce two chained filters into one conjunction"
    }

    fn pattern(&self) -> Result<Pattern> {
        Pattern::chain(&[OperatorType::Filter, OperatorType::Filter])
    }

    fn check(&self, plan: &mut LogicalPlan, m: &Match) -> Result<bool> {
        // the upper filter's rows must not be consumed anywhere else
        Ok(plan.successors(m.get(0)?).len() == 1)
    }

    fn transform(&self, plan: &mut LogicalPlan, m: &Match) -> Result<ChangedRegion> {
        let upper = m.get(0)?;
        let lower = m.get(1)?;
        let merged = ExpressionPlan::conjunction(
            filter_predicate(plan, upper)?,
            filter_predicate(plan, lower)?,
        )?;
        let successors = plan.successors(lower).to_vec();
        let lower_op = plan.remove_and_reconnect(lower)?;
        set_filter_predicate(plan, upper, merged)?;
        if lower_op.alias.is_some() {
            plan.operator_mut(upper)?.alias = lower_op.alias;
        }
        debug!(upper = %upper, lower = %lower, "merged filters");

        let mut region = ChangedRegion::new(vec![upper]);
        for s in successors {
            region.push(s);
        }
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_operators::{Expr, Operator};

    #[test]
    fn merges_two_filters_into_a_conjunction() {
        let mut plan = LogicalPlan::new();
        let l = plan.add(Operator::load("in", None));
        let a = ExpressionPlan::from_expr(&Expr::col(0).gt(Expr::lit(1))).unwrap();
        let b = ExpressionPlan::from_expr(&Expr::col(1).lt(Expr::lit(9))).unwrap();
        let f1 = plan.add(Operator::filter(a.clone()).with_alias("B"));
        let f2 = plan.add(Operator::filter(b.clone()).with_alias("C"));
        let s = plan.add(Operator::store("out"));
        plan.connect(l, f1).unwrap();
        plan.connect(f1, f2).unwrap();
        plan.connect(f2, s).unwrap();

        let m = Match { nodes: vec![f1, f2] };
        assert!(MergeFilter.check(&mut plan, &m).unwrap());
        MergeFilter.transform(&mut plan, &m).unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.successors(f1), &[s]);
        let merged = plan.operator(f1).unwrap();
        assert_eq!(merged.alias.as_deref(), Some("C"));
        let expected = ExpressionPlan::conjunction(&a, &b).unwrap();
        assert!(merged.predicate().unwrap().is_equal(&expected));
        plan.validate().unwrap();
    }

    #[test]
    fn shared_upper_filter_is_left_alone() {
        let mut plan = LogicalPlan::new();
        let l = plan.add(Operator::load("in", None));
        let t = ExpressionPlan::from_expr(&Expr::lit(true)).unwrap();
        let f1 = plan.add(Operator::filter(t.clone()));
        let f2 = plan.add(Operator::filter(t));
        let s = plan.add(Operator::store("other"));
        plan.connect(l, f1).unwrap();
        plan.connect(f1, f2).unwrap();
        plan.connect(f1, s).unwrap();
        let m = Match { nodes: vec![f1, f2] };
        assert!(!MergeFilter.check(&mut plan, &m).unwrap());
    }
}
