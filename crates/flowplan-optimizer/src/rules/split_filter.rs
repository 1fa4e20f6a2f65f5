use flowplan_core::error::{Error, Result};
use flowplan_operators::{LogicalPlan, Operator, OperatorType};
use tracing::debug;

use super::{filter_predicate, set_filter_predicate};
use crate::pattern::{Match, Pattern};
use crate::rule::{ChangedRegion, Rule};

/// `Filter(a AND b)` becomes `Filter(a) -> Filter(b)`.
///
/// Each side is a deep copy of the operand's whole sub-expression. Every
/// application lowers the AND depth of the filters involved, so repeated
/// application terminates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitFilter;

impl Rule for SplitFilter {
    fn name(&self) -> &str {
        "SplitFilter"
    }

    fn description(&self) -> &str {
        "Split a conjunctive filter into chained filters"
    }

    fn pattern(&self) -> Result<Pattern> {
        Pattern::leaf(OperatorType::Filter)
    }

    fn check(&self, plan: &mut LogicalPlan, m: &Match) -> Result<bool> {
        Ok(filter_predicate(plan, m.anchor()?)?.is_conjunction())
    }

    fn transform(&self, plan: &mut LogicalPlan, m: &Match) -> Result<ChangedRegion> {
        let filter = m.anchor()?;
        let (left, right) = filter_predicate(plan, filter)?
            .split_conjunction()?
            .ok_or_else(|| Error::Invariant("predicate root is not AND".into()))?;

        set_filter_predicate(plan, filter, left)?;
        let lower = plan.add(Operator::filter(right));

        // the new filter takes over every output slot of the original
        let successors = plan.successors(filter).to_vec();
        for (slot, s) in successors.iter().enumerate() {
            let (_, to_pos) = plan.disconnect(filter, *s)?;
            plan.connect_at(lower, slot, *s, to_pos)?;
        }
        plan.connect(filter, lower)?;
        debug!(filter = %filter, new_filter = %lower, "split conjunctive filter");

        let mut region = ChangedRegion::new(vec![filter, lower]);
        for s in successors {
            region.push(s);
        }
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::MergeFilter;
    use flowplan_operators::{Expr, ExpressionPlan};

    #[test]
    fn split_then_merge_round_trips() {
        let mut plan = LogicalPlan::new();
        let l = plan.add(Operator::load("in", None));
        let pred = Expr::col(0)
            .gt(Expr::lit(1))
            .and(Expr::col(1).is_null().or(Expr::col(2).lt(Expr::lit(3))));
        let f = plan.add(
            Operator::filter(ExpressionPlan::from_expr(&pred).unwrap()).with_alias("B"),
        );
        let s1 = plan.add(Operator::store("o1"));
        let s2 = plan.add(Operator::store("o2"));
        plan.connect(l, f).unwrap();
        plan.connect(f, s1).unwrap();
        plan.connect(f, s2).unwrap();
        let (original, _) = plan.clone_with_map().unwrap();

        let m = Match { nodes: vec![f] };
        assert!(SplitFilter.check(&mut plan, &m).unwrap());
        let region = SplitFilter.transform(&mut plan, &m).unwrap();
        let lower = region.nodes[1];
        plan.validate().unwrap();
        assert_eq!(plan.successors(f), &[lower]);
        assert_eq!(plan.successors(lower), &[s1, s2]);
        assert_eq!(
            plan.operator(f).unwrap().predicate().unwrap().to_string(),
            "($0 > 1)"
        );

        let m = Match {
            nodes: vec![f, lower],
        };
        assert!(MergeFilter.check(&mut plan, &m).unwrap());
        MergeFilter.transform(&mut plan, &m).unwrap();
        assert!(plan.is_equal(&original));
    }

    #[test]
    fn non_conjunction_is_not_split() {
        let mut plan = LogicalPlan::new();
        let f = plan.add(Operator::filter(
            ExpressionPlan::from_expr(&Expr::col(0).gt(Expr::lit(1))).unwrap(),
        ));
        assert!(!SplitFilter.check(&mut plan, &Match { nodes: vec![f] }).unwrap());
    }
}
