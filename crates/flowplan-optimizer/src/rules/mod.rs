//! Built-in rewrite rules.

mod filter_above_foreach;
mod merge_filter;
mod split_filter;

pub use filter_above_foreach::FilterAboveForeach;
pub use merge_filter::MergeFilter;
pub use split_filter::SplitFilter;

use flowplan_core::error::{Error, Result};
use flowplan_core::id::NodeId;
use flowplan_operators::{ExpressionPlan, LogicalPlan};

/// The Filter predicate of `id`, or an invariant error.
pub(crate) fn filter_predicate(plan: &LogicalPlan, id: NodeId) -> Result<&ExpressionPlan> {
    let op = plan.operator(id)?;
    op.predicate()
        .ok_or_else(|| Error::Invariant(format!("{} is not a filter", op.describe())))
}

pub(crate) fn set_filter_predicate(
    plan: &mut LogicalPlan,
    id: NodeId,
    predicate: ExpressionPlan,
) -> Result<()> {
    let op = plan.operator_mut(id)?;
    let describe = op.describe();
    let slot = op
        .predicate_mut()
        .ok_or_else(|| Error::Invariant(format!("{describe} is not a filter")))?;
    *slot = predicate;
    Ok(())
}
