use std::collections::HashSet;

use flowplan_core::error::{Error, Result};
use flowplan_core::id::{NodeId, Uid};
use flowplan_operators::{LogicalPlan, OperatorType};
use tracing::debug;

use super::{filter_predicate, set_filter_predicate};
use crate::pattern::{Match, Pattern};
use crate::rule::{ChangedRegion, Rule};

/// Moves a Filter that sits below a ForEach to just above it.
///
/// Starting at the ForEach's only output, consecutive filters are walked
/// downwards and the first one whose predicate reads only uids the ForEach's
/// input already exposes is moved. Every node passed on the way must have a
/// single output, otherwise other consumers would start seeing filtered rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterAboveForeach;

impl FilterAboveForeach {
    fn eligible_filter(plan: &mut LogicalPlan, foreach: NodeId) -> Result<Option<NodeId>> {
        let (pred, first) = match (plan.predecessors(foreach), plan.successors(foreach)) {
            ([p], [s]) => (*p, *s),
            _ => return Ok(None),
        };
        let Some(input) = plan.schema(pred)? else {
            return Ok(None);
        };
        let available: HashSet<Uid> = input.uids().into_iter().collect();

        let mut current = first;
        loop {
            if plan.op_type(current)? != OperatorType::Filter {
                return Ok(None);
            }
            let predicate = filter_predicate(plan, current)?.clone();
            if let Some(uids) = plan.expression_uids(current, &predicate)? {
                if uids.iter().all(|u| available.contains(u)) {
                    return Ok(Some(current));
                }
            }
            match plan.successors(current) {
                [next] => current = *next,
                _ => return Ok(None),
            }
        }
    }
}

impl Rule for FilterAboveForeach {
    fn name(&self) -> &str {
        "FilterAboveForeach"
    }

    fn description(&self) -> &str {
        "Push a filter above a ForEach when its input exposes every column the filter reads"
    }

    fn pattern(&self) -> Result<Pattern> {
        Pattern::chain(&[OperatorType::ForEach, OperatorType::Filter])
    }

    fn check(&self, plan: &mut LogicalPlan, m: &Match) -> Result<bool> {
        Ok(Self::eligible_filter(plan, m.get(0)?)?.is_some())
    }

    fn transform(&self, plan: &mut LogicalPlan, m: &Match) -> Result<ChangedRegion> {
        let foreach = m.get(0)?;
        let filter = Self::eligible_filter(plan, foreach)?
            .ok_or_else(|| Error::Invariant("no eligible filter below ForEach".into()))?;
        let pred = plan.predecessors(foreach)[0];
        let input = plan
            .schema(pred)?
            .ok_or_else(|| Error::Invariant("ForEach input schema vanished".into()))?;
        let output = plan
            .schema(foreach)?
            .ok_or_else(|| Error::Invariant("ForEach schema is unknown".into()))?;

        // columns are positions in the ForEach's output; re-point them by uid
        let mut predicate = filter_predicate(plan, filter)?.clone();
        predicate.remap_columns(|_, column| {
            let uid = output
                .field(column)
                .map(|f| f.uid)
                .ok_or_else(|| Error::Invariant(format!("column ${column} not in ForEach output")))?;
            input
                .index_of_uid(uid)
                .ok_or_else(|| Error::Invariant(format!("uid {uid} not in ForEach input")))
        })?;

        let above = plan.predecessors(filter)[0];
        let below = plan.successors(filter).to_vec();
        plan.splice_out(filter)?;
        set_filter_predicate(plan, filter, predicate)?;
        plan.insert_between(pred, filter, foreach)?;
        debug!(filter = %filter, foreach = %foreach, "moved filter above ForEach");

        let mut region = ChangedRegion::new(vec![pred, filter, foreach, above]);
        for s in below {
            region.push(s);
        }
        Ok(region)
    }
}
