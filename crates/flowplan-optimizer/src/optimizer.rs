//! The rule-application loop.
//!
//! Rule sets run one after another. Within a set, every enabled rule is
//! applied repeatedly (MATCH, CHECK, TRANSFORM, rescan) until no rule of the
//! set fires in a whole iteration, or the iteration ceiling is reached.

use std::collections::{BTreeMap, HashSet};

use flowplan_core::config::{FailurePolicy, OptimizerConfig, RescanPolicy};
use flowplan_core::error::{Error, Result};
use flowplan_core::hash::Hash256;
use flowplan_core::id::NodeId;
use flowplan_operators::LogicalPlan;
use serde::Serialize;
use tracing::{debug, debug_span, info, info_span, warn};

use crate::map_keys::MapKeysPruneHelper;
use crate::rule::{Rule, RuleSet, RuleTrace};
use crate::rules::{FilterAboveForeach, MergeFilter, SplitFilter};

/// Summary of one optimization pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationReport {
    pub iterations: usize,
    /// Successful applications per rule name.
    pub applications: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
    pub hit_ceiling: bool,
    /// Rules disabled during the pass after failing under best-effort policy.
    pub disabled_rules: Vec<String>,
    pub map_key_loads: usize,
    #[serde(skip)]
    pub trace: Vec<RuleTrace>,
}

impl OptimizationReport {
    pub fn rules_applied(&self) -> usize {
        self.applications.values().sum()
    }

    pub fn applied(&self, rule: &str) -> usize {
        self.applications.get(rule).copied().unwrap_or(0)
    }

    fn warn(&mut self, msg: String) {
        warn!("{msg}");
        self.warnings.push(msg);
    }
}

pub struct PlanOptimizer {
    sets: Vec<RuleSet>,
    config: OptimizerConfig,
}

impl PlanOptimizer {
    /// An optimizer with no rules.
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            sets: Vec::new(),
            config,
        }
    }

    /// Split conjunctions, push the pieces above ForEach operators, then
    /// merge whatever filters ended up adjacent.
    pub fn with_default_rules(config: OptimizerConfig) -> Self {
        let mut opt = Self::new(config);
        opt.add_rule_set(RuleSet::new("split").with_rule(SplitFilter));
        opt.add_rule_set(RuleSet::new("pushdown").with_rule(FilterAboveForeach));
        opt.add_rule_set(RuleSet::new("merge").with_rule(MergeFilter));
        opt
    }

    pub fn add_rule_set(&mut self, set: RuleSet) {
        self.sets.push(set);
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn rule_sets(&self) -> &[RuleSet] {
        &self.sets
    }

    /// Optimize `plan` in place.
    pub fn optimize(&self, plan: &mut LogicalPlan) -> Result<OptimizationReport> {
        let _pass = info_span!("optimize", operators = plan.len()).entered();
        self.config.validate()?;
        plan.validate()?;
        let mut report = OptimizationReport::default();
        let mut disabled: HashSet<String> = HashSet::new();

        for set in &self.sets {
            let _set = debug_span!("rule_set", name = %set.name).entered();
            let mut seen: HashSet<Hash256> = HashSet::new();
            seen.insert(plan.fingerprint()?);
            let mut set_iterations = 0;
            loop {
                if set_iterations >= self.config.max_iterations {
                    report.hit_ceiling = true;
                    report.warn(format!(
                        "rule set '{}' stopped after {} iterations without reaching a fixpoint",
                        set.name, self.config.max_iterations
                    ));
                    break;
                }
                set_iterations += 1;
                report.iterations += 1;

                let mut changed = false;
                for rule in &set.rules {
                    if self.config.is_disabled(rule.name()) || disabled.contains(rule.name()) {
                        continue;
                    }
                    let applied =
                        self.apply_rule(rule.as_ref(), plan, &mut report, &mut disabled, set_iterations)?;
                    changed |= applied > 0;
                }
                if !changed {
                    debug!(set = %set.name, iterations = set_iterations, "reached fixpoint");
                    break;
                }
                if !seen.insert(plan.fingerprint()?) {
                    report.warn(format!(
                        "rule set '{}' revisited an earlier plan; stopping",
                        set.name
                    ));
                    break;
                }
            }
        }

        if self.config.prune_map_keys {
            report.map_key_loads = MapKeysPruneHelper.run(plan)?;
        }
        report.disabled_rules = disabled.into_iter().collect();
        report.disabled_rules.sort();
        info!(
            iterations = report.iterations,
            rules_applied = report.rules_applied(),
            "optimization finished"
        );
        Ok(report)
    }

    /// Apply one rule until it stops matching in the rescanned region.
    /// Returns the number of successful transforms.
    fn apply_rule(
        &self,
        rule: &dyn Rule,
        plan: &mut LogicalPlan,
        report: &mut OptimizationReport,
        disabled: &mut HashSet<String>,
        iteration: usize,
    ) -> Result<usize> {
        let name = rule.name().to_string();
        let pattern = rule.pattern()?;
        pattern.validate()?;

        let mut scope: Option<Vec<NodeId>> = None;
        let mut applied = 0;
        loop {
            if applied >= self.config.max_iterations {
                report.hit_ceiling = true;
                report.warn(format!(
                    "rule '{name}' applied {applied} times in one iteration; moving on"
                ));
                return Ok(applied);
            }

            let snapshot = match self.config.failure_policy {
                FailurePolicy::BestEffort => Some(plan.clone()),
                FailurePolicy::Abort => None,
            };
            let before = self.config.enable_trace.then(|| plan.to_string());

            let outcome = self.match_and_transform(rule, plan, scope.as_deref());
            match outcome {
                Ok(None) => return Ok(applied),
                Ok(Some(region)) => {
                    applied += 1;
                    *report.applications.entry(name.clone()).or_default() += 1;
                    debug!(rule = %name, iteration, touched = region.len(), "rule applied");
                    if let Some(before) = before {
                        report.trace.push(RuleTrace {
                            rule_name: name.clone(),
                            iteration,
                            before,
                            after: plan.to_string(),
                        });
                    }
                    scope = match self.config.rescan {
                        RescanPolicy::Region => Some(region),
                        RescanPolicy::Whole => None,
                    };
                }
                Err(e) => match (&self.config.failure_policy, snapshot) {
                    (FailurePolicy::BestEffort, Some(snapshot)) => {
                        *plan = snapshot;
                        disabled.insert(name.clone());
                        report.warn(format!("rule '{name}' disabled for this pass: {e}"));
                        return Ok(applied);
                    }
                    _ => {
                        return Err(match e {
                            e @ (Error::RuleInvariant { .. } | Error::Rule { .. }) => e,
                            e => e.in_rule(name),
                        })
                    }
                },
            }
        }
    }

    /// First checked match in scope, transformed. `None` when nothing fires.
    fn match_and_transform(
        &self,
        rule: &dyn Rule,
        plan: &mut LogicalPlan,
        scope: Option<&[NodeId]>,
    ) -> Result<Option<Vec<NodeId>>> {
        let matches = rule.pattern()?.find_matches(plan, scope)?;
        for m in matches {
            if !m.nodes.iter().all(|n| plan.contains(*n)) {
                continue;
            }
            if !rule.check(plan, &m)? {
                continue;
            }
            let region = rule.transform(plan, &m)?;
            if self.config.validate_after_transform {
                plan.validate().map_err(|e| Error::RuleInvariant {
                    rule: rule.name().to_string(),
                    detail: e.to_string(),
                })?;
            }
            return Ok(Some(region.with_neighbors(plan)));
        }
        Ok(None)
    }
}

impl Default for PlanOptimizer {
    fn default() -> Self {
        Self::with_default_rules(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;
    use crate::rule::{ChangedRegion, FnRule};
    use flowplan_operators::{Expr, ExpressionPlan, Operator, OperatorType};

    fn chain_of_filters(n: usize) -> LogicalPlan {
        let mut plan = LogicalPlan::new();
        let mut prev = plan.add(Operator::load("in", None));
        for i in 0..n {
            let f = plan.add(Operator::filter(
                ExpressionPlan::from_expr(&Expr::col(0).gt(Expr::lit(i as i32))).unwrap(),
            ));
            plan.connect(prev, f).unwrap();
            prev = f;
        }
        let s = plan.add(Operator::store("out"));
        plan.connect(prev, s).unwrap();
        plan
    }

    #[test]
    fn merge_reaches_a_fixpoint() {
        let mut plan = chain_of_filters(4);
        let opt = PlanOptimizer::with_default_rules(OptimizerConfig::default());
        let report = opt.optimize(&mut plan).unwrap();
        assert_eq!(plan.len(), 3);
        assert!(!report.hit_ceiling);
        assert_eq!(report.applied("MergeFilter"), 3);
    }

    #[test]
    fn break_the_graph_rule_is_an_invariant_error() {
        let rule = FnRule::new("Orphan", Pattern::leaf(OperatorType::Filter).unwrap(), |plan, m| {
            let f = m.anchor()?;
            let pred = plan.predecessors(f)[0];
            plan.disconnect(pred, f)?;
            Ok(ChangedRegion::new(vec![f]))
        });
        let mut opt = PlanOptimizer::new(OptimizerConfig::default());
        opt.add_rule_set(RuleSet::new("bad").with_rule(rule));
        let mut plan = chain_of_filters(1);
        let err = opt.optimize(&mut plan).unwrap_err();
        assert!(matches!(err, Error::RuleInvariant { ref rule, .. } if rule == "Orphan"));
    }

    #[test]
    fn best_effort_restores_the_plan_and_disables_the_rule() {
        let rule = FnRule::new("Fails", Pattern::leaf(OperatorType::Filter).unwrap(), |plan, m| {
            plan.operator_mut(m.anchor()?)?.alias = Some("touched".into());
            Err(Error::Plan("boom".into()))
        });
        let config = OptimizerConfig::default().with_failure_policy(FailurePolicy::BestEffort);
        let mut opt = PlanOptimizer::new(config);
        opt.add_rule_set(RuleSet::new("bad").with_rule(rule));
        let mut plan = chain_of_filters(2);
        let (original, _) = plan.clone_with_map().unwrap();

        let report = opt.optimize(&mut plan).unwrap();
        assert!(plan.is_equal(&original));
        assert_eq!(report.disabled_rules, vec!["Fails".to_string()]);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn abort_policy_wraps_transform_errors() {
        let rule = FnRule::new("Fails", Pattern::leaf(OperatorType::Filter).unwrap(), |_, _| {
            Err(Error::Plan("boom".into()))
        });
        let mut opt = PlanOptimizer::new(OptimizerConfig::default());
        opt.add_rule_set(RuleSet::new("bad").with_rule(rule));
        let mut plan = chain_of_filters(1);
        let err = opt.optimize(&mut plan).unwrap_err();
        assert!(matches!(err, Error::Rule { ref rule, .. } if rule == "Fails"));
    }

    #[test]
    fn ceiling_stops_a_rule_that_never_converges() {
        // rewrites the predicate forever without changing the structure
        let rule = FnRule::new("Spin", Pattern::leaf(OperatorType::Filter).unwrap(), |plan, m| {
            let f = m.anchor()?;
            let op = plan.operator_mut(f)?;
            let next = match op.alias.as_deref() {
                Some("a") => "b",
                _ => "a",
            };
            op.alias = Some(next.into());
            Ok(ChangedRegion::new(vec![f]))
        });
        let config = OptimizerConfig::default().with_max_iterations(5);
        let mut opt = PlanOptimizer::new(config);
        opt.add_rule_set(RuleSet::new("spin").with_rule(rule));
        let mut plan = chain_of_filters(1);
        let report = opt.optimize(&mut plan).unwrap();
        assert!(report.hit_ceiling);
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let mut plan = chain_of_filters(3);
        let config = OptimizerConfig::default().disable_rule("mergefilter");
        let report = PlanOptimizer::with_default_rules(config)
            .optimize(&mut plan)
            .unwrap();
        assert_eq!(report.rules_applied(), 0);
        assert_eq!(plan.len(), 5);
    }

    #[test]
    fn trace_records_before_and_after() {
        let mut plan = chain_of_filters(2);
        let config = OptimizerConfig::default().with_trace(true);
        let report = PlanOptimizer::with_default_rules(config)
            .optimize(&mut plan)
            .unwrap();
        assert_eq!(report.trace.len(), 1);
        assert_eq!(report.trace[0].rule_name, "MergeFilter");
        assert_ne!(report.trace[0].before, report.trace[0].after);
    }
}
