//! Rule abstraction: a pattern, an applicability check and an in-place
//! transform.
//!
//! `check` must not change the plan's structure; it receives `&mut` only so
//! that it can force lazily derived schemas. `transform` mutates the plan and
//! reports the nodes it touched so the optimizer can rescan just that region.

use std::fmt;

use flowplan_core::error::Result;
use flowplan_core::id::NodeId;
use flowplan_operators::LogicalPlan;

use crate::pattern::{Match, Pattern};

/// Nodes created, moved or rewired by one transform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedRegion {
    pub nodes: Vec<NodeId>,
}

impl ChangedRegion {
    pub fn new(nodes: Vec<NodeId>) -> Self {
        let mut region = Self::default();
        for n in nodes {
            region.push(n);
        }
        region
    }

    pub fn push(&mut self, node: NodeId) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    /// The region plus the live immediate predecessors of its nodes, so that
    /// matches anchored just upstream of a rewrite are found again.
    pub fn with_neighbors(&self, plan: &LogicalPlan) -> Vec<NodeId> {
        let mut out = Vec::new();
        for n in &self.nodes {
            if !plan.contains(*n) {
                continue;
            }
            for p in plan.predecessors(*n).iter().chain(std::iter::once(n)) {
                if !out.contains(p) {
                    out.push(*p);
                }
            }
        }
        out
    }
}

pub trait Rule {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn pattern(&self) -> Result<Pattern>;

    /// Whether the rule applies to this match. `false` is not an error.
    fn check(&self, _plan: &mut LogicalPlan, _m: &Match) -> Result<bool> {
        Ok(true)
    }

    fn transform(&self, plan: &mut LogicalPlan, m: &Match) -> Result<ChangedRegion>;
}

type CheckFn = dyn Fn(&mut LogicalPlan, &Match) -> Result<bool>;
type TransformFn = dyn Fn(&mut LogicalPlan, &Match) -> Result<ChangedRegion>;

/// A rule assembled from closures.
pub struct FnRule {
    name: String,
    pattern: Pattern,
    check: Box<CheckFn>,
    transform: Box<TransformFn>,
}

impl FnRule {
    pub fn new<T>(name: impl Into<String>, pattern: Pattern, transform: T) -> Self
    where
        T: Fn(&mut LogicalPlan, &Match) -> Result<ChangedRegion> + 'static,
    {
        Self {
            name: name.into(),
            pattern,
            check: Box::new(|_, _| Ok(true)),
            transform: Box::new(transform),
        }
    }

    pub fn with_check<C>(mut self, check: C) -> Self
    where
        C: Fn(&mut LogicalPlan, &Match) -> Result<bool> + 'static,
    {
        self.check = Box::new(check);
        self
    }
}

impl fmt::Debug for FnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule").field("name", &self.name).finish()
    }
}

impl Rule for FnRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn pattern(&self) -> Result<Pattern> {
        Ok(self.pattern.clone())
    }

    fn check(&self, plan: &mut LogicalPlan, m: &Match) -> Result<bool> {
        (self.check)(plan, m)
    }

    fn transform(&self, plan: &mut LogicalPlan, m: &Match) -> Result<ChangedRegion> {
        (self.transform)(plan, m)
    }
}

/// Rules that are run together to a fixpoint, in registration order.
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<Box<dyn Rule>>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule<R: Rule + 'static>(mut self, rule: R) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("RuleSet")
            .field("name", &self.name)
            .field("rules", &names)
            .finish()
    }
}

/// A trace entry for a single rule application.
#[derive(Debug, Clone)]
pub struct RuleTrace {
    pub rule_name: String,
    pub iteration: usize,
    pub before: String,
    pub after: String,
}
