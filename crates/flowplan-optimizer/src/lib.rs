//! Rule-based optimizer for flowplan logical plans.
//!
//! A rule pairs a structural [`Pattern`] with a `check` and an in-place
//! `transform`. [`PlanOptimizer`] drives rule sets to a fixpoint under an
//! iteration ceiling, then runs [`MapKeysPruneHelper`].

#![forbid(unsafe_code)]

pub mod map_keys;
pub mod optimizer;
pub mod pattern;
pub mod rule;
pub mod rules;

pub use map_keys::{MapKeyAnnotation, MapKeysPruneHelper};
pub use optimizer::{OptimizationReport, PlanOptimizer};
pub use pattern::{Match, Pattern};
pub use rule::{ChangedRegion, FnRule, Rule, RuleSet, RuleTrace};
pub use rules::{FilterAboveForeach, MergeFilter, SplitFilter};
