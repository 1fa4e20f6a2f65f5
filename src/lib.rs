//! flowplan: a logical-plan dataflow query optimizer.
//!
//! Re-exports the workspace crates under one name:
//! - `flowplan_core`: ids, errors, config, the generic operator graph, schemas
//! - `flowplan_operators`: expression sub-plans, relational operators, `LogicalPlan`
//! - `flowplan_optimizer`: patterns, rules, the fixpoint loop, map-key pruning
//! - `flowplan_planner`: plan builder, YAML scripts, sessions, explain
//! - `flowplan_exec`: engine contract, in-memory storage, local engine

pub use flowplan_core;
pub use flowplan_exec;
pub use flowplan_operators;
pub use flowplan_optimizer;
pub use flowplan_planner;

pub use flowplan_core::config::OptimizerConfig;
pub use flowplan_core::error::{Error, Result};
pub use flowplan_operators::LogicalPlan;
pub use flowplan_optimizer::{OptimizationReport, PlanOptimizer};
pub use flowplan_planner::{parse_script, PlanBuilder, Session};
