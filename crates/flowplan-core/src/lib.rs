#![forbid(unsafe_code)]
//! flowplan-core: shared kernel for the flowplan optimizer.
//!
//! This crate contains only *pure* types, small helpers, and interfaces
//! (traits) that other crates implement. There is **no I/O** and **no async**
//! here.
//!
//! Crates that use this:
//! - flowplan-operators: relational operators and expression sub-plans built on `OperatorGraph`.
//! - flowplan-planner: builds plans, owns sessions and load/store dependency resolution.
//! - flowplan-optimizer: pattern matching and rewrite rules over the plan graph.
//! - flowplan-exec: implements the storage-adapter traits and the reference engine.

pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod schema;
pub mod storage;
pub mod types;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
