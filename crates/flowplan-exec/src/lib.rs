#![forbid(unsafe_code)]
//! flowplan-exec: the engine contract the planner hands optimized plans to,
//! plus an in-memory storage adapter and a row-at-a-time local engine used
//! to check that rewrites preserve results.

pub mod engine;
pub mod eval;
pub mod json;
pub mod local;
pub mod memory_storage;

pub use engine::{ExecError, ExecutionEngine, JobHandle, JobStatus, PhysicalPlan, Stage};
pub use local::LocalEngine;
pub use memory_storage::MemoryStorage;
