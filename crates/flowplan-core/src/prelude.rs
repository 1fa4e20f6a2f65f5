//! Convenient re-exports for downstream crates.

pub use crate::config::{FailurePolicy, OptimizerConfig, RescanPolicy};
pub use crate::error::{Error, Result};
pub use crate::graph::{OperatorGraph, StructuralEq};
pub use crate::hash::Hash256;
pub use crate::id::{NodeId, Uid, UidGenerator};
pub use crate::schema::{DataType, FieldSchema, Schema};
pub use crate::storage::{LocationResolver, PathResolver, ResourceStatistics, StorageAdapter};
pub use crate::types::{Tuple, Value};
