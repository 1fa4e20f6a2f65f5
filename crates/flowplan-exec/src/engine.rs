//! Engine contract: `compile` a logical plan into dependency-ordered stages,
//! `execute` them and report one job per store.

use std::collections::HashMap;

use flowplan_core::id::NodeId;
use flowplan_core::types::Tuple;
use flowplan_operators::LogicalPlan;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Core(#[from] flowplan_core::error::Error),
    #[error("invalid plan: {0}")]
    Invalid(String),
    #[error("evaluation failed: {0}")]
    Eval(String),
    #[error("{operator}: {source}")]
    Operator {
        operator: String,
        #[source]
        source: Box<ExecError>,
    },
    #[error("serialization: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExecError {
    pub(crate) fn at(self, operator: impl Into<String>) -> Self {
        ExecError::Operator {
            operator: operator.into(),
            source: Box::new(self),
        }
    }
}

/// Operators that produce one store's output.
#[derive(Debug, Clone)]
pub struct Stage {
    pub store: NodeId,
    pub location: String,
    /// Topological order, ending with the store.
    pub operators: Vec<NodeId>,
    /// Indices of stages whose output this stage loads.
    pub depends_on: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    pub plan: LogicalPlan,
    /// Stages in dependency order.
    pub stages: Vec<Stage>,
    /// Output width of every operator whose schema is known.
    pub widths: HashMap<NodeId, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
    /// Never ran because a job it depends on did not complete.
    Pending,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobHandle {
    pub location: String,
    pub status: JobStatus,
    #[serde(skip)]
    pub records: Vec<Tuple>,
    pub error: Option<String>,
}

impl JobHandle {
    pub fn completed(stage: &Stage, records: Vec<Tuple>) -> Self {
        Self {
            location: stage.location.clone(),
            status: JobStatus::Completed,
            records,
            error: None,
        }
    }

    pub fn failed(stage: &Stage, error: impl Into<String>) -> Self {
        Self {
            location: stage.location.clone(),
            status: JobStatus::Failed,
            records: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn pending(stage: &Stage, reason: impl Into<String>) -> Self {
        Self {
            location: stage.location.clone(),
            status: JobStatus::Pending,
            records: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

pub trait ExecutionEngine {
    fn compile(&self, plan: &LogicalPlan) -> Result<PhysicalPlan, ExecError>;

    fn execute(&self, physical: &PhysicalPlan) -> Result<Vec<JobHandle>, ExecError>;
}
