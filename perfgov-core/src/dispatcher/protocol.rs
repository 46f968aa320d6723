//! Messages exchanged between the dispatcher and its worker threads.
//!
//! Everything crossing the boundary is owned data; workers never see the
//! dispatcher's state.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Correlation id of one dispatched task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task sent to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: TaskId,
    pub kind: String,
    pub payload: Value,
}

impl WorkerRequest {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: TaskId::new(),
            kind: kind.into(),
            payload,
        }
    }
}

/// Result reported by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerResponse {
    Success { id: TaskId, result: Value },
    Failure { id: TaskId, error: String },
}

impl WorkerResponse {
    pub fn id(&self) -> TaskId {
        match self {
            WorkerResponse::Success { id, .. } | WorkerResponse::Failure { id, .. } => *id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkerResponse::Success { .. })
    }
}
