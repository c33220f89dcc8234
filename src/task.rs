//! # Task Results
//!
//! The single output shape every sub-agent produces. `TaskResult` is a tagged
//! union with one variant per status, so the master agent's translation step
//! is forced by the compiler to handle all four outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Structured failure payload carried by [`TaskResult::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl TaskError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.retryable(),
        }
    }

    /// Override the code's default retryability, e.g. a one-shot external
    /// call that must not be repeated.
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }
}

/// The sub-agent contract's only output shape.
///
/// Which fields are populated is fully determined by the status: payload
/// shapes are mutually exclusive by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    /// The task completed; `data` is the domain payload
    Success { data: serde_json::Value },
    /// The task needs more information from the caller before it can run
    NeedsInfo {
        required: Vec<String>,
        clarification: String,
    },
    /// The task failed with a taxonomy-coded error
    Error { error: TaskError },
    /// The task produced best-effort data with caveats
    Partial {
        data: serde_json::Value,
        metadata: serde_json::Value,
    },
}

impl TaskResult {
    pub fn success(data: serde_json::Value) -> Self {
        TaskResult::Success { data }
    }

    pub fn needs_info(required: Vec<String>, clarification: impl Into<String>) -> Self {
        TaskResult::NeedsInfo {
            required,
            clarification: clarification.into(),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        TaskResult::Error {
            error: TaskError::new(code, message),
        }
    }

    pub fn partial(data: serde_json::Value, metadata: serde_json::Value) -> Self {
        TaskResult::Partial { data, metadata }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success { .. })
    }

    /// The domain payload, present only for `Success` and `Partial`.
    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            TaskResult::Success { data } | TaskResult::Partial { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// Wire envelope a sub-agent's pipeline wraps around a finished result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Id of the request message this responds to
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock time the pipeline spent on the task
    pub processing_time_ms: u64,
    #[serde(flatten)]
    pub result: TaskResult,
}

impl TaskResponse {
    pub fn new(request_id: impl Into<String>, result: TaskResult, processing_time_ms: u64) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp: Utc::now(),
            processing_time_ms,
            result,
        }
    }
}
