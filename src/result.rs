//! Execution results and the tool invocation records attached to them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ErrorDetail;
use crate::executor::state::{StateTransition, TaskState};

/// Terminal status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// One sandbox operation requested by the backend during a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: serde_json::Value,
    /// Captured output, truncated to the invocation cap
    pub output: String,
    pub truncated: bool,
    /// Whether the operation completed without a sandbox error
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub duration_ms: u64,
}

/// Bookkeeping attached to every result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultMetadata {
    pub tool_invocations: Vec<ToolInvocation>,
    pub latency_ms: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub state_history: Vec<TaskState>,
    /// Timestamped transitions behind `state_history`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<StateTransition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Wall time from the first attempt starting to the task finishing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_ms: Option<u64>,
}

/// Outcome of one task. Built once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    task_id: String,
    worker_role: Option<String>,
    status: ExecutionStatus,
    output: String,
    error: Option<ErrorDetail>,
    metadata: ResultMetadata,
}

impl ExecutionResult {
    pub fn success(
        task_id: impl Into<String>,
        worker_role: impl Into<String>,
        output: impl Into<String>,
        metadata: ResultMetadata,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            worker_role: Some(worker_role.into()),
            status: ExecutionStatus::Success,
            output: output.into(),
            error: None,
            metadata,
        }
    }

    pub fn failure(
        task_id: impl Into<String>,
        worker_role: Option<String>,
        output: impl Into<String>,
        error: ErrorDetail,
        metadata: ResultMetadata,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            worker_role,
            status: ExecutionStatus::Failure,
            output: output.into(),
            error: Some(error),
            metadata,
        }
    }

    pub fn timeout(
        task_id: impl Into<String>,
        worker_role: impl Into<String>,
        partial_output: impl Into<String>,
        error: ErrorDetail,
        metadata: ResultMetadata,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            worker_role: Some(worker_role.into()),
            status: ExecutionStatus::Timeout,
            output: partial_output.into(),
            error: Some(error),
            metadata,
        }
    }

    /// Failure for a task that never reached a worker.
    pub fn rejected(task_id: impl Into<String>, error: ErrorDetail) -> Self {
        let metadata = ResultMetadata {
            state_history: vec![TaskState::Pending, TaskState::Failed],
            ..ResultMetadata::default()
        };
        Self::failure(task_id, None, String::new(), error, metadata)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn worker_role(&self) -> Option<&str> {
        self.worker_role.as_deref()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> Option<&ErrorDetail> {
        self.error.as_ref()
    }

    pub fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }
}
