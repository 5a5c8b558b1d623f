//! Error types for the orchestrator.
//!
//! Each domain has its own `thiserror` enum. Everything that can end a task
//! converts into an [`ErrorDetail`], the structured form carried on
//! `ExecutionResult`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

/// Closed taxonomy of failure kinds reported on results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "NoSuitableWorkerError")]
    NoSuitableWorker,
    #[serde(rename = "CommandTimeoutError")]
    CommandTimeout,
    #[serde(rename = "CommandExecutionError")]
    CommandExecution,
    #[serde(rename = "FileNotFoundError")]
    FileNotFound,
    #[serde(rename = "FileSizeLimitError")]
    FileSizeLimit,
    #[serde(rename = "DirectoryNotFoundError")]
    DirectoryNotFound,
    #[serde(rename = "FileWriteError")]
    FileWrite,
    #[serde(rename = "PathNotAllowedError")]
    PathNotAllowed,
    #[serde(rename = "InvalidToolCallError")]
    InvalidToolCall,
    ToolLoopExceeded,
    #[serde(rename = "GenerationTimeoutError")]
    GenerationTimeout,
    #[serde(rename = "GenerationError")]
    Generation,
    Cancelled,
    #[serde(rename = "ValidationError")]
    Validation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSuitableWorker => "NoSuitableWorkerError",
            Self::CommandTimeout => "CommandTimeoutError",
            Self::CommandExecution => "CommandExecutionError",
            Self::FileNotFound => "FileNotFoundError",
            Self::FileSizeLimit => "FileSizeLimitError",
            Self::DirectoryNotFound => "DirectoryNotFoundError",
            Self::FileWrite => "FileWriteError",
            Self::PathNotAllowed => "PathNotAllowedError",
            Self::InvalidToolCall => "InvalidToolCallError",
            Self::ToolLoopExceeded => "ToolLoopExceeded",
            Self::GenerationTimeout => "GenerationTimeoutError",
            Self::Generation => "GenerationError",
            Self::Cancelled => "Cancelled",
            Self::Validation => "ValidationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Matcher,
    Sandbox,
    GenerationPort,
    Executor,
    Coordinator,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Matcher => "matcher",
            Self::Sandbox => "sandbox",
            Self::GenerationPort => "generation_port",
            Self::Executor => "executor",
            Self::Coordinator => "coordinator",
        };
        write!(f, "{s}")
    }
}

/// Structured failure attached to an `ExecutionResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub component: Component,
    pub message: String,
    pub suggestion: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, component: Component, message: impl Into<String>) -> Self {
        Self {
            kind,
            component,
            message: message.into(),
            suggestion: default_suggestion(kind).to_string(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.kind, self.message, self.component)
    }
}

fn default_suggestion(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NoSuitableWorker => {
            "Add a worker whose capabilities cover the task, or configure a default worker"
        }
        ErrorKind::CommandTimeout => {
            "Increase the command timeout or split the command into smaller steps"
        }
        ErrorKind::CommandExecution => {
            "Check that the command exists and does not require elevated privileges"
        }
        ErrorKind::FileNotFound => "Verify the file path; list the directory to find the file",
        ErrorKind::FileSizeLimit => "Read a smaller file or raise the read limit",
        ErrorKind::DirectoryNotFound => "Create the directory first or use an existing path",
        ErrorKind::FileWrite => "Check permissions and free space at the target path",
        ErrorKind::PathNotAllowed => "Use a path inside the sandbox root",
        ErrorKind::InvalidToolCall => {
            "Use one of run_command, read_file, write_file, list_files with valid arguments"
        }
        ErrorKind::ToolLoopExceeded => {
            "Simplify the task or raise the maximum number of tool round trips"
        }
        ErrorKind::GenerationTimeout => "Raise the per-task timeout or simplify the task",
        ErrorKind::Generation => "Check backend availability and credentials, then retry",
        ErrorKind::Cancelled => "Re-run the batch without cancelling it",
        ErrorKind::Validation => "Provide a non-empty task description and valid dependency ids",
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Errors raised before a task reaches the executor.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinationError {
    #[error("Task {task_id} is invalid: {reason}")]
    Validation { task_id: String, reason: String },

    #[error("No suitable worker for task {task_id} among {pool_size} workers")]
    NoSuitableWorker { task_id: String, pool_size: usize },

    #[error("Default worker {role} is not in the pool (task {task_id})")]
    DefaultWorkerMissing { task_id: String, role: String },
}

impl CoordinationError {
    pub fn detail(&self) -> ErrorDetail {
        match self {
            Self::Validation { task_id, reason } => ErrorDetail::new(
                ErrorKind::Validation,
                Component::Coordinator,
                self.to_string(),
            )
            .with_context("task_id", task_id)
            .with_context("reason", reason),
            Self::NoSuitableWorker { task_id, pool_size } => ErrorDetail::new(
                ErrorKind::NoSuitableWorker,
                Component::Matcher,
                self.to_string(),
            )
            .with_context("task_id", task_id)
            .with_context("pool_size", pool_size),
            Self::DefaultWorkerMissing { task_id, role } => ErrorDetail::new(
                ErrorKind::NoSuitableWorker,
                Component::Matcher,
                self.to_string(),
            )
            .with_suggestion(format!("Add a worker with role '{role}' to the pool"))
            .with_context("task_id", task_id)
            .with_context("default_role", role),
        }
    }
}

/// Tool sandbox errors. Every operation returns these as values.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    #[error("Command timed out after {timeout:?}: {command}")]
    CommandTimeout {
        command: String,
        timeout: Duration,
        partial_output: String,
    },

    #[error("Command failed: {command}: {reason}")]
    CommandExecution {
        command: String,
        reason: String,
        partial_output: String,
    },

    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("File {} is {size} bytes, limit is {limit}", path.display())]
    FileSizeLimit { path: PathBuf, size: u64, limit: u64 },

    #[error("Directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("Failed to write {}: {reason}", path.display())]
    FileWrite { path: PathBuf, reason: String },

    #[error("Path escapes sandbox root: {path}")]
    PathNotAllowed { path: String },

    #[error("Invalid call to tool {tool}: {reason}")]
    InvalidToolCall { tool: String, reason: String },
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CommandTimeout { .. } => ErrorKind::CommandTimeout,
            Self::CommandExecution { .. } => ErrorKind::CommandExecution,
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::FileSizeLimit { .. } => ErrorKind::FileSizeLimit,
            Self::DirectoryNotFound { .. } => ErrorKind::DirectoryNotFound,
            Self::FileWrite { .. } => ErrorKind::FileWrite,
            Self::PathNotAllowed { .. } => ErrorKind::PathNotAllowed,
            Self::InvalidToolCall { .. } => ErrorKind::InvalidToolCall,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        let detail = ErrorDetail::new(self.kind(), Component::Sandbox, self.to_string());
        match self {
            Self::CommandTimeout {
                command,
                timeout,
                partial_output,
            } => detail
                .with_context("command", command)
                .with_context("timeout_secs", timeout.as_secs_f64())
                .with_context("partial_output", partial_output),
            Self::CommandExecution {
                command,
                partial_output,
                ..
            } => detail
                .with_context("command", command)
                .with_context("partial_output", partial_output),
            Self::FileNotFound { path }
            | Self::DirectoryNotFound { path }
            | Self::FileWrite { path, .. } => detail.with_context("path", path.display()),
            Self::FileSizeLimit { path, size, limit } => detail
                .with_context("path", path.display())
                .with_context("size", size)
                .with_context("limit", limit),
            Self::PathNotAllowed { path } => detail.with_context("path", path),
            Self::InvalidToolCall { tool, .. } => detail.with_context("tool", tool),
        }
    }
}

/// LLM provider errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} timed out")]
    Timeout { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} does not support tool calling")]
    ToolsUnsupported { provider: String },
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. } | Self::RateLimited { .. } | Self::Timeout { .. }
        )
    }

    pub fn detail(&self) -> ErrorDetail {
        let provider = match self {
            Self::RequestFailed { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Timeout { provider }
            | Self::InvalidResponse { provider, .. }
            | Self::AuthFailed { provider }
            | Self::ToolsUnsupported { provider } => provider,
        };
        let detail = ErrorDetail::new(
            ErrorKind::Generation,
            Component::GenerationPort,
            self.to_string(),
        )
        .with_context("provider", provider)
        .with_context("transient", self.is_transient());
        match self {
            Self::AuthFailed { .. } => detail.with_suggestion("Check the provider API key"),
            Self::RateLimited { .. } => {
                detail.with_suggestion("Lower concurrency or wait before retrying")
            }
            _ => detail,
        }
    }
}

/// Errors that end a single execution attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("Generation timed out after {timeout:?}")]
    GenerationTimeout { timeout: Duration },

    #[error("Tool loop exceeded {limit} round trips")]
    ToolLoopExceeded { limit: usize },

    #[error("Tool call failed: {0}")]
    Tool(#[from] SandboxError),

    #[error("Generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Task cancelled")]
    Cancelled,
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::GenerationTimeout { .. } => ErrorKind::GenerationTimeout,
            Self::ToolLoopExceeded { .. } => ErrorKind::ToolLoopExceeded,
            Self::Tool(e) => e.kind(),
            Self::Llm(_) => ErrorKind::Generation,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        match self {
            Self::GenerationTimeout { timeout } => ErrorDetail::new(
                ErrorKind::GenerationTimeout,
                Component::Executor,
                self.to_string(),
            )
            .with_context("timeout_secs", timeout.as_secs_f64()),
            Self::ToolLoopExceeded { limit } => ErrorDetail::new(
                ErrorKind::ToolLoopExceeded,
                Component::GenerationPort,
                self.to_string(),
            )
            .with_context("max_tool_rounds", limit),
            Self::Tool(e) => e.detail(),
            Self::Llm(e) => e.detail(),
            Self::Cancelled => {
                ErrorDetail::new(ErrorKind::Cancelled, Component::Coordinator, self.to_string())
            }
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_with_taxonomy_names() {
        let json = serde_json::to_string(&ErrorKind::NoSuitableWorker).unwrap();
        assert_eq!(json, "\"NoSuitableWorkerError\"");
        let json = serde_json::to_string(&ErrorKind::ToolLoopExceeded).unwrap();
        assert_eq!(json, "\"ToolLoopExceeded\"");
        assert_eq!(ErrorKind::Validation.to_string(), "ValidationError");
    }

    #[test]
    fn every_kind_has_a_suggestion() {
        let kinds = [
            ErrorKind::NoSuitableWorker,
            ErrorKind::CommandTimeout,
            ErrorKind::CommandExecution,
            ErrorKind::FileNotFound,
            ErrorKind::FileSizeLimit,
            ErrorKind::DirectoryNotFound,
            ErrorKind::FileWrite,
            ErrorKind::PathNotAllowed,
            ErrorKind::InvalidToolCall,
            ErrorKind::ToolLoopExceeded,
            ErrorKind::GenerationTimeout,
            ErrorKind::Generation,
            ErrorKind::Cancelled,
            ErrorKind::Validation,
        ];
        for kind in kinds {
            let detail = ErrorDetail::new(kind, Component::Executor, "x");
            assert!(!detail.suggestion.is_empty(), "{kind} has no suggestion");
        }
    }

    #[test]
    fn sandbox_error_detail_carries_context() {
        let err = SandboxError::FileSizeLimit {
            path: PathBuf::from("/tmp/big.txt"),
            size: 200,
            limit: 100,
        };
        let detail = err.detail();
        assert_eq!(detail.kind, ErrorKind::FileSizeLimit);
        assert_eq!(detail.component, Component::Sandbox);
        assert_eq!(detail.context.get("limit").map(String::as_str), Some("100"));
    }

    #[test]
    fn transient_llm_errors() {
        let failed = LlmError::RequestFailed {
            provider: "p".into(),
            reason: "503".into(),
        };
        let auth = LlmError::AuthFailed {
            provider: "p".into(),
        };
        assert!(failed.is_transient());
        assert!(!auth.is_transient());
        assert_eq!(
            ExecutionError::from(auth).detail().kind,
            ErrorKind::Generation
        );
    }
}
