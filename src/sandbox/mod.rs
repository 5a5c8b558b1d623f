//! Tool sandbox: the only path from a backend tool call to the local system.
//!
//! The tool set is closed: [`ToolRequest`] has one variant per operation and
//! each variant's limits are enforced in [`ToolSandbox::dispatch`].
//! Every operation returns `Result<ToolOutput, SandboxError>`.

mod file;
mod shell;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;
use crate::llm::{ToolCall, ToolDefinition};
use crate::result::ToolInvocation;

pub use shell::requires_elevation;

/// Default wall-clock limit for `run_command`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default byte limit for `read_file`.
pub const DEFAULT_READ_BYTES: u64 = 100_000;

/// Per-operation resource limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLimits {
    pub default_command_timeout: Duration,
    /// Upper bound for timeouts requested by the backend
    pub max_command_timeout: Duration,
    /// Cap for each of stdout and stderr
    pub max_output_bytes: usize,
    pub default_read_bytes: u64,
    /// Upper bound for `max_bytes` requested by the backend
    pub max_read_bytes: u64,
    pub max_write_bytes: usize,
    pub max_list_entries: usize,
    /// Cap for the output kept on a `ToolInvocation` record
    pub invocation_output_cap: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            default_command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_command_timeout: Duration::from_secs(300),
            max_output_bytes: 100 * 1024,
            default_read_bytes: DEFAULT_READ_BYTES,
            max_read_bytes: 1024 * 1024,
            max_write_bytes: 5 * 1024 * 1024,
            max_list_entries: 500,
            invocation_output_cap: 8 * 1024,
        }
    }
}

/// The operations a backend may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    RunCommand,
    ReadFile,
    WriteFile,
    ListFiles,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::RunCommand,
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::ListFiles,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::RunCommand => "run_command",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ListFiles => "list_files",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::RunCommand => {
                "Run a shell command and return its output and exit code. \
                 Commands have a timeout and may not use sudo or other privilege escalation."
            }
            Self::ReadFile => "Read a UTF-8 text file. Files above the byte limit are rejected.",
            Self::WriteFile => {
                "Write content to a file, replacing it if it exists. \
                 The parent directory must already exist."
            }
            Self::ListFiles => {
                "List entries of a directory matching a glob pattern (*, ?, **). \
                 Directories end with '/'."
            }
        }
    }

    fn parameters_schema(&self) -> serde_json::Value {
        match self {
            Self::RunCommand => serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The shell command to execute"},
                    "timeout_seconds": {"type": "integer", "description": "Timeout in seconds (optional, default 30)"}
                },
                "required": ["command"]
            }),
            Self::ReadFile => serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to the file to read"},
                    "max_bytes": {"type": "integer", "description": "Maximum file size to accept (optional, default 100000)"}
                },
                "required": ["path"]
            }),
            Self::WriteFile => serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path to the file to write"},
                    "content": {"type": "string", "description": "Content to write"}
                },
                "required": ["path", "content"]
            }),
            Self::ListFiles => serde_json::json!({
                "type": "object",
                "properties": {
                    "directory": {"type": "string", "description": "Directory to list (default '.')"},
                    "pattern": {"type": "string", "description": "Glob pattern (default '*')"}
                },
                "required": []
            }),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn default_directory() -> String {
    ".".to_string()
}

/// A parsed, typed tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolRequest {
    RunCommand {
        command: String,
        #[serde(default)]
        timeout_seconds: Option<u64>,
    },
    ReadFile {
        path: String,
        #[serde(default)]
        max_bytes: Option<u64>,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ListFiles {
        #[serde(default = "default_directory")]
        directory: String,
        #[serde(default)]
        pattern: Option<String>,
    },
}

impl ToolRequest {
    /// Parse a backend tool call. Arguments may be a JSON object or a string
    /// containing one.
    pub fn from_call(name: &str, arguments: &serde_json::Value) -> Result<Self, SandboxError> {
        let invalid = |reason: String| SandboxError::InvalidToolCall {
            tool: name.to_string(),
            reason,
        };

        let args = match arguments {
            serde_json::Value::String(raw) => serde_json::from_str(raw)
                .map_err(|e| invalid(format!("arguments are not valid JSON: {e}")))?,
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        };

        if !ToolKind::ALL.iter().any(|k| k.name() == name) {
            return Err(invalid("unknown tool".to_string()));
        }

        serde_json::from_value(serde_json::json!({"tool": name, "arguments": args}))
            .map_err(|e| invalid(e.to_string()))
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::RunCommand { .. } => ToolKind::RunCommand,
            Self::ReadFile { .. } => ToolKind::ReadFile,
            Self::WriteFile { .. } => ToolKind::WriteFile,
            Self::ListFiles { .. } => ToolKind::ListFiles,
        }
    }
}

/// Successful outcome of a sandbox operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub exit_code: Option<i32>,
    pub truncated: bool,
}

impl ToolOutput {
    fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            exit_code: None,
            truncated: false,
        }
    }

    /// Rendering fed back to the backend as the tool result.
    pub fn for_model(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit_code: {code}\n{}", self.content),
            None => self.content.clone(),
        }
    }
}

/// Record plus raw result of one dispatched call.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub invocation: ToolInvocation,
    pub result: Result<ToolOutput, SandboxError>,
}

impl DispatchOutcome {
    /// Text to send back to the backend for this call.
    pub fn message_for_model(&self) -> String {
        match &self.result {
            Ok(output) => output.for_model(),
            Err(e) => {
                let detail = e.detail();
                format!(
                    "Error [{}]: {}\nSuggestion: {}",
                    detail.kind, detail.message, detail.suggestion
                )
            }
        }
    }
}

/// Executes tool requests under [`SandboxLimits`].
#[derive(Debug, Clone, Default)]
pub struct ToolSandbox {
    limits: SandboxLimits,
    root: Option<PathBuf>,
}

impl ToolSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits, root: None }
    }

    /// Confine paths to `root` and run commands inside it.
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.root = Some(
            root.canonicalize()
                .unwrap_or_else(|_| file::normalize_lexical(root)),
        );
        self
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Definitions offered to tool-capable backends.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        ToolKind::ALL.iter().map(ToolKind::definition).collect()
    }

    pub async fn run_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ToolOutput, SandboxError> {
        let timeout = timeout.unwrap_or(self.limits.default_command_timeout);
        shell::run(
            command,
            self.root.as_deref(),
            timeout,
            self.limits.max_output_bytes,
        )
        .await
    }

    pub async fn read_file(
        &self,
        path: &str,
        max_bytes: Option<u64>,
    ) -> Result<ToolOutput, SandboxError> {
        let limit = max_bytes.unwrap_or(self.limits.default_read_bytes);
        let path = self.resolve(path)?;
        let content = file::read(&path, limit).await?;
        Ok(ToolOutput::text(content))
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<ToolOutput, SandboxError> {
        let path = self.resolve(path)?;
        file::write(&path, content, self.limits.max_write_bytes).await?;
        Ok(ToolOutput::text(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path.display()
        )))
    }

    pub async fn list_files(
        &self,
        directory: &str,
        pattern: Option<&str>,
    ) -> Result<ToolOutput, SandboxError> {
        let pattern = pattern.filter(|p| !p.trim().is_empty()).unwrap_or("*");
        let (entries, truncated) = self.list_entries(directory, pattern).await?;
        let content = if entries.is_empty() {
            format!("No entries match '{pattern}'")
        } else {
            entries.join("\n")
        };
        Ok(ToolOutput {
            content,
            exit_code: None,
            truncated,
        })
    }

    /// Matching entries relative to `directory`, sorted, plus a truncation flag.
    pub async fn list_entries(
        &self,
        directory: &str,
        pattern: &str,
    ) -> Result<(Vec<String>, bool), SandboxError> {
        let dir = self.resolve(directory)?;
        let matcher = file::glob_to_regex(pattern).map_err(|e| SandboxError::InvalidToolCall {
            tool: ToolKind::ListFiles.name().to_string(),
            reason: format!("invalid pattern '{pattern}': {e}"),
        })?;
        let recursive = pattern.contains('/') || pattern.contains("**");
        file::list(&dir, &matcher, recursive, self.limits.max_list_entries).await
    }

    /// Run one typed request on behalf of the backend. Requested timeouts and
    /// read sizes are clamped to the `max_*` limits here; the direct methods
    /// honour whatever the caller passes.
    pub async fn dispatch(&self, request: &ToolRequest) -> Result<ToolOutput, SandboxError> {
        match request {
            ToolRequest::RunCommand {
                command,
                timeout_seconds,
            } => {
                let timeout = timeout_seconds
                    .map(Duration::from_secs)
                    .unwrap_or(self.limits.default_command_timeout)
                    .min(self.limits.max_command_timeout);
                self.run_command(command, Some(timeout)).await
            }
            ToolRequest::ReadFile { path, max_bytes } => {
                let limit = max_bytes
                    .unwrap_or(self.limits.default_read_bytes)
                    .min(self.limits.max_read_bytes);
                self.read_file(path, Some(limit)).await
            }
            ToolRequest::WriteFile { path, content } => self.write_file(path, content).await,
            ToolRequest::ListFiles { directory, pattern } => {
                self.list_files(directory, pattern.as_deref()).await
            }
        }
    }

    /// Parse and run a backend tool call, producing its invocation record.
    pub async fn invoke(&self, call: &ToolCall) -> DispatchOutcome {
        let start = Instant::now();
        let result = match ToolRequest::from_call(&call.name, &call.arguments) {
            Ok(request) => {
                tracing::debug!(tool = %request.kind(), call_id = %call.id, "Dispatching tool call");
                self.dispatch(&request).await
            }
            Err(e) => Err(e),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let cap = self.limits.invocation_output_cap;

        let invocation = match &result {
            Ok(output) => {
                let (captured, cut) = truncate_utf8(&output.content, cap);
                ToolInvocation {
                    tool: call.name.clone(),
                    arguments: call.arguments.clone(),
                    output: captured,
                    truncated: output.truncated || cut,
                    success: true,
                    exit_code: output.exit_code,
                    error: None,
                    duration_ms,
                }
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool call failed");
                let partial = match e {
                    SandboxError::CommandTimeout { partial_output, .. }
                    | SandboxError::CommandExecution { partial_output, .. } => {
                        partial_output.as_str()
                    }
                    _ => "",
                };
                let (captured, cut) = truncate_utf8(partial, cap);
                ToolInvocation {
                    tool: call.name.clone(),
                    arguments: call.arguments.clone(),
                    output: captured,
                    truncated: cut,
                    success: false,
                    exit_code: None,
                    error: Some(e.detail()),
                    duration_ms,
                }
            }
        };

        DispatchOutcome { invocation, result }
    }

    fn resolve(&self, raw: &str) -> Result<PathBuf, SandboxError> {
        file::resolve_path(raw, self.root.as_deref())
    }
}

/// Cut `s` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_utf8(s: &str, max: usize) -> (String, bool) {
    if s.len() <= max {
        return (s.to_string(), false);
    }
    (s[..floor_char_boundary(s, max)].to_string(), true)
}

/// Find the largest byte index <= `i` that is a valid char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}
