//! Configuration types.
//!
//! Defaults come from `Default`, environment overrides from
//! [`OrchestratorConfig::from_env`]; the CLI applies its flags on top.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::error::ConfigError;
use crate::executor::{
    DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_TASK_TIMEOUT, ExecutorConfig, RetryPolicy, TaskExecutor,
};
use crate::llm::{ConcurrencyLimited, LlmProvider, create_provider};
use crate::matcher::{FallbackPolicy, FuzzyMatcher};
use crate::sandbox::{SandboxLimits, ToolSandbox};

pub const ENV_TASK_TIMEOUT_SECS: &str = "AI_ORCH_TASK_TIMEOUT_SECS";
pub const ENV_MAX_TOOL_ROUNDS: &str = "AI_ORCH_MAX_TOOL_ROUNDS";
pub const ENV_MAX_RETRIES: &str = "AI_ORCH_MAX_RETRIES";
pub const ENV_MAX_CONCURRENCY: &str = "AI_ORCH_MAX_CONCURRENCY";
pub const ENV_MAX_BACKEND_REQUESTS: &str = "AI_ORCH_MAX_BACKEND_REQUESTS";
pub const ENV_SANDBOX_ROOT: &str = "AI_ORCH_SANDBOX_ROOT";
pub const ENV_DEFAULT_WORKER: &str = "AI_ORCH_DEFAULT_WORKER";
pub const ENV_LOG_DIR: &str = "AI_ORCH_LOG_DIR";

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wall-clock limit per task attempt.
    pub task_timeout: Duration,
    /// Maximum backend tool-call round trips per attempt.
    pub max_tool_rounds: usize,
    /// Extra attempts on timeouts and transient backend errors.
    pub max_retries: u32,
    /// Parallel mode bound (0 = unbounded).
    pub max_concurrency: usize,
    /// In-flight backend requests across all tasks (0 = unbounded).
    pub max_backend_requests: usize,
    /// Confine sandbox paths and commands to this directory.
    pub sandbox_root: Option<PathBuf>,
    /// Worker used when no capability matches.
    pub default_worker: Option<String>,
    pub tools_enabled: bool,
    pub fail_on_tool_error: bool,
    /// Also write logs to a daily file here.
    pub log_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            max_retries: RetryPolicy::default().max_retries,
            max_concurrency: 0,
            max_backend_requests: 0,
            sandbox_root: None,
            default_worker: None,
            tools_enabled: true,
            fail_on_tool_error: false,
            log_dir: None,
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `AI_ORCH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get(ENV_TASK_TIMEOUT_SECS) {
            let secs: u64 = parse(ENV_TASK_TIMEOUT_SECS, &raw)?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: ENV_TASK_TIMEOUT_SECS.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            config.task_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = get(ENV_MAX_TOOL_ROUNDS) {
            config.max_tool_rounds = parse(ENV_MAX_TOOL_ROUNDS, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_RETRIES) {
            config.max_retries = parse(ENV_MAX_RETRIES, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_CONCURRENCY) {
            config.max_concurrency = parse(ENV_MAX_CONCURRENCY, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_BACKEND_REQUESTS) {
            config.max_backend_requests = parse(ENV_MAX_BACKEND_REQUESTS, &raw)?;
        }
        config.sandbox_root = get(ENV_SANDBOX_ROOT).map(PathBuf::from);
        config.default_worker = get(ENV_DEFAULT_WORKER).map(|v| v.trim().to_string());
        config.log_dir = get(ENV_LOG_DIR).map(PathBuf::from);

        Ok(config)
    }

    pub fn fallback_policy(&self) -> FallbackPolicy {
        match &self.default_worker {
            Some(role) => FallbackPolicy::DefaultWorker(role.clone()),
            None => FallbackPolicy::Fail,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            task_timeout: self.task_timeout,
            max_tool_rounds: self.max_tool_rounds,
            tools_enabled: self.tools_enabled,
            fail_on_tool_error: self.fail_on_tool_error,
            retry: RetryPolicy::default().with_max_retries(self.max_retries),
            ..ExecutorConfig::default()
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrency: self.max_concurrency,
        }
    }

    pub fn sandbox(&self) -> ToolSandbox {
        let sandbox = ToolSandbox::new(SandboxLimits::default());
        match &self.sandbox_root {
            Some(root) => sandbox.with_root(root),
            None => sandbox,
        }
    }

    /// Wire a coordinator for the named provider: fuzzy matcher, executor,
    /// sandbox, and the backend request bound when one is set.
    pub fn build_coordinator(&self, provider: &str) -> crate::Result<Coordinator> {
        if let Some(root) = &self.sandbox_root
            && !root.is_dir()
        {
            return Err(ConfigError::InvalidValue {
                key: ENV_SANDBOX_ROOT.to_string(),
                message: format!("{} is not a directory", root.display()),
            }
            .into());
        }

        let mut llm = create_provider(provider)?;
        if self.max_backend_requests > 0 {
            tracing::debug!(limit = self.max_backend_requests, "Bounding backend requests");
            llm = Arc::new(ConcurrencyLimited::new(llm, self.max_backend_requests))
                as Arc<dyn LlmProvider>;
        }

        let executor = TaskExecutor::new(llm, self.sandbox(), self.executor_config());
        Ok(Coordinator::new(
            Arc::new(FuzzyMatcher::new(self.fallback_policy())),
            executor,
            self.coordinator_config(),
        ))
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        })
}
