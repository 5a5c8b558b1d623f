//! Task execution: one task, one worker, one `ExecutionResult`.
//!
//! Each attempt seeds a conversation from the worker and task, then runs a
//! bounded tool loop against the Generation Port. Attempts are wrapped in the
//! per-task timeout and raced against the batch [`CancelSignal`]. Every error
//! is folded into the returned result; nothing propagates to the caller.

pub mod cancel;
pub mod retry;
pub mod state;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use retry::RetryPolicy;
pub use state::{InvalidTransition, TaskLifecycle, TaskState};

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ErrorDetail, ExecutionError};
use crate::llm::{
    ChatMessage, GenerationConfig, LlmProvider, Reasoning, ReasoningContext, RespondResult,
    TokenUsage,
};
use crate::model::{Task, Worker};
use crate::result::{ExecutionResult, ResultMetadata, ToolInvocation};
use crate::sandbox::ToolSandbox;

/// Default per-task wall-clock limit.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Default cap on backend tool-call round trips per attempt.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-clock limit for one attempt
    pub task_timeout: Duration,
    pub max_tool_rounds: usize,
    /// Offer sandbox tools to tool-capable backends
    pub tools_enabled: bool,
    /// End the task on the first sandbox error instead of reporting it to the backend
    pub fail_on_tool_error: bool,
    pub retry: RetryPolicy,
    pub generation: GenerationConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            task_timeout: DEFAULT_TASK_TIMEOUT,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            tools_enabled: true,
            fail_on_tool_error: false,
            retry: RetryPolicy::default(),
            generation: GenerationConfig::default(),
        }
    }
}

/// Output of a task that finished before this one and is listed as a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteOutput {
    pub task_id: String,
    pub output: String,
}

/// Per-task inputs beyond the task and worker themselves.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub prerequisites: Vec<PrerequisiteOutput>,
    pub cancel: CancelSignal,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_prerequisite(mut self, task_id: impl Into<String>, output: impl Into<String>) -> Self {
        self.prerequisites.push(PrerequisiteOutput {
            task_id: task_id.into(),
            output: output.into(),
        });
        self
    }
}

/// What an attempt produced before it ended, successful or not.
#[derive(Debug, Default)]
struct Progress {
    /// Latest text from the backend in the current attempt
    text: String,
    invocations: Vec<ToolInvocation>,
    usage: TokenUsage,
}

/// Runs tasks against one Generation Port and one sandbox.
pub struct TaskExecutor {
    reasoning: Reasoning,
    sandbox: ToolSandbox,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(llm: Arc<dyn LlmProvider>, sandbox: ToolSandbox, config: ExecutorConfig) -> Self {
        Self {
            reasoning: Reasoning::new(llm).with_config(config.generation.clone()),
            sandbox,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &ToolSandbox {
        &self.sandbox
    }

    pub async fn execute(&self, task: &Task, worker: &Worker) -> ExecutionResult {
        self.execute_with(task, worker, &TaskContext::default()).await
    }

    pub async fn execute_with(
        &self,
        task: &Task,
        worker: &Worker,
        ctx: &TaskContext,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut lifecycle = TaskLifecycle::new(&task.id);
        let mut progress = Progress::default();
        advance(&mut lifecycle, TaskState::Assigned, Some(worker.role.clone()));

        if ctx.cancel.is_cancelled() {
            advance(&mut lifecycle, TaskState::Failed, Some("cancelled".into()));
            return self.finish(task, worker, &lifecycle, progress, started, Err(ExecutionError::Cancelled));
        }

        tracing::info!(task_id = %task.id, worker = %worker.role, "Executing task");
        let seed = seed_messages(task, worker, ctx);

        loop {
            advance(&mut lifecycle, TaskState::Executing, None);
            progress.text.clear();

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Err(ExecutionError::Cancelled),
                timed = tokio::time::timeout(
                    self.config.task_timeout,
                    self.run_attempt(&seed, &mut progress),
                ) => timed.unwrap_or(Err(ExecutionError::GenerationTimeout {
                    timeout: self.config.task_timeout,
                })),
            };

            let err = match outcome {
                Ok(text) => {
                    advance(&mut lifecycle, TaskState::Succeeded, None);
                    return self.finish(task, worker, &lifecycle, progress, started, Ok(text));
                }
                Err(err) => err,
            };

            let terminal = match err {
                ExecutionError::GenerationTimeout { .. } => TaskState::TimedOut,
                _ => TaskState::Failed,
            };
            advance(&mut lifecycle, terminal, Some(err.to_string()));

            let attempts = lifecycle.attempts();
            if !self.config.retry.should_retry(&err, attempts) {
                return self.finish(task, worker, &lifecycle, progress, started, Err(err));
            }

            let delay = self.config.retry.delay_after(&err, attempts - 1);
            tracing::warn!(
                task_id = %task.id,
                attempt = attempts,
                max_retries = self.config.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying task"
            );

            let cancelled = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                tracing::info!(task_id = %task.id, "Retry abandoned, batch cancelled");
                return self.finish(task, worker, &lifecycle, progress, started, Err(err));
            }

            if let Err(e) = lifecycle.retry(format!("retry {attempts}")) {
                tracing::warn!(task_id = %task.id, error = %e, "Retry rejected by state machine");
                return self.finish(task, worker, &lifecycle, progress, started, Err(err));
            }
        }
    }

    /// One attempt: the tool loop until the backend answers with text.
    async fn run_attempt(
        &self,
        seed: &[ChatMessage],
        progress: &mut Progress,
    ) -> Result<String, ExecutionError> {
        let tools = if self.config.tools_enabled {
            self.sandbox.tool_definitions()
        } else {
            Vec::new()
        };
        let mut reason_ctx = ReasoningContext::new()
            .with_messages(seed.to_vec())
            .with_tools(tools);
        let mut rounds = 0;

        loop {
            let output = self.reasoning.respond_with_tools(&reason_ctx).await?;
            progress.usage.add(output.usage);

            let (tool_calls, content) = match output.result {
                RespondResult::Text(text) => {
                    progress.text = text.clone();
                    return Ok(text);
                }
                RespondResult::ToolCalls {
                    tool_calls,
                    content,
                } => (tool_calls, content),
            };

            if let Some(text) = content.as_deref().filter(|t| !t.trim().is_empty()) {
                progress.text = text.to_string();
            }

            if rounds >= self.config.max_tool_rounds {
                tracing::warn!(limit = self.config.max_tool_rounds, "Tool loop exceeded");
                return Err(ExecutionError::ToolLoopExceeded {
                    limit: self.config.max_tool_rounds,
                });
            }
            rounds += 1;

            tracing::debug!(round = rounds, calls = tool_calls.len(), "Backend requested tools");
            reason_ctx
                .messages
                .push(ChatMessage::assistant_with_tool_calls(content, tool_calls.clone()));

            for call in &tool_calls {
                let outcome = self.sandbox.invoke(call).await;
                let message = outcome.message_for_model();
                progress.invocations.push(outcome.invocation);
                if let Err(e) = outcome.result
                    && self.config.fail_on_tool_error
                {
                    return Err(ExecutionError::Tool(e));
                }
                reason_ctx
                    .messages
                    .push(ChatMessage::tool_result(&call.id, message));
            }
        }
    }

    fn finish(
        &self,
        task: &Task,
        worker: &Worker,
        lifecycle: &TaskLifecycle,
        progress: Progress,
        started: Instant,
        outcome: Result<String, ExecutionError>,
    ) -> ExecutionResult {
        let latency_ms = started.elapsed().as_millis() as u64;
        let metadata = ResultMetadata {
            tool_invocations: progress.invocations,
            latency_ms,
            attempts: lifecycle.attempts(),
            model: Some(self.reasoning.model_name().to_string()),
            state_history: lifecycle.history(),
            transitions: lifecycle.transitions().to_vec(),
            created_at: Some(lifecycle.created_at()),
            execution_ms: lifecycle
                .elapsed()
                .and_then(|d| u64::try_from(d.num_milliseconds()).ok()),
        };

        let err = match outcome {
            Ok(text) => {
                tracing::info!(
                    task_id = %task.id,
                    worker = %worker.role,
                    latency_ms,
                    tokens = progress.usage.total(),
                    "Task succeeded"
                );
                return ExecutionResult::success(&task.id, &worker.role, text, metadata);
            }
            Err(err) => err,
        };

        let detail = describe(&err, task, worker, lifecycle.attempts());
        tracing::warn!(
            task_id = %task.id,
            worker = %worker.role,
            kind = %detail.kind,
            error = %err,
            "Task did not succeed"
        );
        match err {
            ExecutionError::GenerationTimeout { .. } => {
                ExecutionResult::timeout(&task.id, &worker.role, progress.text, detail, metadata)
            }
            _ => ExecutionResult::failure(
                &task.id,
                Some(worker.role.clone()),
                progress.text,
                detail,
                metadata,
            ),
        }
    }
}

fn advance(lifecycle: &mut TaskLifecycle, to: TaskState, reason: Option<String>) {
    if let Err(e) = lifecycle.transition_to(to, reason) {
        tracing::warn!(task_id = %lifecycle.task_id(), error = %e, "Ignored invalid state transition");
    }
}

fn describe(err: &ExecutionError, task: &Task, worker: &Worker, attempts: u32) -> ErrorDetail {
    err.detail()
        .with_context("task_id", &task.id)
        .with_context("worker", &worker.role)
        .with_context("attempts", attempts)
}

/// System prompt for a worker without its own.
pub fn default_system_prompt(worker: &Worker) -> String {
    format!(
        "You are the {role} worker.\n\
         Capabilities: {caps}\n\n\
         Complete the task you are given. Use the available tools when they help, \
         and finish with a concise answer.",
        role = worker.role,
        caps = worker.capabilities.join(", "),
    )
}

fn seed_messages(task: &Task, worker: &Worker, ctx: &TaskContext) -> Vec<ChatMessage> {
    let system = worker
        .system_prompt
        .clone()
        .unwrap_or_else(|| default_system_prompt(worker));

    let mut prompt = String::new();
    if !ctx.prerequisites.is_empty() {
        prompt.push_str("Results of prerequisite tasks:\n");
        for prereq in &ctx.prerequisites {
            prompt.push_str(&format!("\n## {}\n{}\n", prereq.task_id, prereq.output));
        }
        prompt.push_str("\nTask:\n");
    }
    prompt.push_str(&task.description);

    vec![ChatMessage::system(system), ChatMessage::user(prompt)]
}
