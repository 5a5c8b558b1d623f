//! End-to-end coordination tests with stub backends (no real API calls).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use ai_orchestrator::error::{ErrorKind, LlmError};
use ai_orchestrator::executor::{ExecutorConfig, RetryPolicy};
use ai_orchestrator::llm::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};
use ai_orchestrator::result::ExecutionStatus;
use ai_orchestrator::sandbox::{SandboxLimits, ToolSandbox};
use ai_orchestrator::{
    Coordinator, CoordinatorConfig, ExecutionMode, FuzzyMatcher, Task, TaskExecutor, Worker,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn last_user(messages: &[ChatMessage]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

fn reply(content: String) -> CompletionResponse {
    CompletionResponse {
        content,
        input_tokens: 1,
        output_tokens: 1,
        finish_reason: FinishReason::Stop,
    }
}

/// Text-only backend driven by the prompt:
/// `flaky` always fails transiently, `sleep N` waits N ms first.
struct PromptDriven {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl PromptDriven {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmProvider for PromptDriven {
    fn model_name(&self) -> &str {
        "prompt-driven"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let prompt = last_user(&request.messages).to_string();
        let millis = prompt
            .split_whitespace()
            .skip_while(|w| *w != "sleep")
            .nth(1)
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(ms) = millis {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if prompt.contains("flaky") {
            return Err(LlmError::RequestFailed {
                provider: "prompt-driven".into(),
                reason: "503 Service Unavailable".into(),
            });
        }
        Ok(reply(format!("done: {prompt}")))
    }
}

fn fast_retry_config() -> ExecutorConfig {
    ExecutorConfig {
        retry: RetryPolicy::default().with_initial_delay(Duration::from_millis(1)),
        ..ExecutorConfig::default()
    }
}

fn coordinator_with(
    llm: Arc<dyn LlmProvider>,
    sandbox: ToolSandbox,
    config: ExecutorConfig,
    max_concurrency: usize,
) -> Coordinator {
    Coordinator::new(
        Arc::new(FuzzyMatcher::default()),
        TaskExecutor::new(llm, sandbox, config),
        CoordinatorConfig { max_concurrency },
    )
}

fn coder_and_tester() -> Vec<Worker> {
    vec![
        Worker::new("coder", ["code", "python", "write"]),
        Worker::new("tester", ["test", "pytest"]),
    ]
}

#[tokio::test]
async fn ten_parallel_tasks_one_permanent_transient_failure() {
    let llm = PromptDriven::new();
    let coordinator = coordinator_with(llm.clone(), ToolSandbox::default(), fast_retry_config(), 0);
    let tasks: Vec<Task> = (0..10)
        .map(|i| {
            let description = if i == 6 {
                "write flaky python code".to_string()
            } else {
                format!("write python code number {i}")
            };
            Task::with_id(format!("t{i}"), description)
        })
        .collect();

    let results = tokio::time::timeout(
        TEST_TIMEOUT,
        coordinator.coordinate(&tasks, &coder_and_tester(), ExecutionMode::Parallel),
    )
    .await
    .expect("batch hung");

    assert_eq!(results.len(), 10);
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(succeeded, 9);

    let failed = &results[6];
    assert_eq!(failed.task_id(), "t6");
    assert_eq!(failed.status(), ExecutionStatus::Failure);
    let error = failed.error().expect("failure carries error detail");
    assert_eq!(error.kind, ErrorKind::Generation);
    assert!(!error.message.is_empty());
    assert!(!error.suggestion.is_empty());
    // First attempt plus the two default retries.
    assert_eq!(failed.metadata().attempts, 3);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 9 + 3);
}

#[tokio::test]
async fn results_keep_input_order_regardless_of_completion() {
    let coordinator =
        coordinator_with(PromptDriven::new(), ToolSandbox::default(), fast_retry_config(), 0);
    let tasks: Vec<Task> = [120, 10, 80, 0, 40]
        .iter()
        .enumerate()
        .map(|(i, ms)| Task::with_id(format!("t{i}"), format!("run pytest then sleep {ms}")))
        .collect();

    for mode in [ExecutionMode::Parallel, ExecutionMode::Sequential] {
        let results = coordinator.coordinate(&tasks, &coder_and_tester(), mode).await;
        let ids: Vec<&str> = results.iter().map(|r| r.task_id()).collect();
        assert_eq!(ids, vec!["t0", "t1", "t2", "t3", "t4"], "mode {mode}");
        assert!(results.iter().all(|r| r.is_success()));
    }
}

#[tokio::test]
async fn parallel_mode_overlaps_backend_calls() {
    let llm = PromptDriven::new();
    let coordinator = coordinator_with(llm.clone(), ToolSandbox::default(), fast_retry_config(), 0);
    let tasks: Vec<Task> = (0..5)
        .map(|i| Task::with_id(format!("t{i}"), "write code then sleep 200"))
        .collect();

    let start = Instant::now();
    let results = coordinator
        .coordinate(&tasks, &coder_and_tester(), ExecutionMode::Parallel)
        .await;

    assert!(results.iter().all(|r| r.is_success()));
    assert!(start.elapsed() < Duration::from_millis(800));
    assert!(llm.peak.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn max_concurrency_bounds_parallel_mode() {
    let llm = PromptDriven::new();
    let coordinator = coordinator_with(llm.clone(), ToolSandbox::default(), fast_retry_config(), 2);
    let tasks: Vec<Task> = (0..6)
        .map(|i| Task::with_id(format!("t{i}"), "write code then sleep 30"))
        .collect();

    let results = coordinator
        .coordinate(&tasks, &coder_and_tester(), ExecutionMode::Parallel)
        .await;

    assert_eq!(results.len(), 6);
    assert!(llm.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn timeout_is_isolated_to_its_task() {
    let config = ExecutorConfig {
        task_timeout: Duration::from_millis(150),
        retry: RetryPolicy::none(),
        ..ExecutorConfig::default()
    };
    let coordinator = coordinator_with(PromptDriven::new(), ToolSandbox::default(), config, 0);
    let tasks = vec![
        Task::with_id("fast", "write code"),
        Task::with_id("slow", "write code then sleep 5000"),
    ];

    let start = Instant::now();
    let results = coordinator
        .coordinate(&tasks, &coder_and_tester(), ExecutionMode::Parallel)
        .await;

    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(results[0].is_success());
    assert_eq!(results[1].status(), ExecutionStatus::Timeout);
    assert_eq!(results[1].error().unwrap().kind, ErrorKind::GenerationTimeout);
}

#[tokio::test]
async fn assignment_is_deterministic_across_runs() {
    let coordinator =
        coordinator_with(PromptDriven::new(), ToolSandbox::default(), fast_retry_config(), 0);
    let workers = Worker::default_pool();
    let tasks = vec![
        Task::with_id("a", "Write Python function to add two numbers"),
        Task::with_id("b", "Run pytest and report coverage"),
        Task::with_id("c", "Review the security of the login code"),
        Task::with_id("d", "Summarize the README"),
    ];

    let first: Vec<Option<String>> = coordinator
        .coordinate(&tasks, &workers, ExecutionMode::Parallel)
        .await
        .iter()
        .map(|r| r.worker_role().map(str::to_string))
        .collect();
    for _ in 0..3 {
        let again: Vec<Option<String>> = coordinator
            .coordinate(&tasks, &workers, ExecutionMode::Sequential)
            .await
            .iter()
            .map(|r| r.worker_role().map(str::to_string))
            .collect();
        assert_eq!(again, first);
    }
    assert_eq!(first[0].as_deref(), Some("coder"));
    assert_eq!(first[1].as_deref(), Some("tester"));
    assert_eq!(first[2].as_deref(), Some("reviewer"));
    assert_eq!(first[3].as_deref(), Some("writer"));
}

#[tokio::test]
async fn validation_failure_never_reaches_backend() {
    let llm = PromptDriven::new();
    let coordinator = coordinator_with(llm.clone(), ToolSandbox::default(), fast_retry_config(), 0);
    let tasks = vec![Task::with_id("empty", "  "), Task::with_id("ok", "write code")];

    let results = coordinator
        .coordinate(&tasks, &coder_and_tester(), ExecutionMode::Sequential)
        .await;

    assert_eq!(results[0].error().unwrap().kind, ErrorKind::Validation);
    assert!(results[1].is_success());
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
}

/// Tool-capable backend: lists files, reads the first `.txt`, then answers.
struct FileReader;

fn tool_results(messages: &[ChatMessage]) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect()
}

#[async_trait]
impl LlmProvider for FileReader {
    fn model_name(&self) -> &str {
        "file-reader"
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(reply("no tools offered".into()))
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let results = tool_results(&request.messages);
        let call = |id: &str, name: &str, arguments: serde_json::Value| ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        };

        let (content, tool_calls) = match results.as_slice() {
            [] => (
                None,
                vec![call(
                    "call_1",
                    "list_files",
                    serde_json::json!({"directory": ".", "pattern": "*.txt"}),
                )],
            ),
            [listing] => {
                let first = listing.lines().next().unwrap_or_default().to_string();
                (
                    Some("reading".to_string()),
                    vec![call("call_2", "read_file", serde_json::json!({"path": first}))],
                )
            }
            [.., content] => (Some(format!("The notes say: {content}")), vec![]),
        };

        Ok(ToolCompletionResponse {
            finish_reason: if tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolUse
            },
            content,
            tool_calls,
            input_tokens: 1,
            output_tokens: 1,
        })
    }
}

#[tokio::test]
async fn list_then_read_then_answer() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ship on friday").unwrap();
    std::fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

    let sandbox = ToolSandbox::new(SandboxLimits::default()).with_root(dir.path());
    let coordinator = coordinator_with(Arc::new(FileReader), sandbox, fast_retry_config(), 0);
    let tasks = vec![Task::with_id("t1", "Research what the notes say")];
    let workers = Worker::default_pool();

    let results = coordinator
        .coordinate(&tasks, &workers, ExecutionMode::Sequential)
        .await;
    let result = &results[0];

    assert!(result.is_success(), "unexpected error: {:?}", result.error());
    assert_eq!(result.output(), "The notes say: ship on friday");
    let invocations = &result.metadata().tool_invocations;
    assert_eq!(invocations.len(), 2);
    assert_eq!(invocations[0].tool, "list_files");
    assert_eq!(invocations[0].output, "notes.txt");
    assert_eq!(invocations[1].tool, "read_file");
    assert!(invocations.iter().all(|i| i.success));
}

#[tokio::test]
async fn no_tools_mode_never_dispatches() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = ToolSandbox::new(SandboxLimits::default()).with_root(dir.path());
    let config = ExecutorConfig {
        tools_enabled: false,
        ..fast_retry_config()
    };
    let coordinator = coordinator_with(Arc::new(FileReader), sandbox, config, 0);
    let results = coordinator
        .coordinate(
            &[Task::with_id("t1", "Research the notes")],
            &Worker::default_pool(),
            ExecutionMode::Sequential,
        )
        .await;

    assert_eq!(results[0].output(), "no tools offered");
    assert!(results[0].metadata().tool_invocations.is_empty());
}
