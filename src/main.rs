//! ai-orchestrator: route tasks to workers and run them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ai_orchestrator::config::OrchestratorConfig;
use ai_orchestrator::executor::cancel_pair;
use ai_orchestrator::report::{Report, render_plan};
use ai_orchestrator::{ExecutionMode, Task, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "ai-orchestrator")]
#[command(about = "Route natural-language tasks to workers and execute them with an LLM backend")]
#[command(version)]
struct Args {
    /// Task descriptions, one per argument
    #[arg(required = true)]
    tasks: Vec<String>,

    /// Run all tasks concurrently
    #[arg(long)]
    parallel: bool,

    /// Generation backend
    #[arg(long, env = "AI_ORCH_PROVIDER", default_value = "echo")]
    provider: String,

    /// Per-task timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Maximum tool-call round trips per attempt
    #[arg(long)]
    max_tool_rounds: Option<usize>,

    /// Extra attempts on timeouts and transient backend errors
    #[arg(long)]
    max_retries: Option<u32>,

    /// Bound on concurrently running tasks in parallel mode (0 = unbounded)
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Bound on in-flight backend requests across all tasks (0 = unbounded)
    #[arg(long)]
    max_backend_requests: Option<usize>,

    /// Never offer tools to the backend
    #[arg(long)]
    no_tools: bool,

    /// End a task on its first tool error
    #[arg(long)]
    fail_on_tool_error: bool,

    /// Worker role to use when no capability matches
    #[arg(long)]
    default_worker: Option<String>,

    /// Confine file tools and commands to this directory
    #[arg(long)]
    sandbox_root: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Print worker assignments without executing anything
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn apply(&self, config: &mut OrchestratorConfig) {
        if let Some(secs) = self.timeout {
            config.task_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(rounds) = self.max_tool_rounds {
            config.max_tool_rounds = rounds;
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(n) = self.max_concurrency {
            config.max_concurrency = n;
        }
        if let Some(n) = self.max_backend_requests {
            config.max_backend_requests = n;
        }
        if self.no_tools {
            config.tools_enabled = false;
        }
        if self.fail_on_tool_error {
            config.fail_on_tool_error = true;
        }
        if let Some(role) = &self.default_worker {
            config.default_worker = Some(role.clone());
        }
        if let Some(root) = &self.sandbox_root {
            config.sandbox_root = Some(root.clone());
        }
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ai-orchestrator.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let mut config = OrchestratorConfig::from_env()?;
    args.apply(&mut config);
    let guard = init_tracing(config.log_dir.as_deref());

    let coordinator = config.build_coordinator(&args.provider)?;

    let tasks: Vec<Task> = args
        .tasks
        .iter()
        .enumerate()
        .map(|(i, description)| Task::with_id(format!("task-{}", i + 1), description))
        .collect();
    let workers = Worker::default_pool();

    if args.dry_run {
        let plan = coordinator.plan(&tasks, &workers);
        match args.format {
            OutputFormat::Text => print!("{}", render_plan(&tasks, &plan)),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mode = if args.parallel {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Sequential
    };

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling batch");
            handle.cancel();
        }
    });

    let results = coordinator
        .coordinate_with_cancel(&tasks, &workers, mode, signal)
        .await;

    let report = Report::new(&tasks, &results);
    match args.format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    let code = if report.summary.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    };
    drop(guard);
    Ok(code)
}
