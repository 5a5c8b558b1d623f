//! Batch coordination: validate, assign, execute, aggregate.
//!
//! `coordinate` always returns exactly one result per input task, at the
//! task's input index, whatever the mode and whatever fails.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::{Component, CoordinationError, ErrorDetail, ErrorKind};
use crate::executor::{CancelSignal, TaskContext, TaskExecutor};
use crate::matcher::WorkerSelector;
use crate::model::{Task, Worker};
use crate::result::ExecutionResult;

/// How a batch is scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task at a time, in submission order.
    #[default]
    Sequential,
    /// All tasks at once; results still in submission order.
    Parallel,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            other => Err(format!("unknown execution mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Parallel mode only; 0 = unbounded
    pub max_concurrency: usize,
}

/// Planned worker for one task, without executing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

pub struct Coordinator {
    selector: Arc<dyn WorkerSelector>,
    executor: TaskExecutor,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        selector: Arc<dyn WorkerSelector>,
        executor: TaskExecutor,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            selector,
            executor,
            config,
        }
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub async fn coordinate(
        &self,
        tasks: &[Task],
        workers: &[Worker],
        mode: ExecutionMode,
    ) -> Vec<ExecutionResult> {
        self.coordinate_with_cancel(tasks, workers, mode, CancelSignal::never())
            .await
    }

    /// Like [`Coordinator::coordinate`]; once `cancel` fires, tasks not yet
    /// started fail with `Cancelled` and running ones are interrupted.
    pub async fn coordinate_with_cancel(
        &self,
        tasks: &[Task],
        workers: &[Worker],
        mode: ExecutionMode,
        cancel: CancelSignal,
    ) -> Vec<ExecutionResult> {
        tracing::info!(
            tasks = tasks.len(),
            workers = workers.len(),
            %mode,
            selector = self.selector.name(),
            "Coordinating batch"
        );

        let checks = validate_batch(tasks);
        let results = match mode {
            ExecutionMode::Sequential => {
                self.run_sequential(tasks, workers, &checks, &cancel).await
            }
            ExecutionMode::Parallel => self.run_parallel(tasks, workers, &checks, &cancel).await,
        };

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        tracing::info!(
            succeeded,
            failed = results.len() - succeeded,
            "Batch finished"
        );
        results
    }

    /// Worker assignment per task, in input order. Nothing is executed.
    pub fn plan(&self, tasks: &[Task], workers: &[Worker]) -> Vec<Assignment> {
        validate_batch(tasks)
            .into_iter()
            .zip(tasks)
            .map(|(check, task)| {
                let selected = check.and_then(|()| self.selector.select(task, workers));
                match selected {
                    Ok(worker) => Assignment {
                        task_id: task.id.clone(),
                        worker_role: Some(worker.role.clone()),
                        error: None,
                    },
                    Err(e) => Assignment {
                        task_id: task.id.clone(),
                        worker_role: None,
                        error: Some(e.detail()),
                    },
                }
            })
            .collect()
    }

    async fn run_sequential(
        &self,
        tasks: &[Task],
        workers: &[Worker],
        checks: &[Result<(), CoordinationError>],
        cancel: &CancelSignal,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(tasks.len());
        let mut outputs: HashMap<&str, String> = HashMap::new();

        for (task, check) in tasks.iter().zip(checks) {
            let mut ctx = TaskContext::new().with_cancel(cancel.clone());
            for dep in &task.dependencies {
                if let Some(output) = outputs.get(dep.as_str()) {
                    ctx = ctx.with_prerequisite(dep, output);
                }
            }

            let result = self.run_one(task, workers, check, &ctx).await;
            if result.is_success() {
                outputs.insert(&task.id, result.output().to_string());
            }
            results.push(result);
        }
        results
    }

    async fn run_parallel(
        &self,
        tasks: &[Task],
        workers: &[Worker],
        checks: &[Result<(), CoordinationError>],
        cancel: &CancelSignal,
    ) -> Vec<ExecutionResult> {
        let limit = (self.config.max_concurrency > 0)
            .then(|| Semaphore::new(self.config.max_concurrency));
        let ctx = TaskContext::new().with_cancel(cancel.clone());

        let futures = tasks.iter().zip(checks).map(|(task, check)| {
            let limit = limit.as_ref();
            let ctx = &ctx;
            async move {
                let _permit = match limit {
                    Some(semaphore) => semaphore.acquire().await.ok(),
                    None => None,
                };
                self.run_one(task, workers, check, ctx).await
            }
        });

        join_all(futures).await
    }

    async fn run_one(
        &self,
        task: &Task,
        workers: &[Worker],
        check: &Result<(), CoordinationError>,
        ctx: &TaskContext,
    ) -> ExecutionResult {
        if let Err(e) = check {
            tracing::warn!(task_id = %task.id, error = %e, "Task rejected");
            return ExecutionResult::rejected(&task.id, e.detail());
        }

        if ctx.cancel.is_cancelled() {
            tracing::info!(task_id = %task.id, "Skipping task, batch cancelled");
            return ExecutionResult::rejected(
                &task.id,
                ErrorDetail::new(
                    ErrorKind::Cancelled,
                    Component::Coordinator,
                    "Batch was cancelled before the task started",
                )
                .with_context("task_id", &task.id),
            );
        }

        match self.selector.select(task, workers) {
            Ok(worker) => self.executor.execute_with(task, worker, ctx).await,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "No worker assigned");
                ExecutionResult::rejected(&task.id, e.detail())
            }
        }
    }
}

/// Per-task validation, including checks against the rest of the batch.
/// Later occurrences of a duplicate id are rejected; the first one stands.
pub fn validate_batch(tasks: &[Task]) -> Vec<Result<(), CoordinationError>> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut seen = HashSet::new();

    tasks
        .iter()
        .map(|task| {
            task.validate()?;
            if !seen.insert(task.id.as_str()) {
                return Err(task.invalid(format!("duplicate task id {}", task.id)));
            }
            if let Some(missing) = task
                .dependencies
                .iter()
                .find(|d| !ids.contains(d.as_str()))
            {
                return Err(task.invalid(format!("unknown dependency {missing}")));
            }
            Ok(())
        })
        .collect()
}
