//! Batch summary and the text / JSON renderings printed by the CLI.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;

use crate::coordinator::Assignment;
use crate::model::{Task, TaskPriority};
use crate::result::{ExecutionResult, ExecutionStatus};

/// Counts over one batch of results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Failure count per error kind
    pub errors_by_kind: BTreeMap<String, usize>,
    pub tool_invocations: usize,
    pub total_latency_ms: u64,
}

impl BatchSummary {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status() {
                ExecutionStatus::Success => summary.succeeded += 1,
                ExecutionStatus::Failure => summary.failed += 1,
                ExecutionStatus::Timeout => summary.timed_out += 1,
            }
            if let Some(error) = result.error() {
                *summary
                    .errors_by_kind
                    .entry(error.kind.to_string())
                    .or_default() += 1;
            }
            summary.tool_invocations += result.metadata().tool_invocations.len();
            summary.total_latency_ms += result.metadata().latency_ms;
        }
        summary
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}

#[derive(Debug, Serialize)]
pub struct ReportEntry<'a> {
    pub priority: TaskPriority,
    pub description: &'a str,
    #[serde(flatten)]
    pub result: &'a ExecutionResult,
}

/// Results paired with their tasks, highest priority first.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub summary: BatchSummary,
    pub results: Vec<ReportEntry<'a>>,
}

impl<'a> Report<'a> {
    /// `tasks` and `results` are index-aligned, as returned by `coordinate`.
    pub fn new(tasks: &'a [Task], results: &'a [ExecutionResult]) -> Self {
        let mut entries: Vec<ReportEntry<'a>> = tasks
            .iter()
            .zip(results)
            .map(|(task, result)| ReportEntry {
                priority: task.priority,
                description: &task.description,
                result,
            })
            .collect();
        // Stable: equal priorities keep submission order.
        entries.sort_by(|a, b| b.priority.cmp(&a.priority));

        Self {
            summary: BatchSummary::from_results(results),
            results: entries,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.results {
            let result = entry.result;
            let _ = writeln!(
                out,
                "[{}] {} ({}, {:?}) {} ms",
                result.status().to_string().to_uppercase(),
                result.task_id(),
                result.worker_role().unwrap_or("unassigned"),
                entry.priority,
                result.metadata().latency_ms,
            );
            let _ = writeln!(out, "  task: {}", entry.description);
            if !result.output().is_empty() {
                let _ = writeln!(out, "  output:");
                for line in result.output().lines() {
                    let _ = writeln!(out, "    {line}");
                }
            }
            let tools = &result.metadata().tool_invocations;
            if !tools.is_empty() {
                let names: Vec<&str> = tools.iter().map(|t| t.tool.as_str()).collect();
                let _ = writeln!(out, "  tools: {}", names.join(", "));
            }
            if let Some(error) = result.error() {
                let _ = writeln!(out, "  error: [{}] {}", error.kind, error.message);
                let _ = writeln!(out, "  hint: {}", error.suggestion);
            }
            out.push('\n');
        }

        let s = &self.summary;
        let _ = write!(
            out,
            "{}/{} succeeded, {} failed, {} timed out, {} tool calls, {} ms total",
            s.succeeded, s.total, s.failed, s.timed_out, s.tool_invocations, s.total_latency_ms
        );
        if !s.errors_by_kind.is_empty() {
            let kinds: Vec<String> = s
                .errors_by_kind
                .iter()
                .map(|(kind, n)| format!("{kind}={n}"))
                .collect();
            let _ = write!(out, " ({})", kinds.join(", "));
        }
        out.push('\n');
        out
    }
}

/// One line per task: which worker it would go to.
pub fn render_plan(tasks: &[Task], plan: &[Assignment]) -> String {
    let mut out = String::new();
    for (task, assignment) in tasks.iter().zip(plan) {
        match (&assignment.worker_role, &assignment.error) {
            (Some(role), _) => {
                let _ = writeln!(out, "{} -> {role}: {}", assignment.task_id, task.description);
            }
            (None, Some(error)) => {
                let _ = writeln!(out, "{} -> [{}] {}", assignment.task_id, error.kind, error.message);
            }
            (None, None) => {
                let _ = writeln!(out, "{} -> unassigned", assignment.task_id);
            }
        }
    }
    out
}
