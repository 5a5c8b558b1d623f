//! Tasks and workers: the inputs of a coordination run.

use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;

/// Priority level for tasks. Only affects display order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A unit of work submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: String,

    /// Natural-language description of the work
    pub description: String,

    #[serde(default)]
    pub priority: TaskPriority,

    /// IDs of tasks this one builds on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_id(format!("task_{}", uuid::Uuid::new_v4()), description)
    }

    pub fn with_id(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority: TaskPriority::Normal,
            dependencies: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Checks that need no knowledge of the rest of the batch.
    pub fn validate(&self) -> Result<(), CoordinationError> {
        if self.id.trim().is_empty() {
            return Err(self.invalid("task id is empty"));
        }
        if self.description.trim().is_empty() {
            return Err(self.invalid("task description is empty"));
        }
        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err(self.invalid("task depends on itself"));
        }
        Ok(())
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> CoordinationError {
        CoordinationError::Validation {
            task_id: self.id.clone(),
            reason: reason.into(),
        }
    }
}

/// A capability profile tasks can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub role: String,

    /// Ordered skill tags used for matching
    pub capabilities: Vec<String>,

    /// Role-specific system prompt; a generic one is built when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Worker {
    pub fn new<I, S>(role: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// The pool the CLI runs with.
    pub fn default_pool() -> Vec<Worker> {
        vec![
            Worker::new(
                "coder",
                ["code", "python", "rust", "write", "implement", "function", "refactor", "fix"],
            ),
            Worker::new("tester", ["test", "pytest", "unittest", "coverage", "verify"]),
            Worker::new("reviewer", ["review", "audit", "security", "quality", "lint"]),
            Worker::new("researcher", ["research", "search", "analyze", "investigate", "compare"]),
            Worker::new("writer", ["document", "docs", "readme", "explain", "summarize"]),
        ]
    }
}
