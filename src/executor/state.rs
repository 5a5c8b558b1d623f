//! Per-task state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a task inside one coordination run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Not yet matched to a worker.
    Pending,
    /// Worker selected, attempt not started.
    Assigned,
    /// An attempt is running.
    Executing,
    Succeeded,
    Failed,
    TimedOut,
}

impl TaskState {
    /// Forward transitions. Leaving `Failed`/`TimedOut` is only possible
    /// through [`TaskLifecycle::retry`].
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, target),
            (Pending, Assigned) | (Pending, Failed) |
            (Assigned, Executing) | (Assigned, Failed) |
            (Executing, Succeeded) | (Executing, Failed) | (Executing, TimedOut)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Whether a retry may leave this state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::Executing => "EXECUTING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Cannot transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TaskState,
    pub to: TaskState,
}

/// A state transition event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: TaskState,
    pub to: TaskState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Tracks one task through its states, including retries.
#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    task_id: String,
    state: TaskState,
    attempts: u32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    transitions: Vec<StateTransition>,
}

impl TaskLifecycle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            state: TaskState::Pending,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            transitions: Vec::new(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Number of attempts that reached `Executing`.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn transition_to(
        &mut self,
        new_state: TaskState,
        reason: Option<String>,
    ) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(new_state) {
            return Err(InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }
        self.record(new_state, reason);
        Ok(())
    }

    /// Re-enter `Assigned` after a failed or timed-out attempt.
    pub fn retry(&mut self, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        if !self.state.is_retryable() {
            return Err(InvalidTransition {
                from: self.state,
                to: TaskState::Assigned,
            });
        }
        self.completed_at = None;
        self.record(TaskState::Assigned, Some(reason.into()));
        Ok(())
    }

    fn record(&mut self, new_state: TaskState, reason: Option<String>) {
        tracing::trace!(task_id = %self.task_id, from = %self.state, to = %new_state, "Task state change");
        self.transitions.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Utc::now(),
            reason,
        });
        self.state = new_state;

        match new_state {
            TaskState::Executing => {
                self.attempts += 1;
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            s if s.is_terminal() => self.completed_at = Some(Utc::now()),
            _ => {}
        }
    }

    /// Every state visited, starting with `Pending`.
    pub fn history(&self) -> Vec<TaskState> {
        std::iter::once(TaskState::Pending)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    /// Time between the first attempt starting and the task finishing.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        self.started_at.map(|start| {
            let end = self.completed_at.unwrap_or_else(Utc::now);
            end.signed_duration_since(start)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Assigned));
        assert!(TaskState::Assigned.can_transition_to(TaskState::Executing));
        assert!(TaskState::Executing.can_transition_to(TaskState::Succeeded));
        assert!(TaskState::Executing.can_transition_to(TaskState::Failed));
        assert!(TaskState::Executing.can_transition_to(TaskState::TimedOut));
        assert!(TaskState::Pending.can_transition_to(TaskState::Failed));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!TaskState::Pending.can_transition_to(TaskState::Executing));
        assert!(!TaskState::Succeeded.can_transition_to(TaskState::Assigned));
        assert!(!TaskState::Failed.can_transition_to(TaskState::Executing));
        assert!(!TaskState::TimedOut.can_transition_to(TaskState::Executing));
        assert!(!TaskState::Failed.can_transition_to(TaskState::Assigned));
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::TimedOut.is_terminal());
        assert!(!TaskState::Executing.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut lc = TaskLifecycle::new("t1");
        lc.transition_to(TaskState::Assigned, None).unwrap();
        lc.transition_to(TaskState::Executing, None).unwrap();
        lc.transition_to(TaskState::Succeeded, Some("done".into()))
            .unwrap();
        assert_eq!(lc.state(), TaskState::Succeeded);
        assert_eq!(lc.attempts(), 1);
        assert!(lc.elapsed().is_some());
        assert_eq!(
            lc.history(),
            vec![
                TaskState::Pending,
                TaskState::Assigned,
                TaskState::Executing,
                TaskState::Succeeded
            ]
        );
    }

    #[test]
    fn retry_reenters_assigned_first() {
        let mut lc = TaskLifecycle::new("t1");
        lc.transition_to(TaskState::Assigned, None).unwrap();
        lc.transition_to(TaskState::Executing, None).unwrap();
        lc.transition_to(TaskState::TimedOut, None).unwrap();

        assert!(lc.transition_to(TaskState::Executing, None).is_err());
        lc.retry("attempt 2").unwrap();
        assert_eq!(lc.state(), TaskState::Assigned);
        lc.transition_to(TaskState::Executing, None).unwrap();
        lc.transition_to(TaskState::Succeeded, None).unwrap();
        assert_eq!(lc.attempts(), 2);
    }

    #[test]
    fn cannot_retry_success() {
        let mut lc = TaskLifecycle::new("t1");
        lc.transition_to(TaskState::Assigned, None).unwrap();
        lc.transition_to(TaskState::Executing, None).unwrap();
        lc.transition_to(TaskState::Succeeded, None).unwrap();
        let err = lc.retry("again").unwrap_err();
        assert_eq!(err.from, TaskState::Succeeded);
        assert_eq!(err.to_string(), "Cannot transition from SUCCEEDED to ASSIGNED");
    }

    #[test]
    fn task_state_serde() {
        let json = serde_json::to_string(&TaskState::TimedOut).unwrap();
        assert_eq!(json, "\"TIMED_OUT\"");
        let parsed: TaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskState::TimedOut);
    }
}
