//! Capability matching: picks the worker best suited to a task.
//!
//! The default strategy compares every word of the task description against
//! each worker's capability tags with a normalized Levenshtein similarity.
//! Words scoring at least [`DEFAULT_THRESHOLD`] against some tag count toward
//! that worker's score.

use serde::{Deserialize, Serialize};

use crate::error::CoordinationError;
use crate::model::{Task, Worker};

/// Minimum similarity for a word to count as a capability hit.
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Strategy for assigning a task to one member of a worker pool.
pub trait WorkerSelector: Send + Sync {
    fn name(&self) -> &str;

    /// Return a member of `workers`, or an error. Never panics on an empty pool.
    fn select<'a>(
        &self,
        task: &Task,
        workers: &'a [Worker],
    ) -> Result<&'a Worker, CoordinationError>;
}

/// What to do when no worker scores above zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy", content = "role")]
pub enum FallbackPolicy {
    /// Fail with `NoSuitableWorkerError`.
    #[default]
    Fail,
    /// Use the pool member with this role.
    DefaultWorker(String),
}

/// Score of one worker for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerScore {
    pub role: String,
    pub score: f64,
    /// Description words that matched, with their similarity
    pub matched: Vec<(String, f64)>,
}

/// Fuzzy string matcher over capability tags.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    threshold: f64,
    fallback: FallbackPolicy,
}

impl FuzzyMatcher {
    pub fn new(fallback: FallbackPolicy) -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            fallback,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn fallback(&self) -> &FallbackPolicy {
        &self.fallback
    }

    /// Score every worker in pool order.
    pub fn scores(&self, task: &Task, workers: &[Worker]) -> Vec<WorkerScore> {
        let tokens = tokenize(&task.description);
        workers
            .iter()
            .map(|worker| self.score_worker(&tokens, worker))
            .collect()
    }

    fn score_worker(&self, tokens: &[String], worker: &Worker) -> WorkerScore {
        let tags: Vec<String> = worker
            .capabilities
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        let mut matched = Vec::new();
        for token in tokens {
            let best = tags
                .iter()
                .map(|tag| similarity(token, tag))
                .fold(0.0_f64, f64::max);
            if best >= self.threshold {
                matched.push((token.clone(), best));
            }
        }

        WorkerScore {
            role: worker.role.clone(),
            score: matched.iter().map(|(_, s)| s).sum(),
            matched,
        }
    }
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(FallbackPolicy::Fail)
    }
}

impl WorkerSelector for FuzzyMatcher {
    fn name(&self) -> &str {
        "fuzzy"
    }

    fn select<'a>(
        &self,
        task: &Task,
        workers: &'a [Worker],
    ) -> Result<&'a Worker, CoordinationError> {
        let no_worker = || CoordinationError::NoSuitableWorker {
            task_id: task.id.clone(),
            pool_size: workers.len(),
        };

        if workers.is_empty() {
            return Err(no_worker());
        }

        let scores = self.scores(task, workers);

        // Specialists (fewer capabilities) win ties; then pool order.
        let mut best: Option<(usize, f64)> = None;
        for (idx, score) in scores.iter().enumerate() {
            if score.score <= 0.0 {
                continue;
            }
            best = match best {
                None => Some((idx, score.score)),
                Some((best_idx, best_score)) => {
                    let better = if (score.score - best_score).abs() < 1e-9 {
                        workers[idx].capabilities.len() < workers[best_idx].capabilities.len()
                    } else {
                        score.score > best_score
                    };
                    if better {
                        Some((idx, score.score))
                    } else {
                        Some((best_idx, best_score))
                    }
                }
            };
        }

        if let Some((idx, score)) = best {
            tracing::debug!(
                task_id = %task.id,
                worker = %workers[idx].role,
                score,
                "Selected worker"
            );
            return Ok(&workers[idx]);
        }

        match &self.fallback {
            FallbackPolicy::Fail => {
                tracing::warn!(task_id = %task.id, "No worker matched task");
                Err(no_worker())
            }
            FallbackPolicy::DefaultWorker(role) => {
                let worker = workers.iter().find(|w| &w.role == role).ok_or_else(|| {
                    CoordinationError::DefaultWorkerMissing {
                        task_id: task.id.clone(),
                        role: role.clone(),
                    }
                })?;
                tracing::debug!(task_id = %task.id, worker = %role, "Using default worker");
                Ok(worker)
            }
        }
    }
}

/// Lowercase words of a description; anything non-alphanumeric separates.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Normalized edit-distance similarity in `[0, 1]`.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coder_and_tester() -> Vec<Worker> {
        vec![
            Worker::new("coder", ["code", "python", "write"]),
            Worker::new("tester", ["test", "pytest"]),
        ]
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Write a Python-function, please!"),
            vec!["write", "a", "python", "function", "please"]
        );
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_similarity_bounds() {
        assert!((similarity("python", "python") - 1.0).abs() < f64::EPSILON);
        assert!(similarity("python", "pytest") < DEFAULT_THRESHOLD);
        assert!(similarity("tests", "test") >= DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_coder_selected_for_python_task() {
        let workers = coder_and_tester();
        let task = Task::with_id("t1", "Write Python function to add two numbers");
        let worker = FuzzyMatcher::default().select(&task, &workers).unwrap();
        assert_eq!(worker.role, "coder");
    }

    #[test]
    fn test_tester_selected_for_pytest_task() {
        let workers = coder_and_tester();
        let task = Task::with_id("t1", "Run pytest tests");
        let worker = FuzzyMatcher::default().select(&task, &workers).unwrap();
        assert_eq!(worker.role, "tester");
    }

    #[test]
    fn test_specialist_wins_tie() {
        let workers = vec![
            Worker::new("generalist", ["deploy", "code", "test", "docs"]),
            Worker::new("specialist", ["deploy"]),
        ];
        let task = Task::with_id("t1", "deploy the service");
        let worker = FuzzyMatcher::default().select(&task, &workers).unwrap();
        assert_eq!(worker.role, "specialist");
    }

    #[test]
    fn test_equal_size_tie_goes_to_pool_order() {
        let workers = vec![
            Worker::new("first", ["deploy"]),
            Worker::new("second", ["deploy"]),
        ];
        let task = Task::with_id("t1", "deploy");
        let worker = FuzzyMatcher::default().select(&task, &workers).unwrap();
        assert_eq!(worker.role, "first");
    }

    #[test]
    fn test_no_match_fails_by_default() {
        let workers = coder_and_tester();
        let task = Task::with_id("t1", "Bake a chocolate cake");
        let err = FuzzyMatcher::default().select(&task, &workers).unwrap_err();
        assert!(matches!(
            err,
            CoordinationError::NoSuitableWorker { pool_size: 2, .. }
        ));
    }

    #[test]
    fn test_no_match_uses_default_worker() {
        let workers = coder_and_tester();
        let task = Task::with_id("t1", "Bake a chocolate cake");
        let matcher = FuzzyMatcher::new(FallbackPolicy::DefaultWorker("tester".into()));
        assert_eq!(matcher.select(&task, &workers).unwrap().role, "tester");
    }

    #[test]
    fn test_default_worker_missing_from_pool() {
        let workers = coder_and_tester();
        let task = Task::with_id("t1", "Bake a chocolate cake");
        let matcher = FuzzyMatcher::new(FallbackPolicy::DefaultWorker("baker".into()));
        let err = matcher.select(&task, &workers).unwrap_err();
        assert!(matches!(err, CoordinationError::DefaultWorkerMissing { .. }));
    }

    #[test]
    fn test_empty_pool_is_an_error_even_with_default() {
        let task = Task::with_id("t1", "write code");
        let matcher = FuzzyMatcher::new(FallbackPolicy::DefaultWorker("coder".into()));
        assert!(matcher.select(&task, &[]).is_err());
    }

    #[test]
    fn test_scores_report_matched_words() {
        let workers = coder_and_tester();
        let task = Task::with_id("t1", "write python code");
        let scores = FuzzyMatcher::default().scores(&task, &workers);
        assert_eq!(scores.len(), 2);
        assert!((scores[0].score - 3.0).abs() < 1e-9);
        assert_eq!(scores[0].matched.len(), 3);
        assert_eq!(scores[1].score, 0.0);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let workers = Worker::default_pool();
        let task = Task::with_id("t1", "Review the security of the login code");
        let matcher = FuzzyMatcher::default();
        let first = matcher.select(&task, &workers).unwrap().role.clone();
        for _ in 0..10 {
            assert_eq!(matcher.select(&task, &workers).unwrap().role, first);
        }
    }

    #[test]
    fn test_fallback_policy_serialization() {
        let json = serde_json::to_string(&FallbackPolicy::DefaultWorker("coder".into())).unwrap();
        assert_eq!(json, r#"{"policy":"default_worker","role":"coder"}"#);
    }
}
