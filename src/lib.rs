//! AI Orchestrator: routes natural-language tasks to capability-matched
//! workers and executes them against a pluggable LLM backend, with a
//! sandboxed set of local tools the backend may call.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod llm;
pub mod matcher;
pub mod model;
pub mod report;
pub mod result;
pub mod sandbox;

pub use coordinator::{Coordinator, CoordinatorConfig, ExecutionMode};
pub use error::{Error, ErrorDetail, ErrorKind, Result};
pub use executor::{ExecutorConfig, TaskExecutor};
pub use matcher::{FallbackPolicy, FuzzyMatcher, WorkerSelector};
pub use model::{Task, TaskPriority, Worker};
pub use result::{ExecutionResult, ExecutionStatus};
