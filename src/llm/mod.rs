//! Generation Port: the abstract text-generation capability.
//!
//! - [`LlmProvider`]: the trait backends implement
//! - [`Reasoning`]: one conversation turn, text or tool calls
//! - [`EchoProvider`]: offline deterministic backend
//! - [`ConcurrencyLimited`]: bounds in-flight requests to any backend
//!
//! Vendor HTTP adapters live outside this crate; anything implementing
//! [`LlmProvider`] can be handed to the executor.

mod echo;
mod limited;
pub mod provider;
pub mod reasoning;

pub use echo::EchoProvider;
pub use limited::ConcurrencyLimited;
pub use provider::*;
pub use reasoning::{Reasoning, ReasoningContext, RespondOutput, RespondResult, TokenUsage};

use std::sync::Arc;

use crate::error::ConfigError;

/// Build a provider by name.
pub fn create_provider(name: &str) -> Result<Arc<dyn LlmProvider>, ConfigError> {
    match name.trim().to_lowercase().as_str() {
        "echo" => Ok(Arc::new(EchoProvider::new())),
        other => Err(ConfigError::UnknownProvider(other.to_string())),
    }
}
