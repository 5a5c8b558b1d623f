//! Offline provider that answers with the last user message.
//!
//! Used by the CLI when no backend is configured, and by dry runs.

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::{ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role};

pub struct EchoProvider {
    model: String,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self {
            model: "echo".to_string(),
        }
    }

    fn reply(messages: &[ChatMessage]) -> String {
        let role = messages
            .iter()
            .find(|m| m.role == Role::System)
            .and_then(|m| m.content.lines().next())
            .unwrap_or("assistant");
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        format!("[{role}] {prompt}")
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn count_words(messages: &[ChatMessage]) -> u32 {
    let words: usize = messages
        .iter()
        .map(|m| m.content.split_whitespace().count())
        .sum();
    u32::try_from(words).unwrap_or(u32::MAX)
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let content = Self::reply(&request.messages);
        Ok(CompletionResponse {
            output_tokens: u32::try_from(content.split_whitespace().count()).unwrap_or(u32::MAX),
            input_tokens: count_words(&request.messages),
            content,
            finish_reason: FinishReason::Stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_last_user_message_with_role_line() {
        let provider = EchoProvider::new();
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are the coder worker.\nCapabilities: code"),
            ChatMessage::user("first"),
            ChatMessage::user("Write a function"),
        ]);
        let response = provider.complete(request).await.unwrap();
        assert_eq!(response.content, "[You are the coder worker.] Write a function");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert!(response.input_tokens > 0);
    }

    #[tokio::test]
    async fn is_deterministic() {
        let provider = EchoProvider::new();
        let make = || CompletionRequest::new(vec![ChatMessage::user("same input")]);
        let a = provider.complete(make()).await.unwrap();
        let b = provider.complete(make()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.content, "[assistant] same input");
    }

    #[test]
    fn does_not_support_tools() {
        assert!(!EchoProvider::new().supports_tools());
    }
}
