//! Reasoning layer: one backend turn, either text or tool calls.
//!
//! Providers without tool support (or a turn with no tools offered) go
//! through plain `complete`; nothing is parsed out of their text.

use std::sync::Arc;

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionRequest, GenerationConfig, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolDefinition,
};

/// Context for a reasoning operation.
#[derive(Debug, Clone, Default)]
pub struct ReasoningContext {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

impl ReasoningContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Token usage from an LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Result of a reasoning call.
#[derive(Debug, Clone, PartialEq)]
pub enum RespondResult {
    /// The model responded with text.
    Text(String),
    /// The model wants to call tools.
    ToolCalls {
        tool_calls: Vec<ToolCall>,
        /// Optional text content alongside tool calls.
        content: Option<String>,
    },
}

/// Output from a respond_with_tools call.
#[derive(Debug, Clone)]
pub struct RespondOutput {
    pub result: RespondResult,
    pub usage: TokenUsage,
}

/// Reasoning layer that wraps an LLM provider.
pub struct Reasoning {
    llm: Arc<dyn LlmProvider>,
    config: GenerationConfig,
}

impl Reasoning {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            config: GenerationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Whether tool definitions will actually reach the provider.
    pub fn tools_enabled(&self, context: &ReasoningContext) -> bool {
        !context.tools.is_empty() && self.llm.supports_tools()
    }

    /// Call the LLM with tool definitions, returning either text or tool calls.
    pub async fn respond_with_tools(
        &self,
        context: &ReasoningContext,
    ) -> Result<RespondOutput, LlmError> {
        let messages = context.messages.clone();

        if !self.tools_enabled(context) {
            let request = CompletionRequest::new(messages).with_config(self.config.clone());
            let response = self.llm.complete(request).await?;
            return Ok(RespondOutput {
                result: RespondResult::Text(response.content),
                usage: TokenUsage {
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                },
            });
        }

        let request = ToolCompletionRequest::new(messages, context.tools.clone())
            .with_config(self.config.clone());
        let response = self.llm.complete_with_tools(request).await?;

        let usage = TokenUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };

        let result = if response.tool_calls.is_empty() {
            RespondResult::Text(response.content.unwrap_or_default())
        } else {
            RespondResult::ToolCalls {
                tool_calls: response.tool_calls,
                content: response.content,
            }
        };
        Ok(RespondOutput { result, usage })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::llm::{
        CompletionResponse, EchoProvider, FinishReason, ToolCompletionResponse,
    };

    struct AlwaysCallsTool;

    #[async_trait]
    impl LlmProvider for AlwaysCallsTool {
        fn model_name(&self) -> &str {
            "tool-caller"
        }

        fn supports_tools(&self) -> bool {
            true
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: "plain".into(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: FinishReason::Stop,
            })
        }

        async fn complete_with_tools(
            &self,
            _request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            Ok(ToolCompletionResponse {
                content: Some("looking".into()),
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: "list_files".into(),
                    arguments: serde_json::json!({"directory": "."}),
                }],
                input_tokens: 3,
                output_tokens: 2,
                finish_reason: FinishReason::ToolUse,
            })
        }
    }

    fn some_tool() -> ToolDefinition {
        ToolDefinition {
            name: "list_files".into(),
            description: "List files".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn tool_calls_are_surfaced() {
        let reasoning = Reasoning::new(Arc::new(AlwaysCallsTool));
        let context = ReasoningContext::new()
            .with_messages(vec![ChatMessage::user("list")])
            .with_tools(vec![some_tool()]);
        let output = reasoning.respond_with_tools(&context).await.unwrap();
        match output.result {
            RespondResult::ToolCalls { tool_calls, content } => {
                assert_eq!(tool_calls.len(), 1);
                assert_eq!(content.as_deref(), Some("looking"));
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
        assert_eq!(output.usage.total(), 5);
    }

    #[tokio::test]
    async fn no_tools_uses_plain_completion() {
        let reasoning = Reasoning::new(Arc::new(AlwaysCallsTool));
        let context = ReasoningContext::new().with_messages(vec![ChatMessage::user("hi")]);
        let output = reasoning.respond_with_tools(&context).await.unwrap();
        assert_eq!(output.result, RespondResult::Text("plain".into()));
    }

    #[tokio::test]
    async fn provider_without_tool_support_never_gets_tools() {
        let reasoning = Reasoning::new(Arc::new(EchoProvider::new()));
        let context = ReasoningContext::new()
            .with_messages(vec![ChatMessage::user("run ls")])
            .with_tools(vec![some_tool()]);
        assert!(!reasoning.tools_enabled(&context));
        let output = reasoning.respond_with_tools(&context).await.unwrap();
        assert!(matches!(output.result, RespondResult::Text(_)));
    }
}
