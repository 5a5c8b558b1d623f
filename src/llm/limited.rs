//! Provider wrapper bounding the number of in-flight backend requests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::LlmError;
use crate::llm::{
    CompletionRequest, CompletionResponse, LlmProvider, ToolCompletionRequest,
    ToolCompletionResponse,
};

pub struct ConcurrencyLimited {
    inner: Arc<dyn LlmProvider>,
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimited {
    /// `max_in_flight` of zero is treated as one.
    pub fn new(inner: Arc<dyn LlmProvider>, max_in_flight: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, LlmError> {
        self.semaphore
            .acquire()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.inner.model_name().to_string(),
                reason: format!("Semaphore acquire failed: {e}"),
            })
    }
}

#[async_trait]
impl LlmProvider for ConcurrencyLimited {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn supports_tools(&self) -> bool {
        self.inner.supports_tools()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let _permit = self.permit().await?;
        self.inner.complete(request).await
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let _permit = self.permit().await?;
        self.inner.complete_with_tools(request).await
    }
}
