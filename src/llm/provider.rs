use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatDelta, ChatRequest};
use crate::core::errors::ApiError;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Streaming chat completion. Each received delta is either answer text
    /// or a function-call fragment.
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<ChatDelta, ApiError>>, ApiError>;

    /// Single-shot chat completion returning the full message content.
    async fn complete(&self, request: ChatRequest) -> Result<String, ApiError>;
}
