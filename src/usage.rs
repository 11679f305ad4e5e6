//! Token-usage reporting. Persistence proper is an external concern; this
//! module defines the sink capability and a logging implementation.

use async_trait::async_trait;
use serde::Serialize;

use crate::core::errors::ApiError;
use crate::llm::tokens::Usage;

#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub request_id: String,
    pub model: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub recorded_at: String,
}

impl UsageRecord {
    pub fn new(request_id: &str, model: &str, usage: Usage) -> Self {
        Self {
            request_id: request_id.to_string(),
            model: model.to_string(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: &UsageRecord) -> Result<(), ApiError>;
}

/// Sink that reports usage to the log stream.
pub struct LogUsageSink;

#[async_trait]
impl UsageSink for LogUsageSink {
    async fn record(&self, record: &UsageRecord) -> Result<(), ApiError> {
        tracing::info!(
            request_id = %record.request_id,
            model = %record.model,
            prompt_tokens = record.prompt_tokens,
            completion_tokens = record.completion_tokens,
            "token usage recorded"
        );
        Ok(())
    }
}
