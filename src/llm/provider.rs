use async_trait::async_trait;

use super::types::ChatRequest;
use crate::errors::ApiError;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// return the provider name (e.g. "openai_compat")
    fn name(&self) -> &str;

    /// check if the provider is healthy/reachable
    async fn health_check(&self) -> Result<bool, ApiError>;

    /// chat completion (non-streaming)
    ///
    /// Misconfiguration (missing credential or endpoint) must surface as
    /// `ApiError::NotConfigured` so callers can tell it apart from
    /// transient failures.
    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError>;

    /// generate embeddings
    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError>;
}
