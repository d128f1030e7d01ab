use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::provider::CompletionProvider;
use super::types::ChatRequest;
use crate::config::LlmSettings;
use crate::errors::ApiError;

/// Client for OpenAI-compatible completion and embedding endpoints.
#[derive(Clone)]
pub struct OpenAiCompatProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatProvider {
    pub fn new(settings: &LlmSettings) -> Self {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: normalize_base_url(&settings.base_url),
            api_key: settings.api_key.clone(),
            client,
        }
    }

    fn require_key(&self) -> Result<&str, ApiError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ApiError::NotConfigured("completion API key is not set".to_string()))
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn has_version_suffix(base_url: &str) -> bool {
    let Some(last_segment) = base_url.rsplit('/').next() else {
        return false;
    };
    let Some(rest) = last_segment.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

fn endpoint(base_url: &str, resource: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with(&format!("/{resource}")) {
        return normalized;
    }
    if has_version_suffix(&normalized) {
        return format!("{normalized}/{resource}");
    }
    format!("{normalized}/v1/{resource}")
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl CompletionProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        let url = endpoint(&self.base_url, "models");
        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        match req.send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError> {
        let key = self.require_key()?;
        let url = endpoint(&self.base_url, "chat/completions");

        let mut body = json!({
            "model": model_id,
            "messages": request.messages,
            "stream": false,
        });

        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
            if let Some(s) = request.stop {
                obj.insert("stop".to_string(), json!(s));
            }
        }

        let res = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::NotConfigured(
                "completion service rejected the configured credentials".to_string(),
            ));
        }
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!("chat completion error: {}", text)));
        }

        let payload: Value = res.json().await.map_err(ApiError::internal)?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        Ok(content)
    }

    async fn embed(&self, inputs: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        let key = self.require_key()?;
        let url = endpoint(&self.base_url, "embeddings");

        let body = json!({
            "model": model_id,
            "input": inputs,
        });

        let res = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::internal)?;

        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::NotConfigured(
                "embedding service rejected the configured credentials".to_string(),
            ));
        }
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!("embedding error: {}", text)));
        }

        let payload: EmbeddingResponse = res.json().await.map_err(ApiError::internal)?;
        Ok(payload.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;
    use std::time::Duration;

    fn settings(api_key: Option<&str>) -> LlmSettings {
        LlmSettings {
            base_url: "https://api.openai.com".to_string(),
            api_key: api_key.map(str::to_string),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn endpoint_appends_default_version() {
        assert_eq!(
            endpoint("https://api.openai.com", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint("https://api.openai.com/", "embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn endpoint_respects_version_suffix() {
        assert_eq!(
            endpoint("http://localhost:1234/v1", "chat/completions"),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            endpoint("https://gateway.example.com/v2", "embeddings"),
            "https://gateway.example.com/v2/embeddings"
        );
    }

    #[tokio::test]
    async fn chat_without_api_key_is_not_configured() {
        let provider = OpenAiCompatProvider::new(&settings(None));
        let request = ChatRequest::new(vec![ChatMessage {
            role: "user".to_string(),
            content: "hello".to_string(),
        }]);

        let err = provider.chat(request, "gpt-4o-mini").await.unwrap_err();
        assert!(err.is_not_configured());
    }

    #[tokio::test]
    async fn embed_without_api_key_is_not_configured() {
        let provider = OpenAiCompatProvider::new(&settings(Some("   ")));
        let err = provider
            .embed(&["hello".to_string()], "text-embedding-3-small")
            .await
            .unwrap_err();
        assert!(err.is_not_configured());
    }
}
