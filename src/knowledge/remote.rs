use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{ContentRecord, KnowledgeIndex, SearchRequest};
use crate::config::KnowledgeSettings;
use crate::errors::ApiError;

/// Client for the hosted vector-search service.
///
/// Collections hold the ingested knowledge base; this client only issues
/// read-side queries against one collection.
#[derive(Clone)]
pub struct RemoteKnowledgeIndex {
    endpoint: String,
    collection: String,
    api_key: Option<String>,
    client: Client,
}

impl RemoteKnowledgeIndex {
    pub fn new(settings: &KnowledgeSettings) -> Self {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            collection: settings.collection.clone(),
            api_key: settings.api_key.clone(),
            client,
        }
    }

    fn query_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}/{}",
            self.endpoint,
            urlencoding::encode(&self.collection),
            suffix
        )
    }

    async fn post_query(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<Vec<ContentRecord>, ApiError> {
        let mut req = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        let res = req.send().await.map_err(ApiError::internal)?;

        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::NotConfigured(
                "vector search service rejected the configured credentials".to_string(),
            ));
        }
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Internal(format!("vector search error: {}", text)));
        }

        let payload: QueryResponse = res.json().await.map_err(ApiError::internal)?;
        Ok(payload.results)
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    results: Vec<ContentRecord>,
}

#[async_trait]
impl KnowledgeIndex for RemoteKnowledgeIndex {
    async fn search_similar(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<ContentRecord>, ApiError> {
        let url = self.query_url("query");
        self.post_query(&url, serde_json::to_value(request).map_err(ApiError::internal)?)
            .await
    }

    async fn search_text(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<ContentRecord>, ApiError> {
        let url = self.query_url("query/text");
        self.post_query(&url, json!({ "query": query, "limit": limit }))
            .await
    }
}
