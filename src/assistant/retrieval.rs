//! Context gathering.
//!
//! Collects the three context sources for a request (knowledge-base
//! matches, conversation history, location context) concurrently. Each
//! sub-source is fault-isolated: a failure degrades that source to empty
//! and is logged, it never aborts the others or the request.

use std::sync::Arc;

use serde_json::json;

use crate::history::{ConversationStore, ConversationTurn};
use crate::knowledge::{ContentRecord, KnowledgeIndex, SearchRequest};
use crate::llm::CompletionProvider;

use super::types::{AssistantRequest, RetrievedContext};

pub(crate) const DEFAULT_MAX_CONTEXT: usize = 5;
const TEXT_FALLBACK_MAX_CONTEXT: usize = 3;
/// Similarity assigned to substring matches; marks a non-semantic result.
const TEXT_MATCH_SIMILARITY: f64 = 0.5;
// Hand-tuned retrieval floors; existing consumers depend on them.
const SIMILARITY_FLOOR: f64 = 0.4;
const LOCATION_SIMILARITY_FLOOR: f64 = 0.3;
const LOCATION_RESULT_LIMIT: usize = 2;
const LOCATION_CONTENT_TYPES: [&str; 2] = ["destination", "location_overview"];
/// Turns fetched from storage; the prompt layer trims further.
const HISTORY_FETCH_LIMIT: i64 = 8;

pub struct ContextRetriever {
    index: Arc<dyn KnowledgeIndex>,
    provider: Arc<dyn CompletionProvider>,
    history: ConversationStore,
    embedding_model: String,
}

impl ContextRetriever {
    pub fn new(
        index: Arc<dyn KnowledgeIndex>,
        provider: Arc<dyn CompletionProvider>,
        history: ConversationStore,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            index,
            provider,
            history,
            embedding_model: embedding_model.into(),
        }
    }

    /// Gather everything the prompt layer needs. Never fails; sub-sources
    /// degrade independently.
    pub async fn gather(&self, request: &AssistantRequest) -> RetrievedContext {
        let (primary, conversation_history, location_context) = tokio::join!(
            self.primary_search(request),
            self.conversation_history(request),
            self.location_context(request),
        );
        let (retrieved_content, query_embedding) = primary;

        RetrievedContext {
            retrieved_content,
            conversation_history,
            location_context,
            query_embedding,
        }
    }

    /// Semantic search over the knowledge base, degrading to a substring
    /// match when the query cannot be embedded.
    async fn primary_search(
        &self,
        request: &AssistantRequest,
    ) -> (Vec<ContentRecord>, Option<Vec<f32>>) {
        let query_embedding = match self
            .provider
            .embed(&[request.query.clone()], &self.embedding_model)
            .await
        {
            Ok(mut vectors) if !vectors.is_empty() => {
                let embedding = vectors.remove(0);
                tracing::debug!("query embedding generated ({} dims)", embedding.len());
                Some(embedding)
            }
            Ok(_) => {
                tracing::warn!("embedding service returned no vectors, using text match");
                None
            }
            Err(err) => {
                tracing::warn!("query embedding failed, using text match: {}", err);
                None
            }
        };

        if query_embedding.is_none() {
            let limit = request.max_context.unwrap_or(TEXT_FALLBACK_MAX_CONTEXT);
            let records = match self.index.search_text(&request.query, limit).await {
                Ok(mut records) => {
                    for record in &mut records {
                        record.similarity = Some(TEXT_MATCH_SIMILARITY);
                    }
                    records
                }
                Err(err) => {
                    tracing::warn!("text match failed: {}", err);
                    Vec::new()
                }
            };
            return (records, None);
        }

        let search = SearchRequest {
            query: request.query.clone(),
            limit: request.max_context.unwrap_or(DEFAULT_MAX_CONTEXT),
            threshold: SIMILARITY_FLOOR,
            content_types: request.content_types.clone(),
            metadata: request
                .location
                .as_ref()
                .map(|location| json!({ "location": location })),
        };

        let records = match self.index.search_similar(&search).await {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!("knowledge search failed: {}", err);
                Vec::new()
            }
        };

        (records, query_embedding)
    }

    /// Recent turns of the named conversation, oldest first. Absence of
    /// history never fails the request.
    async fn conversation_history(&self, request: &AssistantRequest) -> Vec<ConversationTurn> {
        if !request.include_history {
            return Vec::new();
        }
        let Some(conversation_id) = &request.conversation_id else {
            return Vec::new();
        };

        match self
            .history
            .recent_turns(conversation_id, HISTORY_FETCH_LIMIT)
            .await
        {
            Ok(turns) => turns,
            Err(err) => {
                tracing::warn!("history fetch failed for {}: {}", conversation_id, err);
                Vec::new()
            }
        }
    }

    /// Narrative context about the traveller's location, or a generic
    /// placeholder when the knowledge base has nothing for it.
    async fn location_context(&self, request: &AssistantRequest) -> String {
        let Some(location) = &request.location else {
            return String::new();
        };

        let search = SearchRequest {
            query: location.clone(),
            limit: LOCATION_RESULT_LIMIT,
            threshold: LOCATION_SIMILARITY_FLOOR,
            content_types: Some(
                LOCATION_CONTENT_TYPES
                    .iter()
                    .map(|t| t.to_string())
                    .collect(),
            ),
            metadata: None,
        };

        match self.index.search_similar(&search).await {
            Ok(records) if !records.is_empty() => records
                .iter()
                .map(|record| record.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            Ok(_) => format!(
                "General travel information about {} is not available in the knowledge base.",
                location
            ),
            Err(err) => {
                tracing::warn!("location context lookup failed for {}: {}", location, err);
                String::new()
            }
        }
    }
}
