use serde::{Deserialize, Serialize};

use crate::history::ConversationTurn;
use crate::knowledge::ContentRecord;

/// A single traveller query plus retrieval options.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantRequest {
    /// Free-text question. Must be non-empty; callers validate before
    /// entering the pipeline.
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Destination the traveller is asking about, when known.
    #[serde(default)]
    pub location: Option<String>,
    /// Maximum knowledge-base records to retrieve.
    #[serde(default)]
    pub max_context: Option<usize>,
    /// Restrict retrieval to these content categories.
    #[serde(default)]
    pub content_types: Option<Vec<String>>,
    #[serde(default)]
    pub include_history: bool,
}

impl AssistantRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            conversation_id: None,
            location: None,
            max_context: None,
            content_types: None,
            include_history: false,
        }
    }
}

/// Everything gathered for one request. Request-scoped, never persisted.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub retrieved_content: Vec<ContentRecord>,
    pub conversation_history: Vec<ConversationTurn>,
    pub location_context: String,
    /// Kept for the post-answer analytics record; `None` when embedding
    /// generation failed and retrieval degraded to text matching.
    pub query_embedding: Option<Vec<f32>>,
}

/// Which of the two terminal pipeline outcomes produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerPath {
    /// Normal path: answer grounded in retrieved context.
    Grounded,
    /// Context was discarded and the query re-sent bare after a primary
    /// failure.
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantResponse {
    pub response: String,
    /// Exactly the records retrieval produced for this request.
    pub sources: Vec<ContentRecord>,
    /// Human-readable summary of the context that informed the answer.
    pub context_used: String,
    /// Heuristic grounding confidence in [0.2, 0.95]; exactly 0.3 on the
    /// fallback path.
    pub confidence: f64,
    #[serde(skip)]
    pub path: AnswerPath,
}
