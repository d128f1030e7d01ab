//! Knowledge-base search collaborator.
//!
//! This module provides:
//! - `ContentRecord`: a stored knowledge-base entry eligible for retrieval
//! - `KnowledgeIndex` trait for abstraction over vector-search backends
//! - `RemoteKnowledgeIndex` for the hosted vector-search HTTP API

mod remote;

pub use remote::RemoteKnowledgeIndex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

/// A stored knowledge-base entry.
///
/// Records are written by an ingestion process outside this service; the
/// orchestration layer only reads them. `similarity` is populated by the
/// search backend and is absent on records that never went through a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    pub content_id: String,
    /// Content category tag ("destination", "customs", "events", ...).
    pub content_type: String,
    pub title: String,
    pub content: String,
    /// Open key-value map owned by ingestion. Known optional keys:
    /// `location` (destination name), `season`, `source_url`.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Parameters for a similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    /// Minimum similarity for returned records (0.0-1.0).
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Abstract trait for knowledge-base search backends.
///
/// Contract: results are ordered by descending similarity, at most `limit`
/// long, and every record satisfies `similarity >= threshold`. The ranking
/// algorithm behind it is opaque to callers.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// Semantic search for records similar to the query text.
    async fn search_similar(&self, request: &SearchRequest)
        -> Result<Vec<ContentRecord>, ApiError>;

    /// Case-insensitive substring match over title/content fields.
    ///
    /// Used when embedding generation is unavailable; results carry no
    /// meaningful similarity score of their own.
    async fn search_text(&self, query: &str, limit: usize)
        -> Result<Vec<ContentRecord>, ApiError>;
}
