use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub role: String,
    pub content: String,
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.history.list_conversations().await?;
    let result: Vec<Value> = conversations
        .into_iter()
        .map(|conversation| {
            json!({
                "id": conversation.id,
                "title": conversation.title,
                "created_at": conversation.created_at,
                "updated_at": conversation.updated_at,
                "message_count": conversation.message_count,
                "preview": conversation.preview
            })
        })
        .collect();
    Ok(Json(json!({ "conversations": result })))
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = state.history.create_conversation(payload.title).await?;
    let conversation = state.history.get_conversation(&conversation_id).await?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn append_message(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<AppendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".to_string()));
    }

    state
        .history
        .append_turn(&conversation_id, &payload.role, &payload.content)
        .await?;
    Ok(Json(json!({ "status": "appended" })))
}

pub async fn get_conversation_messages(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .history
        .get_conversation(&conversation_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;

    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(100);

    let turns = state.history.recent_turns(&conversation_id, limit).await?;

    let formatted: Vec<Value> = turns
        .into_iter()
        .map(|turn| {
            json!({
                "role": turn.role,
                "content": turn.content,
                "created_at": turn.created_at
            })
        })
        .collect();

    Ok(Json(json!({ "messages": formatted })))
}
