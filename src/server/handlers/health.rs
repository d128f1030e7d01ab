use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::errors::ApiError;
use crate::state::AppState;

pub async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "initialized": true
    }))
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let total_messages = state.history.message_count("default").await.unwrap_or(0);
    let total_interactions = state.history.interaction_count().await.unwrap_or(0);
    Ok(Json(json!({
        "initialized": true,
        "total_messages": total_messages,
        "total_interactions": total_interactions
    })))
}
