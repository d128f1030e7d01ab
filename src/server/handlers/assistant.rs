use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::assistant::AssistantRequest;
use crate::errors::ApiError;
use crate::state::AppState;

pub async fn query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AssistantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let response = state.assistant.generate_answer(&payload).await?;
    Ok(Json(response))
}
