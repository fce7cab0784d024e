use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use parley_types::{Message, api::SendMessageRequest};

use crate::AppState;
use crate::error::ApiResult;

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let message = state.store.append(conversation_id, req.user_id, &req.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Full history, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.store.history(conversation_id).await?))
}
