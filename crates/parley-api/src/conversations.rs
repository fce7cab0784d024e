use axum::{Json, extract::State};

use parley_types::api::{ResolveRequest, ResolveResponse};

use crate::AppState;
use crate::error::ApiResult;

/// The one conversation between the two users, created on first contact.
pub async fn resolve(State(state): State<AppState>, Json(req): Json<ResolveRequest>) -> ApiResult<Json<ResolveResponse>> {
    let conversation_id = state.resolver.resolve(req.user_id, req.peer_id).await?;
    Ok(Json(ResolveResponse { conversation_id }))
}
