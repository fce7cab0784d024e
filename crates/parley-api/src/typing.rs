use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use parley_core::ChatError;
use parley_types::{Backend, TypingIndicator, api::SetTypingRequest};

use crate::AppState;
use crate::error::ApiResult;

pub async fn set_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SetTypingRequest>,
) -> ApiResult<Json<TypingIndicator>> {
    if !Backend::is_participant(&state.db, conversation_id, req.user_id).await? {
        return Err(ChatError::NotAParticipant {
            conversation_id,
            user_id: req.user_id,
        }
        .into());
    }
    let row = state.presence.set_typing(conversation_id, req.user_id, req.is_typing).await?;
    Ok(Json(row))
}

/// Users typing right now; rows past the typing window are left out.
pub async fn get_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<Vec<TypingIndicator>>> {
    Ok(Json(state.presence.active_typists(conversation_id).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;

    use parley_types::TypingIndicator;

    use crate::test_support::{app, call, login};

    #[tokio::test]
    async fn typing_round_trip_and_expiry() {
        let (app, db) = app();
        let alice = login(&app, "alice").await;
        let bob = login(&app, "bob").await;
        let (_, body) = call(&app, "POST", "/conversations", Some(json!({ "user_id": alice, "peer_id": bob }))).await;
        let cid = body["conversation_id"].as_str().unwrap().to_string();
        let uri = format!("/conversations/{}/typing", cid);

        let (status, row) = call(&app, "PUT", &uri, Some(json!({ "user_id": alice, "is_typing": true }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(row["composite_key"], format!("{}_{}", cid, alice));

        let (_, typing) = call(&app, "GET", &uri, None).await;
        assert_eq!(typing.as_array().unwrap().len(), 1);
        assert_eq!(typing[0]["user_id"], alice.as_str());

        // A row nobody refreshed for a while no longer counts.
        let stale = Utc::now() - chrono::Duration::seconds(10);
        db.upsert_typing(&TypingIndicator::new(cid.parse().unwrap(), alice.parse().unwrap(), true, stale))
            .unwrap();
        let (_, typing) = call(&app, "GET", &uri, None).await;
        assert!(typing.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn outsider_cannot_set_typing() {
        let (app, _db) = app();
        let alice = login(&app, "alice").await;
        let bob = login(&app, "bob").await;
        let mallory = login(&app, "mallory").await;
        let (_, body) = call(&app, "POST", "/conversations", Some(json!({ "user_id": alice, "peer_id": bob }))).await;
        let uri = format!("/conversations/{}/typing", body["conversation_id"].as_str().unwrap());

        let (status, _) = call(&app, "PUT", &uri, Some(json!({ "user_id": mallory, "is_typing": true }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
