use axum::{
    Json,
    extract::{Query, State},
};
use tracing::info;

use parley_types::{
    User,
    api::{LoginRequest, UserQuery},
};

use crate::AppState;
use crate::error::{ApiError, ApiResult};

const MAX_USERNAME_LEN: usize = 32;

/// Get-or-create by username. Email and phone are only stored on creation.
pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> ApiResult<Json<User>> {
    let username = req.username.trim().to_string();
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "username must be 1 to {} bytes",
            MAX_USERNAME_LEN
        )));
    }

    let user = state
        .db
        .blocking(move |db| db.login_user(&username, req.email.trim(), req.phone_number.trim()))
        .await?;
    info!("User {} logged in", user.username);
    Ok(Json(user))
}

pub async fn list_users(State(state): State<AppState>, Query(query): Query<UserQuery>) -> ApiResult<Json<Vec<User>>> {
    let users = state.db.blocking(move |db| db.list_users(query.exclude)).await?;
    Ok(Json(users))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{app, call, login};

    #[tokio::test]
    async fn login_is_get_or_create() {
        let (app, _db) = app();
        let first = login(&app, "alice").await;
        let again = login(&app, "alice").await;
        assert_eq!(first, again);

        let (status, user) = call(
            &app,
            "POST",
            "/users",
            Some(json!({ "username": "bob", "email": "bob@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["email"], "bob@example.com");
        assert_eq!(user["phone_number"], "");
    }

    #[tokio::test]
    async fn blank_username_is_bad_request() {
        let (app, _db) = app();
        let (status, body) = call(&app, "POST", "/users", Some(json!({ "username": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("username"));
    }

    #[tokio::test]
    async fn listing_excludes_the_caller() {
        let (app, _db) = app();
        let alice = login(&app, "alice").await;
        login(&app, "bob").await;
        login(&app, "carol").await;

        let (status, users) = call(&app, "GET", &format!("/users?exclude={}", alice), None).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = users.as_array().unwrap().iter().map(|u| u["username"].as_str().unwrap()).collect();
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&"alice"));

        let (_, everyone) = call(&app, "GET", "/users", None).await;
        assert_eq!(everyone.as_array().unwrap().len(), 3);
    }
}
