use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use parley_core::ChatError;
use parley_types::{BackendError, api::ErrorResponse};

/// Handler error, rendered as `{"error": "..."}` with a status per kind.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("{0}")]
    BadRequest(String),
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        ApiError::Chat(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Chat(err) => match err {
                ChatError::EmptyContent | ChatError::ContentTooLong { .. } | ChatError::SelfConversation(_) => {
                    StatusCode::BAD_REQUEST
                }
                ChatError::NotAParticipant { .. } => StatusCode::FORBIDDEN,
                ChatError::DuplicateConversation { .. } => StatusCode::CONFLICT,
                ChatError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ChatError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                ChatError::NoActiveConversation | ChatError::SessionClosed => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
