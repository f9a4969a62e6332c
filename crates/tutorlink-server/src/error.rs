use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use tutorlink_shared::ChatError;
use tutorlink_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Chat(
                ChatError::EmptyMessage | ChatError::BodyTooLarge | ChatError::TooManyAttachments,
            ) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Chat(ChatError::NotAMember(_)) => {
                (StatusCode::FORBIDDEN, self.to_string())
            }
            ServerError::Chat(ChatError::Authentication(_)) => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            // Absorbed by the ingress service; reaching here is a bug, but
            // answer conservatively rather than crash.
            ServerError::Chat(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            ServerError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ServerError::Store(StoreError::LastAdmin) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            ServerError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
