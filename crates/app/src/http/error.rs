use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use docrag_core::RagError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Rag(#[from] RagError),
    #[error("file exceeds the {limit_mb} MB upload limit")]
    PayloadTooLarge { limit_mb: usize },
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

pub fn status_for(error: &RagError) -> StatusCode {
    match error {
        RagError::Validation(_) => StatusCode::BAD_REQUEST,
        RagError::Load(_) | RagError::EmptyDocument(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RagError::Embedding(_) | RagError::Index { .. } | RagError::Generation(_) => {
            StatusCode::BAD_GATEWAY
        }
        RagError::Configuration(_) | RagError::InvalidChunkConfig(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Rag(inner) => (status_for(inner), inner.code(), inner.public_message()),
            ApiError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", self.to_string())
            }
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "validation_error", message.clone())
            }
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), code, error = %self, "request failed");
        }

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}
