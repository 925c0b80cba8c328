//! API error mapping: every failure renders as `{"error": "<message>"}` with
//! the status the contract promises.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use refinery_queue::QueueError;
use refinery_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or invalid token")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("payload too large")]
    TooLarge,
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("api error: {self}");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            StoreError::Validation(message) => Self::BadRequest(message),
            StoreError::Hint(err) => Self::BadRequest(err.to_string()),
            StoreError::Sqlx(err) => Self::Internal(format!("store error: {err}")),
            StoreError::Json(err) => Self::Internal(format!("stored payload error: {err}")),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            // Capability errors surface verbatim with a 500, e.g. clearing a
            // kafka-backed queue.
            QueueError::Unsupported(message) => Self::Internal(message),
            QueueError::NotConfigured(message) => Self::Unavailable(message),
            QueueError::Redis(err) => Self::Unavailable(format!("queue backend error: {err}")),
            QueueError::Kafka(err) => Self::Unavailable(format!("queue backend error: {err}")),
            QueueError::Io(err) => Self::Internal(format!("queue io error: {err}")),
            QueueError::Serde(err) => Self::Internal(format!("queue payload error: {err}")),
        }
    }
}
