//! API error types and the JSON envelope.
//!
//! Every reply, success or failure, is `{ ok, data, error }`. ApiError maps
//! the pipeline's error taxonomy onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use abode_chat::response::DEADLINE_APOLOGY;
use abode_chat::ChatError;

/// Error half of the envelope.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "session_expired").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Stable reply envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

/// Wrap a successful payload.
pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        ok: true,
        data: Some(data),
        error: None,
    })
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or invalid input.
    BadRequest(String),
    /// 404 - no such session.
    SessionNotFound(Uuid),
    /// 410 - session expired or ended.
    SessionExpired(Uuid),
    /// 502 - a dependency failed in a way the pipeline could not absorb.
    /// The orchestrator currently absorbs listing-store and LLM failures,
    /// so only direct `ChatError::ListingStore` conversions reach this.
    Upstream { code: &'static str, message: String },
    /// 504 - the per-message deadline elapsed.
    DeadlineExceeded,
    /// 500 - unexpected server error.
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SessionExpired(_) => StatusCode::GONE,
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ApiError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message) = match self {
            ApiError::BadRequest(msg) => ("malformed_request", msg),
            ApiError::SessionNotFound(id) => {
                ("session_not_found", format!("Session {} not found", id))
            }
            ApiError::SessionExpired(id) => {
                ("session_expired", format!("Session {} has expired", id))
            }
            ApiError::Upstream { code, message } => (code, message),
            ApiError::DeadlineExceeded => ("deadline_exceeded", DEADLINE_APOLOGY.to_string()),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal API error");
                ("internal_error", msg)
            }
        };

        let body: Envelope<()> = Envelope {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message,
            }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::SessionNotFound(id) => ApiError::SessionNotFound(id),
            ChatError::SessionExpired(id) => ApiError::SessionExpired(id),
            ChatError::MalformedRequest(msg) => ApiError::BadRequest(msg),
            ChatError::ListingStore(msg) => ApiError::Upstream {
                code: "listing_store_error",
                message: msg,
            },
            ChatError::DeadlineExceeded(_) => ApiError::DeadlineExceeded,
            ChatError::Storage(msg) => ApiError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_errors_map_to_status() {
        let id = Uuid::new_v4();
        let cases = [
            (ChatError::SessionNotFound(id), StatusCode::NOT_FOUND),
            (ChatError::SessionExpired(id), StatusCode::GONE),
            (ChatError::MalformedRequest("x".into()), StatusCode::BAD_REQUEST),
            (ChatError::ListingStore("x".into()), StatusCode::BAD_GATEWAY),
            (ChatError::DeadlineExceeded(45), StatusCode::GATEWAY_TIMEOUT),
            (ChatError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_success_envelope_shape() {
        let Json(env) = ok(serde_json::json!({"n": 1}));
        let value = serde_json::to_value(env).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"ok": true, "data": {"n": 1}, "error": null})
        );
    }
}
