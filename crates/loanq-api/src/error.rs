//! API error types and JSON error response formatting.
//!
//! Query failures keep their pipeline error kind as the `error` code and
//! carry the user-facing explanation in `details.explanation`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use loanq_chat::ChatError;
use serde::Serialize;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "unresolvable_field").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid input.
    BadRequest(String),
    /// 422 Unprocessable Entity - the question could not be translated or executed.
    UnprocessableEntity {
        code: &'static str,
        message: String,
        explanation: String,
    },
    /// 502 Bad Gateway - the language-model provider failed.
    BadGateway { message: String, explanation: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "bad_request".to_string(),
                    message: msg,
                    details: None,
                },
            ),
            ApiError::UnprocessableEntity {
                code,
                message,
                explanation,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: code.to_string(),
                    message,
                    details: Some(serde_json::json!({ "explanation": explanation })),
                },
            ),
            ApiError::BadGateway {
                message,
                explanation,
            } => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    error: "provider_failure".to_string(),
                    message,
                    details: Some(serde_json::json!({ "explanation": explanation })),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match &err {
            ChatError::EmptyMessage | ChatError::MessageTooLong(_) => {
                ApiError::BadRequest(err.user_message())
            }
            _ if err.is_provider_failure() => ApiError::BadGateway {
                message: err.to_string(),
                explanation: err.user_message(),
            },
            _ => ApiError::UnprocessableEntity {
                code: err.kind(),
                message: err.to_string(),
                explanation: err.user_message(),
            },
        }
    }
}
