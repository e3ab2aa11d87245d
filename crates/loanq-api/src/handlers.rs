//! Route handler functions for all API endpoints.
//!
//! Each handler resolves the session from the `x-session-id` header,
//! works through AppState and returns JSON responses.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use loanq_chat::{QueryResponse, Role, Session, DEFAULT_SESSION};
use loanq_core::schema::SchemaDescription;

use crate::error::ApiError;
use crate::state::AppState;

/// Header naming the conversation session.
pub const SESSION_HEADER: &str = "x-session-id";

const MAX_SESSION_ID_LEN: usize = 64;

// =============================================================================
// Request and response types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryResponse {
    pub messages: Vec<MemoryMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub records: u64,
    pub translator: String,
    pub sessions: u64,
}

// =============================================================================
// Session resolution
// =============================================================================

/// Session id from the header, or the default session when absent.
fn session_id(headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(value) = headers.get(SESSION_HEADER) else {
        return Ok(DEFAULT_SESSION.to_string());
    };
    let id = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{} must be ASCII", SESSION_HEADER)))?
        .trim();
    let valid = !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ApiError::BadRequest(format!(
            "{} must be 1-{} characters of letters, digits, '-' or '_'",
            SESSION_HEADER, MAX_SESSION_ID_LEN
        )));
    }
    Ok(id.to_string())
}

fn existing_session(state: &AppState, headers: &HeaderMap) -> Result<Option<Arc<Session>>, ApiError> {
    let id = session_id(headers)?;
    Ok(state.sessions.get(&id))
}

// =============================================================================
// Handler functions
// =============================================================================

/// POST /query - answer a question in the caller's session.
pub async fn query(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let id = session_id(&headers)?;
    let session = state.sessions.get_or_create(&id);
    let response = state
        .orchestrator
        .handle_query(&session, &request.text)
        .await?;
    Ok(Json(response))
}

/// GET /memory - the session's conversation, oldest first.
pub async fn get_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MemoryResponse>, ApiError> {
    let messages = match existing_session(&state, &headers)? {
        Some(session) => session
            .memory
            .lock()
            .await
            .list()
            .into_iter()
            .map(|turn| MemoryMessage {
                role: turn.role,
                content: turn.content,
            })
            .collect(),
        None => Vec::new(),
    };
    Ok(Json(MemoryResponse { messages }))
}

/// DELETE /memory - clear the session's conversation.
pub async fn reset_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ResetResponse>, ApiError> {
    if let Some(session) = existing_session(&state, &headers)? {
        session.memory.lock().await.reset();
        tracing::info!(session = %session.id, "Memory reset");
    }
    Ok(Json(ResetResponse {
        status: "Memory reset successfully".to_string(),
    }))
}

/// GET /health - liveness plus a few service facts.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        records: state.orchestrator.store().len() as u64,
        translator: state.orchestrator.translator_name().to_string(),
        sessions: state.sessions.len() as u64,
    })
}

/// GET /schema - fields, kinds and allowed values of the loan data.
pub async fn schema(State(state): State<AppState>) -> Json<SchemaDescription> {
    Json(state.orchestrator.schema().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_id_defaults() {
        assert_eq!(session_id(&HeaderMap::new()).unwrap(), "default");
    }

    #[test]
    fn test_session_id_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("analyst-7"));
        assert_eq!(session_id(&headers).unwrap(), "analyst-7");
    }

    #[test]
    fn test_session_id_rejects_bad_values() {
        for bad in ["", "has space", "semi;colon"] {
            let mut headers = HeaderMap::new();
            headers.insert(SESSION_HEADER, HeaderValue::from_str(bad).unwrap());
            assert!(matches!(session_id(&headers), Err(ApiError::BadRequest(_))), "{}", bad);
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            SESSION_HEADER,
            HeaderValue::from_str(&"a".repeat(MAX_SESSION_ID_LEN + 1)).unwrap(),
        );
        assert!(session_id(&headers).is_err());
    }
}
