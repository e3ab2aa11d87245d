//! Application state shared across all route handlers.
//!
//! AppState holds the query pipeline and the session registry. It is passed
//! to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use loanq_chat::{QueryOrchestrator, SessionRegistry};
use loanq_core::config::LoanqConfig;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks. Per-session
/// memory is locked inside each session, not here.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<LoanqConfig>,
    /// Translate, execute and compose pipeline over the record store.
    pub orchestrator: Arc<QueryOrchestrator>,
    /// Conversation sessions keyed by the `x-session-id` header.
    pub sessions: Arc<SessionRegistry>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: LoanqConfig, orchestrator: QueryOrchestrator) -> Self {
        let sessions = SessionRegistry::with_idle_timeout(config.chat.session_timeout_secs);
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            sessions: Arc::new(sessions),
            start_time: Instant::now(),
        }
    }
}
