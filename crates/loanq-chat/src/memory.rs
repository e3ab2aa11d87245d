//! Conversation memory and the session registry.
//!
//! Each [`Session`] owns one [`ConversationMemory`] behind an async mutex.
//! The orchestrator holds that lock for a whole request, so questions in one
//! session run one at a time while separate sessions proceed in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::types::ConversationTurn;

/// Session used when a request does not name one.
pub const DEFAULT_SESSION: &str = "default";

// =============================================================================
// ConversationMemory
// =============================================================================

/// Append-only log of turns, in order.
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Snapshot of every turn, oldest first.
    pub fn list(&self) -> Vec<ConversationTurn> {
        self.turns.clone()
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// =============================================================================
// Session
// =============================================================================

/// One isolated conversation.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Epoch seconds of the last request that touched this session.
    last_used_at: AtomicI64,
    pub memory: tokio::sync::Mutex<ConversationMemory>,
}

impl Session {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            created_at: now,
            last_used_at: AtomicI64::new(now.timestamp()),
            memory: tokio::sync::Mutex::new(ConversationMemory::new()),
        }
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.last_used_at.store(now.timestamp(), Ordering::Relaxed);
    }

    /// Whether the session has been idle longer than `timeout_secs`.
    /// A zero timeout never expires.
    fn is_expired(&self, now: DateTime<Utc>, timeout_secs: u64) -> bool {
        if timeout_secs == 0 {
            return false;
        }
        let idle = now.timestamp() - self.last_used_at.load(Ordering::Relaxed);
        idle > i64::try_from(timeout_secs).unwrap_or(i64::MAX)
    }
}

// =============================================================================
// SessionRegistry
// =============================================================================

/// Maps session ids to sessions, creating them on first use and dropping
/// them once idle past the timeout.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    timeout_secs: u64,
}

impl SessionRegistry {
    /// A registry whose sessions never expire.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(timeout_secs: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout_secs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(|poisoned| {
            warn!("Session registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        self.get_or_create_at(id, Utc::now())
    }

    /// The live session with this id, if any.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.get_at(id, Utc::now())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn get_or_create_at(&self, id: &str, now: DateTime<Utc>) -> Arc<Session> {
        let mut sessions = self.lock();
        self.evict_expired(&mut sessions, now);
        if let Some(session) = sessions.get(id) {
            session.touch(now);
            return Arc::clone(session);
        }
        info!(session = id, "Session created");
        let session = Arc::new(Session::new(id));
        session.touch(now);
        sessions.insert(id.to_string(), Arc::clone(&session));
        session
    }

    fn get_at(&self, id: &str, now: DateTime<Utc>) -> Option<Arc<Session>> {
        let mut sessions = self.lock();
        self.evict_expired(&mut sessions, now);
        let session = sessions.get(id)?;
        session.touch(now);
        Some(Arc::clone(session))
    }

    fn evict_expired(&self, sessions: &mut HashMap<String, Arc<Session>>, now: DateTime<Utc>) {
        sessions.retain(|id, session| {
            let expired = session.is_expired(now, self.timeout_secs);
            if expired {
                info!(
                    session = %id,
                    age_secs = (now - session.created_at).num_seconds(),
                    "Session expired"
                );
            }
            !expired
        });
    }
}
