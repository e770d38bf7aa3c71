//! Concurrent session registry with per-session locks.
//!
//! Each session lives behind its own `tokio::sync::Mutex`; the lock is held
//! for the duration of a turn (or a payment event), so mutations are
//! linearizable within a session while sessions stay fully concurrent with
//! each other.

use super::{DialogueState, Session, UserProfile};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to a locked session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// In-memory session store.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
}

/// Lightweight listing row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
    pub dialogue_state: DialogueState,
    pub terminal: bool,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session for a user.
    pub fn create(&self, user: UserProfile, now: DateTime<Utc>) -> (String, SessionHandle) {
        let id = format!("sess-{}", uuid::Uuid::new_v4().simple());
        let handle = Arc::new(Mutex::new(Session::new(id.clone(), user, now)));
        self.sessions.insert(id.clone(), handle.clone());
        (id, handle)
    }

    /// Look up a session handle.
    pub fn get(&self, session_id: &str) -> Result<SessionHandle> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Summaries of every session. Handles are cloned out of the map before
    /// locking so no map shard guard is held across an await.
    pub async fn list(&self, now: DateTime<Utc>) -> Vec<SessionSummary> {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            let session = handle.lock().await;
            summaries.push(SessionSummary {
                session_id: session.id.clone(),
                user_id: session.user.user_id.clone(),
                created_at: session.created_at,
                message_count: session.messages.len(),
                dialogue_state: DialogueState::derive(&session, now),
                terminal: session.terminal,
            });
        }
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }
}
