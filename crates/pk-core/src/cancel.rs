//! Cooperative cancellation of rebuild sessions
//!
//! A [`CancellationToken`] travels with every build call of a session. The
//! [`CancellationRegistry`] lets another thread (the UI event loop) flag a
//! session by id. Builds poll the flag at checkpoints; nothing ever waits.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Cancelled;

/// Identifier of one rebuild session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh session id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cancellation flag of one session, passed through every build call
#[derive(Debug, Clone)]
pub struct CancellationToken {
    session: SessionId,
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that is not registered anywhere
    pub fn detached() -> Self {
        Self {
            session: SessionId::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Session this token belongs to
    pub fn id(&self) -> SessionId {
        self.session
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation directly through the token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Checkpoint: `Err(Cancelled)` once the session has been cancelled
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Maps live sessions to their cancellation flags
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<AtomicBool>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its token
    pub fn begin_session(&self) -> CancellationToken {
        let token = CancellationToken::detached();
        self.sessions
            .lock()
            .insert(token.session, Arc::clone(&token.cancelled));
        tracing::debug!("Session {} started", token.session);
        token
    }

    /// Flag a session as cancelled. Returns false if the session is unknown.
    pub fn cancel(&self, session: SessionId) -> bool {
        match self.sessions.lock().get(&session) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                tracing::info!("Cancellation requested for session {}", session);
                true
            }
            None => false,
        }
    }

    /// Flag every live session as cancelled
    pub fn cancel_all(&self) -> usize {
        let sessions = self.sessions.lock();
        for flag in sessions.values() {
            flag.store(true, Ordering::Release);
        }
        sessions.len()
    }

    /// Unknown or finished sessions report false
    pub fn is_cancelled(&self, session: SessionId) -> bool {
        self.sessions
            .lock()
            .get(&session)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Forget a finished session
    pub fn end_session(&self, session: SessionId) {
        if self.sessions.lock().remove(&session).is_some() {
            tracing::debug!("Session {} ended", session);
        }
    }

    /// Ids of all registered sessions
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().copied().collect()
    }
}
