use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::{SessionState, SessionToken};
use tracing::{debug, warn};

use crate::storage::{ScopedStorage, StorageScope};

pub const SESSION_COUNT_KEY: &str = "session_count";
pub const SESSION_ID_KEY: &str = "session_id";

/// Derives the session token and cross-session counter from storage.
#[derive(Clone)]
pub struct SessionTracker {
    storage: Arc<dyn ScopedStorage>,
    // Serializes check-then-mint so concurrent flows start one session, not two.
    guard: Arc<Mutex<()>>,
}

impl SessionTracker {
    pub fn new(storage: Arc<dyn ScopedStorage>) -> Self {
        Self {
            storage,
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn current_session(&self, consent_granted: bool) -> SessionState {
        let _lock = self.guard.lock();

        let existing = self
            .storage
            .get(StorageScope::Session, SESSION_ID_KEY)
            .filter(|t| !t.is_empty());
        let engaged = existing.is_some();

        let session_count = if consent_granted {
            self.advance_count(engaged)
        } else {
            1
        };

        let session_id = match existing {
            Some(token) => SessionToken::from_raw(token),
            None => {
                let token = SessionToken::mint();
                self.storage
                    .set(StorageScope::Session, SESSION_ID_KEY, token.as_str().to_string());
                debug!(sid = %token, "new tab session");
                token
            }
        };

        SessionState {
            session_id,
            // Without consent nothing durable is touched and the caller sees a first session.
            session_count,
            engaged: engaged && consent_granted,
        }
    }

    fn advance_count(&self, session_exists: bool) -> u64 {
        let stored = self.storage.get(StorageScope::Persistent, SESSION_COUNT_KEY);
        let current = match stored.as_deref().map(str::parse::<u64>) {
            None => None,
            Some(Ok(n)) if n >= 1 => Some(n),
            Some(_) => {
                warn!(value = ?stored, "unreadable session counter, restarting at 1");
                None
            }
        };

        match current {
            None => {
                self.write_count(1);
                1
            }
            Some(n) if !session_exists => {
                let next = n + 1;
                self.write_count(next);
                next
            }
            Some(n) => n,
        }
    }

    fn write_count(&self, n: u64) {
        self.storage
            .set(StorageScope::Persistent, SESSION_COUNT_KEY, n.to_string());
    }
}
