//! Session store collaborator seam.
//!
//! The engine reads the session token before opening a channel and, on
//! an authorization failure, asks the store to end the session. It never
//! touches token storage itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

/// Where the caller keeps its session credentials.
pub trait SessionStore: Send + Sync {
    /// Current bearer token, if signed in.
    fn token(&self) -> Option<String>;

    /// Clear the session and force the caller back to sign-in.
    fn end_session(&self);
}

/// In-memory session used by the CLI and tests.
#[derive(Default)]
pub struct MemorySession {
    token: Mutex<Option<String>>,
    ended: AtomicBool,
    notify: Notify,
}

impl MemorySession {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token),
            ended: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Wait until [`SessionStore::end_session`] has been called. Every
    /// waiter is woken.
    pub async fn ended(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent end is not missed.
        notified.as_mut().enable();
        if self.is_ended() {
            return;
        }
        notified.await;
    }
}

impl SessionStore for MemorySession {
    fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn end_session(&self) {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.ended.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        tracing::warn!("Session ended after authorization failure");
    }
}
