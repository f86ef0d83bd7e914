//! Monitoring session: cancellation signal plus the first fatal error.
//!
//! Every long-lived task holds a clone and stops when the session is
//! cancelled. A task hitting a session-fatal condition calls
//! [`Session::fail`], which records the error and cancels everyone else.

use std::sync::{Arc, Mutex, PoisonError};

use log::error;
use tokio_util::sync::CancellationToken;

use crate::domain::MonitorError;

#[derive(Clone, Default)]
pub struct Session {
    token: CancellationToken,
    fatal: Arc<Mutex<Option<MonitorError>>>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fatal error (the first one wins) and cancel the session.
    pub fn fail(&self, err: MonitorError) {
        error!("monitoring session failed: {err}");
        {
            let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
        self.token.cancel();
    }

    /// Stop the session without an error.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the session is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Token for a task that must stop with the session but can also be
    /// stopped on its own.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Take the recorded fatal error, if any.
    #[must_use]
    pub fn take_error(&self) -> Option<MonitorError> {
        self.fatal.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
