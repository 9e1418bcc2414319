//! Cancellation context passed through `Dispatch`.
//!
//! Wraps a [`tokio_util::sync::CancellationToken`] so the dispatcher
//! composes with the rest of this codebase's tokio-based cancellation
//! plumbing, while staying usable from fully synchronous call sites —
//! `is_cancelled`/`cancel` never require an active tokio runtime.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct DispatchContext {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context derived from an existing token, e.g. one tied to a
    /// request's lifetime in a host application.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Arc::new(Mutex::new(None)),
        }
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        *self.reason.lock() = Some(reason.into());
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Some(reason)` once cancelled; the reason defaults to
    /// `"cancelled"` if the caller never supplied one.
    pub fn err(&self) -> Option<String> {
        if !self.token.is_cancelled() {
            return None;
        }
        Some(
            self.reason
                .lock()
                .clone()
                .unwrap_or_else(|| "cancelled".to_string()),
        )
    }
}
