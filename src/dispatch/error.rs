//! Structured error types the fan-out dispatcher surfaces to callers.

use thiserror::Error;

use super::event::EventKind;

/// Aggregated failure from a single `Dispatch` call.
///
/// Carries enough metadata to correlate with producer-side logs:
/// the original event's trace id, kind, and routing version, the
/// number of subscribers it was fanned out to, the deduplicated list
/// of subscriber ids that failed, and the underlying errors in the
/// order they were recorded.
#[derive(Debug, Error)]
#[error(
    "dispatcher fan-out: trace_id={trace_id} kind={kind} routing_version={routing_version} \
     subscriber_count={subscriber_count} failed_subscribers={failed_subscribers:?}: {errors:?}"
)]
pub struct FanoutError {
    pub trace_id: String,
    pub kind: EventKind,
    pub routing_version: u64,
    pub subscriber_count: usize,
    pub failed_subscribers: Vec<String>,
    pub errors: Vec<String>,
}

impl FanoutError {
    pub fn operation(&self) -> &'static str {
        "dispatcher fan-out"
    }
}

/// Top-level error returned by dispatch-core operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Fanout(#[from] FanoutError),

    /// A subscriber callback returned an error (single-subscriber fast
    /// path, where the dispatcher doesn't wrap it in a `FanoutError`).
    #[error("subscriber {subscriber}: {source}")]
    Subscriber {
        subscriber: String,
        #[source]
        source: anyhow::Error,
    },

    /// A consumer wrapper converted a callback panic into an error.
    #[error("consumer panic: {0}")]
    ConsumerPanic(String),
}
