//! Per-consumer adapter: routing-version filtering, panic isolation,
//! recycle-on-exit, and telemetry around a user callback.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::context::DispatchContext;
use super::error::DispatchError;
use super::event::Event;
use super::recycler::{PooledEvent, Recycler};
use super::telemetry::TelemetrySink;

/// Delivery callback invoked by a [`ConsumerWrapper`]. Receives `None`
/// when fan-out could not produce a duplicate to deliver (pool and
/// fallback allocation both failed).
pub type Callback = Arc<dyn Fn(Option<&Event>) -> anyhow::Result<()> + Send + Sync>;

/// One registered subscriber: an id plus its delivery callback.
#[derive(Clone)]
pub struct Subscriber {
    pub id: String,
    pub callback: Option<Callback>,
}

impl Subscriber {
    pub fn new(id: impl Into<String>, callback: Callback) -> Self {
        Self {
            id: id.into(),
            callback: Some(callback),
        }
    }
}

/// Per-consumer adapter applying the routing-version filter, panic
/// isolation, and recycle-on-exit around a user callback.
pub struct ConsumerWrapper {
    consumer_id: String,
    min_version: AtomicU64,
    recycler: Option<Arc<Recycler>>,
    metrics: Option<Arc<dyn TelemetrySink>>,
}

impl ConsumerWrapper {
    pub fn new(
        consumer_id: impl Into<String>,
        min_version: u64,
        recycler: Option<Arc<Recycler>>,
        metrics: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            min_version: AtomicU64::new(min_version),
            recycler,
            metrics,
        }
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Atomic store of the minimum acceptable routing version,
    /// release-ordered so a concurrent `should_process` reader
    /// (acquire-ordered) always observes it or a later update.
    pub fn update_min_version(&self, v: u64) {
        self.min_version.store(v, Ordering::Release);
    }

    pub fn should_process(&self, ev: &Event) -> bool {
        if ev.kind.is_critical() {
            return true;
        }
        ev.routing_version >= self.min_version.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> Option<&Arc<dyn TelemetrySink>> {
        self.metrics.as_ref()
    }

    fn effective_metrics(&self) -> Arc<dyn TelemetrySink> {
        self.metrics
            .clone()
            .unwrap_or_else(|| Arc::new(super::telemetry::global_metrics_handle()))
    }

    /// Invokes `callback` with `ev`, applying the filter and panic
    /// boundary, and unconditionally recycling `ev` on the way out
    /// (success, callback error, or panic) if a recycler is present.
    pub fn invoke(
        &self,
        _ctx: &DispatchContext,
        ev: Option<Box<PooledEvent>>,
        callback: Option<&Callback>,
    ) -> Result<(), DispatchError> {
        let Some(slot) = ev else {
            return Ok(());
        };

        let metrics = self.effective_metrics();
        metrics.consumer_invocation(&self.consumer_id);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let Some(cb) = callback else {
                return Ok(());
            };
            if !self.should_process(&slot.value) {
                metrics.consumer_filtered(&self.consumer_id);
                return Ok(());
            }
            let start = Instant::now();
            let result = cb(Some(&slot.value));
            metrics.consumer_processing(&self.consumer_id, start.elapsed());
            result
        }));

        if let Some(recycler) = &self.recycler {
            recycler.recycle_event(Some(slot));
        }

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DispatchError::Subscriber {
                subscriber: self.consumer_id.clone(),
                source,
            }),
            Err(payload) => {
                metrics.consumer_panic(&self.consumer_id);
                tracing::warn!(
                    consumer = %self.consumer_id,
                    panic = %panic_message(&payload),
                    "consumer callback panicked"
                );
                Err(DispatchError::ConsumerPanic(format!(
                    "{}\n{}",
                    panic_message(&payload),
                    std::backtrace::Backtrace::capture()
                )))
            }
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
