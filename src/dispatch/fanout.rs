//! Bounded-parallel delivery to N subscribers with pooled duplicates
//! and per-subscriber error/panic isolation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;

use super::context::DispatchContext;
use super::error::{DispatchError, FanoutError};
use super::event::Event;
use super::recycler::{DefaultPool, Pool, PooledEvent, Recycler, Slot};
use super::telemetry::{global_metrics_handle, TelemetrySink};
use super::wrapper::Subscriber;

/// Constructor parameters for [`Dispatcher`]. `worker_limit = 0` means
/// "default to this host's parallelism level", mirroring the spec's
/// `W <= 0` convention.
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    pub worker_limit: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { worker_limit: 0 }
    }
}

impl DispatcherConfig {
    /// Resolves `worker_limit = 0` to the host's parallelism level.
    fn resolved_worker_limit(&self) -> usize {
        if self.worker_limit > 0 {
            self.worker_limit
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// The two ways a single subscriber's delivery can fail, kept distinct
/// so the failed-subscriber id recorded for a context cancellation is
/// always `"context"` rather than the subscriber's own id.
enum DeliveryError {
    Context(String),
    Subscriber(String),
}

/// Fan-out dispatcher: clones one event into N pooled duplicates,
/// dispatches them concurrently under a bounded worker budget,
/// aggregates errors, and recycles the original regardless of outcome.
pub struct Dispatcher {
    recycler: Option<Arc<Recycler>>,
    duplicate_pool: Arc<dyn Pool<Event>>,
    metrics: Arc<dyn TelemetrySink>,
    pool: rayon::ThreadPool,
}

impl Dispatcher {
    pub fn new(
        recycler: Option<Arc<Recycler>>,
        duplicate_pool: Option<Arc<dyn Pool<Event>>>,
        metrics: Option<Arc<dyn TelemetrySink>>,
        config: DispatcherConfig,
    ) -> Self {
        let worker_limit = config.resolved_worker_limit();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_limit)
            .thread_name(|i| format!("dispatch-fanout-{i}"))
            .build()
            .expect("fan-out worker pool: failed to spawn rayon threads");

        Self {
            recycler,
            duplicate_pool: duplicate_pool
                .unwrap_or_else(|| Arc::new(DefaultPool::<Event>::new())),
            metrics: metrics.unwrap_or_else(|| Arc::new(global_metrics_handle())),
            pool,
        }
    }

    /// Delivers `original` to every subscriber; see the module-level
    /// decision tree for the single- and zero-subscriber fast paths.
    pub fn dispatch(
        &self,
        ctx: &DispatchContext,
        original: Option<Box<PooledEvent>>,
        subscribers: &[Subscriber],
    ) -> Result<(), DispatchError> {
        let Some(original) = original else {
            return Ok(());
        };

        let n = subscribers.len();

        if n == 0 {
            self.recycle_original(Some(original));
            return Ok(());
        }

        if n == 1 {
            return self.dispatch_single(original, &subscribers[0]);
        }

        self.dispatch_many(ctx, original, subscribers)
    }

    /// N = 1: invoked directly with the original, no duplicate
    /// allocated. Per the spec's documented (open-question) behavior,
    /// the dispatcher does not recycle `original` on this path — that
    /// is the single consumer's wrapper's responsibility. A caller that
    /// wires a bare callback with no recycling here will leak the pool
    /// slot; see DESIGN.md.
    fn dispatch_single(
        &self,
        original: Box<PooledEvent>,
        subscriber: &Subscriber,
    ) -> Result<(), DispatchError> {
        let Some(callback) = &subscriber.callback else {
            return Ok(());
        };
        callback(Some(&original.value)).map_err(|source| DispatchError::Subscriber {
            subscriber: subscriber.id.clone(),
            source,
        })
    }

    /// N >= 2: the parallel fan-out protocol.
    fn dispatch_many(
        &self,
        ctx: &DispatchContext,
        original: Box<PooledEvent>,
        subscribers: &[Subscriber],
    ) -> Result<(), DispatchError> {
        let n = subscribers.len();
        let durations_ns: Vec<AtomicU64> = (0..n).map(|_| AtomicU64::new(0)).collect();
        let errors: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let failed: Mutex<Vec<String>> = Mutex::new(Vec::new());

        let start = Instant::now();
        let source = &original.value;

        self.pool.install(|| {
            subscribers.par_iter().enumerate().for_each(|(i, sub)| {
                self.run_subscriber_task(ctx, sub, i, source, &durations_ns, &errors, &failed);
            });
        });

        if let Some(reason) = ctx.err() {
            errors.lock().push(format!("context error: {reason}"));
            failed.lock().push("context".to_string());
        }

        let total = start.elapsed();
        let per_subscriber: Vec<Duration> = durations_ns
            .iter()
            .map(|d| Duration::from_nanos(d.load(Ordering::Relaxed)))
            .collect();
        self.metrics.fanout_dispatch(n, &per_subscriber, total);

        let trace_id = original.value.trace_id.clone();
        let kind = original.value.kind;
        let routing_version = original.value.routing_version;
        self.recycle_original(Some(original));

        let errors = errors.into_inner();
        if errors.is_empty() {
            return Ok(());
        }

        let mut failed_subscribers = Vec::new();
        for id in failed.into_inner() {
            if id.is_empty() || failed_subscribers.contains(&id) {
                continue;
            }
            failed_subscribers.push(id);
        }

        Err(DispatchError::Fanout(FanoutError {
            trace_id,
            kind,
            routing_version,
            subscriber_count: n,
            failed_subscribers,
            errors,
        }))
    }

    /// One subscriber's task: `pending -> checking_ctx ->
    /// acquiring_duplicate -> delivering -> done`. Always terminates at
    /// `done`; every path that gets a duplicate recycles it exactly
    /// once before returning.
    #[allow(clippy::too_many_arguments)]
    fn run_subscriber_task(
        &self,
        ctx: &DispatchContext,
        sub: &Subscriber,
        index: usize,
        source: &Event,
        durations_ns: &[AtomicU64],
        errors: &Mutex<Vec<String>>,
        failed: &Mutex<Vec<String>>,
    ) {
        let Some(callback) = &sub.callback else {
            return;
        };

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.deliver_one(ctx, sub, index, source, callback.as_ref(), durations_ns)
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(DeliveryError::Context(message))) => {
                tracing::warn!(subscriber = %sub.id, error = %message, "fan-out delivery skipped: context cancelled");
                errors.lock().push(message);
                failed.lock().push("context".to_string());
            }
            Ok(Err(DeliveryError::Subscriber(message))) => {
                tracing::warn!(subscriber = %sub.id, error = %message, "fan-out delivery failed");
                errors.lock().push(message);
                failed.lock().push(sub.id.clone());
            }
            Err(payload) => {
                let message = panic_message(&payload);
                tracing::warn!(subscriber = %sub.id, panic = %message, "fan-out delivery panicked");
                errors
                    .lock()
                    .push(format!("subscriber {} panic: {message}", sub.id));
                failed.lock().push(sub.id.clone());
            }
        }
    }

    /// Delivers to one subscriber. The two failure modes are kept
    /// distinguishable so the caller records the right failed-subscriber
    /// id: a cancellation observed before delivery is recorded under
    /// the fixed id `"context"` (spec §4.2/§7), never the subscriber's
    /// own id.
    fn deliver_one(
        &self,
        ctx: &DispatchContext,
        sub: &Subscriber,
        index: usize,
        source: &Event,
        callback: &(dyn Fn(Option<&Event>) -> anyhow::Result<()> + Send + Sync),
        durations_ns: &[AtomicU64],
    ) -> Result<(), DeliveryError> {
        if let Some(reason) = ctx.err() {
            return Err(DeliveryError::Context(format!("context error: {reason}")));
        }

        let Some(mut duplicate) = self.borrow_duplicate() else {
            return callback(None)
                .map_err(|e| DeliveryError::Subscriber(format!("subscriber {}: {e}", sub.id)));
        };

        duplicate.value.reset();
        duplicate.value.copy_from(source);

        // The callback runs under its own `catch_unwind` so a panic
        // doesn't unwind straight through this stack frame and drop
        // (leak) `duplicate` before it's recycled — the duplicate must
        // be returned to the pool on every exit, panic included. The
        // duplicate is recycled first, then the panic (if any) is
        // resumed so `run_subscriber_task`'s own `catch_unwind` still
        // observes and records it.
        let start = Instant::now();
        let callback_outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(Some(&duplicate.value))
        }));
        durations_ns[index].store(start.elapsed().as_nanos() as u64, Ordering::Relaxed);

        if let Some(recycler) = &self.recycler {
            recycler.recycle_event(Some(duplicate));
        } else {
            drop(duplicate);
        }

        match callback_outcome {
            Ok(result) => {
                result.map_err(|e| DeliveryError::Subscriber(format!("subscriber {}: {e}", sub.id)))
            }
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    /// Pulls a duplicate from the configured pool; checks it out of the
    /// recycler's debug tracker if one is configured. Falls back to a
    /// fresh allocation if the pool is exhausted — kept as a real
    /// branch (not `unwrap`) so a future blocking/fallible pool
    /// implementation can return `None` and still hit the documented
    /// "no duplicate available" path.
    fn borrow_duplicate(&self) -> Option<Box<PooledEvent>> {
        let slot = self
            .duplicate_pool
            .acquire()
            .unwrap_or_else(|| Box::new(Slot::new(Event::default())));
        if let Some(recycler) = &self.recycler {
            recycler.checkout_event(&slot);
        }
        Some(slot)
    }

    fn recycle_original(&self, original: Option<Box<PooledEvent>>) {
        if let Some(recycler) = &self.recycler {
            recycler.recycle_event(original);
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
