//! Pooled object lifecycle: acquisition, return-to-pool, and (in debug
//! builds) double-return detection plus memory poisoning.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use super::event::{Event, EventKind, ExecReport};
use super::telemetry::TelemetrySink;

/// Overwritten into [`Slot::sentinel`] on recycle, in debug mode, so a
/// consumer still holding a stale reference sees an obviously corrupt
/// value rather than silently reusing freed state.
pub const POISON_SENTINEL: u64 = 0xDEAD_BEEF_DEAD_BEEF;

/// Pool wrapper around a pooled value.
///
/// `sentinel` is deliberately the first field: it stands in for "the
/// first machine word" the spec asks the recycler to poison. Rust
/// won't let us safely reinterpret the raw bytes of a struct that owns
/// heap allocations (`Event::trace_id` is a `String`), so the sentinel
/// is modeled as an explicit, safely-readable/writable word at the
/// front of the allocation instead of an unsafe raw-pointer write —
/// same observable effect (a stale holder reads garbage), no UB.
pub struct Slot<T> {
    sentinel: AtomicU64,
    pub value: T,
}

impl<T> Slot<T> {
    pub fn new(value: T) -> Self {
        Self {
            sentinel: AtomicU64::new(0),
            value,
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.sentinel.load(Ordering::Acquire) == POISON_SENTINEL
    }

    fn poison(&self) {
        self.sentinel.store(POISON_SENTINEL, Ordering::Release);
    }

    fn unpoison(&self) {
        self.sentinel.store(0, Ordering::Release);
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }
}

impl<T> std::ops::Deref for Slot<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> std::ops::DerefMut for Slot<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

pub type PooledEvent = Slot<Event>;
pub type PooledExecReport = Slot<ExecReport>;

/// An object pool: `Acquire() -> any`, `Release(any)` from the spec's
/// external-interfaces section, specialized to `Slot<T>`.
pub trait Pool<T>: Send + Sync {
    fn acquire(&self) -> Option<Box<Slot<T>>>;
    fn release(&self, item: Box<Slot<T>>);
}

/// Default pool: a lock-free free-list over zero-initialized values,
/// installed automatically when a dispatcher or recycler isn't given
/// one explicitly.
pub struct DefaultPool<T> {
    free: crossbeam::queue::SegQueue<Box<Slot<T>>>,
}

impl<T> Default for DefaultPool<T> {
    fn default() -> Self {
        Self {
            free: crossbeam::queue::SegQueue::new(),
        }
    }
}

impl<T> DefaultPool<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Default + Send + Sync> Pool<T> for DefaultPool<T> {
    fn acquire(&self) -> Option<Box<Slot<T>>> {
        Some(self.free.pop().unwrap_or_else(|| Box::new(Slot::new(T::default()))))
    }

    fn release(&self, item: Box<Slot<T>>) {
        self.free.push(item);
    }
}

/// Manages pooled acquisition/return for events and exec-reports, with
/// debug-mode double-return detection and poisoning.
pub struct Recycler {
    event_pool: Option<Arc<dyn Pool<Event>>>,
    exec_report_pool: Option<Arc<dyn Pool<ExecReport>>>,
    metrics: Arc<dyn TelemetrySink>,
    debug_mode: AtomicBool,
    put_tracker: DashMap<usize, ()>,
}

impl fmt::Debug for Recycler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recycler")
            .field("debug_mode", &self.debug_mode.load(Ordering::Relaxed))
            .field("tracked", &self.put_tracker.len())
            .finish()
    }
}

impl Recycler {
    pub fn new(
        event_pool: Option<Arc<dyn Pool<Event>>>,
        exec_report_pool: Option<Arc<dyn Pool<ExecReport>>>,
        metrics: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        Self {
            event_pool,
            exec_report_pool,
            metrics: metrics.unwrap_or_else(|| {
                Arc::new(super::telemetry::global_metrics_handle()) as Arc<dyn TelemetrySink>
            }),
            debug_mode: AtomicBool::new(false),
            put_tracker: DashMap::new(),
        }
    }

    /// Acquires a fresh event from the configured pool, checking it
    /// out of the debug put-tracker (a no-op outside debug mode) and
    /// resetting it before handing it to the caller.
    pub fn acquire_event(&self) -> Option<Box<PooledEvent>> {
        let pool = self.event_pool.as_ref()?;
        let mut slot = pool.acquire()?;
        self.checkout_event(&slot);
        slot.value.reset();
        Some(slot)
    }

    pub fn acquire_exec_report(&self) -> Option<Box<PooledExecReport>> {
        let pool = self.exec_report_pool.as_ref()?;
        let mut slot = pool.acquire()?;
        self.checkout_exec_report(&slot);
        slot.value.reset();
        Some(slot)
    }

    /// Returns `ev` to the event pool. No-op if `ev` is `None` or no
    /// event pool is configured.
    pub fn recycle_event(&self, ev: Option<Box<PooledEvent>>) {
        let Some(mut slot) = ev else { return };
        let Some(pool) = self.event_pool.as_ref() else {
            return;
        };

        let kind = slot.value.kind;
        let start = Instant::now();

        if self.debug_mode.load(Ordering::Acquire) {
            let addr = slot.addr();
            if self.put_tracker.insert(addr, ()).is_some() {
                self.metrics.recycler_double_put();
                tracing::error!(addr = format!("{addr:#x}"), "double-put detected on event recycle");
                panic!(
                    "double-put detected: event at {addr:#x} was recycled twice without an \
                     intervening checkout (RUST_BACKTRACE=1 for a stack trace)"
                );
            }
        }

        slot.value.reset();

        if self.debug_mode.load(Ordering::Acquire) {
            slot.poison();
        }

        pool.release(slot);
        self.metrics.recycler_event(kind, start.elapsed());
        tracing::trace!(kind = kind.label(), "event recycled");
    }

    pub fn recycle_exec_report(&self, er: Option<Box<PooledExecReport>>) {
        let Some(mut slot) = er else { return };
        let Some(pool) = self.exec_report_pool.as_ref() else {
            return;
        };

        let start = Instant::now();

        if self.debug_mode.load(Ordering::Acquire) {
            let addr = slot.addr();
            if self.put_tracker.insert(addr, ()).is_some() {
                self.metrics.recycler_double_put();
                panic!(
                    "double-put detected: exec report at {addr:#x} was recycled twice without \
                     an intervening checkout (RUST_BACKTRACE=1 for a stack trace)"
                );
            }
        }

        slot.value.reset();

        if self.debug_mode.load(Ordering::Acquire) {
            slot.poison();
        }

        pool.release(slot);
        self.metrics.recycler_event(EventKind::ExecReport, start.elapsed());
    }

    /// Recycles every element of `items`, in order. A `None` entry is
    /// silently skipped (delegated to [`Self::recycle_event`]'s own
    /// null-check), not treated as an error.
    pub fn recycle_many(&self, items: Vec<Option<Box<PooledEvent>>>) {
        for item in items {
            self.recycle_event(item);
        }
    }

    pub fn enable_debug_mode(&self) {
        self.debug_mode.store(true, Ordering::Release);
    }

    /// Disables debug mode and clears the put-tracker, so stale
    /// entries from a prior debug session don't cause false
    /// double-put positives if debug mode is re-enabled later.
    pub fn disable_debug_mode(&self) {
        self.debug_mode.store(false, Ordering::Release);
        self.put_tracker.clear();
    }

    pub fn is_debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::Acquire)
    }

    /// Removes `ev`'s pointer from the put-tracker so a future
    /// return-to-pool is considered first-time. No-op outside debug
    /// mode.
    pub fn checkout_event(&self, ev: &PooledEvent) {
        if !self.debug_mode.load(Ordering::Acquire) {
            return;
        }
        ev.unpoison();
        self.put_tracker.remove(&ev.addr());
    }

    pub fn checkout_exec_report(&self, er: &PooledExecReport) {
        if !self.debug_mode.load(Ordering::Acquire) {
            return;
        }
        er.unpoison();
        self.put_tracker.remove(&er.addr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::telemetry::DispatchMetrics;
    use std::panic;

    fn recycler_with_pool() -> (Recycler, Arc<DispatchMetrics>) {
        let metrics = Arc::new(DispatchMetrics::new());
        let pool: Arc<dyn Pool<Event>> = Arc::new(DefaultPool::<Event>::new());
        let recycler = Recycler::new(Some(pool), None, Some(metrics.clone() as Arc<dyn TelemetrySink>));
        (recycler, metrics)
    }

    #[test]
    fn recycle_none_is_noop() {
        let (recycler, metrics) = recycler_with_pool();
        recycler.recycle_event(None);
        assert_eq!(metrics.recycler_events_total(EventKind::MarketData), 0);
    }

    #[test]
    fn recycle_without_pool_is_noop() {
        let metrics = Arc::new(DispatchMetrics::new());
        let recycler = Recycler::new(None, None, Some(metrics.clone() as Arc<dyn TelemetrySink>));
        let slot = Box::new(Slot::new(Event::default()));
        recycler.recycle_event(Some(slot));
        assert_eq!(metrics.recycler_events_total(EventKind::MarketData), 0);
    }

    #[test]
    fn recycle_resets_and_records_telemetry() {
        let (recycler, metrics) = recycler_with_pool();
        let mut ev = Event::default();
        ev.kind = EventKind::ExecReport;
        ev.trace_id = "t1".into();
        let slot = Box::new(Slot::new(ev));
        recycler.recycle_event(Some(slot));
        assert_eq!(metrics.recycler_events_total(EventKind::ExecReport), 1);
    }

    #[test]
    fn debug_mode_double_put_panics_and_counts() {
        let (recycler, metrics) = recycler_with_pool();
        recycler.enable_debug_mode();

        let slot = Box::new(Slot::new(Event::default()));
        let addr = slot.addr();
        recycler.recycle_event(Some(slot));

        // Rebuild a Box at the same conceptual slot to simulate the
        // caller recycling the same (already-recycled) object again:
        // acquire it back out of the pool without going through
        // checkout, then recycle it a second time.
        let reacquired = {
            // Pop it straight back out of the free list, bypassing
            // checkout_event on purpose to reproduce the bug.
            let pool_arc = recycler.event_pool.clone().unwrap();
            pool_arc.acquire().unwrap()
        };
        assert_eq!(reacquired.addr(), addr);

        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            recycler.recycle_event(Some(reacquired));
        }));
        assert!(result.is_err());
        assert_eq!(metrics.double_put_total(), 1);
    }

    #[test]
    fn checkout_clears_tracker_entry_allowing_clean_recycle() {
        let (recycler, metrics) = recycler_with_pool();
        recycler.enable_debug_mode();

        let slot = Box::new(Slot::new(Event::default()));
        recycler.recycle_event(Some(slot));

        let pool_arc = recycler.event_pool.clone().unwrap();
        let reacquired = pool_arc.acquire().unwrap();
        recycler.checkout_event(&reacquired);

        // No panic expected this time: checkout cleared the tracker.
        recycler.recycle_event(Some(reacquired));
        assert_eq!(metrics.double_put_total(), 0);
    }

    #[test]
    fn disable_debug_mode_clears_tracker() {
        let (recycler, _metrics) = recycler_with_pool();
        recycler.enable_debug_mode();
        let slot = Box::new(Slot::new(Event::default()));
        recycler.recycle_event(Some(slot));
        assert!(!recycler.put_tracker.is_empty());
        recycler.disable_debug_mode();
        assert!(recycler.put_tracker.is_empty());
    }

    #[test]
    fn poison_sentinel_set_after_recycle_in_debug_mode() {
        let (recycler, _metrics) = recycler_with_pool();
        recycler.enable_debug_mode();
        let slot = Box::new(Slot::new(Event::default()));
        recycler.recycle_event(Some(slot));

        let pool_arc = recycler.event_pool.clone().unwrap();
        let reacquired = pool_arc.acquire().unwrap();
        // acquire() via the raw pool (not Recycler::acquire_event) does
        // not clear the sentinel, so the poison is still observable.
        assert!(reacquired.is_poisoned());
    }
}
