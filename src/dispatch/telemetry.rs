//! Telemetry sink for the dispatch pipeline.
//!
//! Counters and histograms are hand-rolled atomics/mutexed buckets
//! rather than routed through an external metrics-facade crate — the
//! same pattern this crate's source codebase uses elsewhere for
//! latency and per-endpoint counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::RwLock;

use super::event::EventKind;
use super::histogram::LatencyHistogram;

/// Registration sink the dispatch pipeline reports to.
///
/// Mirrors the spec's "injectable registrar" collaborator: a host
/// application can supply its own implementation, or let components
/// fall back to [`global_metrics`].
pub trait TelemetrySink: Send + Sync {
    fn consumer_invocation(&self, consumer: &str);
    fn consumer_panic(&self, consumer: &str);
    fn consumer_filtered(&self, consumer: &str);
    fn consumer_processing(&self, consumer: &str, elapsed: Duration);

    fn recycler_event(&self, kind: EventKind, elapsed: Duration);
    fn recycler_double_put(&self);

    fn fanout_dispatch(&self, subscriber_count: usize, per_subscriber: &[Duration], total: Duration);
}

/// Default hand-rolled implementation backing [`global_metrics`].
#[derive(Default)]
pub struct DispatchMetrics {
    consumer_invocations: RwLock<HashMap<String, AtomicU64>>,
    consumer_panics: RwLock<HashMap<String, AtomicU64>>,
    consumer_filtered: RwLock<HashMap<String, AtomicU64>>,
    consumer_processing: RwLock<HashMap<String, LatencyHistogram>>,

    recycler_events: RwLock<HashMap<&'static str, AtomicU64>>,
    recycler_recycle_duration: RwLock<HashMap<&'static str, LatencyHistogram>>,
    recycler_double_put_total: AtomicU64,

    fanout_subscriber_latency: LatencyHistogram,
    fanout_total_latency: LatencyHistogram,
    fanout_subscriber_count: LatencyHistogram,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of `meltica_recycler_double_put_total`.
    pub fn double_put_total(&self) -> u64 {
        self.recycler_double_put_total.load(Ordering::Relaxed)
    }

    /// Snapshot of `meltica_consumer_invocations_total{consumer}`.
    pub fn consumer_invocations_total(&self, consumer: &str) -> u64 {
        self.consumer_invocations
            .read()
            .get(consumer)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of `meltica_consumer_filtered_total{consumer}`.
    pub fn consumer_filtered_total(&self, consumer: &str) -> u64 {
        self.consumer_filtered
            .read()
            .get(consumer)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of `meltica_consumer_panics_total{consumer}`.
    pub fn consumer_panics_total(&self, consumer: &str) -> u64 {
        self.consumer_panics
            .read()
            .get(consumer)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of `meltica_recycler_events_total{kind}`.
    pub fn recycler_events_total(&self, kind: EventKind) -> u64 {
        self.recycler_events
            .read()
            .get(kind.label())
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn bump(map: &RwLock<HashMap<String, AtomicU64>>, key: &str) {
        if let Some(counter) = map.read().get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        map.write()
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }
}

impl TelemetrySink for DispatchMetrics {
    fn consumer_invocation(&self, consumer: &str) {
        Self::bump(&self.consumer_invocations, consumer);
    }

    fn consumer_panic(&self, consumer: &str) {
        Self::bump(&self.consumer_panics, consumer);
    }

    fn consumer_filtered(&self, consumer: &str) {
        Self::bump(&self.consumer_filtered, consumer);
    }

    fn consumer_processing(&self, consumer: &str, elapsed: Duration) {
        if let Some(hist) = self.consumer_processing.read().get(consumer) {
            hist.record_duration(elapsed);
            return;
        }
        self.consumer_processing
            .write()
            .entry(consumer.to_string())
            .or_insert_with(LatencyHistogram::new)
            .record_duration(elapsed);
    }

    fn recycler_event(&self, kind: EventKind, elapsed: Duration) {
        let label = kind.label();
        if let Some(counter) = self.recycler_events.read().get(label) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            self.recycler_events
                .write()
                .entry(label)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }

        if let Some(hist) = self.recycler_recycle_duration.read().get(label) {
            hist.record_duration(elapsed);
            return;
        }
        self.recycler_recycle_duration
            .write()
            .entry(label)
            .or_insert_with(LatencyHistogram::new)
            .record_duration(elapsed);
    }

    fn recycler_double_put(&self) {
        self.recycler_double_put_total.fetch_add(1, Ordering::Relaxed);
    }

    fn fanout_dispatch(&self, subscriber_count: usize, per_subscriber: &[Duration], total: Duration) {
        self.fanout_subscriber_count.record(subscriber_count as u64);
        for d in per_subscriber {
            self.fanout_subscriber_latency.record_duration(*d);
        }
        self.fanout_total_latency.record_duration(total);
    }
}

static GLOBAL_METRICS: OnceLock<DispatchMetrics> = OnceLock::new();

/// Process-default registrar, used when a component is constructed
/// without an explicit [`TelemetrySink`].
pub fn global_metrics() -> &'static DispatchMetrics {
    GLOBAL_METRICS.get_or_init(DispatchMetrics::new)
}

/// Adapts [`global_metrics`] to [`TelemetrySink`] so components
/// constructed with `None` for their sink have somewhere to report.
#[derive(Clone, Copy, Default)]
pub struct GlobalMetricsHandle;

/// Returns the [`TelemetrySink`] adapter backed by [`global_metrics`].
pub fn global_metrics_handle() -> GlobalMetricsHandle {
    GlobalMetricsHandle
}

impl TelemetrySink for GlobalMetricsHandle {
    fn consumer_invocation(&self, consumer: &str) {
        global_metrics().consumer_invocation(consumer);
    }
    fn consumer_panic(&self, consumer: &str) {
        global_metrics().consumer_panic(consumer);
    }
    fn consumer_filtered(&self, consumer: &str) {
        global_metrics().consumer_filtered(consumer);
    }
    fn consumer_processing(&self, consumer: &str, elapsed: Duration) {
        global_metrics().consumer_processing(consumer, elapsed);
    }
    fn recycler_event(&self, kind: EventKind, elapsed: Duration) {
        global_metrics().recycler_event(kind, elapsed);
    }
    fn recycler_double_put(&self) {
        global_metrics().recycler_double_put();
    }
    fn fanout_dispatch(&self, subscriber_count: usize, per_subscriber: &[Duration], total: Duration) {
        global_metrics().fanout_dispatch(subscriber_count, per_subscriber, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label() {
        let m = DispatchMetrics::new();
        m.consumer_invocation("a");
        m.consumer_invocation("a");
        m.consumer_invocation("b");
        assert_eq!(m.consumer_invocations_total("a"), 2);
        assert_eq!(m.consumer_invocations_total("b"), 1);
        assert_eq!(m.consumer_invocations_total("missing"), 0);
    }

    #[test]
    fn double_put_counter_increments() {
        let m = DispatchMetrics::new();
        assert_eq!(m.double_put_total(), 0);
        m.recycler_double_put();
        m.recycler_double_put();
        assert_eq!(m.double_put_total(), 2);
    }

    #[test]
    fn recycler_events_keyed_by_kind_label() {
        let m = DispatchMetrics::new();
        m.recycler_event(EventKind::MarketData, Duration::from_micros(10));
        m.recycler_event(EventKind::ExecReport, Duration::from_micros(5));
        m.recycler_event(EventKind::MarketData, Duration::from_micros(10));
        assert_eq!(m.recycler_events_total(EventKind::MarketData), 2);
        assert_eq!(m.recycler_events_total(EventKind::ExecReport), 1);
    }
}
