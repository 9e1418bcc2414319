//! Event model: the record that flows from producers through the fan-out
//! dispatcher to registered consumers.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

/// Closed enumeration of the event kinds this pipeline routes.
///
/// `exec_report`, `control_ack`, and `control_result` are *critical*:
/// consumer wrappers must never drop them on the basis of a stale
/// routing-version watermark. `market_data` is the only non-critical
/// kind — newer routing versions supersede older ones, so a consumer
/// that hasn't caught up yet can safely skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventKind {
    #[default]
    MarketData,
    ExecReport,
    ControlAck,
    ControlResult,
    /// Any value outside the closed set above. Never produced by this
    /// crate, but kept so `from_u8`/metric-label code has a total
    /// function instead of a partial one.
    Unknown,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl EventKind {
    /// `true` for kinds that must bypass routing-version filtering.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            EventKind::ExecReport | EventKind::ControlAck | EventKind::ControlResult
        )
    }

    /// Stable symbolic name used as a metric label.
    pub fn label(self) -> &'static str {
        match self {
            EventKind::MarketData => "market_data",
            EventKind::ExecReport => "exec_report",
            EventKind::ControlAck => "control_ack",
            EventKind::ControlResult => "control_result",
            EventKind::Unknown => "unknown",
        }
    }
}

/// Opaque, cheaply-cloned payload handle.
///
/// The core never inspects the payload; producers and consumers agree
/// on its concrete type out of band. `Arc` gives duplicates produced by
/// fan-out the same payload without an extra allocation or clone of the
/// underlying value.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The in-memory record flowing through the pipeline.
///
/// Owned by exactly one holder at any instant. See the lifecycle states
/// documented on [`crate::dispatch::recycler::Recycler`].
#[derive(Clone, Default)]
pub struct Event {
    pub trace_id: String,
    pub routing_version: u64,
    pub kind: EventKind,
    pub payload: Option<Payload>,
    pub ingest_ts: Option<Instant>,
    pub provider_seq: u64,
    pub provider_id: String,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("trace_id", &self.trace_id)
            .field("routing_version", &self.routing_version)
            .field("kind", &self.kind)
            .field("has_payload", &self.payload.is_some())
            .field("ingest_ts", &self.ingest_ts)
            .field("provider_seq", &self.provider_seq)
            .field("provider_id", &self.provider_id)
            .finish()
    }
}

impl Event {
    /// Clears all fields to their zero values. A fresh event from the
    /// pool is always in this state before any producer touches it.
    pub fn reset(&mut self) {
        self.trace_id.clear();
        self.routing_version = 0;
        self.kind = EventKind::MarketData;
        self.payload = None;
        self.ingest_ts = None;
        self.provider_seq = 0;
        self.provider_id.clear();
    }

    /// Copies the routing-relevant fields of `source` into `self`, the
    /// way fan-out populates a pooled duplicate from the original.
    pub fn copy_from(&mut self, source: &Event) {
        self.trace_id.clone_from(&source.trace_id);
        self.routing_version = source.routing_version;
        self.kind = source.kind;
        self.payload = source.payload.clone();
        self.ingest_ts = source.ingest_ts;
        self.provider_seq = source.provider_seq;
        self.provider_id.clone_from(&source.provider_id);
    }
}

/// Execution-report record.
///
/// The spec leaves this intentionally thin: the core only guarantees
/// pooled lifecycle and resettability. Producer/consumer contracts for
/// additional fields live outside this crate.
#[derive(Debug, Clone, Default)]
pub struct ExecReport {
    pub trace_id: String,
    pub routing_version: u64,
    pub ingest_ts: Option<Instant>,
}

impl ExecReport {
    pub fn reset(&mut self) {
        self.trace_id.clear();
        self.routing_version = 0;
        self.ingest_ts = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_all_fields() {
        let mut ev = Event {
            trace_id: "t1".into(),
            routing_version: 7,
            kind: EventKind::ExecReport,
            payload: Some(Arc::new(42u32)),
            ingest_ts: Some(Instant::now()),
            provider_seq: 9,
            provider_id: "binance".into(),
        };
        ev.reset();
        assert_eq!(ev.trace_id, "");
        assert_eq!(ev.routing_version, 0);
        assert_eq!(ev.kind, EventKind::MarketData);
        assert!(ev.payload.is_none());
        assert!(ev.ingest_ts.is_none());
        assert_eq!(ev.provider_seq, 0);
        assert_eq!(ev.provider_id, "");
    }

    #[test]
    fn copy_from_mirrors_routing_fields() {
        let source = Event {
            trace_id: "t1".into(),
            routing_version: 3,
            kind: EventKind::MarketData,
            payload: Some(Arc::new(1u8)),
            ingest_ts: Some(Instant::now()),
            provider_seq: 5,
            provider_id: "binance".into(),
        };
        let mut dup = Event::default();
        dup.copy_from(&source);
        assert_eq!(dup.trace_id, source.trace_id);
        assert_eq!(dup.routing_version, source.routing_version);
        assert_eq!(dup.kind, source.kind);
        assert_eq!(dup.provider_seq, source.provider_seq);
        assert_eq!(dup.provider_id, source.provider_id);
    }

    #[test]
    fn criticality_matches_spec() {
        assert!(!EventKind::MarketData.is_critical());
        assert!(EventKind::ExecReport.is_critical());
        assert!(EventKind::ControlAck.is_critical());
        assert!(EventKind::ControlResult.is_critical());
        assert!(!EventKind::Unknown.is_critical());
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(EventKind::MarketData.label(), "market_data");
        assert_eq!(EventKind::ExecReport.label(), "exec_report");
        assert_eq!(EventKind::ControlAck.label(), "control_ack");
        assert_eq!(EventKind::ControlResult.label(), "control_result");
        assert_eq!(EventKind::Unknown.label(), "unknown");
    }
}
