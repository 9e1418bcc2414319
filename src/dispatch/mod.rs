//! In-process event dispatch pipeline: pooled event reuse, parallel
//! fan-out delivery with per-subscriber isolation, routing-version
//! filtering with a critical-event bypass, and debug instrumentation
//! for double-return-to-pool bugs.
//!
//! See `SPEC_FULL.md` and `DESIGN.md` at the crate root for the full
//! design rationale. The module layout mirrors the component design:
//!
//! - [`event`] — the `Event`/`ExecReport`/`EventKind` data model.
//! - [`telemetry`] — the injectable metrics registrar.
//! - [`recycler`] — pooled lifecycle, double-put detection, poisoning.
//! - [`fanout`] — the bounded-parallel dispatcher.
//! - [`wrapper`] — per-consumer filter + panic isolation + recycle.
//! - [`registry`] — the consumer-id -> wrapper directory.
//! - [`context`] — the cancellation context threaded through `Dispatch`.
//! - [`error`] — `FanoutError`/`DispatchError`.
//! - [`global`] — the opt-in process-wide recycler singleton.

pub mod context;
pub mod error;
pub mod event;
pub mod fanout;
pub mod global;
pub mod histogram;
pub mod recycler;
pub mod registry;
pub mod telemetry;
pub mod wrapper;

pub use context::DispatchContext;
pub use error::{DispatchError, FanoutError};
pub use event::{Event, EventKind, ExecReport, Payload};
pub use fanout::{Dispatcher, DispatcherConfig};
pub use histogram::LatencyHistogram;
pub use recycler::{DefaultPool, Pool, PooledEvent, PooledExecReport, Recycler, Slot, POISON_SENTINEL};
pub use registry::Registry;
pub use telemetry::{global_metrics, DispatchMetrics, TelemetrySink};
pub use wrapper::{Callback, ConsumerWrapper, Subscriber};

#[cfg(test)]
mod integration_tests {
    //! End-to-end scenarios from the spec's §8 "End-to-end scenarios",
    //! wired through the public module surface the way a host
    //! application would actually use it: a `Registry` of
    //! `ConsumerWrapper`s, each wrapper's `invoke` bound as a plain
    //! `Subscriber` callback, fanned out by a `Dispatcher`.
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn boxed_event(trace_id: &str, kind: EventKind, routing_version: u64) -> Box<PooledEvent> {
        let mut ev = Event::default();
        ev.trace_id = trace_id.to_string();
        ev.kind = kind;
        ev.routing_version = routing_version;
        Box::new(Slot::new(ev))
    }

    #[test]
    fn fanout_happy_path_reaches_three_subscribers() {
        let metrics: Arc<dyn TelemetrySink> = Arc::new(DispatchMetrics::new());
        let event_pool: Arc<dyn Pool<Event>> = Arc::new(DefaultPool::<Event>::new());
        let recycler = Arc::new(Recycler::new(
            Some(event_pool),
            None,
            Some(metrics.clone()),
        ));
        let dispatcher = Dispatcher::new(
            Some(recycler),
            None,
            Some(metrics.clone()),
            DispatcherConfig { worker_limit: 3 },
        );

        let hits = Arc::new(AtomicUsize::new(0));
        let make_sub = |id: &str| {
            let hits = hits.clone();
            let cb: Callback = Arc::new(move |ev: Option<&Event>| {
                let ev = ev.expect("fanout duplicate should be populated");
                assert_eq!(ev.trace_id, "t1");
                assert_eq!(ev.routing_version, 3);
                hits.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
            Subscriber::new(id, cb)
        };

        let subs = vec![make_sub("s1"), make_sub("s2"), make_sub("s3")];
        let ev = boxed_event("t1", EventKind::MarketData, 3);
        let ctx = DispatchContext::new();

        let result = dispatcher.dispatch(&ctx, Some(ev), &subs);
        assert!(result.is_ok());
        assert_eq!(hits.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn filter_bypass_on_critical_through_registry() {
        let registry = Registry::new();
        let wrapper = Arc::new(ConsumerWrapper::new("risk-engine", 100, None, None));
        registry.register(wrapper.clone());

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked2 = invoked.clone();
        let user_cb: Callback = Arc::new(move |_ev| {
            invoked2.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        let mut ev = Event::default();
        ev.kind = EventKind::ExecReport;
        ev.routing_version = 50;
        let ctx = DispatchContext::new();

        let result = registry.invoke(&ctx, "risk-engine", Some(Box::new(Slot::new(ev))), Some(&user_cb));
        assert!(result.is_ok());
        assert_eq!(invoked.load(Ordering::Relaxed), 1);
        assert!(wrapper.metrics().is_none());
    }

    #[test]
    fn filter_applied_on_non_critical_through_registry() {
        let registry = Registry::new();
        let wrapper = Arc::new(ConsumerWrapper::new("quotes", 100, None, None));
        registry.register(wrapper);

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked2 = invoked.clone();
        let user_cb: Callback = Arc::new(move |_ev| {
            invoked2.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        let mut ev = Event::default();
        ev.kind = EventKind::MarketData;
        ev.routing_version = 50;
        let ctx = DispatchContext::new();

        let result = registry.invoke(&ctx, "quotes", Some(Box::new(Slot::new(ev))), Some(&user_cb));
        assert!(result.is_ok());
        assert_eq!(invoked.load(Ordering::Relaxed), 0);
    }
}
