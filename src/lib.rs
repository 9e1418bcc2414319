//! Meltica dispatch core.
//!
//! In-process event dispatch pipeline for a market-data / trading
//! platform: pooled event reuse, parallel fan-out delivery with
//! per-subscriber isolation, routing-version filtering with a
//! critical-event bypass, and debug instrumentation for
//! double-return-to-pool bugs.
//!
//! Exchange adapters, transport, order book assembly, configuration
//! loading, and CLI entry points are out of scope — this crate
//! consumes only an event stream from producers and an (optional)
//! telemetry registrar. See `SPEC_FULL.md` and `DESIGN.md` at the
//! crate root for the full design rationale.

pub mod dispatch;

pub use dispatch::{
    global as global_recycler, Callback, ConsumerWrapper, DefaultPool, DispatchContext,
    DispatchError, Dispatcher, DispatcherConfig, Event, EventKind, ExecReport, FanoutError, Pool,
    PooledEvent, PooledExecReport, Recycler, Registry, Slot, Subscriber, TelemetrySink,
    POISON_SENTINEL,
};
