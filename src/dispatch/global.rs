//! Process-wide recycler singleton.
//!
//! The spec's reference implementation leans on a process-wide handle
//! initialized exactly once; per DESIGN.md this crate's primary API is
//! explicit dependency injection (construct a [`Recycler`] and pass it
//! around), and this module exists only as the "guarded lazy singleton
//! for legacy call sites" convenience §9 calls out.

use std::sync::{Arc, OnceLock};

use super::event::{Event, ExecReport};
use super::recycler::Pool;
use super::recycler::Recycler;
use super::telemetry::TelemetrySink;

static GLOBAL_RECYCLER: OnceLock<Arc<Recycler>> = OnceLock::new();

/// Installs the process-wide recycler. Idempotent: the first caller
/// wins, subsequent calls are no-ops (matching the spec's `InitGlobal`
/// contract). Returns the handle that is actually installed, which is
/// the caller's own arguments on the first call and the winning
/// caller's on any later one.
pub fn init_global(
    event_pool: Option<Arc<dyn Pool<Event>>>,
    exec_report_pool: Option<Arc<dyn Pool<ExecReport>>>,
    metrics: Option<Arc<dyn TelemetrySink>>,
) -> Arc<Recycler> {
    GLOBAL_RECYCLER
        .get_or_init(|| {
            tracing::info!("installing process-wide dispatch recycler");
            Arc::new(Recycler::new(event_pool, exec_report_pool, metrics))
        })
        .clone()
}

/// Returns the process-wide recycler. Fails hard (panics) if
/// [`init_global`] was never called — this is the one place in the
/// crate where a programming error surfaces as a panic instead of a
/// `Result`, matching the spec's "Initialization error ... fatal"
/// taxonomy entry.
pub fn global() -> Arc<Recycler> {
    GLOBAL_RECYCLER
        .get()
        .unwrap_or_else(|| {
            panic!(
                "dispatch::global::global() called before init_global() — the process-wide \
                 recycler was never installed"
            )
        })
        .clone()
}

/// `true` once [`init_global`] has installed a recycler. Useful for
/// call sites that want to probe rather than risk the panic in
/// [`global`].
pub fn is_initialized() -> bool {
    GLOBAL_RECYCLER.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    /// `GLOBAL_RECYCLER` is one process-wide `OnceLock` shared by every
    /// test in this binary, so all assertions about its pre-init state
    /// live in a single test function — splitting them across tests
    /// would race on initialization order.
    #[test]
    fn init_is_idempotent_and_global_reflects_first_winner() {
        let was_initialized = is_initialized();
        if !was_initialized {
            let result = panic::catch_unwind(|| global());
            assert!(result.is_err(), "global() must panic before init_global()");
        }

        let first = init_global(None, None, None);
        assert!(is_initialized());

        let second = init_global(None, None, None);
        assert!(
            Arc::ptr_eq(&first, &second),
            "init_global must be idempotent: the first caller wins"
        );

        let fetched = global();
        assert!(Arc::ptr_eq(&first, &fetched));
    }
}
