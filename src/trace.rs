//! Optional human-readable tracing of logged operations.
//!
//! Spec §4.4 calls out `LoggedOp::print` as a debug aid, not part of the
//! core algorithm. The teacher's `printf` module funnels kernel prints
//! through a single lock-guarded writer (`Printer`); this mirrors that
//! shape but keeps the sink itself host-supplied, since a `no_std` crate
//! has no `stdout` of its own to funnel into.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

/// Whether [`crate::tsc_logger::TscLogger::print_ops`] and
/// [`crate::tsc_logger::LoggedOp::print`] calls are actually emitted.
///
/// Off by default; a host enables it with [`set_trace_enabled`] to debug a
/// specific run without paying formatting overhead otherwise.
static TRACE_ENABLED: AtomicBool = AtomicBool::new(false);

/// Enables or disables tracing globally.
pub fn set_trace_enabled(enabled: bool) {
    TRACE_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Returns whether tracing is currently enabled.
pub fn trace_enabled() -> bool {
    TRACE_ENABLED.load(Ordering::Relaxed)
}

/// A destination for traced output, analogous to the teacher's `Printer`
/// but without a built-in lock — a host wanting serialized output across
/// CPUs wraps its `Sink` in its own [`crate::host::RawLock`]-backed
/// [`crate::lock::Lock`].
pub trait Sink: Write {}

impl<T: Write> Sink for T {}
