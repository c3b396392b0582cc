//! The per-CPU log buffer itself: a growable, TSC-tagged sequence of
//! deferred operations.
//!
//! Grounded on the teacher's `arena`'s per-slot payload plus `file::File`'s
//! buffering style (push now, reconcile later); there is no `Vec`-backed
//! ring buffer in the teacher to port directly, so this is written fresh
//! in its idiom — `extern crate alloc` collections, no unsafe.

use alloc::vec::Vec;

use crate::const_default::ConstDefault;

/// A single deferred write, opaque to the logging machinery beyond how to
/// apply and (optionally) print it.
///
/// `Op::run` is only ever called with the logger's own internal lock
/// dropped and the owning object's sync lock held (spec §4.3) — by the
/// time it runs, no other CPU can be pushing concurrently, but the op
/// itself must not assume anything about *which* CPU originally logged it.
pub trait LoggedOp {
    /// The shared state this operation mutates on application.
    type Target;

    /// Applies this operation's effect to `target`.
    fn run(&self, target: &mut Self::Target);

    /// Emits a human-readable trace line for this operation, gated by
    /// [`crate::trace::trace_enabled`] at the call site.
    fn print(&self);
}

/// A CPU-local, time-ordered sequence of not-yet-applied operations.
///
/// Entries are pushed in increasing TSC order by construction (a CPU's own
/// TSC reads are non-decreasing, spec Invariant 5) but [`TscLogger::sort_ops`]
/// re-sorts defensively before merge, since entries can also arrive via
/// [`TscLogger::absorb`] from an evicted logger whose own entries were
/// pushed against a different, only loosely synchronized, TSC stream.
pub struct TscLogger<Op> {
    ops: Vec<(u64, Op)>,
}

impl<Op> ConstDefault for TscLogger<Op> {
    const INIT: Self = Self { ops: Vec::new() };
}

impl<Op> Default for TscLogger<Op> {
    fn default() -> Self {
        Self::INIT
    }
}

impl<Op> TscLogger<Op> {
    /// Appends one operation, tagged with the TSC it was logged at.
    pub fn push_with_tsc(&mut self, tsc: u64, op: Op) {
        self.ops.push((tsc, op));
    }

    /// Number of not-yet-applied entries.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether there are no not-yet-applied entries.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Re-establishes ascending-TSC order. Required before
    /// [`TscLogger::ops_before`] or a k-way merge consult this logger's
    /// order, since [`TscLogger::absorb`] does not maintain it eagerly.
    pub fn sort_ops(&mut self) {
        self.ops.sort_by_key(|(tsc, _)| *tsc);
    }

    /// Returns the TSC of the entry at `pos`, assuming [`TscLogger::sort_ops`]
    /// has already run.
    pub fn tsc_at(&self, pos: usize) -> Option<u64> {
        self.ops.get(pos).map(|(tsc, _)| *tsc)
    }

    /// Returns the operation at `pos`.
    pub fn op_at(&self, pos: usize) -> Option<&Op> {
        self.ops.get(pos).map(|(_, op)| op)
    }

    /// Counts how many leading entries (in sorted order) have a TSC
    /// strictly less than `max_tsc` — the bound
    /// [`crate::mfs_logged_object::MfsLoggedObject::wait_synchronize`] uses
    /// to decide how far a partial flush may consume.
    ///
    /// Assumes [`TscLogger::sort_ops`] has already run.
    pub fn ops_before(&self, max_tsc: u64) -> usize {
        self.ops.partition_point(|(tsc, _)| *tsc < max_tsc)
    }

    /// Drops the first `n` entries (in sorted order), already applied by a
    /// merge. Leaves the remainder in place, order preserved.
    pub fn drop_front(&mut self, n: usize) {
        self.ops.drain(..n.min(self.ops.len()));
    }

    /// Clears every entry. Used once a merge has consumed the whole log.
    pub fn reset(&mut self) {
        self.ops.clear();
    }

    /// Moves every entry out of `other` and appends it to `self`, used when
    /// a logger is evicted from the per-CPU cache and its entries must
    /// survive in the evicting object's own pending state (spec §4.2).
    pub fn absorb(&mut self, other: &mut TscLogger<Op>) {
        self.ops.append(&mut other.ops);
    }

    /// Emits a trace line for every not-yet-applied entry, if tracing is
    /// enabled.
    pub fn print_ops(&self)
    where
        Op: LoggedOp,
    {
        if crate::trace::trace_enabled() {
            for (_, op) in &self.ops {
                op.print();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl LoggedOp for Noop {
        type Target = ();
        fn run(&self, _target: &mut ()) {}
        fn print(&self) {}
    }

    #[test]
    fn ops_before_counts_sorted_prefix() {
        let mut log = TscLogger::<Noop>::default();
        log.push_with_tsc(30, Noop);
        log.push_with_tsc(10, Noop);
        log.push_with_tsc(20, Noop);
        log.sort_ops();
        assert_eq!(log.ops_before(0), 0);
        assert_eq!(log.ops_before(15), 1);
        assert_eq!(log.ops_before(25), 2);
        assert_eq!(log.ops_before(u64::MAX), 3);
    }

    #[test]
    fn absorb_appends_and_drop_front_trims() {
        let mut a = TscLogger::<Noop>::default();
        a.push_with_tsc(1, Noop);
        let mut b = TscLogger::<Noop>::default();
        b.push_with_tsc(2, Noop);
        a.absorb(&mut b);
        assert_eq!(a.len(), 2);
        assert!(b.is_empty());
        a.drop_front(1);
        assert_eq!(a.len(), 1);
        assert_eq!(a.tsc_at(0), Some(2));
    }
}
