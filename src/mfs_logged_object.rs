//! [`MfsLoggedObject`]: a [`TscLoggedObject`] with *wait-synchronize* — a
//! bounded flush that also waits for in-flight operations on other CPUs
//! whose linearization point may fall before the requested bound.
//!
//! Named for the source material's own use case (spec §4.5): a metadata
//! server that must answer "is everything up to timestamp T visible yet"
//! without forcing every writer to stop. Composes a [`TscLoggedObject`]
//! rather than re-declaring its cache/bitmap/sync-lock fields, reusing
//! [`TscLoggedObject::gather_and_merge`] for the actual gather-merge-apply
//! work; only the wait loop in front of it and the in-flight publication
//! around [`MfsLoggedObject::log`] are new.

use array_macro::array;

use crate::cache::PerCpuCache;
use crate::const_default::ConstDefault;
use crate::host::{CurrentCpu, Host};
use crate::lock::SeqLock;
use crate::logged_object::SyncGuard;
use crate::param::NCPU;
use crate::tsc_logged_object::TscLoggedObject;
use crate::tsc_logger::LoggedOp;

/// One CPU's advertised `(start_tsc, end_tsc)` window for the operation it
/// is currently logging, if any.
///
/// `start_tsc` is published before the operation is appended to the CPU's
/// logger and `end_tsc` after, so [`MfsLoggedObject::wait_synchronize`]
/// can tell whether a CPU's in-flight operation might still land before
/// the bound it's waiting on (`start_tsc < max_tsc && end_tsc >= max_tsc`)
/// and, if so, wait for it to finish publishing before gathering.
#[derive(Clone, Copy)]
struct CpuTscPair {
    start_tsc: u64,
    end_tsc: u64,
}

impl ConstDefault for CpuTscPair {
    /// No operation in flight: both ends pinned at `u64::MAX`, which can
    /// never be `< max_tsc` for any bound a caller would pass (bounds are
    /// themselves real TSC readings).
    const INIT: Self = Self {
        start_tsc: u64::MAX,
        end_tsc: u64::MAX,
    };
}

/// A [`TscLoggedObject`] extended with a bounded, wait-aware synchronize.
pub struct MfsLoggedObject<H: Host, Op: LoggedOp> {
    inner: TscLoggedObject<'static, H, Op>,
    in_flight: [SeqLock<H::Seq, CpuTscPair>; NCPU],
}

impl<H: Host, Op: LoggedOp> MfsLoggedObject<H, Op> {
    /// Creates a new wait-synchronizable logged object backed by `cache`,
    /// wrapping `target`.
    pub const fn new(cache: &'static PerCpuCache<H::Lock, crate::tsc_logger::TscLogger<Op>>, target: Op::Target) -> Self {
        Self {
            inner: TscLoggedObject::new(cache, target),
            in_flight: array![_ => SeqLock::with_const_default(CpuTscPair::INIT); NCPU],
        }
    }

    /// Reads the current timestamp from this object's configured source.
    pub fn read_tsc(&self) -> u64 {
        self.inner.read_tsc()
    }
}

impl<H: Host, Op: LoggedOp + 'static> MfsLoggedObject<H, Op> {
    /// Defers `op`, publishing this CPU's `(start_tsc, end_tsc)` window
    /// around the append so a concurrent
    /// [`MfsLoggedObject::wait_synchronize`] can detect the operation is
    /// in flight.
    pub fn log(&self, op: Op) {
        let cpu = H::Cpu::current_cpu_id();
        let start = self.read_tsc();
        self.in_flight[cpu].write(CpuTscPair {
            start_tsc: start,
            end_tsc: u64::MAX,
        });

        self.inner.log_at(start, op);

        let end = self.read_tsc();
        self.in_flight[cpu].write(CpuTscPair {
            start_tsc: start,
            end_tsc: end,
        });
    }

    /// Reconciles every CPU's deferred operations with `tsc < max_tsc`,
    /// first waiting for any CPU whose in-flight operation might still
    /// linearize before `max_tsc` to finish publishing it.
    ///
    /// Entries with `tsc >= max_tsc` remain deferred for a later call
    /// (spec §4.5's bounded partial flush); this is what distinguishes
    /// `wait_synchronize` from plain [`TscLoggedObject::synchronize`],
    /// which always consumes everything.
    pub fn wait_synchronize(&self, max_tsc: u64) -> SyncGuard<'_, H::Lock, Op::Target> {
        for window in &self.in_flight {
            loop {
                let snapshot = window.read();
                let maybe_before_bound = snapshot.start_tsc < max_tsc;
                let still_in_flight = snapshot.end_tsc >= max_tsc;
                if !(maybe_before_bound && still_in_flight) {
                    break;
                }
                core::hint::spin_loop();
            }
        }

        self.inner.gather_and_merge(max_tsc)
    }

    /// Reconciles every CPU's deferred operations unconditionally,
    /// equivalent to [`TscLoggedObject::synchronize`].
    pub fn synchronize(&self) -> SyncGuard<'_, H::Lock, Op::Target> {
        self.wait_synchronize(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::reference::StdHost;
    use crate::tsc_logger::TscLogger;

    struct AddOp(i64);
    impl LoggedOp for AddOp {
        type Target = i64;
        fn run(&self, target: &mut i64) {
            *target += self.0;
        }
        fn print(&self) {}
    }

    static CACHE: PerCpuCache<<StdHost as Host>::Lock, TscLogger<AddOp>> = PerCpuCache::new();

    #[test]
    fn wait_synchronize_applies_only_entries_before_bound() {
        let obj: MfsLoggedObject<StdHost, AddOp> = MfsLoggedObject::new(&CACHE, 0);

        obj.log(AddOp(1));
        let bound = obj.read_tsc();
        obj.log(AddOp(100));

        let view = obj.wait_synchronize(bound);
        assert_eq!(*view, 1);
        drop(view);

        let view = obj.wait_synchronize(u64::MAX);
        assert_eq!(*view, 101);
    }

    #[test]
    fn synchronize_consumes_everything() {
        let obj: MfsLoggedObject<StdHost, AddOp> = MfsLoggedObject::new(&CACHE, 0);
        obj.log(AddOp(1));
        obj.log(AddOp(2));
        let view = obj.synchronize();
        assert_eq!(*view, 3);
    }
}
