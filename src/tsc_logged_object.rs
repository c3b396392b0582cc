//! [`TscLoggedObject`]: a [`crate::logged_object::LoggedObject`] that
//! orders deferred operations by TSC and reconciles them with a k-way
//! merge on `synchronize`.
//!
//! The merge itself (`merge_and_apply`) is written once here and reused
//! by [`crate::mfs_logged_object::MfsLoggedObject`], which composes a
//! `TscLoggedObject` rather than re-implementing the gather/merge/apply
//! sequence (spec §4.5).

use alloc::collections::BinaryHeap;
use alloc::vec;
use core::cell::UnsafeCell;
use core::cmp::Ordering;

use array_macro::array;

use crate::cache::PerCpuCache;
use crate::const_default::ConstDefault;
use crate::host::{Host, RawLock};
use crate::lock::{Guard, Lock, RemoteLock};
use crate::logged_object::{LoggedObject, SyncGuard};
use crate::param::NCPU;
use crate::tsc_logger::{LoggedOp, TscLogger};

/// An object whose writes are deferred per-CPU and merged in global TSC
/// order on demand.
///
/// `'c` is the lifetime of the shared [`PerCpuCache`] every instance of
/// this `(H, Op)` pair contends over — typically `'static`, since the
/// cache is meant to be one process-wide table a host declares once.
pub struct TscLoggedObject<'c, H: Host, Op: LoggedOp> {
    cache: &'c PerCpuCache<H::Lock, TscLogger<Op>>,
    bitmap: H::Bitset,
    sync_lock: Lock<H::Lock, ()>,
    tsc: H::Tsc,
    /// Entries evicted from the per-CPU cache (by [`LoggedObject::get_logger`]
    /// eviction, or gathered by [`TscLoggedObject::synchronize`]) but not
    /// yet applied, one [`TscLogger`] per CPU. Protected by `sync_lock`
    /// rather than by a lock of its own, so it can be reached from inside
    /// a `sync_lock` critical section without a second acquisition.
    pending: RemoteLock<H::Lock, (), [TscLogger<Op>; NCPU]>,
    target: UnsafeCell<Op::Target>,
}

// SAFETY: every field is either `Sync` on its own (the lock, the cache
// reference) or accessed only through a lock guard (`bitmap` via atomics,
// `pending` and `target` via `sync_lock`).
unsafe impl<H: Host, Op: LoggedOp> Sync for TscLoggedObject<'_, H, Op>
where
    Op::Target: Send,
    Op: Send,
{
}

impl<'c, H: Host, Op: LoggedOp> TscLoggedObject<'c, H, Op> {
    /// Creates a new logged object backed by `cache`, wrapping `target`.
    pub const fn new(cache: &'c PerCpuCache<H::Lock, TscLogger<Op>>, target: Op::Target) -> Self {
        Self {
            cache,
            bitmap: H::Bitset::INIT,
            sync_lock: Lock::with_const_default(()),
            tsc: H::Tsc::INIT,
            pending: RemoteLock::new(array![_ => TscLogger::INIT; NCPU]),
            target: UnsafeCell::new(target),
        }
    }

    /// Reads the current timestamp from this object's configured source.
    pub fn read_tsc(&self) -> u64 {
        self.tsc.read()
    }
}

/// Methods requiring the [`LoggedObject`] impl, which (per its `'static`
/// supertrait bound) is only available for `TscLoggedObject<'static, _, _>`
/// — the realistic case, since the shared cache these objects contend over
/// is meant to be a process-wide `static`.
impl<H: Host, Op: LoggedOp + 'static> TscLoggedObject<'static, H, Op> {
    /// Defers `op`, timestamped with `tsc`, to this CPU's logger.
    ///
    /// Exposed (beyond plain [`TscLoggedObject::log`]) so
    /// [`crate::mfs_logged_object::MfsLoggedObject`] can publish its
    /// in-flight `(start_tsc, end_tsc)` window around the same timestamp
    /// it logs with, rather than reading the TSC twice.
    pub fn log_at(&self, tsc: u64, op: Op) {
        let mut handle = self.get_logger();
        handle.push(tsc, op);
    }

    /// Defers `op`, timestamped with the current TSC, to this CPU's
    /// logger.
    pub fn log(&self, op: Op) {
        let tsc = self.read_tsc();
        self.log_at(tsc, op);
    }

    /// Reconciles every CPU's deferred operations in global TSC order and
    /// returns a read-only view of the result.
    ///
    /// Gathers each CPU flagged in the membership bitmap — from its
    /// per-CPU cache slot if still live, or from `pending` if already
    /// evicted — merges every gathered logger in ascending TSC order, and
    /// applies each operation to `target` exactly once (spec §4.3,
    /// Invariant 3).
    pub fn synchronize(&self) -> SyncGuard<'_, H::Lock, Op::Target> {
        self.gather_and_merge(u64::MAX)
    }

    /// As [`TscLoggedObject::synchronize`], but only applies entries with
    /// `tsc < max_tsc`; later entries remain deferred in `pending` for a
    /// future call. Used directly by
    /// [`crate::mfs_logged_object::MfsLoggedObject::wait_synchronize`].
    pub(crate) fn gather_and_merge(&self, max_tsc: u64) -> SyncGuard<'_, H::Lock, Op::Target> {
        let mut sync_guard = self.sync_lock.lock();
        // SAFETY: `sync_guard` proves this call holds the lock `pending`
        // is documented as protected by.
        let pending = unsafe { self.pending.get_mut_unchecked(&mut sync_guard) };

        loop {
            for cpu in self.bitmap.iter_set() {
                let way = self.cache.way_for(cpu, self.tag());
                let mut way_guard = way.lock();
                if way.tag() == self.tag() {
                    pending[cpu].absorb(&mut *way_guard);
                }
                // Precondition satisfied: `sync_guard` (this object's sync
                // lock) and `cpu`'s way lock are both held here, across the
                // absorb above and the clear below — clearing after
                // releasing the way lock would let a writer re-set the bit
                // and push a fresh entry into the way between the release
                // and the clear, which this call would then drop on the
                // floor (spec §4.2 step 1, Invariant 2).
                self.bitmap.clear(cpu);
                drop(way_guard);
            }
            crate::host::barrier();
            if self.bitmap.is_empty() {
                break;
            }
        }

        // SAFETY: `sync_guard` is held, so no other call can be mid
        // gather/merge; no `SyncGuard` referencing `target` can be alive
        // concurrently since it borrows the same sync lock.
        let target = unsafe { &mut *self.target.get() };
        merge_and_apply(pending.as_mut_slice(), target, max_tsc);

        SyncGuard::new(sync_guard, unsafe { &*self.target.get() })
    }
}

impl<H: Host, Op: LoggedOp + 'static> LoggedObject for TscLoggedObject<'static, H, Op> {
    type Host = H;
    type Op = Op;

    fn cache(&self) -> &PerCpuCache<H::Lock, TscLogger<Op>> {
        self.cache
    }

    fn bitmap(&self) -> &H::Bitset {
        &self.bitmap
    }

    fn sync_lock(&self) -> &Lock<H::Lock, ()> {
        &self.sync_lock
    }

    fn absorb_evicted(
        &self,
        cpu: usize,
        evicted: TscLogger<Op>,
        sync_guard: &mut Guard<'_, H::Lock, ()>,
    ) {
        // SAFETY: `sync_guard` proves the caller holds this object's sync
        // lock.
        let pending = unsafe { self.pending.get_mut_unchecked(sync_guard) };
        let mut evicted = evicted;
        pending[cpu].absorb(&mut evicted);
    }
}

/// One logger's current position in a k-way merge.
struct Cursor {
    tsc: u64,
    logger_idx: usize,
    pos: usize,
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.tsc == other.tsc && self.logger_idx == other.logger_idx
    }
}

impl Eq for Cursor {}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap; invert the comparison so the
        // smallest `(tsc, logger_idx)` pops first. Breaking ties on
        // `logger_idx` gives a deterministic (if arbitrary) order between
        // two entries logged at an identical TSC on different CPUs (spec
        // Invariant 6); entries from the *same* logger never tie in the
        // heap simultaneously, since only one cursor per logger is ever
        // live at a time, so their relative (push) order is preserved
        // automatically.
        other
            .tsc
            .cmp(&self.tsc)
            .then_with(|| other.logger_idx.cmp(&self.logger_idx))
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges every logger in `loggers` in ascending TSC order, applying each
/// entry with `tsc < max_tsc` to `target` exactly once, then drops the
/// consumed prefix from each logger.
///
/// Used directly by [`TscLoggedObject::synchronize`] (`max_tsc =
/// u64::MAX`, consuming everything) and by
/// [`crate::mfs_logged_object::MfsLoggedObject::wait_synchronize`] (a
/// caller-supplied bound, leaving later entries deferred).
pub(crate) fn merge_and_apply<Op: LoggedOp>(
    loggers: &mut [TscLogger<Op>],
    target: &mut Op::Target,
    max_tsc: u64,
) {
    for logger in loggers.iter_mut() {
        logger.sort_ops();
    }

    let mut heap: BinaryHeap<Cursor> = BinaryHeap::new();
    for (idx, logger) in loggers.iter().enumerate() {
        if let Some(tsc) = logger.tsc_at(0) {
            heap.push(Cursor {
                tsc,
                logger_idx: idx,
                pos: 0,
            });
        }
    }

    let mut consumed = vec![0usize; loggers.len()];
    let mut last_applied: Option<u64> = None;
    while let Some(cursor) = heap.pop() {
        if cursor.tsc >= max_tsc {
            break;
        }

        debug_assert!(
            last_applied.map_or(true, |last| cursor.tsc >= last),
            "merge applied an op out of TSC order"
        );
        last_applied = Some(cursor.tsc);

        let op = loggers[cursor.logger_idx]
            .op_at(cursor.pos)
            .expect("merge cursor points past the end of its logger");
        op.run(target);
        consumed[cursor.logger_idx] = cursor.pos + 1;

        let next_pos = cursor.pos + 1;
        if let Some(next_tsc) = loggers[cursor.logger_idx].tsc_at(next_pos) {
            heap.push(Cursor {
                tsc: next_tsc,
                logger_idx: cursor.logger_idx,
                pos: next_pos,
            });
        }
    }

    for (logger, n) in loggers.iter_mut().zip(consumed) {
        logger.drop_front(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::reference::StdHost;

    struct AddOp(i64);
    impl LoggedOp for AddOp {
        type Target = i64;
        fn run(&self, target: &mut i64) {
            *target += self.0;
        }
        fn print(&self) {}
    }

    #[test]
    fn merge_applies_in_tsc_order_regardless_of_push_order() {
        let mut a = TscLogger::<AddOp>::default();
        a.push_with_tsc(30, AddOp(3));
        a.push_with_tsc(10, AddOp(1));
        let mut b = TscLogger::<AddOp>::default();
        b.push_with_tsc(20, AddOp(2));

        let mut loggers = [a, b];
        let mut target = 0i64;
        merge_and_apply(&mut loggers, &mut target, u64::MAX);

        assert_eq!(target, 6);
        assert!(loggers[0].is_empty());
        assert!(loggers[1].is_empty());
    }

    #[test]
    fn merge_respects_max_tsc_bound() {
        let mut a = TscLogger::<AddOp>::default();
        a.push_with_tsc(10, AddOp(1));
        a.push_with_tsc(50, AddOp(100));

        let mut loggers = [a];
        let mut target = 0i64;
        merge_and_apply(&mut loggers, &mut target, 20);

        assert_eq!(target, 1);
        assert_eq!(loggers[0].len(), 1);
        assert_eq!(loggers[0].tsc_at(0), Some(50));
    }

    static CACHE: PerCpuCache<
        <StdHost as Host>::Lock,
        TscLogger<AddOp>,
    > = PerCpuCache::new();

    #[test]
    fn log_then_synchronize_applies_single_cpu_writes() {
        let obj: TscLoggedObject<'_, StdHost, AddOp> = TscLoggedObject::new(&CACHE, 0);
        obj.log(AddOp(1));
        obj.log(AddOp(2));
        obj.log(AddOp(3));
        let view = obj.synchronize();
        assert_eq!(*view, 6);
    }

    #[test]
    fn synchronize_with_no_writes_is_a_noop() {
        let obj: TscLoggedObject<'_, StdHost, AddOp> = TscLoggedObject::new(&CACHE, 42);
        let view = obj.synchronize();
        assert_eq!(*view, 42);
    }

    #[test]
    fn concurrent_cpus_merge_without_lost_updates() {
        use std::sync::Arc;
        use std::thread;

        static CACHE2: PerCpuCache<<StdHost as Host>::Lock, TscLogger<AddOp>> =
            PerCpuCache::new();
        let obj = Arc::new(TscLoggedObject::<'static, StdHost, AddOp>::new(&CACHE2, 0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let obj = Arc::clone(&obj);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    obj.log(AddOp(1));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let view = obj.synchronize();
        assert_eq!(*view, 400);
    }
}
