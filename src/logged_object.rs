//! The generic logged-object protocol shared by
//! [`crate::tsc_logged_object::TscLoggedObject`] and
//! [`crate::mfs_logged_object::MfsLoggedObject`]: a bounded per-CPU logger
//! cache, eviction, deadlock-avoiding lock order, and the one-sided
//! CPU-bitmap membership test.
//!
//! Grounded on the teacher's `arena::ArrayArena::find_or_alloc`: scan a
//! fixed-size table for a matching tag, and on a miss, evict whatever
//! occupies the slot the hash picked. The teacher evicts an unreferenced
//! arena entry outright; here eviction instead *hands off* the evicted
//! logger's contents to the object that owned it, since those entries are
//! still live data the logged object must eventually apply.

use crate::host::{Host, RawLock};
use crate::lock::Guard;
use crate::tsc_logger::TscLogger;

/// A type whose writes are deferred through a per-CPU [`TscLogger`] cache
/// and reconciled on demand.
///
/// Implementors provide the handful of accessors this trait's default
/// methods need (the shared cache, this instance's membership bitmap, its
/// sync lock) plus [`LoggedObject::absorb_evicted`], the one step that
/// differs between [`crate::tsc_logged_object::TscLoggedObject`] and a
/// hypothetical sibling with a different merge policy.
///
/// # Safety
/// `Self` must be `'static`+`Sized`: [`LoggedObject::get_logger`]
/// recovers a `&Self` from a raw tag left in the cache by a *different*
/// instance, which is sound only because every tag the shared cache ever
/// holds is the address of some live `Self` (never a different type, see
/// [`crate::cache::PerCpuCache`]'s safety note) that will not be
/// deallocated while referenced.
pub trait LoggedObject: Sized + 'static {
    /// The aggregate host-capability bundle (lock, bitset, TSC, CPU id).
    type Host: Host;

    /// The deferred-operation type this object logs.
    type Op;

    /// The per-CPU logger cache shared by every instance of this type.
    ///
    /// Shared, not per-instance: the whole point of a bounded cache is
    /// that many logged objects of the same type contend over a fixed
    /// number of ways, forcing eviction (spec §3).
    fn cache(&self) -> &crate::cache::PerCpuCache<<Self::Host as Host>::Lock, TscLogger<Self::Op>>;

    /// This instance's CPU membership bitmap: which CPUs may currently
    /// hold unflushed entries for it, either still cached or already
    /// evicted into [`LoggedObject::absorb_evicted`]'s pending state.
    fn bitmap(&self) -> &<Self::Host as Host>::Bitset;

    /// The lock serializing this instance's own synchronize/absorb path.
    fn sync_lock(&self) -> &crate::lock::Lock<<Self::Host as Host>::Lock, ()>;

    /// This instance's cache tag: its own address, reinterpreted as
    /// `usize`. Never `0`, since `&Self` is always non-null.
    fn tag(&self) -> usize {
        self as *const Self as usize
    }

    /// Folds an evicted logger's entries into this object's own pending
    /// state.
    ///
    /// Called with `cpu`'s way lock already released. `sync_guard` is the
    /// caller's live guard over [`LoggedObject::sync_lock`], both
    /// serializing this call against a concurrent synchronize and proving
    /// (via [`crate::lock::RemoteLock::get_mut_unchecked`]) that this
    /// object's pending state may be mutated.
    fn absorb_evicted(
        &self,
        cpu: usize,
        evicted: TscLogger<Self::Op>,
        sync_guard: &mut Guard<'_, <Self::Host as Host>::Lock, ()>,
    );

    /// Returns a handle to this CPU's logger for this object, evicting and
    /// absorbing a colliding entry if the cache way this object hashes to
    /// is occupied by a different instance.
    ///
    /// Lock order is normally way-lock-only. Eviction additionally needs
    /// the evicted object's sync lock (way → sync), the opposite order
    /// [`crate::tsc_logged_object::TscLoggedObject::synchronize`] takes
    /// (sync → way). Rather than impose a global order, this resolves the
    /// inversion one-sidedly: try the sync lock without blocking; on
    /// failure, release the way lock, wait for the sync lock once (letting
    /// the competing synchronize finish), and retry from the top (spec
    /// §4.2, §9).
    fn get_logger(&self) -> ScopedHandle<'_, <Self::Host as Host>::Lock, Self::Op> {
        let cpu = <Self::Host as Host>::Cpu::current_cpu_id();
        let tag = self.tag();
        loop {
            let way = self.cache().way_for(cpu, tag);
            let mut guard = way.lock();
            let way_tag = way.tag();

            if way_tag == tag {
                self.bitmap().set(cpu);
                return ScopedHandle { guard };
            }

            if way_tag == 0 {
                way.set_tag(tag);
                self.bitmap().set(cpu);
                return ScopedHandle { guard };
            }

            // SAFETY: `way_tag` was stored by some instance of `Self`
            // sharing this cache (see trait safety note); that instance
            // outlives this call since it is `'static` and never
            // deallocated while its tag remains reachable through the
            // cache.
            let prev: &Self = unsafe { &*(way_tag as *const Self) };

            match prev.sync_lock().try_lock() {
                Some(mut sync_guard) => {
                    let evicted = core::mem::take(&mut *guard);
                    way.set_tag(0);
                    drop(guard);
                    prev.absorb_evicted(cpu, evicted, &mut sync_guard);
                    drop(sync_guard);
                }
                None => {
                    drop(guard);
                    // Wait out the competing synchronize, then retry.
                    drop(prev.sync_lock().lock());
                }
            }
        }
    }
}

/// A handle to one CPU's logger for one object, returned by
/// [`LoggedObject::get_logger`].
pub struct ScopedHandle<'s, R: RawLock, Op> {
    guard: Guard<'s, R, TscLogger<Op>>,
}

impl<'s, R: RawLock, Op> ScopedHandle<'s, R, Op> {
    /// Appends one deferred operation at the given timestamp.
    pub fn push(&mut self, tsc: u64, op: Op) {
        self.guard.push_with_tsc(tsc, op);
    }

    /// Number of entries not yet applied.
    pub fn len(&self) -> usize {
        self.guard.len()
    }

    /// Whether there are no entries not yet applied.
    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}

/// An opaque, read-only view of a logged object's target after
/// reconciliation, returned by `synchronize`/`wait_synchronize`.
///
/// Holds the object's sync lock for its own lifetime, so a concurrent
/// synchronize on the same object blocks until every outstanding
/// `SyncGuard` is dropped — the target cannot change out from under a
/// caller inspecting it.
pub struct SyncGuard<'s, R: RawLock, T> {
    _guard: Guard<'s, R, ()>,
    target: &'s T,
}

impl<'s, R: RawLock, T> SyncGuard<'s, R, T> {
    pub(crate) fn new(guard: Guard<'s, R, ()>, target: &'s T) -> Self {
        Self {
            _guard: guard,
            target,
        }
    }
}

impl<R: RawLock, T> core::ops::Deref for SyncGuard<'_, R, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.target
    }
}
