//! The bounded per-CPU logger cache (spec §3, §4.1): `NCPU` independent
//! direct-mapped caches of `CACHE_SLOTS` ways each, tagged by the logged
//! object's address.
//!
//! Grounded on the teacher's `arena::ArrayArena` (a fixed-size array of
//! `Lock`-wrapped slots, looked up and replaced by a simple scan/hash) —
//! generalized here from "a slot holding a reusable object" to "a slot
//! holding one CPU's pending log for whichever object last hashed onto
//! it".

use array_macro::array;

use crate::const_default::ConstDefault;
use crate::host::RawLock;
use crate::lock::{Guard, Lock};
use crate::param::{CACHE_SLOTS, NCPU};

/// One cache way: an object tag plus the lock-guarded logger for whichever
/// object currently owns this slot.
///
/// A tag of `0` means the way is empty. Any other value is the logged
/// object's address, reinterpreted as `usize` (spec §4.1's "tagged by
/// object identity"); `0` is never a valid object address since `&T`
/// pointers are always non-null.
pub struct Way<R, L> {
    tag: core::sync::atomic::AtomicUsize,
    logger: Lock<R, L>,
}

impl<R: ConstDefault, L: ConstDefault> ConstDefault for Way<R, L> {
    const INIT: Self = Self {
        tag: core::sync::atomic::AtomicUsize::new(0),
        logger: Lock::with_const_default(L::INIT),
    };
}

impl<R: RawLock, L> Way<R, L> {
    /// Returns the object tag currently occupying this way, without
    /// locking. Only a hint unless the way lock is held by the caller —
    /// used for the fast-path tag comparison before acquiring the lock.
    pub fn tag(&self) -> usize {
        self.tag.load(core::sync::atomic::Ordering::Acquire)
    }

    /// Acquires the way lock, spinning until free.
    pub fn lock(&self) -> Guard<'_, R, L> {
        self.logger.lock()
    }

    /// Attempts to acquire the way lock without spinning.
    pub fn try_lock(&self) -> Option<Guard<'_, R, L>> {
        self.logger.try_lock()
    }

    /// Overwrites the tag. Caller must hold the way lock.
    pub fn set_tag(&self, tag: usize) {
        self.tag.store(tag, core::sync::atomic::Ordering::Release);
    }
}

/// One CPU's set of [`CACHE_SLOTS`] ways.
struct CpuCache<R, L> {
    ways: [Way<R, L>; CACHE_SLOTS],
}

impl<R: ConstDefault, L: ConstDefault> ConstDefault for CpuCache<R, L> {
    const INIT: Self = Self {
        ways: array![_ => Way::INIT; CACHE_SLOTS],
    };
}

/// The full `NCPU`-by-`CACHE_SLOTS` cache table.
///
/// # Safety
/// All objects whose logs are ever stored in one `PerCpuCache` instance
/// must share the same concrete type `T` such that `tag` values are valid
/// `*const T` for that `T`. [`crate::logged_object::LoggedObject`]'s
/// default methods uphold this by giving each implementing type its own
/// static cache (never sharing one `PerCpuCache` across unrelated object
/// types), and require `T: 'static` so a tag recovered from the cache can
/// be reinterpreted as `&'static T` for the lifetime of an eviction flush.
pub struct PerCpuCache<R, L> {
    cpus: [CpuCache<R, L>; NCPU],
}

impl<R: ConstDefault, L: ConstDefault> ConstDefault for PerCpuCache<R, L> {
    const INIT: Self = Self {
        cpus: array![_ => CpuCache::INIT; NCPU],
    };
}

impl<R: ConstDefault, L: ConstDefault> PerCpuCache<R, L> {
    /// Creates a fresh, fully empty cache, suitable for a `static`.
    pub const fn new() -> Self {
        Self::INIT
    }
}

impl<R: RawLock, L> PerCpuCache<R, L> {
    /// Returns the way `cpu`'s cache maps `tag` onto.
    ///
    /// Uses a multiplicative (Fibonacci) hash so adjacent object addresses
    /// (e.g. elements of the same array) spread across ways instead of
    /// landing on consecutive slots, then masks to `CACHE_SLOTS` (a power
    /// of two, checked in [`crate::param`]).
    pub fn way_for(&self, cpu: usize, tag: usize) -> &Way<R, L> {
        debug_assert!(cpu < NCPU);
        let idx = scramble(tag as u64) as usize & (CACHE_SLOTS - 1);
        &self.cpus[cpu].ways[idx]
    }
}

/// Multiplicative mixing hash (splitmix64's finalizer), used only to
/// spread pointer-derived tags across cache ways — not required to be
/// cryptographically strong.
fn scramble(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_tags_rarely_collide() {
        let a = scramble(8) & (CACHE_SLOTS as u64 - 1);
        let b = scramble(16) & (CACHE_SLOTS as u64 - 1);
        let c = scramble(24) & (CACHE_SLOTS as u64 - 1);
        assert!(!(a == b && b == c), "three adjacent tags all collided");
    }

    #[test]
    fn way_for_is_deterministic() {
        use crate::host::reference::RawSpinlock;
        use crate::tsc_logger::TscLogger;
        let cache: PerCpuCache<RawSpinlock, TscLogger<()>> = PerCpuCache::new();
        let w1 = cache.way_for(0, 0x1000) as *const _;
        let w2 = cache.way_for(0, 0x1000) as *const _;
        assert_eq!(w1, w2);
    }
}
