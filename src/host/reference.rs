//! Default implementations of the [`super`] traits.
//!
//! A real kernel host is expected to supply its own: an IRQ-safe spinlock
//! tied into its scheduler's push-off/pop-off nesting, a TSC read that's
//! actually synchronized across sockets, per-CPU storage backed by real
//! per-core memory, and so on. These exist so the crate is usable (and
//! testable) on its own.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::const_default::ConstDefault;
use crate::host::{BitIter, CpuBitset, RawLock, SeqCount, TscSource};
use crate::param::NCPU;

/// A test-and-test-and-set spinlock.
///
/// Ported in spirit from the teacher's `lock::spinlock::RawSpinlock`
/// (`AtomicPtr<Cpu>`-based compare-exchange loop), minus the kernel's
/// IRQ push-off/pop-off nesting — disabling interrupts around the
/// critical section is a host concern (it depends on the host's trap
/// model), not something a portable `no_std` library can do on its own.
pub struct RawSpinlock {
    locked: AtomicBool,
}

impl RawSpinlock {
    /// Creates a new, unlocked spinlock.
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }
}

impl Default for RawSpinlock {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstDefault for RawSpinlock {
    const INIT: Self = Self::new();
}

impl RawLock for RawSpinlock {
    fn acquire(&self) {
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            // Test-and-test-and-set: spin on a plain load so contending
            // cores don't all hammer the same cache line with RMWs.
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    fn release(&self) {
        debug_assert!(self.holding(), "release of a lock this cpu does not hold");
        self.locked.store(false, Ordering::Release);
    }

    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

/// A seqlock-style sequence counter over a single `AtomicU32`.
///
/// Even values mean "no writer in progress"; a writer bumps it to odd
/// before mutating the protected value and back to even after. Readers
/// retry whenever the counter they observed was odd, or changed across
/// the read.
pub struct RawSeqCount {
    seq: AtomicU32,
}

impl RawSeqCount {
    /// Creates a new sequence counter in the "no writer in progress" state.
    pub const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
        }
    }
}

impl Default for RawSeqCount {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstDefault for RawSeqCount {
    const INIT: Self = Self::new();
}

impl SeqCount for RawSeqCount {
    fn read_begin(&self) -> u32 {
        loop {
            let s = self.seq.load(Ordering::Acquire);
            if s & 1 == 0 {
                return s;
            }
            core::hint::spin_loop();
        }
    }

    fn read_retry(&self, start: u32) -> bool {
        // `Acquire` so a reader that sees no retry needed also sees every
        // store the writer made between write_begin and write_end.
        self.seq.load(Ordering::Acquire) != start
    }

    fn write_begin(&self) {
        let s = self.seq.fetch_add(1, Ordering::AcqRel);
        debug_assert!(s & 1 == 0, "write_begin on a seqcount mid-write");
    }

    fn write_end(&self) {
        let s = self.seq.fetch_add(1, Ordering::Release);
        debug_assert!(s & 1 == 1, "write_end without a matching write_begin");
    }
}

/// A fixed-size atomic bitset over `0..NCPU`, one word per 64 CPUs.
///
/// `set` is a single relaxed-loaded, `Release`-stored `fetch_or` — no lock.
/// `clear` is documented (per [`CpuBitset::clear`]) as requiring the
/// caller already hold the owning object's sync lock and the relevant way
/// lock; this type cannot and does not check that.
pub struct ArrayBitset {
    words: [AtomicU64; Self::WORDS],
}

impl ArrayBitset {
    const WORDS: usize = (NCPU + 63) / 64;

    /// Creates an empty bitset.
    pub const fn new() -> Self {
        Self {
            words: [const { AtomicU64::new(0) }; Self::WORDS],
        }
    }
}

impl Default for ArrayBitset {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstDefault for ArrayBitset {
    const INIT: Self = Self::new();
}

impl CpuBitset for ArrayBitset {
    fn set(&self, cpu: usize) {
        debug_assert!(cpu < NCPU);
        let (word, bit) = (cpu / 64, cpu % 64);
        self.words[word].fetch_or(1 << bit, Ordering::Release);
    }

    fn clear(&self, cpu: usize) {
        debug_assert!(cpu < NCPU);
        let (word, bit) = (cpu / 64, cpu % 64);
        self.words[word].fetch_and(!(1 << bit), Ordering::Release);
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Acquire) == 0)
    }

    fn iter_set(&self) -> BitIter<'_> {
        BitIter::new(&self.words)
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Reads the TSC with `rdtscp`, which is serializing with respect
        /// to preceding instructions (unlike plain `rdtsc`), on the
        /// assumption the target supports it (true of essentially every
        /// x86_64 host this crate would run on).
        ///
        /// Spec §9 flags the source's `rdtscp()` helper as almost certainly
        /// buggy (`return rdtscp();` — infinite recursion). This reads the
        /// hardware counter via the actual intrinsic instead of replicating
        /// that bug.
        pub struct SerializingTscSource;

        impl SerializingTscSource {
            /// Creates a TSC source backed by the `rdtscp` instruction.
            pub const fn new() -> Self {
                Self
            }
        }

        impl Default for SerializingTscSource {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ConstDefault for SerializingTscSource {
            const INIT: Self = Self::new();
        }

        impl TscSource for SerializingTscSource {
            fn read(&self) -> u64 {
                let mut aux: u32 = 0;
                // SAFETY: `rdtscp` has no preconditions beyond running on
                // x86_64; `aux` is a valid output location.
                unsafe { core::arch::x86_64::__rdtscp(&mut aux) }
            }
        }
    } else {
        /// A monotonic stand-in for a hardware TSC on targets where this
        /// crate cannot assume one exists (or where `rdtscp` is
        /// unavailable).
        ///
        /// This is **not** a wall-clock timestamp and is not synchronized
        /// to any external clock; it only satisfies spec Invariant 5
        /// (non-decreasing, and comparable across CPUs). A host targeting
        /// real hardware with a synchronized TSC (or an equivalent, e.g.
        /// ARM's `CNTVCT_EL0`) should supply its own [`TscSource`].
        ///
        /// Backed by one process-wide counter (not a field on `Self`) so
        /// that every `SerializingTscSource` value, on every CPU, reads
        /// from the same clock — mirroring a real TSC's one-hardware-
        /// register-per-machine semantics, which a per-instance counter
        /// would not.
        pub struct SerializingTscSource;

        static FALLBACK_CLOCK: AtomicU64 = AtomicU64::new(0);

        impl SerializingTscSource {
            /// Creates a handle onto the shared fallback clock.
            pub const fn new() -> Self {
                Self
            }
        }

        impl Default for SerializingTscSource {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ConstDefault for SerializingTscSource {
            const INIT: Self = Self::new();
        }

        impl TscSource for SerializingTscSource {
            fn read(&self) -> u64 {
                FALLBACK_CLOCK.fetch_add(1, Ordering::Relaxed)
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use std_thread_cpu::StdThreadCpu;

#[cfg(any(test, feature = "test-support"))]
mod std_thread_cpu {
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::host::CurrentCpu;
    use crate::param::NCPU;

    static NEXT_CPU: AtomicUsize = AtomicUsize::new(0);

    std::thread_local! {
        static THIS_CPU: Cell<Option<usize>> = const { Cell::new(None) };
    }

    /// Assigns each OS thread a stable CPU id in `0..NCPU` on first use, so
    /// the crate's own multi-threaded tests can exercise the per-CPU cache
    /// without a real kernel assigning CPU ids. Only compiled for
    /// `#[cfg(test)]`/`test-support` — production, `no_std` builds supply their own
    /// [`CurrentCpu`].
    pub struct StdThreadCpu;

    impl CurrentCpu for StdThreadCpu {
        fn current_cpu_id() -> usize {
            THIS_CPU.with(|cell| {
                if let Some(id) = cell.get() {
                    return id;
                }
                let id = NEXT_CPU.fetch_add(1, Ordering::Relaxed) % NCPU;
                cell.set(Some(id));
                id
            })
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use std_host::StdHost;

#[cfg(any(test, feature = "test-support"))]
mod std_host {
    use super::{ArrayBitset, RawSpinlock, SerializingTscSource, StdThreadCpu};
    use crate::host::Host;

    /// The reference [`Host`] instantiation, wiring every trait in this
    /// module together. Gated the same as [`StdThreadCpu`].
    pub struct StdHost;

    impl Host for StdHost {
        type Lock = RawSpinlock;
        type Bitset = ArrayBitset;
        type Tsc = SerializingTscSource;
        type Seq = super::RawSeqCount;
        type Cpu = StdThreadCpu;
    }
}
