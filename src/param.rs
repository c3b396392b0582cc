//! Compile-time tunables.
//!
//! Mirrors the teacher kernel's flat `pub const` tunables module: a small
//! set of sizes baked into the binary rather than threaded through as
//! configuration at runtime, since they size fixed per-CPU arrays.

/// Number of ways in each CPU's logger cache (spec-mandated constant).
///
/// A hash collision between two live objects on the same CPU evicts one of
/// them; there is no second-level chaining. Must be a power of two (the
/// scramble hash in [`crate::cache`] masks instead of taking a modulus).
pub const CACHE_SLOTS: usize = 4096;

/// Maximum number of CPUs this build supports.
///
/// The teacher hardcodes `NCPU = 8`; oplog does the same rather than
/// threading it through as a const generic; per-CPU arrays
/// (`host::reference::ArrayBitset`, [`crate::cache::PerCpuCache`], the MFS
/// `(start_tsc, end_tsc)` table) are all sized by this constant.
pub const NCPU: usize = 8;

static_assertions::const_assert!(CACHE_SLOTS.is_power_of_two());
static_assertions::const_assert!(NCPU > 0);
