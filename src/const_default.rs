//! A `const fn`-friendly stand-in for [`Default`].
//!
//! `Default::default()` cannot be called from a `const fn` that is generic
//! over the `Default` impl (that needs the unstable `const_trait_impl`
//! feature), which rules out a plain `PerCpuCache<R, L>::new()` being `const`
//! for arbitrary `L: Default`. Associated *constants*, unlike trait methods,
//! are usable from generic const contexts on stable Rust, so every type this
//! crate sizes a `static` array of (way locks, loggers, seqcounts) implements
//! this instead.

/// A value usable as the initial contents of a `static`, available as an
/// associated constant so it can be read from a `const fn` generic over `T`.
pub trait ConstDefault {
    /// The value a fresh, empty instance of `Self` should hold.
    const INIT: Self;
}
