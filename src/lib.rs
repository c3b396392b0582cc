//! oplog: a per-CPU-log caching engine for objects that are written often
//! from many CPUs but read rarely.
//!
//! Strict, immediate application of every write to shared state forces
//! inter-CPU cache-line contention. This crate defers writes into per-CPU
//! logs and reconciles them only when a reader observes the object, so
//! writers never touch a cache line another CPU is also writing.
//!
//! Three layers are exported:
//!
//! - [`logged_object`]: the generic [`logged_object::LoggedObject`] protocol —
//!   bounded per-CPU logger cache, eviction, deadlock-avoiding lock order,
//!   one-sided CPU-bitmap membership, global synchronization.
//! - [`tsc_logged_object`]: [`tsc_logged_object::TscLoggedObject`], which
//!   orders deferred operations by hardware timestamp across CPUs and
//!   applies them in global TSC order on synchronization.
//! - [`mfs_logged_object`]: [`mfs_logged_object::MfsLoggedObject`], which adds
//!   *wait-synchronize*: reconciliation up to a caller-supplied timestamp
//!   bound, including a wait for in-flight operations on other CPUs whose
//!   linearization point may precede the bound.
//!
//! Everything this crate needs from its embedding kernel — CPU
//! identification, per-CPU storage, a spinlock, a sequence counter, a
//! bitset, a TSC reader, a memory barrier — is expressed as a trait in
//! [`host`], each with a reference implementation under
//! [`host::reference`] that a caller can use as-is or replace.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod const_default;
pub mod host;
pub mod lock;
pub mod param;
pub mod trace;

pub mod cache;
pub mod logged_object;
pub mod tsc_logger;
pub mod tsc_logged_object;
pub mod mfs_logged_object;

pub use cache::{PerCpuCache, Way};
pub use const_default::ConstDefault;
pub use host::Host;
pub use logged_object::{LoggedObject, ScopedHandle, SyncGuard};
pub use mfs_logged_object::MfsLoggedObject;
pub use tsc_logged_object::TscLoggedObject;
pub use tsc_logger::{LoggedOp, TscLogger};
