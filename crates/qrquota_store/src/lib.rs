//! Usage counter storage for the qrquota engine.
//!
//! Counters are keyed by subject, window kind and window instance, and reset
//! passively: a new window instance is a new key, and old keys expire shortly
//! after their window ends.
//!
//! ## Backends
//!
//! - [`RedisCounterStore`] - shared across processes; `INCR` and the
//!   first-creation expiry run in one server-side script. Available with the
//!   `redis` feature (on by default).
//! - [`MemoryCounterStore`] - single process, sharded locking via `dashmap`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod key;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod store;

pub use key::{CounterKey, DEFAULT_KEY_PREFIX};
pub use memory::{DEFAULT_PURGE_INTERVAL, MemoryCounterStore};
#[cfg(feature = "redis")]
pub use redis_store::RedisCounterStore;
pub use store::CounterStore;
