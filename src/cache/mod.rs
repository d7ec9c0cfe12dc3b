//! Read-through caching over the local store.
//!
//! This module is agnostic of the restaurant domain. It provides:
//! - Read-through list fetches that return local data whenever any is present
//! - Network-first fetches of indexed records with a local fallback
//! - Mutations that touch the local copy only after the network confirms them
//! - Explicit degradation when no local store is available

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{LocalStore, SqliteStorage};
pub use traits::{CacheResult, CacheSource, Cacheable, Collection};
