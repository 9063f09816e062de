//! Generic caching layer for data persistence and offline support.
//!
//! This module is Redmine-agnostic. It provides:
//! - a key/value [`Storage`] backend holding JSON documents (SQLite or memory)
//! - a [`Collection`] that mirrors one entity list into storage
//! - timestamp comparison used by merge policies
//! - a per-cache [`SyncFlag`] so overlapping syncs collapse into one

mod layer;
mod storage;
mod traits;

pub use layer::{lock, spawn_refresh, Collection, SyncFlag};
#[cfg(test)]
pub use layer::SyncGuard;
pub use storage::{MemoryStorage, SharedStorage, SqliteStorage, Storage};
pub use traits::{is_newer, Cacheable, SyncReport};
