//! Key-value storage abstraction for local persistent state.
//!
//! The [`KvStore`] trait is the narrow interface the scoped local store is
//! built on: string keys, string (JSON) values, prefix listing. Backends
//! are pluggable (SQLite in the application crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

/// Abstract key-value backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](KvStore::get) | Read a value, `None` if absent |
/// | [`set`](KvStore::set) | Insert or overwrite a value |
/// | [`remove`](KvStore::remove) | Delete a key (absent keys are not an error) |
/// | [`keys_with_prefix`](KvStore::keys_with_prefix) | List keys starting with a prefix, sorted |
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
