//! Persistence collaborator for contact state.
//!
//! `KeyValueStore` is the narrow raw I/O trait implemented by the host
//! (preferences file, SQLite table, platform key-value store). Values are
//! opaque strings; the contact store serializes whole values to JSON and
//! never performs partial-field updates.

use crate::error::Result;

/// A single write inside a [`KeyValueStore::batch_write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite {
    Put { key: String, value: String },
    Remove { key: String },
}

impl KvWrite {
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// Raw key-value persistence.
///
/// Implementors must be `Send + Sync` so they can be shared across threads.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically apply every write in `writes`. Either all writes are
    /// durable when this returns `Ok`, or none are.
    fn batch_write(&self, writes: &[KvWrite]) -> Result<()>;
}
