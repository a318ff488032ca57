//! MemoryStore: a `KeyValueStore` that holds everything in a `HashMap`.
//!
//! Used for tests and for hosts that persist nothing across restarts.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{Result, StorageError};

use super::traits::{KeyValueStore, KvWrite};

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    /// When set, every `batch_write` fails with this message.
    fail_writes: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again with `None`).
    pub fn set_write_failure(&self, message: Option<&str>) {
        *self.fail_writes.lock() = message.map(str::to_string);
    }

    /// Seed a raw value without going through a batch.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.values
            .lock()
            .insert(key.to_string(), value.to_string());
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn batch_write(&self, writes: &[KvWrite]) -> Result<()> {
        if let Some(message) = self.fail_writes.lock().clone() {
            return Err(StorageError::backend(message).into());
        }

        let mut values = self.values.lock();
        for write in writes {
            match write {
                KvWrite::Put { key, value } => {
                    values.insert(key.clone(), value.clone());
                }
                KvWrite::Remove { key } => {
                    values.remove(key);
                }
            }
        }
        Ok(())
    }
}
