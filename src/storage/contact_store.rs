//! ContactStore: the operation log and identity store behind one lock.
//!
//! Every read used for a skip/collapse decision and every write to the log
//! happens inside [`ContactStore::with_lock`]. Values touched inside one
//! transaction are persisted in a single `KvWrite` batch before the lock is
//! released; if that batch fails the in-memory state is rolled back.
//!
//! ## Persisted layout
//!
//! | key | value |
//! |---|---|
//! | `contact.operations` | JSON array of `ContactOperation` |
//! | `contact.last_resolved_at` | integer milliseconds |
//! | `contact.anon_contact_data` | `ContactData` |
//! | `contact.last_contact_identity` | `ContactIdentity` |

use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StorageError};
use crate::identity::IdentityStore;
use crate::queue::OperationLog;
use crate::types::{ContactData, ContactIdentity};

use super::traits::{KeyValueStore, KvWrite};

pub const OPERATIONS_KEY: &str = "contact.operations";
pub const LAST_RESOLVED_AT_KEY: &str = "contact.last_resolved_at";
pub const ANON_CONTACT_DATA_KEY: &str = "contact.anon_contact_data";
pub const LAST_CONTACT_IDENTITY_KEY: &str = "contact.last_contact_identity";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactState {
    pub log: OperationLog,
    pub identity: IdentityStore,
}

#[derive(Debug, Default, Clone, Copy)]
struct Dirty {
    operations: bool,
    identity: bool,
}

/// Pre-transaction copies of the halves a transaction touched, taken on
/// first mutable access.
#[derive(Default)]
struct Undo {
    log: Option<OperationLog>,
    identity: Option<IdentityStore>,
}

impl Undo {
    fn dirty(&self) -> Dirty {
        Dirty {
            operations: self.log.is_some(),
            identity: self.identity.is_some(),
        }
    }
}

/// Lock-scoped view handed to [`ContactStore::with_lock`] callbacks.
pub struct ContactTxn<'a> {
    state: &'a mut ContactState,
    undo: Undo,
}

impl<'a> ContactTxn<'a> {
    pub fn log(&self) -> &OperationLog {
        &self.state.log
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.state.identity
    }

    /// Mutable log access; the log is persisted on commit.
    pub fn log_mut(&mut self) -> &mut OperationLog {
        if self.undo.log.is_none() {
            self.undo.log = Some(self.state.log.clone());
        }
        &mut self.state.log
    }

    /// Mutable identity access; identity, shadow and resolve time are
    /// persisted on commit.
    pub fn identity_mut(&mut self) -> &mut IdentityStore {
        if self.undo.identity.is_none() {
            self.undo.identity = Some(self.state.identity.clone());
        }
        &mut self.state.identity
    }

    /// Both halves at once, for decisions that read identity while
    /// rewriting the log.
    pub fn split_mut(&mut self) -> (&mut OperationLog, &mut IdentityStore) {
        self.log_mut();
        self.identity_mut();
        (&mut self.state.log, &mut self.state.identity)
    }

    /// The confirmed flag is memory-only, so flipping it never triggers a write.
    pub fn set_contact_id_refreshed(&mut self, refreshed: bool) {
        self.state.identity.set_contact_id_refreshed(refreshed);
    }
}

pub struct ContactStore {
    backend: Arc<dyn KeyValueStore>,
    state: Mutex<ContactState>,
}

impl ContactStore {
    /// Load persisted state from `backend`. Unreadable values are logged and
    /// treated as absent; backend I/O errors are returned.
    pub fn load(backend: Arc<dyn KeyValueStore>) -> Result<Self> {
        let log = match backend.get(OPERATIONS_KEY)? {
            Some(raw) => OperationLog::from_json(&raw),
            None => OperationLog::new(),
        };
        let identity: Option<ContactIdentity> = read_value(&*backend, LAST_CONTACT_IDENTITY_KEY)?;
        let anon_data: Option<ContactData> = read_value(&*backend, ANON_CONTACT_DATA_KEY)?;
        let last_resolved_at: Option<i64> = read_value(&*backend, LAST_RESOLVED_AT_KEY)?;

        Ok(Self {
            backend,
            state: Mutex::new(ContactState {
                log,
                identity: IdentityStore::new(identity, anon_data, last_resolved_at),
            }),
        })
    }

    /// Run `f` inside the store's critical section and persist whatever it
    /// touched before releasing the lock.
    pub fn with_lock<T>(&self, f: impl FnOnce(&mut ContactTxn<'_>) -> T) -> Result<T> {
        let mut state = self.state.lock();
        let refreshed = state.identity.is_contact_id_refreshed();

        let mut txn = ContactTxn {
            state: &mut *state,
            undo: Undo::default(),
        };
        let value = f(&mut txn);
        let undo = txn.undo;

        if let Err(e) = self.persist(&*state, undo.dirty()) {
            if let Some(log) = undo.log {
                state.log = log;
            }
            if let Some(identity) = undo.identity {
                state.identity = identity;
            }
            state.identity.set_contact_id_refreshed(refreshed);
            return Err(e);
        }
        Ok(value)
    }

    /// Read-only access under the lock. Never writes.
    pub fn read<T>(&self, f: impl FnOnce(&ContactState) -> T) -> T {
        f(&*self.state.lock())
    }

    fn persist(&self, state: &ContactState, dirty: Dirty) -> Result<()> {
        let mut writes = Vec::new();

        if dirty.operations {
            let value = state.log.to_json().map_err(|source| StorageError::Serialize {
                key: OPERATIONS_KEY.to_string(),
                source,
            })?;
            writes.push(KvWrite::Put {
                key: OPERATIONS_KEY.to_string(),
                value,
            });
        }

        if dirty.identity {
            let identity = &state.identity;
            writes.push(write_value(LAST_CONTACT_IDENTITY_KEY, identity.identity())?);
            writes.push(write_value(ANON_CONTACT_DATA_KEY, identity.anon_data())?);
            writes.push(write_value(
                LAST_RESOLVED_AT_KEY,
                identity.last_resolved_at().as_ref(),
            )?);
        }

        if writes.is_empty() {
            return Ok(());
        }
        self.backend.batch_write(&writes)
    }
}

fn read_value<T: DeserializeOwned>(backend: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = backend.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(key, error = %e, "persisted contact value unreadable, treating as absent");
            Ok(None)
        }
    }
}

fn write_value<T: Serialize>(key: &str, value: Option<&T>) -> Result<KvWrite> {
    let Some(value) = value else {
        return Ok(KvWrite::Remove {
            key: key.to_string(),
        });
    };
    let value = serde_json::to_string(value).map_err(|source| StorageError::Serialize {
        key: key.to_string(),
        source,
    })?;
    Ok(KvWrite::Put {
        key: key.to_string(),
        value,
    })
}
