pub mod config;
pub mod contact;
pub mod error;
pub mod identity;
pub mod mutation;
pub mod queue;
pub mod reactive;
pub mod storage;
pub mod sync;
pub mod types;

pub use config::{ContactConfig, DispatchConfig};
pub use contact::{Contact, ContactOptions};
pub use error::{ContactError, Result, StorageError};
pub use identity::IdentityStore;
pub use queue::{ContactOperation, OperationLog};
pub use types::{ContactChange, ContactConflict, ContactData, ContactIdentity};
