pub mod contact_store;
pub mod memory;
pub mod traits;

pub use contact_store::{ContactState, ContactStore, ContactTxn};
pub use memory::MemoryStore;
pub use traits::{KeyValueStore, KvWrite};
