//! OperationLog: the ordered list of pending contact operations.
//!
//! Pure in-memory state. Locking and persistence are the owner's concern
//! (see `storage::contact_store::ContactStore`), which is why every mutator
//! here is a plain `&mut self` method.

use serde_json::Value;

use super::operation::ContactOperation;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationLog {
    operations: Vec<ContactOperation>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_operations(operations: Vec<ContactOperation>) -> Self {
        Self { operations }
    }

    pub fn append(&mut self, operation: ContactOperation) {
        self.operations.push(operation);
    }

    /// Copy of the current ordered list.
    pub fn snapshot(&self) -> Vec<ContactOperation> {
        self.operations.clone()
    }

    pub fn operations(&self) -> &[ContactOperation] {
        &self.operations
    }

    pub fn head(&self) -> Option<&ContactOperation> {
        self.operations.first()
    }

    /// Replace the whole log with `[new_head] + rest`, or just `rest` when
    /// there is no new head.
    pub fn replace_head(&mut self, new_head: Option<ContactOperation>, rest: Vec<ContactOperation>) {
        let mut operations = Vec::with_capacity(rest.len() + 1);
        operations.extend(new_head);
        operations.extend(rest);
        self.operations = operations;
    }

    /// Drop exactly the first entry. Returns it, if any.
    pub fn remove_first(&mut self) -> Option<ContactOperation> {
        if self.operations.is_empty() {
            None
        } else {
            Some(self.operations.remove(0))
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    // -----------------------------------------------------------------------
    // Persistence form
    // -----------------------------------------------------------------------

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.operations)
    }

    /// Parse a persisted log. A corrupt top-level value yields an empty log;
    /// a corrupt element drops only that element.
    pub fn from_json(raw: &str) -> Self {
        let values: Vec<Value> = match serde_json::from_str(raw) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(error = %e, "persisted contact operations unreadable, starting empty");
                return Self::new();
            }
        };

        let operations = values
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value(value) {
                Ok(op) => Some(op),
                Err(e) => {
                    tracing::warn!(index, error = %e, "failed to parse contact operation, dropping it");
                    None
                }
            })
            .collect();

        Self { operations }
    }
}
