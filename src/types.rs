use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mutation::{AttributeMutation, TagGroups, TagGroupsMutation};

/// The server's view of "who this device is".
///
/// Replaced wholesale by the identity store, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactIdentity {
    pub contact_id: String,
    pub is_anonymous: bool,
    #[serde(default)]
    pub named_user_id: Option<String>,
}

impl ContactIdentity {
    pub fn anonymous(contact_id: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            is_anonymous: true,
            named_user_id: None,
        }
    }

    pub fn named(contact_id: impl Into<String>, named_user_id: impl Into<String>) -> Self {
        Self {
            contact_id: contact_id.into(),
            is_anonymous: false,
            named_user_id: Some(named_user_id.into()),
        }
    }
}

/// Attribute and tag edits accumulated while the contact was anonymous.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactData {
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub tag_groups: TagGroups,
}

impl ContactData {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.tag_groups.is_empty()
    }

    /// Fold uploaded mutations into this snapshot.
    pub fn apply(
        &mut self,
        tag_group_mutations: &[TagGroupsMutation],
        attribute_mutations: &[AttributeMutation],
    ) {
        for mutation in attribute_mutations {
            match mutation {
                AttributeMutation::Set { key, value, .. } => {
                    self.attributes.insert(key.clone(), value.clone());
                }
                AttributeMutation::Remove { key, .. } => {
                    self.attributes.remove(key);
                }
            }
        }

        for mutation in tag_group_mutations {
            mutation.apply(&mut self.tag_groups);
        }
    }
}

/// Fired when an anonymous contact holding local data resolves to a different
/// contact on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactConflict {
    pub anonymous_data: ContactData,
    pub named_user_id: Option<String>,
}

/// Fired whenever the stored contact id changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactChange {
    pub contact_id: String,
    pub named_user_id: Option<String>,
}
