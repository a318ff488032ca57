//! ContactEvents: one emitter per outbound notification kind.

use crate::mutation::{AttributeMutation, TagGroupsMutation};
use crate::types::{ContactChange, ContactConflict};

use super::event_emitter::EventEmitter;

#[derive(Default)]
pub struct ContactEvents {
    /// Attribute mutations uploaded while the contact was anonymous.
    pub attributes_uploaded: EventEmitter<Vec<AttributeMutation>>,
    /// Tag group mutations uploaded while the contact was anonymous.
    pub tag_groups_uploaded: EventEmitter<Vec<TagGroupsMutation>>,
    pub contact_changed: EventEmitter<ContactChange>,
    pub conflict: EventEmitter<ContactConflict>,
}

impl ContactEvents {
    pub fn new() -> Self {
        Self::default()
    }
}
