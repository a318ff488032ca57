//! IdentityStore: last known resolved identity plus the anonymous shadow.
//!
//! Pure state, no I/O. The reconciliation rules for server responses live
//! here so they can be tested without a network or a persistence backend.

use crate::mutation::{AttributeMutation, TagGroupsMutation};
use crate::types::{ContactChange, ContactConflict, ContactData, ContactIdentity};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityStore {
    identity: Option<ContactIdentity>,
    anon_data: Option<ContactData>,
    last_resolved_at: Option<i64>,
    /// Set after any successful identity response, cleared by an explicit
    /// resolve request. Never persisted.
    is_contact_id_refreshed: bool,
}

/// Side effects of applying an identity response, to be announced once the
/// store lock is released.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub conflict: Option<ContactConflict>,
    pub change: Option<ContactChange>,
}

impl IdentityStore {
    pub fn new(
        identity: Option<ContactIdentity>,
        anon_data: Option<ContactData>,
        last_resolved_at: Option<i64>,
    ) -> Self {
        Self {
            identity,
            anon_data,
            last_resolved_at,
            is_contact_id_refreshed: false,
        }
    }

    pub fn identity(&self) -> Option<&ContactIdentity> {
        self.identity.as_ref()
    }

    pub fn anon_data(&self) -> Option<&ContactData> {
        self.anon_data.as_ref()
    }

    /// True when the shadow holds at least one attribute or tag.
    pub fn has_anon_data(&self) -> bool {
        self.anon_data.as_ref().is_some_and(|d| !d.is_empty())
    }

    pub fn last_resolved_at(&self) -> Option<i64> {
        self.last_resolved_at
    }

    pub fn is_contact_id_refreshed(&self) -> bool {
        self.is_contact_id_refreshed
    }

    pub fn is_anonymous(&self) -> bool {
        self.identity.as_ref().is_some_and(|i| i.is_anonymous)
    }

    pub(crate) fn set_contact_id_refreshed(&mut self, refreshed: bool) {
        self.is_contact_id_refreshed = refreshed;
    }

    pub(crate) fn set_identity(&mut self, identity: Option<ContactIdentity>) {
        self.identity = identity;
    }

    pub(crate) fn set_anon_data(&mut self, data: Option<ContactData>) {
        self.anon_data = data;
    }

    pub(crate) fn record_resolved(&mut self, now_ms: i64) {
        self.last_resolved_at = Some(now_ms);
    }

    /// Reconcile a fresh identity from Identify / Reset / Resolve against the
    /// identity that was current before the call.
    pub fn apply_identity(
        &mut self,
        before: Option<&ContactIdentity>,
        response: ContactIdentity,
    ) -> Reconciliation {
        let mut outcome = Reconciliation::default();

        match before {
            Some(previous) if previous.contact_id == response.contact_id => {
                let merged = ContactIdentity {
                    named_user_id: response
                        .named_user_id
                        .or_else(|| previous.named_user_id.clone()),
                    ..response
                };
                if !merged.is_anonymous {
                    self.anon_data = None;
                }
                self.identity = Some(merged);
            }
            _ => {
                let was_anonymous = before.is_some_and(|p| p.is_anonymous);
                if was_anonymous {
                    if let Some(data) = self.anon_data.take().filter(|d| !d.is_empty()) {
                        outcome.conflict = Some(ContactConflict {
                            anonymous_data: data,
                            named_user_id: response.named_user_id.clone(),
                        });
                    }
                }
                outcome.change = Some(ContactChange {
                    contact_id: response.contact_id.clone(),
                    named_user_id: response.named_user_id.clone(),
                });
                self.anon_data = None;
                self.identity = Some(response);
            }
        }

        self.is_contact_id_refreshed = true;
        outcome
    }

    /// Fold a successful update into the anonymous shadow when the identity
    /// before the call was anonymous. Returns whether it was folded.
    pub fn apply_update(
        &mut self,
        before: Option<&ContactIdentity>,
        tag_group_mutations: &[TagGroupsMutation],
        attribute_mutations: &[AttributeMutation],
    ) -> bool {
        if !before.is_some_and(|i| i.is_anonymous) {
            return false;
        }
        self.anon_data
            .get_or_insert_with(ContactData::default)
            .apply(tag_group_mutations, attribute_mutations);
        true
    }
}
