//! Merge & skip policy: picks the next operation to execute and collapses
//! redundant entries around it.
//!
//! Pure: the caller holds the store lock and writes the result back with
//! `OperationLog::replace_head`.

use crate::identity::IdentityStore;

use super::operation::ContactOperation;

/// Result of [`next`]. The updated log is `[operation] + rest`.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub operation: Option<ContactOperation>,
    pub rest: Vec<ContactOperation>,
    /// Entries dropped as no-ops.
    pub skipped: usize,
    /// Entries absorbed into `operation`.
    pub folded: usize,
}

/// Whether `operation` would be a no-op given the current identity state.
pub fn should_skip(operation: &ContactOperation, identity: &IdentityStore) -> bool {
    match operation {
        ContactOperation::Update { .. } => false,
        ContactOperation::Identify { external_id } => {
            identity.is_contact_id_refreshed()
                && identity
                    .identity()
                    .and_then(|i| i.named_user_id.as_deref())
                    == Some(external_id.as_str())
        }
        ContactOperation::Reset => identity.is_anonymous() && !identity.has_anon_data(),
        ContactOperation::Resolve => identity.is_contact_id_refreshed(),
    }
}

/// Choose the next operation from `operations`.
pub fn next(operations: &[ContactOperation], identity: &IdentityStore) -> Prepared {
    let mut skipped = 0;
    let mut folded = 0;
    let mut cursor = 0;

    let mut chosen = None;
    while cursor < operations.len() {
        let candidate = &operations[cursor];
        cursor += 1;
        if should_skip(candidate, identity) {
            skipped += 1;
            continue;
        }
        chosen = Some(candidate.clone());
        break;
    }

    let Some(mut chosen) = chosen else {
        return Prepared {
            operation: None,
            rest: Vec::new(),
            skipped,
            folded,
        };
    };

    if chosen.is_identify() {
        // Only the last queued identify matters once the device is confirmed
        // on a named (or not yet known) contact.
        let named_or_unknown = identity.identity().map_or(true, |i| !i.is_anonymous);
        if identity.is_contact_id_refreshed() && named_or_unknown {
            while cursor < operations.len() {
                let candidate = &operations[cursor];
                if should_skip(candidate, identity) {
                    skipped += 1;
                    cursor += 1;
                    continue;
                }
                if !candidate.is_identify() {
                    break;
                }
                chosen = candidate.clone();
                folded += 1;
                cursor += 1;
            }
        }
    } else if let ContactOperation::Update {
        tag_group_mutations,
        attribute_mutations,
    } = &mut chosen
    {
        while cursor < operations.len() {
            let candidate = &operations[cursor];
            if should_skip(candidate, identity) {
                skipped += 1;
                cursor += 1;
                continue;
            }
            let ContactOperation::Update {
                tag_group_mutations: more_tags,
                attribute_mutations: more_attributes,
            } = candidate
            else {
                break;
            };
            tag_group_mutations.extend(more_tags.iter().cloned());
            attribute_mutations.extend(more_attributes.iter().cloned());
            folded += 1;
            cursor += 1;
        }
    }

    Prepared {
        operation: Some(chosen),
        rest: operations[cursor..].to_vec(),
        skipped,
        folded,
    }
}
