//! ReconciliationEngine: executes one queued contact operation per run.
//!
//! A run takes the store lock to pick (and collapse) the next operation,
//! releases it for the network call, then takes it again to apply the
//! response and pop the head. Operations appended while a call is in flight
//! land behind the head and are picked up by the next run.
//!
//! `run` never returns `Err`: every outcome is folded into a [`RunOutcome`].

use std::sync::Arc;

use crate::identity::Reconciliation;
use crate::mutation::{AttributeMutation, TagGroupsMutation};
use crate::queue::{policy, ContactOperation};
use crate::reactive::ContactEvents;
use crate::storage::ContactStore;
use crate::types::ContactIdentity;

use super::types::*;

/// Notifications collected under the lock and emitted after it is released.
#[derive(Default)]
struct Announcements {
    reconciliation: Reconciliation,
    uploaded_tags: Vec<TagGroupsMutation>,
    uploaded_attributes: Vec<AttributeMutation>,
}

pub struct ReconciliationEngine {
    store: Arc<ContactStore>,
    api: Arc<dyn ContactApi>,
    channel: Arc<dyn ChannelIdSource>,
    events: Arc<ContactEvents>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<ContactStore>,
        api: Arc<dyn ContactApi>,
        channel: Arc<dyn ChannelIdSource>,
        events: Arc<ContactEvents>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            api,
            channel,
            events,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<ContactStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<ContactEvents> {
        &self.events
    }

    /// Whether the log holds any operation.
    pub fn has_pending(&self) -> bool {
        self.store.read(|s| !s.log.is_empty())
    }

    /// Execute the next effective operation, if any.
    pub async fn run(&self) -> RunOutcome {
        let Some(channel_id) = self.channel.channel_id().filter(|id| !id.is_empty()) else {
            tracing::debug!("no channel id yet, deferring contact operations until it exists");
            return RunOutcome::idle();
        };

        let (operation, before) = match self.prepare() {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return RunOutcome::idle(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist collapsed contact operations");
                return RunOutcome {
                    status: RunStatus::RetryScheduled,
                    operation: None,
                    error: Some(RunError {
                        operation: None,
                        error: e.to_string(),
                        kind: ErrorKind::Transient,
                    }),
                    has_more: true,
                };
            }
        };

        let response = match self.perform(&operation, &channel_id, before.as_ref()).await {
            Ok(response) => response,
            Err(PerformError::Api(e)) if e.is_retryable() => {
                tracing::debug!(operation = %operation, error = %e, "contact operation failed, will retry");
                return RunOutcome {
                    status: RunStatus::RetryScheduled,
                    operation: Some(operation.clone()),
                    error: Some(RunError {
                        operation: Some(operation),
                        error: e.to_string(),
                        kind: ErrorKind::Transient,
                    }),
                    has_more: true,
                };
            }
            Err(PerformError::Api(e)) => return self.drop_failed(operation, e.to_string()),
            Err(PerformError::Precondition(reason)) => {
                return self.drop_failed(operation, reason.to_string())
            }
        };

        self.commit(operation, before, response)
    }

    /// Drop the head operation without executing it. Used by the dispatcher
    /// once an operation has exhausted its retry budget.
    pub fn drop_head(&self) -> crate::error::Result<Option<ContactOperation>> {
        self.store.with_lock(|txn| txn.log_mut().remove_first())
    }

    /// Drop the head after `attempts` consecutive retries ending in
    /// `outcome`, logging what was lost.
    pub fn give_up(
        &self,
        attempts: u32,
        outcome: &RunOutcome,
    ) -> crate::error::Result<Option<ContactOperation>> {
        let dropped = self.drop_head().map_err(|e| {
            tracing::error!(error = %e, "failed to drop contact operation");
            e
        })?;
        tracing::error!(
            attempts,
            operation = ?dropped,
            error = ?outcome.error.as_ref().map(|e| e.error.as_str()),
            "contact operation out of retries, dropping it"
        );
        Ok(dropped)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Pick the next operation under the lock and write the collapsed log
    /// back. Returns the operation and the identity current at that moment.
    fn prepare(
        &self,
    ) -> crate::error::Result<Option<(ContactOperation, Option<ContactIdentity>)>> {
        self.store.with_lock(|txn| {
            let prepared = policy::next(txn.log().operations(), txn.identity());
            if prepared.skipped > 0 || prepared.folded > 0 {
                tracing::debug!(
                    skipped = prepared.skipped,
                    folded = prepared.folded,
                    "collapsed contact operations"
                );
                txn.log_mut()
                    .replace_head(prepared.operation.clone(), prepared.rest);
            }
            let before = txn.identity().identity().cloned();
            prepared.operation.map(|op| (op, before))
        })
    }

    async fn perform(
        &self,
        operation: &ContactOperation,
        channel_id: &str,
        before: Option<&ContactIdentity>,
    ) -> Result<Option<ContactIdentity>, PerformError> {
        match operation {
            ContactOperation::Update {
                tag_group_mutations,
                attribute_mutations,
            } => {
                let Some(identity) = before else {
                    return Err(PerformError::Precondition(
                        "update requires a resolved contact identity",
                    ));
                };
                self.api
                    .update(
                        &identity.contact_id,
                        tag_group_mutations,
                        attribute_mutations,
                    )
                    .await?;
                Ok(None)
            }
            ContactOperation::Identify { external_id } => {
                let anonymous_contact = before
                    .filter(|i| i.is_anonymous)
                    .map(|i| i.contact_id.as_str());
                let identity = self
                    .api
                    .identify(external_id, channel_id, anonymous_contact)
                    .await?;
                Ok(Some(identity))
            }
            ContactOperation::Reset => Ok(Some(self.api.reset(channel_id).await?)),
            ContactOperation::Resolve => Ok(Some(self.api.resolve(channel_id).await?)),
        }
    }

    /// Apply a successful response and pop the executed head in one
    /// transaction, then notify listeners.
    fn commit(
        &self,
        operation: ContactOperation,
        before: Option<ContactIdentity>,
        response: Option<ContactIdentity>,
    ) -> RunOutcome {
        let now = self.clock.now_ms();
        let committed = self.store.with_lock(|txn| {
            let mut announcements = Announcements::default();
            let (log, identity) = txn.split_mut();

            match (&operation, response) {
                (
                    ContactOperation::Update {
                        tag_group_mutations,
                        attribute_mutations,
                    },
                    _,
                ) => {
                    if identity.apply_update(
                        before.as_ref(),
                        tag_group_mutations,
                        attribute_mutations,
                    ) {
                        announcements.uploaded_tags = tag_group_mutations.clone();
                        announcements.uploaded_attributes = attribute_mutations.clone();
                    }
                }
                (_, Some(fresh)) => {
                    if matches!(operation, ContactOperation::Resolve) {
                        identity.record_resolved(now);
                    }
                    announcements.reconciliation = identity.apply_identity(before.as_ref(), fresh);
                }
                (_, None) => {}
            }

            log.remove_first();
            (announcements, !log.is_empty())
        });

        match committed {
            Ok((announcements, has_more)) => {
                tracing::debug!(operation = %operation, has_more, "contact operation completed");
                self.announce(announcements);
                RunOutcome {
                    status: RunStatus::Completed,
                    operation: Some(operation),
                    error: None,
                    has_more,
                }
            }
            Err(e) => {
                // Memory was rolled back, so the head is still queued and will
                // be sent again.
                tracing::warn!(operation = %operation, error = %e, "failed to persist contact response");
                RunOutcome {
                    status: RunStatus::RetryScheduled,
                    operation: Some(operation.clone()),
                    error: Some(RunError {
                        operation: Some(operation),
                        error: e.to_string(),
                        kind: ErrorKind::Transient,
                    }),
                    has_more: true,
                }
            }
        }
    }

    fn drop_failed(&self, operation: ContactOperation, error: String) -> RunOutcome {
        tracing::warn!(operation = %operation, error = %error, "dropping contact operation that cannot succeed");
        let run_error = RunError {
            operation: Some(operation.clone()),
            error,
            kind: ErrorKind::Permanent,
        };

        match self.store.with_lock(|txn| {
            txn.log_mut().remove_first();
            !txn.log().is_empty()
        }) {
            Ok(has_more) => RunOutcome {
                status: RunStatus::Completed,
                operation: Some(operation),
                error: Some(run_error),
                has_more,
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to persist dropped contact operation");
                RunOutcome {
                    status: RunStatus::RetryScheduled,
                    operation: Some(operation),
                    error: Some(run_error),
                    has_more: true,
                }
            }
        }
    }

    fn announce(&self, announcements: Announcements) {
        let Announcements {
            reconciliation,
            uploaded_tags,
            uploaded_attributes,
        } = announcements;

        if let Some(conflict) = reconciliation.conflict {
            self.events.conflict.emit(&conflict);
        }
        if let Some(change) = reconciliation.change {
            self.events.contact_changed.emit(&change);
        }
        if !uploaded_attributes.is_empty() {
            self.events.attributes_uploaded.emit(&uploaded_attributes);
        }
        if !uploaded_tags.is_empty() {
            self.events.tag_groups_uploaded.emit(&uploaded_tags);
        }
    }
}

enum PerformError {
    Api(ContactApiError),
    Precondition(&'static str),
}

impl From<ContactApiError> for PerformError {
    fn from(e: ContactApiError) -> Self {
        Self::Api(e)
    }
}
