//! Contact: the public facade over the operation log.
//!
//! Mutation calls validate their input, append to the log under the store
//! lock (durable before they return), and ask the scheduler for a run. They
//! never wait on the network; results surface through the identity getters
//! and [`ContactEvents`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::ContactConfig;
use crate::error::{ContactError, Result};
use crate::mutation::{AttributeEditor, AttributeMutation, TagGroupsEditor, TagGroupsMutation};
use crate::queue::ContactOperation;
use crate::reactive::ContactEvents;
use crate::storage::{ContactStore, KeyValueStore};
use crate::sync::{
    ChannelIdSource, Clock, ContactApi, ContactDispatcher, ReconciliationEngine, RunOutcome,
    RunScheduler, RunStatus, ScheduleRequest, SystemClock,
};
use crate::types::ContactIdentity;

/// Longest named user id accepted by [`Contact::identify`], in characters.
pub const MAX_NAMED_USER_ID_LENGTH: usize = 128;

/// Collaborators and settings for [`Contact::new`].
pub struct ContactOptions {
    pub store: Arc<dyn KeyValueStore>,
    pub api: Arc<dyn ContactApi>,
    pub channel: Arc<dyn ChannelIdSource>,
    /// Host scheduler. When `None`, a [`ContactDispatcher`] on the current
    /// tokio runtime drives the engine. A host scheduler answers each request
    /// by calling [`Contact::perform_run`].
    pub scheduler: Option<Arc<dyn RunScheduler>>,
    /// Defaults to [`SystemClock`].
    pub clock: Option<Arc<dyn Clock>>,
    pub config: ContactConfig,
}

impl ContactOptions {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        api: Arc<dyn ContactApi>,
        channel: Arc<dyn ChannelIdSource>,
    ) -> Self {
        Self {
            store,
            api,
            channel,
            scheduler: None,
            clock: None,
            config: ContactConfig::default(),
        }
    }
}

pub struct Contact {
    store: Arc<ContactStore>,
    engine: Arc<ReconciliationEngine>,
    events: Arc<ContactEvents>,
    scheduler: Arc<dyn RunScheduler>,
    dispatcher: Option<ContactDispatcher>,
    clock: Arc<dyn Clock>,
    config: ContactConfig,
    contacts_enabled: AtomicBool,
    tags_and_attributes_enabled: AtomicBool,
    /// Consecutive retries of the current head, for runs driven through
    /// [`Contact::perform_run`].
    retry_attempt: AtomicU32,
}

impl Contact {
    /// Load persisted state and wire the engine. Work left over from a
    /// previous process is scheduled right away.
    pub fn new(options: ContactOptions) -> Result<Self> {
        let store = Arc::new(ContactStore::load(options.store)?);
        let events = Arc::new(ContactEvents::new());
        let clock = options
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::clone(&store),
            options.api,
            options.channel,
            Arc::clone(&events),
            Arc::clone(&clock),
        ));

        let (scheduler, dispatcher): (Arc<dyn RunScheduler>, Option<ContactDispatcher>) =
            match options.scheduler {
                Some(scheduler) => (scheduler, None),
                None => {
                    let dispatcher =
                        ContactDispatcher::new(Arc::clone(&engine), options.config.dispatch.clone());
                    let scheduler: Arc<dyn RunScheduler> = Arc::new(dispatcher.clone());
                    (scheduler, Some(dispatcher))
                }
            };

        let contact = Self {
            store,
            engine,
            events,
            scheduler,
            dispatcher,
            clock,
            config: options.config,
            contacts_enabled: AtomicBool::new(true),
            tags_and_attributes_enabled: AtomicBool::new(true),
            retry_attempt: AtomicU32::new(0),
        };

        if contact.engine.has_pending() {
            contact.scheduler.schedule_run(ScheduleRequest::Immediate);
        }
        Ok(contact)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Associate the contact with `external_id` (1 to 128 characters).
    pub fn identify(&self, external_id: &str) -> Result<()> {
        let length = external_id.chars().count();
        if length == 0 || length > MAX_NAMED_USER_ID_LENGTH {
            return Err(ContactError::InvalidOperation(format!(
                "named user id must be 1 to {MAX_NAMED_USER_ID_LENGTH} characters, got {length}"
            )));
        }
        if !self.contacts_enabled() {
            tracing::debug!("contacts disabled, ignoring identify");
            return Ok(());
        }
        self.enqueue([ContactOperation::identify(external_id)])
    }

    /// Return the device to a fresh anonymous contact.
    pub fn reset(&self) -> Result<()> {
        if !self.contacts_enabled() {
            tracing::debug!("contacts disabled, ignoring reset");
            return Ok(());
        }
        self.enqueue([ContactOperation::Reset])
    }

    /// Ask the server for the current contact, even if one was confirmed
    /// earlier in this process.
    pub fn resolve(&self) -> Result<()> {
        if !self.contacts_enabled() {
            tracing::debug!("contacts disabled, ignoring resolve");
            return Ok(());
        }
        self.store.with_lock(|txn| {
            txn.set_contact_id_refreshed(false);
            txn.log_mut().append(ContactOperation::Resolve);
        })?;
        self.scheduler.schedule_run(ScheduleRequest::Immediate);
        Ok(())
    }

    pub fn edit_tag_groups(&self) -> TagGroupsEditor<'_> {
        TagGroupsEditor::new(move |mutations| self.enqueue_update(mutations, Vec::new()))
    }

    /// Edits are timestamped with the injected clock at the time the editor
    /// is created.
    pub fn edit_attributes(&self) -> AttributeEditor<'_> {
        AttributeEditor::new(self.clock.now_ms(), move |mutations| {
            self.enqueue_update(Vec::new(), mutations)
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle hooks
    // -----------------------------------------------------------------------

    /// App came to the foreground. Resolves when the last successful resolve
    /// is older than the configured interval, or never happened.
    pub fn on_foreground(&self, now_ms: i64) -> Result<()> {
        let interval = i64::try_from(self.config.foreground_resolve_interval_ms).unwrap_or(i64::MAX);
        let last = self.store.read(|s| s.identity.last_resolved_at());
        let stale = last.map_or(true, |at| now_ms >= at.saturating_add(interval));
        if stale {
            self.resolve()
        } else {
            Ok(())
        }
    }

    /// The device channel now exists, so queued work can reach the server.
    pub fn on_channel_created(&self) -> Result<()> {
        if self.contacts_enabled() {
            self.resolve()
        } else {
            self.scheduler.schedule_run(ScheduleRequest::Immediate);
            Ok(())
        }
    }

    /// Toggle the contacts feature. Disabling it queues a reset when the
    /// device still holds a named contact or anonymous data.
    pub fn set_contacts_enabled(&self, enabled: bool) -> Result<()> {
        let was = self.contacts_enabled.swap(enabled, Ordering::SeqCst);
        if enabled {
            if !was {
                self.scheduler.schedule_run(ScheduleRequest::Immediate);
            }
            return Ok(());
        }

        let needs_reset = self.store.read(|s| {
            s.identity
                .identity()
                .is_some_and(|i| !i.is_anonymous || s.identity.has_anon_data())
        });
        if needs_reset {
            tracing::debug!("contacts disabled, resetting contact");
            self.enqueue([ContactOperation::Reset])?;
        }
        Ok(())
    }

    pub fn set_tags_and_attributes_enabled(&self, enabled: bool) {
        self.tags_and_attributes_enabled
            .store(enabled, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Execute one engine run and tell the scheduler what comes next: an
    /// immediate run while work remains, or a backoff after a transient
    /// failure. After `max_attempts` consecutive retries the head is dropped.
    pub async fn perform_run(&self) -> RunOutcome {
        let outcome = self.engine.run().await;
        match outcome.status {
            RunStatus::Completed => {
                self.retry_attempt.store(0, Ordering::SeqCst);
                if outcome.has_more {
                    self.scheduler.schedule_run(ScheduleRequest::Immediate);
                }
            }
            RunStatus::RetryScheduled => {
                let attempt = self.retry_attempt.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < self.config.dispatch.max_attempts {
                    self.scheduler
                        .schedule_run(ScheduleRequest::Backoff { attempt });
                } else if self.engine.give_up(attempt, &outcome).is_ok() {
                    self.retry_attempt.store(0, Ordering::SeqCst);
                    if self.engine.has_pending() {
                        self.scheduler.schedule_run(ScheduleRequest::Immediate);
                    }
                } else {
                    self.scheduler
                        .schedule_run(ScheduleRequest::Backoff { attempt });
                }
            }
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The named user id of the last queued identify, else the stored one.
    pub fn named_user_id(&self) -> Option<String> {
        self.store.read(|s| {
            let queued = s.log.operations().iter().rev().find_map(|op| match op {
                ContactOperation::Identify { external_id } => Some(external_id.clone()),
                _ => None,
            });
            queued.or_else(|| {
                s.identity
                    .identity()
                    .and_then(|i| i.named_user_id.clone())
            })
        })
    }

    /// Collapsed tag group edits still waiting in the log.
    pub fn pending_tag_updates(&self) -> Vec<TagGroupsMutation> {
        let queued: Vec<TagGroupsMutation> = self.store.read(|s| {
            s.log
                .operations()
                .iter()
                .filter_map(|op| match op {
                    ContactOperation::Update {
                        tag_group_mutations,
                        ..
                    } => Some(tag_group_mutations.iter().cloned()),
                    _ => None,
                })
                .flatten()
                .collect()
        });
        TagGroupsMutation::collapse(&queued)
    }

    /// Collapsed attribute edits still waiting in the log.
    pub fn pending_attribute_updates(&self) -> Vec<AttributeMutation> {
        let queued: Vec<AttributeMutation> = self.store.read(|s| {
            s.log
                .operations()
                .iter()
                .filter_map(|op| match op {
                    ContactOperation::Update {
                        attribute_mutations,
                        ..
                    } => Some(attribute_mutations.iter().cloned()),
                    _ => None,
                })
                .flatten()
                .collect()
        });
        AttributeMutation::collapse(&queued)
    }

    /// Contact id to attach to channel registration.
    pub fn last_contact_id(&self) -> Option<String> {
        self.store
            .read(|s| s.identity.identity().map(|i| i.contact_id.clone()))
    }

    pub fn identity(&self) -> Option<ContactIdentity> {
        self.store.read(|s| s.identity.identity().cloned())
    }

    pub fn events(&self) -> &ContactEvents {
        &self.events
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// The built-in dispatcher, when no host scheduler was supplied.
    pub fn dispatcher(&self) -> Option<&ContactDispatcher> {
        self.dispatcher.as_ref()
    }

    pub fn contacts_enabled(&self) -> bool {
        self.contacts_enabled.load(Ordering::SeqCst)
    }

    pub fn tags_and_attributes_enabled(&self) -> bool {
        self.tags_and_attributes_enabled.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn enqueue(&self, operations: impl IntoIterator<Item = ContactOperation>) -> Result<()> {
        self.store.with_lock(|txn| {
            let log = txn.log_mut();
            for operation in operations {
                log.append(operation);
            }
        })?;
        self.scheduler.schedule_run(ScheduleRequest::Immediate);
        Ok(())
    }

    /// Edits resolve first so a device without a known contact still gets
    /// one before the update runs.
    fn enqueue_update(
        &self,
        tag_group_mutations: Vec<TagGroupsMutation>,
        attribute_mutations: Vec<AttributeMutation>,
    ) -> Result<()> {
        if !self.contacts_enabled() || !self.tags_and_attributes_enabled() {
            tracing::debug!("contacts or tags and attributes disabled, ignoring edit");
            return Ok(());
        }
        self.enqueue([
            ContactOperation::Resolve,
            ContactOperation::update(tag_group_mutations, attribute_mutations),
        ])
    }
}

impl Drop for Contact {
    fn drop(&mut self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispose();
        }
    }
}
