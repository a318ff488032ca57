//! Contact facade: validation, durability, queries, gating and hooks.

use std::sync::Arc;
use std::time::Duration;

use contact_queue::mutation::{AttributeMutation, TagGroupsMutation};
use contact_queue::queue::ContactOperation;
use contact_queue::storage::contact_store::{
    LAST_CONTACT_IDENTITY_KEY, LAST_RESOLVED_AT_KEY, OPERATIONS_KEY,
};
use contact_queue::storage::MemoryStore;
use contact_queue::sync::types::{ContactApiError, RunStatus};
use contact_queue::sync::{RunScheduler, ScheduleRequest};
use contact_queue::config::DispatchConfig;
use contact_queue::types::ContactIdentity;
use contact_queue::{Contact, ContactConfig, ContactError, ContactOptions};
use serde_json::json;

use super::support::*;
use crate::mock::*;

fn queued(s: &Setup) -> Vec<ContactOperation> {
    s.contact.engine().store().read(|st| st.log.snapshot())
}

fn named_backend() -> Arc<MemoryStore> {
    let backend = Arc::new(MemoryStore::new());
    backend.insert_raw(
        LAST_CONTACT_IDENTITY_KEY,
        &json!({"contact_id": "c0", "is_anonymous": false, "named_user_id": "u0"}).to_string(),
    );
    backend
}

// ============================================================================
// Mutations
// ============================================================================

#[test]
fn identify_validates_length() {
    let s = setup();
    assert!(matches!(
        s.contact.identify(""),
        Err(ContactError::InvalidOperation(_))
    ));
    assert!(s.contact.identify(&"x".repeat(129)).is_err());
    assert!(s.contact.identify(&"é".repeat(128)).is_ok());
    assert_eq!(queued(&s).len(), 1);
}

#[test]
fn mutations_are_durable_and_schedule_a_run() {
    let s = setup();
    s.contact.identify("u1").unwrap();

    let raw = s.backend.get_raw(OPERATIONS_KEY).unwrap();
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&raw).unwrap(),
        json!([{"type": "IDENTIFY", "payload": {"identifier": "u1"}}])
    );
    assert_eq!(s.scheduler.requests(), vec![ScheduleRequest::Immediate]);
}

#[test]
fn failed_persist_surfaces_and_queues_nothing() {
    let s = setup();
    s.backend.set_write_failure(Some("disk full"));
    assert!(matches!(s.contact.reset(), Err(ContactError::Storage(_))));
    assert!(queued(&s).is_empty());
    assert!(s.scheduler.requests().is_empty());
}

#[test]
fn edits_queue_resolve_then_update() {
    let s = setup();
    s.contact
        .edit_tag_groups()
        .add_tag("g", "t")
        .apply()
        .unwrap();

    assert_eq!(
        queued(&s),
        vec![
            ContactOperation::Resolve,
            ContactOperation::update(
                vec![TagGroupsMutation::add_tags("g", vec!["t".to_string()])],
                vec![],
            ),
        ]
    );
}

#[test]
fn editor_with_no_edits_queues_nothing() {
    let s = setup();
    s.contact.edit_attributes().apply().unwrap();
    assert!(queued(&s).is_empty());
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn named_user_id_prefers_last_queued_identify() {
    let s = setup_with(named_backend());
    assert_eq!(s.contact.named_user_id().as_deref(), Some("u0"));

    s.contact.identify("u1").unwrap();
    s.contact.reset().unwrap();
    s.contact.identify("u2").unwrap();
    assert_eq!(s.contact.named_user_id().as_deref(), Some("u2"));
}

#[test]
fn pending_updates_are_collapsed_across_queued_edits() {
    let s = setup();
    s.contact
        .edit_tag_groups()
        .add_tags("g", ["a", "b"])
        .apply()
        .unwrap();
    s.contact
        .edit_tag_groups()
        .remove_tag("g", "a")
        .apply()
        .unwrap();
    s.contact
        .edit_attributes()
        .set_attribute("k", 1)
        .apply()
        .unwrap();
    s.contact
        .edit_attributes()
        .set_attribute("k", 2)
        .apply()
        .unwrap();

    assert_eq!(
        s.contact.pending_tag_updates(),
        TagGroupsMutation::collapse(&[
            TagGroupsMutation::add_tags("g", vec!["b".to_string()]),
            TagGroupsMutation::remove_tags("g", vec!["a".to_string()]),
        ])
    );
    assert_eq!(
        s.contact.pending_attribute_updates(),
        vec![AttributeMutation::set("k", json!(2), NOW_MS)]
    );
}

#[test]
fn last_contact_id_reflects_stored_identity() {
    assert_eq!(setup().contact.last_contact_id(), None);
    assert_eq!(
        setup_with(named_backend()).contact.last_contact_id().as_deref(),
        Some("c0")
    );
}

// ============================================================================
// Feature gating
// ============================================================================

#[test]
fn disabling_contacts_resets_a_named_contact() {
    let s = setup_with(named_backend());
    s.contact.set_contacts_enabled(false).unwrap();
    assert_eq!(queued(&s), vec![ContactOperation::Reset]);

    s.contact.identify("u1").unwrap();
    s.contact.reset().unwrap();
    s.contact.resolve().unwrap();
    s.contact
        .edit_attributes()
        .set_attribute("k", "v")
        .apply()
        .unwrap();
    assert_eq!(queued(&s), vec![ContactOperation::Reset]);
}

#[test]
fn disabling_contacts_without_identity_queues_nothing() {
    let s = setup();
    s.contact.set_contacts_enabled(false).unwrap();
    assert!(queued(&s).is_empty());
}

#[test]
fn reenabling_contacts_schedules_a_run() {
    let s = setup();
    s.contact.set_contacts_enabled(false).unwrap();
    s.contact.set_contacts_enabled(true).unwrap();
    assert_eq!(s.scheduler.requests(), vec![ScheduleRequest::Immediate]);
}

#[test]
fn disabling_tags_and_attributes_only_blocks_edits() {
    let s = setup();
    s.contact.set_tags_and_attributes_enabled(false);
    s.contact
        .edit_tag_groups()
        .add_tag("g", "t")
        .apply()
        .unwrap();
    assert!(queued(&s).is_empty());

    s.contact.identify("u1").unwrap();
    assert_eq!(queued(&s), vec![ContactOperation::identify("u1")]);
}

// ============================================================================
// Lifecycle hooks
// ============================================================================

#[test]
fn foreground_resolves_when_never_resolved() {
    let s = setup();
    s.contact.on_foreground(NOW_MS).unwrap();
    assert_eq!(queued(&s), vec![ContactOperation::Resolve]);
}

#[test]
fn foreground_resolve_is_throttled() {
    let backend = Arc::new(MemoryStore::new());
    backend.insert_raw(LAST_RESOLVED_AT_KEY, &NOW_MS.to_string());
    let s = setup_with(backend);
    let day = ContactConfig::default().foreground_resolve_interval_ms as i64;

    s.contact.on_foreground(NOW_MS + day - 1).unwrap();
    assert!(queued(&s).is_empty());

    s.contact.on_foreground(NOW_MS + day).unwrap();
    assert_eq!(queued(&s), vec![ContactOperation::Resolve]);
}

#[tokio::test]
async fn explicit_resolve_runs_even_when_confirmed() {
    let s = setup();
    s.contact.resolve().unwrap();
    drain(&s.contact).await;
    s.contact.resolve().unwrap();
    drain(&s.contact).await;

    let resolves = s
        .api
        .calls()
        .iter()
        .filter(|c| matches!(c, ApiCall::Resolve { .. }))
        .count();
    assert_eq!(resolves, 2);
}

#[test]
fn channel_created_resolves_when_enabled() {
    let s = setup();
    s.contact.on_channel_created().unwrap();
    assert_eq!(queued(&s), vec![ContactOperation::Resolve]);

    let disabled = setup();
    disabled.contact.set_contacts_enabled(false).unwrap();
    disabled.contact.on_channel_created().unwrap();
    assert!(queued(&disabled).is_empty());
}

// ============================================================================
// Host-driven runs
// ============================================================================

#[tokio::test]
async fn perform_run_requests_the_next_run_or_a_backoff() {
    let s = setup();
    s.contact.identify("u1").unwrap();
    s.contact.reset().unwrap();
    let before = s.scheduler.requests().len();

    let outcome = s.contact.perform_run().await;
    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.has_more);

    s.api
        .on_reset(|_| Err(ContactApiError::Server { status: 503 }));
    assert!(s.contact.perform_run().await.is_retry());
    assert!(s.contact.perform_run().await.is_retry());

    s.api.on_reset(|_| Ok(ContactIdentity::anonymous("reset-2")));
    let outcome = s.contact.perform_run().await;
    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(!outcome.has_more);

    assert_eq!(
        s.scheduler.requests().split_off(before),
        vec![
            ScheduleRequest::Immediate,
            ScheduleRequest::Backoff { attempt: 1 },
            ScheduleRequest::Backoff { attempt: 2 },
        ]
    );
}

#[tokio::test]
async fn perform_run_gives_up_after_max_attempts() {
    let api = Arc::new(MockContactApi::new());
    api.on_reset(|_| Err(ContactApiError::Server { status: 503 }));
    let scheduler = Arc::new(RecordingScheduler::default());
    let mut options = ContactOptions::new(
        Arc::new(MemoryStore::new()),
        api.clone(),
        channel(Some(CHANNEL_ID)),
    );
    options.scheduler = Some(scheduler.clone() as Arc<dyn RunScheduler>);
    options.clock = Some(fixed_clock(NOW_MS));
    options.config.dispatch = DispatchConfig {
        max_attempts: 2,
        ..DispatchConfig::default()
    };
    let contact = Contact::new(options).unwrap();

    contact.identify("u1").unwrap();
    contact.reset().unwrap();
    contact.identify("u2").unwrap();
    contact.perform_run().await;
    let before = scheduler.requests().len();

    assert!(contact.perform_run().await.is_retry());
    assert!(contact.perform_run().await.is_retry());

    // The reset is gone and the identify behind it is next.
    assert_eq!(
        contact.engine().store().read(|st| st.log.snapshot()),
        vec![ContactOperation::identify("u2")]
    );
    assert_eq!(
        scheduler.requests().split_off(before),
        vec![
            ScheduleRequest::Backoff { attempt: 1 },
            ScheduleRequest::Immediate,
        ]
    );
}

// ============================================================================
// Built-in dispatcher
// ============================================================================

#[tokio::test(start_paused = true)]
async fn default_dispatcher_runs_queued_work() {
    let api = Arc::new(MockContactApi::new());
    let mut options = ContactOptions::new(
        Arc::new(MemoryStore::new()),
        api.clone(),
        channel(Some(CHANNEL_ID)),
    );
    options.clock = Some(fixed_clock(NOW_MS));
    let contact = Contact::new(options).unwrap();
    assert!(contact.dispatcher().is_some());

    contact.identify("u1").unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(api.calls().len(), 1);
    assert_eq!(
        contact.identity(),
        Some(contact_queue::types::ContactIdentity::named("contact-u1", "u1"))
    );
}
