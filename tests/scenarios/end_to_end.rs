//! Full flows through `Contact`: public calls, policy collapsing, engine runs
//! and listener notifications.

use std::sync::Arc;

use contact_queue::mutation::{AttributeMutation, TagGroupsMutation};
use contact_queue::types::{ContactChange, ContactConflict, ContactIdentity};
use parking_lot::Mutex;
use serde_json::json;

use super::support::*;
use crate::mock::*;

#[tokio::test]
async fn tag_edit_identify_attribute_edit_run_as_three_calls() {
    let s = setup();
    s.contact.resolve().unwrap();
    drain(&s.contact).await;
    assert_eq!(
        s.contact.identity(),
        Some(ContactIdentity::anonymous("anon-1"))
    );
    s.api.clear_calls();

    let conflicts: Arc<Mutex<Vec<ContactConflict>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = conflicts.clone();
    s.contact
        .events()
        .conflict
        .on(move |c| sink.lock().push(c.clone()));

    s.contact
        .edit_tag_groups()
        .add_tag("g", "t1")
        .apply()
        .unwrap();
    s.contact.identify("u3").unwrap();
    s.contact
        .edit_attributes()
        .set_attribute("k", "v")
        .apply()
        .unwrap();

    let report = drain(&s.contact).await;

    assert_eq!(
        s.api.calls(),
        vec![
            ApiCall::Update {
                contact_id: "anon-1".to_string(),
                tags: vec![TagGroupsMutation::add_tags("g", vec!["t1".to_string()])],
                attributes: vec![],
            },
            ApiCall::Identify {
                named_user_id: "u3".to_string(),
                channel_id: CHANNEL_ID.to_string(),
                contact_id: Some("anon-1".to_string()),
            },
            ApiCall::Update {
                contact_id: "contact-u3".to_string(),
                tags: vec![],
                attributes: vec![AttributeMutation::set("k", json!("v"), NOW_MS)],
            },
        ]
    );
    assert_eq!(report.executed, 3);
    assert_eq!(report.dropped, 0);

    // The anonymous tag edit diverges from the named contact.
    let conflicts = conflicts.lock();
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].anonymous_data.tag_groups["g"].contains("t1"));
    assert_eq!(conflicts[0].named_user_id.as_deref(), Some("u3"));

    assert_eq!(
        s.contact.identity(),
        Some(ContactIdentity::named("contact-u3", "u3"))
    );
    assert_eq!(s.contact.named_user_id().as_deref(), Some("u3"));
}

#[tokio::test]
async fn first_edit_on_a_fresh_device_resolves_before_updating() {
    let s = setup();
    s.contact
        .edit_attributes()
        .set_attribute("k", 1)
        .apply()
        .unwrap();

    drain(&s.contact).await;

    let calls = s.api.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], ApiCall::Resolve { .. }));
    assert!(matches!(
        &calls[1],
        ApiCall::Update { contact_id, .. } if contact_id == "anon-1"
    ));
}

#[tokio::test]
async fn repeated_identify_collapses_to_the_last_once_named() {
    let s = setup();
    s.contact.identify("u1").unwrap();
    drain(&s.contact).await;
    s.api.clear_calls();

    s.contact.identify("u2").unwrap();
    s.contact.identify("u3").unwrap();
    s.contact.identify("u4").unwrap();
    drain(&s.contact).await;

    assert_eq!(
        s.api.calls(),
        vec![ApiCall::Identify {
            named_user_id: "u4".to_string(),
            channel_id: CHANNEL_ID.to_string(),
            contact_id: None,
        }]
    );
}

#[tokio::test]
async fn identify_same_user_again_makes_no_call() {
    let s = setup();
    s.contact.identify("u1").unwrap();
    drain(&s.contact).await;
    s.api.clear_calls();

    s.contact.identify("u1").unwrap();
    let report = drain(&s.contact).await;

    assert!(s.api.calls().is_empty());
    assert_eq!(report.executed, 0);
    assert!(!s.contact.engine().has_pending());
}

#[tokio::test]
async fn reset_after_identify_returns_to_anonymous_and_reports_change() {
    let s = setup();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    s.contact
        .events()
        .contact_changed
        .on(move |c: &ContactChange| sink.lock().push(c.clone()));

    s.contact.identify("u1").unwrap();
    s.contact.reset().unwrap();
    drain(&s.contact).await;

    assert_eq!(
        *changes.lock(),
        vec![
            ContactChange {
                contact_id: "contact-u1".to_string(),
                named_user_id: Some("u1".to_string()),
            },
            ContactChange {
                contact_id: "reset-1".to_string(),
                named_user_id: None,
            },
        ]
    );
    assert_eq!(s.contact.last_contact_id().as_deref(), Some("reset-1"));
    assert_eq!(s.contact.named_user_id(), None);
}

#[tokio::test]
async fn queued_work_survives_a_restart() {
    let s = setup();
    s.contact.identify("u1").unwrap();
    s.contact
        .edit_tag_groups()
        .set_tags("g", ["a", "b"])
        .apply()
        .unwrap();
    let backend = s.backend.clone();
    drop(s);

    let restarted = setup_with(backend);
    assert_eq!(
        restarted.scheduler.requests(),
        vec![contact_queue::sync::ScheduleRequest::Immediate]
    );
    assert_eq!(restarted.contact.named_user_id().as_deref(), Some("u1"));

    drain(&restarted.contact).await;
    let calls = restarted.api.calls();
    assert!(matches!(&calls[0], ApiCall::Identify { named_user_id, .. } if named_user_id == "u1"));
    assert!(matches!(&calls[1], ApiCall::Update { .. }));
    assert_eq!(calls.len(), 2);
}
