//! Operation log persistence through `ContactStore`.

use std::sync::Arc;

use contact_queue::mutation::{AttributeMutation, TagGroupsMutation};
use contact_queue::queue::{ContactOperation, OperationLog};
use contact_queue::storage::contact_store::OPERATIONS_KEY;
use contact_queue::storage::{ContactStore, MemoryStore};
use serde_json::json;

fn mixed_operations() -> Vec<ContactOperation> {
    vec![
        ContactOperation::Resolve,
        ContactOperation::update(
            vec![TagGroupsMutation::add_tags("g", vec!["t1".to_string()])],
            vec![],
        ),
        ContactOperation::identify("u3"),
        ContactOperation::update(
            vec![TagGroupsMutation::set_tags("h", Vec::<String>::new())],
            vec![
                AttributeMutation::set("k", json!({"nested": [1, 2]}), 42),
                AttributeMutation::remove("old", 43),
            ],
        ),
        ContactOperation::Reset,
    ]
}

#[test]
fn five_mixed_operations_survive_a_reload() {
    let backend = Arc::new(MemoryStore::new());
    let store = ContactStore::load(backend.clone()).unwrap();
    for op in mixed_operations() {
        store.with_lock(|txn| txn.log_mut().append(op)).unwrap();
    }
    drop(store);

    let reloaded = ContactStore::load(backend).unwrap();
    assert_eq!(reloaded.read(|s| s.log.snapshot()), mixed_operations());
}

#[test]
fn json_round_trip_preserves_order() {
    let log = OperationLog::from_operations(mixed_operations());
    let raw = log.to_json().unwrap();
    assert_eq!(OperationLog::from_json(&raw), log);
}

#[test]
fn corrupt_entry_drops_only_itself() {
    let raw = json!([
        {"type": "RESOLVE"},
        {"type": "IDENTIFY", "payload": {}},
        {"type": "RESET"},
        "garbage",
    ])
    .to_string();

    let log = OperationLog::from_json(&raw);
    assert_eq!(
        log.operations(),
        &[ContactOperation::Resolve, ContactOperation::Reset]
    );
}

#[test]
fn corrupt_log_loads_empty() {
    let backend = Arc::new(MemoryStore::new());
    backend.insert_raw(OPERATIONS_KEY, "{not an array");
    let store = ContactStore::load(backend).unwrap();
    assert!(store.read(|s| s.log.is_empty()));
}
