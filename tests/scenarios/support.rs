#![allow(dead_code)]

use std::sync::Arc;

use contact_queue::config::DispatchConfig;
use contact_queue::storage::MemoryStore;
use contact_queue::sync::{ContactDispatcher, DispatchReport, RunScheduler};
use contact_queue::{Contact, ContactOptions};

use crate::mock::*;

pub struct Setup {
    pub contact: Contact,
    pub api: Arc<MockContactApi>,
    pub backend: Arc<MemoryStore>,
    pub scheduler: Arc<RecordingScheduler>,
}

/// Contact over `backend` whose runs are only recorded; tests drain the log
/// explicitly with [`drain`].
pub fn setup_with(backend: Arc<MemoryStore>) -> Setup {
    let api = Arc::new(MockContactApi::new());
    let scheduler = Arc::new(RecordingScheduler::default());
    let mut options = ContactOptions::new(backend.clone(), api.clone(), channel(Some(CHANNEL_ID)));
    options.scheduler = Some(scheduler.clone() as Arc<dyn RunScheduler>);
    options.clock = Some(fixed_clock(NOW_MS));
    let contact = Contact::new(options).unwrap();
    Setup {
        contact,
        api,
        backend,
        scheduler,
    }
}

pub fn setup() -> Setup {
    setup_with(Arc::new(MemoryStore::new()))
}

pub async fn drain(contact: &Contact) -> DispatchReport {
    ContactDispatcher::new(contact.engine().clone(), DispatchConfig::default())
        .dispatch()
        .await
}
