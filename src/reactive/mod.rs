pub mod event_emitter;
pub mod events;

pub use event_emitter::{EventEmitter, ListenerFn, ListenerId};
pub use events::ContactEvents;
