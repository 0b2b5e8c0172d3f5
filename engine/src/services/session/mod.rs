//! Session persistence and client resolution

pub mod broker;
pub mod store;

pub use broker::{SessionBroker, SessionKind};
pub use store::{load_json, save_json, MemorySessionStore, SessionStore, StoreError};
