//! dms-core: shared error type, configuration, and the event manager.
//!
//! Every other dms-* crate depends on this one. It holds the unified
//! [`Error`] taxonomy, the TOML-backed [`config::Config`], and the
//! fire-and-forget [`events::EventManager`] used to notify subscribers of
//! state changes.

pub mod config;
pub mod error;
pub mod events;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use events::{Event, EventManager, SharedEventManager, Unsubscribe};
