//! # dms-upnp
//!
//! The eventing half of UPnP: GENA subscriptions and property-change
//! notifications.
//!
//! - [`PropertySet`] -- the XML NOTIFY body, written and parsed with
//!   `quick-xml`.
//! - [`parse_callback_urls`], [`parse_timeout`] -- SUBSCRIBE header parsing.
//! - [`SubscriptionRegistry`] -- SIDs, SEQ counters and timeouts.
//! - [`Notifier`] -- sends NOTIFY requests over HTTP.
//! - [`EventBridge`] -- forwards [`dms_core::EventManager`] events to every
//!   live subscriber.

pub mod bridge;
pub mod callback;
pub mod notify;
pub mod propset;
pub mod subscription;

pub use bridge::{property_set_for, EventBridge};
pub use callback::{format_timeout, parse_callback_urls, parse_sid, parse_timeout, TimeoutRequest};
pub use notify::Notifier;
pub use propset::{Property, PropertySet, Variable};
pub use subscription::{Subscriber, SubscriptionRegistry, TimeoutPolicy};
