//! Forward [`EventManager`] events to GENA subscribers.
//!
//! The bridge listens on an event manager; every event with scalar payload
//! entries becomes a [`PropertySet`] that is sent to each live subscriber on
//! its own task. Delivery failures are logged and never reach the emitter.
//!
//! Without an allow-list every scalar entry is forwarded, including internal
//! fields such as paths or process ids. Services should restrict the bridge
//! to their evented state variables with [`EventBridge::evented_variables`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dms_core::{Error, Event, EventManager, Result, Unsubscribe};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use url::Url;

use crate::notify::Notifier;
use crate::propset::PropertySet;
use crate::subscription::SubscriptionRegistry;

/// Connects an event manager to the subscriber registry.
#[derive(Debug, Clone)]
pub struct EventBridge {
    registry: Arc<SubscriptionRegistry>,
    notifier: Notifier,
    namespace: String,
    /// Payload names forwarded to subscribers; `None` forwards every scalar.
    evented: Option<Arc<HashSet<String>>>,
    runtime: Handle,
}

impl EventBridge {
    /// Create a bridge bound to the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when called outside a runtime.
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        notifier: Notifier,
        namespace: impl Into<String>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::Internal("event bridge requires a Tokio runtime".into()))?;
        Ok(Self {
            registry,
            notifier,
            namespace: namespace.into(),
            evented: None,
            runtime,
        })
    }

    /// Forward only payload entries named in `names`.
    ///
    /// Events left with no allowed entries are not bridged.
    pub fn evented_variables(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.evented = Some(Arc::new(names.into_iter().map(Into::into).collect()));
        self
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Register the bridge as listener `name` on `events`.
    pub fn attach(&self, events: &EventManager, name: &str) -> Result<Unsubscribe> {
        let bridge = self.clone();
        events.listen(name, move |event: Event| {
            match bridge.property_set(&event) {
                Some(set) => {
                    let sent = bridge.publish(&set);
                    tracing::trace!(kind = %event.kind, subscribers = sent.len(), "event bridged");
                }
                None => tracing::trace!(kind = %event.kind, "event has no evented payload; not bridged"),
            }
        })
    }

    fn property_set(&self, event: &Event) -> Option<PropertySet> {
        let mut set = property_set_for(event, &self.namespace)?;
        if let Some(allowed) = &self.evented {
            set.properties
                .retain(|p| allowed.contains(p.variable.name.as_str()));
        }
        (!set.is_empty()).then_some(set)
    }

    /// Send `set` to every live subscriber, pruning lapsed ones first.
    ///
    /// Each delivery runs on its own task; the returned handles resolve to
    /// the accepting callback URL. Errors are also logged.
    pub fn publish(&self, set: &PropertySet) -> Vec<JoinHandle<Result<Url>>> {
        let now = Instant::now();
        self.registry.expire(now);

        let mut handles = Vec::new();
        for subscriber in self.registry.live(now) {
            let seq = match self.registry.next_seq(&subscriber.sid) {
                Ok(seq) => seq,
                // Unsubscribed between the snapshot and now.
                Err(_) => continue,
            };
            let notifier = self.notifier.clone();
            let set = set.clone();
            handles.push(self.runtime.spawn(async move {
                let result = notifier.notify(&subscriber, seq, &set).await;
                if let Err(e) = &result {
                    tracing::warn!(sid = %subscriber.sid, seq, error = %e, "notify failed");
                }
                result
            }));
        }
        handles
    }

    /// Send the initial event (all evented variables) to a new subscriber.
    pub fn publish_initial(&self, sid: &str, set: &PropertySet) -> Result<JoinHandle<Result<Url>>> {
        let subscriber = self
            .registry
            .get(sid)
            .ok_or_else(|| Error::not_found("subscription", sid))?;
        let seq = self.registry.next_seq(sid)?;
        let notifier = self.notifier.clone();
        let set = set.clone();
        Ok(self.runtime.spawn(async move {
            let result = notifier.notify(&subscriber, seq, &set).await;
            if let Err(e) = &result {
                tracing::warn!(sid = %subscriber.sid, error = %e, "initial notify failed");
            }
            result
        }))
    }
}

/// Scalar payload entries of `event` as state variables.
///
/// Strings are used verbatim, numbers and booleans in their JSON form;
/// nulls, arrays and objects are skipped. Returns `None` when nothing is
/// left.
pub fn property_set_for(event: &Event, namespace: &str) -> Option<PropertySet> {
    let mut set = PropertySet::new(namespace);
    for (name, value) in &event.payload {
        match value {
            Value::String(s) => set.push(name.as_str(), s.as_str()),
            Value::Number(n) => set.push(name.as_str(), n.to_string()),
            Value::Bool(b) => set.push(name.as_str(), b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => {}
        }
    }
    (!set.is_empty()).then_some(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dms_core::config::DEFAULT_EVENT_NAMESPACE;

    #[test]
    fn scalar_payload_becomes_variables() {
        let event = Event::new("content.updated")
            .with("SystemUpdateID", 12)
            .with("ContainerUpdateIDs", "0,12")
            .with("Busy", false)
            .with("Ignored", serde_json::json!({"nested": true}));
        let set = property_set_for(&event, DEFAULT_EVENT_NAMESPACE).unwrap();
        let mut vars: Vec<_> = set.variables().collect();
        vars.sort();
        assert_eq!(
            vars,
            [
                ("Busy", "false"),
                ("ContainerUpdateIDs", "0,12"),
                ("SystemUpdateID", "12"),
            ]
        );
    }

    #[test]
    fn events_without_scalars_are_skipped() {
        let event = Event::new("tick").with("list", serde_json::json!([1, 2]));
        assert!(property_set_for(&event, DEFAULT_EVENT_NAMESPACE).is_none());
        assert!(property_set_for(&Event::new("tick"), DEFAULT_EVENT_NAMESPACE).is_none());
    }

    #[test]
    fn bridge_needs_a_runtime() {
        let registry = Arc::new(SubscriptionRegistry::default());
        let notifier = Notifier::new(std::time::Duration::from_secs(1)).unwrap();
        assert!(matches!(
            EventBridge::new(registry, notifier, DEFAULT_EVENT_NAMESPACE),
            Err(Error::Internal(_))
        ));
    }

    #[tokio::test]
    async fn allow_list_keeps_internal_fields_private() {
        let bridge = EventBridge::new(
            Arc::new(SubscriptionRegistry::default()),
            Notifier::new(std::time::Duration::from_secs(1)).unwrap(),
            DEFAULT_EVENT_NAMESPACE,
        )
        .unwrap()
        .evented_variables(["SystemUpdateID"]);

        let event = Event::new("transcode.started")
            .with("path", "/srv/private/movie.mkv")
            .with("profile", "web")
            .with("pid", 4242)
            .with("SystemUpdateID", 9);
        let set = bridge.property_set(&event).unwrap();
        assert_eq!(set.variables().collect::<Vec<_>>(), [("SystemUpdateID", "9")]);

        let internal_only = Event::new("transcode.started")
            .with("path", "/srv/private/movie.mkv")
            .with("pid", 4242);
        assert!(bridge.property_set(&internal_only).is_none());
    }

    #[tokio::test]
    async fn bridge_without_allow_list_forwards_every_scalar() {
        let bridge = EventBridge::new(
            Arc::new(SubscriptionRegistry::default()),
            Notifier::new(std::time::Duration::from_secs(1)).unwrap(),
            DEFAULT_EVENT_NAMESPACE,
        )
        .unwrap();
        let event = Event::new("content.updated").with("A", "1").with("B", 2);
        assert_eq!(bridge.property_set(&event).unwrap().properties.len(), 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_sends_nothing() {
        let bridge = EventBridge::new(
            Arc::new(SubscriptionRegistry::default()),
            Notifier::new(std::time::Duration::from_secs(1)).unwrap(),
            DEFAULT_EVENT_NAMESPACE,
        )
        .unwrap();
        assert!(bridge.publish(&PropertySet::default().with("A", "1")).is_empty());
    }
}
