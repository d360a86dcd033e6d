//! Named-listener event manager.
//!
//! [`EventManager`] keeps a table of listeners keyed by a unique name and
//! fans every emitted [`Event`] out to all of them. Delivery is
//! fire-and-forget: each listener runs on its own supervised task with its
//! own copy of the event, so a listener that panics or blocks never affects
//! the emitter or the other listeners.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Callback invoked with a private copy of each emitted event.
pub type Listener = Arc<dyn Fn(Event) + Send + Sync>;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A structured notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind, e.g. `"library.updated"`. Lower-cased on emission.
    pub kind: String,
    /// Arbitrary payload. Each listener receives its own copy.
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Error description, populated for error kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    /// Create an event with an empty payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload: Map::new(),
            error: None,
        }
    }

    /// Add a payload entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Attach an error description.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Whether the kind names an error category: `error` itself, or a kind
    /// ending in `.error`, `_error` or `-error` (case-insensitive).
    pub fn is_error(&self) -> bool {
        let kind = self.kind.to_ascii_lowercase();
        kind == "error"
            || kind.ends_with(".error")
            || kind.ends_with("_error")
            || kind.ends_with("-error")
    }

    fn validate(&self) -> Result<()> {
        if self.kind.trim().is_empty() {
            return Err(Error::EventValidation("kind is empty".into()));
        }
        if self.kind.chars().any(char::is_whitespace) {
            return Err(Error::EventValidation(format!(
                "kind {:?} contains whitespace",
                self.kind
            )));
        }
        if self.payload.keys().any(|k| k.is_empty()) {
            return Err(Error::EventValidation("payload has an empty key".into()));
        }
        Ok(())
    }

    fn sanitize(mut self) -> Self {
        self.kind = self.kind.to_lowercase();
        if self.error.is_none() && self.is_error() {
            self.error = Some(format!("{} occurred", self.kind));
        }
        self
    }
}

// ---------------------------------------------------------------------------
// EventManager
// ---------------------------------------------------------------------------

struct Registration {
    id: u64,
    listener: Listener,
}

struct Inner {
    subscriptions: Mutex<HashMap<String, Registration>>,
    next_id: AtomicU64,
}

/// Registry of named listeners with fire-and-forget broadcast.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct EventManager {
    inner: Arc<Inner>,
}

impl EventManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscriptions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `listener` under `name`.
    ///
    /// Fails with [`Error::DuplicateSubscription`] if the name is taken. The
    /// returned handle removes exactly this registration; dropping it
    /// without calling [`Unsubscribe::unsubscribe`] leaves the listener
    /// registered.
    pub fn listen<F>(&self, name: impl Into<String>, listener: F) -> Result<Unsubscribe>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let name = name.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subs = self.inner.subscriptions.lock();
        if subs.contains_key(&name) {
            return Err(Error::DuplicateSubscription(name));
        }
        subs.insert(
            name.clone(),
            Registration {
                id,
                listener: Arc::new(listener),
            },
        );
        drop(subs);

        tracing::debug!(listener = %name, "listener registered");

        Ok(Unsubscribe {
            inner: Arc::downgrade(&self.inner),
            name,
            id,
            done: AtomicBool::new(false),
        })
    }

    /// Validate, normalize, and dispatch `event` to every registered listener.
    ///
    /// Returns as soon as delivery is scheduled. Must be called from within
    /// a Tokio runtime; outside one the call fails before any dispatch.
    ///
    /// Listeners run without a timeout, one call per Tokio blocking-pool
    /// thread (512 by default). A listener that never returns keeps its
    /// thread, and once enough of them pile up the pool is exhausted and
    /// later deliveries queue behind them. Listeners must not block
    /// indefinitely.
    pub fn emit(&self, event: Event) -> Result<()> {
        event.validate()?;
        let event = event.sanitize();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Internal("emit requires a Tokio runtime".into()))?;

        let targets: Vec<(String, Listener)> = self
            .inner
            .subscriptions
            .lock()
            .iter()
            .map(|(name, reg)| (name.clone(), Arc::clone(&reg.listener)))
            .collect();

        tracing::trace!(kind = %event.kind, listeners = targets.len(), "emitting event");

        for (name, listener) in targets {
            let copy = event.clone();
            runtime.spawn(async move {
                let kind = copy.kind.clone();
                let outcome = tokio::task::spawn_blocking(move || (*listener)(copy)).await;
                if let Err(e) = outcome {
                    if e.is_panic() {
                        tracing::warn!(listener = %name, kind = %kind, "listener panicked");
                    } else {
                        tracing::debug!(listener = %name, kind = %kind, "listener task cancelled");
                    }
                }
            });
        }

        Ok(())
    }

    /// Number of registered listeners.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Whether a listener is registered under `name`.
    pub fn is_listening(&self, name: &str) -> bool {
        self.inner.subscriptions.lock().contains_key(name)
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unsubscribe
// ---------------------------------------------------------------------------

/// Handle returned by [`EventManager::listen`].
pub struct Unsubscribe {
    inner: Weak<Inner>,
    name: String,
    id: u64,
    done: AtomicBool,
}

impl Unsubscribe {
    /// Remove the registration this handle was created for.
    ///
    /// Idempotent. A newer registration that reuses the same name is left
    /// alone.
    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut subs = inner.subscriptions.lock();
        if subs.get(&self.name).map(|r| r.id) == Some(self.id) {
            subs.remove(&self.name);
            tracing::debug!(listener = %self.name, "listener removed");
        }
    }

    /// Name the listener was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("name", &self.name)
            .field("done", &self.done.load(Ordering::Relaxed))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SharedEventManager
// ---------------------------------------------------------------------------

/// Process-wide holder for the active [`EventManager`].
///
/// Components read the current manager through [`SharedEventManager::current`]
/// instead of a hidden global; tests swap in a fresh one with
/// [`SharedEventManager::replace`].
#[derive(Debug, Default)]
pub struct SharedEventManager {
    current: RwLock<EventManager>,
}

impl SharedEventManager {
    pub fn new(manager: EventManager) -> Self {
        Self {
            current: RwLock::new(manager),
        }
    }

    /// Handle to the active manager.
    pub fn current(&self) -> EventManager {
        self.current.read().clone()
    }

    /// Install `manager`, returning the previous one.
    pub fn replace(&self, manager: EventManager) -> EventManager {
        std::mem::replace(&mut *self.current.write(), manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn channel_listener(tx: mpsc::UnboundedSender<Event>) -> impl Fn(Event) + Send + Sync {
        move |e| {
            let _ = tx.send(e);
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("listener not invoked in time")
            .expect("channel closed")
    }

    #[test]
    fn duplicate_name_rejected_until_removed() {
        let mgr = EventManager::new();
        let first = mgr.listen("x", |_| {}).unwrap();

        let err = mgr.listen("x", |_| {}).unwrap_err();
        assert!(matches!(err, Error::DuplicateSubscription(ref n) if n == "x"));

        first.unsubscribe();
        assert!(mgr.listen("x", |_| {}).is_ok());
    }

    #[test]
    fn unsubscribe_is_idempotent_and_scoped() {
        let mgr = EventManager::new();
        let old = mgr.listen("x", |_| {}).unwrap();
        old.unsubscribe();
        let _new = mgr.listen("x", |_| {}).unwrap();

        // A stale handle must not remove the newer registration.
        old.unsubscribe();
        assert!(mgr.is_listening("x"));
        assert_eq!(mgr.subscription_count(), 1);
    }

    #[test]
    fn unsubscribe_after_manager_dropped() {
        let mgr = EventManager::new();
        let handle = mgr.listen("gone", |_| {}).unwrap();
        drop(mgr);
        handle.unsubscribe();
        assert_eq!(handle.name(), "gone");
    }

    #[tokio::test]
    async fn emit_normalizes_kind_and_defaults_error() {
        let mgr = EventManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _h = mgr.listen("a", channel_listener(tx)).unwrap();

        mgr.emit(Event::new("Transcode.Error").with("path", "/m/a.mkv"))
            .unwrap();

        let got = recv(&mut rx).await;
        assert_eq!(got.kind, "transcode.error");
        assert_eq!(got.error.as_deref(), Some("transcode.error occurred"));
        assert_eq!(got.payload["path"], "/m/a.mkv");
    }

    #[tokio::test]
    async fn emit_keeps_supplied_error() {
        let mgr = EventManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _h = mgr.listen("a", channel_listener(tx)).unwrap();

        mgr.emit(Event::new("error").with_error("disk full")).unwrap();
        assert_eq!(recv(&mut rx).await.error.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn non_error_kind_gets_no_error() {
        let mgr = EventManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _h = mgr.listen("a", channel_listener(tx)).unwrap();

        mgr.emit(Event::new("errors.cleared")).unwrap();
        assert!(recv(&mut rx).await.error.is_none());
    }

    #[tokio::test]
    async fn invalid_event_is_not_dispatched() {
        let mgr = EventManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _h = mgr.listen("a", channel_listener(tx)).unwrap();

        assert!(matches!(
            mgr.emit(Event::new("  ")),
            Err(Error::EventValidation(_))
        ));
        assert!(matches!(
            mgr.emit(Event::new("two words")),
            Err(Error::EventValidation(_))
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn listeners_get_independent_payload_copies() {
        let mgr = EventManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tx2 = tx.clone();

        let _a = mgr
            .listen("mutator", move |mut e: Event| {
                e.payload.insert("count".into(), Value::from(999));
                let _ = tx.send(e);
            })
            .unwrap();
        let _b = mgr.listen("observer", channel_listener(tx2)).unwrap();

        mgr.emit(Event::new("update").with("count", 1)).unwrap();

        let first = recv(&mut rx).await;
        let second = recv(&mut rx).await;
        let counts: Vec<i64> = [first, second]
            .iter()
            .map(|e| e.payload["count"].as_i64().unwrap())
            .collect();
        assert!(counts.contains(&1), "observer saw a mutated payload: {counts:?}");
        assert!(counts.contains(&999));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panicking_and_blocking_listeners_are_isolated() {
        let mgr = EventManager::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);

        let _p = mgr.listen("panics", |_| panic!("listener bug")).unwrap();
        let _b = mgr
            .listen("blocks", move |_| {
                let _ = release_rx
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(10));
            })
            .unwrap();
        let _ok = mgr.listen("healthy", channel_listener(tx)).unwrap();

        mgr.emit(Event::new("ping")).unwrap();
        assert_eq!(recv(&mut rx).await.kind, "ping");

        // Emission keeps working while one listener is still stuck.
        mgr.emit(Event::new("pong")).unwrap();
        assert_eq!(recv(&mut rx).await.kind, "pong");

        let _ = release_tx.send(());
        let _ = release_tx.send(());
    }

    #[test]
    fn stuck_listener_holds_its_blocking_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(1)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mgr = EventManager::new();
            let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
            let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
            let release_rx = std::sync::Mutex::new(release_rx);
            let _b = mgr
                .listen("blocks", move |e| {
                    let _ = entered_tx.send(e);
                    let _ = release_rx
                        .lock()
                        .unwrap()
                        .recv_timeout(Duration::from_secs(10));
                })
                .unwrap();

            mgr.emit(Event::new("first")).unwrap();
            assert_eq!(recv(&mut entered_rx).await.kind, "first");

            let (tx, mut rx) = mpsc::unbounded_channel();
            let _ok = mgr.listen("healthy", channel_listener(tx)).unwrap();
            mgr.emit(Event::new("second")).unwrap();

            // The only blocking thread is taken, so delivery waits.
            assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv())
                .await
                .is_err());

            let _ = release_tx.send(());
            let _ = release_tx.send(());
            assert_eq!(recv(&mut rx).await.kind, "second");
        });
    }

    #[test]
    fn emit_outside_runtime_fails() {
        let mgr = EventManager::new();
        assert!(matches!(
            mgr.emit(Event::new("ping")),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn is_error_categories() {
        assert!(Event::new("error").is_error());
        assert!(Event::new("probe.error").is_error());
        assert!(Event::new("SPAWN_ERROR").is_error());
        assert!(Event::new("notify-error").is_error());
        assert!(!Event::new("terror").is_error());
        assert!(!Event::new("error.cleared").is_error());
    }

    #[test]
    fn shared_manager_replace() {
        let shared = SharedEventManager::default();
        let _h = shared.current().listen("a", |_| {}).unwrap();
        assert_eq!(shared.current().subscription_count(), 1);

        let old = shared.replace(EventManager::new());
        assert_eq!(old.subscription_count(), 1);
        assert_eq!(shared.current().subscription_count(), 0);
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = Event::new("library.updated").with("SystemUpdateID", "7");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("error"));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
