//! GENA subscriber table.
//!
//! Each SUBSCRIBE creates a [`Subscriber`] with a fresh `uuid:` SID, its
//! callback URLs and a granted timeout. Renewals push the expiry out;
//! [`SubscriptionRegistry::expire`] drops subscribers that lapsed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dms_core::config::EventingConfig;
use dms_core::{Error, Result};
use parking_lot::Mutex;
use url::Url;
use uuid::Uuid;

use crate::callback::TimeoutRequest;

/// Bounds applied to requested subscription timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub min: Duration,
    pub max: Duration,
    /// Granted when the request carries no `TIMEOUT` header.
    pub default: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::from_config(&EventingConfig::default())
    }
}

impl TimeoutPolicy {
    pub fn from_config(config: &EventingConfig) -> Self {
        Self {
            min: Duration::from_secs(config.min_timeout_secs),
            max: Duration::from_secs(config.max_timeout_secs),
            default: Duration::from_secs(config.default_timeout_secs),
        }
    }

    /// Timeout actually granted. `infinite` is capped at `max`.
    pub fn grant(&self, requested: Option<TimeoutRequest>) -> Duration {
        let wanted = match requested {
            None => self.default,
            Some(TimeoutRequest::Infinite) => self.max,
            Some(TimeoutRequest::Seconds(secs)) => Duration::from_secs(secs),
        };
        wanted.max(self.min).min(self.max)
    }
}

/// A control point subscribed to state-variable changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    /// `uuid:`-prefixed subscription identifier.
    pub sid: String,
    /// Delivery URLs, tried in order.
    pub callback_urls: Vec<Url>,
    /// SEQ header value of the next NOTIFY.
    pub seq: u32,
    pub timeout: Duration,
    pub expires_at: Instant,
}

impl Subscriber {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe table of live subscribers keyed by SID.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    policy: TimeoutPolicy,
    subscribers: Mutex<HashMap<String, Subscriber>>,
}

impl SubscriptionRegistry {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            policy,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EventingConfig) -> Self {
        Self::new(TimeoutPolicy::from_config(config))
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    /// Register a new subscriber. Its first NOTIFY carries `SEQ: 0`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidHeader`] if `callbacks` is empty.
    pub fn subscribe(
        &self,
        callbacks: Vec<Url>,
        timeout: Option<TimeoutRequest>,
    ) -> Result<Subscriber> {
        if callbacks.is_empty() {
            return Err(Error::InvalidHeader("CALLBACK holds no url".into()));
        }

        let granted = self.policy.grant(timeout);
        let subscriber = Subscriber {
            sid: format!("uuid:{}", Uuid::new_v4()),
            callback_urls: callbacks,
            seq: 0,
            timeout: granted,
            expires_at: Instant::now() + granted,
        };

        self.subscribers
            .lock()
            .insert(subscriber.sid.clone(), subscriber.clone());

        tracing::info!(
            sid = %subscriber.sid,
            callbacks = subscriber.callback_urls.len(),
            timeout_secs = granted.as_secs(),
            "subscriber added"
        );
        Ok(subscriber)
    }

    /// Extend a live subscription.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the SID is unknown or already lapsed.
    pub fn renew(&self, sid: &str, timeout: Option<TimeoutRequest>) -> Result<Subscriber> {
        let now = Instant::now();
        let granted = self.policy.grant(timeout);

        let mut subs = self.subscribers.lock();
        let sub = subs
            .get_mut(sid)
            .filter(|s| !s.is_expired(now))
            .ok_or_else(|| Error::not_found("subscription", sid))?;
        sub.timeout = granted;
        sub.expires_at = now + granted;
        let renewed = sub.clone();
        drop(subs);

        tracing::debug!(sid, timeout_secs = granted.as_secs(), "subscriber renewed");
        Ok(renewed)
    }

    /// Remove a subscription.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the SID is unknown.
    pub fn unsubscribe(&self, sid: &str) -> Result<()> {
        match self.subscribers.lock().remove(sid) {
            Some(_) => {
                tracing::info!(sid, "subscriber removed");
                Ok(())
            }
            None => Err(Error::not_found("subscription", sid)),
        }
    }

    /// Claim the SEQ value for the next NOTIFY to `sid`.
    ///
    /// Sequence numbers start at 0 and wrap from `u32::MAX` to 1, never back
    /// to 0, which is reserved for the initial event.
    pub fn next_seq(&self, sid: &str) -> Result<u32> {
        let mut subs = self.subscribers.lock();
        let sub = subs
            .get_mut(sid)
            .ok_or_else(|| Error::not_found("subscription", sid))?;
        let seq = sub.seq;
        sub.seq = if seq == u32::MAX { 1 } else { seq + 1 };
        Ok(seq)
    }

    pub fn get(&self, sid: &str) -> Option<Subscriber> {
        self.subscribers.lock().get(sid).cloned()
    }

    /// Subscribers whose timeout has not lapsed at `now`.
    pub fn live(&self, now: Instant) -> Vec<Subscriber> {
        self.subscribers
            .lock()
            .values()
            .filter(|s| !s.is_expired(now))
            .cloned()
            .collect()
    }

    /// Drop every subscriber that lapsed at `now`, returning their SIDs.
    pub fn expire(&self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        self.subscribers.lock().retain(|sid, sub| {
            if sub.is_expired(now) {
                expired.push(sid.clone());
                false
            } else {
                true
            }
        });
        for sid in &expired {
            tracing::debug!(sid = %sid, "subscriber expired");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cb() -> Vec<Url> {
        vec![Url::parse("http://10.0.0.5:8080/cb").unwrap()]
    }

    fn policy() -> TimeoutPolicy {
        TimeoutPolicy {
            min: Duration::from_secs(60),
            max: Duration::from_secs(3600),
            default: Duration::from_secs(1800),
        }
    }

    #[test]
    fn grant_clamps_to_bounds() {
        let p = policy();
        assert_eq!(p.grant(None), Duration::from_secs(1800));
        assert_eq!(p.grant(Some(TimeoutRequest::Seconds(5))), Duration::from_secs(60));
        assert_eq!(p.grant(Some(TimeoutRequest::Seconds(600))), Duration::from_secs(600));
        assert_eq!(p.grant(Some(TimeoutRequest::Seconds(99_999))), Duration::from_secs(3600));
        assert_eq!(p.grant(Some(TimeoutRequest::Infinite)), Duration::from_secs(3600));
    }

    #[test]
    fn subscribe_assigns_unique_uuid_sids() {
        let reg = SubscriptionRegistry::new(policy());
        let a = reg.subscribe(cb(), None).unwrap();
        let b = reg.subscribe(cb(), None).unwrap();
        assert!(a.sid.starts_with("uuid:"));
        assert_ne!(a.sid, b.sid);
        assert_eq!(a.seq, 0);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn subscribe_without_callbacks_fails() {
        let reg = SubscriptionRegistry::new(policy());
        assert!(matches!(
            reg.subscribe(Vec::new(), None),
            Err(Error::InvalidHeader(_))
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn seq_counts_up_from_zero() {
        let reg = SubscriptionRegistry::new(policy());
        let sid = reg.subscribe(cb(), None).unwrap().sid;
        assert_eq!(reg.next_seq(&sid).unwrap(), 0);
        assert_eq!(reg.next_seq(&sid).unwrap(), 1);
        assert_eq!(reg.next_seq(&sid).unwrap(), 2);
        assert_eq!(reg.get(&sid).unwrap().seq, 3);
    }

    #[test]
    fn seq_wraps_to_one() {
        let reg = SubscriptionRegistry::new(policy());
        let sid = reg.subscribe(cb(), None).unwrap().sid;
        reg.subscribers.lock().get_mut(&sid).unwrap().seq = u32::MAX;
        assert_eq!(reg.next_seq(&sid).unwrap(), u32::MAX);
        assert_eq!(reg.next_seq(&sid).unwrap(), 1);
    }

    #[test]
    fn renew_extends_expiry() {
        let reg = SubscriptionRegistry::new(policy());
        let sub = reg
            .subscribe(cb(), Some(TimeoutRequest::Seconds(60)))
            .unwrap();
        let renewed = reg
            .renew(&sub.sid, Some(TimeoutRequest::Seconds(600)))
            .unwrap();
        assert_eq!(renewed.timeout, Duration::from_secs(600));
        assert!(renewed.expires_at > sub.expires_at);
    }

    #[test]
    fn unknown_sid_is_not_found() {
        let reg = SubscriptionRegistry::new(policy());
        assert!(matches!(reg.renew("uuid:nope", None), Err(Error::NotFound { .. })));
        assert!(matches!(reg.unsubscribe("uuid:nope"), Err(Error::NotFound { .. })));
        assert!(matches!(reg.next_seq("uuid:nope"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn unsubscribe_removes() {
        let reg = SubscriptionRegistry::new(policy());
        let sid = reg.subscribe(cb(), None).unwrap().sid;
        reg.unsubscribe(&sid).unwrap();
        assert!(reg.get(&sid).is_none());
        assert!(reg.unsubscribe(&sid).is_err());
    }

    #[test]
    fn expire_prunes_lapsed_subscribers() {
        let reg = SubscriptionRegistry::new(policy());
        let short = reg.subscribe(cb(), Some(TimeoutRequest::Seconds(60))).unwrap();
        let long = reg.subscribe(cb(), Some(TimeoutRequest::Seconds(3600))).unwrap();

        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(reg.live(later), vec![long.clone()]);

        let expired = reg.expire(later);
        assert_eq!(expired, vec![short.sid.clone()]);
        assert!(reg.get(&short.sid).is_none());
        assert!(reg.get(&long.sid).is_some());
    }

    #[test]
    fn renewing_a_lapsed_subscription_fails() {
        let reg = SubscriptionRegistry::new(TimeoutPolicy {
            min: Duration::ZERO,
            max: Duration::from_secs(60),
            default: Duration::ZERO,
        });
        let sub = reg.subscribe(cb(), None).unwrap();
        assert!(matches!(reg.renew(&sub.sid, None), Err(Error::NotFound { .. })));
    }
}
