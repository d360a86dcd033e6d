//! Outgoing NOTIFY requests.

use std::time::Duration;

use dms_core::config::EventingConfig;
use dms_core::{Error, Result};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use url::Url;

use crate::propset::PropertySet;
use crate::subscription::Subscriber;

const NOTIFY_CONTENT_TYPE: &str = r#"text/xml; charset="utf-8""#;

/// Sends property-change notifications to subscriber callbacks.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: Client,
}

impl Notifier {
    /// Create a notifier whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_config(config: &EventingConfig) -> Result<Self> {
        Self::new(Duration::from_secs(config.notify_timeout_secs))
    }

    /// Deliver `set` to `subscriber` with the given SEQ.
    ///
    /// Callback URLs are tried in order until one answers 2xx; the URL that
    /// accepted is returned.
    ///
    /// # Errors
    ///
    /// - [`Error::Xml`] if the set cannot be serialized.
    /// - [`Error::Notify`] for the last URL tried when none accepted.
    pub async fn notify(&self, subscriber: &Subscriber, seq: u32, set: &PropertySet) -> Result<Url> {
        let body = set.to_xml()?;
        let mut last_err = None;

        for url in &subscriber.callback_urls {
            match self.send(url, &subscriber.sid, seq, body.clone()).await {
                Ok(()) => {
                    tracing::debug!(sid = %subscriber.sid, seq, url = %url, "notify delivered");
                    return Ok(url.clone());
                }
                Err(e) => {
                    tracing::debug!(sid = %subscriber.sid, seq, error = %e, "notify attempt failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::notify(&subscriber.sid, "subscriber has no callback urls")
        }))
    }

    async fn send(&self, url: &Url, sid: &str, seq: u32, body: String) -> Result<()> {
        let method = Method::from_bytes(b"NOTIFY")
            .map_err(|e| Error::Internal(format!("NOTIFY method: {e}")))?;

        let response = self
            .client
            .request(method, url.clone())
            .header(CONTENT_TYPE, NOTIFY_CONTENT_TYPE)
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SID", sid)
            .header("SEQ", seq.to_string())
            .body(body)
            .send()
            .await
            .map_err(|e| Error::notify(url, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::notify(url, format!("HTTP {status}")))
        }
    }
}
