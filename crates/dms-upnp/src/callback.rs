//! GENA request header parsing: `CALLBACK`, `TIMEOUT` and `SID`.

use std::sync::OnceLock;
use std::time::Duration;

use dms_core::{Error, Result};
use regex::Regex;
use url::Url;

fn callback_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([^>]*)>").expect("static regex is valid"))
}

/// Parse a `CALLBACK` header of the form `<url1><url2>...`.
///
/// Whitespace between the bracketed URLs is ignored. Fails with
/// [`Error::InvalidHeader`] if no URL is present or any URL does not parse
/// as an absolute `http` URL.
///
/// ```
/// let urls = dms_upnp::parse_callback_urls("<http://hello><http://path>     <http://world>").unwrap();
/// assert_eq!(urls.len(), 3);
/// ```
pub fn parse_callback_urls(header: &str) -> Result<Vec<Url>> {
    let urls = callback_regex()
        .captures_iter(header)
        .map(|cap| {
            let raw = cap[1].trim();
            let url = Url::parse(raw)
                .map_err(|e| Error::InvalidHeader(format!("CALLBACK url {raw:?}: {e}")))?;
            if url.scheme() != "http" {
                return Err(Error::InvalidHeader(format!(
                    "CALLBACK url {raw:?} is not http"
                )));
            }
            Ok(url)
        })
        .collect::<Result<Vec<_>>>()?;

    if urls.is_empty() {
        return Err(Error::InvalidHeader(format!(
            "CALLBACK {header:?} holds no <url>"
        )));
    }
    Ok(urls)
}

/// Requested subscription duration from a `TIMEOUT` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutRequest {
    Seconds(u64),
    Infinite,
}

/// Parse `Second-<n>` or `Second-infinite` (case-insensitive). A bare
/// `infinite` is accepted as well.
pub fn parse_timeout(header: &str) -> Result<TimeoutRequest> {
    let value = header.trim();
    let lower = value.to_ascii_lowercase();
    let rest = lower.strip_prefix("second-").unwrap_or(&lower);
    if rest == "infinite" {
        return Ok(TimeoutRequest::Infinite);
    }
    if lower.starts_with("second-") {
        if let Ok(secs) = rest.parse::<u64>() {
            return Ok(TimeoutRequest::Seconds(secs));
        }
    }
    Err(Error::InvalidHeader(format!("TIMEOUT {value:?}")))
}

/// Render a granted timeout for the `TIMEOUT` response header.
pub fn format_timeout(timeout: Duration) -> String {
    format!("Second-{}", timeout.as_secs())
}

/// Accept a `SID` header value as sent by control points.
pub fn parse_sid(header: &str) -> Result<&str> {
    let sid = header.trim();
    match sid.strip_prefix("uuid:") {
        Some(rest) if !rest.is_empty() => Ok(sid),
        _ => Err(Error::InvalidHeader(format!("SID {sid:?}"))),
    }
}
