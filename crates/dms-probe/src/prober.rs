//! The [`Prober`] trait defining the interface for media file probing.

use std::path::Path;

use async_trait::async_trait;

use crate::types::ProbeReport;

/// A media file prober capable of listing a file's streams.
///
/// Implementations must be safe to share across threads (`Send + Sync`).
#[async_trait]
pub trait Prober: Send + Sync {
    /// Human-readable name identifying this prober implementation.
    fn name(&self) -> &'static str;

    /// Probe the media file at `path`.
    ///
    /// Fails with [`dms_core::Error::Probe`] when the file cannot be
    /// introspected. Implementations do not retry.
    async fn probe(&self, path: &Path) -> dms_core::Result<ProbeReport>;
}
