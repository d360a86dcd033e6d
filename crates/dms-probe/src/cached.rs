//! A [`Prober`] wrapper that remembers results in a [`ReplacementCache`].

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use dms_cache::{ReplacementCache, Snapshot};

use crate::prober::Prober;
use crate::types::ProbeReport;

/// Cache key: a path plus its modification time, so an edited file is
/// probed again.
pub type ProbeKey = (PathBuf, Option<SystemTime>);

/// Serves repeated probes of unchanged files from memory.
///
/// Each report occupies one size unit per stream plus one for the file
/// itself, so the configured capacity roughly bounds the number of stream
/// descriptors held.
pub struct CachingProber<P> {
    inner: P,
    cache: ReplacementCache<ProbeKey, ProbeReport>,
}

impl<P: Prober> CachingProber<P> {
    pub fn new(inner: P, capacity: u64) -> Self {
        Self::with_cache(inner, ReplacementCache::new(capacity))
    }

    /// Wrap `inner` with a caller-built cache (e.g. one with a seeded RNG).
    pub fn with_cache(inner: P, cache: ReplacementCache<ProbeKey, ProbeReport>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Cached reports, for inspection or persistence.
    pub fn snapshot(&self) -> Snapshot<ProbeKey, ProbeReport> {
        self.cache.snapshot()
    }

    async fn key_for(path: &Path) -> ProbeKey {
        let modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .ok();
        (path.to_path_buf(), modified)
    }
}

#[async_trait]
impl<P: Prober> Prober for CachingProber<P> {
    fn name(&self) -> &'static str {
        "cached"
    }

    async fn probe(&self, path: &Path) -> dms_core::Result<ProbeReport> {
        let key = Self::key_for(path).await;
        if let Some(report) = self.cache.get(&key) {
            tracing::trace!(path = %path.display(), "probe cache hit");
            return Ok(report);
        }

        let report = self.inner.probe(path).await?;
        let size = report.streams.len() as u64 + 1;
        if !self.cache.set(key, report.clone(), size) {
            tracing::debug!(
                path = %path.display(),
                size,
                "probe report larger than cache capacity; not cached"
            );
        }
        Ok(report)
    }
}
