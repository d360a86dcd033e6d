//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries the
//! sub-configs for tool discovery, transcoding, caching and eventing. Every
//! section defaults sensibly so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

/// Namespace carried by every GENA property set.
pub const DEFAULT_EVENT_NAMESPACE: &str = "urn:schemas-upnp-org:event-1-0";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolsConfig,
    pub transcode: TranscodeConfig,
    pub cache: CacheConfig,
    pub eventing: EventingConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Config(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None`, the file does not exist, or it fails to parse.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Load configuration strictly: a missing or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (name, path) in [
            ("tools.ffmpeg_path", &self.tools.ffmpeg_path),
            ("tools.ffprobe_path", &self.tools.ffprobe_path),
        ] {
            if let Some(p) = path {
                if !p.exists() {
                    warnings.push(format!(
                        "{name} '{}' does not exist; PATH lookup will be used",
                        p.display()
                    ));
                }
            }
        }

        if self.tools.probe_timeout_secs == 0 {
            warnings.push("tools.probe_timeout_secs is 0; every probe will time out".into());
        }

        if self.transcode.threads == Some(0) {
            warnings.push("transcode.threads is 0; the detected CPU count will be used".into());
        }

        if self.cache.probe_capacity == 0 {
            warnings.push("cache.probe_capacity is 0; probe results will never be cached".into());
        }

        let ev = &self.eventing;
        if ev.min_timeout_secs > ev.max_timeout_secs {
            warnings.push(format!(
                "eventing.min_timeout_secs ({}) exceeds eventing.max_timeout_secs ({})",
                ev.min_timeout_secs, ev.max_timeout_secs
            ));
        }
        if ev.default_timeout_secs < ev.min_timeout_secs
            || ev.default_timeout_secs > ev.max_timeout_secs
        {
            warnings.push(format!(
                "eventing.default_timeout_secs ({}) is outside [{}, {}] and will be clamped",
                ev.default_timeout_secs, ev.min_timeout_secs, ev.max_timeout_secs
            ));
        }
        if ev.namespace.trim().is_empty() {
            warnings.push("eventing.namespace is empty".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Paths to external CLI tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Upper bound for a single ffprobe invocation.
    pub probe_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            ffprobe_path: None,
            probe_timeout_secs: 30,
        }
    }
}

/// Transcoding defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Encoder thread count. `None` means the host's available parallelism.
    pub threads: Option<usize>,
    /// Profile used when a request does not name one.
    pub default_profile: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            threads: None,
            default_profile: "generic".into(),
        }
    }
}

/// Replacement cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity of the probe-result cache, in size units (one unit per
    /// probed stream plus one per file).
    pub probe_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            probe_capacity: 4096,
        }
    }
}

/// GENA eventing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventingConfig {
    pub namespace: String,
    pub min_timeout_secs: u64,
    pub max_timeout_secs: u64,
    /// Used when a SUBSCRIBE carries no TIMEOUT header.
    pub default_timeout_secs: u64,
    /// Per-request timeout for outgoing NOTIFY calls.
    pub notify_timeout_secs: u64,
}

impl Default for EventingConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_EVENT_NAMESPACE.into(),
            min_timeout_secs: 60,
            max_timeout_secs: 86_400,
            default_timeout_secs: 1_800,
            notify_timeout_secs: 10,
        }
    }
}
