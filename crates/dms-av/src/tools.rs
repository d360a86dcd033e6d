//! External tool detection.
//!
//! The [`ToolRegistry`] resolves the locations of `ffmpeg` and `ffprobe`
//! once, preferring configured overrides and falling back to `PATH`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Encoder used by the transcode pipeline.
pub const FFMPEG: &str = "ffmpeg";
/// Inspection tool used by the probe.
pub const FFPROBE: &str = "ffprobe";

/// Known tool names that the registry manages.
const KNOWN_TOOLS: &[&str] = &[FFMPEG, FFPROBE];

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// First line of `-version` output, if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool paths.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, PathBuf>,
}

impl ToolRegistry {
    /// Discover tools using overrides from config, then `PATH`.
    ///
    /// A configured path is used only if it exists; otherwise
    /// [`which::which`] searches `PATH`. Tools that are not found are
    /// omitted from the registry.
    pub fn discover(tools_config: &dms_core::config::ToolsConfig) -> Self {
        let mut tools = HashMap::new();

        for &name in KNOWN_TOOLS {
            let custom_path = match name {
                FFMPEG => tools_config.ffmpeg_path.as_deref(),
                FFPROBE => tools_config.ffprobe_path.as_deref(),
                _ => None,
            };

            let resolved = match custom_path {
                Some(p) if p.exists() => Some(p.to_path_buf()),
                Some(p) => {
                    tracing::warn!(
                        tool = name,
                        path = %p.display(),
                        "configured tool path does not exist; searching PATH"
                    );
                    which::which(name).ok()
                }
                None => which::which(name).ok(),
            };

            match resolved {
                Some(path) => {
                    tracing::debug!(tool = name, path = %path.display(), "tool found");
                    tools.insert(name.to_string(), path);
                }
                None => tracing::debug!(tool = name, "tool not found"),
            }
        }

        Self { tools }
    }

    /// Build a registry from explicit paths, bypassing discovery.
    pub fn with_paths(paths: impl IntoIterator<Item = (impl Into<String>, PathBuf)>) -> Self {
        Self {
            tools: paths.into_iter().map(|(n, p)| (n.into(), p)).collect(),
        }
    }

    /// Path of the given tool, or [`dms_core::Error::Tool`] if it was not
    /// found during discovery.
    pub fn require(&self, name: &str) -> dms_core::Result<&Path> {
        self.tools.get(name).map(PathBuf::as_path).ok_or_else(|| {
            dms_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Check all known tools and return availability information.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        KNOWN_TOOLS
            .iter()
            .map(|&name| match self.tools.get(name) {
                Some(path) => ToolInfo {
                    name: name.to_string(),
                    available: true,
                    version: detect_version(path),
                    path: Some(path.clone()),
                },
                None => ToolInfo {
                    name: name.to_string(),
                    available: false,
                    version: None,
                    path: None,
                },
            })
            .collect()
    }
}

/// Run `<tool> -version` and return the first line of stdout.
fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dms_core::config::ToolsConfig;

    #[test]
    fn discover_with_default_config() {
        let cfg = ToolsConfig::default();
        let registry = ToolRegistry::discover(&cfg);
        // We cannot guarantee any tool is installed in CI,
        // but the call itself must not panic.
        let _ = registry.check_all();
    }

    #[test]
    fn require_missing_tool_returns_error() {
        let registry = ToolRegistry::default();
        let err = registry.require(FFMPEG).unwrap_err();
        assert!(err.to_string().contains("ffmpeg not found"));
    }

    #[test]
    fn check_all_returns_known_tools() {
        let registry = ToolRegistry::default();
        let infos = registry.check_all();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["ffmpeg", "ffprobe"]);
        assert!(infos.iter().all(|i| !i.available));
    }

    #[test]
    fn explicit_paths_are_returned() {
        let registry = ToolRegistry::with_paths([(FFPROBE, PathBuf::from("/opt/ff/ffprobe"))]);
        assert_eq!(
            registry.require(FFPROBE).unwrap(),
            Path::new("/opt/ff/ffprobe")
        );
        assert!(registry.require(FFMPEG).is_err());
    }

    #[test]
    fn missing_override_falls_back_to_path_lookup() {
        let cfg = ToolsConfig {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/ffmpeg")),
            ..ToolsConfig::default()
        };
        let registry = ToolRegistry::discover(&cfg);
        if let Ok(path) = registry.require(FFMPEG) {
            assert_ne!(path, Path::new("/nonexistent/ffmpeg"));
        }
    }
}
