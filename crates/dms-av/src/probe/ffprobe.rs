//! FFprobe-based [`dms_probe::Prober`] implementation.
//!
//! Shells out to `ffprobe -v error -print_format json -show_format -show_streams`
//! and maps the JSON output into a [`ProbeReport`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use dms_probe::{CodecType, FormatInfo, ProbeReport, Prober, StreamDescriptor};
use serde::Deserialize;

use crate::command::ToolCommand;
use crate::tools::{ToolRegistry, FFPROBE};

/// Default per-probe timeout.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    /// Path to the ffprobe binary.
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    /// Create a new prober using the given ffprobe path.
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self {
            ffprobe_path,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Create a prober from a discovered registry.
    pub fn from_registry(tools: &ToolRegistry) -> dms_core::Result<Self> {
        Ok(Self::new(tools.require(FFPROBE)?.to_path_buf()))
    }

    /// Bound each ffprobe invocation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, path: &Path) -> dms_core::Result<ProbeReport> {
        let mut cmd = ToolCommand::new(self.ffprobe_path.clone());
        cmd.timeout(self.timeout);
        cmd.args([
            "-v", "error",
            "-print_format", "json",
            "-show_format",
            "-show_streams",
        ]);
        cmd.arg(path);

        // Any failure to run the tool is a probe failure to our callers.
        let output = cmd.execute().await.map_err(|e| {
            dms_core::Error::Probe(format!("{}: {e}", path.display()))
        })?;

        let report = parse_ffprobe_json(&output.stdout)?;
        tracing::debug!(
            path = %path.display(),
            streams = report.streams.len(),
            "probed"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse ffprobe's JSON report. Streams keep the order ffprobe listed them.
pub fn parse_ffprobe_json(json: &str) -> dms_core::Result<ProbeReport> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| dms_core::Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let streams = output
        .streams
        .into_iter()
        .map(|s| StreamDescriptor {
            index: s.index,
            codec_type: CodecType::from_probe(s.codec_type.as_deref().unwrap_or("")),
            codec_name: s.codec_name.unwrap_or_default(),
        })
        .collect();

    let format = output
        .format
        .map(|f| FormatInfo {
            format_name: f.format_name,
            duration: f
                .duration
                .and_then(|s| s.parse::<f64>().ok())
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            bit_rate: f.bit_rate.and_then(|s| s.parse().ok()),
            size: f.size.and_then(|s| s.parse().ok()),
        })
        .unwrap_or_default();

    Ok(ProbeReport { streams, format })
}
