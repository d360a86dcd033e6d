//! Core types for media probe results.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Broad category of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecType {
    Video,
    Audio,
    Subtitle,
    /// Data, attachment, or anything else the encoder should not map.
    #[serde(other)]
    Other,
}

impl CodecType {
    /// Map the `codec_type` string reported by ffprobe.
    pub fn from_probe(s: &str) -> Self {
        match s {
            "video" => CodecType::Video,
            "audio" => CodecType::Audio,
            "subtitle" => CodecType::Subtitle,
            _ => CodecType::Other,
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CodecType::Video => "video",
            CodecType::Audio => "audio",
            CodecType::Subtitle => "subtitle",
            CodecType::Other => "other",
        };
        f.write_str(s)
    }
}

/// One elementary stream of a probed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Input stream index, as the encoder's `-map 0:<index>` expects it.
    pub index: u32,
    pub codec_type: CodecType,
    /// Short codec name (`h264`, `dca`, `subrip`, ...).
    pub codec_name: String,
}

impl StreamDescriptor {
    pub fn new(index: u32, codec_type: CodecType, codec_name: impl Into<String>) -> Self {
        Self {
            index,
            codec_type,
            codec_name: codec_name.into(),
        }
    }
}

/// Container-level information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    /// Demuxer name list, e.g. `"matroska,webm"`.
    pub format_name: Option<String>,
    pub duration: Option<Duration>,
    /// Overall bit rate in bits per second.
    pub bit_rate: Option<u64>,
    /// File size in bytes.
    pub size: Option<u64>,
}

/// Everything a probe reports about a file. Streams are in probe order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub streams: Vec<StreamDescriptor>,
    pub format: FormatInfo,
}

impl ProbeReport {
    /// Streams of the given type, in probe order.
    pub fn streams_of(&self, codec_type: CodecType) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams
            .iter()
            .filter(move |s| s.codec_type == codec_type)
    }

    pub fn has_video(&self) -> bool {
        self.streams_of(CodecType::Video).next().is_some()
    }
}
