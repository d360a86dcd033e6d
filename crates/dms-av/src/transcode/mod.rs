//! On-demand transcoding to a live byte stream.
//!
//! A [`Transcoder`] turns a [`TranscodeRequest`] into an `ffmpeg` invocation
//! and returns the encoder's stdout as a [`TranscodeStream`]. The generic
//! profile probes the source and maps every stream through [`crate::plan`];
//! the fixed profiles use hand-picked templates and never probe.

mod session;

pub use session::{SessionState, TranscodeStream};

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dms_probe::Prober;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;

use crate::command::ToolCommand;
use crate::plan::{flatten, plan, StreamDirective};
use crate::timefmt::format_duration_sexagesimal;
use crate::tools::{ToolRegistry, FFMPEG};

/// Fragmented MP4 flags that let playback start before encoding finishes.
const STREAMING_MOVFLAGS: &str = "+faststart+frag_keyframe+empty_moov";

/// Target receiver class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Probe-driven per-stream plan, MPEG transport stream output.
    #[default]
    Generic,
    /// VP8/Vorbis in WebM.
    Vp8,
    /// H.264/AAC in fragmented MP4.
    Chromecast,
    /// Browser-friendly H.264/MP3 in fragmented MP4.
    Web,
}

impl Profile {
    pub const ALL: [Profile; 4] = [
        Profile::Generic,
        Profile::Vp8,
        Profile::Chromecast,
        Profile::Web,
    ];

    /// Container format passed to `-f`.
    pub fn container(self) -> &'static str {
        match self {
            Profile::Generic => "mpegts",
            Profile::Vp8 => "webm",
            Profile::Chromecast | Profile::Web => "mp4",
        }
    }

    /// MIME type of the produced stream.
    pub fn mime_type(self) -> &'static str {
        match self {
            Profile::Generic => "video/mpeg",
            Profile::Vp8 => "video/webm",
            Profile::Chromecast | Profile::Web => "video/mp4",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Profile::Generic => "generic",
            Profile::Vp8 => "vp8",
            Profile::Chromecast => "chromecast",
            Profile::Web => "web",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = dms_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" | "mpegts" => Ok(Profile::Generic),
            "vp8" | "webm" => Ok(Profile::Vp8),
            "chromecast" => Ok(Profile::Chromecast),
            "web" => Ok(Profile::Web),
            other => Err(dms_core::Error::Config(format!(
                "unknown transcode profile '{other}' (expected generic, vp8, chromecast or web)"
            ))),
        }
    }
}

/// What to stream: a source file, a time window and a target profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    pub path: PathBuf,
    /// Seek offset into the source.
    pub start: Duration,
    /// Maximum output duration; `None` streams to the end.
    pub length: Option<Duration>,
    pub profile: Profile,
}

impl TranscodeRequest {
    pub fn new(path: impl Into<PathBuf>, profile: Profile) -> Self {
        Self {
            path: path.into(),
            start: Duration::ZERO,
            length: None,
            profile,
        }
    }

    pub fn starting_at(mut self, start: Duration) -> Self {
        self.start = start;
        self
    }

    pub fn with_length(mut self, length: Duration) -> Self {
        self.length = Some(length);
        self
    }
}

/// Starts encoder processes for transcode requests.
#[derive(Clone)]
pub struct Transcoder {
    ffmpeg: PathBuf,
    prober: Arc<dyn Prober>,
    threads: usize,
}

impl fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcoder")
            .field("ffmpeg", &self.ffmpeg)
            .field("prober", &self.prober.name())
            .field("threads", &self.threads)
            .finish()
    }
}

impl Transcoder {
    /// Use the available parallelism as the generic profile's thread count.
    pub fn new(ffmpeg: PathBuf, prober: Arc<dyn Prober>) -> Self {
        Self {
            ffmpeg,
            prober,
            threads: num_cpus::get(),
        }
    }

    pub fn from_registry(tools: &ToolRegistry, prober: Arc<dyn Prober>) -> dms_core::Result<Self> {
        Ok(Self::new(tools.require(FFMPEG)?.to_path_buf(), prober))
    }

    /// Override the `-threads` value; zero keeps the detected default.
    pub fn with_threads(mut self, threads: usize) -> Self {
        if threads > 0 {
            self.threads = threads;
        }
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    /// Assemble the encoder arguments, probing the source for the generic
    /// profile.
    ///
    /// # Errors
    ///
    /// Propagates the prober's error for generic requests.
    pub async fn build_args(&self, request: &TranscodeRequest) -> dms_core::Result<Vec<OsString>> {
        match request.profile {
            Profile::Generic => {
                let report = self.prober.probe(&request.path).await?;
                let directives = plan(&report.streams);
                tracing::debug!(
                    path = %request.path.display(),
                    streams = report.streams.len(),
                    mapped = directives.len(),
                    "planned generic transcode"
                );
                Ok(generic_args(request, self.threads, &directives))
            }
            _ => Ok(fixed_args(request)),
        }
    }

    /// Start encoding and return its output stream.
    ///
    /// Encoder stderr is copied into `stderr_sink` on a background task.
    /// Returns as soon as the process is running; exit status is only logged
    /// and reflected in [`TranscodeStream::state`].
    ///
    /// # Errors
    ///
    /// - [`dms_core::Error::Probe`] if a generic request cannot be probed.
    /// - [`dms_core::Error::Spawn`] if the encoder cannot be started.
    pub async fn start<W>(
        &self,
        request: &TranscodeRequest,
        stderr_sink: W,
    ) -> dms_core::Result<TranscodeStream>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let args = self.build_args(request).await?;

        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(args);

        tracing::info!(
            path = %request.path.display(),
            profile = %request.profile,
            start = %format_duration_sexagesimal(request.start),
            "starting transcode"
        );
        tracing::debug!(args = ?cmd.get_args(), "encoder command line");

        let child = cmd.spawn_streaming()?;
        session::launch(child, cmd.program_name(), stderr_sink)
    }
}

/// `-ss <start> [-t <length>] -i <path>`. The path is passed as raw OS bytes.
fn input_args(request: &TranscodeRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-ss".into(),
        format_duration_sexagesimal(request.start).into(),
    ];
    if let Some(length) = request.length {
        args.push("-t".into());
        args.push(format_duration_sexagesimal(length).into());
    }
    args.push("-i".into());
    args.push(request.path.clone().into_os_string());
    args
}

/// Arguments for the generic profile from an already computed plan.
pub fn generic_args(
    request: &TranscodeRequest,
    threads: usize,
    directives: &[StreamDirective],
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-threads".into(),
        threads.to_string().into(),
        "-async".into(),
        "1".into(),
    ];
    args.extend(input_args(request));
    args.extend(flatten(directives).map(OsString::from));
    args.extend(["-f", Profile::Generic.container(), "pipe:"].map(OsString::from));
    args
}

/// Arguments for a fixed-template profile. [`Profile::Generic`] has no
/// template and maps no streams here.
pub fn fixed_args(request: &TranscodeRequest) -> Vec<OsString> {
    let template: &[&str] = match request.profile {
        Profile::Generic => &[],
        Profile::Vp8 => &[
            "-c:v", "libvpx",
            "-deadline", "realtime",
            "-cpu-used", "8",
            "-c:a", "libvorbis",
        ],
        Profile::Chromecast => &[
            "-c:v", "libx264",
            "-preset", "ultrafast",
            "-profile:v", "high",
            "-level", "5.0",
            "-c:a", "aac",
            "-movflags", STREAMING_MOVFLAGS,
        ],
        Profile::Web => &[
            "-pix_fmt", "yuv420p",
            "-c:v", "libx264",
            "-crf", "25",
            "-c:a", "mp3",
            "-ab", "128k",
            "-ar", "44100",
            "-preset", "ultrafast",
            "-movflags", STREAMING_MOVFLAGS,
        ],
    };

    let mut args = input_args(request);
    args.extend(template.iter().map(OsString::from));
    args.extend(["-f", request.profile.container(), "pipe:"].map(OsString::from));
    args
}
