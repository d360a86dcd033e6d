//! # dms-av
//!
//! External tool orchestration for the media server.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- locate `ffmpeg` and `ffprobe`
//!   from configured overrides or `PATH`.
//! - **Command execution** ([`ToolCommand`]) -- async builder for one-shot
//!   runs with a timeout, or long-lived streaming processes.
//! - **Probing** ([`probe::FfprobeProber`]) -- implements
//!   [`dms_probe::Prober`] by shelling out to `ffprobe`.
//! - **Stream planning** ([`plan`]) -- per-stream encoder directives for the
//!   generic profile.
//! - **Transcoding** ([`Transcoder`]) -- starts `ffmpeg` for a
//!   [`TranscodeRequest`] and hands back its output as a
//!   [`TranscodeStream`].

pub mod command;
pub mod plan;
pub mod probe;
pub mod timefmt;
pub mod tools;
pub mod transcode;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use plan::StreamDirective;
pub use probe::FfprobeProber;
pub use timefmt::{format_duration_sexagesimal, parse_duration_sexagesimal};
pub use tools::{ToolInfo, ToolRegistry};
pub use transcode::{
    Profile, SessionState, TranscodeRequest, TranscodeStream, Transcoder,
};
