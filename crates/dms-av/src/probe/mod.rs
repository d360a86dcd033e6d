//! Probe backends that shell out to external tools.
//!
//! [`FfprobeProber`] implements the [`dms_probe::Prober`] trait and can be
//! wrapped in a [`dms_probe::CachingProber`].

pub mod ffprobe;

pub use self::ffprobe::{parse_ffprobe_json, FfprobeProber};
