//! # dms-probe
//!
//! Media stream description types and the [`Prober`] abstraction.
//!
//! A probe lists a file's elementary streams in order, each with its index,
//! [`CodecType`] and codec name, plus container-level [`FormatInfo`].
//! Concrete probers that shell out to external tools live in `dms-av`;
//! [`CachingProber`] layers a [`dms_cache::ReplacementCache`] over any of
//! them.

pub mod cached;
pub mod prober;
pub mod types;

// Re-export key types at crate root for convenience.
pub use cached::{CachingProber, ProbeKey};
pub use prober::Prober;
pub use types::{CodecType, FormatInfo, ProbeReport, StreamDescriptor};
