//! dms - DLNA/UPnP media-serving core
//!
//! This library crate wires the workspace crates together and is exposed
//! for integration testing.

pub mod context;

pub use context::AppContext;
