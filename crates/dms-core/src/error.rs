//! Unified error type for the media-serving core.
//!
//! All crates funnel their failures into [`Error`]. Start-time failures
//! (probe, spawn, validation, duplicate subscription) are returned to the
//! immediate caller; post-start failures such as [`Error::Process`] are only
//! ever logged. [`Error::http_status`] lets an HTTP front end map them.

use std::fmt;

/// Unified error type covering all failure modes in dms.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "subscription").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Source media could not be introspected.
    #[error("Probe error: {0}")]
    Probe(String),

    /// The external encoder could not be started.
    #[error("Spawn error [{tool}]: {message}")]
    Spawn {
        /// Name of the tool that failed to start.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The encoder failed after its output was handed to a caller.
    #[error("Process error [{tool}]: {message}")]
    Process {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool is missing or a one-shot invocation failed.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// A listener name is already registered.
    #[error("Duplicate subscription: {0}")]
    DuplicateSubscription(String),

    /// An emitted event was rejected before dispatch.
    #[error("Event validation error: {0}")]
    EventValidation(String),

    /// A protocol header (CALLBACK, TIMEOUT, SID) could not be parsed.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Delivering a notification to a subscriber failed.
    #[error("Notify error [{url}]: {message}")]
    Notify {
        /// The callback URL that was tried last.
        url: String,
        /// Human-readable error description.
        message: String,
    },

    /// A PropertySet document could not be written or parsed.
    #[error("XML error: {0}")]
    Xml(String),

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    ///
    /// Header problems map to 412 because GENA answers a malformed
    /// SUBSCRIBE with `Precondition Failed`.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Probe(_) => 422,
            Error::Spawn { .. } => 502,
            Error::Process { .. } => 502,
            Error::Tool { .. } => 502,
            Error::DuplicateSubscription(_) => 409,
            Error::EventValidation(_) => 400,
            Error::InvalidHeader(_) => 412,
            Error::Notify { .. } => 502,
            Error::Xml(_) => 400,
            Error::Config(_) => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Spawn`].
    pub fn spawn(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Spawn {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Process`].
    pub fn process(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Process {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Notify`].
    pub fn notify(url: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::Notify {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
