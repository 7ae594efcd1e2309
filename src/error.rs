//! Custom error types for the viewer core.
//!
//! `ViewerError` is the single error type of the crate. It is built with
//! `thiserror` and splits into two families:
//!
//! - **Recoverable** errors describe a single payload or a single remote call
//!   that went wrong: a frame that was evicted upstream before it could be
//!   fetched, a BPM result that failed to parse, a write-back the device
//!   refused. The update loop logs them and keeps the last good state.
//! - **Fatal** errors happen while bringing the viewer up (configuration,
//!   I/O) and are returned to the caller.
//!
//! `ViewerError::is_recoverable` is the routing decision used at the logging
//! boundary in [`crate::viewer`].

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ViewerError>;

#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Unsupported array dtype '{0}'")]
    UnsupportedDtype(String),

    #[error("Array payload of {len} bytes is not a multiple of {item_size} ({dtype})")]
    ArrayLength {
        dtype: String,
        len: usize,
        item_size: usize,
    },

    #[error("Video frame decode error: {0}")]
    VideoFrame(String),

    #[error("Could not fetch frame {frame_id}: {reason}")]
    FetchFailed { frame_id: i64, reason: String },

    #[error("Could not read attribute '{attribute}': {reason}")]
    ReadFailed { attribute: String, reason: String },

    #[error("Could not write attribute '{attribute}': {reason}")]
    WriteFailed { attribute: String, reason: String },

    #[error("Command '{command}' failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("Subscription to '{attribute}' failed: {reason}")]
    Subscription { attribute: String, reason: String },

    #[error("Malformed value for attribute '{attribute}': {reason}")]
    MalformedAttribute { attribute: String, reason: String },

    #[error("No device attached")]
    NoDevice,

    #[error("Viewer event queue closed")]
    QueueClosed,
}

impl ViewerError {
    /// Whether the update loop may log this error and carry on with the
    /// previous state.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ViewerError::Config(_)
            | ViewerError::Configuration(_)
            | ViewerError::Io(_)
            | ViewerError::QueueClosed => false,
            ViewerError::Json(_)
            | ViewerError::Base64(_)
            | ViewerError::UnsupportedDtype(_)
            | ViewerError::ArrayLength { .. }
            | ViewerError::VideoFrame(_)
            | ViewerError::FetchFailed { .. }
            | ViewerError::ReadFailed { .. }
            | ViewerError::WriteFailed { .. }
            | ViewerError::CommandFailed { .. }
            | ViewerError::Subscription { .. }
            | ViewerError::MalformedAttribute { .. }
            | ViewerError::NoDevice => true,
        }
    }

    /// Shorthand for a malformed remote push.
    pub fn malformed(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        ViewerError::MalformedAttribute {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ViewerError {
    fn from(value: figment::Error) -> Self {
        ViewerError::Config(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_failure_is_recoverable() {
        let err = ViewerError::FetchFailed {
            frame_id: 42,
            reason: "frame evicted".into(),
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn startup_errors_are_fatal() {
        let io = ViewerError::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(!io.is_recoverable());
        assert!(!ViewerError::Configuration("bad level".into()).is_recoverable());
    }

    #[test]
    fn write_failure_names_attribute() {
        let err = ViewerError::WriteFailed {
            attribute: "ROI".into(),
            reason: "device busy".into(),
        };
        assert_eq!(
            err.to_string(),
            "Could not write attribute 'ROI': device busy"
        );
        assert!(err.is_recoverable());
    }
}
