//! Error taxonomy shared by all voice bridge crates

use thiserror::Error;

/// Result alias using the core error
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("Channel closed")]
    ChannelClosed,
}

impl Error {
    /// True when the error only reflects an in-progress cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::ChannelClosed)
    }
}

/// Failure to recover a stream identifier from the opening messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Could not find stream_sid in initial websocket messages: {first}, {second}")]
    MissingStreamId { first: String, second: String },

    #[error("Connection closed after {received} of 2 handshake messages")]
    ConnectionClosed { received: usize },
}

/// A processing stage failed while the session was active
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Stage '{stage_name}' failed: {cause}")]
pub struct StageError {
    pub stage_name: String,
    pub cause: String,
}

impl StageError {
    pub fn new(stage_name: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            stage_name: stage_name.into(),
            cause: cause.to_string(),
        }
    }
}

/// A stage did not stop cleanly during cancellation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Stage '{stage_name}' failed to stop cleanly: {cause}")]
pub struct TeardownError {
    pub stage_name: String,
    pub cause: String,
}

impl TeardownError {
    pub fn new(stage_name: impl Into<String>, cause: impl ToString) -> Self {
        Self {
            stage_name: stage_name.into(),
            cause: cause.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_error_names_both_messages() {
        let err = HandshakeError::MissingStreamId {
            first: "{}".into(),
            second: "not-json".into(),
        };
        let message = err.to_string();
        assert!(message.contains("{}"));
        assert!(message.contains("not-json"));
    }

    #[test]
    fn test_stage_error_conversion() {
        let err: Error = StageError::new("tts", "provider returned 500").into();
        assert!(matches!(err, Error::Stage(ref e) if e.stage_name == "tts"));
        assert!(!err.is_cancellation());
        assert!(Error::Cancelled.is_cancellation());
    }
}
