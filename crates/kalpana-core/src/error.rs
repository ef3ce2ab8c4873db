use thiserror::Error;

#[derive(Debug, Error)]
pub enum KalpanaError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failures while reading or writing a length-prefixed frame. Any of these
/// ends the connection it happened on.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("peer closed the connection")]
    Closed,
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    #[error("frame body truncated: {0}")]
    Truncated(std::io::Error),
    #[error("timed out waiting for frame body")]
    TimedOut,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures decoding a well-framed request. These are answered with an
/// `error` payload and the connection stays open.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid request: {0}")]
    InvalidPayload(String),
    #[error("missing command field")]
    MissingCommand,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(error: serde_json::Error) -> Self {
        ProtocolError::InvalidPayload(error.to_string())
    }
}
