//! Flash pipeline error types.

use bmckit_client::ClientError;

/// Errors from the image transfer pipeline.
#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid image path: {0}")]
    InvalidImage(String),

    #[error("invalid node number: {0} (must be 1-4)")]
    InvalidNode(u8),

    /// Caller-supplied digest does not match the local file. Detected before
    /// any network traffic.
    #[error("SHA-256 checksum mismatch: provided {provided}, calculated {calculated}")]
    ChecksumMismatch { provided: String, calculated: String },

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The BMC reported an explicit error payload during flashing.
    #[error("flashing failed: {0}")]
    Server(String),

    #[error("{phase} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        phase: &'static str,
        attempts: u32,
        source: Box<FlashError>,
    },

    #[error("too many consecutive polling errors ({count}): {source}")]
    TooManyPollErrors { count: u32, source: Box<FlashError> },

    #[error("flash operation timed out")]
    Timeout,

    #[error("flash operation cancelled")]
    Cancelled,
}
