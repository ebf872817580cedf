//! Client error types.

use bmckit_auth::AuthError;

/// Errors from dispatching BMC requests.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("BMC returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("BMC error: {0}")]
    Server(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid node number: {0} (must be 1-4)")]
    InvalidNode(u8),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Network(e)
        }
    }
}
