//! Authentication error types.

/// Errors from token caching and credential resolution.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no cached token for host")]
    TokenNotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed: invalid credentials")]
    InvalidCredentials,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("invalid auth response: {0}")]
    Protocol(String),

    #[error("no credentials available (default credential fallback is disabled)")]
    NoCredentials,
}
