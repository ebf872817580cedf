//! Host-scoped authentication for the BMC REST API.
//!
//! The BMC issues opaque bearer tokens from `/api/bmc/authenticate`. This
//! crate persists one token per host ([`TokenCache`]) and turns a host plus
//! optional explicit credentials into a valid token
//! ([`CredentialResolver`]), trying cached tokens first and re-authenticating
//! only when needed.

pub mod cache;
pub mod error;
pub mod resolver;

pub use cache::TokenCache;
pub use error::AuthError;
pub use resolver::{Credentials, CredentialResolver, DEFAULT_CREDENTIALS};
