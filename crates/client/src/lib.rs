//! HTTP client for the BMC REST API.
//!
//! [`BmcClient`] owns a single hardened dispatch path: TLS verification is
//! disabled (the BMC serves a self-signed certificate), cached bearer tokens
//! are attached up front, and an expired token is recovered from with exactly
//! one transparent re-authentication per logical call.
//!
//! The one-request operation wrappers (power, USB, UART, cooling) live in
//! [`ops`]; the image flash pipeline builds on this crate from
//! `bmckit-flash`.

pub mod client;
pub mod error;
pub mod ops;
pub mod request;

pub use client::{BmcClient, BmcResponse, ClientConfig};
pub use error::ClientError;
pub use request::{ApiVersion, BmcRequest, Method, MultipartFile};
