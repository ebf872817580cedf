//! Request descriptors.
//!
//! A [`BmcRequest`] is a plain owned value; cloning one produces a fully
//! independent deep copy (query list and any buffered multipart body
//! included), so a retried send never shares mutable state with an earlier
//! attempt.

use std::str::FromStr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// BMC API version; selects the URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiVersion {
    /// Original API over plain HTTP.
    V1,
    /// Current API over HTTPS with a self-signed certificate.
    #[default]
    V1_1,
}

impl ApiVersion {
    pub fn scheme(&self) -> &'static str {
        match self {
            ApiVersion::V1 => "http",
            ApiVersion::V1_1 => "https",
        }
    }
}

impl FromStr for ApiVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1" => Ok(ApiVersion::V1),
            "v1-1" | "v1.1" => Ok(ApiVersion::V1_1),
            other => Err(format!("unknown API version: {other}")),
        }
    }
}

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// A buffered file for a `multipart/form-data` body.
#[derive(Clone)]
pub struct MultipartFile {
    pub field: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for MultipartFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartFile")
            .field("field", &self.field)
            .field("file_name", &self.file_name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// One HTTP exchange against the BMC.
#[derive(Debug, Clone, Default)]
pub struct BmcRequest {
    pub path: String,
    pub method: Method,
    /// Ordered query parameters; the same key may appear more than once.
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub multipart: Option<MultipartFile>,
    /// Overrides the dispatcher's 3 s default timeout.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation; observed while the exchange is in flight.
    pub cancel: Option<CancellationToken>,
}

impl BmcRequest {
    /// A GET against the main `/api/bmc` endpoint.
    pub fn api() -> Self {
        Self::new("/api/bmc")
    }

    /// A GET against an arbitrary path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn post(mut self) -> Self {
        self.method = Method::Post;
        self
    }

    /// Appends a query parameter, preserving insertion order.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Attaches a buffered multipart file body.
    pub fn multipart_file(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.multipart = Some(MultipartFile {
            field: field.into(),
            file_name: file_name.into(),
            bytes,
        });
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancellable(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_schemes() {
        assert_eq!(ApiVersion::V1.scheme(), "http");
        assert_eq!(ApiVersion::V1_1.scheme(), "https");
        assert_eq!("v1".parse::<ApiVersion>().unwrap(), ApiVersion::V1);
        assert_eq!("v1-1".parse::<ApiVersion>().unwrap(), ApiVersion::V1_1);
        assert!("v2".parse::<ApiVersion>().is_err());
    }

    #[test]
    fn query_preserves_order_and_duplicates() {
        let req = BmcRequest::api()
            .query("opt", "set")
            .query("type", "power")
            .query("node1", "1")
            .query("node1", "0");
        let keys: Vec<&str> = req.query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["opt", "type", "node1", "node1"]);
    }

    #[test]
    fn clone_is_a_deep_copy() {
        let original = BmcRequest::api()
            .query("opt", "set")
            .multipart_file("file", "image.img", vec![1, 2, 3]);

        let mut clone = original.clone();
        clone.query.push(("extra".into(), "1".into()));
        clone.multipart.as_mut().unwrap().bytes.push(4);

        assert_eq!(original.query.len(), 1);
        assert_eq!(original.multipart.as_ref().unwrap().bytes, vec![1, 2, 3]);
    }
}
