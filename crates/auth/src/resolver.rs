//! Credential resolution against the BMC authenticate endpoint.
//!
//! Resolution order, short-circuiting on first success:
//!
//! 1. cached token for the host,
//! 2. cached legacy/default token,
//! 3. explicit credentials via `POST /api/bmc/authenticate`,
//! 4. (opt-in) a fixed list of vendor-default credential pairs.
//!
//! Only the resulting token is ever persisted; credentials are not.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::{AuthError, TokenCache};

const AUTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Vendor-default credential pairs, tried in order when no explicit
/// credentials are given. Only used when
/// [`CredentialResolver::allow_default_credentials`] has enabled the
/// fallback; it is off by default.
pub const DEFAULT_CREDENTIALS: &[(&str, &str)] = &[
    ("root", ""),
    ("root", "turing"),
    ("root", "root"),
    ("admin", "admin"),
    ("turingpi", "turingpi"),
];

/// A username/password pair. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Resolves a host plus optional credentials into a bearer token.
pub struct CredentialResolver {
    http: reqwest::Client,
    cache: Arc<TokenCache>,
    scheme: String,
    allow_defaults: bool,
}

impl CredentialResolver {
    /// Creates a resolver backed by `cache`.
    ///
    /// The HTTP client skips TLS certificate verification: the BMC serves a
    /// self-signed certificate.
    pub fn new(cache: Arc<TokenCache>) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(AUTH_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            cache,
            scheme: "https".to_string(),
            allow_defaults: false,
        })
    }

    /// Sets the URL scheme (`https` for the v1.1 API, `http` for v1).
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Enables or disables the vendor-default credential fallback.
    pub fn allow_default_credentials(mut self, allow: bool) -> Self {
        self.allow_defaults = allow;
        self
    }

    /// Returns the backing token cache.
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Resolves a token for `host`.
    pub async fn resolve(
        &self,
        host: &str,
        explicit: Option<&Credentials>,
    ) -> Result<String, AuthError> {
        // Cached token for this host (falls back to the legacy entry).
        if let Ok(token) = self.cache.get(host) {
            tracing::debug!(host = %host, "using cached token");
            return Ok(token);
        }

        if let Some(creds) = explicit.filter(|c| !c.username.is_empty()) {
            return self.authenticate(host, creds).await;
        }

        if !self.allow_defaults {
            return Err(AuthError::NoCredentials);
        }

        let mut last_err = AuthError::NoCredentials;
        for (username, password) in DEFAULT_CREDENTIALS {
            match self
                .authenticate(host, &Credentials::new(*username, *password))
                .await
            {
                Ok(token) => return Ok(token),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Deletes any cached token for `host`, then authenticates
    /// unconditionally.
    pub async fn force_authenticate(
        &self,
        host: &str,
        creds: &Credentials,
    ) -> Result<String, AuthError> {
        self.cache.delete(host)?;
        self.authenticate(host, creds).await
    }

    /// Performs `POST /api/bmc/authenticate` and caches the issued token.
    async fn authenticate(&self, host: &str, creds: &Credentials) -> Result<String, AuthError> {
        let url = format!("{}://{}/api/bmc/authenticate", self.scheme, host);
        tracing::debug!(host = %host, user = %creds.username, "authenticating");

        let resp = self.http.post(&url).json(creds).send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidCredentials);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::AuthenticationFailed(body));
        }

        let body: serde_json::Value = resp.json().await?;
        let token = body
            .get("id")
            .ok_or_else(|| AuthError::Protocol("missing id field".into()))?
            .as_str()
            .ok_or_else(|| AuthError::Protocol("id is not a string".into()))?
            .to_string();

        if let Err(e) = self.cache.put(host, &token) {
            tracing::warn!(host = %host, error = %e, "failed to cache token");
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Starts a mock server answering each connection with the next scripted
    /// `(status, body)` response. Returns the host and a request counter.
    async fn mock_server(
        responses: Vec<(u16, String)>,
    ) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let handle = tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 8192];
                let _ = stream.read(&mut buf).await;

                let resp = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (host, hits, handle)
    }

    fn resolver(dir: &std::path::Path) -> CredentialResolver {
        CredentialResolver::new(Arc::new(TokenCache::with_dir(dir)))
            .unwrap()
            .with_scheme("http")
    }

    #[tokio::test]
    async fn explicit_credentials_yield_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let (host, hits, handle) =
            mock_server(vec![(200, r#"{"id":"tok-abc"}"#.into())]).await;

        let r = resolver(dir.path());
        let creds = Credentials::new("root", "turing");
        let token = r.resolve(&host, Some(&creds)).await.unwrap();
        assert_eq!(token, "tok-abc");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Second resolve hits the cache, not the network.
        let token = r.resolve(&host, Some(&creds)).await.unwrap();
        assert_eq!(token, "tok-abc");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        handle.abort();
    }

    #[tokio::test]
    async fn forbidden_is_invalid_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let (host, _hits, handle) = mock_server(vec![(403, "{}".into())]).await;

        let r = resolver(dir.path());
        let err = r
            .resolve(&host, Some(&Credentials::new("root", "wrong")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        handle.abort();
    }

    #[tokio::test]
    async fn other_failure_carries_body() {
        let dir = tempfile::tempdir().unwrap();
        let (host, _hits, handle) = mock_server(vec![(500, "boom".into())]).await;

        let r = resolver(dir.path());
        let err = r
            .resolve(&host, Some(&Credentials::new("root", "turing")))
            .await
            .unwrap_err();
        match err {
            AuthError::AuthenticationFailed(body) => assert_eq!(body, "boom"),
            other => panic!("unexpected error: {other}"),
        }

        handle.abort();
    }

    #[tokio::test]
    async fn missing_id_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let (host, _hits, handle) =
            mock_server(vec![(200, r#"{"token":"nope"}"#.into())]).await;

        let r = resolver(dir.path());
        let err = r
            .resolve(&host, Some(&Credentials::new("root", "turing")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Protocol(_)));

        handle.abort();
    }

    #[tokio::test]
    async fn no_credentials_and_defaults_disabled_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let (host, hits, handle) = mock_server(vec![(200, r#"{"id":"t"}"#.into())]).await;

        let r = resolver(dir.path());
        let err = r.resolve(&host, None).await.unwrap_err();
        assert!(matches!(err, AuthError::NoCredentials));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        handle.abort();
    }

    #[tokio::test]
    async fn default_fallback_stops_at_first_success() {
        let dir = tempfile::tempdir().unwrap();
        // root/"" rejected, root/turing accepted.
        let (host, hits, handle) = mock_server(vec![
            (403, "{}".into()),
            (200, r#"{"id":"tok-def"}"#.into()),
        ])
        .await;

        let r = resolver(dir.path()).allow_default_credentials(true);
        let token = r.resolve(&host, None).await.unwrap();
        assert_eq!(token, "tok-def");
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        handle.abort();
    }

    #[tokio::test]
    async fn default_fallback_exhausted_returns_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let responses = vec![(403, "{}".to_string()); DEFAULT_CREDENTIALS.len()];
        let (host, hits, handle) = mock_server(responses).await;

        let r = resolver(dir.path()).allow_default_credentials(true);
        let err = r.resolve(&host, None).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(hits.load(Ordering::SeqCst), DEFAULT_CREDENTIALS.len());

        handle.abort();
    }

    #[tokio::test]
    async fn force_authenticate_discards_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let (host, hits, handle) =
            mock_server(vec![(200, r#"{"id":"fresh"}"#.into())]).await;

        let r = resolver(dir.path());
        r.cache().put(&host, "stale").unwrap();

        let token = r
            .force_authenticate(&host, &Credentials::new("root", "turing"))
            .await
            .unwrap();
        assert_eq!(token, "fresh");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(r.cache().get(&host).unwrap(), "fresh");

        handle.abort();
    }

    #[tokio::test]
    async fn cached_token_short_circuits_network() {
        let dir = tempfile::tempdir().unwrap();
        let (host, hits, handle) = mock_server(vec![(200, r#"{"id":"t"}"#.into())]).await;

        let r = resolver(dir.path());
        r.cache().put(&host, "cached").unwrap();

        let token = r.resolve(&host, None).await.unwrap();
        assert_eq!(token, "cached");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        handle.abort();
    }
}
