//! The request dispatcher.
//!
//! One send algorithm for every BMC exchange:
//!
//! 1. a cached token for the host is attached up front ("pre-authenticated"),
//! 2. the request is sent with a 3 s timeout unless overridden,
//! 3. a 401 on a non-pre-authenticated attempt triggers credential
//!    resolution and exactly one resend,
//! 4. a 401 on a pre-authenticated attempt deletes the stale cached token
//!    and is returned to the caller as-is.
//!
//! Automatic re-authentication is therefore bounded to one per logical call:
//! an expired cached token self-heals, and a server that keeps answering 401
//! can never cause a retry loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bmckit_auth::{CredentialResolver, Credentials, TokenCache};
use serde::de::DeserializeOwned;

use crate::request::{ApiVersion, BmcRequest, Method};
use crate::ClientError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Configuration for a [`BmcClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub version: ApiVersion,
    /// Explicit credentials for re-authentication; `None` relies on cached
    /// tokens (and, if enabled, the vendor-default fallback).
    pub credentials: Option<Credentials>,
    /// Opt-in vendor-default credential fallback.
    pub allow_default_credentials: bool,
    /// Token cache directory override; `None` uses the platform default.
    pub cache_dir: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            version: ApiVersion::default(),
            credentials: None,
            allow_default_credentials: false,
            cache_dir: None,
        }
    }
}

/// A response from the BMC: status code plus buffered body.
#[derive(Debug, Clone)]
pub struct BmcResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl BmcResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// HTTP client bound to one BMC host.
pub struct BmcClient {
    host: String,
    version: ApiVersion,
    credentials: Option<Credentials>,
    http: reqwest::Client,
    resolver: CredentialResolver,
}

impl BmcClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let cache = Arc::new(match &config.cache_dir {
            Some(dir) => TokenCache::with_dir(dir),
            None => TokenCache::new(),
        });
        let resolver = CredentialResolver::new(cache)?
            .with_scheme(config.version.scheme())
            .allow_default_credentials(config.allow_default_credentials);

        let user_agent = format!(
            "bmckit ({}; {})",
            std::env::consts::OS,
            env!("CARGO_PKG_VERSION")
        );
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .user_agent(user_agent)
            .build()
            .map_err(ClientError::Network)?;

        Ok(Self {
            host: config.host,
            version: config.version,
            credentials: config.credentials,
            http,
            resolver,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &TokenCache {
        self.resolver.cache()
    }

    /// Explicit credentials configured for this client, if any.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Sends a request, recovering from an expired cached token at most once.
    pub async fn send(&self, req: &BmcRequest) -> Result<BmcResponse, ClientError> {
        let (mut token, mut pre_authenticated) = match self.cache().get(&self.host) {
            Ok(token) => {
                tracing::debug!(host = %self.host, "attaching cached token");
                (Some(token), true)
            }
            Err(_) => (None, false),
        };

        loop {
            let resp = self.dispatch(req, token.as_deref()).await?;

            if resp.status != 401 {
                return Ok(resp);
            }

            if pre_authenticated {
                // The cached token is stale; drop it so the next logical
                // call re-authenticates, but surface this 401 unchanged.
                tracing::debug!(host = %self.host, "cached token rejected, deleting");
                self.cache().delete(&self.host)?;
                return Ok(resp);
            }

            tracing::debug!(host = %self.host, "unauthorized, resolving credentials");
            token = Some(
                self.resolver
                    .resolve(&self.host, self.credentials.as_ref())
                    .await?,
            );
            pre_authenticated = true;
        }
    }

    /// Performs one HTTP exchange.
    async fn dispatch(
        &self,
        req: &BmcRequest,
        token: Option<&str>,
    ) -> Result<BmcResponse, ClientError> {
        let url = format!("{}://{}{}", self.version.scheme(), self.host, req.path);

        let mut builder = match req.method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
        };
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        for (key, value) in &req.headers {
            builder = builder.header(key, value);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(mp) = &req.multipart {
            let part = reqwest::multipart::Part::bytes(mp.bytes.clone())
                .file_name(mp.file_name.clone());
            builder = builder.multipart(reqwest::multipart::Form::new().part(mp.field.clone(), part));
        }
        builder = builder.timeout(req.timeout.unwrap_or(DEFAULT_TIMEOUT));

        tracing::trace!(url = %url, method = ?req.method, "dispatching");

        let resp = match &req.cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                    resp = builder.send() => resp?,
                }
            }
            None => builder.send().await?,
        };

        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        tracing::trace!(status, len = body.len(), "response");
        Ok(BmcResponse { status, body })
    }
}
