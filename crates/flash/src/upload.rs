//! The two-phase upload handshake.
//!
//! Phase 1 negotiates a transfer handle with
//! `GET /api/bmc?opt=set&type=flash&...`; phase 2 streams the image bytes as
//! a multipart POST to `/api/bmc/upload/<handle>`. Both phases retry a fixed
//! number of times with a flat delay; the timing lives in [`UploadPolicy`]
//! so tests can run without wall-clock sleeps.

use std::time::Duration;

use bmckit_client::{BmcClient, BmcRequest, ClientError};
use serde_json::Value;

use crate::FlashError;

/// Retry and timeout policy for the handshake.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub init_attempts: u32,
    pub init_delay: Duration,
    pub upload_attempts: u32,
    pub upload_delay: Duration,
    /// Per-request timeout for the image POST; the body can be gigabytes.
    pub upload_timeout: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            init_attempts: 3,
            init_delay: Duration::from_secs(3),
            upload_attempts: 3,
            upload_delay: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Negotiates a transfer handle for `file_name` on the node with the given
/// 0-based wire index.
///
/// Retries on transport errors, non-200 responses, and bodies without a
/// numeric `handle`; surfaces the last error once attempts are exhausted.
pub async fn begin_transfer(
    client: &BmcClient,
    node_index: u8,
    file_name: &str,
    file_len: u64,
    sha256: Option<&str>,
    skip_crc: bool,
    policy: &UploadPolicy,
) -> Result<u64, FlashError> {
    let mut req = BmcRequest::api()
        .query("opt", "set")
        .query("type", "flash")
        .query("file", file_name)
        .query("length", file_len.to_string())
        .query("node", node_index.to_string());
    if let Some(digest) = sha256 {
        req = req.query("sha256", digest);
    }
    if skip_crc {
        req = req.query("skip_crc", "1");
    }

    let mut last_err = None;
    for attempt in 1..=policy.init_attempts {
        match try_initiate(client, &req).await {
            Ok(handle) => {
                tracing::info!(handle, file = %file_name, len = file_len, "transfer initiated");
                return Ok(handle);
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, of = policy.init_attempts,
                    "failed to initiate transfer");
                last_err = Some(e);
                if attempt < policy.init_attempts {
                    tokio::time::sleep(policy.init_delay).await;
                }
            }
        }
    }

    Err(FlashError::RetriesExhausted {
        phase: "initiate",
        attempts: policy.init_attempts,
        source: Box::new(last_err.unwrap_or(FlashError::Protocol("no attempts made".into()))),
    })
}

async fn try_initiate(client: &BmcClient, req: &BmcRequest) -> Result<u64, FlashError> {
    let resp = client.send(req).await?;
    if !resp.is_success() {
        return Err(ClientError::Api {
            status: resp.status,
            body: resp.text(),
        }
        .into());
    }

    let body: Value = resp.json().map_err(FlashError::Client)?;
    body.get("handle")
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
        .ok_or_else(|| FlashError::Protocol("missing handle in initiate response".into()))
}

/// Uploads the image bytes under the negotiated handle.
pub async fn upload_bytes(
    client: &BmcClient,
    handle: u64,
    file_name: &str,
    bytes: Vec<u8>,
    policy: &UploadPolicy,
) -> Result<(), FlashError> {
    let req = BmcRequest::new(format!("/api/bmc/upload/{handle}"))
        .post()
        .multipart_file("file", file_name, bytes)
        .timeout(policy.upload_timeout);

    let mut last_err = None;
    for attempt in 1..=policy.upload_attempts {
        match try_upload(client, &req).await {
            Ok(()) => {
                tracing::info!(handle, "image upload complete");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, of = policy.upload_attempts,
                    "image upload failed");
                last_err = Some(e);
                if attempt < policy.upload_attempts {
                    tokio::time::sleep(policy.upload_delay).await;
                }
            }
        }
    }

    Err(FlashError::RetriesExhausted {
        phase: "upload",
        attempts: policy.upload_attempts,
        source: Box::new(last_err.unwrap_or(FlashError::Protocol("no attempts made".into()))),
    })
}

async fn try_upload(client: &BmcClient, req: &BmcRequest) -> Result<(), FlashError> {
    let resp = client.send(req).await?;
    if !resp.is_success() {
        return Err(ClientError::Api {
            status: resp.status,
            body: resp.text(),
        }
        .into());
    }
    Ok(())
}
