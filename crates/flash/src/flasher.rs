//! The end-to-end flash orchestrator.
//!
//! [`Flasher`] runs the full pipeline for one node: local checksum
//! pre-flight, two-phase upload, settle delay, then the progress monitor,
//! all bounded by an overall deadline and a shared cancellation token.

use std::time::Duration;

use bmckit_client::ops::{check_response, node_index};
use bmckit_client::{BmcClient, BmcRequest};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::checksum::sha256_file;
use crate::monitor::{BmcStatusSource, MonitorConfig, ProgressMonitor};
use crate::types::{FlashEvent, FlashOptions};
use crate::upload::{begin_transfer, upload_bytes, UploadPolicy};
use crate::FlashError;

const LOCAL_FLASH_ATTEMPTS: u32 = 3;

/// Timing policy for a complete flash run; defaults match production.
#[derive(Debug, Clone)]
pub struct FlashPolicy {
    pub upload: UploadPolicy,
    pub monitor: MonitorConfig,
    /// Pause between the upload finishing and the first status poll; the
    /// BMC needs a moment to move the image into place.
    pub settle_delay: Duration,
    /// Overall deadline for the polling phase.
    pub watch_timeout: Duration,
    /// Per-request timeout for one status poll.
    pub poll_timeout: Duration,
    /// Delay between local-flash retries.
    pub local_retry_delay: Duration,
}

impl Default for FlashPolicy {
    fn default() -> Self {
        Self {
            upload: UploadPolicy::default(),
            monitor: MonitorConfig::default(),
            settle_delay: Duration::from_secs(3),
            watch_timeout: Duration::from_secs(120 * 60),
            poll_timeout: Duration::from_secs(45),
            local_retry_delay: Duration::from_secs(3),
        }
    }
}

/// Flashes node images over one [`BmcClient`].
pub struct Flasher<'a> {
    client: &'a BmcClient,
    policy: FlashPolicy,
    events: Option<mpsc::Sender<FlashEvent>>,
    cancel: CancellationToken,
}

impl<'a> Flasher<'a> {
    pub fn new(client: &'a BmcClient) -> Self {
        Self {
            client,
            policy: FlashPolicy::default(),
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: FlashPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<FlashEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn emit(&self, event: FlashEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Flashes `node` (1-based) with a local image file, streaming it to the
    /// BMC and watching the transfer through to completion.
    pub async fn flash_node(&self, node: u8, opts: &FlashOptions) -> Result<(), FlashError> {
        let index = node_index(node).map_err(|_| FlashError::InvalidNode(node))?;

        let meta = tokio::fs::metadata(&opts.image).await?;
        let file_len = meta.len();
        let file_name = preflight(opts).await?;

        tracing::info!(node, file = %file_name, len = file_len, "flashing node");

        let handle = begin_transfer(
            self.client,
            index,
            &file_name,
            file_len,
            opts.sha256.as_deref(),
            opts.skip_crc,
            &self.policy.upload,
        )
        .await?;
        self.emit(FlashEvent::Initiated {
            handle,
            total: file_len,
        })
        .await;

        let bytes = tokio::fs::read(&opts.image).await?;
        upload_bytes(self.client, handle, &file_name, bytes, &self.policy.upload).await?;
        self.emit(FlashEvent::Uploaded).await;

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(FlashError::Cancelled),
            _ = tokio::time::sleep(self.policy.settle_delay) => {}
        }

        let monitor = ProgressMonitor::new(handle, file_len)
            .with_config(self.policy.monitor.clone())
            .with_cancel(self.cancel.clone());
        let monitor = match &self.events {
            Some(tx) => monitor.with_events(tx.clone()),
            None => monitor,
        };
        let source = BmcStatusSource::new(self.client, self.policy.poll_timeout);

        match tokio::time::timeout(self.policy.watch_timeout, monitor.watch(&source)).await {
            Ok(result) => result,
            Err(_) => Err(FlashError::Timeout),
        }
    }

    /// Flashes `node` (1-based) from an image path already on the BMC's own
    /// filesystem; no bytes cross the wire.
    pub async fn flash_node_local(&self, node: u8, image_path: &str) -> Result<(), FlashError> {
        let index = node_index(node).map_err(|_| FlashError::InvalidNode(node))?;
        if image_path.is_empty() {
            return Err(FlashError::InvalidImage("empty image path".into()));
        }

        let req = BmcRequest::api()
            .query("opt", "set")
            .query("type", "update")
            .query("node", index.to_string())
            .query("path", image_path);

        let mut last_err = None;
        for attempt in 1..=LOCAL_FLASH_ATTEMPTS {
            let result = match self.client.send(&req).await {
                Ok(resp) => check_response(&resp).map_err(FlashError::Client),
                Err(e) => Err(FlashError::Client(e)),
            };
            match result {
                Ok(()) => {
                    tracing::info!(node, path = %image_path, "local flash accepted");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, of = LOCAL_FLASH_ATTEMPTS,
                        "local flash request failed");
                    last_err = Some(e);
                    if attempt < LOCAL_FLASH_ATTEMPTS {
                        tokio::time::sleep(self.policy.local_retry_delay).await;
                    }
                }
            }
        }

        Err(FlashError::RetriesExhausted {
            phase: "local flash",
            attempts: LOCAL_FLASH_ATTEMPTS,
            source: Box::new(
                last_err.unwrap_or(FlashError::Protocol("no attempts made".into())),
            ),
        })
    }

    /// Uploads a BMC firmware image to `/api/firmware`.
    ///
    /// Same local checksum pre-flight as node flashing; the BMC applies the
    /// upgrade itself after the upload, so there is no transfer handle and
    /// nothing to poll.
    pub async fn upgrade_firmware(&self, opts: &FlashOptions) -> Result<(), FlashError> {
        let file_name = preflight(opts).await?;

        tracing::info!(file = %file_name, "uploading BMC firmware");
        let bytes = tokio::fs::read(&opts.image).await?;
        let req = BmcRequest::new("/api/firmware")
            .post()
            .multipart_file("firmware", &file_name, bytes)
            .timeout(self.policy.upload.upload_timeout)
            .cancellable(self.cancel.clone());

        let resp = self.client.send(&req).await?;
        check_response(&resp).map_err(FlashError::Client)
    }
}

/// Extracts the image file name and verifies any caller-supplied digest
/// before a single byte reaches the wire.
async fn preflight(opts: &FlashOptions) -> Result<String, FlashError> {
    let file_name = opts
        .image
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| FlashError::InvalidImage(opts.image.display().to_string()))?;

    if let Some(provided) = &opts.sha256 {
        let calculated = sha256_file(&opts.image).await?;
        if !provided.eq_ignore_ascii_case(&calculated) {
            return Err(FlashError::ChecksumMismatch {
                provided: provided.clone(),
                calculated,
            });
        }
        tracing::debug!(digest = %calculated, "local checksum verified");
    }

    Ok(file_name)
}
