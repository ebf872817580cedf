//! The progress-polling state machine.
//!
//! Polls transfer status once a second, classifies the response, and keeps a
//! smoothed throughput estimate. Transient failures back off up to 10 s and
//! abort after 20 consecutive errors; a successful poll resets the counter.
//! Polling goes through the [`StatusSource`] trait so tests drive the state
//! machine with scripted responses under paused tokio time.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bmckit_client::{BmcClient, BmcRequest};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{FlashEvent, FlashStatus};
use crate::FlashError;

/// Maximum retained `(Δbytes/Δt)` samples for the speed estimate.
const SPEED_WINDOW: usize = 5;

/// One poll of the transfer status.
pub trait StatusSource: Send + Sync {
    fn poll(&self)
        -> Pin<Box<dyn Future<Output = Result<FlashStatus, FlashError>> + Send + '_>>;
}

/// Polls `GET /api/bmc?opt=get&type=flash` through the dispatcher.
///
/// Each poll carries its own timeout so one unresponsive request cannot
/// stall the loop; the BMC can be slow to answer while it flashes.
pub struct BmcStatusSource<'a> {
    client: &'a BmcClient,
    poll_timeout: Duration,
}

impl<'a> BmcStatusSource<'a> {
    pub fn new(client: &'a BmcClient, poll_timeout: Duration) -> Self {
        Self {
            client,
            poll_timeout,
        }
    }
}

impl StatusSource for BmcStatusSource<'_> {
    fn poll(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<FlashStatus, FlashError>> + Send + '_>> {
        Box::pin(async move {
            let req = BmcRequest::api()
                .query("opt", "get")
                .query("type", "flash")
                .timeout(self.poll_timeout);
            let resp = self.client.send(&req).await?;
            if !resp.is_success() {
                return Err(FlashError::Protocol(format!(
                    "status poll returned {}: {}",
                    resp.status,
                    resp.text()
                )));
            }
            resp.json::<FlashStatus>()
                .map_err(|e| FlashError::Protocol(format!("undecodable status: {e}")))
        })
    }
}

/// Polling configuration; defaults match the production loop.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub max_consecutive_errors: u32,
    pub max_backoff: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_consecutive_errors: 20,
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Watches one transfer handle until it reaches a terminal state.
pub struct ProgressMonitor {
    handle: u64,
    file_len: u64,
    config: MonitorConfig,
    events: Option<mpsc::Sender<FlashEvent>>,
    cancel: CancellationToken,
}

impl ProgressMonitor {
    pub fn new(handle: u64, file_len: u64) -> Self {
        Self {
            handle,
            file_len,
            config: MonitorConfig::default(),
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
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

    /// Runs the polling loop until the transfer finishes, fails, is
    /// cancelled, or accumulates too many consecutive errors.
    pub async fn watch(&self, source: &dyn StatusSource) -> Result<(), FlashError> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut consecutive_errors = 0u32;
        let mut window = SpeedWindow::new(SPEED_WINDOW);
        let mut prev: Option<(Instant, u64)> = None;
        let mut verifying = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(FlashError::Cancelled),
                _ = ticker.tick() => {}
            }

            let status = tokio::select! {
                _ = self.cancel.cancelled() => return Err(FlashError::Cancelled),
                status = source.poll() => status,
            };

            let status = match status {
                Ok(status) => status,
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(error = %e, count = consecutive_errors,
                        max = self.config.max_consecutive_errors, "progress poll failed");

                    if consecutive_errors >= self.config.max_consecutive_errors {
                        return Err(FlashError::TooManyPollErrors {
                            count: consecutive_errors,
                            source: Box::new(e),
                        });
                    }

                    let backoff =
                        Duration::from_secs(u64::from(consecutive_errors / 2))
                            .min(self.config.max_backoff);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(FlashError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    continue;
                }
            };

            if consecutive_errors > 0 {
                tracing::info!(errors = consecutive_errors, "progress polling recovered");
                self.emit(FlashEvent::Recovered {
                    errors: consecutive_errors,
                })
                .await;
                consecutive_errors = 0;
            }

            match status {
                FlashStatus::Transferring(progress) => {
                    // BMC firmware may report a stale entry from an earlier
                    // transfer; ignore anything not bound to our handle.
                    if progress.id != self.handle {
                        tracing::debug!(reported = progress.id, expected = self.handle,
                            "ignoring status for foreign handle");
                        continue;
                    }

                    if progress.bytes_written >= self.file_len {
                        if !verifying {
                            verifying = true;
                            tracing::info!("transfer complete, BMC verifying checksum");
                            self.emit(FlashEvent::Verifying).await;
                        }
                        continue;
                    }

                    let now = Instant::now();
                    if let Some((prev_at, prev_bytes)) = prev {
                        let elapsed = now.duration_since(prev_at).as_secs_f64();
                        if elapsed > 0.0 && progress.bytes_written >= prev_bytes {
                            window
                                .push((progress.bytes_written - prev_bytes) as f64 / elapsed);
                        }
                    }
                    prev = Some((now, progress.bytes_written));

                    let speed = window.mean();
                    let remaining = self.file_len - progress.bytes_written;
                    let eta = if speed > 0.0 {
                        Some(Duration::from_secs_f64(remaining as f64 / speed))
                    } else {
                        None
                    };
                    let percent =
                        progress.bytes_written as f64 / self.file_len as f64 * 100.0;

                    self.emit(FlashEvent::Progress {
                        bytes_written: progress.bytes_written,
                        total: self.file_len,
                        percent,
                        speed_bps: speed,
                        eta,
                    })
                    .await;
                }
                FlashStatus::Done(_) => {
                    tracing::info!(handle = self.handle, "flashing completed");
                    return Ok(());
                }
                FlashStatus::Error(payload) => {
                    return Err(FlashError::Server(error_message(&payload)));
                }
            }
        }
    }
}

/// Flattens the BMC's error payload into a message.
fn error_message(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(obj) => {
            if let Some(msg) = obj.get("message").and_then(serde_json::Value::as_str) {
                msg.to_string()
            } else {
                payload.to_string()
            }
        }
        other => other.to_string(),
    }
}

/// Bounded window of instantaneous rates.
struct SpeedWindow {
    samples: VecDeque<f64>,
    cap: usize,
}

impl SpeedWindow {
    fn new(cap: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn push(&mut self, sample: f64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Arithmetic mean of the retained samples; 0.0 when empty.
    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}
