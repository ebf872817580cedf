//! Firmware/OS image transfer pipeline.
//!
//! Flashing a node is the one stateful operation against the BMC:
//!
//! 1. a local SHA-256 pre-flight (no network traffic on mismatch),
//! 2. a two-phase upload handshake — negotiate a transfer handle, then
//!    stream the image as a multipart body ([`upload`]),
//! 3. a polling state machine that tracks progress, smooths throughput,
//!    and backs off on transient failures ([`monitor`]).
//!
//! [`Flasher`] ties the phases together under an overall deadline and
//! reports progress as [`FlashEvent`]s over an mpsc channel.

pub mod checksum;
pub mod error;
pub mod flasher;
pub mod monitor;
pub mod types;
pub mod upload;

pub use error::FlashError;
pub use flasher::{FlashPolicy, Flasher};
pub use monitor::{BmcStatusSource, MonitorConfig, ProgressMonitor, StatusSource};
pub use types::{FlashEvent, FlashOptions, FlashStatus, TransferProgress};
pub use upload::UploadPolicy;
