//! Flash pipeline types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Options for flashing a node.
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Path to the image file on the local machine.
    pub image: PathBuf,
    /// Expected SHA-256 digest (hex); verified locally before any upload and
    /// forwarded to the BMC for its own check.
    pub sha256: Option<String>,
    /// Ask the BMC to skip its post-transfer integrity check.
    pub skip_crc: bool,
}

impl FlashOptions {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            sha256: None,
            skip_crc: false,
        }
    }

    pub fn sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into());
        self
    }

    pub fn skip_crc(mut self, skip: bool) -> Self {
        self.skip_crc = skip;
        self
    }
}

/// Transfer status as reported by `GET /api/bmc?opt=get&type=flash`.
///
/// The external tagging matches the wire format:
/// `{"Transferring":{"id":7,"bytes_written":1024}}`, `{"Done":...}`,
/// `{"Error":{...}}`.
#[derive(Debug, Clone, Deserialize)]
pub enum FlashStatus {
    Transferring(TransferProgress),
    Done(serde_json::Value),
    Error(serde_json::Value),
}

/// Progress of an in-flight transfer.
///
/// Older BMC firmware reports `id` and `bytes_written` as decimal strings
/// rather than numbers; both are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferProgress {
    #[serde(deserialize_with = "u64_lenient")]
    pub id: u64,
    #[serde(deserialize_with = "u64_lenient")]
    pub bytes_written: u64,
}

fn u64_lenient<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Progress notifications emitted while a flash runs.
#[derive(Debug, Clone)]
pub enum FlashEvent {
    /// The BMC accepted the transfer and issued a handle.
    Initiated { handle: u64, total: u64 },
    /// The image bytes reached the BMC; flashing is about to start.
    Uploaded,
    /// One progress sample from the polling loop.
    Progress {
        bytes_written: u64,
        total: u64,
        percent: f64,
        /// Mean of the recent instantaneous rates; 0.0 while still
        /// calculating.
        speed_bps: f64,
        /// `None` while the speed estimate is still warming up.
        eta: Option<Duration>,
    },
    /// All bytes written; the BMC is verifying the checksum.
    Verifying,
    /// Polling recovered after `errors` consecutive failures.
    Recovered { errors: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_transferring_with_numbers() {
        let status: FlashStatus =
            serde_json::from_str(r#"{"Transferring":{"id":7,"bytes_written":1024}}"#).unwrap();
        match status {
            FlashStatus::Transferring(t) => {
                assert_eq!(t.id, 7);
                assert_eq!(t.bytes_written, 1024);
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn decodes_transferring_with_string_fields() {
        let status: FlashStatus =
            serde_json::from_str(r#"{"Transferring":{"id":"7","bytes_written":"2048"}}"#)
                .unwrap();
        match status {
            FlashStatus::Transferring(t) => {
                assert_eq!(t.id, 7);
                assert_eq!(t.bytes_written, 2048);
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn decodes_done_with_arbitrary_payload() {
        let status: FlashStatus = serde_json::from_str(r#"{"Done":[12,"ok"]}"#).unwrap();
        assert!(matches!(status, FlashStatus::Done(_)));

        let status: FlashStatus = serde_json::from_str(r#"{"Done":null}"#).unwrap();
        assert!(matches!(status, FlashStatus::Done(_)));
    }

    #[test]
    fn decodes_error_payload() {
        let status: FlashStatus =
            serde_json::from_str(r#"{"Error":{"message":"bad image"}}"#).unwrap();
        assert!(matches!(status, FlashStatus::Error(_)));
    }

    #[test]
    fn rejects_unknown_shape() {
        assert!(serde_json::from_str::<FlashStatus>(r#"{"Bogus":1}"#).is_err());
    }

    #[test]
    fn rejects_non_numeric_string_id() {
        assert!(
            serde_json::from_str::<FlashStatus>(r#"{"Transferring":{"id":"x","bytes_written":1}}"#)
                .is_err()
        );
    }
}
