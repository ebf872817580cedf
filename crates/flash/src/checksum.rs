//! Streaming SHA-256 of local image files.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::FlashError;

const READ_BUF_SIZE: usize = 1024 * 1024;

/// Computes the hex-encoded SHA-256 digest of a file without loading it
/// into memory at once.
pub async fn sha256_file(path: &Path) -> Result<String, FlashError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashes_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.img");
        std::fs::write(&path, b"abc").unwrap();

        let digest = sha256_file(&path).await.unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn hashes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.img");
        std::fs::write(&path, b"").unwrap();

        let digest = sha256_file(&path).await.unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = sha256_file(Path::new("/nonexistent/image.img"))
            .await
            .unwrap_err();
        assert!(matches!(err, FlashError::Io(_)));
    }
}
