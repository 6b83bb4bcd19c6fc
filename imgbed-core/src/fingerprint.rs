//! Content fingerprints used for deduplication and hash-derived keys.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::{Fingerprint, ImgbedError, ImgbedResult};

/// SHA-256 over the full content, hex encoded
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(bytes);
    Fingerprint(hex::encode(digest))
}

/// Read a file and fingerprint its bytes
pub async fn fingerprint_file(path: &Path) -> ImgbedResult<Fingerprint> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ImgbedError::io(path, e))?;
    Ok(fingerprint(&bytes))
}
