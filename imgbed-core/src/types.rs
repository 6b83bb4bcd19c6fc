use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

use crate::{fingerprint, ImgbedError, ImgbedResult};

/// Content hash of a file's bytes (lowercase hex)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Create from an existing hex digest
    pub fn from_string(hex: String) -> Self {
        Self(hex)
    }

    /// Get the hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw digest bytes, or an empty vec if the stored value is not valid hex
    pub fn to_bytes(&self) -> Vec<u8> {
        hex::decode(&self.0).unwrap_or_default()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object key under which an upload is stored in the bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteKey(pub String);

impl RemoteKey {
    /// Create from existing string
    pub fn from_string(key: String) -> Self {
        Self(key)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the file name part of a remote key is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingRule {
    /// UUID derived from the content fingerprint, plus the original extension
    #[default]
    Uuid,
    /// Unix milliseconds of the generation time, plus the original extension
    Timestamp,
    /// Sanitized original file name; collisions overwrite each other
    Original,
    /// Full fingerprint hex, plus the original extension
    Hash,
}

impl std::fmt::Display for NamingRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NamingRule::Uuid => "uuid",
            NamingRule::Timestamp => "timestamp",
            NamingRule::Original => "original",
            NamingRule::Hash => "hash",
        };
        f.write_str(name)
    }
}

/// A local file that may be uploaded.
///
/// Bytes are read on first access and the fingerprint is computed once;
/// both are memoized for the lifetime of the asset.
#[derive(Debug)]
pub struct LocalAsset {
    path: PathBuf,
    bytes: OnceCell<Bytes>,
    fingerprint: OnceCell<Fingerprint>,
}

impl LocalAsset {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            bytes: OnceCell::new(),
            fingerprint: OnceCell::new(),
        }
    }

    /// Build an asset whose content is already in memory
    pub fn with_bytes<P: Into<PathBuf>>(path: P, bytes: Bytes) -> Self {
        Self {
            path: path.into(),
            bytes: OnceCell::new_with(Some(bytes)),
            fingerprint: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercased extension including the leading dot, or empty
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default()
    }

    /// File contents, read from disk on first call
    pub async fn bytes(&self) -> ImgbedResult<&Bytes> {
        self.bytes
            .get_or_try_init(|| async {
                tokio::fs::read(&self.path)
                    .await
                    .map(Bytes::from)
                    .map_err(|e| ImgbedError::io(&self.path, e))
            })
            .await
    }

    /// Content fingerprint, computed once
    pub async fn fingerprint(&self) -> ImgbedResult<&Fingerprint> {
        let bytes = self.bytes().await?;
        Ok(self
            .fingerprint
            .get_or_init(|| async { fingerprint::fingerprint(bytes) })
            .await)
    }
}
