use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{ImgbedResult, RemoteKey};

/// Object storage operations the upload pipeline depends on.
///
/// One implementation per provider; core code only sees this trait.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Store an object under `key`
    async fn put(
        &self,
        key: &RemoteKey,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ImgbedResult<PutResult>;

    /// Fetch an object's bytes, `None` if the key does not exist
    async fn get(&self, key: &str) -> ImgbedResult<Option<Bytes>>;

    /// Delete an object. Returns false if it did not exist.
    async fn delete(&self, key: &str) -> ImgbedResult<bool>;

    /// List objects whose key starts with `prefix`
    async fn list(&self, prefix: Option<&str>, limit: Option<usize>) -> ImgbedResult<Vec<ObjectInfo>>;

    /// Verify the bucket is reachable with the configured credentials
    async fn check(&self) -> ImgbedResult<()>;

    /// Provider default public URL for a key
    fn public_url(&self, key: &str) -> String;
}

/// Result of a successful put operation
#[derive(Debug, Clone)]
pub struct PutResult {
    pub url: String,
    pub etag: Option<String>,
    pub size_bytes: u64,
}

/// Listing entry for a stored object
#[derive(Debug, Clone, Serialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub url: String,
}

/// Content type for common image extensions (lowercase, with dot)
pub fn content_type_for(extension: &str) -> Option<&'static str> {
    match extension {
        ".png" => Some("image/png"),
        ".jpg" | ".jpeg" => Some("image/jpeg"),
        ".gif" => Some("image/gif"),
        ".svg" => Some("image/svg+xml"),
        ".webp" => Some("image/webp"),
        ".bmp" => Some("image/bmp"),
        ".ico" => Some("image/x-icon"),
        ".avif" => Some("image/avif"),
        _ => None,
    }
}

/// Join a base URL and a key with exactly one slash between them
pub fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types() {
        assert_eq!(content_type_for(".jpeg"), Some("image/jpeg"));
        assert_eq!(content_type_for(".svg"), Some("image/svg+xml"));
        assert_eq!(content_type_for(".txt"), None);
    }

    #[test]
    fn url_join_normalizes_slashes() {
        assert_eq!(join_url("https://cdn.example.com/", "/a/b.png"), "https://cdn.example.com/a/b.png");
        assert_eq!(join_url("https://cdn.example.com", "a.png"), "https://cdn.example.com/a.png");
    }
}
