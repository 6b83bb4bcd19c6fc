use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::store::join_url;
use crate::{ImgbedError, ImgbedResult, ObjectInfo, PutResult, RemoteKey, StorageClient};

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: Option<String>,
    last_modified: DateTime<Utc>,
}

/// In-process object store for tests and dry runs
#[derive(Clone)]
pub struct MemoryStore {
    base_url: String,
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    failing_patterns: Arc<RwLock<Vec<String>>>,
    puts: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            failing_patterns: Arc::new(RwLock::new(Vec::new())),
            puts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every put whose key contains `pattern` fail with a provider error
    pub fn fail_keys_containing<S: Into<String>>(&self, pattern: S) {
        self.failing_patterns.write().push(pattern.into());
    }

    /// Number of put calls that reached this store, failed ones included
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).map(|o| o.body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().get(key).and_then(|o| o.content_type.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory://bucket")
    }
}

#[async_trait]
impl StorageClient for MemoryStore {
    async fn put(
        &self,
        key: &RemoteKey,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ImgbedResult<PutResult> {
        self.puts.fetch_add(1, Ordering::SeqCst);

        if self
            .failing_patterns
            .read()
            .iter()
            .any(|p| key.as_str().contains(p.as_str()))
        {
            return Err(ImgbedError::provider("InjectedFailure", format!("put rejected for {key}")));
        }

        let size_bytes = body.len() as u64;
        self.objects.write().insert(
            key.as_str().to_string(),
            StoredObject {
                body,
                content_type: content_type.map(str::to_string),
                last_modified: Utc::now(),
            },
        );

        Ok(PutResult {
            url: self.public_url(key.as_str()),
            etag: None,
            size_bytes,
        })
    }

    async fn get(&self, key: &str) -> ImgbedResult<Option<Bytes>> {
        Ok(self.object(key))
    }

    async fn delete(&self, key: &str) -> ImgbedResult<bool> {
        Ok(self.objects.write().remove(key).is_some())
    }

    async fn list(&self, prefix: Option<&str>, limit: Option<usize>) -> ImgbedResult<Vec<ObjectInfo>> {
        let objects = self.objects.read();
        let prefix = prefix.unwrap_or("");
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .take(limit.unwrap_or(usize::MAX))
            .map(|(key, obj)| ObjectInfo {
                key: key.clone(),
                size_bytes: obj.body.len() as u64,
                last_modified: Some(obj.last_modified),
                url: self.public_url(key),
            })
            .collect())
    }

    async fn check(&self) -> ImgbedResult<()> {
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.base_url, key)
    }
}
