use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::store::{content_type_for, join_url};
use crate::{
    DedupEntry, DedupIndex, FailureKind, ImgbedConfig, ImgbedError, ImgbedResult, KeyGenerator,
    LocalAsset, PathPrefixTemplate, StorageClient, UploadConfig, UploadFailure, UploadResult,
    UploadSuccess,
    DEFAULT_CONCURRENT_LIMIT,
};

/// Source of the "current" time handed to key generation
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Admission and scheduling rules for uploads
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Lowercase extensions with leading dot. Empty accepts everything.
    pub allowed_formats: Vec<String>,
    pub max_bytes: u64,
    pub concurrent_limit: usize,
    pub timeout: Option<Duration>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

impl UploadPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            allowed_formats: config
                .allowed_formats
                .iter()
                .map(|f| f.to_ascii_lowercase())
                .collect(),
            max_bytes: config.max_size_mb.saturating_mul(1024 * 1024),
            concurrent_limit: config.concurrent_limit.max(1),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    /// Accept any extension and size
    pub fn permissive() -> Self {
        Self {
            allowed_formats: Vec::new(),
            max_bytes: u64::MAX,
            concurrent_limit: DEFAULT_CONCURRENT_LIMIT,
            timeout: None,
        }
    }

    pub fn with_concurrent_limit(mut self, limit: usize) -> Self {
        self.concurrent_limit = limit.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn accepts_extension(&self, extension: &str) -> bool {
        self.allowed_formats.is_empty() || self.allowed_formats.iter().any(|f| f == extension)
    }
}

/// Uploads local files: dedup check, key generation, store put, result record.
///
/// Cloning is cheap and clones share the store and the dedup index.
#[derive(Clone)]
pub struct UploadPipeline {
    store: Arc<dyn StorageClient>,
    dedup: Arc<DedupIndex>,
    keys: KeyGenerator,
    policy: UploadPolicy,
    custom_domain: Option<String>,
    clock: Clock,
}

impl UploadPipeline {
    pub fn new<S>(store: S, keys: KeyGenerator, dedup: DedupIndex) -> Self
    where
        S: StorageClient + 'static,
    {
        Self::with_shared_store(Arc::new(store), keys, dedup)
    }

    pub fn with_shared_store(store: Arc<dyn StorageClient>, keys: KeyGenerator, dedup: DedupIndex) -> Self {
        Self {
            store,
            dedup: Arc::new(dedup),
            keys,
            policy: UploadPolicy::default(),
            custom_domain: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Wire a pipeline from validated configuration
    pub fn from_config(store: Arc<dyn StorageClient>, config: &ImgbedConfig) -> ImgbedResult<Self> {
        let dedup = match (&config.cache.enabled, &config.cache.file_path) {
            (true, Some(path)) => DedupIndex::open(path, config.upload.enable_md5_check)?,
            _ => DedupIndex::new(config.upload.enable_md5_check),
        };
        let keys = KeyGenerator::new(config.upload.naming_rule, config.path_prefix());

        let mut pipeline = Self::with_shared_store(store, keys, dedup)
            .with_policy(UploadPolicy::from_config(&config.upload));
        pipeline.custom_domain = config.storage.custom_base_url();
        Ok(pipeline)
    }

    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Put every key under `prefix` instead of the configured template
    pub fn with_path_prefix(mut self, prefix: PathPrefixTemplate) -> Self {
        self.keys = self.keys.with_template(prefix);
        self
    }

    /// Public base URL used instead of the provider host
    pub fn with_custom_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.custom_domain = Some(domain.into());
        self
    }

    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &Arc<dyn StorageClient> {
        &self.store
    }

    pub fn dedup(&self) -> &DedupIndex {
        &self.dedup
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn keys(&self) -> &KeyGenerator {
        &self.keys
    }

    /// Upload a single file. Never fails: errors become `UploadResult::Failure`.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn upload_one(&self, path: &Path) -> UploadResult {
        match self.try_upload(path).await {
            Ok(success) => UploadResult::Success(success),
            Err(failure) => {
                warn!(kind = %failure.kind, error = %failure.message, "upload failed");
                UploadResult::Failure(failure)
            }
        }
    }

    /// Upload many files with the policy's concurrency limit and timeout
    pub async fn upload_batch(&self, paths: &[PathBuf]) -> Vec<UploadResult> {
        self.upload_batch_with(paths, self.policy.concurrent_limit, self.policy.timeout)
            .await
    }

    /// Upload many files, at most `limit` at a time.
    ///
    /// Results line up with `paths` by position. A failing item never stops
    /// its siblings. When `timeout` expires, every item not yet finished is
    /// cancelled and reported as `FailureKind::Timeout`.
    pub async fn upload_batch_with(
        &self,
        paths: &[PathBuf],
        limit: usize,
        timeout: Option<Duration>,
    ) -> Vec<UploadResult> {
        let semaphore = Arc::new(Semaphore::new(limit.max(1)));
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        let handles: Vec<_> = paths
            .iter()
            .cloned()
            .map(|path| {
                let pipeline = self.clone();
                let semaphore = semaphore.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return UploadResult::Failure(UploadFailure::new(
                            path.display().to_string(),
                            FailureKind::Internal,
                            "upload worker pool closed",
                        ));
                    };
                    pipeline.upload_one(&path).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(paths.len());
        for (path, mut handle) in paths.iter().zip(handles) {
            let label = path.display().to_string();

            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
                        results.push(UploadResult::Failure(UploadFailure::from_error(
                            label,
                            &ImgbedError::Timeout { secs },
                        )));
                        continue;
                    }
                },
                None => handle.await,
            };

            results.push(match joined {
                Ok(result) => result,
                Err(e) => UploadResult::Failure(UploadFailure::new(
                    label,
                    FailureKind::Internal,
                    format!("upload task failed: {e}"),
                )),
            });
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(total = results.len(), failed, "batch upload finished");
        results
    }

    /// Image files under `dir` accepted by the policy, in sorted order
    pub fn discover_images(&self, dir: &Path, recursive: bool) -> ImgbedResult<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(ImgbedError::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "directory not found"),
            ));
        }

        let walker = WalkDir::new(dir)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name();

        let mut images = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                ImgbedError::io(&path, std::io::Error::other(e.to_string()))
            })?;
            if entry.file_type().is_file()
                && self
                    .policy
                    .accepts_extension(&LocalAsset::new(entry.path()).extension())
            {
                images.push(entry.into_path());
            }
        }
        Ok(images)
    }

    async fn try_upload(&self, path: &Path) -> Result<UploadSuccess, UploadFailure> {
        let label = path.display().to_string();
        let fail = |e: ImgbedError| UploadFailure::from_error(label.clone(), &e);

        let asset = LocalAsset::new(path);
        self.admit(&asset, &label).await?;

        let bytes = asset.bytes().await.map_err(fail)?.clone();
        let fingerprint = asset.fingerprint().await.map_err(fail)?.clone();

        if let Some(entry) = self.dedup.lookup(&fingerprint) {
            debug!(fingerprint = %fingerprint, key = %entry.remote_key, "dedup hit");
            return Ok(self.success(label, entry, 0, true));
        }

        let extension = asset.extension();
        let now = (self.clock)();
        let (body, digest, ext) = (&bytes, &fingerprint, extension.as_str());
        let (entry, uploaded) = self
            .dedup
            .get_or_insert_with(&fingerprint, move || async move {
                let key = self.keys.generate(path, digest, now);
                let put = self
                    .store
                    .put(&key, body.clone(), content_type_for(ext))
                    .await?;
                let url = match &self.custom_domain {
                    Some(domain) => join_url(domain, key.as_str()),
                    None => put.url,
                };
                Ok(DedupEntry {
                    fingerprint: digest.clone(),
                    remote_key: key,
                    url,
                    first_seen_at: now,
                })
            })
            .await
            .map_err(fail)?;

        if uploaded {
            info!(key = %entry.remote_key, bytes = bytes.len(), "uploaded");
        } else {
            debug!(key = %entry.remote_key, "reused concurrent upload");
        }

        let transferred = if uploaded { bytes.len() as u64 } else { 0 };
        Ok(self.success(label, entry, transferred, !uploaded))
    }

    /// Extension and size checks ahead of reading the file
    async fn admit(&self, asset: &LocalAsset, label: &str) -> Result<(), UploadFailure> {
        let extension = asset.extension();
        if !self.policy.accepts_extension(&extension) {
            return Err(UploadFailure::new(
                label,
                FailureKind::Rejected,
                format!("unsupported file format: '{extension}'"),
            ));
        }

        let metadata = tokio::fs::metadata(asset.path())
            .await
            .map_err(|e| UploadFailure::from_error(label, &ImgbedError::io(asset.path(), e)))?;

        if !metadata.is_file() {
            return Err(UploadFailure::new(label, FailureKind::Io, "not a regular file"));
        }
        if metadata.len() > self.policy.max_bytes {
            return Err(UploadFailure::new(
                label,
                FailureKind::Rejected,
                format!(
                    "file size {} bytes exceeds limit of {} bytes",
                    metadata.len(),
                    self.policy.max_bytes
                ),
            ));
        }
        Ok(())
    }

    fn success(&self, path: String, entry: DedupEntry, bytes_transferred: u64, deduped: bool) -> UploadSuccess {
        UploadSuccess {
            path,
            url: entry.url,
            remote_key: entry.remote_key,
            fingerprint: entry.fingerprint,
            bytes_transferred,
            deduped,
        }
    }
}
