use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Fingerprint, ImgbedError, RemoteKey};

/// Outcome of one requested upload. Exactly one per input path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum UploadResult {
    Success(UploadSuccess),
    Failure(UploadFailure),
}

/// An uploaded (or previously uploaded) file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSuccess {
    pub path: String,
    pub url: String,
    pub remote_key: RemoteKey,
    pub fingerprint: Fingerprint,
    /// Zero when the dedup index short-circuited the upload
    pub bytes_transferred: u64,
    pub deduped: bool,
}

/// A file that could not be uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFailure {
    pub path: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Why an item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Local file missing or unreadable
    Io,
    /// Storage call failed
    Provider,
    /// Extension or size not accepted by the upload policy
    Rejected,
    /// Batch deadline expired before the item finished
    Timeout,
    /// Markdown read/rewrite anomaly
    Process,
    /// Worker task panicked or was cancelled
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Io => "io",
            FailureKind::Provider => "provider",
            FailureKind::Rejected => "rejected",
            FailureKind::Timeout => "timeout",
            FailureKind::Process => "process",
            FailureKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl UploadFailure {
    pub fn new<P: Into<String>, M: Into<String>>(path: P, kind: FailureKind, message: M) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    /// Classify a library error raised while handling `path`
    pub fn from_error<P: Into<String>>(path: P, err: &ImgbedError) -> Self {
        let kind = match err {
            ImgbedError::Io { .. } => FailureKind::Io,
            ImgbedError::Provider { .. } => FailureKind::Provider,
            ImgbedError::Timeout { .. } => FailureKind::Timeout,
            ImgbedError::Process { .. } | ImgbedError::Serialization { .. } => FailureKind::Process,
            ImgbedError::Config { .. } => FailureKind::Internal,
        };
        Self::new(path, kind, err.to_string())
    }
}

impl std::fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.path, self.kind, self.message)
    }
}

impl UploadResult {
    pub fn path(&self) -> &str {
        match self {
            UploadResult::Success(s) => &s.path,
            UploadResult::Failure(f) => &f.path,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadResult::Success(_))
    }

    pub fn success(&self) -> Option<&UploadSuccess> {
        match self {
            UploadResult::Success(s) => Some(s),
            UploadResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&UploadFailure> {
        match self {
            UploadResult::Success(_) => None,
            UploadResult::Failure(f) => Some(f),
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.success().map(|s| s.url.as_str())
    }

    /// Markdown image snippet for a successful upload
    pub fn markdown(&self, alt: &str) -> Option<String> {
        self.url().map(|url| format!("![{alt}]({url})"))
    }
}

/// Counts and failures for a document, a directory, or a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub total_images: usize,
    pub uploaded_count: usize,
    pub deduped_count: usize,
    pub failed_count: usize,
    pub failures: Vec<UploadFailure>,
}

impl ProcessReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report covering a list of upload results
    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a UploadResult>,
    {
        let mut report = Self::new();
        for result in results {
            report.total_images += 1;
            report.record(result);
        }
        report
    }

    /// Count one outcome without touching `total_images`
    pub fn record(&mut self, result: &UploadResult) {
        match result {
            UploadResult::Success(s) if s.deduped => self.deduped_count += 1,
            UploadResult::Success(_) => self.uploaded_count += 1,
            UploadResult::Failure(f) => self.record_failure(f.clone()),
        }
    }

    pub fn record_failure(&mut self, failure: UploadFailure) {
        self.failed_count += 1;
        self.failures.push(failure);
    }

    /// Fold another report into this one, keeping failure order
    pub fn merge(&mut self, other: ProcessReport) {
        self.total_images += other.total_images;
        self.uploaded_count += other.uploaded_count;
        self.deduped_count += other.deduped_count;
        self.failed_count += other.failed_count;
        self.failures.extend(other.failures);
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count > 0
    }
}

/// Per-document outcome of a conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub path: PathBuf,
    /// Whether the rewritten text differs from the original
    pub changed: bool,
    pub backup_path: Option<PathBuf>,
    pub report: ProcessReport,
}
