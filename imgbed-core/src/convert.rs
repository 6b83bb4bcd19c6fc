use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::markdown::{is_markdown_file, rewrite, MarkdownDocument, MarkdownScanner};
use crate::{
    FailureKind, FileReport, ImgbedError, ImgbedResult, MarkdownConfig, ProcessReport,
    UploadFailure, UploadPipeline, UploadResult,
};

/// How converted documents are written back
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Copy the original next to it before overwriting
    pub backup_original: bool,
    pub backup_suffix: String,
    /// Report what would change without touching any file
    pub dry_run: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::from_config(&MarkdownConfig::default())
    }
}

impl ConvertOptions {
    pub fn from_config(config: &MarkdownConfig) -> Self {
        Self {
            backup_original: config.backup_original,
            backup_suffix: config.backup_suffix.clone(),
            dry_run: false,
        }
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup_original = backup;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Aggregate outcome of converting a directory tree
#[derive(Debug, Clone, Default)]
pub struct DirectoryReport {
    pub files: Vec<FileReport>,
    pub report: ProcessReport,
}

impl DirectoryReport {
    pub fn changed_files(&self) -> usize {
        self.files.iter().filter(|f| f.changed).count()
    }
}

/// Uploads the local images of Markdown documents and points them at the hosted copies
#[derive(Clone)]
pub struct Converter {
    pipeline: UploadPipeline,
    scanner: MarkdownScanner,
    options: ConvertOptions,
}

impl Converter {
    pub fn new(pipeline: UploadPipeline, scanner: MarkdownScanner, options: ConvertOptions) -> Self {
        Self {
            pipeline,
            scanner,
            options,
        }
    }

    pub fn from_config(pipeline: UploadPipeline, config: &MarkdownConfig) -> Self {
        let scanner = MarkdownScanner::new().with_remote_prefixes(config.remote_prefixes.iter().cloned());
        Self::new(pipeline, scanner, ConvertOptions::from_config(config))
    }

    pub fn with_options(mut self, options: ConvertOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    pub fn pipeline(&self) -> &UploadPipeline {
        &self.pipeline
    }

    /// Upload the images of an in-memory document and return the rewritten text
    pub async fn convert_text(&self, text: &str, base_dir: &Path) -> (String, ProcessReport) {
        let document = MarkdownDocument::parse(text, Some(base_dir), &self.scanner);
        self.convert_document(&document).await
    }

    /// Convert one Markdown file in place.
    ///
    /// Each distinct image is uploaded once even when referenced several
    /// times. Failed images keep their original reference. The file is only
    /// written when its text actually changes.
    #[instrument(skip(self), fields(path = %path.display(), dry_run = self.options.dry_run))]
    pub async fn process_file(&self, path: &Path) -> ImgbedResult<FileReport> {
        if !is_markdown_file(path) {
            return Err(ImgbedError::process(format!(
                "not a Markdown file: {}",
                path.display()
            )));
        }

        let document = MarkdownDocument::load(path, &self.scanner).await?;
        let (text, report) = self.convert_document(&document).await;
        let changed = text != document.raw_text;

        let mut backup_path = None;
        if changed && !self.options.dry_run {
            if self.options.backup_original {
                let backup = backup_path_for(path, &self.options.backup_suffix);
                tokio::fs::copy(path, &backup)
                    .await
                    .map_err(|e| ImgbedError::io(&backup, e))?;
                backup_path = Some(backup);
            }
            tokio::fs::write(path, text.as_bytes())
                .await
                .map_err(|e| ImgbedError::io(path, e))?;
        }

        info!(
            images = report.total_images,
            uploaded = report.uploaded_count,
            deduped = report.deduped_count,
            failed = report.failed_count,
            changed,
            "document processed"
        );

        Ok(FileReport {
            path: path.to_path_buf(),
            changed,
            backup_path,
            report,
        })
    }

    /// Convert every Markdown file under `dir`.
    ///
    /// A file or subdirectory that cannot be read or written is recorded as
    /// a failure and the walk continues.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    pub async fn process_directory(&self, dir: &Path, recursive: bool) -> ImgbedResult<DirectoryReport> {
        let walk = markdown_files(dir, recursive)?;
        info!(files = walk.files.len(), unreadable = walk.unreadable.len(), "converting directory");

        let mut summary = DirectoryReport::default();
        for failure in walk.unreadable {
            summary.report.record_failure(failure);
        }
        for file in walk.files {
            match self.process_file(&file).await {
                Ok(file_report) => {
                    summary.report.merge(file_report.report.clone());
                    summary.files.push(file_report);
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "document skipped");
                    summary
                        .report
                        .record_failure(UploadFailure::from_error(file.display().to_string(), &e));
                }
            }
        }
        Ok(summary)
    }

    /// Convert a single file or, for a directory, every Markdown file in it
    pub async fn process_path(&self, path: &Path, recursive: bool) -> ImgbedResult<DirectoryReport> {
        if path.is_dir() {
            return self.process_directory(path, recursive).await;
        }
        let file_report = self.process_file(path).await?;
        Ok(DirectoryReport {
            report: file_report.report.clone(),
            files: vec![file_report],
        })
    }

    async fn convert_document(&self, document: &MarkdownDocument) -> (String, ProcessReport) {
        let distinct = document.distinct_paths();
        let uploads = self.pipeline.upload_batch(&distinct).await;
        let by_resolved: HashMap<&Path, &UploadResult> = distinct
            .iter()
            .map(PathBuf::as_path)
            .zip(uploads.iter())
            .collect();

        let mut by_written = HashMap::new();
        for reference in &document.image_references {
            if let Some(&result) = by_resolved.get(reference.resolved_path.as_path()) {
                by_written
                    .entry(reference.local_path.clone())
                    .or_insert_with(|| result.clone());
            }
        }

        let outcome = rewrite(document, &by_written);
        for failure in &outcome.report.failures {
            debug!(path = %failure.path, kind = %failure.kind, "image reference left unchanged");
        }
        (outcome.text, outcome.report)
    }
}

/// `<file><suffix>`, e.g. `notes.md.bak`
pub fn backup_path_for(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Markdown files found by a directory walk
#[derive(Debug, Clone, Default)]
pub struct MarkdownWalk {
    /// Sorted by name within each directory
    pub files: Vec<PathBuf>,
    /// Entries the walk could not read
    pub unreadable: Vec<UploadFailure>,
}

/// Markdown files under `dir`. Unreadable entries are returned, not skipped.
pub fn markdown_files(dir: &Path, recursive: bool) -> ImgbedResult<MarkdownWalk> {
    if !dir.is_dir() {
        return Err(ImgbedError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "directory not found"),
        ));
    }

    let walker = WalkDir::new(dir)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .sort_by_file_name();

    let mut walk = MarkdownWalk::default();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() && is_markdown_file(entry.path()) => {
                walk.files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => {
                let path = e.path().unwrap_or(dir).display().to_string();
                warn!(path = %path, error = %e, "unreadable entry");
                walk.unreadable.push(UploadFailure::new(path, FailureKind::Io, e.to_string()));
            }
        }
    }
    Ok(walk)
}
