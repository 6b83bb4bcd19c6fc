//! # imgbed-core: Content-addressed image hosting for Markdown
//!
//! `imgbed-core` uploads local images to an S3-compatible bucket (Aliyun OSS,
//! AWS S3, MinIO, R2, ...) and rewrites Markdown documents so their image
//! references point at the hosted copies.
//!
//! ## Key Features
//!
//! - **Deduplicated**: identical bytes are uploaded at most once per process, even under concurrency
//! - **Deterministic keys**: `{year}{month}{day}/` prefixes plus uuid, timestamp, original or hash names
//! - **Bounded batches**: configurable worker limit, results in input order, per-item failures
//! - **Exact rewrites**: only image destinations change; everything else is copied byte for byte
//! - **Storage agnostic**: any [`StorageClient`] works; [`S3Store`] and [`MemoryStore`] ship here
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgbed_core::prelude::*;
//! use std::path::Path;
//!
//! # #[tokio::main]
//! # async fn main() -> ImgbedResult<()> {
//! let config = ImgbedConfig::load(Path::new("config.yaml"))?;
//! let store = S3Store::connect(&config.storage).await?;
//! let pipeline = UploadPipeline::from_config(std::sync::Arc::new(store), &config)?;
//!
//! // Upload one image
//! let result = pipeline.upload_one(Path::new("shots/login.png")).await;
//! println!("{}", result.markdown("login").unwrap_or_default());
//!
//! // Or rewrite a whole document in place
//! let converter = Converter::from_config(pipeline, &config.markdown);
//! let file = converter.process_file(Path::new("notes.md")).await?;
//! println!("{} images, {} failed", file.report.total_images, file.report.failed_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    Converter    │  ← Markdown scan, rewrite, backup
//! ├─────────────────┤
//! │ UploadPipeline  │  ← admission, dedup, keys, bounded batches
//! ├─────────────────┤
//! │  StorageClient  │  ← provider primitives
//! └─────────────────┘
//! ```

mod config;
mod convert;
mod dedup;
mod error;
pub mod fingerprint;
mod keys;
pub mod markdown;
mod memory_store;
mod pipeline;
mod receipt;
mod s3_store;
pub mod store;
mod types;

// Re-export main types for clean API
pub use config::{
    CacheConfig, ImgbedConfig, MarkdownConfig, StorageConfig, UploadConfig,
    DEFAULT_CONCURRENT_LIMIT, ENV_PREFIX,
};
pub use convert::{
    backup_path_for, markdown_files, ConvertOptions, Converter, DirectoryReport, MarkdownWalk,
};
pub use dedup::{DedupEntry, DedupIndex};
pub use error::{ImgbedError, ImgbedResult};
pub use keys::{KeyGenerator, PathPrefixTemplate};
pub use memory_store::MemoryStore;
pub use pipeline::{Clock, UploadPipeline, UploadPolicy};
pub use receipt::{FailureKind, FileReport, ProcessReport, UploadFailure, UploadResult, UploadSuccess};
pub use s3_store::S3Store;
pub use store::{ObjectInfo, PutResult, StorageClient};
pub use types::{Fingerprint, LocalAsset, NamingRule, RemoteKey};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Converter, ImgbedConfig, ImgbedError, ImgbedResult, MemoryStore, NamingRule,
        ProcessReport, S3Store, StorageClient, UploadPipeline, UploadResult,
    };
}
