//! Markdown image reference scanning and rewriting

mod rewriter;
mod scanner;

pub use rewriter::{rewrite, RewriteOutcome};
pub use scanner::{ImageReference, MarkdownScanner};

use std::path::{Path, PathBuf};

use crate::{ImgbedError, ImgbedResult};

/// A Markdown document and the local images it references
#[derive(Debug, Clone)]
pub struct MarkdownDocument {
    pub path: Option<PathBuf>,
    pub raw_text: String,
    /// Local references in document order, spans non-overlapping
    pub image_references: Vec<ImageReference>,
}

impl MarkdownDocument {
    /// Parse text. Relative destinations resolve against `base_dir`.
    pub fn parse(text: &str, base_dir: Option<&Path>, scanner: &MarkdownScanner) -> Self {
        Self {
            path: None,
            raw_text: text.to_string(),
            image_references: scanner.scan(text, base_dir),
        }
    }

    /// Read and parse a file; relative destinations resolve against its directory
    pub async fn load(path: &Path, scanner: &MarkdownScanner) -> ImgbedResult<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ImgbedError::io(path, e))?;
        let base_dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut document = Self::parse(&text, base_dir.or(Some(Path::new("."))), scanner);
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    /// Distinct resolved paths in first-seen order
    pub fn distinct_paths(&self) -> Vec<PathBuf> {
        let mut seen = std::collections::HashSet::new();
        self.image_references
            .iter()
            .filter(|r| seen.insert(r.resolved_path.clone()))
            .map(|r| r.resolved_path.clone())
            .collect()
    }
}

/// Whether a path looks like a Markdown document
pub fn is_markdown_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("markdown"))
}
