use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for imgbed operations
pub type ImgbedResult<T> = Result<T, ImgbedError>;

/// Errors that can occur outside of per-item upload handling
#[derive(Error, Debug)]
pub enum ImgbedError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage provider error [{code}]: {message}")]
    Provider { code: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Markdown processing error: {message}")]
    Process { message: String },

    #[error("Operation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl ImgbedError {
    /// Wrap an I/O error together with the path it happened on
    pub fn io<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a provider error with a provider-specific code
    pub fn provider<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self::Provider {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a Markdown processing error
    pub fn process<S: Into<String>>(message: S) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    /// Whether this error was raised by the storage provider
    pub fn is_provider(&self) -> bool {
        matches!(self, Self::Provider { .. })
    }
}

impl From<config::ConfigError> for ImgbedError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
