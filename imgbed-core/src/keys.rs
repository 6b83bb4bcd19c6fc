use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Fingerprint, NamingRule, RemoteKey};

/// Prefix template for remote keys.
///
/// Supports `{year}`, `{month}` and `{day}`, resolved against the time passed
/// to [`PathPrefixTemplate::render`]. Any other text is copied as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathPrefixTemplate(pub String);

impl PathPrefixTemplate {
    pub fn new<S: Into<String>>(template: S) -> Self {
        Self(template.into())
    }

    /// Fixed folder: `"/docs/shots"` becomes `"docs/shots/"`, blank means the bucket root
    pub fn folder(name: &str) -> Self {
        let trimmed = name.trim().trim_matches('/');
        if trimmed.is_empty() {
            Self::default()
        } else {
            Self(format!("{trimmed}/"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn render(&self, now: DateTime<Utc>) -> String {
        self.0
            .replace("{year}", &now.format("%Y").to_string())
            .replace("{month}", &now.format("%m").to_string())
            .replace("{day}", &now.format("%d").to_string())
    }
}

/// Derives remote object keys from a local file, a naming rule and a prefix.
///
/// Generation never reads the clock or the filesystem: the caller supplies
/// the fingerprint and `now`, so identical inputs give identical keys.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    rule: NamingRule,
    template: PathPrefixTemplate,
}

impl KeyGenerator {
    pub fn new(rule: NamingRule, template: PathPrefixTemplate) -> Self {
        Self { rule, template }
    }

    pub fn rule(&self) -> NamingRule {
        self.rule
    }

    pub fn template(&self) -> &PathPrefixTemplate {
        &self.template
    }

    /// Same rule under a different prefix
    pub fn with_template(mut self, template: PathPrefixTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn generate(&self, path: &Path, fingerprint: &Fingerprint, now: DateTime<Utc>) -> RemoteKey {
        let prefix = self.template.render(now);
        let ext = extension_of(path);

        let name = match self.rule {
            NamingRule::Uuid => format!("{}{}", fingerprint_uuid(fingerprint).simple(), ext),
            NamingRule::Timestamp => format!("{}{}", now.timestamp_millis(), ext),
            NamingRule::Original => sanitize_file_name(path),
            NamingRule::Hash => format!("{}{}", fingerprint.as_str(), ext),
        };

        RemoteKey(format!("{prefix}{name}"))
    }
}

/// Lowercased extension with its leading dot, or empty
fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// UUID in v4 layout whose random bits come from the fingerprint
fn fingerprint_uuid(fingerprint: &Fingerprint) -> uuid::Uuid {
    let digest = fingerprint.to_bytes();
    let mut bytes = [0u8; 16];
    let n = digest.len().min(16);
    bytes[..n].copy_from_slice(&digest[..n]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

/// Final path component with separators and control characters removed
fn sanitize_file_name(path: &Path) -> String {
    let raw = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '/' | '\\') && !c.is_control())
        .collect();

    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
