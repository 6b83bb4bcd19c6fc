use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::{ImgbedError, ImgbedResult, NamingRule, PathPrefixTemplate};

/// Default maximum concurrent uploads per batch
pub const DEFAULT_CONCURRENT_LIMIT: usize = 5;

/// Prefix for environment overrides, e.g. `IMGBED__STORAGE__BUCKET_NAME`
pub const ENV_PREFIX: &str = "IMGBED";

/// Typed configuration, loaded once and passed to the components that need it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImgbedConfig {
    pub storage: StorageConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub markdown: MarkdownConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// Bucket location and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Service endpoint host, with or without scheme
    pub endpoint: String,

    pub bucket_name: String,

    /// Signing region. Derived from the endpoint when absent.
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub access_key_id: String,

    #[serde(default)]
    pub access_key_secret: String,

    /// Public base URL replacing the provider default host in returned links
    #[serde(default)]
    pub custom_domain: Option<String>,

    /// Address objects as `endpoint/bucket/key` instead of `bucket.endpoint/key`
    #[serde(default)]
    pub force_path_style: bool,
}

/// Upload behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    #[serde(default)]
    pub naming_rule: NamingRule,

    /// Consult the dedup index before uploading
    #[serde(default = "default_true")]
    pub enable_md5_check: bool,

    #[serde(default = "default_concurrent_limit")]
    pub concurrent_limit: usize,

    /// Lowercase extensions, with leading dot
    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<String>,

    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    /// Whole-batch timeout; unfinished items are reported as timed out
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Markdown conversion behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownConfig {
    #[serde(default = "default_true")]
    pub backup_original: bool,

    #[serde(default = "default_backup_suffix")]
    pub backup_suffix: String,

    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Extra URL prefixes that count as already hosted
    #[serde(default)]
    pub remote_prefixes: Vec<String>,
}

/// Dedup index persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,

    /// JSON-lines file holding one dedup entry per line
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_path_prefix() -> String {
    "{year}{month}{day}/".to_string()
}

fn default_concurrent_limit() -> usize {
    DEFAULT_CONCURRENT_LIMIT
}

fn default_allowed_formats() -> Vec<String> {
    [".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".bmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_size_mb() -> u64 {
    10
}

fn default_backup_suffix() -> String {
    ".bak".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            path_prefix: default_path_prefix(),
            naming_rule: NamingRule::default(),
            enable_md5_check: true,
            concurrent_limit: DEFAULT_CONCURRENT_LIMIT,
            allowed_formats: default_allowed_formats(),
            max_size_mb: default_max_size_mb(),
            timeout_secs: None,
        }
    }
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            backup_original: true,
            backup_suffix: default_backup_suffix(),
            recursive: true,
            remote_prefixes: Vec::new(),
        }
    }
}

impl ImgbedConfig {
    /// Load from a YAML file, apply `IMGBED__*` environment overrides and validate.
    pub fn load(path: &Path) -> ImgbedResult<Self> {
        if !path.exists() {
            return Err(ImgbedError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        let config: Self = config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(true))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;

        config.finish()
    }

    /// Parse and validate YAML text without touching the environment
    pub fn from_yaml_str(yaml: &str) -> ImgbedResult<Self> {
        let config: Self = config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;

        config.finish()
    }

    fn finish(mut self) -> ImgbedResult<Self> {
        self.cache.file_path = self.cache.file_path.as_deref().map(expand_home);
        self.validate()?;
        Ok(self)
    }

    /// Check required settings before anything talks to the network
    pub fn validate(&self) -> ImgbedResult<()> {
        let required = [
            ("storage.endpoint", &self.storage.endpoint),
            ("storage.bucket_name", &self.storage.bucket_name),
            ("storage.access_key_id", &self.storage.access_key_id),
            ("storage.access_key_secret", &self.storage.access_key_secret),
        ];

        for (name, value) in required {
            let value = value.trim();
            if value.is_empty() || value.starts_with("your-") {
                return Err(ImgbedError::config(format!("'{name}' must be set")));
            }
        }

        if self.upload.concurrent_limit == 0 {
            return Err(ImgbedError::config("'upload.concurrent_limit' must be a positive integer"));
        }
        if self.upload.max_size_mb == 0 {
            return Err(ImgbedError::config("'upload.max_size_mb' must be a positive integer"));
        }
        if self.upload.timeout_secs == Some(0) {
            return Err(ImgbedError::config("'upload.timeout_secs' must be positive when set"));
        }
        if self.cache.enabled && self.cache.file_path.is_none() {
            return Err(ImgbedError::config("'cache.file_path' is required when the cache is enabled"));
        }
        if let Some(ext) = self
            .upload
            .allowed_formats
            .iter()
            .find(|f| !f.starts_with('.'))
        {
            return Err(ImgbedError::config(format!(
                "'upload.allowed_formats' entries need a leading dot: {ext}"
            )));
        }

        Ok(())
    }

    pub fn path_prefix(&self) -> PathPrefixTemplate {
        PathPrefixTemplate::new(self.upload.path_prefix.clone())
    }

    /// Copy with credentials masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.storage.access_key_id = mask(&copy.storage.access_key_id);
        copy.storage.access_key_secret = mask(&copy.storage.access_key_secret);
        copy
    }
}

impl StorageConfig {
    /// Endpoint with an explicit scheme
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            self.endpoint.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.endpoint.trim_end_matches('/'))
        }
    }

    /// Endpoint host without scheme
    pub fn endpoint_host(&self) -> &str {
        self.endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
    }

    /// Configured region, else the `oss-*` label of the endpoint, else `us-east-1`
    pub fn signing_region(&self) -> String {
        if let Some(region) = self.region.as_deref().filter(|r| !r.is_empty()) {
            return region.to_string();
        }
        self.endpoint_host()
            .split('.')
            .next()
            .filter(|label| label.starts_with("oss-"))
            .unwrap_or("us-east-1")
            .to_string()
    }

    /// Custom domain normalized to carry a scheme, if configured
    pub fn custom_base_url(&self) -> Option<String> {
        let domain = self.custom_domain.as_deref()?.trim();
        if domain.is_empty() {
            return None;
        }
        let domain = domain.trim_end_matches('/');
        if domain.starts_with("http://") || domain.starts_with("https://") {
            Some(domain.to_string())
        } else {
            Some(format!("https://{domain}"))
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

/// Replace a leading `~` with the user's home directory
fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match dirs::home_dir() {
            Some(home) if components.as_path().as_os_str().is_empty() => home,
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
storage:
  endpoint: oss-cn-guangzhou.aliyuncs.com
  bucket_name: pics
  access_key_id: AKID1234
  access_key_secret: s3cr3t-value
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = ImgbedConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.upload.concurrent_limit, 5);
        assert_eq!(config.upload.naming_rule, NamingRule::Uuid);
        assert!(config.upload.enable_md5_check);
        assert_eq!(config.upload.path_prefix, "{year}{month}{day}/");
        assert!(config.markdown.backup_original);
        assert!(!config.cache.enabled);
        assert_eq!(config.storage.signing_region(), "oss-cn-guangzhou");
        assert_eq!(config.storage.endpoint_url(), "https://oss-cn-guangzhou.aliyuncs.com");
    }

    #[test]
    fn placeholder_credentials_are_rejected() {
        let yaml = MINIMAL.replace("AKID1234", "your-access-key-id");
        let err = ImgbedConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ImgbedError::Config { .. }));
        assert!(err.to_string().contains("access_key_id"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let yaml = format!("{MINIMAL}upload:\n  concurrent_limit: 0\n");
        assert!(matches!(
            ImgbedConfig::from_yaml_str(&yaml),
            Err(ImgbedError::Config { .. })
        ));
    }

    #[test]
    fn unknown_naming_rule_is_a_config_error() {
        let yaml = format!("{MINIMAL}upload:\n  naming_rule: sequential\n");
        assert!(matches!(
            ImgbedConfig::from_yaml_str(&yaml),
            Err(ImgbedError::Config { .. })
        ));
    }

    #[test]
    fn naming_rule_and_domain_parse() {
        let yaml = format!(
            "{MINIMAL}  custom_domain: cdn.example.com/\nupload:\n  naming_rule: original\n"
        );
        let config = ImgbedConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.upload.naming_rule, NamingRule::Original);
        assert_eq!(
            config.storage.custom_base_url().as_deref(),
            Some("https://cdn.example.com")
        );
    }

    #[test]
    fn redaction_masks_credentials() {
        let config = ImgbedConfig::from_yaml_str(MINIMAL).unwrap().redacted();
        assert_eq!(config.storage.access_key_id, "AKID****");
        assert_eq!(config.storage.access_key_secret, "s3cr****");
    }

    #[test]
    fn cache_path_expands_home() {
        let yaml = format!("{MINIMAL}cache:\n  enabled: true\n  file_path: \"~/.imgbed/dedup.jsonl\"\n");
        let config = ImgbedConfig::from_yaml_str(&yaml).unwrap();
        let path = config.cache.file_path.unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(path, home.join(".imgbed").join("dedup.jsonl"));
        }
        assert!(!path.starts_with("~"));
    }

    #[test]
    fn only_a_leading_tilde_expands() {
        assert_eq!(expand_home(Path::new("cache/~/x.jsonl")), PathBuf::from("cache/~/x.jsonl"));
        assert_eq!(expand_home(Path::new("~user/x")), PathBuf::from("~user/x"));
        assert_eq!(expand_home(Path::new("/var/x.jsonl")), PathBuf::from("/var/x.jsonl"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~")), home);
        }
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = ImgbedConfig::load(Path::new("/nope/config.yaml")).unwrap_err();
        assert!(matches!(err, ImgbedError::Config { .. }));
    }
}
