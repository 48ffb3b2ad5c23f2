//! Configuration for Output Instances
//!
//! An output is configured either from a TOML file or from the flat key/value
//! properties a log host hands to its output plugins. Both paths produce an
//! `OutputConfig`; `WorkerSettings` is the immutable slice of it that each
//! object worker receives.

use crate::output::compression::Compression;
use crate::output::object_name::{ObjectNameTemplate, TemplateError, DEFAULT_OBJECT_NAME_TEMPLATE};
use crate::output::object_store::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Error as IoError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BUFFER_SIZE_KIB: u64 = 5000;
pub const DEFAULT_BUFFER_TIMEOUT_SECONDS: u64 = 300;

/// Error type for configuration problems
///
/// These are fatal: an output that fails validation must not be started.
#[derive(Debug)]
pub enum ConfigError {
    /// A required setting is absent or blank
    MissingRequired(&'static str),
    /// The object name template does not compile
    InvalidTemplate(TemplateError),
    /// The configuration file could not be parsed
    Parse(String),
    /// The configuration file could not be read
    Io(IoError),
    /// The store backend is not available in this build
    UnsupportedStore(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingRequired(key) => {
                write!(f, "required setting '{}' is missing", key)
            }
            ConfigError::InvalidTemplate(e) => write!(f, "invalid object name template: {}", e),
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
            ConfigError::Io(e) => write!(f, "config I/O error: {}", e),
            ConfigError::UnsupportedStore(msg) => write!(f, "unsupported store: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<TemplateError> for ConfigError {
    fn from(e: TemplateError) -> Self {
        ConfigError::InvalidTemplate(e)
    }
}

impl From<IoError> for ConfigError {
    fn from(e: IoError) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Type of storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-memory store (for tests)
    Memory,
    /// Local filesystem
    #[default]
    Local,
    /// Google Cloud Storage
    Gcs,
    /// Amazon S3 or compatible
    S3,
}

/// Storage backend configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    /// Root directory (for Local store, default `./data`)
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    /// Region (for S3)
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint (for S3-compatible services like MinIO)
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Configuration of one output instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Identifies this output among several configured ones
    pub output_id: String,
    /// Destination bucket
    pub bucket: String,
    /// Template for object names
    #[serde(default = "default_object_name_template")]
    pub object_name_template: String,
    /// Size in KiB (post-compression) at which an object is committed
    #[serde(default = "default_buffer_size_kib")]
    pub buffer_size_kib: u64,
    /// Seconds an object may stay open before it is committed
    #[serde(default = "default_buffer_timeout_seconds")]
    pub buffer_timeout_seconds: u64,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_object_name_template() -> String {
    DEFAULT_OBJECT_NAME_TEMPLATE.to_string()
}

fn default_buffer_size_kib() -> u64 {
    DEFAULT_BUFFER_SIZE_KIB
}

fn default_buffer_timeout_seconds() -> u64 {
    DEFAULT_BUFFER_TIMEOUT_SECONDS
}

impl OutputConfig {
    /// Config with every optional setting at its default
    pub fn new(output_id: impl Into<String>, bucket: impl Into<String>) -> Self {
        OutputConfig {
            output_id: output_id.into(),
            bucket: bucket.into(),
            object_name_template: default_object_name_template(),
            buffer_size_kib: DEFAULT_BUFFER_SIZE_KIB,
            buffer_timeout_seconds: DEFAULT_BUFFER_TIMEOUT_SECONDS,
            compression: Compression::None,
            store: StoreConfig::default(),
        }
    }

    /// Build from plugin properties (`Bucket`, `OutputID`, `ObjectNameTemplate`,
    /// `BufferSizeKiB`, `BufferTimeoutSeconds`, `Compression`).
    ///
    /// Keys match case-insensitively. Blank values fall back to defaults;
    /// unparseable numbers and unknown compression modes are logged and
    /// replaced by the default.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let props: HashMap<String, &str> = props
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.trim()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let get = |key: &str| props.get(&key.to_lowercase()).copied();

        let bucket = get("Bucket").ok_or(ConfigError::MissingRequired("Bucket"))?;
        let output_id = get("OutputID").ok_or(ConfigError::MissingRequired("OutputID"))?;

        let mut config = OutputConfig::new(output_id, bucket);

        if let Some(template) = get("ObjectNameTemplate") {
            config.object_name_template = template.to_string();
        }
        if let Some(kib) = parse_u64_property("BufferSizeKiB", get("BufferSizeKiB")) {
            config.buffer_size_kib = kib;
        }
        if let Some(secs) = parse_u64_property("BufferTimeoutSeconds", get("BufferTimeoutSeconds")) {
            config.buffer_timeout_seconds = secs;
        }
        if let Some(raw) = get("Compression") {
            match Compression::parse(raw) {
                Some(compression) => config.compression = compression,
                None => warn!(
                    compression = raw,
                    "Compression should be 'gzip' or 'none'; using default"
                ),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: OutputConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check required settings and compile the template
    pub fn validate(&self) -> Result<ObjectNameTemplate, ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("bucket"));
        }
        if self.output_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired("output_id"));
        }
        Ok(ObjectNameTemplate::compile(&self.object_name_template)?)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            bucket: self.bucket.clone(),
            size_threshold_bytes: self.buffer_size_kib.saturating_mul(1024),
            idle_timeout: Duration::from_secs(self.buffer_timeout_seconds),
            compression: self.compression,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

fn parse_u64_property(key: &str, value: Option<&str>) -> Option<u64> {
    let value = value?;
    match value.parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value, "option value should be a non-negative integer, using default");
            None
        }
    }
}

/// Immutable settings shared by the workers of one output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub bucket: String,
    /// Committed once the bytes written since open reach this value
    pub size_threshold_bytes: u64,
    /// Time after open at which an object is committed regardless of size
    pub idle_timeout: Duration,
    pub compression: Compression,
    /// Chunk size requested from the storage writer
    pub chunk_size: usize,
}

impl WorkerSettings {
    /// Settings with the default thresholds
    pub fn new(bucket: impl Into<String>) -> Self {
        WorkerSettings {
            bucket: bucket.into(),
            size_threshold_bytes: DEFAULT_BUFFER_SIZE_KIB * 1024,
            idle_timeout: Duration::from_secs(DEFAULT_BUFFER_TIMEOUT_SECONDS),
            compression: Compression::None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_from_properties() {
        let config =
            OutputConfig::from_properties(&props(&[("Bucket", "logs"), ("OutputID", "out-1")]))
                .unwrap();

        assert_eq!(config.bucket, "logs");
        assert_eq!(config.output_id, "out-1");
        assert_eq!(config.object_name_template, DEFAULT_OBJECT_NAME_TEMPLATE);
        assert_eq!(config.buffer_size_kib, 5000);
        assert_eq!(config.buffer_timeout_seconds, 300);
        assert_eq!(config.compression, Compression::None);
    }

    #[test]
    fn test_all_properties_case_insensitive() {
        let config = OutputConfig::from_properties(&props(&[
            ("bucket", "logs"),
            ("outputid", "out-1"),
            ("objectnametemplate", "{{tag}}/{{uuid}}"),
            ("BUFFERSIZEKIB", "10"),
            ("BufferTimeoutSeconds", "5"),
            ("Compression", "gzip"),
        ]))
        .unwrap();

        assert_eq!(config.object_name_template, "{{tag}}/{{uuid}}");
        assert_eq!(config.buffer_size_kib, 10);
        assert_eq!(config.buffer_timeout_seconds, 5);
        assert_eq!(config.compression, Compression::Gzip);

        let settings = config.worker_settings();
        assert_eq!(settings.size_threshold_bytes, 10 * 1024);
        assert_eq!(settings.idle_timeout, Duration::from_secs(5));
        assert_eq!(settings.chunk_size, 256 * 1024);
    }

    #[test]
    fn test_bad_values_fall_back_to_defaults() {
        let config = OutputConfig::from_properties(&props(&[
            ("Bucket", "logs"),
            ("OutputID", "out-1"),
            ("BufferSizeKiB", "lots"),
            ("BufferTimeoutSeconds", "-3"),
            ("Compression", "brotli"),
        ]))
        .unwrap();

        assert_eq!(config.buffer_size_kib, DEFAULT_BUFFER_SIZE_KIB);
        assert_eq!(config.buffer_timeout_seconds, DEFAULT_BUFFER_TIMEOUT_SECONDS);
        assert_eq!(config.compression, Compression::None);
    }

    #[test]
    fn test_missing_required() {
        let err = OutputConfig::from_properties(&props(&[("OutputID", "out-1")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("Bucket")));

        let err =
            OutputConfig::from_properties(&props(&[("Bucket", "  "), ("OutputID", "x")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("Bucket")));

        let err = OutputConfig::from_properties(&props(&[("Bucket", "logs")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired("OutputID")));
    }

    #[test]
    fn test_invalid_template_is_fatal() {
        let err = OutputConfig::from_properties(&props(&[
            ("Bucket", "logs"),
            ("OutputID", "out-1"),
            ("ObjectNameTemplate", "{{ .Hostname }}"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidTemplate(_)));
    }

    #[test]
    fn test_toml() {
        let config = OutputConfig::from_toml_str(
            r#"
            output_id = "out-1"
            bucket = "logs"
            compression = "gzip"
            buffer_size_kib = 64

            [store]
            kind = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.buffer_size_kib, 64);
        assert_eq!(config.buffer_timeout_seconds, DEFAULT_BUFFER_TIMEOUT_SECONDS);
        assert_eq!(config.store.kind, StoreKind::Memory);
    }

    #[test]
    fn test_toml_missing_bucket() {
        let err = OutputConfig::from_toml_str("output_id = \"x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
