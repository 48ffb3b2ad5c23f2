//! Logging Configuration
//!
//! All settings are loaded from environment variables for 12-factor compliance.

/// Enables human readable debug output when set to `true` or `1`
pub const DEV_LOGGING_ENV: &str = "BUCKET_SINK_DEV_LOGGING";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Human readable, for development
    Pretty,
}

/// Logging configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_directive: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            format: LogFormat::Json,
            default_directive: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Development output: pretty and at debug level
    pub fn development() -> Self {
        LoggingConfig {
            format: LogFormat::Pretty,
            default_directive: "debug".to_string(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_dev_flag(std::env::var(DEV_LOGGING_ENV).ok().as_deref())
    }

    fn from_dev_flag(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "true" || v == "1" => Self::development(),
            _ => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_json_info() {
        let config = LoggingConfig::from_dev_flag(None);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.default_directive, "info");
    }

    #[test]
    fn test_dev_flag() {
        assert_eq!(LoggingConfig::from_dev_flag(Some("true")), LoggingConfig::development());
        assert_eq!(LoggingConfig::from_dev_flag(Some(" 1 ")), LoggingConfig::development());
        assert_eq!(LoggingConfig::from_dev_flag(Some("no")), LoggingConfig::default());
    }
}
