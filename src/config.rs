use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::constants::archival_user_agent;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_path: PathBuf,

    // Archive Workers
    pub worker_concurrency: usize,
    pub per_domain_concurrency: usize,

    // Archival pipeline
    pub archive: ArchiveConfig,
}

/// Settings consumed by the archival pipeline.
///
/// Read once when the service starts and handed to each component by value;
/// nothing in the pipeline reads the environment on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Global switch. When off, archives fail with reason `disabled` and no request is made.
    pub enabled: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_redirects: u32,
    /// Maximum body size in bytes.
    pub max_content_size: u64,
    /// Total attempts (first try included) for timeouts.
    pub max_retries: u32,
    pub retry_backoff_base: Duration,
    /// Contact URL advertised in the User-Agent.
    pub contact_url: String,
}

impl ArchiveConfig {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
    pub const DEFAULT_MAX_CONTENT_SIZE: u64 = 10 * 1024 * 1024;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

    /// Defaults for everything, with the given contact URL.
    #[must_use]
    pub fn with_contact_url(contact_url: impl Into<String>) -> Self {
        Self {
            enabled: true,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            max_redirects: Self::DEFAULT_MAX_REDIRECTS,
            max_content_size: Self::DEFAULT_MAX_CONTENT_SIZE,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            retry_backoff_base: Self::DEFAULT_RETRY_BACKOFF,
            contact_url: contact_url.into(),
        }
    }

    /// The User-Agent header value for archival requests.
    #[must_use]
    pub fn user_agent(&self) -> String {
        archival_user_agent(&self.contact_url)
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`.
    ///
    /// With the default 2s base the second attempt waits 2s and the third 4s.
    #[must_use]
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.retry_backoff_base.saturating_mul(factor)
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Database
            database_path: PathBuf::from(env_or_default(
                "DATABASE_PATH",
                "./data/linkstash.sqlite",
            )),

            // Archive Workers
            worker_concurrency: parse_env_usize("WORKER_CONCURRENCY", 4)?,
            per_domain_concurrency: parse_env_usize("PER_DOMAIN_CONCURRENCY", 1)?,

            // Archival pipeline
            archive: ArchiveConfig {
                enabled: parse_env_bool("ARCHIVE_ENABLED", true)?,
                connect_timeout: Duration::from_secs(parse_env_u64(
                    "ARCHIVE_CONNECT_TIMEOUT_SECS",
                    ArchiveConfig::DEFAULT_CONNECT_TIMEOUT.as_secs(),
                )?),
                read_timeout: Duration::from_secs(parse_env_u64(
                    "ARCHIVE_READ_TIMEOUT_SECS",
                    ArchiveConfig::DEFAULT_READ_TIMEOUT.as_secs(),
                )?),
                max_redirects: parse_env_u32(
                    "ARCHIVE_MAX_REDIRECTS",
                    ArchiveConfig::DEFAULT_MAX_REDIRECTS,
                )?,
                max_content_size: parse_env_u64(
                    "ARCHIVE_MAX_CONTENT_SIZE",
                    ArchiveConfig::DEFAULT_MAX_CONTENT_SIZE,
                )?,
                max_retries: parse_env_u32("ARCHIVE_MAX_RETRIES", ArchiveConfig::DEFAULT_MAX_RETRIES)?,
                retry_backoff_base: Duration::from_secs(parse_env_u64(
                    "ARCHIVE_RETRY_BACKOFF_SECS",
                    ArchiveConfig::DEFAULT_RETRY_BACKOFF.as_secs(),
                )?),
                contact_url: required_env("ARCHIVE_CONTACT_URL")?,
            },
        })
    }

    /// Configuration suitable for tests: temp-friendly paths, default limits.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            database_path: PathBuf::from("./data/test.sqlite"),
            worker_concurrency: 2,
            per_domain_concurrency: 1,
            archive: ArchiveConfig::with_contact_url("https://linkstash.test/about"),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "WORKER_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.per_domain_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PER_DOMAIN_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.archive.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ARCHIVE_MAX_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        for (name, timeout) in [
            ("ARCHIVE_CONNECT_TIMEOUT_SECS", self.archive.connect_timeout),
            ("ARCHIVE_READ_TIMEOUT_SECS", self.archive.read_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: "must be greater than 0".to_string(),
                });
            }
        }
        if self.archive.max_content_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "ARCHIVE_MAX_CONTENT_SIZE".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        match Url::parse(&self.archive.contact_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::InvalidValue {
                    name: "ARCHIVE_CONTACT_URL".to_string(),
                    message: format!(
                        "must be an http(s) URL, got '{}'",
                        self.archive.contact_url
                    ),
                });
            }
        }
        Ok(())
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    optional_env(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    optional_env(name).unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}
