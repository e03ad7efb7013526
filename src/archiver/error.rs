//! Structured failures produced anywhere in the archival pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why an archive ended up in `failed`.
///
/// Stored verbatim as the `error_reason` of the failing transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed URL, disallowed scheme, unresolvable host, redirect without a target.
    InvalidUrl,
    /// The URL or a redirect target resolves to a private address.
    Blocked,
    /// Non-2xx response, transport failure, or timeouts that outlived every retry.
    NetworkError,
    /// Declared or streamed body larger than the configured maximum.
    SizeLimit,
    /// HTML was fetched but could not be turned into readable content.
    ExtractionError,
    /// Archival is switched off.
    Disabled,
    /// Anything not classified above.
    UnexpectedError,
    /// The redirect chain is longer than allowed.
    TooManyRedirects,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::Blocked => "blocked",
            Self::NetworkError => "network_error",
            Self::SizeLimit => "size_limit",
            Self::ExtractionError => "extraction_error",
            Self::Disabled => "disabled",
            Self::UnexpectedError => "unexpected_error",
            Self::TooManyRedirects => "too_many_redirects",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified pipeline failure: kind, human-readable message, and context.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct ArchiveError {
    pub kind: FailureKind,
    pub message: String,
    pub details: Map<String, Value>,
    retryable: bool,
}

impl ArchiveError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Map::new(),
            retryable: false,
        }
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidUrl, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Blocked, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NetworkError, message)
    }

    pub fn size_limit(message: impl Into<String>) -> Self {
        Self::new(FailureKind::SizeLimit, message)
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ExtractionError, message)
    }

    /// A connect or read timeout. The only failure the job shell retries.
    pub fn timeout(message: impl Into<String>) -> Self {
        let mut err = Self::network(message).with_detail("timeout", true);
        err.retryable = true;
        err
    }

    /// Attach a piece of context, replacing any previous value under `key`.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// HTTP status attached by the fetcher, if any.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        self.details
            .get("http_status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
    }

    /// The transition metadata recorded when this error fails an archive.
    #[must_use]
    pub fn transition_metadata(&self) -> Map<String, Value> {
        let mut metadata = self.details.clone();
        metadata.insert("error_reason".to_string(), self.kind.as_str().into());
        metadata.insert("error_message".to_string(), self.message.clone().into());
        metadata
    }
}
