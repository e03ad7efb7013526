//! HTTP fetching for archival.
//!
//! A HEAD request checks the declared size, then a GET walks the redirect
//! chain by hand so every hop passes the [`UrlValidator`] before it is
//! requested. Bodies are read in chunks under the size limit.

use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::{redirect, Response, StatusCode};
use tracing::{debug, warn};
use url::Url;

use super::validator::UrlValidator;
use crate::archiver::{ArchiveError, FailureKind};
use crate::config::ArchiveConfig;
use crate::constants::{HTML_CONTENT_TYPES, REDIRECT_STATUSES};

const SIZE_CHECK_PREFIX: &str = "Size check failed";
const FETCH_PREFIX: &str = "Fetch failed";

/// How far into an HTML body a `<meta charset>` declaration is looked for.
const CHARSET_SNIFF_BYTES: usize = 1024;

/// `<meta charset="...">` and the `http-equiv` Content-Type form.
static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i-u)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#).unwrap()
});

/// A successfully fetched resource.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub body: Vec<u8>,
    pub status: u16,
    /// URL the body came from, after redirects.
    pub final_url: Url,
    pub content_type: Option<String>,
}

impl FetchedContent {
    /// Whether the Content-Type routes this response to HTML extraction.
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type.as_deref().is_some_and(is_html_content_type)
    }

    /// Encoding of the body: a byte order mark wins, then the Content-Type
    /// charset, then a `<meta charset>` near the top of the document, then
    /// UTF-8.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        if let Some((encoding, _)) = Encoding::for_bom(&self.body) {
            return encoding;
        }
        self.content_type
            .as_deref()
            .and_then(charset_param)
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .or_else(|| meta_charset(&self.body))
            .unwrap_or(UTF_8)
    }

    /// Body decoded with [`FetchedContent::encoding`], replacing invalid
    /// sequences.
    #[must_use]
    pub fn text(&self) -> String {
        let (text, _, _) = self.encoding().decode(&self.body);
        text.into_owned()
    }
}

/// The `charset` parameter of a Content-Type value.
fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c| c == '"' || c == '\''))
    })
}

fn meta_charset(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(CHARSET_SNIFF_BYTES)];
    let label = META_CHARSET.captures(head)?.get(1)?;
    Encoding::for_label(label.as_bytes())
}

/// Case-insensitive check for an HTML media type anywhere in the header value.
#[must_use]
pub fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    HTML_CONTENT_TYPES.iter().any(|t| lower.contains(t))
}

/// Fetches pages with per-hop SSRF validation.
///
/// The underlying client never follows redirects itself; [`HttpFetcher::fetch`]
/// walks the chain so each target can be validated before it is requested.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    validator: UrlValidator,
    config: ArchiveConfig,
}

impl HttpFetcher {
    /// Create a fetcher with a client built from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ArchiveConfig, validator: UrlValidator) -> Result<Self> {
        let client = Self::client_builder(&config)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, config, validator))
    }

    /// Use a caller-supplied client. It must not follow redirects.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: ArchiveConfig, validator: UrlValidator) -> Self {
        Self {
            client,
            validator,
            config,
        }
    }

    /// Client settings every archival client needs.
    #[must_use]
    pub fn client_builder(config: &ArchiveConfig) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            // A proxy would resolve hosts itself and sidestep address checks
            .no_proxy()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(config.user_agent())
    }

    /// Fetch `url`, following up to `max_redirects` validated redirects.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ArchiveError`]; timeouts are marked retryable.
    pub async fn fetch(&self, url: &str) -> Result<FetchedContent, ArchiveError> {
        let mut current = self.validator.validate(url).await?;

        self.check_declared_size(&current).await?;

        let mut redirect_count: u32 = 0;
        loop {
            let response = self
                .with_response_timeout(FETCH_PREFIX, &current, self.client.get(current.clone()).send())
                .await?;
            let status = response.status();

            if REDIRECT_STATUSES.contains(&status.as_u16()) {
                let target = self.redirect_target(&current, status, response.headers()).await?;
                redirect_count += 1;
                if redirect_count > self.config.max_redirects {
                    return Err(ArchiveError::new(
                        FailureKind::TooManyRedirects,
                        format!(
                            "Too many redirects: {redirect_count} exceeds the limit of {}",
                            self.config.max_redirects
                        ),
                    )
                    .with_detail("redirect_count", redirect_count)
                    .with_detail("max_redirects", self.config.max_redirects)
                    .with_detail("last_url", current.as_str()));
                }
                debug!(from = %current, to = %target, redirect_count, "Following redirect");
                current = target;
                continue;
            }

            if !status.is_success() {
                return Err(ArchiveError::network(format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown Status")
                ))
                .with_detail("http_status", status.as_u16())
                .with_detail("url", current.as_str()));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            let body = self.read_body(response, &current).await?;

            return Ok(FetchedContent {
                body,
                status: status.as_u16(),
                final_url: current,
                content_type,
            });
        }
    }

    /// HEAD the URL and refuse it if the declared length is over the limit.
    ///
    /// Servers that reject HEAD or omit Content-Length are let through; the
    /// body read enforces the limit again.
    async fn check_declared_size(&self, url: &Url) -> Result<(), ArchiveError> {
        let response = self
            .with_response_timeout(SIZE_CHECK_PREFIX, url, self.client.head(url.clone()).send())
            .await?;

        if !response.status().is_success() {
            debug!(url = %url, status = %response.status(), "HEAD not successful, skipping size check");
            return Ok(());
        }

        match declared_length(response.headers()) {
            Some(length) if length > self.config.max_content_size => {
                Err(self.size_error(length).with_detail("url", url.as_str()))
            }
            _ => Ok(()),
        }
    }

    /// Resolve and validate the Location of a redirect response.
    async fn redirect_target(
        &self,
        current: &Url,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<Url, ArchiveError> {
        let location = headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ArchiveError::invalid_url(format!(
                    "Redirect ({}) without a Location header",
                    status.as_u16()
                ))
                .with_detail("status", status.as_u16())
                .with_detail("current_url", current.as_str())
            })?;

        let target = current.join(location).map_err(|e| {
            ArchiveError::invalid_url(format!("Invalid redirect location '{location}': {e}"))
                .with_detail("current_url", current.as_str())
                .with_detail("location", location)
        })?;

        self.validator.validate(target.as_str()).await.map_err(|e| {
            warn!(from = %current, to = %target, kind = %e.kind, "Redirect target rejected");
            e.with_detail("current_url", current.as_str())
                .with_detail("redirect_url", target.as_str())
        })
    }

    async fn read_body(&self, mut response: Response, url: &Url) -> Result<Vec<u8>, ArchiveError> {
        let limit = self.config.max_content_size;
        if let Some(length) = declared_length(response.headers()) {
            if length > limit {
                return Err(self.size_error(length).with_detail("url", url.as_str()));
            }
        }

        let mut body = Vec::new();
        loop {
            let chunk = self
                .with_read_timeout(url, response.chunk())
                .await?
                .map_err(|e| transport_error(FETCH_PREFIX, &e, url))?;
            let Some(chunk) = chunk else {
                break;
            };
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(ArchiveError::size_limit(format!(
                    "Response body exceeds the limit of {limit} bytes"
                ))
                .with_detail("max_size", limit)
                .with_detail("url", url.as_str()));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Bound the wait for response headers by connect + read timeouts.
    async fn with_response_timeout(
        &self,
        prefix: &str,
        url: &Url,
        request: impl Future<Output = reqwest::Result<Response>>,
    ) -> Result<Response, ArchiveError> {
        let budget = self.config.connect_timeout + self.config.read_timeout;
        match tokio::time::timeout(budget, request).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(transport_error(prefix, &e, url)),
            Err(_) => Err(elapsed_error(prefix, budget, url)),
        }
    }

    async fn with_read_timeout<T>(
        &self,
        url: &Url,
        read: impl Future<Output = T>,
    ) -> Result<T, ArchiveError> {
        tokio::time::timeout(self.config.read_timeout, read)
            .await
            .map_err(|_| elapsed_error(FETCH_PREFIX, self.config.read_timeout, url))
    }

    fn size_error(&self, length: u64) -> ArchiveError {
        ArchiveError::size_limit(format!(
            "Content length {length} exceeds the limit of {} bytes",
            self.config.max_content_size
        ))
        .with_detail("content_length", length)
        .with_detail("max_size", self.config.max_content_size)
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn transport_error(prefix: &str, err: &reqwest::Error, url: &Url) -> ArchiveError {
    let message = format!("{prefix}: {}", error_chain(err));
    let error = if err.is_timeout() {
        ArchiveError::timeout(message)
    } else {
        ArchiveError::network(message)
    };
    error.with_detail("url", url.as_str())
}

fn elapsed_error(prefix: &str, budget: Duration, url: &Url) -> ArchiveError {
    ArchiveError::timeout(format!("{prefix}: timed out after {}ms", budget.as_millis()))
        .with_detail("url", url.as_str())
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}
