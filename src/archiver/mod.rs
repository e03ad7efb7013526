//! The archival orchestrator.
//!
//! [`Archiver::archive`] drives one pending archive through the state
//! machine: validate and fetch the URL, extract HTML or record binary
//! metadata, and land in `completed` or `failed`. Timeouts are handed back
//! as [`ArchiveOutcome::Retryable`] so the job shell can back off and retry
//! without the archive reaching a terminal state.

pub mod error;
pub mod rate_limiter;
pub mod state;
pub mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::ArchiveConfig;
use crate::constants::UNEXPECTED_ERROR_MESSAGE;
use crate::db::{apply_transition, ArchiveContent, ArchiveUpdate, Database};
use crate::extractor::ContentExtractor;
use crate::fetch::{FetchedContent, HttpFetcher};

pub use error::{ArchiveError, FailureKind};
pub use rate_limiter::DomainRateLimiter;
pub use state::ArchiveState;
pub use worker::ArchiveWorker;

/// How one archival attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveOutcome {
    /// The archive is `completed`.
    Completed,
    /// The archive is `failed` with this error recorded.
    Failed(ArchiveError),
    /// A timeout. The archive is still `processing`; the caller decides
    /// whether to try again.
    Retryable(ArchiveError),
}

impl ArchiveOutcome {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retryable(_))
    }
}

/// Drives archives through fetch and extraction.
#[derive(Debug, Clone)]
pub struct Archiver {
    db: Database,
    config: ArchiveConfig,
    fetcher: Arc<HttpFetcher>,
    extractor: ContentExtractor,
}

impl Archiver {
    #[must_use]
    pub fn new(db: Database, config: ArchiveConfig, fetcher: HttpFetcher) -> Self {
        Self {
            db,
            config,
            fetcher: Arc::new(fetcher),
            extractor: ContentExtractor::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Archive `url` into the archive record `archive_id`.
    ///
    /// `attempt` is 1-based and recorded on the `processing` transition.
    /// Never returns an error: anything unclassified fails the archive with
    /// `unexpected_error` after logging the full chain.
    pub async fn archive(&self, archive_id: i64, url: &str, attempt: u32) -> ArchiveOutcome {
        match self.try_archive(archive_id, url, attempt).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(archive_id, url, attempt, "Unexpected archival failure: {e:#}");
                let err = ArchiveError::new(FailureKind::UnexpectedError, UNEXPECTED_ERROR_MESSAGE)
                    .with_detail("attempt", attempt);
                if let Err(e) = self.record_failure(archive_id, &err).await {
                    error!(archive_id, "Failed to record unexpected failure: {e:#}");
                }
                ArchiveOutcome::Failed(err)
            }
        }
    }

    async fn try_archive(&self, archive_id: i64, url: &str, attempt: u32) -> Result<ArchiveOutcome> {
        if !self.config.enabled {
            let err = ArchiveError::new(FailureKind::Disabled, "Archival is disabled");
            info!(archive_id, url, "Archival disabled, failing archive");
            self.record_failure(archive_id, &err).await?;
            return Ok(ArchiveOutcome::Failed(err));
        }

        let mut processing = Map::new();
        processing.insert("attempt".to_string(), attempt.into());
        apply_transition(self.db.pool(), archive_id, ArchiveState::Processing, &processing, None)
            .await
            .context("Failed to mark archive as processing")?;

        debug!(archive_id, url, attempt, "Fetching");
        let fetched = match self.fetcher.fetch(url).await {
            Ok(fetched) => fetched,
            Err(err) if err.is_retryable() => {
                warn!(archive_id, url, attempt, error = %err, "Fetch timed out");
                return Ok(ArchiveOutcome::Retryable(err));
            }
            Err(err) => {
                let err = err.with_detail("attempt", attempt);
                self.fail(archive_id, url, &err).await?;
                return Ok(ArchiveOutcome::Failed(err));
            }
        };

        let content = if fetched.is_html() {
            match self.extractor.extract(&fetched.text(), &fetched.final_url) {
                Ok(extracted) => {
                    if extracted.metadata.is_empty() {
                        debug!(archive_id, url = %fetched.final_url, "Page has no title or social metadata");
                    }
                    let mut metadata = extracted.metadata.to_json_map();
                    metadata.insert("content_type".to_string(), content_type_value(&fetched));
                    metadata.insert("final_url".to_string(), fetched.final_url.as_str().into());
                    ArchiveContent {
                        content_html: Some(extracted.content_html),
                        content_text: Some(extracted.content_text),
                        title: extracted.title,
                        description: extracted.description,
                        image_url: extracted.image_url,
                        metadata,
                        fetched_at: Utc::now(),
                    }
                }
                Err(err) => {
                    let err = err
                        .with_detail("attempt", attempt)
                        .with_detail("final_url", fetched.final_url.as_str());
                    self.fail(archive_id, url, &err).await?;
                    return Ok(ArchiveOutcome::Failed(err));
                }
            }
        } else {
            binary_content(&fetched)
        };

        let mut completed = Map::new();
        completed.insert("http_status".to_string(), fetched.status.into());
        completed.insert("final_url".to_string(), fetched.final_url.as_str().into());
        completed.insert("content_type".to_string(), content_type_value(&fetched));
        completed.insert("attempt".to_string(), attempt.into());

        apply_transition(
            self.db.pool(),
            archive_id,
            ArchiveState::Completed,
            &completed,
            Some(&ArchiveUpdate::Content(content)),
        )
        .await
        .context("Failed to store archived content")?;

        info!(
            archive_id,
            url,
            final_url = %fetched.final_url,
            html = fetched.is_html(),
            bytes = fetched.body.len(),
            "Archive completed"
        );
        Ok(ArchiveOutcome::Completed)
    }

    async fn fail(&self, archive_id: i64, url: &str, err: &ArchiveError) -> Result<()> {
        warn!(
            archive_id,
            url,
            error_reason = err.kind.as_str(),
            error = %err.message,
            "Archive failed"
        );
        self.record_failure(archive_id, err).await
    }

    /// Move the archive to `failed`, storing the error's message on the record.
    pub(crate) async fn record_failure(&self, archive_id: i64, err: &ArchiveError) -> Result<()> {
        let update = ArchiveUpdate::Failure {
            error_message: err.message.clone(),
        };
        apply_transition(
            self.db.pool(),
            archive_id,
            ArchiveState::Failed,
            &err.transition_metadata(),
            Some(&update),
        )
        .await
        .context("Failed to mark archive as failed")?;
        Ok(())
    }
}

/// Binary resources keep only where they came from and what they were.
fn binary_content(fetched: &FetchedContent) -> ArchiveContent {
    let mut metadata = Map::new();
    metadata.insert("content_type".to_string(), content_type_value(fetched));
    metadata.insert("final_url".to_string(), fetched.final_url.as_str().into());
    ArchiveContent {
        content_html: None,
        content_text: None,
        title: None,
        description: None,
        image_url: None,
        metadata,
        fetched_at: Utc::now(),
    }
}

fn content_type_value(fetched: &FetchedContent) -> Value {
    fetched
        .content_type
        .as_deref()
        .map_or(Value::Null, Value::from)
}
