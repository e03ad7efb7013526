//! Retry wrapper around the archiver.
//!
//! The archiver reports timeouts as [`ArchiveOutcome::Retryable`] and leaves
//! the archive in `processing`. This shell retries those with exponential
//! backoff and, once attempts run out, records the terminal failure itself.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::queue::ArchiveJob;
use crate::archiver::{ArchiveError, ArchiveOutcome, Archiver};
use crate::db::{get_archive_by_link_id, get_current_state, get_link, Database};

/// What became of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Completed,
    Failed,
    /// Every attempt timed out; the archive is now `failed`/`network_error`.
    Exhausted { attempts: u32 },
    /// Nothing to do: the link or archive is gone, or already terminal.
    Discarded,
}

#[derive(Debug, Clone)]
pub struct ArchiveJobRunner {
    db: Database,
    archiver: Archiver,
}

impl ArchiveJobRunner {
    #[must_use]
    pub const fn new(db: Database, archiver: Archiver) -> Self {
        Self { db, archiver }
    }

    #[must_use]
    pub const fn archiver(&self) -> &Archiver {
        &self.archiver
    }

    /// Run one job to completion, retries included.
    ///
    /// # Errors
    ///
    /// Returns an error only for database failures while looking the job
    /// up or recording exhaustion.
    pub async fn run(&self, job: ArchiveJob) -> Result<JobResult> {
        let pool = self.db.pool();

        let Some(link) = get_link(pool, job.link_id).await? else {
            debug!(link_id = job.link_id, "Link no longer exists, discarding job");
            return Ok(JobResult::Discarded);
        };
        let Some(archive) = get_archive_by_link_id(pool, link.id).await? else {
            debug!(link_id = link.id, "Link has no archive record, discarding job");
            return Ok(JobResult::Discarded);
        };

        match get_current_state(pool, archive.id).await? {
            Some(state) if state.is_terminal() => {
                warn!(
                    archive_id = archive.id,
                    link_id = link.id,
                    state = %state,
                    "Archive already terminal, discarding job"
                );
                return Ok(JobResult::Discarded);
            }
            Some(_) => {}
            None => {
                warn!(archive_id = archive.id, "Archive has no state history, discarding job");
                return Ok(JobResult::Discarded);
            }
        }

        let config = self.archiver.config();
        let max_attempts = config.max_retries.max(1);
        let mut attempt = 1;

        loop {
            match self.archiver.archive(archive.id, &link.url, attempt).await {
                ArchiveOutcome::Completed => return Ok(JobResult::Completed),
                ArchiveOutcome::Failed(_) => return Ok(JobResult::Failed),
                ArchiveOutcome::Retryable(err) if attempt >= max_attempts => {
                    self.record_exhaustion(archive.id, &link.url, attempt, err)
                        .await?;
                    return Ok(JobResult::Exhausted { attempts: attempt });
                }
                ArchiveOutcome::Retryable(err) => {
                    let delay = config.backoff_delay(attempt - 1);
                    info!(
                        archive_id = archive.id,
                        url = %link.url,
                        attempt,
                        max_attempts,
                        delay = ?delay,
                        error = %err.message,
                        "Retrying after timeout"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn record_exhaustion(
        &self,
        archive_id: i64,
        url: &str,
        attempts: u32,
        last_error: ArchiveError,
    ) -> Result<()> {
        warn!(
            archive_id,
            url,
            attempts,
            error = %last_error.message,
            "Giving up after repeated timeouts"
        );
        let mut err = ArchiveError::network(format!(
            "Gave up after {attempts} attempts: {}",
            last_error.message
        ));
        err.details = last_error.details;
        let err = err.with_detail("attempts", attempts);

        self.archiver
            .record_failure(archive_id, &err)
            .await
            .with_context(|| format!("Failed to record exhaustion for archive {archive_id}"))?;
        Ok(())
    }
}
