use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::rate_limiter::DomainRateLimiter;
use super::{ArchiveError, ArchiveState, Archiver, FailureKind};
use crate::config::Config;
use crate::constants::UNEXPECTED_ERROR_MESSAGE;
use crate::db::{get_archive_by_link_id, get_archives_in_state, get_current_state, get_link, Database};
use crate::jobs::{ArchiveJob, ArchiveJobRunner, JobQueue, JobReceiver};

/// Upper bound on archives re-queued per state at startup.
const RECOVERY_BATCH: i64 = 10_000;

/// Archive worker pool.
///
/// Pulls jobs off the queue and runs each in its own task, bounded globally
/// by `worker_concurrency` and per host by `per_domain_concurrency`.
pub struct ArchiveWorker {
    db: Database,
    runner: ArchiveJobRunner,
    semaphore: Arc<Semaphore>,
    domain_limiter: Arc<DomainRateLimiter>,
}

impl ArchiveWorker {
    #[must_use]
    pub fn new(config: &Config, db: Database, runner: ArchiveJobRunner) -> Self {
        Self {
            db,
            runner,
            semaphore: Arc::new(Semaphore::new(config.worker_concurrency)),
            domain_limiter: Arc::new(DomainRateLimiter::new(config.per_domain_concurrency)),
        }
    }

    /// Re-queue archives whose jobs were lost when the process last stopped.
    ///
    /// Archives left in `processing` are picked up again; the state machine
    /// allows `processing -> processing`, so the next attempt simply records
    /// itself on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be queried.
    pub async fn recover_on_startup(&self, queue: &JobQueue) -> Result<usize> {
        let mut count = 0;
        for state in [ArchiveState::Processing, ArchiveState::Pending] {
            let archives = get_archives_in_state(self.db.pool(), state, RECOVERY_BATCH)
                .await
                .with_context(|| format!("Failed to load {state} archives"))?;
            for archive in archives {
                if queue.enqueue(ArchiveJob::new(archive.link_id)).is_err() {
                    warn!("Job queue closed during recovery");
                    return Ok(count);
                }
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "Re-queued unfinished archives");
        }
        Ok(count)
    }

    /// Run until every [`JobQueue`] is dropped, then wait for in-flight jobs.
    pub async fn run(&self, mut jobs: JobReceiver) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                job = jobs.recv() => {
                    let Some(job) = job else { break };
                    self.spawn_job(&mut tasks, job).await;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Worker task failed: {e}");
                    }
                }
            }
        }

        debug!(remaining = tasks.len(), "Job queue closed, draining");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {e}");
            }
        }
        info!("Archive worker stopped");
    }

    async fn spawn_job(&self, tasks: &mut JoinSet<()>, job: ArchiveJob) {
        let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(link_id = job.link_id, "Worker semaphore closed: {e}");
                return;
            }
        };
        let runner = self.runner.clone();
        let domain_limiter = Arc::clone(&self.domain_limiter);
        let db = self.db.clone();

        tasks.spawn(async move {
            let _global_permit = permit;

            let domain = match get_link(db.pool(), job.link_id).await {
                Ok(Some(link)) => DomainRateLimiter::domain_key(&link.url),
                Ok(None) => String::new(),
                Err(e) => {
                    error!(link_id = job.link_id, "Failed to load link: {e:#}");
                    return;
                }
            };
            let _domain_permit = match domain_limiter.acquire(&domain).await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(link_id = job.link_id, "Domain limiter closed: {e}");
                    return;
                }
            };
            debug!(link_id = job.link_id, domain = %domain, "Acquired domain permit");

            let archiver = runner.archiver().clone();
            // Run the job in its own task so a panic surfaces as a JoinError here
            let joined = tokio::spawn(async move { runner.run(job).await }).await;
            match joined {
                Ok(Ok(result)) => debug!(link_id = job.link_id, ?result, "Job finished"),
                Ok(Err(e)) => error!(link_id = job.link_id, "Archive job failed: {e:#}"),
                Err(e) => {
                    error!(link_id = job.link_id, "Archive job panicked: {e}");
                    if let Err(e) = fail_after_panic(&db, &archiver, job).await {
                        error!(link_id = job.link_id, "Failed to record panic: {e:#}");
                    }
                }
            }
        });
    }
}

/// Fail the job's archive with `unexpected_error` unless it already finished.
async fn fail_after_panic(db: &Database, archiver: &Archiver, job: ArchiveJob) -> Result<()> {
    let pool = db.pool();
    let Some(archive) = get_archive_by_link_id(pool, job.link_id).await? else {
        return Ok(());
    };
    match get_current_state(pool, archive.id).await? {
        Some(state) if !state.is_terminal() => {}
        _ => return Ok(()),
    }
    let err = ArchiveError::new(FailureKind::UnexpectedError, UNEXPECTED_ERROR_MESSAGE)
        .with_detail("panic", true);
    archiver.record_failure(archive.id, &err).await
}
