//! Per-host politeness for archive jobs.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, RwLock, Semaphore};
use url::Url;

/// Caps how many archive jobs hit the same host at once.
///
/// Semaphores are created lazily per host and kept for the life of the
/// limiter.
#[derive(Debug)]
pub struct DomainRateLimiter {
    per_domain_limit: usize,
    semaphores: RwLock<HashMap<String, Arc<Semaphore>>>,
}

impl DomainRateLimiter {
    #[must_use]
    pub fn new(per_domain_limit: usize) -> Self {
        Self {
            per_domain_limit,
            semaphores: RwLock::new(HashMap::new()),
        }
    }

    /// The limiter key for a URL: its lowercased host.
    ///
    /// Unparseable URLs share one bucket; the validator rejects them before
    /// any request is made anyway.
    #[must_use]
    pub fn domain_key(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .unwrap_or_default()
    }

    /// Wait for a permit for `domain`. Released on drop.
    ///
    /// # Errors
    ///
    /// Fails only if the semaphore was closed, which this type never does.
    pub async fn acquire(&self, domain: &str) -> Result<DomainPermit, AcquireError> {
        let semaphore = self.semaphore_for(domain).await;
        let permit = semaphore.acquire_owned().await?;
        Ok(DomainPermit { _permit: permit })
    }

    async fn semaphore_for(&self, domain: &str) -> Arc<Semaphore> {
        {
            let read_guard = self.semaphores.read().await;
            if let Some(sem) = read_guard.get(domain) {
                return Arc::clone(sem);
            }
        }

        let mut write_guard = self.semaphores.write().await;
        // Another task may have created it while we waited for the lock
        Arc::clone(
            write_guard
                .entry(domain.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_domain_limit))),
        )
    }

    #[cfg(test)]
    async fn domain_count(&self) -> usize {
        self.semaphores.read().await.len()
    }
}

/// Permission to work on one host.
#[derive(Debug)]
pub struct DomainPermit {
    _permit: OwnedSemaphorePermit,
}
