use thiserror::Error;
use tokio::sync::mpsc;

/// One unit of background work: archive the link with this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveJob {
    pub link_id: i64,
}

impl ArchiveJob {
    #[must_use]
    pub const fn new(link_id: i64) -> Self {
        Self { link_id }
    }
}

#[derive(Debug, Error)]
#[error("job queue is closed, dropped job for link {}", .0.link_id)]
pub struct QueueClosed(pub ArchiveJob);

/// Producer side of the job channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<ArchiveJob>,
}

impl JobQueue {
    /// Queue a job without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the worker side has gone away.
    pub fn enqueue(&self, job: ArchiveJob) -> Result<(), QueueClosed> {
        self.sender.send(job).map_err(|e| QueueClosed(e.0))
    }
}

/// Consumer side of the job channel, owned by the worker.
#[derive(Debug)]
pub struct JobReceiver {
    receiver: mpsc::UnboundedReceiver<ArchiveJob>,
}

impl JobReceiver {
    /// Next job, or `None` once every [`JobQueue`] has been dropped.
    pub async fn recv(&mut self) -> Option<ArchiveJob> {
        self.receiver.recv().await
    }
}

/// A connected queue and receiver.
#[must_use]
pub fn channel() -> (JobQueue, JobReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (JobQueue { sender }, JobReceiver { receiver })
}
