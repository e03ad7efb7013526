//! Background archival jobs: an in-process queue and the retrying runner.

mod queue;
pub mod shell;

pub use queue::{channel, ArchiveJob, JobQueue, JobReceiver, QueueClosed};
pub use shell::{ArchiveJobRunner, JobResult};
