//! Link creation and deletion, the boundary where archival is triggered.

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::db::{self, Database, Link, NewLink};
use crate::jobs::{ArchiveJob, JobQueue};

/// Store a link with a pending archive and queue its archival.
///
/// Archival problems never reach the caller: a failed enqueue is logged and
/// the link is still returned. The archive stays `pending` and is picked up
/// by startup recovery.
///
/// # Errors
///
/// Returns an error if the link itself cannot be stored.
pub async fn create_link(db: &Database, queue: &JobQueue, link: &NewLink) -> Result<Link> {
    let (link_id, archive_id) = db::insert_link_with_archive(db.pool(), link).await?;

    match queue.enqueue(ArchiveJob::new(link_id)) {
        Ok(()) => debug!(link_id, archive_id, "Archive job queued"),
        Err(e) => error!(link_id, archive_id, "Failed to queue archive job: {e}"),
    }

    let created = db::get_link(db.pool(), link_id)
        .await?
        .with_context(|| format!("Link {link_id} vanished right after insert"))?;
    info!(link_id, url = %created.url, "Link created");
    Ok(created)
}

/// Delete a link together with its archive and transition history.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub async fn delete_link(db: &Database, link_id: i64) -> Result<bool> {
    let deleted = db::delete_link(db.pool(), link_id).await?;
    if deleted {
        info!(link_id, "Link deleted");
    }
    Ok(deleted)
}
