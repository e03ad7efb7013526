//! State-machine writes.
//!
//! Every change of archive state goes through [`apply_transition`], which
//! flips the previous `most_recent` flag, appends the new transition, and
//! applies any record update inside a single SQLite transaction. Readers can
//! never see content without its transition or the other way round.

use serde_json::{Map, Value};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

use super::models::{ArchiveTransition, ArchiveUpdate};
use crate::archiver::ArchiveState;

/// Gap between consecutive sort keys.
const SORT_KEY_STEP: i64 = 10;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("transition from {from} to {to} is not allowed")]
    NotAllowed { from: ArchiveState, to: ArchiveState },
    #[error("archive {archive_id} has no transition history")]
    MissingHistory { archive_id: i64 },
    #[error("archive {archive_id} is in unknown state '{state}'")]
    UnknownState { archive_id: i64, state: String },
    #[error("failed to encode transition metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Move an archive to `to`, recording `metadata` and applying `update` atomically.
///
/// # Errors
///
/// Returns [`TransitionError::NotAllowed`] when the state machine forbids the
/// move (in particular any move out of a terminal state). Nothing is written
/// in that case.
pub async fn apply_transition(
    pool: &SqlitePool,
    archive_id: i64,
    to: ArchiveState,
    metadata: &Map<String, Value>,
    update: Option<&ArchiveUpdate>,
) -> Result<ArchiveTransition, TransitionError> {
    let metadata_json = serde_json::to_string(metadata)?;
    let mut tx = pool.begin().await?;

    // Writing first takes the write lock up front, so the read of the
    // previous state cannot go stale before the insert.
    let previous: Option<(String, i64)> = sqlx::query_as(
        r"
        UPDATE archive_transitions
        SET most_recent = 0
        WHERE archive_id = ? AND most_recent = 1
        RETURNING to_state, sort_key
        ",
    )
    .bind(archive_id)
    .fetch_optional(&mut *tx)
    .await?;

    let (from_name, last_sort_key) =
        previous.ok_or(TransitionError::MissingHistory { archive_id })?;
    let from = ArchiveState::parse(&from_name).ok_or(TransitionError::UnknownState {
        archive_id,
        state: from_name,
    })?;
    if !from.can_transition_to(to) {
        // Dropping the transaction rolls back the flag change.
        return Err(TransitionError::NotAllowed { from, to });
    }

    let transition: ArchiveTransition = sqlx::query_as(
        r"
        INSERT INTO archive_transitions (archive_id, to_state, metadata, sort_key, most_recent)
        VALUES (?, ?, ?, ?, 1)
        RETURNING *
        ",
    )
    .bind(archive_id)
    .bind(to.as_str())
    .bind(&metadata_json)
    .bind(last_sort_key + SORT_KEY_STEP)
    .fetch_one(&mut *tx)
    .await?;

    if let Some(update) = update {
        apply_update(&mut tx, archive_id, update).await?;
    }

    sqlx::query("UPDATE archives SET updated_at = datetime('now') WHERE id = ?")
        .bind(archive_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(transition)
}

async fn apply_update(
    conn: &mut SqliteConnection,
    archive_id: i64,
    update: &ArchiveUpdate,
) -> Result<(), TransitionError> {
    match update {
        ArchiveUpdate::Content(content) => {
            sqlx::query(
                r"
                UPDATE archives
                SET content_html = ?,
                    content_text = ?,
                    title = ?,
                    description = ?,
                    image_url = ?,
                    metadata = ?,
                    fetched_at = ?,
                    error_message = NULL
                WHERE id = ?
                ",
            )
            .bind(&content.content_html)
            .bind(&content.content_text)
            .bind(&content.title)
            .bind(&content.description)
            .bind(&content.image_url)
            .bind(serde_json::to_string(&content.metadata)?)
            .bind(content.fetched_at.to_rfc3339())
            .bind(archive_id)
            .execute(&mut *conn)
            .await?;
        }
        ArchiveUpdate::Failure { error_message } => {
            sqlx::query("UPDATE archives SET error_message = ? WHERE id = ?")
                .bind(error_message)
                .bind(archive_id)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}
