use anyhow::{Context, Result};
use sqlx::{SqliteConnection, SqlitePool};

use super::models::{Archive, ArchiveTransition, Link, NewLink};
use crate::archiver::ArchiveState;

// ========== Links ==========

/// Get a link by ID.
pub async fn get_link(pool: &SqlitePool, id: i64) -> Result<Option<Link>> {
    sqlx::query_as("SELECT * FROM links WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch link")
}

/// Insert a link together with its pending archive.
///
/// Both rows and the archive's initial `pending` transition are written in one
/// transaction, so a link never exists without an archive. Returns
/// `(link_id, archive_id)`.
pub async fn insert_link_with_archive(pool: &SqlitePool, link: &NewLink) -> Result<(i64, i64)> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let result = sqlx::query("INSERT INTO links (url, notes) VALUES (?, ?)")
        .bind(&link.url)
        .bind(&link.notes)
        .execute(&mut *tx)
        .await
        .context("Failed to insert link")?;
    let link_id = result.last_insert_rowid();

    let archive_id = insert_pending_archive(&mut tx, link_id).await?;

    tx.commit().await.context("Failed to commit link insert")?;
    Ok((link_id, archive_id))
}

/// Delete a link. Its archive and transition history go with it.
///
/// Returns whether a link was deleted.
pub async fn delete_link(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM links WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete link")?;

    Ok(result.rows_affected() > 0)
}

// ========== Archives ==========

async fn insert_pending_archive(conn: &mut SqliteConnection, link_id: i64) -> Result<i64> {
    let result = sqlx::query("INSERT INTO archives (link_id) VALUES (?)")
        .bind(link_id)
        .execute(&mut *conn)
        .await
        .context("Failed to insert archive")?;
    let archive_id = result.last_insert_rowid();

    sqlx::query(
        r"
        INSERT INTO archive_transitions (archive_id, to_state, metadata, sort_key, most_recent)
        VALUES (?, ?, '{}', 0, 1)
        ",
    )
    .bind(archive_id)
    .bind(ArchiveState::INITIAL.as_str())
    .execute(&mut *conn)
    .await
    .context("Failed to insert initial transition")?;

    Ok(archive_id)
}

/// Get an archive by ID.
pub async fn get_archive(pool: &SqlitePool, id: i64) -> Result<Option<Archive>> {
    sqlx::query_as("SELECT * FROM archives WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch archive")
}

/// Get the archive for a link.
pub async fn get_archive_by_link_id(pool: &SqlitePool, link_id: i64) -> Result<Option<Archive>> {
    sqlx::query_as("SELECT * FROM archives WHERE link_id = ?")
        .bind(link_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch archive by link")
}

/// Archives whose current state is `state`, oldest first.
pub async fn get_archives_in_state(
    pool: &SqlitePool,
    state: ArchiveState,
    limit: i64,
) -> Result<Vec<Archive>> {
    sqlx::query_as(
        r"
        SELECT a.* FROM archives a
        JOIN archive_transitions t ON t.archive_id = a.id AND t.most_recent = 1
        WHERE t.to_state = ?
        ORDER BY a.created_at ASC, a.id ASC
        LIMIT ?
        ",
    )
    .bind(state.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch archives by state")
}

// ========== Transitions ==========

/// The current state of an archive, derived from its most recent transition.
pub async fn get_current_state(pool: &SqlitePool, archive_id: i64) -> Result<Option<ArchiveState>> {
    Ok(get_last_transition(pool, archive_id)
        .await?
        .and_then(|t| t.state()))
}

/// The transition flagged `most_recent`.
pub async fn get_last_transition(
    pool: &SqlitePool,
    archive_id: i64,
) -> Result<Option<ArchiveTransition>> {
    sqlx::query_as(
        "SELECT * FROM archive_transitions WHERE archive_id = ? AND most_recent = 1",
    )
    .bind(archive_id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch last transition")
}

/// Full transition history of an archive in order.
pub async fn get_transitions(pool: &SqlitePool, archive_id: i64) -> Result<Vec<ArchiveTransition>> {
    sqlx::query_as(
        "SELECT * FROM archive_transitions WHERE archive_id = ? ORDER BY sort_key ASC",
    )
    .bind(archive_id)
    .fetch_all(pool)
    .await
    .context("Failed to fetch transitions")
}

/// Transitions of an archive into a given state, in order.
pub async fn get_transitions_to_state(
    pool: &SqlitePool,
    archive_id: i64,
    state: ArchiveState,
) -> Result<Vec<ArchiveTransition>> {
    sqlx::query_as(
        r"
        SELECT * FROM archive_transitions
        WHERE archive_id = ? AND to_state = ?
        ORDER BY sort_key ASC
        ",
    )
    .bind(archive_id)
    .bind(state.as_str())
    .fetch_all(pool)
    .await
    .context("Failed to fetch transitions by state")
}
