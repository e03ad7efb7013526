use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    // Links table
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL,
            notes TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create links table")?;

    // Archives table, 1:1 with links
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS archives (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            link_id INTEGER NOT NULL UNIQUE REFERENCES links(id) ON DELETE CASCADE,
            content_html TEXT,
            content_text TEXT,
            title TEXT,
            description TEXT,
            image_url TEXT,
            metadata TEXT,
            error_message TEXT,
            fetched_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create archives table")?;

    // Append-only transition log
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS archive_transitions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            archive_id INTEGER NOT NULL REFERENCES archives(id) ON DELETE CASCADE,
            to_state TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            sort_key INTEGER NOT NULL,
            most_recent INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create archive_transitions table")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: transition log indexes");

    // sort_key must be unique (and is strictly increasing) per archive
    sqlx::query(
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_transitions_archive_sort_key
        ON archive_transitions(archive_id, sort_key)
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create sort_key index")?;

    // At most one most_recent row per archive
    sqlx::query(
        r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_transitions_most_recent
        ON archive_transitions(archive_id)
        WHERE most_recent = 1
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create most_recent index")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_transitions_state
        ON archive_transitions(to_state, most_recent)
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create state index")?;

    Ok(())
}
