//! Database migrations.

use crate::error::{FleetError, Result};
use sqlx::SqlitePool;
use tracing::{info, instrument};

const SCHEMA_VERSION: i64 = 2;

fn failed(e: sqlx::Error) -> FleetError {
    FleetError::MigrationFailed { reason: e.to_string() }
}

#[instrument(skip(pool))]
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)")
        .execute(pool)
        .await
        .map_err(failed)?;

    let current_version: i64 = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(failed)?
        .unwrap_or(0);

    if current_version >= SCHEMA_VERSION {
        info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    info!("Migrating database from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        migrate_to_v1(pool).await?;
    }

    if current_version < 2 {
        migrate_to_v2(pool).await?;
    }

    Ok(())
}

/// Current schema version recorded in the database.
pub async fn version(pool: &SqlitePool) -> Result<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .map_err(failed)?;
    Ok(version.unwrap_or(0))
}

async fn set_version(pool: &SqlitePool, version: i64) -> Result<()> {
    sqlx::query("DELETE FROM schema_version").execute(pool).await.map_err(failed)?;
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(failed)?;
    Ok(())
}

/// Stacks and deployments, stored as JSON documents.
#[instrument(skip(pool))]
async fn migrate_to_v1(pool: &SqlitePool) -> Result<()> {
    info!("Running migration to schema version 1");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stacks (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(failed)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deployments (
            stack_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            data TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(failed)?;

    set_version(pool, 1).await
}

/// Lookup indexes for `list_stacks` filters.
#[instrument(skip(pool))]
async fn migrate_to_v2(pool: &SqlitePool) -> Result<()> {
    info!("Running migration to schema version 2");

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stacks_name ON stacks(name)")
        .execute(pool)
        .await
        .map_err(failed)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stacks_status ON stacks(status)")
        .execute(pool)
        .await
        .map_err(failed)?;

    set_version(pool, 2).await
}
