use super::{deployment_not_found, migrations, stack_not_found, StackFilter, StackStore};
use crate::error::{FleetError, Result};
use crate::types::{Stack, StackDeployment};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{info, instrument};

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn db_error(e: sqlx::Error) -> FleetError {
    metrics::counter!("flotilla_db_errors_total").increment(1);
    FleetError::Storage(e.to_string())
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| FleetError::Storage(format!("Failed to encode: {}", e)))
}

fn decode<T: serde::de::DeserializeOwned>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| FleetError::Storage(format!("Failed to decode: {}", e)))
}

fn unix_secs(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path` and migrate it.
    #[instrument(skip(db_path))]
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        info!("Opening state database at {:?}", db_path);

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FleetError::IoError { path: parent.to_path_buf(), source: e })?;
        }

        let path = db_path.to_str().ok_or_else(|| FleetError::InvalidConfig {
            reason: "Invalid database path".to_string(),
        })?;
        let options = SqliteConnectOptions::from_str(path)
            .map_err(db_error)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        Self::with_pool(pool).await
    }

    /// Database that lives as long as the store (for tests).
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str(":memory:").map_err(db_error)?;

        // Each connection would see its own empty database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        migrations::run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StackStore for SqliteStore {
    #[instrument(skip(self, stack), fields(stack_id = %stack.id))]
    async fn save_stack(&self, stack: &Stack) -> Result<()> {
        sqlx::query(
            "INSERT INTO stacks (id, name, status, data, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&stack.id)
        .bind(&stack.name)
        .bind(stack.status.as_str())
        .bind(encode(stack)?)
        .bind(unix_secs(stack.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_stack(&self, id: &str) -> Result<Stack> {
        let row = sqlx::query("SELECT data FROM stacks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| stack_not_found(id))?;
        decode(row.get::<&str, _>("data"))
    }

    #[instrument(skip(self, stack), fields(stack_id = %stack.id))]
    async fn update_stack(&self, stack: &Stack) -> Result<()> {
        let result = sqlx::query("UPDATE stacks SET name = ?, status = ?, data = ? WHERE id = ?")
            .bind(&stack.name)
            .bind(stack.status.as_str())
            .bind(encode(stack)?)
            .bind(&stack.id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(stack_not_found(&stack.id));
        }
        Ok(())
    }

    async fn delete_stack(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM stacks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(stack_not_found(id));
        }
        Ok(())
    }

    async fn list_stacks(&self, filter: &StackFilter) -> Result<Vec<Stack>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM stacks
            WHERE (?1 IS NULL OR name = ?1) AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at, id
            "#,
        )
        .bind(filter.name.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut stacks = rows
            .iter()
            .map(|row| decode::<Stack>(row.get::<&str, _>("data")))
            .collect::<Result<Vec<_>>>()?;
        // Sub-second ordering is only present in the document.
        stacks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(stacks)
    }

    #[instrument(skip(self, deployment), fields(stack_id = %deployment.stack_id))]
    async fn save_deployment(&self, deployment: &StackDeployment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deployments (stack_id, status, data, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(stack_id) DO UPDATE SET
                status = excluded.status, data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(&deployment.stack_id)
        .bind(deployment.status.as_str())
        .bind(encode(deployment)?)
        .bind(unix_secs(deployment.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_deployment(&self, stack_id: &str) -> Result<StackDeployment> {
        let row = sqlx::query("SELECT data FROM deployments WHERE stack_id = ?")
            .bind(stack_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| deployment_not_found(stack_id))?;
        decode(row.get::<&str, _>("data"))
    }

    async fn update_deployment(&self, deployment: &StackDeployment) -> Result<()> {
        let result =
            sqlx::query("UPDATE deployments SET status = ?, data = ?, updated_at = ? WHERE stack_id = ?")
                .bind(deployment.status.as_str())
                .bind(encode(deployment)?)
                .bind(unix_secs(deployment.updated_at))
                .bind(&deployment.stack_id)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(deployment_not_found(&deployment.stack_id));
        }
        Ok(())
    }

    async fn delete_deployment(&self, stack_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM deployments WHERE stack_id = ?")
            .bind(stack_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(deployment_not_found(stack_id));
        }
        Ok(())
    }
}
