//! SQLite Backend Implementation
//!
//! SQLite connection support for embedded deployments and the test-suite.
//! In-memory databases are pinned to a single long-lived connection so every
//! query sees the same database.

use std::str::FromStr;
use std::time::Duration;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row, Sqlite, TypeInfo, ValueRef};
use crate::error::{MigrationError, MigrationResult};
use super::core::*;

/// SQLite connection backed by a sqlx pool
#[derive(Debug, Clone)]
pub struct SqliteConnection {
    pool: Pool<Sqlite>,
}

impl SqliteConnection {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Create a pool for `database_url` (`sqlite::memory:`, `sqlite://path.db`, ...)
    pub async fn connect(database_url: &str, config: &DatabasePoolConfig) -> MigrationResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| MigrationError::Configuration(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true);

        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds));

        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(config.idle_timeout_seconds.map(Duration::from_secs))
                .max_lifetime(config.max_lifetime_seconds.map(Duration::from_secs));
        }

        let pool = pool_options.connect_with(options)
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to create SQLite pool: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Open a private in-memory database
    pub async fn in_memory() -> MigrationResult<Self> {
        Self::connect("sqlite::memory:", &DatabasePoolConfig::default()).await
    }

    /// Underlying sqlx pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for SqliteConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(&self.pool)
            .await
            .map_err(|e| MigrationError::Database(format!("Query execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<DatabaseRow>> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let rows = query.fetch_all(&self.pool)
            .await
            .map_err(|e| MigrationError::Database(format!("Query fetch failed: {}", e)))?;

        rows.iter().map(convert_row).collect()
    }

    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin()
            .await
            .map_err(|e| MigrationError::Transaction(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
    }

    async fn close(&self) -> MigrationResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn active(&mut self) -> MigrationResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx.as_mut()
            .ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64> {
        let tx = self.active()?;

        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(&mut **tx)
            .await
            .map_err(|e| MigrationError::Database(format!("Query execution failed: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<DatabaseRow>> {
        let tx = self.active()?;

        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let rows = query.fetch_all(&mut **tx)
            .await
            .map_err(|e| MigrationError::Database(format!("Query fetch failed: {}", e)))?;

        rows.iter().map(convert_row).collect()
    }

    async fn commit(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self.tx.take()
            .ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MigrationError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> MigrationResult<()> {
        let tx = self.tx.take()
            .ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))?;

        tx.rollback()
            .await
            .map_err(|e| MigrationError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

fn bind_database_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
    }
}

fn convert_row(row: &SqliteRow) -> MigrationResult<DatabaseRow> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(sqlite_value_to_database_value(row, index)?);
    }

    Ok(DatabaseRow::new(columns, values))
}

/// SQLite is dynamically typed, so dispatch on the storage class of the value itself
fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> MigrationResult<DatabaseValue> {
    let (is_null, type_name) = {
        let raw = row.try_get_raw(index)?;
        (raw.is_null(), raw.type_info().name().to_string())
    };

    if is_null {
        return Ok(DatabaseValue::Null);
    }

    let value = match type_name.as_str() {
        "INTEGER" | "INT8" | "BIGINT" => DatabaseValue::Int64(row.try_get(index)?),
        "BOOLEAN" => DatabaseValue::Bool(row.try_get(index)?),
        "REAL" => DatabaseValue::Float64(row.try_get(index)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get(index)?),
        _ => DatabaseValue::String(row.try_get(index)?),
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let conn = SqliteConnection::in_memory().await.unwrap();
        conn.execute("CREATE TABLE things (id INTEGER PRIMARY KEY, label TEXT)", &[]).await.unwrap();
        conn.execute("INSERT INTO things (label) VALUES (?)", &[DatabaseValue::from("first")]).await.unwrap();

        let rows = conn.fetch_all("SELECT id, label FROM things", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("id"), Some(&DatabaseValue::Int64(1)));
        assert_eq!(rows[0].get_by_name("label").and_then(DatabaseValue::as_str), Some("first"));
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_ddl() {
        let conn = SqliteConnection::in_memory().await.unwrap();

        let mut tx = conn.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE scratch (id INTEGER)", &[]).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(!has_table(&conn, "scratch").await.unwrap());
    }

    #[tokio::test]
    async fn test_null_values_are_mapped() {
        let conn = SqliteConnection::in_memory().await.unwrap();
        let rows = conn.fetch_all("SELECT NULL AS nothing", &[]).await.unwrap();
        assert_eq!(rows[0].get_by_name("nothing"), Some(&DatabaseValue::Null));
    }
}
