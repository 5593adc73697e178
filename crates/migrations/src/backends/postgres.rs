//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL-specific implementation of the
//! connection traits using sqlx as the underlying database driver.

use std::time::Duration;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, Pool, Postgres, Row, TypeInfo, ValueRef};
use crate::error::{MigrationError, MigrationResult};
use super::core::*;

/// PostgreSQL connection backed by a sqlx pool
#[derive(Debug, Clone)]
pub struct PostgresConnection {
    pool: Pool<Postgres>,
}

impl PostgresConnection {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Create a pool for `database_url`
    pub async fn connect(database_url: &str, config: &DatabasePoolConfig) -> MigrationResult<Self> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds));

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options.connect(database_url)
            .await
            .map_err(|e| MigrationError::Database(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Underlying sqlx pool
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
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

        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn close(&self) -> MigrationResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn active(&mut self) -> MigrationResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx.as_mut()
            .ok_or_else(|| MigrationError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
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

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
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

fn convert_row(row: &PgRow) -> MigrationResult<DatabaseRow> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(postgres_value_to_database_value(row, index)?);
    }

    Ok(DatabaseRow::new(columns, values))
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> MigrationResult<DatabaseValue> {
    let is_null = row.try_get_raw(index)?.is_null();
    if is_null {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(row.try_get::<i16, _>(index)? as i32),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float64(row.try_get::<f32, _>(index)? as f64),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        _ => {
            // Fallback: try to get as string
            let value: String = row.try_get(index)
                .map_err(|e| MigrationError::Database(format!(
                    "Failed to get value as string for type '{}': {}", type_name, e
                )))?;
            DatabaseValue::String(value)
        }
    };

    Ok(value)
}
