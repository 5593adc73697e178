//! Core Database Backend Traits
//!
//! This module defines the connection and transaction abstractions the
//! migration engine runs against, plus the value/row types crossing that
//! boundary and the per-dialect SQL the engine needs (ledger DDL, table
//! introspection, placeholders).

use async_trait::async_trait;
use crate::error::MigrationResult;

/// Abstract database connection (a pooled handle, cheap to share)
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// SQL dialect spoken by this connection
    fn dialect(&self) -> SqlDialect;

    /// Execute a statement and return affected rows count
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<DatabaseRow>>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> MigrationResult<Box<dyn DatabaseTransaction>>;

    /// Close the underlying pool
    async fn close(&self) -> MigrationResult<()>;
}

/// Abstract database transaction
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<u64>;

    /// Execute a query and return result rows within the transaction
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> MigrationResult<Vec<DatabaseRow>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrationResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrationResult<()>;
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl DatabaseValue {
    /// Integer view of the value, widening 32-bit integers
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as i64),
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// String view of the value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A fully materialised result row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl DatabaseRow {
    pub fn new(columns: Vec<String>, values: Vec<DatabaseValue>) -> Self {
        Self { columns, values }
    }

    /// Get a column value by index
    pub fn get_by_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.values.get(index)
    }

    /// Get a column value by name
    pub fn get_by_name(&self, name: &str) -> Option<&DatabaseValue> {
        self.columns
            .iter()
            .position(|column| column == name)
            .and_then(|index| self.values.get(index))
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder for the zero-based parameter index
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Quote an identifier, doubling embedded quote characters
    pub fn quote_identifier(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    /// Column definition for an auto-increment primary key
    pub fn auto_increment_primary_key(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "SERIAL PRIMARY KEY",
            SqlDialect::SQLite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    /// Query counting tables named by the single parameter in the current schema
    pub fn table_exists_sql(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => {
                "SELECT COUNT(*) AS count FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1"
            }
            SqlDialect::SQLite => {
                "SELECT COUNT(*) AS count FROM sqlite_master WHERE type = 'table' AND name = ?"
            }
        }
    }

    /// Query listing user tables in the current schema, one `name` column per row
    pub fn list_tables_sql(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => {
                "SELECT CAST(table_name AS TEXT) AS name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name"
            }
            SqlDialect::SQLite => {
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
        }
    }

    /// Statement dropping a table, cascading to dependants where supported
    pub fn drop_table_sql(&self, table: &str, if_exists: bool, cascade: bool) -> String {
        let guard = if if_exists { "IF EXISTS " } else { "" };
        let suffix = match (self, cascade) {
            (SqlDialect::PostgreSQL, true) => " CASCADE",
            _ => "",
        };
        format!("DROP TABLE {}{}{}", guard, self.quote_identifier(table), suffix)
    }
}

/// Count the tables named `table` visible through `connection`
pub async fn has_table(connection: &dyn DatabaseConnection, table: &str) -> MigrationResult<bool> {
    let rows = connection
        .fetch_all(connection.dialect().table_exists_sql(), &[DatabaseValue::from(table)])
        .await?;
    Ok(first_count(&rows) > 0)
}

/// Extract `count` from the first row of a COUNT(*) query
pub(crate) fn first_count(rows: &[DatabaseRow]) -> i64 {
    rows.first()
        .and_then(|row| row.get_by_name("count").or_else(|| row.get_by_index(0)))
        .and_then(DatabaseValue::as_i64)
        .unwrap_or(0)
}

/// Pool configuration shared by the sqlx-backed connections
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 0,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600),
            max_lifetime_seconds: Some(1800),
        }
    }
}
