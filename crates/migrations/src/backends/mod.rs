//! Database Backend Abstractions
//!
//! This module provides the connection abstractions the engine runs against
//! and the sqlx-backed PostgreSQL and SQLite implementations.

pub mod core;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

// Re-export core traits and types
pub use self::core::*;
pub use postgres::PostgresConnection;
pub use sqlite::SqliteConnection;

use crate::error::{MigrationError, MigrationResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect database backend type from URL
    pub fn from_url(url: &str) -> MigrationResult<Self> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("sqlite:") {
            Ok(DatabaseBackendType::SQLite)
        } else {
            Err(MigrationError::Configuration(format!(
                "Unable to detect database backend from URL: {}",
                mask_database_url(url)
            )))
        }
    }
}

impl From<DatabaseBackendType> for SqlDialect {
    fn from(backend: DatabaseBackendType) -> Self {
        match backend {
            DatabaseBackendType::PostgreSQL => SqlDialect::PostgreSQL,
            DatabaseBackendType::SQLite => SqlDialect::SQLite,
        }
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DatabaseBackendType::PostgreSQL),
            "sqlite" => Ok(DatabaseBackendType::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}

/// Open a pooled connection for `database_url`, picking the backend from its scheme
pub async fn connect(
    database_url: &str,
    config: &DatabasePoolConfig,
) -> MigrationResult<Arc<dyn DatabaseConnection>> {
    match DatabaseBackendType::from_url(database_url)? {
        DatabaseBackendType::PostgreSQL => {
            Ok(Arc::new(PostgresConnection::connect(database_url, config).await?))
        }
        DatabaseBackendType::SQLite => {
            Ok(Arc::new(SqliteConnection::connect(database_url, config).await?))
        }
    }
}

/// Hide the password part of a database URL for logging
pub fn mask_database_url(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("****")).is_ok() {
                parsed.to_string()
            } else {
                database_url.to_string()
            }
        }
        _ => database_url.to_string(),
    }
}
