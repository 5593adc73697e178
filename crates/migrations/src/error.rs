//! Error types for the migration engine
//!
//! Every fallible operation in this crate returns [`MigrationResult`]. The
//! variants map onto the ways a workflow can stop: a missing ledger, a
//! migration that could not be found or loaded, a migration whose callback
//! failed, or a plain database/filesystem failure underneath.

use std::path::PathBuf;
use thiserror::Error;

use crate::definitions::MigrationDirection;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error types for migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The ledger table has not been created yet
    #[error("Migration table '{table}' not found. Run the install command first")]
    RepositoryMissing { table: String },

    /// Two search paths contain a migration with the same canonical name
    #[error("Duplicate migration name '{name}' found at {first} and {second}")]
    DuplicateMigration {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// A migration's `up` or `down` callback failed
    #[error("Migration {name} failed while running {direction}: {source}")]
    MigrationFailed {
        name: String,
        direction: MigrationDirection,
        #[source]
        source: Box<MigrationError>,
    },

    /// No loader could turn the file into a migration
    #[error("Unable to load migration '{name}': {reason}")]
    Unloadable { name: String, reason: String },

    /// The migration file was parsed but is not usable
    #[error("Invalid migration '{name}': {reason}")]
    InvalidMigration { name: String, reason: String },

    /// A migration or the migrator asked for a connection that is not configured
    #[error("Database connection [{0}] not configured")]
    UnknownConnection(String),

    /// A migration with the same name already exists in the target directory
    #[error("A migration named '{0}' already exists")]
    AlreadyExists(String),

    /// Database driver or query error
    #[error("Database error: {0}")]
    Database(String),

    /// Transaction lifecycle error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stub lookup or rendering error
    #[error("Template error: {0}")]
    Template(String),

    /// Lock acquisition or release failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// Invalid engine configuration (bad URL, unsupported backend, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Wrap an error raised inside a migration callback
    pub fn failed(name: &str, direction: MigrationDirection, source: MigrationError) -> Self {
        MigrationError::MigrationFailed {
            name: name.to_string(),
            direction,
            source: Box::new(source),
        }
    }

    /// Whether this error means the ledger table does not exist
    pub fn is_repository_missing(&self) -> bool {
        matches!(self, MigrationError::RepositoryMissing { .. })
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        MigrationError::Database(err.to_string())
    }
}

impl From<walkdir::Error> for MigrationError {
    fn from(err: walkdir::Error) -> Self {
        MigrationError::Io(err.into())
    }
}
