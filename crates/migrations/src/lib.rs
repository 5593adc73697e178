//! # schemata-migrations
//!
//! A batch-aware schema migration engine. Migration files are discovered on
//! disk, applied in canonical-name order, recorded in a ledger table, and
//! rolled back batch by batch.
//!
//! The pieces:
//! - [`Migrator`] orchestrates run, rollback, reset, refresh, fresh and status
//! - [`MigrationRepository`] owns the ledger table
//! - [`MigrationLoader`] turns files into [`Migration`] instances
//! - [`MigrationCreator`] scaffolds new migration files from stubs
//! - [`ConnectionResolver`] maps connection names to live connections
//! - [`MigrationLock`] serialises concurrent migrators

pub mod backends;
pub mod creator;
pub mod definitions;
pub mod error;
pub mod loader;
pub mod lock;
pub mod migration;
pub mod migrator;
pub mod repository;
pub mod resolver;
pub mod schema;
pub mod seeding;

pub use backends::{
    connect, mask_database_url, DatabaseBackendType, DatabaseConnection, DatabasePoolConfig, DatabaseRow,
    DatabaseTransaction, DatabaseValue, PostgresConnection, SqlDialect, SqliteConnection,
};
pub use creator::{MigrationCreator, TableGuesser};
pub use definitions::{
    ExecutedMigration, MigrationDirection, MigrationFile, MigrationRecord, MigrationReport, MigrationStatus,
    RefreshOptions, RollbackOptions, RunOptions, SkippedMigration,
};
pub use error::{MigrationError, MigrationResult};
pub use loader::{DefaultLoader, MigrationLoader, MigrationRegistry, SqlFileLoader, SqlMigration};
pub use lock::{MigrationLock, NoopLock, PostgresAdvisoryLock};
pub use migration::Migration;
pub use migrator::Migrator;
pub use repository::{DatabaseMigrationRepository, MigrationRepository, DEFAULT_MIGRATIONS_TABLE};
pub use resolver::{ConnectionManager, ConnectionResolver};
pub use schema::{Blueprint, Schema};
pub use seeding::{Seeder, SeederRunner, SqlFileSeeder};
