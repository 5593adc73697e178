//! The migration contract
//!
//! A migration is a pair of callbacks plus two pieces of routing metadata.
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use schemata_migrations::{Migration, MigrationResult, Schema};
//!
//! pub struct CreateUsersTable;
//!
//! #[async_trait]
//! impl Migration for CreateUsersTable {
//!     async fn up(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
//!         schema.create_table("users", |table| {
//!             table.id("id");
//!             table.string("email", Some(255));
//!             table.timestamps();
//!         }).await
//!     }
//!
//!     async fn down(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
//!         schema.drop_table_if_exists("users").await
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::MigrationResult;
use crate::schema::Schema;

/// A unit of schema change
#[async_trait]
pub trait Migration: Send + Sync {
    /// Apply the change
    async fn up(&self, schema: &mut Schema<'_>) -> MigrationResult<()>;

    /// Reverse the change
    async fn down(&self, schema: &mut Schema<'_>) -> MigrationResult<()>;

    /// Whether the migrator wraps the callbacks in a transaction
    fn within_transaction(&self) -> bool {
        true
    }

    /// Named connection to run against; `None` uses the migrator's default
    fn connection(&self) -> Option<&str> {
        None
    }
}
