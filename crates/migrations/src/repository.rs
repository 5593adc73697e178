//! Migration ledger
//!
//! The ledger is a single table recording which migrations have been applied
//! and in which batch. [`DatabaseMigrationRepository`] stores it on one of the
//! connections known to a [`ConnectionResolver`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::backends::core::first_count;
use crate::backends::{has_table, DatabaseConnection, DatabaseRow, DatabaseValue, SqlDialect};
use crate::definitions::MigrationRecord;
use crate::error::{MigrationError, MigrationResult};
use crate::resolver::ConnectionResolver;

/// Default ledger table name
pub const DEFAULT_MIGRATIONS_TABLE: &str = "migrations";

/// Persistent record of applied migrations
#[async_trait]
pub trait MigrationRepository: Send + Sync {
    /// Canonical names of applied migrations, ordered by batch then name
    async fn get_ran(&self) -> MigrationResult<Vec<String>>;

    /// The `steps` most recent records, newest first
    async fn get_migrations(&self, steps: usize) -> MigrationResult<Vec<MigrationRecord>>;

    /// Records of one batch, newest first
    async fn get_migrations_by_batch(&self, batch: i64) -> MigrationResult<Vec<MigrationRecord>>;

    /// Records of the highest batch, newest first
    async fn get_last(&self) -> MigrationResult<Vec<MigrationRecord>>;

    /// Batch number of every applied migration
    async fn get_migration_batches(&self) -> MigrationResult<BTreeMap<String, i64>>;

    /// Record that `name` was applied in `batch`
    async fn log(&self, name: &str, batch: i64) -> MigrationResult<()>;

    /// Remove the record of a rolled-back migration
    async fn delete(&self, record: &MigrationRecord) -> MigrationResult<()>;

    /// Highest batch number, or 0 when the ledger is empty
    async fn get_last_batch_number(&self) -> MigrationResult<i64>;

    async fn get_next_batch_number(&self) -> MigrationResult<i64> {
        Ok(self.get_last_batch_number().await? + 1)
    }

    /// Create the ledger table
    async fn create_repository(&self) -> MigrationResult<()>;

    async fn repository_exists(&self) -> MigrationResult<bool>;

    /// Drop the ledger table
    async fn delete_repository(&self) -> MigrationResult<()>;

    /// Select the connection holding the ledger; `None` uses the default
    fn set_source(&mut self, name: Option<String>);

    /// Connection currently holding the ledger
    fn connection(&self) -> MigrationResult<Arc<dyn DatabaseConnection>>;
}

/// Ledger stored in a database table
pub struct DatabaseMigrationRepository {
    resolver: Arc<dyn ConnectionResolver>,
    table: String,
    source: Option<String>,
}

impl DatabaseMigrationRepository {
    pub fn new(resolver: Arc<dyn ConnectionResolver>) -> Self {
        Self::with_table(resolver, DEFAULT_MIGRATIONS_TABLE)
    }

    /// Use a custom ledger table name
    pub fn with_table(resolver: Arc<dyn ConnectionResolver>, table: impl Into<String>) -> Self {
        Self {
            resolver,
            table: table.into(),
            source: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn quoted_table(&self, dialect: SqlDialect) -> String {
        dialect.quote_identifier(&self.table)
    }

    /// Run a ledger query, turning "no such table" into `RepositoryMissing`
    async fn query(
        &self,
        connection: &dyn DatabaseConnection,
        sql: &str,
        params: &[DatabaseValue],
    ) -> MigrationResult<Vec<DatabaseRow>> {
        debug!(table = %self.table, sql, "ledger query");
        match connection.fetch_all(sql, params).await {
            Ok(rows) => Ok(rows),
            Err(err) => Err(self.explain(connection, err).await),
        }
    }

    async fn explain(&self, connection: &dyn DatabaseConnection, err: MigrationError) -> MigrationError {
        match has_table(connection, &self.table).await {
            Ok(false) => MigrationError::RepositoryMissing {
                table: self.table.clone(),
            },
            _ => err,
        }
    }

    async fn select_records(&self, filter: &str, limit: Option<usize>, params: &[DatabaseValue]) -> MigrationResult<Vec<MigrationRecord>> {
        let connection = self.connection()?;
        let dialect = connection.dialect();
        let mut sql = format!(
            "SELECT id, migration, batch FROM {} WHERE {} ORDER BY batch DESC, migration DESC",
            self.quoted_table(dialect),
            filter
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = self.query(connection.as_ref(), &sql, params).await?;
        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &DatabaseRow) -> MigrationResult<MigrationRecord> {
    let migration = row
        .get_by_name("migration")
        .and_then(DatabaseValue::as_str)
        .ok_or_else(|| MigrationError::Database("ledger row is missing 'migration'".to_string()))?;
    let batch = row
        .get_by_name("batch")
        .and_then(DatabaseValue::as_i64)
        .ok_or_else(|| MigrationError::Database("ledger row is missing 'batch'".to_string()))?;

    Ok(MigrationRecord {
        id: row.get_by_name("id").and_then(DatabaseValue::as_i64),
        migration: migration.to_string(),
        batch,
    })
}

#[async_trait]
impl MigrationRepository for DatabaseMigrationRepository {
    async fn get_ran(&self) -> MigrationResult<Vec<String>> {
        let connection = self.connection()?;
        let sql = format!(
            "SELECT migration FROM {} ORDER BY batch ASC, migration ASC",
            self.quoted_table(connection.dialect())
        );

        let rows = self.query(connection.as_ref(), &sql, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_by_name("migration").and_then(DatabaseValue::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn get_migrations(&self, steps: usize) -> MigrationResult<Vec<MigrationRecord>> {
        self.select_records("batch >= 1", Some(steps), &[]).await
    }

    async fn get_migrations_by_batch(&self, batch: i64) -> MigrationResult<Vec<MigrationRecord>> {
        let dialect = self.connection()?.dialect();
        let filter = format!("batch = {}", dialect.parameter_placeholder(0));
        self.select_records(&filter, None, &[DatabaseValue::Int64(batch)]).await
    }

    async fn get_last(&self) -> MigrationResult<Vec<MigrationRecord>> {
        let last = self.get_last_batch_number().await?;
        self.get_migrations_by_batch(last).await
    }

    async fn get_migration_batches(&self) -> MigrationResult<BTreeMap<String, i64>> {
        let records = self.select_records("1 = 1", None, &[]).await?;
        Ok(records
            .into_iter()
            .map(|record| (record.migration, record.batch))
            .collect())
    }

    async fn log(&self, name: &str, batch: i64) -> MigrationResult<()> {
        let connection = self.connection()?;
        let dialect = connection.dialect();
        let sql = format!(
            "INSERT INTO {} (migration, batch) VALUES ({}, {})",
            self.quoted_table(dialect),
            dialect.parameter_placeholder(0),
            dialect.parameter_placeholder(1)
        );

        debug!(migration = name, batch, "logging migration");
        let params = [DatabaseValue::from(name), DatabaseValue::Int64(batch)];
        match connection.execute(&sql, &params).await {
            Ok(_) => Ok(()),
            Err(err) => Err(self.explain(connection.as_ref(), err).await),
        }
    }

    async fn delete(&self, record: &MigrationRecord) -> MigrationResult<()> {
        let connection = self.connection()?;
        let dialect = connection.dialect();
        let sql = format!(
            "DELETE FROM {} WHERE migration = {}",
            self.quoted_table(dialect),
            dialect.parameter_placeholder(0)
        );

        debug!(migration = %record.migration, batch = record.batch, "removing migration record");
        match connection.execute(&sql, &[DatabaseValue::from(record.migration.as_str())]).await {
            Ok(_) => Ok(()),
            Err(err) => Err(self.explain(connection.as_ref(), err).await),
        }
    }

    async fn get_last_batch_number(&self) -> MigrationResult<i64> {
        let connection = self.connection()?;
        let sql = format!(
            "SELECT COALESCE(MAX(batch), 0) AS count FROM {}",
            self.quoted_table(connection.dialect())
        );

        let rows = self.query(connection.as_ref(), &sql, &[]).await?;
        Ok(first_count(&rows))
    }

    async fn create_repository(&self) -> MigrationResult<()> {
        let connection = self.connection()?;
        let dialect = connection.dialect();
        let sql = format!(
            "CREATE TABLE {} (\n    id {},\n    migration VARCHAR(255) NOT NULL UNIQUE,\n    batch INTEGER NOT NULL\n)",
            self.quoted_table(dialect),
            dialect.auto_increment_primary_key()
        );

        debug!(table = %self.table, "creating migration repository");
        connection.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn repository_exists(&self) -> MigrationResult<bool> {
        let connection = self.connection()?;
        has_table(connection.as_ref(), &self.table).await
    }

    async fn delete_repository(&self) -> MigrationResult<()> {
        let connection = self.connection()?;
        let sql = connection.dialect().drop_table_sql(&self.table, false, false);
        match connection.execute(&sql, &[]).await {
            Ok(_) => Ok(()),
            Err(err) => Err(self.explain(connection.as_ref(), err).await),
        }
    }

    fn set_source(&mut self, name: Option<String>) {
        self.source = name;
    }

    fn connection(&self) -> MigrationResult<Arc<dyn DatabaseConnection>> {
        self.resolver.connection(self.source.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteConnection;
    use crate::resolver::ConnectionManager;

    async fn repository() -> DatabaseMigrationRepository {
        let connection: Arc<dyn DatabaseConnection> = Arc::new(SqliteConnection::in_memory().await.unwrap());
        DatabaseMigrationRepository::new(Arc::new(ConnectionManager::new("default", connection)))
    }

    #[tokio::test]
    async fn test_create_and_delete_repository() {
        let repo = repository().await;
        assert!(!repo.repository_exists().await.unwrap());

        repo.create_repository().await.unwrap();
        assert!(repo.repository_exists().await.unwrap());

        repo.delete_repository().await.unwrap();
        assert!(!repo.repository_exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_queries_report_missing_repository() {
        let repo = repository().await;
        match repo.get_ran().await {
            Err(MigrationError::RepositoryMissing { table }) => assert_eq!(table, "migrations"),
            other => panic!("Expected missing repository, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ledger_ordering_and_batches() {
        let repo = repository().await;
        repo.create_repository().await.unwrap();
        assert_eq!(repo.get_last_batch_number().await.unwrap(), 0);
        assert_eq!(repo.get_next_batch_number().await.unwrap(), 1);

        repo.log("2024_01_01_000000_create_users_table", 1).await.unwrap();
        repo.log("2024_01_02_000000_create_posts_table", 1).await.unwrap();
        repo.log("2024_01_03_000000_add_slug_to_posts_table", 2).await.unwrap();

        assert_eq!(
            repo.get_ran().await.unwrap(),
            vec![
                "2024_01_01_000000_create_users_table",
                "2024_01_02_000000_create_posts_table",
                "2024_01_03_000000_add_slug_to_posts_table",
            ]
        );
        assert_eq!(repo.get_next_batch_number().await.unwrap(), 3);

        let last: Vec<String> = repo.get_last().await.unwrap().into_iter().map(|r| r.migration).collect();
        assert_eq!(last, vec!["2024_01_03_000000_add_slug_to_posts_table"]);

        let first_batch = repo.get_migrations_by_batch(1).await.unwrap();
        assert_eq!(first_batch[0].migration, "2024_01_02_000000_create_posts_table");
        assert_eq!(first_batch[1].migration, "2024_01_01_000000_create_users_table");

        let recent = repo.get_migrations(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].batch, 2);
        assert_eq!(recent[1].migration, "2024_01_02_000000_create_posts_table");

        let batches = repo.get_migration_batches().await.unwrap();
        assert_eq!(batches.get("2024_01_01_000000_create_users_table"), Some(&1));
        assert_eq!(batches.get("2024_01_03_000000_add_slug_to_posts_table"), Some(&2));
    }

    #[tokio::test]
    async fn test_delete_removes_single_record() {
        let repo = repository().await;
        repo.create_repository().await.unwrap();
        repo.log("2024_01_01_000000_create_users_table", 1).await.unwrap();
        repo.log("2024_01_02_000000_create_posts_table", 1).await.unwrap();

        let record = MigrationRecord::new("2024_01_02_000000_create_posts_table", 1);
        repo.delete(&record).await.unwrap();

        assert_eq!(repo.get_ran().await.unwrap(), vec!["2024_01_01_000000_create_users_table"]);
    }

    #[tokio::test]
    async fn test_custom_table_and_unknown_source() {
        let connection: Arc<dyn DatabaseConnection> = Arc::new(SqliteConnection::in_memory().await.unwrap());
        let mut repo = DatabaseMigrationRepository::with_table(
            Arc::new(ConnectionManager::new("default", connection)),
            "schema_history",
        );
        repo.create_repository().await.unwrap();
        assert_eq!(repo.table(), "schema_history");
        assert!(repo.repository_exists().await.unwrap());

        repo.set_source(Some("reporting".to_string()));
        assert!(matches!(
            repo.repository_exists().await,
            Err(MigrationError::UnknownConnection(_))
        ));
    }
}
