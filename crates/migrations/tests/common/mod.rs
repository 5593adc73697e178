#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use schemata_migrations::backends::has_table;
use schemata_migrations::{
    ConnectionManager, DatabaseConnection, DatabaseMigrationRepository, DefaultLoader, MigrationLock,
    MigrationRegistry, MigrationRepository, MigrationResult, Migrator, SqliteConnection,
};
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub connection: Arc<dyn DatabaseConnection>,
    pub migrator: Migrator,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_registry(MigrationRegistry::new()).await
    }

    pub async fn with_registry(registry: MigrationRegistry) -> Self {
        let connection: Arc<dyn DatabaseConnection> = Arc::new(SqliteConnection::in_memory().await.unwrap());
        let resolver = Arc::new(ConnectionManager::new("default", connection.clone()));
        Self::build(connection, resolver, registry)
    }

    pub fn build(
        connection: Arc<dyn DatabaseConnection>,
        resolver: Arc<ConnectionManager>,
        registry: MigrationRegistry,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let repository = DatabaseMigrationRepository::new(resolver.clone());
        let mut migrator = Migrator::new(Box::new(repository), resolver, Arc::new(DefaultLoader::new(registry)))
            .with_extensions(["sql", "rs"]);
        migrator.path(dir.path());

        Self {
            dir,
            connection,
            migrator,
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn MigrationLock>) -> Self {
        self.migrator = self.migrator.with_lock(lock);
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a SQL migration whose up creates `table` and whose down drops it
    pub fn create_table_migration(&self, name: &str, table: &str) -> PathBuf {
        self.sql_migration(
            name,
            &format!("CREATE TABLE {} (id INTEGER PRIMARY KEY);", table),
            &format!("DROP TABLE {};", table),
        )
    }

    pub fn sql_migration(&self, name: &str, up: &str, down: &str) -> PathBuf {
        let path = self.path().join(format!("{}.sql", name));
        std::fs::write(&path, format!("-- Up migration\n{}\n\n-- Down migration\n{}\n", up, down)).unwrap();
        path
    }

    /// Placeholder file for a migration served by the registry
    pub fn registered_migration(&self, name: &str) -> PathBuf {
        let path = self.path().join(format!("{}.rs", name));
        std::fs::write(&path, "// compiled into the test binary\n").unwrap();
        path
    }

    pub async fn has_table(&self, table: &str) -> bool {
        has_table(self.connection.as_ref(), table).await.unwrap()
    }

    pub async fn ledger(&self) -> Vec<(String, i64)> {
        let batches = self.migrator.repository().get_migration_batches().await.unwrap();
        let mut rows: Vec<(String, i64)> = batches.into_iter().collect();
        rows.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        rows
    }
}

/// Lock that counts acquire/release calls
#[derive(Default)]
pub struct CountingLock {
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl CountingLock {
    pub fn counts(&self) -> (usize, usize) {
        (self.acquired.load(Ordering::SeqCst), self.released.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl MigrationLock for CountingLock {
    async fn acquire(&self) -> MigrationResult<()> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&self) -> MigrationResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
