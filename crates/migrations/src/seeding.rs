//! Database seeding
//!
//! Seeders populate data after the schema exists. Unlike migrations they keep
//! no ledger: every run executes every selected seeder again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;
use walkdir::WalkDir;

use crate::backends::DatabaseConnection;
use crate::error::{MigrationError, MigrationResult};
use crate::loader::split_sql_statements;

/// A unit of seed data
#[async_trait]
pub trait Seeder: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, connection: &dyn DatabaseConnection) -> MigrationResult<()>;
}

/// Seeder backed by a `.sql` file, executed in one transaction
pub struct SqlFileSeeder {
    name: String,
    path: PathBuf,
}

impl SqlFileSeeder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        Self { name, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Seeder for SqlFileSeeder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, connection: &dyn DatabaseConnection) -> MigrationResult<()> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut transaction = connection.begin_transaction().await?;

        for statement in split_sql_statements(&content) {
            if let Err(err) = transaction.execute(&statement, &[]).await {
                transaction.rollback().await?;
                return Err(err);
            }
        }

        transaction.commit().await
    }
}

/// Runs registered seeders followed by `.sql` seed files
#[derive(Default)]
pub struct SeederRunner {
    seeders: Vec<Arc<dyn Seeder>>,
    path: Option<PathBuf>,
}

impl SeederRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory searched for `.sql` seed files
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn register(&mut self, seeder: Arc<dyn Seeder>) -> &mut Self {
        self.seeders.push(seeder);
        self
    }

    /// Every known seeder: registered ones first, then files sorted by name
    pub fn seeders(&self) -> MigrationResult<Vec<Arc<dyn Seeder>>> {
        let mut seeders = self.seeders.clone();

        if let Some(dir) = self.path.as_deref().filter(|dir| dir.is_dir()) {
            for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
                let entry = entry?;
                let is_sql = entry.path().extension().and_then(|ext| ext.to_str()) == Some("sql");
                if entry.file_type().is_file() && is_sql {
                    seeders.push(Arc::new(SqlFileSeeder::new(entry.path())));
                }
            }
        }

        Ok(seeders)
    }

    /// Run every seeder, or only the one named `only`. Returns the names run.
    pub async fn run(&self, connection: &dyn DatabaseConnection, only: Option<&str>) -> MigrationResult<Vec<String>> {
        let mut selected = self.seeders()?;
        if let Some(name) = only {
            selected.retain(|seeder| seeder.name() == name);
            if selected.is_empty() {
                return Err(MigrationError::Configuration(format!("seeder '{}' not found", name)));
            }
        }

        let mut ran = Vec::with_capacity(selected.len());
        for seeder in selected {
            let start_time = Instant::now();
            info!(seeder = seeder.name(), "Seeding");
            seeder.run(connection).await?;
            info!(
                seeder = seeder.name(),
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                "Seeded"
            );
            ran.push(seeder.name().to_string());
        }

        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqliteConnection;
    use crate::backends::core::first_count;
    use tempfile::TempDir;

    struct CreateRoles;

    #[async_trait]
    impl Seeder for CreateRoles {
        fn name(&self) -> &str {
            "roles"
        }

        async fn run(&self, connection: &dyn DatabaseConnection) -> MigrationResult<()> {
            connection.execute("CREATE TABLE roles (name TEXT)", &[]).await?;
            connection.execute("INSERT INTO roles (name) VALUES ('admin')", &[]).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runs_registered_then_file_seeders() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("02_users.sql"),
            "INSERT INTO roles (name) VALUES ('editor');\nINSERT INTO roles (name) VALUES ('viewer');",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let conn = SqliteConnection::in_memory().await.unwrap();
        let mut runner = SeederRunner::new().with_path(dir.path());
        runner.register(Arc::new(CreateRoles));

        let ran = runner.run(&conn, None).await.unwrap();
        assert_eq!(ran, vec!["roles".to_string(), "02_users".to_string()]);

        let rows = conn.fetch_all("SELECT COUNT(*) AS count FROM roles", &[]).await.unwrap();
        assert_eq!(first_count(&rows), 3);
    }

    #[tokio::test]
    async fn test_unknown_seeder_is_an_error() {
        let conn = SqliteConnection::in_memory().await.unwrap();
        let runner = SeederRunner::new();
        assert!(runner.run(&conn, Some("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_file_seeder_rolls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.sql");
        std::fs::write(&path, "CREATE TABLE flags (id INTEGER);\nINSERT INTO missing_table VALUES (1);").unwrap();

        let conn = SqliteConnection::in_memory().await.unwrap();
        assert!(SqlFileSeeder::new(&path).run(&conn).await.is_err());
        assert!(!crate::backends::has_table(&conn, "flags").await.unwrap());
    }
}
