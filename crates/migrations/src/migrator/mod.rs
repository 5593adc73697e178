//! Migrator - orchestrates run, rollback, reset, refresh, fresh and status
//!
//! The migrator reconciles three things: the migration files found on the
//! configured paths, the ledger kept by a [`MigrationRepository`], and the
//! live database reached through a [`ConnectionResolver`]. Every workflow is
//! strictly sequential. Migrations run in ascending canonical-name order and
//! roll back in the order the ledger returns them.

pub mod files;
mod rollback;

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::backends::DatabaseConnection;
use crate::definitions::{
    ExecutedMigration, MigrationDirection, MigrationFile, MigrationReport, MigrationStatus, RefreshOptions,
    RollbackOptions, RunOptions,
};
use crate::error::{MigrationError, MigrationResult};
use crate::loader::MigrationLoader;
use crate::lock::{MigrationLock, NoopLock};
use crate::migration::Migration;
use crate::repository::MigrationRepository;
use crate::resolver::ConnectionResolver;
use crate::schema::Schema;

pub use files::DEFAULT_EXTENSIONS;

/// Drives migrations forward and backward
pub struct Migrator {
    repository: Box<dyn MigrationRepository>,
    resolver: Arc<dyn ConnectionResolver>,
    loader: Arc<dyn MigrationLoader>,
    lock: Arc<dyn MigrationLock>,
    paths: Vec<PathBuf>,
    extensions: Vec<String>,
    connection: Option<String>,
}

impl Migrator {
    pub fn new(
        repository: Box<dyn MigrationRepository>,
        resolver: Arc<dyn ConnectionResolver>,
        loader: Arc<dyn MigrationLoader>,
    ) -> Self {
        Self {
            repository,
            resolver,
            loader,
            lock: Arc::new(NoopLock),
            paths: Vec::new(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            connection: None,
        }
    }

    /// Guard workflows with `lock`
    pub fn with_lock(mut self, lock: Arc<dyn MigrationLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Recognised migration file extensions
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Register an additional search path used by every workflow
    pub fn path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.paths.push(path.into());
        self
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn repository(&self) -> &dyn MigrationRepository {
        self.repository.as_ref()
    }

    /// Switch the default connection for the ledger and for migrations
    /// without their own selector. `None` restores the resolver's default.
    pub fn set_connection(&mut self, name: Option<&str>) -> MigrationResult<()> {
        self.resolver.connection(name)?;
        self.repository.set_source(name.map(str::to_string));
        self.connection = name.map(str::to_string);
        Ok(())
    }

    /// Name of the connection workflows default to
    pub fn connection_name(&self) -> String {
        self.connection
            .clone()
            .unwrap_or_else(|| self.resolver.default_connection())
    }

    pub async fn repository_exists(&self) -> MigrationResult<bool> {
        self.repository.repository_exists().await
    }

    /// Create the ledger unless it exists; returns whether it was created
    pub async fn install(&self) -> MigrationResult<bool> {
        if self.repository.repository_exists().await? {
            return Ok(false);
        }
        self.repository.create_repository().await?;
        info!(connection = %self.connection_name(), "Migration table created successfully");
        Ok(true)
    }

    pub async fn delete_repository(&self) -> MigrationResult<()> {
        self.repository.delete_repository().await
    }

    pub async fn has_run_any_migrations(&self) -> MigrationResult<bool> {
        Ok(self.repository.repository_exists().await? && !self.repository.get_ran().await?.is_empty())
    }

    /// Discover migration files on the registered paths plus `paths`
    pub fn get_migration_files(&self, paths: &[PathBuf]) -> MigrationResult<Vec<MigrationFile>> {
        let mut all = self.paths.clone();
        all.extend(paths.iter().cloned());
        files::discover(&all, &self.extensions)
    }

    /// Run every pending migration
    pub async fn run(&self, paths: &[PathBuf], options: RunOptions) -> MigrationResult<MigrationReport> {
        self.locked(self.run_unlocked(paths, options)).await
    }

    /// Roll everything back, then run every migration again
    pub async fn refresh(&self, paths: &[PathBuf], options: RefreshOptions) -> MigrationResult<MigrationReport> {
        self.locked(async {
            let mut report = match options.step {
                Some(step) if step > 0 => {
                    let rollback = RollbackOptions {
                        step,
                        batch: None,
                        pretend: options.run.pretend,
                    };
                    self.rollback_unlocked(paths, rollback).await?
                }
                _ => self.reset_unlocked(paths, options.run.pretend).await?,
            };
            let rolled_back: HashSet<String> = if options.run.pretend {
                report.names().into_iter().map(str::to_string).collect()
            } else {
                HashSet::new()
            };
            report.merge(self.run_unlocked_excluding(paths, options.run, &rolled_back).await?);
            Ok(report)
        })
        .await
    }

    /// Reset, drop every table on the default connection, then run every
    /// migration.
    ///
    /// The reset reverses migrations routed to other connections, which the
    /// drop never touches.
    pub async fn fresh(&self, paths: &[PathBuf], options: RunOptions) -> MigrationResult<MigrationReport> {
        if options.pretend {
            return Err(MigrationError::Configuration(
                "fresh drops tables directly and cannot pretend".to_string(),
            ));
        }

        self.locked(async {
            let mut report = if self.repository.repository_exists().await? {
                self.reset_unlocked(paths, false).await?
            } else {
                MigrationReport::new(false)
            };

            let connection = self.resolver.connection(self.connection.as_deref())?;
            self.drop_all_tables(connection.as_ref()).await?;

            report.merge(self.run_unlocked(paths, options).await?);
            Ok(report)
        })
        .await
    }

    /// Ran/pending state of every discovered migration, ordered by name
    pub async fn status(&self, paths: &[PathBuf]) -> MigrationResult<Vec<MigrationStatus>> {
        let batches = self.repository.get_migration_batches().await?;
        let files = self.get_migration_files(paths)?;

        Ok(files
            .into_iter()
            .map(|file| {
                let batch = batches.get(&file.name).copied();
                MigrationStatus {
                    name: file.name,
                    ran: batch.is_some(),
                    batch,
                }
            })
            .collect())
    }

    /// Acquire the lock around `work`, releasing it on every outcome
    async fn locked<T, F>(&self, work: F) -> MigrationResult<T>
    where
        F: Future<Output = MigrationResult<T>>,
    {
        self.lock.acquire().await?;
        let outcome = work.await;
        let released = self.lock.release().await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                warn!(error = %release_err, "failed to release migration lock");
                Err(err)
            }
        }
    }

    /// Create the ledger if missing; returns whether it exists afterwards.
    /// Pretend runs never create it.
    async fn prepare_database(&self, pretend: bool) -> MigrationResult<bool> {
        if self.repository.repository_exists().await? {
            return Ok(true);
        }
        if pretend {
            return Ok(false);
        }
        self.repository.create_repository().await?;
        info!(connection = %self.connection_name(), "Migration table created successfully");
        Ok(true)
    }

    async fn run_unlocked(&self, paths: &[PathBuf], options: RunOptions) -> MigrationResult<MigrationReport> {
        self.run_unlocked_excluding(paths, options, &HashSet::new()).await
    }

    /// Run pending migrations, treating `rolled_back` as absent from the
    /// ledger. Used when a pretended rollback precedes the run.
    async fn run_unlocked_excluding(
        &self,
        paths: &[PathBuf],
        options: RunOptions,
        rolled_back: &HashSet<String>,
    ) -> MigrationResult<MigrationReport> {
        let ledger_exists = self.prepare_database(options.pretend).await?;

        let files = self.get_migration_files(paths)?;
        let ran: HashSet<String> = if ledger_exists {
            self.repository
                .get_ran()
                .await?
                .into_iter()
                .filter(|name| !rolled_back.contains(name))
                .collect()
        } else {
            HashSet::new()
        };
        let pending: Vec<MigrationFile> = files.into_iter().filter(|file| !ran.contains(&file.name)).collect();

        let start_time = Instant::now();
        let mut report = MigrationReport::new(options.pretend);

        if pending.is_empty() {
            info!("Nothing to migrate");
            return Ok(report);
        }

        let mut batch = if ledger_exists {
            self.repository.get_next_batch_number().await?
        } else {
            1
        };

        for file in &pending {
            let executed = self.run_up(file, batch, options.pretend).await?;
            report.executed.push(executed);

            if options.step {
                batch += 1;
            }
        }

        report.execution_time_ms = start_time.elapsed().as_millis();
        Ok(report)
    }

    async fn run_up(&self, file: &MigrationFile, batch: i64, pretend: bool) -> MigrationResult<ExecutedMigration> {
        let migration = self.loader.load(file).await?;

        if pretend {
            return self
                .pretend_to_run(&file.name, migration.as_ref(), MigrationDirection::Up, Some(batch))
                .await;
        }

        let (statements, execution_time_ms) = self
            .run_migration(&file.name, migration.as_ref(), MigrationDirection::Up)
            .await?;
        self.repository.log(&file.name, batch).await?;

        Ok(ExecutedMigration {
            name: file.name.clone(),
            batch: Some(batch),
            direction: MigrationDirection::Up,
            execution_time_ms,
            statements,
        })
    }

    fn resolve_connection(&self, migration: &dyn Migration) -> MigrationResult<Arc<dyn DatabaseConnection>> {
        let name = migration.connection().or(self.connection.as_deref());
        self.resolver.connection(name)
    }

    /// Execute one direction of a migration and return its statements and
    /// elapsed milliseconds.
    async fn run_migration(
        &self,
        name: &str,
        migration: &dyn Migration,
        direction: MigrationDirection,
    ) -> MigrationResult<(Vec<String>, u128)> {
        let connection = self.resolve_connection(migration)?;
        let start_time = Instant::now();
        info!(migration = name, %direction, "Migrating");

        let statements = if migration.within_transaction() {
            let mut transaction = connection.begin_transaction().await?;
            debug!(migration = name, "transaction started");

            let outcome = {
                let mut schema = Schema::transactional(&mut *transaction, connection.dialect());
                apply(migration, &mut schema, direction)
                    .await
                    .map(|_| schema.into_statements())
            };

            match outcome {
                Ok(statements) => {
                    transaction
                        .commit()
                        .await
                        .map_err(|e| MigrationError::failed(name, direction, e))?;
                    debug!(migration = name, "transaction committed");
                    statements
                }
                Err(err) => {
                    if let Err(rollback_err) = transaction.rollback().await {
                        warn!(migration = name, error = %rollback_err, "transaction rollback failed");
                    } else {
                        debug!(migration = name, "transaction rolled back");
                    }
                    return Err(MigrationError::failed(name, direction, err));
                }
            }
        } else {
            let mut schema = Schema::direct(connection.as_ref());
            apply(migration, &mut schema, direction)
                .await
                .map_err(|e| MigrationError::failed(name, direction, e))?;
            schema.into_statements()
        };

        let elapsed_ms = start_time.elapsed().as_millis();
        info!(migration = name, %direction, elapsed_ms = elapsed_ms as u64, "Migrated");
        Ok((statements, elapsed_ms))
    }

    /// Collect a migration's statements without executing them
    async fn pretend_to_run(
        &self,
        name: &str,
        migration: &dyn Migration,
        direction: MigrationDirection,
        batch: Option<i64>,
    ) -> MigrationResult<ExecutedMigration> {
        let connection = self.resolve_connection(migration)?;
        let start_time = Instant::now();

        let mut schema = Schema::pretend(connection.as_ref());
        apply(migration, &mut schema, direction)
            .await
            .map_err(|e| MigrationError::failed(name, direction, e))?;
        let statements = schema.into_statements();

        for statement in &statements {
            debug!(migration = name, %direction, "{}", statement);
        }

        Ok(ExecutedMigration {
            name: name.to_string(),
            batch,
            direction,
            execution_time_ms: start_time.elapsed().as_millis(),
            statements,
        })
    }

    /// Drop every user table, retrying tables blocked by foreign keys
    async fn drop_all_tables(&self, connection: &dyn DatabaseConnection) -> MigrationResult<()> {
        let dialect = connection.dialect();
        let rows = connection.fetch_all(dialect.list_tables_sql(), &[]).await?;
        let mut remaining: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get_by_name("name").and_then(|value| value.as_str()))
            .map(str::to_string)
            .collect();

        info!(count = remaining.len(), "Dropping all tables");

        while !remaining.is_empty() {
            let attempted = remaining.len();
            let mut blocked = Vec::new();
            let mut last_error = None;

            for table in remaining {
                let sql = dialect.drop_table_sql(&table, true, true);
                match connection.execute(&sql, &[]).await {
                    Ok(_) => debug!(table = %table, "dropped table"),
                    Err(err) => {
                        last_error = Some(err);
                        blocked.push(table);
                    }
                }
            }

            // No table could be dropped this pass
            if let Some(err) = last_error {
                if blocked.len() == attempted {
                    return Err(err);
                }
            }
            remaining = blocked;
        }

        Ok(())
    }
}

async fn apply(migration: &dyn Migration, schema: &mut Schema<'_>, direction: MigrationDirection) -> MigrationResult<()> {
    match direction {
        MigrationDirection::Up => migration.up(schema).await,
        MigrationDirection::Down => migration.down(schema).await,
    }
}
