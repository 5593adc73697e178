//! Rollback and reset workflows

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, warn};

use super::Migrator;
use crate::definitions::{
    ExecutedMigration, MigrationDirection, MigrationFile, MigrationRecord, MigrationReport, RollbackOptions,
    SkippedMigration,
};
use crate::error::MigrationResult;

impl Migrator {
    /// Roll back the last batch, the last `step` migrations, or one batch
    pub async fn rollback(&self, paths: &[PathBuf], options: RollbackOptions) -> MigrationResult<MigrationReport> {
        self.locked(self.rollback_unlocked(paths, options)).await
    }

    /// Roll back every applied migration
    pub async fn reset(&self, paths: &[PathBuf], pretend: bool) -> MigrationResult<MigrationReport> {
        self.locked(self.reset_unlocked(paths, pretend)).await
    }

    pub(super) async fn rollback_unlocked(
        &self,
        paths: &[PathBuf],
        options: RollbackOptions,
    ) -> MigrationResult<MigrationReport> {
        let records = if options.step > 0 {
            self.repository.get_migrations(options.step).await?
        } else if let Some(batch) = options.batch.filter(|batch| *batch > 0) {
            self.repository.get_migrations_by_batch(batch).await?
        } else {
            self.repository.get_last().await?
        };

        if records.is_empty() {
            info!("Nothing to rollback");
            return Ok(MigrationReport::new(options.pretend));
        }

        self.roll_back_migrations(&records, paths, options.pretend).await
    }

    pub(super) async fn reset_unlocked(&self, paths: &[PathBuf], pretend: bool) -> MigrationResult<MigrationReport> {
        let batches = self.repository.get_migration_batches().await?;
        let records: Vec<MigrationRecord> = self
            .repository
            .get_ran()
            .await?
            .into_iter()
            .rev()
            .map(|name| {
                let batch = batches.get(&name).copied().unwrap_or(0);
                MigrationRecord::new(name, batch)
            })
            .collect();

        if records.is_empty() {
            info!("Nothing to rollback");
            return Ok(MigrationReport::new(pretend));
        }

        self.roll_back_migrations(&records, paths, pretend).await
    }

    /// Run `down` for each record in the given order.
    ///
    /// Records without a matching file are reported as skipped and stay in
    /// the ledger.
    async fn roll_back_migrations(
        &self,
        records: &[MigrationRecord],
        paths: &[PathBuf],
        pretend: bool,
    ) -> MigrationResult<MigrationReport> {
        let start_time = Instant::now();
        let mut report = MigrationReport::new(pretend);

        let files: HashMap<String, MigrationFile> = self
            .get_migration_files(paths)?
            .into_iter()
            .map(|file| (file.name.clone(), file))
            .collect();

        for record in records {
            let Some(file) = files.get(&record.migration) else {
                warn!(migration = %record.migration, batch = record.batch, "Migration not found");
                report.skipped.push(SkippedMigration {
                    name: record.migration.clone(),
                    reason: "migration file not found".to_string(),
                });
                continue;
            };

            let executed = self.run_down(file, record, pretend).await?;
            report.executed.push(executed);
        }

        report.execution_time_ms = start_time.elapsed().as_millis();
        Ok(report)
    }

    async fn run_down(
        &self,
        file: &MigrationFile,
        record: &MigrationRecord,
        pretend: bool,
    ) -> MigrationResult<ExecutedMigration> {
        let migration = self.loader.load(file).await?;

        if pretend {
            return self
                .pretend_to_run(&file.name, migration.as_ref(), MigrationDirection::Down, Some(record.batch))
                .await;
        }

        let (statements, execution_time_ms) = self
            .run_migration(&file.name, migration.as_ref(), MigrationDirection::Down)
            .await?;
        self.repository.delete(record).await?;

        Ok(ExecutedMigration {
            name: file.name.clone(),
            batch: Some(record.batch),
            direction: MigrationDirection::Down,
            execution_time_ms,
            statements,
        })
    }
}
