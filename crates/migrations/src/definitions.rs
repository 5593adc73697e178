//! Migration Definitions - Core types shared by the repository and the migrator
//!
//! Defines the migration file and ledger record types, the option structs
//! accepted by each workflow, and the reports workflows return.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A migration script discovered on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    /// Canonical name: the file name without its extension
    pub name: String,
    /// Absolute (or caller-relative) path to the script
    pub path: PathBuf,
}

impl MigrationFile {
    /// Build a migration file from a path, deriving its canonical name
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = canonical_name(&path)?;
        Some(Self { name, path })
    }

    /// File extension, if any
    pub fn extension(&self) -> Option<&str> {
        self.path.extension().and_then(|ext| ext.to_str())
    }
}

/// Canonical name of a migration path (base name without extension)
pub fn canonical_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_string())
}

/// A row of the migration ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Auto-increment id, absent for records built in memory
    pub id: Option<i64>,
    /// Canonical migration name
    pub migration: String,
    /// Batch number (for grouping migrations)
    pub batch: i64,
}

impl MigrationRecord {
    pub fn new(migration: impl Into<String>, batch: i64) -> Self {
        Self {
            id: None,
            migration: migration.into(),
            batch,
        }
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply the migration (run `up`)
    Up,
    /// Roll back the migration (run `down`)
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

/// Status line for one discovered migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    pub ran: bool,
    pub batch: Option<i64>,
}

/// Options for [`Migrator::run`](crate::Migrator::run)
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Give every migration its own batch number
    pub step: bool,
    /// Collect the statements without executing them
    pub pretend: bool,
}

/// Options for [`Migrator::rollback`](crate::Migrator::rollback)
#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackOptions {
    /// Roll back this many most-recent migrations (0 = use batch selection)
    pub step: usize,
    /// Roll back exactly this batch
    pub batch: Option<i64>,
    /// Collect the statements without executing them
    pub pretend: bool,
}

/// Options for [`Migrator::refresh`](crate::Migrator::refresh)
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    /// Roll back only this many migrations instead of resetting everything
    pub step: Option<usize>,
    /// Options for the run phase
    pub run: RunOptions,
}

/// A migration that was executed (or pretended) by a workflow
#[derive(Debug, Clone, Serialize)]
pub struct ExecutedMigration {
    pub name: String,
    /// Batch the migration was logged under (run) or removed from (rollback)
    pub batch: Option<i64>,
    pub direction: MigrationDirection,
    pub execution_time_ms: u128,
    /// Statements issued through the schema builder
    pub statements: Vec<String>,
}

/// A ledger record that a rollback could not act on
#[derive(Debug, Clone, Serialize)]
pub struct SkippedMigration {
    pub name: String,
    pub reason: String,
}

/// Result of a run, rollback, or reset workflow
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub executed: Vec<ExecutedMigration>,
    pub skipped: Vec<SkippedMigration>,
    pub pretend: bool,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationReport {
    pub(crate) fn new(pretend: bool) -> Self {
        Self {
            pretend,
            ..Default::default()
        }
    }

    /// True when the workflow found nothing to do
    pub fn is_empty(&self) -> bool {
        self.executed.is_empty() && self.skipped.is_empty()
    }

    /// Canonical names of the executed migrations, in execution order
    pub fn names(&self) -> Vec<&str> {
        self.executed.iter().map(|m| m.name.as_str()).collect()
    }

    /// Append another report, keeping execution order
    pub fn merge(&mut self, other: MigrationReport) {
        self.executed.extend(other.executed);
        self.skipped.extend(other.skipped);
        self.execution_time_ms += other.execution_time_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name_strips_extension() {
        let file =
            MigrationFile::from_path("/app/migrations/2024_01_01_000000_create_users_table.sql")
                .unwrap();
        assert_eq!(file.name, "2024_01_01_000000_create_users_table");
        assert_eq!(file.extension(), Some("sql"));
    }

    #[test]
    fn test_report_merge_keeps_order() {
        let mut first = MigrationReport::new(false);
        first.executed.push(ExecutedMigration {
            name: "a".into(),
            batch: Some(1),
            direction: MigrationDirection::Down,
            execution_time_ms: 1,
            statements: vec![],
        });
        let mut second = MigrationReport::new(false);
        second.executed.push(ExecutedMigration {
            name: "b".into(),
            batch: Some(1),
            direction: MigrationDirection::Up,
            execution_time_ms: 2,
            statements: vec![],
        });

        first.merge(second);
        assert_eq!(first.names(), vec!["a", "b"]);
        assert!(!first.is_empty());
    }
}
