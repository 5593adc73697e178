use std::path::PathBuf;

use anyhow::Result;
use console::style;
use schemata_migrations::creator::normalize_name;
use schemata_migrations::{DatabaseBackendType, MigrationCreator, SqlDialect, TableGuesser};

use crate::config::Config;

/// Options of `make migration`
#[derive(Debug, Clone, Default)]
pub struct MakeMigration {
    pub name: String,
    /// Table to create
    pub create: Option<String>,
    /// Table to alter
    pub table: Option<String>,
    pub paths: Vec<PathBuf>,
}

/// Resolve the target table and whether it is created.
///
/// `--create` wins over `--table`; without either the table is guessed
/// from the migration name.
pub fn resolve_table(options: &MakeMigration) -> (Option<String>, bool) {
    if let Some(table) = &options.create {
        return (Some(table.clone()), true);
    }
    if let Some(table) = &options.table {
        return (Some(table.clone()), false);
    }
    match TableGuesser::guess(&normalize_name(&options.name)) {
        Some((table, create)) => (Some(table), create),
        None => (None, false),
    }
}

/// Dialect of the default connection, when one is configured
fn default_dialect(config: &Config) -> Option<SqlDialect> {
    let url = config.connection_url(None).ok()?;
    DatabaseBackendType::from_url(url).ok().map(SqlDialect::from)
}

pub fn migration(config: &Config, options: &MakeMigration) -> Result<PathBuf> {
    let (table, create) = resolve_table(options);
    let dir = config.migration_dir(&options.paths);

    let mut creator = MigrationCreator::new();
    if let Some(stub_path) = &config.migrations.stub_path {
        creator = creator.with_stub_path(stub_path);
    }
    if let Some(dialect) = default_dialect(config) {
        creator = creator.with_dialect(dialect);
    }
    creator.after_create(|table, path| {
        if let Some(table) = table {
            tracing::debug!(table, path = %path.display(), "scaffolded migration");
        }
    });

    let path = creator.create(&options.name, &dir, table.as_deref(), create)?;
    println!("{} Created migration: {}", style("✅").green(), path.display());
    Ok(path)
}
