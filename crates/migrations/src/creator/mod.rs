//! Migration scaffolding
//!
//! Writes new timestamped migration files from stubs and copies third-party
//! migration sets into a project. Nothing here touches the database.

pub mod stubs;
pub mod table_guesser;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

pub use stubs::{render_template, StubKind};
pub use table_guesser::TableGuesser;

use crate::backends::SqlDialect;
use crate::error::{MigrationError, MigrationResult};

/// Timestamp prefix format of migration file names
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H%M%S";

static TIMESTAMPED_NAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\d{4}_\d{2}_\d{2}_\d{6}_(.+)$").ok());

type PostCreateHook = Box<dyn Fn(Option<&str>, &Path) + Send + Sync>;

/// Creates migration files
#[derive(Default)]
pub struct MigrationCreator {
    stub_path: Option<PathBuf>,
    publish_source: Option<PathBuf>,
    extension: Option<String>,
    dialect: Option<SqlDialect>,
    post_create: Vec<PostCreateHook>,
}

impl MigrationCreator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory whose stub files override the built-in stubs
    pub fn with_stub_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stub_path = Some(path.into());
        self
    }

    /// Directory that `publish` copies migrations from
    pub fn with_publish_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.publish_source = Some(path.into());
        self
    }

    /// Dialect the stubs' column definitions are written for, PostgreSQL
    /// unless overridden
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Extension of created files, `sql` unless overridden
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Register a callback fired after every created file
    pub fn after_create<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(Option<&str>, &Path) + Send + Sync + 'static,
    {
        self.post_create.push(Box::new(hook));
        self
    }

    fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or("sql")
    }

    /// Create a new migration file in `dir` and return its path.
    ///
    /// `table` picks the create or update stub depending on `create`; without
    /// a table the blank stub is used.
    pub fn create(&self, name: &str, dir: &Path, table: Option<&str>, create: bool) -> MigrationResult<PathBuf> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(MigrationError::InvalidMigration {
                name,
                reason: "migration name is empty".to_string(),
            });
        }

        self.ensure_migration_doesnt_already_exist(&name, dir)?;
        fs::create_dir_all(dir)?;

        let kind = StubKind::select(table, create);
        let stub = stubs::load_stub(kind, self.stub_path.as_deref())?;

        let now = Utc::now();
        let mut context = HashMap::new();
        context.insert("name", name.clone());
        context.insert("created", now.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        let dialect = self.dialect.unwrap_or(SqlDialect::PostgreSQL);
        context.insert("primary_key", dialect.auto_increment_primary_key().to_string());
        if let Some(table) = table {
            context.insert("table", table.to_string());
        }
        let content = render_template(&stub, &context)?;

        let file_name = format!("{}_{}.{}", now.format(TIMESTAMP_FORMAT), name, self.extension());
        let path = dir.join(file_name);
        fs::write(&path, content)?;

        info!(path = %path.display(), ?kind, "created migration");
        for hook in &self.post_create {
            hook(table, &path);
        }

        Ok(path)
    }

    fn ensure_migration_doesnt_already_exist(&self, name: &str, dir: &Path) -> MigrationResult<()> {
        if !dir.is_dir() {
            return Ok(());
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if strip_timestamp(stem) == name {
                return Err(MigrationError::AlreadyExists(name.to_string()));
            }
        }
        Ok(())
    }

    /// Copy every file of the publish source into `dir`.
    ///
    /// Files already present in `dir` are left alone. `on_each` receives the
    /// source and destination of every copied file.
    pub fn publish<F>(&self, dir: &Path, mut on_each: F) -> MigrationResult<Vec<PathBuf>>
    where
        F: FnMut(&Path, &Path),
    {
        let source = self
            .publish_source
            .as_deref()
            .ok_or_else(|| MigrationError::Configuration("no publish source configured".to_string()))?;

        if !source.is_dir() {
            return Err(MigrationError::Configuration(format!(
                "publish source {} is not a directory",
                source.display()
            )));
        }

        fs::create_dir_all(dir)?;

        let mut published = Vec::new();
        for entry in WalkDir::new(source).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let destination = dir.join(entry.file_name());
            if destination.exists() {
                debug!(path = %destination.display(), "already published, skipping");
                continue;
            }

            fs::copy(entry.path(), &destination)?;
            on_each(entry.path(), &destination);
            published.push(destination);
        }

        info!(count = published.len(), target = %dir.display(), "published migrations");
        Ok(published)
    }
}

/// Lowercase snake_case form of a descriptive migration name
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Descriptive part of a canonical name
pub fn strip_timestamp(canonical: &str) -> &str {
    TIMESTAMPED_NAME
        .as_ref()
        .and_then(|pattern| pattern.captures(canonical))
        .and_then(|captures| captures.get(1))
        .map_or(canonical, |name| name.as_str())
}
