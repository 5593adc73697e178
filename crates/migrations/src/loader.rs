//! Migration loading
//!
//! Turns a discovered [`MigrationFile`] into a runnable [`Migration`].
//! Two sources are supported: migrations compiled into the binary and
//! registered by canonical name, and plain `.sql` scripts with
//! `-- Up migration` / `-- Down migration` sections.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use tracing::warn;

use crate::definitions::MigrationFile;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::Migration;
use crate::schema::Schema;

/// Loads migrations from discovered files
#[async_trait]
pub trait MigrationLoader: Send + Sync {
    /// Build a fresh migration instance for `file`
    async fn load(&self, file: &MigrationFile) -> MigrationResult<Arc<dyn Migration>>;
}

type MigrationConstructor = Arc<dyn Fn() -> Arc<dyn Migration> + Send + Sync>;

/// Static registration of compiled migrations, keyed by canonical name
#[derive(Clone, Default)]
pub struct MigrationRegistry {
    constructors: HashMap<String, MigrationConstructor>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for the migration named `name`
    pub fn register<F, M>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: Migration + 'static,
    {
        self.constructors.insert(
            name.into(),
            Arc::new(move || Arc::new(constructor()) as Arc<dyn Migration>),
        );
        self
    }

    /// Register a migration type that can be built with `Default`
    pub fn register_default<M>(&mut self, name: impl Into<String>) -> &mut Self
    where
        M: Migration + Default + 'static,
    {
        self.register(name, M::default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Construct the migration registered under `name`
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Migration>> {
        self.constructors.get(name).map(|constructor| constructor())
    }
}

#[async_trait]
impl MigrationLoader for MigrationRegistry {
    async fn load(&self, file: &MigrationFile) -> MigrationResult<Arc<dyn Migration>> {
        self.resolve(&file.name).ok_or_else(|| MigrationError::Unloadable {
            name: file.name.clone(),
            reason: "no migration registered under this name".to_string(),
        })
    }
}

/// A migration parsed from a `.sql` script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    pub up_statements: Vec<String>,
    pub down_statements: Vec<String>,
    pub within_transaction: bool,
    pub connection: Option<String>,
}

impl SqlMigration {
    /// Parse script content into sections and directives
    pub fn parse(name: &str, content: &str) -> MigrationResult<Self> {
        let mut up_sql = Vec::new();
        let mut down_sql = Vec::new();
        let mut current_section = "";
        let mut within_transaction = true;
        let mut connection = None;

        for line in content.lines() {
            let trimmed = line.trim();

            if let Some(comment) = trimmed.strip_prefix("--") {
                let comment = comment.trim();
                let lowered = comment.to_lowercase();

                if let Some(directive) = comment.strip_prefix('@') {
                    let (key, value) = match directive.split_once(|c: char| c == ':' || c.is_whitespace()) {
                        Some((key, value)) => (key.trim().to_lowercase(), value.trim().to_string()),
                        None => (directive.trim().to_lowercase(), String::new()),
                    };
                    match key.as_str() {
                        "connection" if !value.is_empty() => connection = Some(value),
                        "no-transaction" => within_transaction = false,
                        "transaction" => within_transaction = !matches!(value.as_str(), "false" | "off" | "no"),
                        _ => {
                            return Err(MigrationError::InvalidMigration {
                                name: name.to_string(),
                                reason: format!("unknown directive '@{}'", directive.trim()),
                            })
                        }
                    }
                } else if lowered == "up" || lowered.starts_with("up migration") {
                    current_section = "up";
                } else if lowered == "down" || lowered.starts_with("down migration") {
                    current_section = "down";
                }
                // Skip comment lines
                continue;
            }

            if trimmed.is_empty() {
                continue;
            }

            match current_section {
                "up" => up_sql.push(line),
                "down" => down_sql.push(line),
                _ => {} // Before any section marker
            }
        }

        if current_section.is_empty() {
            return Err(MigrationError::InvalidMigration {
                name: name.to_string(),
                reason: "missing '-- Up migration' section".to_string(),
            });
        }

        Ok(Self {
            up_statements: split_sql_statements(&up_sql.join("\n")),
            down_statements: split_sql_statements(&down_sql.join("\n")),
            within_transaction,
            connection,
        })
    }
}

#[async_trait]
impl Migration for SqlMigration {
    async fn up(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
        for statement in &self.up_statements {
            schema.statement(statement).await?;
        }
        Ok(())
    }

    async fn down(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
        for statement in &self.down_statements {
            schema.statement(statement).await?;
        }
        Ok(())
    }

    fn within_transaction(&self) -> bool {
        self.within_transaction
    }

    fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }
}

/// Split a SQL script into statements on top-level semicolons.
///
/// The script is tokenized so semicolons inside string literals, quoted
/// identifiers and comments do not split. The original
/// text of each statement is kept verbatim.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let dialect = GenericDialect {};

    match Tokenizer::new(&dialect, sql).tokenize_with_location() {
        Ok(tokens) => {
            let mut statements = Vec::new();
            let mut start = 0;
            for token in tokens {
                if token.token == Token::SemiColon {
                    let end = byte_offset(sql, token.location).unwrap_or(sql.len());
                    push_statement(&mut statements, &sql[start..end]);
                    start = (end + 1).min(sql.len());
                }
            }
            push_statement(&mut statements, &sql[start..]);
            statements
        }
        Err(e) => {
            // If tokenizing fails, fall back to the naive approach with a warning
            warn!("SQL tokenizing failed, using naive semicolon splitting: {}", e);
            sql.split(';')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect()
        }
    }
}

fn push_statement(statements: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
}

/// Byte offset of a 1-based line/column location
fn byte_offset(sql: &str, location: Location) -> Option<usize> {
    let (mut line, mut column) = (1u64, 1u64);
    for (index, ch) in sql.char_indices() {
        if line == location.line && column == location.column {
            return Some(index);
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    None
}

/// Loads `.sql` migration scripts from disk
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlFileLoader;

#[async_trait]
impl MigrationLoader for SqlFileLoader {
    async fn load(&self, file: &MigrationFile) -> MigrationResult<Arc<dyn Migration>> {
        if file.extension() != Some("sql") {
            return Err(MigrationError::Unloadable {
                name: file.name.clone(),
                reason: format!("{} is not a .sql file", file.path.display()),
            });
        }

        let content = tokio::fs::read_to_string(&file.path).await?;
        Ok(Arc::new(SqlMigration::parse(&file.name, &content)?))
    }
}

/// Registry first, `.sql` scripts second
#[derive(Clone, Default)]
pub struct DefaultLoader {
    registry: MigrationRegistry,
}

impl DefaultLoader {
    pub fn new(registry: MigrationRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }
}

#[async_trait]
impl MigrationLoader for DefaultLoader {
    async fn load(&self, file: &MigrationFile) -> MigrationResult<Arc<dyn Migration>> {
        if let Some(migration) = self.registry.resolve(&file.name) {
            return Ok(migration);
        }

        match file.extension() {
            Some("sql") => SqlFileLoader.load(file).await,
            _ => Err(MigrationError::Unloadable {
                name: file.name.clone(),
                reason: "no migration registered under this name".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_sections_and_directives() {
        let content = "-- Migration: create_reports\n\
                       -- @connection: analytics\n\
                       -- @no-transaction\n\n\
                       -- Up migration\n\
                       CREATE TABLE reports (id INTEGER);\n\
                       CREATE INDEX idx_reports_id ON reports (id);\n\n\
                       -- Down migration\n\
                       DROP TABLE reports;\n";

        let migration = SqlMigration::parse("2024_01_01_000000_create_reports", content).unwrap();
        assert_eq!(migration.up_statements.len(), 2);
        assert_eq!(migration.down_statements, vec!["DROP TABLE reports".to_string()]);
        assert_eq!(migration.connection.as_deref(), Some("analytics"));
        assert!(!migration.within_transaction);
    }

    #[test]
    fn test_parse_rejects_unknown_directive() {
        let content = "-- @retries 3\n-- Up migration\nSELECT 1;\n";
        assert!(SqlMigration::parse("broken", content).is_err());
    }

    #[test]
    fn test_parse_requires_up_section() {
        assert!(SqlMigration::parse("empty", "CREATE TABLE t (id INTEGER);").is_err());
    }

    #[test]
    fn test_split_respects_string_literals() {
        let sql = "INSERT INTO notes (body) VALUES ('a;b');\nINSERT INTO notes (body) VALUES ('it''s');";
        let statements = split_sql_statements(sql);
        assert_eq!(
            statements,
            vec![
                "INSERT INTO notes (body) VALUES ('a;b')".to_string(),
                "INSERT INTO notes (body) VALUES ('it''s')".to_string(),
            ]
        );
    }

    #[test]
    fn test_split_without_trailing_semicolon() {
        let statements = split_sql_statements("CREATE TABLE a (id INTEGER);\nCREATE TABLE b (id INTEGER)");
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1], "CREATE TABLE b (id INTEGER)");
    }

    #[derive(Default)]
    struct Noop;

    #[async_trait]
    impl Migration for Noop {
        async fn up(&self, _schema: &mut Schema<'_>) -> MigrationResult<()> {
            Ok(())
        }

        async fn down(&self, _schema: &mut Schema<'_>) -> MigrationResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_loader_prefers_registry_then_sql() {
        let dir = TempDir::new().unwrap();
        let sql_path = dir.path().join("2024_01_02_000000_create_posts.sql");
        std::fs::write(&sql_path, "-- Up migration\nCREATE TABLE posts (id INTEGER);\n-- Down migration\nDROP TABLE posts;\n").unwrap();

        let mut registry = MigrationRegistry::new();
        registry.register_default::<Noop>("2024_01_01_000000_create_users");
        let loader = DefaultLoader::new(registry);

        let compiled = MigrationFile::from_path(dir.path().join("2024_01_01_000000_create_users.rs")).unwrap();
        assert!(loader.load(&compiled).await.is_ok());

        let script = MigrationFile::from_path(&sql_path).unwrap();
        assert!(loader.load(&script).await.is_ok());
        // Loading twice yields independent, equivalent instances
        assert!(loader.load(&script).await.is_ok());

        let unknown = MigrationFile::from_path(dir.path().join("2024_01_03_000000_unknown.rs")).unwrap();
        match loader.load(&unknown).await {
            Err(MigrationError::Unloadable { name, .. }) => assert_eq!(name, "2024_01_03_000000_unknown"),
            _ => panic!("Expected unloadable error"),
        }
    }
}
