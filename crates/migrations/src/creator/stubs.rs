//! Migration stubs and placeholder rendering

use std::collections::HashMap;
use std::path::Path;

use crate::error::{MigrationError, MigrationResult};

/// Which stub a new migration starts from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubKind {
    /// No table known
    Blank,
    /// Creates `{{table}}`
    Create,
    /// Alters `{{table}}`
    Update,
}

impl StubKind {
    pub fn select(table: Option<&str>, create: bool) -> Self {
        match (table, create) {
            (None, _) => StubKind::Blank,
            (Some(_), true) => StubKind::Create,
            (Some(_), false) => StubKind::Update,
        }
    }

    /// File name looked up in a custom stub directory
    pub fn file_name(&self) -> &'static str {
        match self {
            StubKind::Blank => "migration.stub",
            StubKind::Create => "migration.create.stub",
            StubKind::Update => "migration.update.stub",
        }
    }

    pub fn builtin(&self) -> &'static str {
        match self {
            StubKind::Blank => BLANK_STUB,
            StubKind::Create => CREATE_STUB,
            StubKind::Update => UPDATE_STUB,
        }
    }
}

/// Replace every `{{key}}` in `template` with its value from `context`
pub fn render_template(template: &str, context: &HashMap<&str, String>) -> MigrationResult<String> {
    let mut result = template.to_string();

    for (key, value) in context {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    if let Some(start) = result.find("{{") {
        if let Some(end) = result[start..].find("}}") {
            return Err(MigrationError::Template(format!(
                "unresolved placeholder {}",
                &result[start..start + end + 2]
            )));
        }
    }

    Ok(result)
}

/// Read the stub for `kind`, preferring a file in `custom_dir`
pub fn load_stub(kind: StubKind, custom_dir: Option<&Path>) -> MigrationResult<String> {
    if let Some(path) = custom_dir.map(|dir| dir.join(kind.file_name())).filter(|path| path.is_file()) {
        return read_stub(&path);
    }
    Ok(kind.builtin().to_string())
}

fn read_stub(path: &Path) -> MigrationResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| MigrationError::Template(format!("failed to read stub {}: {}", path.display(), e)))
}

pub static BLANK_STUB: &str = r#"-- Migration: {{name}}
-- Created: {{created}}

-- Up migration


-- Down migration

"#;

pub static CREATE_STUB: &str = r#"-- Migration: {{name}}
-- Created: {{created}}

-- Up migration
CREATE TABLE {{table}} (
    id {{primary_key}},
    created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Down migration
DROP TABLE IF EXISTS {{table}};
"#;

pub static UPDATE_STUB: &str = r#"-- Migration: {{name}}
-- Created: {{created}}

-- Up migration
-- ALTER TABLE {{table}} ADD COLUMN ...;

-- Down migration
-- ALTER TABLE {{table}} DROP COLUMN ...;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context(table: &str) -> HashMap<&'static str, String> {
        let mut context = HashMap::new();
        context.insert("name", "create_users_table".to_string());
        context.insert("table", table.to_string());
        context.insert("created", "2024-01-01 00:00:00 UTC".to_string());
        context.insert("primary_key", "SERIAL PRIMARY KEY".to_string());
        context
    }

    #[test]
    fn test_render_create_stub() {
        let rendered = render_template(CREATE_STUB, &context("users")).unwrap();
        assert!(rendered.contains("CREATE TABLE users ("));
        assert!(rendered.contains("id SERIAL PRIMARY KEY,"));
        assert!(rendered.contains("DROP TABLE IF EXISTS users;"));
        assert!(!rendered.contains("{{"));
    }

    #[test]
    fn test_unresolved_placeholder_is_an_error() {
        let mut context = HashMap::new();
        context.insert("name", "x".to_string());
        assert!(matches!(
            render_template("{{name}} {{table}}", &context),
            Err(MigrationError::Template(_))
        ));
    }

    #[test]
    fn test_stub_selection() {
        assert_eq!(StubKind::select(None, true), StubKind::Blank);
        assert_eq!(StubKind::select(Some("users"), true), StubKind::Create);
        assert_eq!(StubKind::select(Some("users"), false), StubKind::Update);
    }

    #[test]
    fn test_custom_stub_overrides_builtin() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("migration.create.stub"), "-- custom {{table}}\n").unwrap();

        assert_eq!(load_stub(StubKind::Create, Some(dir.path())).unwrap(), "-- custom {{table}}\n");
        assert_eq!(load_stub(StubKind::Update, Some(dir.path())).unwrap(), UPDATE_STUB);
        assert_eq!(load_stub(StubKind::Blank, None).unwrap(), BLANK_STUB);
    }
}
