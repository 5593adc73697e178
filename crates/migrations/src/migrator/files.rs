//! Migration file discovery

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::creator::strip_timestamp;
use crate::definitions::MigrationFile;
use crate::error::{MigrationError, MigrationResult};

/// Extensions recognised when none are configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["sql"];

/// Extension of migrations compiled into the binary and served by a registry
const COMPILED_EXTENSION: &str = "rs";

/// Collect migration files from `paths`, sorted by canonical name.
///
/// Directories are searched recursively; file paths are taken as they are.
/// Paths that do not exist are ignored. Two different files sharing a
/// canonical name are rejected.
pub fn discover(paths: &[PathBuf], extensions: &[String]) -> MigrationResult<Vec<MigrationFile>> {
    let mut found: HashMap<String, MigrationFile> = HashMap::new();

    for root in paths {
        if root.is_file() {
            if let Some(file) = candidate(root, extensions) {
                insert(&mut found, file)?;
            }
            continue;
        }

        if !root.is_dir() {
            debug!(path = %root.display(), "migration path does not exist, skipping");
            continue;
        }

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(file) = candidate(entry.path(), extensions) {
                insert(&mut found, file)?;
            }
        }
    }

    let mut files: Vec<MigrationFile> = found.into_values().collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn candidate(path: &Path, extensions: &[String]) -> Option<MigrationFile> {
    let extension = path.extension().and_then(|ext| ext.to_str())?;
    if !extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(extension)) {
        return None;
    }
    let file = MigrationFile::from_path(path)?;

    // Module files such as mod.rs live next to compiled migrations
    if extension.eq_ignore_ascii_case(COMPILED_EXTENSION) && strip_timestamp(&file.name) == file.name {
        debug!(path = %path.display(), "skipping non-migration source file");
        return None;
    }
    Some(file)
}

fn insert(found: &mut HashMap<String, MigrationFile>, file: MigrationFile) -> MigrationResult<()> {
    match found.get(&file.name) {
        Some(existing) if same_file(&existing.path, &file.path) => Ok(()),
        Some(existing) => Err(MigrationError::DuplicateMigration {
            name: file.name.clone(),
            first: existing.path.clone(),
            second: file.path,
        }),
        None => {
            found.insert(file.name.clone(), file);
            Ok(())
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn extensions() -> Vec<String> {
        vec!["sql".to_string(), "rs".to_string()]
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "-- Up migration\n").unwrap();
    }

    #[test]
    fn test_discovery_is_recursive_and_sorted() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("2024_02_01_000000_create_posts_table.sql"));
        touch(&dir.path().join("billing/2024_01_01_000000_create_invoices_table.sql"));
        touch(&dir.path().join("README.md"));

        let files = discover(&[dir.path().to_path_buf()], &extensions()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["2024_01_01_000000_create_invoices_table", "2024_02_01_000000_create_posts_table"]
        );
    }

    #[test]
    fn test_file_paths_and_missing_paths() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("2024_01_01_000000_create_users_table.sql");
        touch(&file);

        let files = discover(&[file.clone(), dir.path().join("missing"), dir.path().to_path_buf()], &extensions()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, file);
    }

    #[test]
    fn test_duplicate_canonical_names_are_rejected() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        touch(&first.path().join("2024_01_01_000000_create_users_table.sql"));
        touch(&second.path().join("2024_01_01_000000_create_users_table.rs"));

        let result = discover(&[first.path().to_path_buf(), second.path().to_path_buf()], &extensions());
        match result {
            Err(MigrationError::DuplicateMigration { name, .. }) => {
                assert_eq!(name, "2024_01_01_000000_create_users_table")
            }
            other => panic!("Expected duplicate migration error, got {:?}", other),
        }
    }

    #[test]
    fn test_source_modules_next_to_compiled_migrations_are_ignored() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("2024_01_01_000000_create_users_table.rs"));
        touch(&dir.path().join("mod.rs"));
        touch(&dir.path().join("helpers.rs"));

        let files = discover(&[dir.path().to_path_buf()], &extensions()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["2024_01_01_000000_create_users_table"]);
    }

    #[test]
    fn test_default_extensions_only_pick_up_sql() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("2024_01_01_000000_create_users_table.sql"));
        touch(&dir.path().join("2024_01_02_000000_create_posts_table.rs"));

        let defaults: Vec<String> = DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect();
        let files = discover(&[dir.path().to_path_buf()], &defaults).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "2024_01_01_000000_create_users_table");
    }
}
