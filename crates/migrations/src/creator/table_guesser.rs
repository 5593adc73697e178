//! Infer the affected table from a migration's descriptive name

use once_cell::sync::Lazy;
use regex::Regex;

const CREATE_PATTERNS: &[&str] = &[r"^create_(\w+)_table$", r"^create_(\w+)$"];

const CHANGE_PATTERNS: &[&str] = &[r".+_(?:to|from|in)_(\w+)_table$", r".+_(?:to|from|in)_(\w+)$"];

static CREATE: Lazy<Vec<Regex>> = Lazy::new(|| compile(CREATE_PATTERNS));
static CHANGE: Lazy<Vec<Regex>> = Lazy::new(|| compile(CHANGE_PATTERNS));

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|pattern| Regex::new(pattern).ok()).collect()
}

/// Name-based table inference used by `make:migration`
pub struct TableGuesser;

impl TableGuesser {
    /// Returns `(table, is_create)` for the first matching pattern.
    ///
    /// Create patterns are tried before change patterns, so
    /// `create_users_table` is a create of `users` while
    /// `add_email_to_users_table` changes `users`.
    pub fn guess(migration: &str) -> Option<(String, bool)> {
        for pattern in CREATE.iter() {
            if let Some(table) = capture(pattern, migration) {
                return Some((table, true));
            }
        }

        for pattern in CHANGE.iter() {
            if let Some(table) = capture(pattern, migration) {
                return Some((table, false));
            }
        }

        None
    }
}

fn capture(pattern: &Regex, migration: &str) -> Option<String> {
    pattern
        .captures(migration)
        .and_then(|captures| captures.get(1))
        .map(|table| table.as_str().to_string())
}
