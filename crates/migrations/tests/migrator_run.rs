mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{CountingLock, Harness};
use schemata_migrations::backends::has_table;
use schemata_migrations::{
    ConnectionManager, DatabaseConnection, MigrationDirection, MigrationError, MigrationRegistry, MigrationResult,
    Migration, RunOptions, Schema, SqliteConnection,
};

#[derive(Default)]
struct CreatePartialThenFail;

#[async_trait]
impl Migration for CreatePartialThenFail {
    async fn up(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
        schema
            .create_table("partial", |table| {
                table.id("id");
            })
            .await?;
        schema.statement("INSERT INTO missing_table VALUES (1)").await
    }

    async fn down(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
        schema.drop_table_if_exists("partial").await
    }
}

#[derive(Default)]
struct NonTransactionalPartial;

#[async_trait]
impl Migration for NonTransactionalPartial {
    async fn up(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
        CreatePartialThenFail.up(schema).await
    }

    async fn down(&self, schema: &mut Schema<'_>) -> MigrationResult<()> {
        CreatePartialThenFail.down(schema).await
    }

    fn within_transaction(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_run_is_idempotent() {
    let harness = Harness::new().await;
    harness.create_table_migration("2024_01_01_000000_create_users_table", "users");
    harness.create_table_migration("2024_01_02_000000_create_posts_table", "posts");

    let first = harness.migrator.run(&[], RunOptions::default()).await.unwrap();
    assert_eq!(first.executed.len(), 2);

    let second = harness.migrator.run(&[], RunOptions::default()).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(harness.ledger().await.len(), 2);
}

#[tokio::test]
async fn test_run_creates_ledger_and_groups_pending_into_one_batch() {
    let harness = Harness::new().await;
    assert!(!harness.migrator.repository_exists().await.unwrap());

    harness.create_table_migration("2024_01_01_000000_create_users_table", "users");
    harness.create_table_migration("2024_01_02_000000_create_posts_table", "posts");
    harness.migrator.run(&[], RunOptions::default()).await.unwrap();
    assert!(harness.migrator.repository_exists().await.unwrap());

    harness.create_table_migration("2024_01_03_000000_create_tags_table", "tags");
    harness.create_table_migration("2024_01_04_000000_create_comments_table", "comments");
    let report = harness.migrator.run(&[], RunOptions::default()).await.unwrap();
    assert!(report.executed.iter().all(|m| m.batch == Some(2)));

    assert_eq!(
        harness.ledger().await,
        vec![
            ("2024_01_01_000000_create_users_table".to_string(), 1),
            ("2024_01_02_000000_create_posts_table".to_string(), 1),
            ("2024_01_03_000000_create_tags_table".to_string(), 2),
            ("2024_01_04_000000_create_comments_table".to_string(), 2),
        ]
    );
}

#[tokio::test]
async fn test_step_mode_gives_each_migration_its_own_batch() {
    let harness = Harness::new().await;
    harness.create_table_migration("2024_01_01_000000_create_users_table", "users");
    harness.create_table_migration("2024_01_02_000000_create_posts_table", "posts");
    harness.create_table_migration("2024_01_03_000000_create_tags_table", "tags");

    let options = RunOptions {
        step: true,
        ..Default::default()
    };
    harness.migrator.run(&[], options).await.unwrap();

    let batches: Vec<i64> = harness.ledger().await.into_iter().map(|(_, batch)| batch).collect();
    assert_eq!(batches, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_migrations_run_in_canonical_order() {
    let harness = Harness::new().await;
    // Written first and placed at the top level, but must run second
    harness.sql_migration(
        "2024_01_02_000000_add_email_to_users_table",
        "ALTER TABLE users ADD COLUMN email TEXT;",
        "ALTER TABLE users DROP COLUMN email;",
    );
    let nested = harness.path().join("accounts");
    std::fs::create_dir_all(&nested).unwrap();
    std::fs::write(
        nested.join("2024_01_01_000000_create_users_table.sql"),
        "-- Up migration\nCREATE TABLE users (id INTEGER PRIMARY KEY);\n-- Down migration\nDROP TABLE users;\n",
    )
    .unwrap();

    let report = harness.migrator.run(&[], RunOptions::default()).await.unwrap();
    assert_eq!(
        report.names(),
        vec!["2024_01_01_000000_create_users_table", "2024_01_02_000000_add_email_to_users_table"]
    );
}

#[tokio::test]
async fn test_pretend_collects_statements_without_touching_database() {
    let harness = Harness::new().await;
    harness.create_table_migration("2024_01_01_000000_create_users_table", "users");

    let options = RunOptions {
        pretend: true,
        ..Default::default()
    };
    let report = harness.migrator.run(&[], options).await.unwrap();

    assert!(report.pretend);
    assert_eq!(report.executed.len(), 1);
    assert_eq!(
        report.executed[0].statements,
        vec!["CREATE TABLE users (id INTEGER PRIMARY KEY)".to_string()]
    );
    assert!(!harness.has_table("users").await);
    assert!(!harness.migrator.repository_exists().await.unwrap());
}

#[tokio::test]
async fn test_failed_transactional_migration_rolls_back_and_stops() {
    let mut registry = MigrationRegistry::new();
    registry.register_default::<CreatePartialThenFail>("2024_01_02_000000_create_partial_table");
    let harness = Harness::with_registry(registry).await;

    harness.create_table_migration("2024_01_01_000000_create_users_table", "users");
    harness.registered_migration("2024_01_02_000000_create_partial_table");
    harness.create_table_migration("2024_01_03_000000_create_posts_table", "posts");

    let err = harness.migrator.run(&[], RunOptions::default()).await.unwrap_err();
    match err {
        MigrationError::MigrationFailed { name, direction, .. } => {
            assert_eq!(name, "2024_01_02_000000_create_partial_table");
            assert_eq!(direction, MigrationDirection::Up);
        }
        other => panic!("Expected migration failure, got {:?}", other),
    }

    assert!(harness.has_table("users").await);
    assert!(!harness.has_table("partial").await);
    assert!(!harness.has_table("posts").await);
    assert_eq!(
        harness.ledger().await,
        vec![("2024_01_01_000000_create_users_table".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_non_transactional_migration_keeps_partial_changes() {
    let mut registry = MigrationRegistry::new();
    registry.register_default::<NonTransactionalPartial>("2024_01_01_000000_create_partial_table");
    let harness = Harness::with_registry(registry).await;
    harness.registered_migration("2024_01_01_000000_create_partial_table");

    assert!(harness.migrator.run(&[], RunOptions::default()).await.is_err());

    assert!(harness.has_table("partial").await);
    assert!(harness.ledger().await.is_empty());
}

#[tokio::test]
async fn test_unregistered_compiled_migration_is_unloadable() {
    let harness = Harness::new().await;
    harness.registered_migration("2024_01_01_000000_create_users_table");

    match harness.migrator.run(&[], RunOptions::default()).await {
        Err(MigrationError::Unloadable { name, .. }) => assert_eq!(name, "2024_01_01_000000_create_users_table"),
        other => panic!("Expected unloadable error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_module_files_beside_compiled_migrations_are_not_run() {
    let harness = Harness::new().await;
    std::fs::write(harness.path().join("mod.rs"), "mod m2024_01_01_000000_create_users_table;\n").unwrap();
    harness.create_table_migration("2024_01_01_000000_create_users_table", "users");

    let report = harness.migrator.run(&[], RunOptions::default()).await.unwrap();
    assert_eq!(report.names(), vec!["2024_01_01_000000_create_users_table"]);
}

#[tokio::test]
async fn test_duplicate_names_across_paths_are_fatal() {
    let harness = Harness::new().await;
    harness.create_table_migration("2024_01_01_000000_create_users_table", "users");

    let vendor = tempfile::TempDir::new().unwrap();
    std::fs::write(
        vendor.path().join("2024_01_01_000000_create_users_table.sql"),
        "-- Up migration\nCREATE TABLE accounts (id INTEGER);\n",
    )
    .unwrap();

    let result = harness.migrator.run(&[vendor.path().to_path_buf()], RunOptions::default()).await;
    assert!(matches!(result, Err(MigrationError::DuplicateMigration { .. })));
    assert!(!harness.has_table("users").await);
}

#[tokio::test]
async fn test_migrations_route_to_named_connections() {
    let primary: Arc<dyn DatabaseConnection> = Arc::new(SqliteConnection::in_memory().await.unwrap());
    let analytics: Arc<dyn DatabaseConnection> = Arc::new(SqliteConnection::in_memory().await.unwrap());
    let resolver = Arc::new(ConnectionManager::new("default", primary.clone()).with_connection("analytics", analytics.clone()));
    let harness = Harness::build(primary.clone(), resolver, MigrationRegistry::new());

    std::fs::write(
        harness.path().join("2024_01_01_000000_create_events_table.sql"),
        "-- @connection analytics\n-- Up migration\nCREATE TABLE events (id INTEGER);\n-- Down migration\nDROP TABLE events;\n",
    )
    .unwrap();
    harness.create_table_migration("2024_01_02_000000_create_users_table", "users");

    harness.migrator.run(&[], RunOptions::default()).await.unwrap();

    assert!(has_table(analytics.as_ref(), "events").await.unwrap());
    assert!(!has_table(primary.as_ref(), "events").await.unwrap());
    assert!(has_table(primary.as_ref(), "users").await.unwrap());
    // The ledger lives on the default connection
    assert!(has_table(primary.as_ref(), "migrations").await.unwrap());
    assert!(!has_table(analytics.as_ref(), "migrations").await.unwrap());
}

#[tokio::test]
async fn test_unknown_connection_fails_the_migration() {
    let harness = Harness::new().await;
    std::fs::write(
        harness.path().join("2024_01_01_000000_create_events_table.sql"),
        "-- @connection reporting\n-- Up migration\nCREATE TABLE events (id INTEGER);\n",
    )
    .unwrap();

    match harness.migrator.run(&[], RunOptions::default()).await {
        Err(MigrationError::UnknownConnection(name)) => assert_eq!(name, "reporting"),
        other => panic!("Expected unknown connection error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_lock_is_released_on_success_and_failure() {
    let lock = Arc::new(CountingLock::default());
    let mut registry = MigrationRegistry::new();
    registry.register_default::<CreatePartialThenFail>("2024_01_02_000000_create_partial_table");
    let harness = Harness::with_registry(registry).await.with_lock(lock.clone());

    harness.create_table_migration("2024_01_01_000000_create_users_table", "users");
    harness.migrator.run(&[], RunOptions::default()).await.unwrap();
    assert_eq!(lock.counts(), (1, 1));

    harness.registered_migration("2024_01_02_000000_create_partial_table");
    assert!(harness.migrator.run(&[], RunOptions::default()).await.is_err());
    assert_eq!(lock.counts(), (2, 2));
}

#[tokio::test]
async fn test_install_is_idempotent() {
    let harness = Harness::new().await;
    assert!(harness.migrator.install().await.unwrap());
    assert!(!harness.migrator.install().await.unwrap());
    assert!(!harness.migrator.has_run_any_migrations().await.unwrap());

    harness.create_table_migration("2024_01_01_000000_create_users_table", "users");
    harness.migrator.run(&[], RunOptions::default()).await.unwrap();
    assert!(harness.migrator.has_run_any_migrations().await.unwrap());
}
