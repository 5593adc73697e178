pub mod db;
pub mod make;
pub mod migrate;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use schemata_migrations::{
    mask_database_url, ConnectionManager, DatabaseBackendType, DatabaseMigrationRepository, DatabasePoolConfig,
    DefaultLoader, Migrator, PostgresAdvisoryLock, PostgresConnection,
};
use tracing::{debug, warn};

use crate::config::Config;

/// Connections and migrator for one command invocation
pub struct Session {
    pub migrator: Migrator,
    pub manager: Arc<ConnectionManager>,
    pub paths: Vec<PathBuf>,
}

impl Session {
    /// Connect to every configured database and build the migrator.
    ///
    /// `database` selects the connection used for the ledger and for
    /// migrations without their own connection directive.
    pub async fn open(config: &Config, database: Option<&str>, paths: &[PathBuf]) -> Result<Self> {
        let url = config.connection_url(database)?;
        debug!(database = %mask_database_url(url), "opening session");

        let pool_config = DatabasePoolConfig {
            max_connections: config.database.max_connections,
            ..Default::default()
        };
        let mut manager = ConnectionManager::connect_all(config.ordered_connections(), &pool_config)
            .await
            .context("Failed to connect to the database")?;
        manager.set_default(config.database.default.clone())?;
        let manager = Arc::new(manager);

        let repository = DatabaseMigrationRepository::with_table(manager.clone(), config.migrations.table.clone());
        let mut migrator = Migrator::new(Box::new(repository), manager.clone(), Arc::new(DefaultLoader::default()))
            .with_extensions(config.migrations.extensions.clone());

        if config.lock {
            match DatabaseBackendType::from_url(url)? {
                DatabaseBackendType::PostgreSQL => {
                    let lock_pool = DatabasePoolConfig {
                        max_connections: 1,
                        ..Default::default()
                    };
                    let connection = PostgresConnection::connect(url, &lock_pool).await?;
                    migrator = migrator.with_lock(Arc::new(PostgresAdvisoryLock::for_connection(&connection)));
                }
                backend => warn!(%backend, "migration lock requested but only PostgreSQL supports it"),
            }
        }

        migrator.set_connection(database)?;

        Ok(Self {
            migrator,
            manager,
            paths: config.migration_paths(paths),
        })
    }

    pub async fn close(&self) -> Result<()> {
        self.manager.close_all().await?;
        Ok(())
    }
}

/// Destructive commands need `--force` in production
pub fn confirm_to_proceed(config: &Config, force: bool) -> Result<()> {
    if config.is_production() && !force {
        bail!(
            "Application is in production (environment = \"{}\"). Re-run with --force to proceed",
            config.environment
        );
    }
    Ok(())
}
