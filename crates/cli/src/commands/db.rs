use anyhow::Result;
use console::style;
use schemata_migrations::{ConnectionResolver, SeederRunner};

use super::{confirm_to_proceed, Session};
use crate::config::Config;

/// Run the configured seeders on the session's migration connection
pub async fn run_seeders(config: &Config, session: &Session, seeder: Option<&str>) -> Result<()> {
    let connection = session
        .manager
        .connection(Some(&session.migrator.connection_name()))?;

    println!("{} Seeding database...", style("🌱").green());
    let runner = SeederRunner::new().with_path(config.seeders.path.clone());
    let ran = runner.run(connection.as_ref(), seeder).await?;

    if ran.is_empty() {
        println!("{} No seeders found in {}", style("ℹ").cyan(), config.seeders.path.display());
    }
    for name in ran {
        println!("{} {}", style("Seeded:").green(), name);
    }
    Ok(())
}

pub async fn seed(config: &Config, seeder: Option<&str>, database: Option<&str>, force: bool) -> Result<()> {
    confirm_to_proceed(config, force)?;
    let session = Session::open(config, database, &[]).await?;

    run_seeders(config, &session, seeder).await?;

    session.close().await
}
