use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;
use schemata_migrations::{
    MigrationCreator, MigrationDirection, MigrationReport, MigrationStatus, RefreshOptions, RollbackOptions,
    RunOptions,
};

use super::{confirm_to_proceed, db, Session};
use crate::config::Config;

/// Flags shared by every migrate command
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub database: Option<String>,
    pub paths: Vec<PathBuf>,
}

pub async fn run(config: &Config, target: &Target, options: RunOptions, seed: bool, force: bool) -> Result<()> {
    confirm_to_proceed(config, force)?;
    let session = Session::open(config, target.database.as_deref(), &target.paths).await?;

    let report = session.migrator.run(&session.paths, options).await?;
    print_report(&report, "Nothing to migrate.");

    if seed && !options.pretend {
        db::run_seeders(config, &session, None).await?;
    }

    session.close().await
}

pub async fn install(config: &Config, database: Option<&str>) -> Result<()> {
    let session = Session::open(config, database, &[]).await?;

    if session.migrator.install().await? {
        println!("{} Migration table created successfully.", style("✅").green());
    } else {
        println!("{} Migration table already exists.", style("ℹ").cyan());
    }

    session.close().await
}

pub async fn rollback(config: &Config, target: &Target, options: RollbackOptions, force: bool) -> Result<()> {
    confirm_to_proceed(config, force)?;
    let session = Session::open(config, target.database.as_deref(), &target.paths).await?;

    let report = session.migrator.rollback(&session.paths, options).await?;
    print_report(&report, "Nothing to rollback.");

    session.close().await
}

pub async fn reset(config: &Config, target: &Target, pretend: bool, force: bool) -> Result<()> {
    confirm_to_proceed(config, force)?;
    let session = Session::open(config, target.database.as_deref(), &target.paths).await?;

    if !session.migrator.repository_exists().await? {
        println!("{} Migration table not found.", style("ℹ").cyan());
        return session.close().await;
    }

    let report = session.migrator.reset(&session.paths, pretend).await?;
    print_report(&report, "Nothing to rollback.");

    session.close().await
}

pub async fn refresh(config: &Config, target: &Target, options: RefreshOptions, seed: bool, force: bool) -> Result<()> {
    confirm_to_proceed(config, force)?;
    let session = Session::open(config, target.database.as_deref(), &target.paths).await?;

    let report = session.migrator.refresh(&session.paths, options).await?;
    print_report(&report, "Nothing to refresh.");

    if seed && !options.run.pretend {
        db::run_seeders(config, &session, None).await?;
    }

    session.close().await
}

pub async fn fresh(config: &Config, target: &Target, options: RunOptions, seed: bool, force: bool) -> Result<()> {
    confirm_to_proceed(config, force)?;
    let session = Session::open(config, target.database.as_deref(), &target.paths).await?;

    println!("{} Dropping all tables...", style("🗑").red());
    let report = session.migrator.fresh(&session.paths, options).await?;
    print_report(&report, "Nothing to migrate.");

    if seed {
        db::run_seeders(config, &session, None).await?;
    }

    session.close().await
}

pub async fn status(config: &Config, target: &Target, json: bool) -> Result<()> {
    let session = Session::open(config, target.database.as_deref(), &target.paths).await?;

    let statuses = session.migrator.status(&session.paths).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        print_status(&statuses);
    }

    session.close().await
}

pub fn publish(config: &Config, from: Option<&Path>, to: &[PathBuf]) -> Result<()> {
    let source = from
        .map(Path::to_path_buf)
        .or_else(|| config.migrations.publish_source.clone())
        .context("No publish source given. Pass --from or set migrations.publish_source")?;
    let target = config.migration_dir(to);

    let creator = MigrationCreator::new().with_publish_source(source);
    let published = creator.publish(&target, |from, to| {
        println!(
            "{} {} -> {}",
            style("Published").green(),
            from.display(),
            to.display()
        );
    })?;

    if published.is_empty() {
        println!("{} Nothing to publish.", style("ℹ").cyan());
    }
    Ok(())
}

fn print_report(report: &MigrationReport, empty_message: &str) {
    if report.executed.is_empty() && report.skipped.is_empty() {
        println!("{} {}", style("ℹ").cyan(), empty_message);
        return;
    }

    for migration in &report.executed {
        if report.pretend {
            println!("{} {}", style(&migration.name).bold(), style("(pretend)").dim());
            for statement in &migration.statements {
                println!("  {}", statement);
            }
            continue;
        }

        let verb = match migration.direction {
            MigrationDirection::Up => style("Migrated: ").green(),
            MigrationDirection::Down => style("Rolled back: ").yellow(),
        };
        println!(
            "{} {} {}",
            verb,
            migration.name,
            style(format!("({} ms)", migration.execution_time_ms)).dim()
        );
    }

    for skipped in &report.skipped {
        println!("{} {} ({})", style("Migration not found:").red(), skipped.name, skipped.reason);
    }
}

fn print_status(statuses: &[MigrationStatus]) {
    if statuses.is_empty() {
        println!("{} No migrations found.", style("ℹ").cyan());
        return;
    }

    println!("{:<8} {:<6} {}", style("Ran?").bold(), style("Batch").bold(), style("Migration").bold());
    for status in statuses {
        let ran = if status.ran {
            style("Yes").green()
        } else {
            style("No").red()
        };
        let batch = status.batch.map(|b| b.to_string()).unwrap_or_default();
        println!("{:<8} {:<6} {}", ran, batch, status.name);
    }
}
