mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::*;
use schemata_migrations::{RefreshOptions, RollbackOptions, RunOptions};

use crate::config::Config;
use crate::logging::{init_logging, LoggingConfig};

#[derive(Parser)]
#[command(name = "schemata")]
#[command(about = "Run, roll back and scaffold database schema migrations")]
#[command(version)]
struct Cli {
    /// Path to schemata.toml
    #[arg(long, global = true, env = "SCHEMATA_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Show debug logs
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migration management
    Migrate {
        #[command(subcommand)]
        migrate_command: MigrateCommands,
    },

    /// Scaffolding (make: commands)
    Make {
        #[command(subcommand)]
        make_command: MakeCommands,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        db_command: DbCommands,
    },
}

#[derive(Args, Clone, Default)]
struct TargetArgs {
    /// Connection to use (defaults to database.default)
    #[arg(long)]
    database: Option<String>,

    /// Migration path; repeat to search several (replaces migrations.paths)
    #[arg(long = "path")]
    paths: Vec<PathBuf>,
}

impl From<TargetArgs> for migrate::Target {
    fn from(args: TargetArgs) -> Self {
        Self {
            database: args.database,
            paths: args.paths,
        }
    }
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Run pending migrations
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Give every migration its own batch
        #[arg(long)]
        step: bool,

        /// Print the SQL instead of executing it
        #[arg(long)]
        pretend: bool,

        /// Run seeders afterwards
        #[arg(long)]
        seed: bool,

        /// Allow running in production
        #[arg(long)]
        force: bool,
    },

    /// Create the migration ledger table
    Install {
        #[arg(long)]
        database: Option<String>,
    },

    /// Roll back the last batch
    Rollback {
        #[command(flatten)]
        target: TargetArgs,

        /// Roll back this many migrations instead of the last batch
        #[arg(long, default_value_t = 0)]
        step: usize,

        /// Roll back a specific batch
        #[arg(long)]
        batch: Option<i64>,

        #[arg(long)]
        pretend: bool,

        #[arg(long)]
        force: bool,
    },

    /// Roll back every migration
    Reset {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long)]
        pretend: bool,

        #[arg(long)]
        force: bool,
    },

    /// Reset (or roll back `--step` migrations) and migrate again
    Refresh {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long)]
        step: Option<usize>,

        #[arg(long)]
        pretend: bool,

        #[arg(long)]
        seed: bool,

        #[arg(long)]
        force: bool,
    },

    /// Drop all tables and migrate from scratch
    Fresh {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long)]
        step: bool,

        #[arg(long)]
        seed: bool,

        #[arg(long)]
        force: bool,
    },

    /// Show which migrations have run
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy bundled migrations into the migrations directory
    Publish {
        /// Directory to copy from (defaults to migrations.publish_source)
        #[arg(long)]
        from: Option<PathBuf>,

        /// Destination directory
        #[arg(long = "path")]
        paths: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum MakeCommands {
    /// Create a new migration file
    Migration {
        /// Migration name (e.g. create_users_table)
        name: String,

        /// Table to create
        #[arg(long)]
        create: Option<String>,

        /// Table to alter
        #[arg(long)]
        table: Option<String>,

        /// Directory to write to (defaults to the first migrations path)
        #[arg(long = "path")]
        paths: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Run database seeders
    Seed {
        /// Run only this seeder
        #[arg(long)]
        class: Option<String>,

        #[arg(long)]
        database: Option<String>,

        /// Force run seeders in production environment
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::default().json(cli.json_logs);
    if cli.verbose {
        logging = logging.verbose();
    }
    init_logging(&logging)?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Migrate { migrate_command } => match migrate_command {
            MigrateCommands::Run {
                target,
                step,
                pretend,
                seed,
                force,
            } => {
                let options = RunOptions { step, pretend };
                migrate::run(&config, &target.into(), options, seed, force).await?;
            }
            MigrateCommands::Install { database } => {
                migrate::install(&config, database.as_deref()).await?;
            }
            MigrateCommands::Rollback {
                target,
                step,
                batch,
                pretend,
                force,
            } => {
                let options = RollbackOptions { step, batch, pretend };
                migrate::rollback(&config, &target.into(), options, force).await?;
            }
            MigrateCommands::Reset { target, pretend, force } => {
                migrate::reset(&config, &target.into(), pretend, force).await?;
            }
            MigrateCommands::Refresh {
                target,
                step,
                pretend,
                seed,
                force,
            } => {
                let options = RefreshOptions {
                    step,
                    run: RunOptions { step: false, pretend },
                };
                migrate::refresh(&config, &target.into(), options, seed, force).await?;
            }
            MigrateCommands::Fresh {
                target,
                step,
                seed,
                force,
            } => {
                let options = RunOptions { step, pretend: false };
                migrate::fresh(&config, &target.into(), options, seed, force).await?;
            }
            MigrateCommands::Status { target, json } => {
                migrate::status(&config, &target.into(), json).await?;
            }
            MigrateCommands::Publish { from, paths } => {
                migrate::publish(&config, from.as_deref(), &paths)?;
            }
        },
        Commands::Make { make_command } => match make_command {
            MakeCommands::Migration {
                name,
                create,
                table,
                paths,
            } => {
                let options = make::MakeMigration {
                    name,
                    create,
                    table,
                    paths,
                };
                make::migration(&config, &options)?;
            }
        },
        Commands::Db { db_command } => match db_command {
            DbCommands::Seed { class, database, force } => {
                db::seed(&config, class.as_deref(), database.as_deref(), force).await?;
            }
        },
    }

    Ok(())
}
