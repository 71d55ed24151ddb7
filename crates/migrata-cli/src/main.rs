mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use migrata_config::{ConfigLoader, ConfigOverrides, MigrataConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "migrata", version, about = "Batch-grouped schema migrations")]
struct Cli {
    /// Config file (.toml, .yml or .yaml). Defaults to ./migrata.toml if present.
    #[arg(long, global = true, env = "MIGRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Database endpoint, e.g. `app.db`, `file:app.db` or `:memory:`
    #[arg(long, global = true, env = "MIGRATA_DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, global = true, env = "MIGRATA_AUTH_TOKEN", hide_env_values = true)]
    auth_token: Option<String>,

    #[arg(long, global = true, env = "MIGRATA_ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: Option<String>,

    /// Directory holding the migration files
    #[arg(long, global = true, env = "MIGRATA_DIR")]
    dir: Option<PathBuf>,

    /// Ledger table name
    #[arg(long, global = true, env = "MIGRATA_TABLE")]
    table: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new, empty migration file
    Create {
        /// Free-text name, normalized into the file name
        name: String,
    },
    /// Apply every pending migration as one new batch
    Apply,
    /// Revert the most recently applied batch
    Revert,
    /// Show applied, pending and missing migrations
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    #[command(external_subcommand)]
    Other(Vec<String>),
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

impl Cli {
    fn load_config(&self) -> Result<MigrataConfig> {
        let cwd = std::env::current_dir()?;
        let config = ConfigLoader::load(self.config.as_deref(), &cwd)?;
        Ok(ConfigLoader::apply_overrides(
            config,
            ConfigOverrides {
                url: self.database_url.clone(),
                auth_token: self.auth_token.clone(),
                encryption_key: self.encryption_key.clone(),
                dir: self.dir.clone(),
                table: self.table.clone(),
            },
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // `.env` must be loaded before clap reads the environment.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let Some(command) = &cli.command else {
        return Ok(());
    };

    match command {
        Command::Create { name } => commands::create(&cli.load_config()?, name).await,
        Command::Apply => commands::apply(&cli.load_config()?).await,
        Command::Revert => commands::revert(&cli.load_config()?).await,
        Command::Status { json } => commands::status(&cli.load_config()?, *json).await,
        Command::Other(args) => {
            debug!("ignoring unrecognized command {:?}", args.first());
            Ok(())
        }
    }
}
