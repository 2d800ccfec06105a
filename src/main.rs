use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cadnlp::config::{CliOverrides, Settings};

mod cmd;

#[derive(Parser)]
#[command(name = "cadnlp")]
#[command(version, about = "CAD drawing backend with natural-language drawing commands")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file. Defaults to ./cadnlp.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database file
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Also write daily-rolling log files to this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Create the database schema (and default data) then exit
    InitDb {
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Skip creating the default admin user, project and layer
        #[arg(long)]
        no_seed: bool,
    },
    /// Interpret a drawing command and print the response as JSON
    Interpret {
        /// The command text, e.g. "crear línea de 1,1 a 3,3"
        command: String,

        #[arg(long, default_value = "0")]
        project_id: i64,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the effective settings as TOML
    Show,
    /// Check the effective settings and list warnings
    Validate,
}

impl Commands {
    fn overrides(&self) -> CliOverrides {
        match self {
            Commands::Serve {
                host,
                port,
                db_path,
                log_dir,
            } => CliOverrides {
                host: host.clone(),
                port: *port,
                db_path: db_path.clone(),
                log_dir: log_dir.clone(),
            },
            Commands::InitDb { db_path, .. } => CliOverrides {
                db_path: db_path.clone(),
                ..Default::default()
            },
            _ => CliOverrides::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref(), &cli.command.overrides())?;
    let _log_guard =
        cadnlp::logging::init_tracing(cli.verbose, settings.json_logs, settings.log_dir.as_deref())?;

    match cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(settings).await?,
        Commands::InitDb { no_seed, .. } => cmd::cmd_init_db(settings, no_seed).await?,
        Commands::Interpret {
            command,
            project_id,
        } => cmd::cmd_interpret(&command, project_id)?,
        Commands::Config { command } => {
            cmd::cmd_config(&settings, cli.config.as_deref(), command)?
        }
    }

    Ok(())
}
