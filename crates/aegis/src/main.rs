//! Aegis emergency dispatch coordinator.
//!
//! Polls analysed reports and verified needs, picks the nearest suitable
//! station, routes to the incident and records exactly one mission per
//! incident and dispatch round.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod cli;

use cli::config::GlobalOptions;

#[derive(Parser, Debug)]
#[command(name = "aegis", version, about = "Emergency dispatch coordinator")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (default: $AEGIS_HOME/aegis.toml)
    #[arg(long, global = true, env = "AEGIS_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides [store].database_path)
    #[arg(long, global = true, env = "AEGIS_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the dispatch coordinator
    Run(cli::run::RunArgs),

    /// Manage the station registry
    Stations {
        #[command(subcommand)]
        action: cli::stations::StationsAction,
    },

    /// Record or inspect incidents
    Incident {
        #[command(subcommand)]
        action: cli::incident::IncidentAction,
    },

    /// Override the dispatch of an incident
    Reroute(cli::reroute::RerouteArgs),

    /// Dispatch status counts and mission totals
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Most recent missions
    Missions {
        #[arg(long, default_value = "20")]
        limit: u32,
        #[arg(long)]
        json: bool,
    },
}

async fn run_command(command: Commands, options: &GlobalOptions) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => cli::run::run(args, options).await,
        Commands::Stations { action } => cli::stations::run(action, options).await,
        Commands::Incident { action } => cli::incident::run(action, options).await,
        Commands::Reroute(args) => cli::reroute::run(args, options).await,
        Commands::Stats { json } => cli::stats::run(json, options).await,
        Commands::Missions { limit, json } => cli::stats::missions(limit, json, options).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = aegis_logging::init_logging(aegis_logging::LogConfig {
        app_name: "aegis",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    let options = GlobalOptions {
        config: cli.config,
        database: cli.database,
    };

    match run_command(cli.command, &options).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}
