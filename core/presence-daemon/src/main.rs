//! presence-daemon: presence timeline tracker for one live channel.
//!
//! ## Subcommands
//!
//! - `run`: poll the upstream and keep the timeline, sessions and view updated
//! - `show`: print stored sessions, status and per-entity intervals
//! - `clear`: delete every stored record for a target
//! - `timezone`: set, show or search the display time zone
//! - `export` / `import`: move a timeline between targets or machines

mod commands;
mod db;
mod logging;
mod sink;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use commands::Backend;
use presence_core::{load_config, EngineConfig, PresenceError, StorageConfig, TargetKey};

#[derive(Parser)]
#[command(name = "presence-daemon")]
#[command(about = "Presence timeline tracker for a live channel")]
#[command(version)]
struct Cli {
    /// Data directory (default: $PRESENCE_HOME or ~/.presence-timeline)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Config file (default: <root>/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Storage backend
    #[arg(long, global = true, value_enum, default_value_t = Backend::Sqlite)]
    backend: Backend,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the upstream until stopped
    Run {
        /// Channel login to track
        #[arg(long)]
        target: String,

        /// Also write daily-rolling logs into this directory
        #[arg(long, value_name = "DIR")]
        log_file: Option<PathBuf>,

        /// Stop after this many seconds
        #[arg(long, value_name = "SECS")]
        max_runtime_secs: Option<u64>,
    },

    /// Print stored sessions, status and intervals
    Show {
        #[arg(long)]
        target: String,

        /// Print the full view-model as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete all stored data for a target
    Clear {
        #[arg(long)]
        target: String,
    },

    /// Display time zone
    Timezone {
        #[command(subcommand)]
        command: TimezoneCommand,
    },

    /// Write a target's timeline to a JSON file
    Export {
        #[arg(long)]
        target: String,

        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Merge a previously exported timeline into a target
    Import {
        #[arg(long)]
        target: String,

        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum TimezoneCommand {
    /// Select a zone (IANA name, abbreviation, UTC or system)
    Set {
        #[arg(value_name = "ZONE")]
        zone: String,
    },
    /// Print the selected zone and recent choices
    Show,
    /// List zone names matching a query
    Suggest {
        #[arg(value_name = "QUERY")]
        query: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let log_dir = match &cli.command {
        Commands::Run { log_file, .. } => log_file.clone(),
        _ => None,
    };
    let _logging_guard = logging::init(log_dir.as_deref());

    if let Err(err) = dispatch(cli) {
        error!(error = %err, "presence-daemon failed");
        std::process::exit(1);
    }
}

fn load_engine_config(storage: &StorageConfig, path: Option<&Path>) -> Result<EngineConfig, PresenceError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| storage.config_file());
    load_config(&path)
}

fn dispatch(cli: Cli) -> Result<(), PresenceError> {
    let storage = StorageConfig::resolve(cli.root)?;
    let config = load_engine_config(&storage, cli.config.as_deref())?;
    let store = commands::open_store(cli.backend, &storage)?;

    match cli.command {
        Commands::Run {
            target,
            max_runtime_secs,
            ..
        } => {
            let target = TargetKey::parse(&target)?;
            info!(
                channel = %target,
                root = %storage.root().display(),
                backend = ?cli.backend,
                "Starting presence tracking"
            );
            commands::run(
                &storage,
                &config,
                store,
                target,
                max_runtime_secs.map(Duration::from_secs),
            )
        }
        Commands::Show { target, json } => {
            commands::show(store.as_ref(), &config, TargetKey::parse(&target)?, json)
        }
        Commands::Clear { target } => commands::clear(store.as_ref(), &TargetKey::parse(&target)?),
        Commands::Timezone { command } => match command {
            TimezoneCommand::Set { zone } => commands::timezone_set(store.as_ref(), &zone),
            TimezoneCommand::Show => commands::timezone_show(store.as_ref()),
            TimezoneCommand::Suggest { query } => commands::timezone_suggest(&query),
        },
        Commands::Export { target, file } => {
            commands::export(store.as_ref(), &config, TargetKey::parse(&target)?, &file)
        }
        Commands::Import { target, file } => {
            commands::import(store.as_ref(), &config, TargetKey::parse(&target)?, &file)
        }
    }
}
