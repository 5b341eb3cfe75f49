//! `season_ctl`: season lifecycle control. Open a season, inspect its
//! metadata, or freeze it (one-way).
//!
//! ```bash
//! season_ctl open --season 2026Q1
//! season_ctl status --season 2026Q1
//! season_ctl freeze --season 2026Q1
//! ```

use clap::{Parser, Subcommand};
use quantbench::config::CoreConfig;
use quantbench::error::CoreResult;
use quantbench::governance::SeasonStore;
use quantbench::layout::Layout;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "season_ctl", version, about = "Season lifecycle control")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a season's metadata at OPEN, if it doesn't already exist.
    Open { #[arg(long)] season: String },
    /// Print a season's current metadata.
    Status { #[arg(long)] season: String },
    /// One-way freeze. Idempotent if already frozen.
    Freeze { #[arg(long)] season: String },
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn run(args: Args) -> CoreResult<()> {
    let config = CoreConfig::from_env();
    let layout = Layout::new(config.outputs_root.clone());
    let store = SeasonStore::new(&layout);

    match args.command {
        Command::Open { season } => {
            store.ensure_root()?;
            let metadata = store.open(&season, &now_rfc3339())?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Command::Status { season } => match store.read_metadata(&season)? {
            Some(metadata) => println!("{}", serde_json::to_string_pretty(&metadata)?),
            None => println!("season '{season}' does not exist"),
        },
        Command::Freeze { season } => {
            let metadata = store.freeze(&season, &now_rfc3339())?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    quantbench::config::load_dotenv();
    quantbench::config::init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "season_ctl failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
