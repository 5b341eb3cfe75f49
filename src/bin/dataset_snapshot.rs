//! `dataset_snapshot`: normalize raw bars from a JSON file and commit a
//! content-addressed snapshot directory plus a dataset registry entry.
//!
//! ```bash
//! dataset_snapshot --symbol BTCUSD --timeframe 1m --input raw_bars.json
//! ```

use clap::Parser;
use quantbench::bars::Bar;
use quantbench::config::CoreConfig;
use quantbench::error::CoreResult;
use quantbench::layout::Layout;
use quantbench::snapshot::SnapshotRegistry;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "dataset_snapshot", version, about = "Commit a content-addressed bars snapshot")]
struct Args {
    #[arg(long)]
    symbol: String,
    #[arg(long)]
    timeframe: String,
    #[arg(long)]
    input: PathBuf,
}

fn run(args: Args) -> CoreResult<()> {
    let config = CoreConfig::from_env();
    let layout = Layout::new(config.outputs_root.clone());

    let raw: Vec<Bar> = serde_json::from_slice(&std::fs::read(&args.input)?)?;
    let created_at = chrono::Utc::now().to_rfc3339();

    let registry = SnapshotRegistry::new(&layout);
    let manifest = registry.create_snapshot(&args.symbol, &args.timeframe, raw, &created_at)?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

fn main() -> ExitCode {
    quantbench::config::load_dotenv();
    quantbench::config::init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "dataset_snapshot failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
