//! `portfolio_build`: select a candidate universe, weight it, and write the
//! plan package, quality grade, and view for a season's export.
//!
//! ```bash
//! portfolio_build --candidates candidates.json --export-manifest-sha256 abc123
//! ```

use clap::Parser;
use quantbench::candidates::Candidate;
use quantbench::canon;
use quantbench::config::CoreConfig;
use quantbench::error::CoreResult;
use quantbench::layout::Layout;
use quantbench::portfolio::planner::{self, PlanConfig, PlanSources};
use quantbench::portfolio::{quality, view};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "portfolio_build", version, about = "Build a portfolio plan from a candidate set")]
struct Args {
    #[arg(long)]
    candidates: PathBuf,
    #[arg(long)]
    export_manifest_sha256: String,
    #[arg(long, default_value_t = 10)]
    top_n: usize,
    #[arg(long, default_value_t = 5)]
    max_per_strategy: usize,
    #[arg(long, default_value_t = 5)]
    max_per_dataset: usize,
    #[arg(long, default_value_t = 1.0)]
    max_weight: f64,
    #[arg(long, default_value_t = 0.0)]
    min_weight: f64,
    #[arg(long, default_value = "dataset_id")]
    bucket_by: String,
}

fn run(args: Args) -> CoreResult<()> {
    let config = CoreConfig::from_env();
    let layout = Layout::new(config.outputs_root.clone());

    let candidates_bytes = std::fs::read(&args.candidates)?;
    let candidates: Vec<Candidate> = serde_json::from_slice(&candidates_bytes)?;
    let candidates_value: Value = serde_json::from_slice(&candidates_bytes)?;
    let candidates_sha256 = canon::sha256_hex(&canon::to_canonical_bytes(&candidates_value));

    let plan_config = PlanConfig {
        top_n: args.top_n,
        max_per_strategy: args.max_per_strategy,
        max_per_dataset: args.max_per_dataset,
        weighting: "bucket_equal".to_string(),
        bucket_by: args.bucket_by.split(',').map(|s| s.trim().to_string()).collect(),
        max_weight: args.max_weight,
        min_weight: args.min_weight,
    };
    let sources = PlanSources { export_manifest_sha256: args.export_manifest_sha256, candidates_sha256 };

    let package = planner::build_plan(&layout, &sources, &plan_config, &candidates)?;

    let universe = planner::select_universe(&candidates, &plan_config);
    let weights = planner::weight_bucket_equal(&universe, &plan_config);
    let plan_quality = quality::compute_plan_quality(
        &package.plan_id,
        &universe,
        &weights.weights,
        &weights.clipped_candidate_ids,
        &plan_config.bucket_by,
    );
    quality::write_plan_quality(&layout, &plan_quality)?;

    let plan_path = layout.plan_dir(&package.plan_id).join("portfolio_plan.json");
    let plan_value: Value = serde_json::from_slice(&std::fs::read(&plan_path)?)?;
    let quality_value = serde_json::to_value(&plan_quality)?;
    let plan_view = view::render_plan_view(&package.plan_id, &plan_value, Some(&quality_value));
    view::write_plan_view(&layout, &package.plan_id, &plan_view)?;

    println!("{}", serde_json::to_string_pretty(&package)?);
    Ok(())
}

fn main() -> ExitCode {
    quantbench::config::load_dotenv();
    quantbench::config::init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "portfolio_build failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
