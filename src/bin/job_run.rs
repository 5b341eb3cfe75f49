//! `job_run`: submit one batch job, resolve features, run the WFS Engine
//! over a strategy, persist batch artifacts, and fold the batch into the
//! season index.
//!
//! ```bash
//! job_run --season 2026Q1 --dataset-id d1 --batch-id b1 \
//!   --data-fingerprint abc123 --splits splits.json --param-grid grid.json
//! ```

use clap::Parser;
use quantbench::config::CoreConfig;
use quantbench::error::{CoreError, CoreResult};
use quantbench::features::FeatureBundle;
use quantbench::governance::PolicyEngine;
use quantbench::layout::Layout;
use quantbench::resolver::{BuildContext, FeatureBuilder, FeatureRequirement};
use quantbench::runner::{self, BatchJob};
use quantbench::strategy::{StrategyCapability, StrategyContext, StrategyOutput};
use quantbench::wfs::{WfsConfig, WfsSplit};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "job_run", version, about = "Submit a batch: resolve features, run WFS, persist artifacts")]
struct Args {
    #[arg(long)]
    season: String,
    #[arg(long)]
    dataset_id: String,
    #[arg(long)]
    batch_id: String,
    #[arg(long)]
    data_fingerprint: String,
    #[arg(long, default_value_t = 15)]
    feature_timeframe_min: u32,
    #[arg(long)]
    splits: PathBuf,
    #[arg(long)]
    param_grid: PathBuf,
    #[arg(long, default_value_t = 10)]
    top_k: usize,
    #[arg(long)]
    allow_build: bool,
    #[arg(long)]
    txt_path: Option<PathBuf>,
}

/// A deterministic baseline plugged in at the binary layer, outside the
/// core's registry. The library never names a concrete strategy.
struct BaselineMomentum {
    timeframe_min: u32,
}

impl StrategyCapability for BaselineMomentum {
    fn strategy_id(&self) -> &str {
        "baseline_momentum"
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn param_schema(&self) -> &Value {
        &Value::Null
    }
    fn defaults(&self) -> &Value {
        &Value::Null
    }
    fn feature_requirements(&self) -> &[FeatureRequirement] {
        &[]
    }
    fn invoke(&self, ctx: &StrategyContext<'_>, _params: &Value) -> CoreResult<StrategyOutput> {
        let score = mean_momentum(ctx.bundle, self.timeframe_min);
        Ok(StrategyOutput { intents: vec![], score })
    }
}

fn mean_momentum(bundle: &FeatureBundle, timeframe_min: u32) -> f64 {
    let Some(by_name) = bundle.get(&timeframe_min) else {
        return 0.0;
    };
    let Some(series) = by_name.get("mom_10") else {
        return 0.0;
    };
    let values: Vec<f64> = series.values.iter().filter_map(|v| *v).collect();
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

struct NoBuild;
impl FeatureBuilder for NoBuild {
    fn build(&self, _season: &str, _dataset_id: &str, _ctx: &BuildContext) -> CoreResult<()> {
        Err(CoreError::BuildNotAllowed)
    }
}

fn run(args: Args) -> CoreResult<()> {
    let config = CoreConfig::from_env();
    let layout = Layout::new(config.outputs_root.clone());

    let splits: Vec<WfsSplit> = serde_json::from_slice(&std::fs::read(&args.splits)?)?;
    let param_grid: Vec<Value> = serde_json::from_slice(&std::fs::read(&args.param_grid)?)?;

    let strategy = BaselineMomentum { timeframe_min: args.feature_timeframe_min };
    let build_context = args.txt_path.map(|txt_path| BuildContext { txt_path });

    let job = BatchJob {
        batch_id: args.batch_id,
        season: args.season,
        dataset_id: args.dataset_id,
        data_fingerprint: args.data_fingerprint,
        required: strategy.feature_requirements().to_vec(),
        allow_build: args.allow_build,
        build_context,
        strategy: &strategy,
        wfs_config: WfsConfig { splits, param_grid, top_k: args.top_k },
    };

    let engine = PolicyEngine::default();
    let result = runner::submit_batch(&layout, &job, &NoBuild, &engine, &config)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn main() -> ExitCode {
    quantbench::config::load_dotenv();
    quantbench::config::init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "job_run failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
