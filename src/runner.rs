//! Orchestration Runner. Wires the Feature Resolver and WFS Engine together
//! for one batch, then updates the season index. Performs no raw IO of its
//! own; every collaborator it touches (resolver, WFS, season store) already
//! owns its own file access.

use crate::atomic::{write_json_atomic, WriteScope};
use crate::error::{CoreError, CoreResult};
use crate::governance::{PolicyEngine, SeasonState, SeasonStore};
use crate::layout::Layout;
use crate::resolver::{self, BuildContext, FeatureBuilder, FeatureRequirement, ResolveRequest};
use crate::strategy::StrategyCapability;
use crate::wfs::{self, WfsConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub struct BatchJob<'a> {
    pub batch_id: String,
    pub season: String,
    pub dataset_id: String,
    pub data_fingerprint: String,
    pub required: Vec<FeatureRequirement>,
    pub allow_build: bool,
    pub build_context: Option<BuildContext>,
    pub strategy: &'a dyn StrategyCapability,
    pub wfs_config: WfsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub season: String,
    pub dataset_id: String,
    pub total_evaluated: usize,
    pub build_performed: bool,
}

/// Run one batch end to end: resolve features, run WFS, persist the batch
/// artifacts, and fold the batch into the season index (unless frozen).
pub fn run_batch(
    layout: &Layout,
    job: &BatchJob,
    builder: &dyn FeatureBuilder,
) -> CoreResult<BatchResult> {
    if job.data_fingerprint.trim().is_empty() {
        return Err(CoreError::ContractViolation("data_fingerprint must not be empty".into()));
    }

    let resolve_req = ResolveRequest {
        season: &job.season,
        dataset_id: &job.dataset_id,
        required: &job.required,
        allow_build: job.allow_build,
        build_context: job.build_context.clone(),
    };
    let resolved = resolver::resolve(layout, &resolve_req, builder)?;

    let (summary, index) = wfs::run(job.strategy, &resolved.bundle, &job.wfs_config)?;

    let dir = layout.artifacts_dir(&job.batch_id);
    let scope = WriteScope::exact(
        &dir,
        &["metadata.json", "index.json", "summary.json", "execution.json"],
    );

    write_json_atomic(&scope, "summary.json", &serde_json::to_value(&summary)?)?;
    write_json_atomic(&scope, "index.json", &serde_json::to_value(&index)?)?;
    write_json_atomic(
        &scope,
        "metadata.json",
        &json!({
            "batch_id": job.batch_id,
            "season": job.season,
            "dataset_id": job.dataset_id,
            "data_fingerprint": job.data_fingerprint,
            "strategy_id": job.strategy.strategy_id(),
            "strategy_version": job.strategy.version(),
            "frozen": false,
        }),
    )?;
    write_json_atomic(
        &scope,
        "execution.json",
        &json!({ "build_performed": resolved.build_performed }),
    )?;

    let season_store = SeasonStore::new(layout);
    let metadata = season_store
        .read_metadata(&job.season)?
        .ok_or_else(|| CoreError::NotFound(format!("season: {}", job.season)))?;
    if metadata.state != SeasonState::Frozen {
        let index_path = layout.season_index_file(&job.season);
        let current: serde_json::Value = if index_path.exists() {
            serde_json::from_slice(&std::fs::read(&index_path)?)?
        } else {
            json!({})
        };
        let batches = current
            .get("batches")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let mut batches: Vec<String> = batches
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        if !batches.contains(&job.batch_id) {
            batches.push(job.batch_id.clone());
        }
        season_store.write_index(&job.season, &json!({ "batches": batches }))?;
    }

    Ok(BatchResult {
        batch_id: job.batch_id.clone(),
        season: job.season.clone(),
        dataset_id: job.dataset_id.clone(),
        total_evaluated: summary.total_evaluated,
        build_performed: resolved.build_performed,
    })
}

/// Run several batch jobs concurrently with `rayon`, collecting every result
/// (including errors) without one job's failure aborting the others.
pub fn run_batch_parallel(
    layout: &Layout,
    jobs: &[BatchJob],
    builder: &(dyn FeatureBuilder + Sync),
) -> Vec<CoreResult<BatchResult>> {
    jobs.par_iter().map(|job| run_batch(layout, job, builder)).collect()
}

/// Classify and enforce a batch submission through the policy engine before
/// `run_batch` touches anything. Call sites that front this with an HTTP or
/// CLI layer should use this instead of calling `run_batch` directly.
pub fn submit_batch(
    layout: &Layout,
    job: &BatchJob,
    builder: &dyn FeatureBuilder,
    engine: &PolicyEngine,
    config: &crate::config::CoreConfig,
) -> CoreResult<BatchResult> {
    let season_store = SeasonStore::new(layout);
    let metadata = season_store
        .read_metadata(&job.season)?
        .ok_or_else(|| CoreError::NotFound(format!("season: {}", job.season)))?;
    let decision = crate::governance::evaluate(engine, config, "submit_job", &job.season, metadata.state);
    if !decision.allowed {
        return Err(CoreError::PolicyDenied { action: decision.action, reason: decision.reason });
    }
    run_batch(layout, job, builder)
}
