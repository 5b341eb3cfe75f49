//! Portfolio Planner: selection, bucket-equal weighting, and the four-file
//! hash-chained plan package.

use crate::atomic::{write_json_atomic, WriteScope};
use crate::candidates::{sort_candidates, Candidate};
use crate::canon;
use crate::error::{CoreError, CoreResult};
use crate::layout::Layout;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    pub top_n: usize,
    pub max_per_strategy: usize,
    pub max_per_dataset: usize,
    pub weighting: String,
    pub bucket_by: Vec<String>,
    pub max_weight: f64,
    pub min_weight: f64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            max_per_strategy: 5,
            max_per_dataset: 5,
            weighting: "bucket_equal".to_string(),
            bucket_by: vec!["dataset_id".to_string()],
            max_weight: 1.0,
            min_weight: 0.0,
        }
    }
}

fn field_value(c: &Candidate, field: &str) -> String {
    match field {
        "dataset_id" => c.dataset_id.clone(),
        "strategy_id" => c.strategy_id.clone(),
        "source_batch" => c.source_batch.clone(),
        other => c.metadata.get(other).map(|v| v.to_string()).unwrap_or_default(),
    }
}

fn bucket_key(c: &Candidate, bucket_by: &[String]) -> String {
    bucket_by.iter().map(|f| field_value(c, f)).collect::<Vec<_>>().join("|")
}

/// Walk candidates in canonical order, admitting while under `top_n` and the
/// per-strategy/per-dataset caps.
pub fn select_universe(candidates: &[Candidate], config: &PlanConfig) -> Vec<Candidate> {
    let sorted = sort_candidates(candidates.to_vec());
    let mut universe = Vec::new();
    let mut per_strategy: HashMap<String, usize> = HashMap::new();
    let mut per_dataset: HashMap<String, usize> = HashMap::new();

    for c in sorted {
        if universe.len() >= config.top_n {
            break;
        }
        let s_count = *per_strategy.get(&c.strategy_id).unwrap_or(&0);
        let d_count = *per_dataset.get(&c.dataset_id).unwrap_or(&0);
        if s_count >= config.max_per_strategy || d_count >= config.max_per_dataset {
            continue;
        }
        *per_strategy.entry(c.strategy_id.clone()).or_insert(0) += 1;
        *per_dataset.entry(c.dataset_id.clone()).or_insert(0) += 1;
        universe.push(c);
    }
    universe
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightResult {
    pub weights: BTreeMap<String, f64>,
    pub clipped_candidate_ids: Vec<String>,
    pub renormalization_factor: Option<f64>,
}

/// Bucket-equal weighting with iterative clipping/renormalization.
pub fn weight_bucket_equal(universe: &[Candidate], config: &PlanConfig) -> WeightResult {
    let mut buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for c in universe {
        buckets.entry(bucket_key(c, &config.bucket_by)).or_default().push(c.candidate_id.clone());
    }
    let n_buckets = buckets.len().max(1);

    let mut weights: BTreeMap<String, f64> = BTreeMap::new();
    for ids in buckets.values() {
        let bucket_w = 1.0 / n_buckets as f64;
        let per = bucket_w / ids.len().max(1) as f64;
        for id in ids {
            weights.insert(id.clone(), per);
        }
    }

    let mut clipped_ids: Vec<String> = Vec::new();
    let mut renorm_factor: Option<f64> = None;
    const MAX_ITERATIONS: usize = 10;

    for _ in 0..MAX_ITERATIONS {
        let mut any_clip = false;
        for (id, w) in weights.iter_mut() {
            if *w > config.max_weight {
                *w = config.max_weight;
                any_clip = true;
                clipped_ids.push(id.clone());
            } else if *w < config.min_weight {
                *w = config.min_weight;
                any_clip = true;
                clipped_ids.push(id.clone());
            }
        }
        if !any_clip {
            break;
        }
        let sum: f64 = weights.values().sum();
        if (sum - 1.0).abs() > 1e-12 && sum > 0.0 {
            let factor = 1.0 / sum;
            for w in weights.values_mut() {
                *w *= factor;
            }
            renorm_factor = Some(factor);
        }
    }

    for w in weights.values_mut() {
        *w = canon::quantize(*w);
    }
    clipped_ids.sort();
    clipped_ids.dedup();

    WeightResult { weights, clipped_candidate_ids: clipped_ids, renormalization_factor: renorm_factor }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSources {
    pub export_manifest_sha256: String,
    pub candidates_sha256: String,
}

pub fn derive_plan_id(sources: &PlanSources, config: &PlanConfig) -> CoreResult<String> {
    let value = json!({
        "export_manifest_sha256": sources.export_manifest_sha256,
        "candidates_sha256": sources.candidates_sha256,
        "config": config,
    });
    canon::canonical_sha256_of(&value)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPackage {
    pub plan_id: String,
    pub files: BTreeMap<String, String>,
    pub manifest_sha256: String,
}

/// Build (or confirm the existing, identical) plan package for `plan_id`.
/// Never rewrites an existing plan: identical inputs are a no-op, differing
/// inputs under the same `plan_id` are a hard failure.
pub fn build_plan(
    layout: &Layout,
    sources: &PlanSources,
    config: &PlanConfig,
    candidates: &[Candidate],
) -> CoreResult<PlanPackage> {
    let plan_id = derive_plan_id(sources, config)?;
    let plan_dir = layout.plan_dir(&plan_id);
    let manifest_path = plan_dir.join("plan_manifest.json");

    let universe = select_universe(candidates, config);
    let weights = weight_bucket_equal(&universe, config);

    let plan_value = json!({
        "plan_id": plan_id,
        "universe": universe.iter().map(|c| &c.candidate_id).collect::<Vec<_>>(),
        "weights": weights.weights,
        "clipped_candidate_ids": weights.clipped_candidate_ids,
        "renormalization_factor": weights.renormalization_factor,
    });
    let metadata_value = json!({
        "plan_id": plan_id,
        "export_manifest_sha256": sources.export_manifest_sha256,
        "candidates_sha256": sources.candidates_sha256,
        "config": config,
    });

    let plan_bytes = canon::to_canonical_bytes(&plan_value);
    let metadata_bytes = canon::to_canonical_bytes(&metadata_value);
    let mut files = BTreeMap::new();
    files.insert("portfolio_plan.json".to_string(), canon::sha256_hex(&plan_bytes));
    files.insert("plan_metadata.json".to_string(), canon::sha256_hex(&metadata_bytes));

    let checksums_value = json!(files);
    let checksums_bytes = canon::to_canonical_bytes(&checksums_value);
    files.insert("plan_checksums.json".to_string(), canon::sha256_hex(&checksums_bytes));

    let mut manifest_value = json!({ "plan_id": plan_id, "files": files });
    let manifest_hash = {
        let mut v = manifest_value.clone();
        canon::stamp_self_hash(&mut v, "manifest_sha256")?
    };

    if manifest_path.exists() {
        let existing: Value = serde_json::from_slice(&std::fs::read(&manifest_path)?)?;
        let existing_hash = existing.get("manifest_sha256").and_then(Value::as_str).unwrap_or("");
        if existing_hash == manifest_hash {
            return Ok(PlanPackage { plan_id, files, manifest_sha256: manifest_hash });
        }
        return Err(CoreError::Duplicate(format!("plan '{plan_id}' already exists with different content")));
    }

    let scope = WriteScope::exact(
        &plan_dir,
        &["portfolio_plan.json", "plan_metadata.json", "plan_checksums.json", "plan_manifest.json"],
    )
    .with_prefixes(&["plan_"]);

    write_json_atomic(&scope, "portfolio_plan.json", &plan_value)?;
    write_json_atomic(&scope, "plan_metadata.json", &metadata_value)?;
    write_json_atomic(&scope, "plan_checksums.json", &checksums_value)?;
    let hash = canon::stamp_self_hash(&mut manifest_value, "manifest_sha256")?;
    write_json_atomic(&scope, "plan_manifest.json", &manifest_value)?;

    Ok(PlanPackage { plan_id, files, manifest_sha256: hash })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn candidate(id: &str, strategy: &str, dataset: &str, batch: &str, score: f64) -> Candidate {
        crate::candidates::create_candidate(
            id.into(),
            strategy.into(),
            dataset.into(),
            batch.into(),
            "h".into(),
            json!({}),
            score,
            json!({}),
            crate::candidates::DEFAULT_FORBIDDEN_METADATA_KEYS,
        )
        .unwrap()
    }

    #[test]
    fn plan_determinism_scenario() {
        let candidates = vec![
            candidate("cA1", "stratA", "ds1", "b1", 0.9),
            candidate("cB1", "stratB", "ds1", "b2", 0.9),
            candidate("cA2", "stratA", "ds2", "b1", 0.8),
        ];
        let config = PlanConfig { top_n: 10, max_per_strategy: 5, max_per_dataset: 5, ..Default::default() };
        let universe = select_universe(&candidates, &config);
        assert_eq!(
            universe.iter().map(|c| c.candidate_id.as_str()).collect::<Vec<_>>(),
            vec!["cA1", "cB1", "cA2"]
        );
        let weights = weight_bucket_equal(&universe, &config);
        assert_eq!(weights.weights["cA1"], 0.25);
        assert_eq!(weights.weights["cB1"], 0.25);
        assert_eq!(weights.weights["cA2"], 0.5);
    }

    #[test]
    fn build_plan_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let candidates = vec![candidate("c1", "s1", "d1", "b1", 0.5)];
        let sources = PlanSources { export_manifest_sha256: "abc".into(), candidates_sha256: "def".into() };
        let config = PlanConfig::default();
        let p1 = build_plan(&layout, &sources, &config, &candidates).unwrap();
        let p2 = build_plan(&layout, &sources, &config, &candidates).unwrap();
        assert_eq!(p1.plan_id, p2.plan_id);
        assert_eq!(p1.manifest_sha256, p2.manifest_sha256);
    }
}
