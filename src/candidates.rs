//! Candidate & Export Pipeline. The research/execution metadata boundary,
//! canonical candidate ordering, and the frozen-season export package.

use crate::atomic::{write_json_atomic, WriteScope};
use crate::canon;
use crate::error::{CoreError, CoreResult};
use crate::layout::Layout;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Metadata keys (case-insensitive) that must never appear on a candidate:
/// they would leak execution-surface concepts into the research boundary.
pub const DEFAULT_FORBIDDEN_METADATA_KEYS: &[&str] =
    &["symbol", "timeframe", "session_profile", "market", "exchange", "trading"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub candidate_id: String,
    pub strategy_id: String,
    pub dataset_id: String,
    pub source_batch: String,
    pub param_hash: String,
    pub params: Value,
    pub research_score: f64,
    pub metadata: Value,
}

/// Build a candidate, enforcing the forbidden-metadata-key boundary.
pub fn create_candidate(
    candidate_id: String,
    strategy_id: String,
    dataset_id: String,
    source_batch: String,
    param_hash: String,
    params: Value,
    research_score: f64,
    metadata: Value,
    forbidden_keys: &[&str],
) -> CoreResult<Candidate> {
    if let Some(obj) = metadata.as_object() {
        for key in obj.keys() {
            let lowered = key.to_lowercase();
            if forbidden_keys.iter().any(|f| f.eq_ignore_ascii_case(&lowered)) {
                return Err(CoreError::ContractViolation(format!(
                    "metadata key '{key}' is forbidden at the research/execution boundary"
                )));
            }
        }
    }
    Ok(Candidate {
        candidate_id,
        strategy_id,
        dataset_id,
        source_batch,
        param_hash,
        params,
        research_score,
        metadata,
    })
}

/// Canonical ordering: score desc → strategy_id asc → dataset_id asc →
/// source_batch asc → canonical(params) asc → candidate_id asc.
pub fn cmp_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.research_score
        .partial_cmp(&a.research_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.strategy_id.cmp(&b.strategy_id))
        .then_with(|| a.dataset_id.cmp(&b.dataset_id))
        .then_with(|| a.source_batch.cmp(&b.source_batch))
        .then_with(|| canon::to_canonical_bytes(&a.params).cmp(&canon::to_canonical_bytes(&b.params)))
        .then_with(|| a.candidate_id.cmp(&b.candidate_id))
}

pub fn sort_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(cmp_candidates);
    candidates
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchArtifacts {
    pub batch_id: String,
    pub metadata: Value,
    pub index: Value,
    pub summary: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub season: String,
    pub batch_ids: Vec<String>,
    pub manifest_sha256: String,
}

/// Write (or confirm the existing, identical) export tree for a frozen
/// season. Exports are never overwritten: a second call with the same
/// batches is a no-op; a second call whose content would differ fails.
pub fn export_season(layout: &Layout, season: &str, mut batches: Vec<BatchArtifacts>) -> CoreResult<ExportManifest> {
    batches.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));

    let export_dir = layout.export_dir(season);
    let manifest_path = layout.export_manifest(season);

    let season_index_value = json!({ "season": season, "batches": batches.iter().map(|b| b.batch_id.clone()).collect::<Vec<_>>() });
    let replay_entries: BTreeMap<String, Value> = batches
        .iter()
        .map(|b| (b.batch_id.clone(), json!({ "summary": b.summary, "index": b.index })))
        .collect();
    let replay_index_value = json!({ "season": season, "batches": replay_entries });

    let mut manifest_value = json!({
        "season": season,
        "batch_ids": batches.iter().map(|b| b.batch_id.clone()).collect::<Vec<_>>(),
    });
    let intended_hash = {
        let mut v = manifest_value.clone();
        canon::stamp_self_hash(&mut v, "manifest_sha256")?
    };

    if manifest_path.exists() {
        let existing: Value = serde_json::from_slice(&std::fs::read(&manifest_path)?)?;
        let existing_hash = existing.get("manifest_sha256").and_then(Value::as_str).unwrap_or("");
        if existing_hash == intended_hash {
            return Ok(ExportManifest {
                season: season.to_string(),
                batch_ids: batches.iter().map(|b| b.batch_id.clone()).collect(),
                manifest_sha256: intended_hash,
            });
        }
        return Err(CoreError::Duplicate(format!("export for season '{season}' already exists with different content")));
    }

    let scope = WriteScope::exact(&export_dir, &["manifest.json", "season_index.json", "replay_index.json"]);
    write_json_atomic(&scope, "season_index.json", &season_index_value)?;
    write_json_atomic(&scope, "replay_index.json", &replay_index_value)?;

    for batch in &batches {
        let batch_dir = layout.export_batch_dir(season, &batch.batch_id);
        let batch_scope = WriteScope::exact(&batch_dir, &["metadata.json", "index.json", "summary.json"]);
        write_json_atomic(&batch_scope, "metadata.json", &batch.metadata)?;
        write_json_atomic(&batch_scope, "index.json", &batch.index)?;
        write_json_atomic(&batch_scope, "summary.json", &batch.summary)?;
    }

    let hash = canon::stamp_self_hash(&mut manifest_value, "manifest_sha256")?;
    write_json_atomic(&scope, "manifest.json", &manifest_value)?;

    Ok(ExportManifest {
        season: season.to_string(),
        batch_ids: batches.into_iter().map(|b| b.batch_id).collect(),
        manifest_sha256: hash,
    })
}

/// Zero-write replay: top-K candidates across every batch in an export's
/// `replay_index.json`, by the canonical ordering key.
pub fn replay_topk(replay_index: &Value, top_k: usize) -> CoreResult<Vec<Candidate>> {
    let mut all = Vec::new();
    if let Some(batches) = replay_index.get("batches").and_then(Value::as_object) {
        for entry in batches.values() {
            if let Some(candidates) = entry.get("summary").and_then(|s| s.get("candidates")) {
                let parsed: Vec<Candidate> = serde_json::from_value(candidates.clone())?;
                all.extend(parsed);
            }
        }
    }
    let mut sorted = sort_candidates(all);
    sorted.truncate(top_k);
    Ok(sorted)
}
