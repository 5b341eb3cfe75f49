//! Plan quality grader: fixed-threshold GREEN/YELLOW/RED grading plus a
//! three-file quality package. Re-running with unchanged inputs must leave
//! the filesystem byte- and mtime-identical, so writes are skipped when the
//! computed content already matches what's on disk.

use crate::atomic::{write_json_atomic, WriteScope};
use crate::candidates::Candidate;
use crate::canon;
use crate::error::CoreResult;
use crate::layout::Layout;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const EFFECTIVE_N_GREEN: f64 = 3.0;
pub const EFFECTIVE_N_YELLOW: f64 = 1.5;
pub const PRESSURE_GREEN: f64 = 0.1;
pub const PRESSURE_YELLOW: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanQuality {
    pub plan_id: String,
    pub top1_score: f64,
    pub effective_n: f64,
    pub bucket_coverage: f64,
    pub constraints_pressure: f64,
    pub grade: Grade,
}

fn grade_for(effective_n: f64, constraints_pressure: f64) -> Grade {
    if effective_n >= EFFECTIVE_N_GREEN && constraints_pressure <= PRESSURE_GREEN {
        Grade::Green
    } else if effective_n >= EFFECTIVE_N_YELLOW && constraints_pressure <= PRESSURE_YELLOW {
        Grade::Yellow
    } else {
        Grade::Red
    }
}

/// Pure computation: no filesystem access.
pub fn compute_plan_quality(
    plan_id: &str,
    universe: &[Candidate],
    weights: &BTreeMap<String, f64>,
    clipped_candidate_ids: &[String],
    bucket_by: &[String],
) -> PlanQuality {
    let top1_score = universe.first().map(|c| c.research_score).unwrap_or(0.0);
    let sum_sq: f64 = weights.values().map(|w| w * w).sum();
    let effective_n = if sum_sq > 0.0 { 1.0 / sum_sq } else { 0.0 };

    let mut buckets = std::collections::BTreeSet::new();
    for c in universe {
        let key: String = bucket_by
            .iter()
            .map(|f| match f.as_str() {
                "dataset_id" => c.dataset_id.clone(),
                "strategy_id" => c.strategy_id.clone(),
                "source_batch" => c.source_batch.clone(),
                other => c.metadata.get(other).map(|v| v.to_string()).unwrap_or_default(),
            })
            .collect::<Vec<_>>()
            .join("|");
        buckets.insert(key);
    }
    let bucket_coverage = if universe.is_empty() { 0.0 } else { buckets.len() as f64 / universe.len() as f64 };
    let constraints_pressure = if universe.is_empty() {
        0.0
    } else {
        clipped_candidate_ids.len() as f64 / universe.len() as f64
    };

    PlanQuality {
        plan_id: plan_id.to_string(),
        top1_score: canon::quantize(top1_score),
        effective_n: canon::quantize(effective_n),
        bucket_coverage: canon::quantize(bucket_coverage),
        constraints_pressure: canon::quantize(constraints_pressure),
        grade: grade_for(effective_n, constraints_pressure),
    }
}

fn write_if_changed(scope: &WriteScope, name: &str, value: &Value) -> CoreResult<()> {
    let bytes = canon::to_canonical_bytes(value);
    let path = scope.root_dir().join(name);
    if path.exists() {
        let existing = std::fs::read(&path)?;
        if existing == bytes {
            return Ok(());
        }
    }
    write_json_atomic(scope, name, value)?;
    Ok(())
}

/// Write the three-file quality package. A no-op at the filesystem level when
/// the computed quality is unchanged from what's already on disk.
pub fn write_plan_quality(layout: &Layout, quality: &PlanQuality) -> CoreResult<()> {
    let dir = layout.plan_dir(&quality.plan_id);
    let scope = WriteScope::exact(
        &dir,
        &["plan_quality.json", "plan_quality_checksums.json", "plan_quality_manifest.json"],
    );

    let quality_value = serde_json::to_value(quality)?;
    write_if_changed(&scope, "plan_quality.json", &quality_value)?;

    let checksums_value = json!({
        "plan_quality.json": canon::sha256_hex(&canon::to_canonical_bytes(&quality_value)),
    });
    write_if_changed(&scope, "plan_quality_checksums.json", &checksums_value)?;

    let mut manifest_value = json!({
        "plan_id": quality.plan_id,
        "files": checksums_value,
    });
    canon::stamp_self_hash(&mut manifest_value, "manifest_sha256")?;
    write_if_changed(&scope, "plan_quality_manifest.json", &manifest_value)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn candidate(id: &str, score: f64) -> Candidate {
        crate::candidates::create_candidate(
            id.into(),
            "s1".into(),
            "d1".into(),
            "b1".into(),
            "h".into(),
            json!({}),
            score,
            json!({}),
            crate::candidates::DEFAULT_FORBIDDEN_METADATA_KEYS,
        )
        .unwrap()
    }

    #[test]
    fn grade_boundaries() {
        assert_eq!(grade_for(3.5, 0.05), Grade::Green);
        assert_eq!(grade_for(2.0, 0.2), Grade::Yellow);
        assert_eq!(grade_for(1.0, 0.5), Grade::Red);
    }

    #[test]
    fn rerun_is_filesystem_noop() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let universe = vec![candidate("c1", 0.9)];
        let mut weights = BTreeMap::new();
        weights.insert("c1".to_string(), 1.0);
        let quality = compute_plan_quality("plan1", &universe, &weights, &[], &["dataset_id".to_string()]);
        write_plan_quality(&layout, &quality).unwrap();

        let path = layout.plan_dir("plan1").join("plan_quality.json");
        let mtime1 = std::fs::metadata(&path).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        write_plan_quality(&layout, &quality).unwrap();
        let mtime2 = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(mtime1, mtime2);
    }
}
