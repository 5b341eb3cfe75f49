//! WFS (Walk-Forward Split) Engine. Runs a strategy capability over a
//! Feature Bundle across a set of time splits and parameter sets, producing
//! a deterministically-ordered summary and an index of contributing splits.
//!
//! Pure in-memory: the only inputs are the bundle and config already
//! resolved by the caller; no wall-clock or filesystem access here.

use crate::canon;
use crate::error::{CoreError, CoreResult};
use crate::features::{FeatureBundle, FeatureSeries};
use crate::strategy::{StrategyCapability, StrategyContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WfsSplit {
    pub id: String,
    pub ts_start: i64,
    pub ts_end: i64,
}

#[derive(Debug, Clone)]
pub struct WfsConfig {
    pub splits: Vec<WfsSplit>,
    pub param_grid: Vec<Value>,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WfsJobResult {
    pub param_hash: String,
    pub params: Value,
    pub aggregate_score: f64,
    pub per_split_scores: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WfsSummary {
    pub top: Vec<WfsJobResult>,
    pub total_evaluated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WfsIndexEntry {
    pub param_hash: String,
    pub split_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WfsIndex {
    pub entries: Vec<WfsIndexEntry>,
}

fn slice_series(series: &FeatureSeries, ts_start: i64, ts_end: i64) -> FeatureSeries {
    let mut ts = Vec::new();
    let mut values = Vec::new();
    for (t, v) in series.ts.iter().zip(series.values.iter()) {
        if *t >= ts_start && *t < ts_end {
            ts.push(*t);
            values.push(*v);
        }
    }
    FeatureSeries { ts, values }
}

fn slice_bundle(bundle: &FeatureBundle, ts_start: i64, ts_end: i64) -> FeatureBundle {
    bundle
        .iter()
        .map(|(tf, by_name)| {
            let sliced = by_name
                .iter()
                .map(|(name, series)| (name.clone(), slice_series(series, ts_start, ts_end)))
                .collect();
            (*tf, sliced)
        })
        .collect()
}

fn check_requirements(strategy: &dyn StrategyCapability, bundle: &FeatureBundle) -> CoreResult<()> {
    for req in strategy.feature_requirements() {
        let present = bundle
            .get(&req.timeframe_min)
            .map(|by_name| by_name.contains_key(&req.name))
            .unwrap_or(false);
        if !present {
            return Err(CoreError::ContractViolation(format!(
                "strategy '{}' requires feature {}@{}m, not present in bundle",
                strategy.strategy_id(),
                req.name,
                req.timeframe_min
            )));
        }
    }
    Ok(())
}

/// Run `strategy` over `bundle` across every `(split, param set)` pair in `config`.
pub fn run(strategy: &dyn StrategyCapability, bundle: &FeatureBundle, config: &WfsConfig) -> CoreResult<(WfsSummary, WfsIndex)> {
    check_requirements(strategy, bundle)?;

    let mut results: Vec<WfsJobResult> = Vec::with_capacity(config.param_grid.len());
    let mut index_entries: Vec<WfsIndexEntry> = Vec::with_capacity(config.param_grid.len());

    for params in &config.param_grid {
        let param_hash = canon::canonical_sha256_of(params)?;
        let mut per_split_scores = Vec::with_capacity(config.splits.len());
        let mut split_ids = Vec::with_capacity(config.splits.len());

        for split in &config.splits {
            let sliced = slice_bundle(bundle, split.ts_start, split.ts_end);
            let ctx = StrategyContext { bundle: &sliced };
            let output = strategy.invoke(&ctx, params)?;
            per_split_scores.push((split.id.clone(), output.score));
            split_ids.push(split.id.clone());
        }

        let aggregate_score = if per_split_scores.is_empty() {
            0.0
        } else {
            per_split_scores.iter().map(|(_, s)| *s).sum::<f64>() / per_split_scores.len() as f64
        };

        results.push(WfsJobResult {
            param_hash: param_hash.clone(),
            params: params.clone(),
            aggregate_score,
            per_split_scores,
        });
        index_entries.push(WfsIndexEntry { param_hash, split_ids });
    }

    // Deterministic ordering: score desc, tie-broken by canonical(params) asc
    // (the param_hash is a stand-in for a canonical-bytes comparison).
    results.sort_by(|a, b| {
        b.aggregate_score
            .partial_cmp(&a.aggregate_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.param_hash.cmp(&b.param_hash))
    });

    let total_evaluated = results.len();
    results.truncate(config.top_k);

    Ok((WfsSummary { top: results, total_evaluated }, WfsIndex { entries: index_entries }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::test_support::FixedScoreStrategy;
    use serde_json::json;

    #[test]
    fn requires_missing_feature_fails_contract() {
        let strategy = FixedScoreStrategy {
            id: "s1".into(),
            requirements: vec![crate::resolver::FeatureRequirement { name: "atr_14".into(), timeframe_min: 15 }],
            schema: Value::Null,
            fixed_score: 1.0,
        };
        let bundle = FeatureBundle::new();
        let config = WfsConfig { splits: vec![], param_grid: vec![json!({})], top_k: 5 };
        let err = run(&strategy, &bundle, &config).unwrap_err();
        assert!(matches!(err, CoreError::ContractViolation(_)));
    }

    #[test]
    fn top_k_is_sorted_and_truncated() {
        struct Scored(f64);
        impl StrategyCapability for Scored {
            fn strategy_id(&self) -> &str { "scored" }
            fn version(&self) -> &str { "1.0.0" }
            fn param_schema(&self) -> &Value { &Value::Null }
            fn defaults(&self) -> &Value { &Value::Null }
            fn feature_requirements(&self) -> &[crate::resolver::FeatureRequirement] { &[] }
            fn invoke(&self, _ctx: &StrategyContext<'_>, params: &Value) -> CoreResult<crate::strategy::StrategyOutput> {
                let score = params["score"].as_f64().unwrap_or(0.0);
                Ok(crate::strategy::StrategyOutput { intents: vec![], score })
            }
        }
        let strategy = Scored(0.0);
        let bundle = FeatureBundle::new();
        let config = WfsConfig {
            splits: vec![WfsSplit { id: "split0".into(), ts_start: 0, ts_end: 100 }],
            param_grid: vec![json!({"score": 0.1}), json!({"score": 0.9}), json!({"score": 0.5})],
            top_k: 2,
        };
        let (summary, index) = run(&strategy, &bundle, &config).unwrap();
        assert_eq!(summary.top.len(), 2);
        assert_eq!(summary.total_evaluated, 3);
        assert!(summary.top[0].aggregate_score >= summary.top[1].aggregate_score);
        assert_eq!(index.entries.len(), 3);
    }
}
