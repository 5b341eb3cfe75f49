//! Feature Bank & Feature Cache. Pure feature computation and its
//! incremental lookback-rewind rebuild, on top of the Bars Cache only.

pub mod library;

use crate::atomic::{write_json_atomic, WriteScope};
use crate::bars::Bar;
pub use crate::bars::{BREAKS_POLICY, TS_DTYPE};
use crate::canon;
use crate::error::CoreResult;
use crate::layout::Layout;
pub use library::FeatureKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub timeframe_min: u32,
    pub kind: FeatureKind,
    pub window: usize,
    #[serde(default)]
    pub params: Value,
}

impl FeatureSpec {
    pub fn lookback_bars(&self) -> usize {
        self.window
    }

    pub fn warmup_bars(&self) -> usize {
        self.kind.warmup_bars(self.window)
    }
}

// FeatureKind needs (de)serialize for FeatureSpec; derive it by hand via a
// small string mapping since it is a plain enum with no payload.
impl Serialize for FeatureKind {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let name = match self {
            FeatureKind::Atr => "atr",
            FeatureKind::RollingReturnLog => "rolling_return_log",
            FeatureKind::RollingReturnSimple => "rolling_return_simple",
            FeatureKind::RollingZScore => "rolling_zscore",
            FeatureKind::SessionVwap => "session_vwap",
            FeatureKind::DonchianPosition => "donchian_position",
            FeatureKind::Momentum => "momentum",
            FeatureKind::PercentileRank => "percentile_rank",
        };
        s.serialize_str(name)
    }
}

impl<'de> Deserialize<'de> for FeatureKind {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "atr" => Ok(FeatureKind::Atr),
            "rolling_return_log" => Ok(FeatureKind::RollingReturnLog),
            "rolling_return_simple" => Ok(FeatureKind::RollingReturnSimple),
            "rolling_zscore" => Ok(FeatureKind::RollingZScore),
            "session_vwap" => Ok(FeatureKind::SessionVwap),
            "donchian_position" => Ok(FeatureKind::DonchianPosition),
            "momentum" => Ok(FeatureKind::Momentum),
            "percentile_rank" => Ok(FeatureKind::PercentileRank),
            other => Err(serde::de::Error::custom(format!("unknown feature kind: {other}"))),
        }
    }
}

/// One computed feature's timestamped series. `values[i]` is `None` exactly
/// where the source is warming up, never a sentinel float.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureSeries {
    pub ts: Vec<i64>,
    pub values: Vec<Option<f64>>,
}

/// `(feature_name, timeframe_min) -> series`, grouped by timeframe for storage.
pub type FeatureBundle = BTreeMap<u32, BTreeMap<String, FeatureSeries>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesManifest {
    pub season: String,
    pub dataset_id: String,
    pub specs: Vec<FeatureSpec>,
    pub ts_dtype: String,
    pub breaks_policy: String,
    pub files: BTreeMap<String, String>,
    /// Keyed by timeframe string (e.g. `"15"`), present only for INCREMENTAL builds.
    pub lookback_rewind_by_tf: BTreeMap<String, i64>,
    pub features_manifest_sha256: String,
}

pub struct FeatureBank<'a> {
    layout: &'a Layout,
}

impl<'a> FeatureBank<'a> {
    pub fn new(layout: &'a Layout) -> Self {
        Self { layout }
    }

    fn compute_bundle(bars_by_tf: &BTreeMap<u32, Vec<Bar>>, specs: &[FeatureSpec]) -> FeatureBundle {
        let mut bundle: FeatureBundle = BTreeMap::new();
        for spec in specs {
            let bars = match bars_by_tf.get(&spec.timeframe_min) {
                Some(b) => b,
                None => continue,
            };
            let values = spec.kind.compute(bars, spec.window);
            let ts: Vec<i64> = bars.iter().map(|b| b.ts).collect();
            bundle
                .entry(spec.timeframe_min)
                .or_default()
                .insert(spec.name.clone(), FeatureSeries { ts, values });
        }
        bundle
    }

    fn write_bundle(
        &self,
        season: &str,
        dataset_id: &str,
        specs: &[FeatureSpec],
        bundle: &FeatureBundle,
        lookback_rewind_by_tf: BTreeMap<String, i64>,
    ) -> CoreResult<FeaturesManifest> {
        let dir = self.layout.features_dir(season, dataset_id);
        let scope =
            WriteScope::exact(&dir, &["features_manifest.json"]).with_prefixes(&["features_"]);

        let mut files = BTreeMap::new();
        for (tf, by_name) in bundle {
            let name = format!("features_{tf}m.json");
            let value = json!({ "tf_min": tf, "features": by_name });
            write_json_atomic(&scope, &name, &value)?;
            files.insert(name, canon::sha256_hex(&canon::to_canonical_bytes(&value)));
        }

        let mut manifest_value = json!({
            "season": season,
            "dataset_id": dataset_id,
            "specs": specs,
            "ts_dtype": TS_DTYPE,
            "breaks_policy": BREAKS_POLICY,
            "files": files,
            "lookback_rewind_by_tf": lookback_rewind_by_tf,
        });
        let hash = canon::stamp_self_hash(&mut manifest_value, "features_manifest_sha256")?;
        write_json_atomic(&scope, "features_manifest.json", &manifest_value)?;

        Ok(FeaturesManifest {
            season: season.to_string(),
            dataset_id: dataset_id.to_string(),
            specs: specs.to_vec(),
            ts_dtype: TS_DTYPE.to_string(),
            breaks_policy: BREAKS_POLICY.to_string(),
            files,
            lookback_rewind_by_tf,
            features_manifest_sha256: hash,
        })
    }

    /// FULL build: compute every spec over the entirety of its timeframe's bars.
    pub fn build_full(
        &self,
        season: &str,
        dataset_id: &str,
        bars_by_tf: &BTreeMap<u32, Vec<Bar>>,
        specs: &[FeatureSpec],
    ) -> CoreResult<(FeaturesManifest, FeatureBundle)> {
        let bundle = Self::compute_bundle(bars_by_tf, specs);
        let manifest = self.write_bundle(season, dataset_id, specs, &bundle, BTreeMap::new())?;
        Ok((manifest, bundle))
    }

    /// INCREMENTAL build: recompute only `[rewind_idx(tf):end]` per timeframe
    /// and splice onto the previous bundle's unaffected prefix.
    ///
    /// `append_start_idx_by_tf` is the first bar index (within `bars_by_tf`)
    /// that is new for that timeframe.
    pub fn build_incremental(
        &self,
        season: &str,
        dataset_id: &str,
        bars_by_tf: &BTreeMap<u32, Vec<Bar>>,
        specs: &[FeatureSpec],
        previous: &FeatureBundle,
        append_start_idx_by_tf: &BTreeMap<u32, usize>,
    ) -> CoreResult<(FeaturesManifest, FeatureBundle)> {
        let mut max_lookback_by_tf: BTreeMap<u32, usize> = BTreeMap::new();
        for spec in specs {
            let entry = max_lookback_by_tf.entry(spec.timeframe_min).or_insert(0);
            *entry = (*entry).max(spec.lookback_bars());
        }

        let mut rewind_by_tf: BTreeMap<String, i64> = BTreeMap::new();
        let mut bundle: FeatureBundle = BTreeMap::new();

        for spec in specs {
            let bars = match bars_by_tf.get(&spec.timeframe_min) {
                Some(b) => b,
                None => continue,
            };
            let append_start_idx = *append_start_idx_by_tf.get(&spec.timeframe_min).unwrap_or(&0);
            let max_lookback = *max_lookback_by_tf.get(&spec.timeframe_min).unwrap_or(&0);
            let rewind_idx = append_start_idx.saturating_sub(max_lookback);
            rewind_by_tf.insert(spec.timeframe_min.to_string(), rewind_idx as i64);

            let full_recompute = spec.kind.compute(bars, spec.window);
            let ts: Vec<i64> = bars.iter().map(|b| b.ts).collect();

            let prev_series = previous
                .get(&spec.timeframe_min)
                .and_then(|by_name| by_name.get(&spec.name));

            let values = match prev_series {
                Some(prev) if rewind_idx > 0 && rewind_idx <= prev.values.len() => {
                    let mut spliced = prev.values[..rewind_idx].to_vec();
                    spliced.extend_from_slice(&full_recompute[rewind_idx..]);
                    spliced
                }
                _ => full_recompute,
            };

            bundle
                .entry(spec.timeframe_min)
                .or_default()
                .insert(spec.name.clone(), FeatureSeries { ts, values });
        }

        let manifest = self.write_bundle(season, dataset_id, specs, &bundle, rewind_by_tf)?;
        Ok((manifest, bundle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                ts: i as i64 * 900,
                open: 100.0 + i as f64,
                high: 101.0 + i as f64,
                low: 99.0 + i as f64,
                close: 100.5 + i as f64,
                volume: 10.0,
            })
            .collect()
    }

    fn spec() -> FeatureSpec {
        FeatureSpec {
            name: "mom_5".into(),
            timeframe_min: 15,
            kind: FeatureKind::Momentum,
            window: 5,
            params: Value::Null,
        }
    }

    #[test]
    fn incremental_matches_full_over_covered_range() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let bank = FeatureBank::new(&layout);
        let specs = vec![spec()];

        let base_bars = bars(20);
        let mut bars_by_tf = BTreeMap::new();
        bars_by_tf.insert(15u32, base_bars.clone());
        let (_m1, full_bundle) = bank.build_full("s", "d", &bars_by_tf, &specs).unwrap();

        let extended_bars = bars(25);
        bars_by_tf.insert(15u32, extended_bars.clone());
        let mut append_start = BTreeMap::new();
        append_start.insert(15u32, 20usize);
        let (_m2, inc_bundle) =
            bank.build_incremental("s", "d", &bars_by_tf, &specs, &full_bundle, &append_start).unwrap();

        let full_over_extended = {
            let mut all = bars_by_tf.clone();
            all.insert(15, extended_bars.clone());
            FeatureBank::compute_bundle(&all, &specs)
        };

        let inc_series = &inc_bundle[&15]["mom_5"];
        let full_series = &full_over_extended[&15]["mom_5"];
        assert_eq!(inc_series.values, full_series.values);
    }
}
