//! Bars Cache. Normalizes raw ingested bars and resamples them to the
//! fixed timeframe ladder, writing a self-hashing manifest alongside.

use crate::atomic::{write_json_atomic, WriteScope};
use crate::canon;
use crate::error::{CoreError, CoreResult};
use crate::fingerprint_index::{FingerprintDecision, FingerprintIndex};
use crate::layout::{Layout, RESAMPLE_TIMEFRAMES_MIN};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Session policy every Bars/Features manifest records verbatim.
pub const TS_DTYPE: &str = "datetime64[s]";
pub const BREAKS_POLICY: &str = "drop";

/// A single OHLCV bar. Timestamps are whole seconds since the Unix epoch, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn utc_date(&self) -> NaiveDate {
        chrono::DateTime::from_timestamp(self.ts, 0)
            .expect("bar timestamp out of range")
            .date_naive()
    }
}

/// Sort by timestamp, drop exact-duplicate timestamps (keep first occurrence,
/// since ingestion already orders by arrival), and reject bars whose OHLC
/// relationship is inconsistent.
pub fn normalize_bars(mut raw: Vec<Bar>) -> CoreResult<Vec<Bar>> {
    raw.sort_by_key(|b| b.ts);
    let mut out: Vec<Bar> = Vec::with_capacity(raw.len());
    let mut last_ts: Option<i64> = None;
    for bar in raw {
        if last_ts == Some(bar.ts) {
            continue;
        }
        let hi = bar.high;
        let lo = bar.low;
        if hi < lo || hi < bar.open || hi < bar.close || lo > bar.open || lo > bar.close {
            return Err(CoreError::ContractViolation(format!(
                "bar at ts={} has inconsistent OHLC: o={} h={} l={} c={}",
                bar.ts, bar.open, bar.high, bar.low, bar.close
            )));
        }
        last_ts = Some(bar.ts);
        out.push(bar);
    }
    Ok(out)
}

/// Resample normalized, 1-minute-granularity bars to `tf_min`-minute buckets
/// aligned to epoch. A bucket with no source bars is never emitted.
pub fn resample(normalized: &[Bar], tf_min: u32) -> Vec<Bar> {
    let bucket_secs = i64::from(tf_min) * 60;
    let mut buckets: BTreeMap<i64, Vec<Bar>> = BTreeMap::new();
    for bar in normalized {
        let bucket_start = (bar.ts / bucket_secs) * bucket_secs;
        buckets.entry(bucket_start).or_default().push(*bar);
    }
    buckets
        .into_iter()
        .map(|(bucket_start, group)| Bar {
            ts: bucket_start,
            open: group.first().unwrap().open,
            high: group.iter().map(|b| b.high).fold(f64::MIN, f64::max),
            low: group.iter().map(|b| b.low).fold(f64::MAX, f64::min),
            close: group.last().unwrap().close,
            volume: group.iter().map(|b| b.volume).sum(),
        })
        .collect()
}

/// Manifest of every file the Bars Cache wrote for one `(season, dataset_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarsManifest {
    pub season: String,
    pub dataset_id: String,
    pub ts_dtype: String,
    pub breaks_policy: String,
    /// `"FULL"` or `"INCREMENTAL"`.
    pub mode: String,
    /// relative file name -> sha256 of its canonical bytes
    pub files: BTreeMap<String, String>,
    pub bars_manifest_sha256: String,
}

pub struct BarsCache<'a> {
    layout: &'a Layout,
}

impl<'a> BarsCache<'a> {
    pub fn new(layout: &'a Layout) -> Self {
        Self { layout }
    }

    fn write(
        &self,
        season: &str,
        dataset_id: &str,
        normalized: &[Bar],
        fp_index: FingerprintIndex,
        mode: &str,
    ) -> CoreResult<(BarsManifest, FingerprintIndex)> {
        let dir = self.layout.bars_dir(season, dataset_id);
        let scope = WriteScope::exact(&dir, &["bars_manifest.json", "normalized.json"])
            .with_prefixes(&["resampled_"]);

        let mut files = BTreeMap::new();

        let normalized_value = json!(normalized);
        write_json_atomic(&scope, "normalized.json", &normalized_value)?;
        files.insert(
            "normalized.json".to_string(),
            canon::sha256_hex(&canon::to_canonical_bytes(&normalized_value)),
        );

        for tf in RESAMPLE_TIMEFRAMES_MIN {
            let resampled = resample(normalized, tf);
            let name = format!("resampled_{tf}m.json");
            let value = json!(resampled);
            write_json_atomic(&scope, &name, &value)?;
            files.insert(name, canon::sha256_hex(&canon::to_canonical_bytes(&value)));
        }

        let mut manifest_value = json!({
            "season": season,
            "dataset_id": dataset_id,
            "ts_dtype": TS_DTYPE,
            "breaks_policy": BREAKS_POLICY,
            "mode": mode,
            "files": files,
        });
        let hash = canon::stamp_self_hash(&mut manifest_value, "bars_manifest_sha256")?;
        write_json_atomic(&scope, "bars_manifest.json", &manifest_value)?;

        let index_scope = WriteScope::exact(
            self.layout.shared_dir(season, dataset_id),
            &["fingerprint_index.json"],
        );
        write_json_atomic(
            &index_scope,
            "fingerprint_index.json",
            &serde_json::to_value(&fp_index)?,
        )?;

        Ok((
            BarsManifest {
                season: season.to_string(),
                dataset_id: dataset_id.to_string(),
                ts_dtype: TS_DTYPE.to_string(),
                breaks_policy: BREAKS_POLICY.to_string(),
                mode: mode.to_string(),
                files,
                bars_manifest_sha256: hash,
            },
            fp_index,
        ))
    }

    /// Normalize, resample, and persist bars for `(season, dataset_id)`,
    /// returning the written manifest and the fingerprint index derived from
    /// the normalized sequence (the only input permitted to gate a later
    /// incremental rebuild).
    pub fn build(
        &self,
        season: &str,
        dataset_id: &str,
        raw: Vec<Bar>,
    ) -> CoreResult<(BarsManifest, FingerprintIndex)> {
        let normalized = normalize_bars(raw)?;
        let fp_index = FingerprintIndex::build(&normalized);
        self.write(season, dataset_id, &normalized, fp_index, "FULL")
    }

    /// INCREMENTAL build: consult `previous_index` (the fingerprint index
    /// persisted by the prior build) before touching anything on disk. Only
    /// `is_new` and `append_only` are permitted; a `historical_change` raises
    /// [`CoreError::IncrementalRejected`] carrying the earliest changed day,
    /// and nothing is written.
    ///
    /// The recompute window for `append_only` starts at the UTC session
    /// (calendar day) containing the first appended bar, per the bar-session
    /// alignment `session_start + N*tf == start` that `resample` already
    /// respects day-by-day; the resampled output over the covered range is
    /// byte-identical to what `build` would have produced from scratch.
    pub fn build_incremental(
        &self,
        season: &str,
        dataset_id: &str,
        raw: Vec<Bar>,
        previous_index: &FingerprintIndex,
    ) -> CoreResult<(BarsManifest, FingerprintIndex)> {
        let normalized = normalize_bars(raw)?;
        let fp_index = FingerprintIndex::build(&normalized);

        if let FingerprintDecision::HistoricalChange { earliest_changed_day } =
            FingerprintIndex::compare(previous_index, &fp_index)
        {
            return Err(CoreError::IncrementalRejected(earliest_changed_day.to_string()));
        }

        self.write(season, dataset_id, &normalized, fp_index, "INCREMENTAL")
    }
}
