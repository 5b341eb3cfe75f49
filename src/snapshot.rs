//! Snapshot & Dataset Registry. Takes raw bars for a `(symbol, timeframe)`,
//! normalizes them, and commits a content-addressed snapshot directory plus
//! an append-only registry entry.

use crate::atomic::{write_json_atomic, WriteScope};
use crate::bars::{normalize_bars, Bar};
use crate::canon;
use crate::error::{CoreError, CoreResult};
use crate::layout::Layout;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub count: usize,
    pub min_ts: i64,
    pub max_ts: i64,
    pub min_price: f64,
    pub max_price: f64,
    pub total_volume: f64,
}

fn compute_stats(bars: &[Bar]) -> CoreResult<SnapshotStats> {
    if bars.is_empty() {
        return Err(CoreError::ContractViolation("snapshot requires at least one bar".into()));
    }
    let min_ts = bars.iter().map(|b| b.ts).min().unwrap();
    let max_ts = bars.iter().map(|b| b.ts).max().unwrap();
    let min_price = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let max_price = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let total_volume: f64 = bars.iter().map(|b| b.volume).sum();
    Ok(SnapshotStats {
        count: bars.len(),
        min_ts,
        max_ts,
        min_price: canon::quantize(min_price),
        max_price: canon::quantize(max_price),
        total_volume: canon::quantize(total_volume),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub dataset_id: String,
    pub symbol: String,
    pub timeframe: String,
    pub raw_sha256: String,
    pub normalized_sha256: String,
    pub created_at: String,
    pub stats: SnapshotStats,
    pub manifest_sha256: String,
}

pub struct SnapshotRegistry<'a> {
    layout: &'a Layout,
}

impl<'a> SnapshotRegistry<'a> {
    pub fn new(layout: &'a Layout) -> Self {
        Self { layout }
    }

    fn read_index(&self) -> CoreResult<BTreeMap<String, String>> {
        let path = self.layout.datasets_index();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        let map = value
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(map)
    }

    /// Register a dataset id against its snapshot directory path. Append-only:
    /// registering an id that already exists is a [`CoreError::Duplicate`].
    fn append_index(&self, dataset_id: &str, dir_name: &str) -> CoreResult<()> {
        let mut index = self.read_index()?;
        if index.contains_key(dataset_id) {
            return Err(CoreError::Duplicate(dataset_id.to_string()));
        }
        index.insert(dataset_id.to_string(), dir_name.to_string());
        let dir = self.layout.root().join("datasets");
        let scope = WriteScope::exact(dir, &["datasets_index.json"]);
        write_json_atomic(&scope, "datasets_index.json", &json!(index))
    }

    /// Normalize `raw` and commit a content-addressed snapshot directory
    /// containing exactly `raw.json`, `normalized.json`, and
    /// `snapshot_manifest.json`. A second create under the same identity is a
    /// hard failure, not a silent no-op: callers that want idempotence must
    /// check `dataset_id` against the registry themselves before calling.
    pub fn create_snapshot(
        &self,
        symbol: &str,
        timeframe: &str,
        raw: Vec<Bar>,
        created_at: &str,
    ) -> CoreResult<SnapshotManifest> {
        let raw_value = json!(raw);
        let raw_sha256 = canon::sha256_hex(&canon::to_canonical_bytes(&raw_value));

        let normalized = normalize_bars(raw)?;
        let normalized_value = json!(normalized);
        let normalized_sha256 = canon::sha256_hex(&canon::to_canonical_bytes(&normalized_value));
        let stats = compute_stats(&normalized)?;

        let dir_name = Layout::snapshot_dir_name(symbol, timeframe, &normalized_sha256);
        let dataset_id = format!("snapshot_{dir_name}");
        let dir = self.layout.snapshot_dir(symbol, timeframe, &normalized_sha256);

        if dir.join("snapshot_manifest.json").exists() {
            return Err(CoreError::Duplicate(dataset_id));
        }

        let scope = WriteScope::exact(&dir, &["raw.json", "normalized.json", "snapshot_manifest.json"]);
        write_json_atomic(&scope, "raw.json", &raw_value)?;
        write_json_atomic(&scope, "normalized.json", &normalized_value)?;

        let mut manifest_value = json!({
            "dataset_id": dataset_id,
            "symbol": symbol,
            "timeframe": timeframe,
            "raw_sha256": raw_sha256,
            "normalized_sha256": normalized_sha256,
            "created_at": created_at,
            "stats": stats,
        });
        let manifest_sha256 = canon::stamp_self_hash(&mut manifest_value, "manifest_sha256")?;
        write_json_atomic(&scope, "snapshot_manifest.json", &manifest_value)?;

        self.append_index(&dataset_id, &dir_name)?;

        Ok(SnapshotManifest {
            dataset_id,
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            raw_sha256,
            normalized_sha256,
            created_at: created_at.to_string(),
            stats,
            manifest_sha256,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bar(ts: i64, price: f64) -> Bar {
        Bar { ts, open: price, high: price + 1.0, low: price - 1.0, close: price, volume: 10.0 }
    }

    #[test]
    fn snapshot_id_is_content_addressed() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let registry = SnapshotRegistry::new(&layout);
        let bars = vec![bar(0, 1.0), bar(60, 2.0)];
        let manifest = registry
            .create_snapshot("BTCUSD", "1m", bars, "2026-01-01T00:00:00Z")
            .unwrap();
        assert!(manifest.dataset_id.starts_with("snapshot_BTCUSD_1m_"));
        assert_eq!(manifest.stats.count, 2);
    }

    #[test]
    fn re_registering_same_content_is_a_hard_failure() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let registry = SnapshotRegistry::new(&layout);
        let bars = vec![bar(0, 1.0), bar(60, 2.0)];
        let m1 = registry
            .create_snapshot("BTCUSD", "1m", bars.clone(), "2026-01-01T00:00:00Z")
            .unwrap();
        let err = registry
            .create_snapshot("BTCUSD", "1m", bars, "2026-01-02T00:00:00Z")
            .unwrap_err();
        match err {
            CoreError::Duplicate(id) => assert_eq!(id, m1.dataset_id),
            other => panic!("expected Duplicate, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_bar_set() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let registry = SnapshotRegistry::new(&layout);
        let err = registry
            .create_snapshot("BTCUSD", "1m", vec![], "2026-01-01T00:00:00Z")
            .unwrap_err();
        assert!(matches!(err, CoreError::ContractViolation(_)));
    }
}
