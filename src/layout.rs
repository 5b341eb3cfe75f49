//! Centralizes every on-disk path template so no path is ever hand-built twice.
//!
//! All paths are rooted at a single `outputs/` directory, matching the
//! layout documented in the governance contract. Timeframes in this crate
//! are always expressed in minutes.

use std::path::PathBuf;

/// Resample timeframes (minutes) the Bars Cache always produces.
pub const RESAMPLE_TIMEFRAMES_MIN: [u32; 5] = [15, 30, 60, 120, 240];

/// Root of the on-disk artifact tree.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    // -- shared/{season}/{dataset_id}/ --------------------------------------

    pub fn shared_dir(&self, season: &str, dataset_id: &str) -> PathBuf {
        self.root.join("shared").join(season).join(dataset_id)
    }

    pub fn shared_manifest(&self, season: &str, dataset_id: &str) -> PathBuf {
        self.shared_dir(season, dataset_id).join("shared_manifest.json")
    }

    pub fn bars_dir(&self, season: &str, dataset_id: &str) -> PathBuf {
        self.shared_dir(season, dataset_id).join("bars")
    }

    pub fn bars_manifest(&self, season: &str, dataset_id: &str) -> PathBuf {
        self.bars_dir(season, dataset_id).join("bars_manifest.json")
    }

    pub fn bars_normalized(&self, season: &str, dataset_id: &str) -> PathBuf {
        self.bars_dir(season, dataset_id).join("normalized.json")
    }

    pub fn bars_resampled(&self, season: &str, dataset_id: &str, tf_min: u32) -> PathBuf {
        self.bars_dir(season, dataset_id).join(format!("resampled_{tf_min}m.json"))
    }

    pub fn features_dir(&self, season: &str, dataset_id: &str) -> PathBuf {
        self.shared_dir(season, dataset_id).join("features")
    }

    pub fn features_manifest(&self, season: &str, dataset_id: &str) -> PathBuf {
        self.features_dir(season, dataset_id).join("features_manifest.json")
    }

    pub fn features_file(&self, season: &str, dataset_id: &str, tf_min: u32) -> PathBuf {
        self.features_dir(season, dataset_id).join(format!("features_{tf_min}m.json"))
    }

    pub fn fingerprint_index(&self, season: &str, dataset_id: &str) -> PathBuf {
        self.shared_dir(season, dataset_id).join("fingerprint_index.json")
    }

    // -- artifacts/{batch_id}/ ----------------------------------------------

    pub fn artifacts_dir(&self, batch_id: &str) -> PathBuf {
        self.root.join("artifacts").join(batch_id)
    }

    pub fn batch_metadata(&self, batch_id: &str) -> PathBuf {
        self.artifacts_dir(batch_id).join("metadata.json")
    }

    pub fn batch_index(&self, batch_id: &str) -> PathBuf {
        self.artifacts_dir(batch_id).join("index.json")
    }

    pub fn batch_summary(&self, batch_id: &str) -> PathBuf {
        self.artifacts_dir(batch_id).join("summary.json")
    }

    pub fn batch_execution(&self, batch_id: &str) -> PathBuf {
        self.artifacts_dir(batch_id).join("execution.json")
    }

    // -- exports/seasons/{season}/ ------------------------------------------

    pub fn export_dir(&self, season: &str) -> PathBuf {
        self.root.join("exports").join("seasons").join(season)
    }

    pub fn export_manifest(&self, season: &str) -> PathBuf {
        self.export_dir(season).join("manifest.json")
    }

    pub fn export_season_index(&self, season: &str) -> PathBuf {
        self.export_dir(season).join("season_index.json")
    }

    pub fn export_replay_index(&self, season: &str) -> PathBuf {
        self.export_dir(season).join("replay_index.json")
    }

    pub fn export_batch_dir(&self, season: &str, batch_id: &str) -> PathBuf {
        self.export_dir(season).join("batches").join(batch_id)
    }

    // -- portfolio/plans/{plan_id}/ ------------------------------------------

    pub fn plan_dir(&self, plan_id: &str) -> PathBuf {
        self.root.join("portfolio").join("plans").join(plan_id)
    }

    pub fn plans_root(&self) -> PathBuf {
        self.root.join("portfolio").join("plans")
    }

    // -- snapshots/{symbol}_{timeframe}_{normalized_sha256[:12]}/ ------------

    pub fn snapshot_dir_name(symbol: &str, timeframe: &str, normalized_sha256: &str) -> String {
        let prefix: String = normalized_sha256.chars().take(12).collect();
        format!("{symbol}_{timeframe}_{prefix}")
    }

    pub fn snapshot_dir(&self, symbol: &str, timeframe: &str, normalized_sha256: &str) -> PathBuf {
        self.root
            .join("snapshots")
            .join(Self::snapshot_dir_name(symbol, timeframe, normalized_sha256))
    }

    // -- datasets/ ------------------------------------------------------------

    pub fn datasets_index(&self) -> PathBuf {
        self.root.join("datasets").join("datasets_index.json")
    }

    // -- season_index/{season}/ ------------------------------------------------

    pub fn season_store_dir(&self, season: &str) -> PathBuf {
        self.root.join("season_index").join(season)
    }

    pub fn season_index_file(&self, season: &str) -> PathBuf {
        self.season_store_dir(season).join("season_index.json")
    }

    pub fn season_metadata_file(&self, season: &str) -> PathBuf {
        self.season_store_dir(season).join("season_metadata.json")
    }

    // -- history/ (supplemented, not in the original layout table) -----------

    pub fn history_file(&self, season: &str) -> PathBuf {
        self.root.join("history").join(format!("{season}.jsonl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_dir_name_truncates_to_12() {
        let name = Layout::snapshot_dir_name("BTCUSD", "1m", "abcdefabcdefabcdefabcdef");
        assert_eq!(name, "BTCUSD_1m_abcdefabcdef");
    }
}
