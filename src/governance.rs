//! Governance & Season Store, Policy Engine. Batch/season lifecycle, the
//! one-way freeze latch, and action classification gating every mutating edge.

use crate::atomic::{write_json_atomic, WriteScope};
use crate::config::{CoreConfig, LIVE_TOKEN_MAGIC};
use crate::error::{CoreError, CoreResult};
use crate::layout::Layout;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonState {
    Open,
    Frozen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonMetadata {
    pub season: String,
    pub state: SeasonState,
    pub tags: Vec<String>,
    pub note: Option<String>,
    pub created_at: String,
    pub frozen_at: Option<String>,
}

/// Owns the per-season subdirectory. Reads return `None` on a missing
/// season rather than side-effecting a create.
pub struct SeasonStore<'a> {
    layout: &'a Layout,
}

impl<'a> SeasonStore<'a> {
    pub fn new(layout: &'a Layout) -> Self {
        Self { layout }
    }

    /// Create the shared season-index root eagerly; idempotent.
    pub fn ensure_root(&self) -> CoreResult<()> {
        crate::atomic::ensure_dir(&self.layout.root().join("season_index"))
    }

    pub fn read_metadata(&self, season: &str) -> CoreResult<Option<SeasonMetadata>> {
        let path = self.layout.season_metadata_file(season);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&std::fs::read(&path)?)?))
    }

    /// Create a season's metadata at `OPEN`, if it does not already exist.
    pub fn open(&self, season: &str, created_at: &str) -> CoreResult<SeasonMetadata> {
        if let Some(existing) = self.read_metadata(season)? {
            return Ok(existing);
        }
        let metadata = SeasonMetadata {
            season: season.to_string(),
            state: SeasonState::Open,
            tags: Vec::new(),
            note: None,
            created_at: created_at.to_string(),
            frozen_at: None,
        };
        self.write_metadata(&metadata)?;
        Ok(metadata)
    }

    fn write_metadata(&self, metadata: &SeasonMetadata) -> CoreResult<()> {
        let dir = self.layout.season_store_dir(&metadata.season);
        let scope = WriteScope::exact(dir, &["season_index.json", "season_metadata.json"]);
        write_json_atomic(&scope, "season_metadata.json", &serde_json::to_value(metadata)?)?;
        Ok(())
    }

    /// Write the season index, rejecting if the season is frozen.
    pub fn write_index(&self, season: &str, index: &Value) -> CoreResult<()> {
        let metadata = self
            .read_metadata(season)?
            .ok_or_else(|| CoreError::NotFound(format!("season: {season}")))?;
        if metadata.state == SeasonState::Frozen {
            return Err(CoreError::FrozenViolation(season.to_string()));
        }
        let dir = self.layout.season_store_dir(season);
        let scope = WriteScope::exact(dir, &["season_index.json", "season_metadata.json"]);
        write_json_atomic(&scope, "season_index.json", index)
    }

    /// One-way freeze. Freezing an already-frozen season is a no-op, not an error.
    pub fn freeze(&self, season: &str, frozen_at: &str) -> CoreResult<SeasonMetadata> {
        let mut metadata = self
            .read_metadata(season)?
            .ok_or_else(|| CoreError::NotFound(format!("season: {season}")))?;
        if metadata.state == SeasonState::Frozen {
            return Ok(metadata);
        }
        metadata.state = SeasonState::Frozen;
        metadata.frozen_at = Some(frozen_at.to_string());
        self.write_metadata(&metadata)?;
        Ok(metadata)
    }
}

/// Per-batch freeze bit, one-way, stored in the batch's own `metadata.json`.
pub struct BatchStore<'a> {
    layout: &'a Layout,
}

impl<'a> BatchStore<'a> {
    pub fn new(layout: &'a Layout) -> Self {
        Self { layout }
    }

    pub fn freeze(&self, batch_id: &str) -> CoreResult<()> {
        let path = self.layout.batch_metadata(batch_id);
        let mut metadata: Value = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            json!({ "batch_id": batch_id })
        };
        metadata["frozen"] = json!(true);
        let dir = self.layout.artifacts_dir(batch_id);
        let scope = WriteScope::exact(dir, &["metadata.json", "index.json", "summary.json", "execution.json"]);
        write_json_atomic(&scope, "metadata.json", &metadata)
    }
}

/// The three policy risk levels every action is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionLevel {
    ReadOnly,
    ResearchMutate,
    LiveExecute,
}

/// A closed lookup table from action name to risk level. Unknown actions
/// default fail-safe to `LiveExecute`, the most restrictive gate.
pub struct PolicyEngine {
    table: HashMap<&'static str, ActionLevel>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        let mut table = HashMap::new();
        table.insert("replay_topk", ActionLevel::ReadOnly);
        table.insert("replay_batches", ActionLevel::ReadOnly);
        table.insert("replay_leaderboard", ActionLevel::ReadOnly);
        table.insert("list_plans", ActionLevel::ReadOnly);
        table.insert("get_plan", ActionLevel::ReadOnly);
        table.insert("list_snapshots", ActionLevel::ReadOnly);
        table.insert("compute_plan_quality", ActionLevel::ReadOnly);
        table.insert("render_plan_view", ActionLevel::ReadOnly);
        table.insert("submit_job", ActionLevel::ResearchMutate);
        table.insert("rebuild_index", ActionLevel::ResearchMutate);
        table.insert("export_season", ActionLevel::ResearchMutate);
        table.insert("build_plan", ActionLevel::ResearchMutate);
        table.insert("freeze_season", ActionLevel::ResearchMutate);
        table.insert("freeze_batch", ActionLevel::ResearchMutate);
        table.insert("create_snapshot", ActionLevel::ResearchMutate);
        table.insert("register_dataset", ActionLevel::ResearchMutate);
        table.insert("execute_live_order", ActionLevel::LiveExecute);
        Self { table }
    }
}

impl PolicyEngine {
    pub fn classify(&self, action: &str) -> ActionLevel {
        self.table.get(action).copied().unwrap_or(ActionLevel::LiveExecute)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
    pub risk: ActionLevel,
    pub action: String,
    pub season: String,
}

fn live_token_present(config: &CoreConfig) -> bool {
    if !config.enable_live {
        return false;
    }
    match &config.live_token_path {
        Some(path) => std::fs::read_to_string(path)
            .map(|contents| contents.trim() == LIVE_TOKEN_MAGIC)
            .unwrap_or(false),
        None => false,
    }
}

/// Evaluate `action` against the current `season_state`.
pub fn evaluate(
    engine: &PolicyEngine,
    config: &CoreConfig,
    action: &str,
    season: &str,
    season_state: SeasonState,
) -> PolicyDecision {
    let risk = engine.classify(action);
    let (allowed, reason) = match risk {
        ActionLevel::ReadOnly => (true, "read-only action always allowed".to_string()),
        ActionLevel::ResearchMutate => {
            if season_state == SeasonState::Frozen {
                (false, format!("season '{season}' is frozen"))
            } else {
                (true, "season is open".to_string())
            }
        }
        ActionLevel::LiveExecute => {
            if live_token_present(config) {
                (true, "live execution armed".to_string())
            } else {
                (false, "live execution is not armed".to_string())
            }
        }
    };
    PolicyDecision { allowed, reason, risk, action: action.to_string(), season: season.to_string() }
}
