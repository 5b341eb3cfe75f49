//! Run history ledger. An append-only JSONL record of every batch
//! submitted in a season, kept alongside (not instead of) the season index.
//! Supplements the governance contract: useful for audit and replay tooling
//! that wants a flat timeline rather than the season index's current-state view.

use crate::atomic::append_line;
use crate::canon;
use crate::error::CoreResult;
use crate::layout::Layout;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub batch_id: String,
    pub season: String,
    pub dataset_id: String,
    pub strategy_id: String,
    pub total_evaluated: usize,
    pub recorded_at: String,
}

/// Filters applied when reading a season's history back out.
#[derive(Debug, Clone, Default)]
pub struct WriteFilter {
    pub dataset_id: Option<String>,
    pub strategy_id: Option<String>,
}

impl WriteFilter {
    fn matches(&self, entry: &HistoryEntry) -> bool {
        self.dataset_id.as_deref().map(|d| d == entry.dataset_id).unwrap_or(true)
            && self.strategy_id.as_deref().map(|s| s == entry.strategy_id).unwrap_or(true)
    }
}

/// Append one entry. Never rewrites a prior line, the ledger only grows.
pub fn append_history(layout: &Layout, entry: &HistoryEntry) -> CoreResult<()> {
    let path = layout.history_file(&entry.season);
    let line = String::from_utf8(canon::to_canonical_bytes(&serde_json::to_value(entry)?))
        .expect("canonical JSON is always valid UTF-8");
    append_line(&path, &line)
}

/// Read back a season's history, oldest entry first, optionally filtered.
pub fn read_history(layout: &Layout, season: &str, filter: &WriteFilter) -> CoreResult<Vec<HistoryEntry>> {
    let path = layout.history_file(season);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(&path)?;
    let mut out = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: HistoryEntry = serde_json::from_str(line)?;
        if filter.matches(&entry) {
            out.push(entry);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(batch_id: &str, strategy_id: &str) -> HistoryEntry {
        HistoryEntry {
            batch_id: batch_id.to_string(),
            season: "2026Q1".to_string(),
            dataset_id: "d1".to_string(),
            strategy_id: strategy_id.to_string(),
            total_evaluated: 10,
            recorded_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn appends_grow_the_ledger() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        append_history(&layout, &entry("b1", "s1")).unwrap();
        append_history(&layout, &entry("b2", "s2")).unwrap();
        let all = read_history(&layout, "2026Q1", &WriteFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].batch_id, "b1");
        assert_eq!(all[1].batch_id, "b2");
    }

    #[test]
    fn filters_by_strategy_id() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        append_history(&layout, &entry("b1", "s1")).unwrap();
        append_history(&layout, &entry("b2", "s2")).unwrap();
        let filter = WriteFilter { dataset_id: None, strategy_id: Some("s2".to_string()) };
        let filtered = read_history(&layout, "2026Q1", &filter).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].batch_id, "b2");
    }

    #[test]
    fn missing_ledger_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let all = read_history(&layout, "2026Q1", &WriteFilter::default()).unwrap();
        assert!(all.is_empty());
    }
}
