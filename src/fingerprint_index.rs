//! Fingerprint Index. Per-day canonical hashes of bars, and the only signal
//! allowed to gate an incremental rebuild.
//!
//! Deliberately never reads file modification times or sizes: the index is
//! derived purely from bar content, so two ingests of byte-identical bars on
//! different machines at different times produce the same index.

use crate::bars::Bar;
use crate::canon;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-day canonical hashes, keyed by calendar day (ascending, via `BTreeMap`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FingerprintIndex {
    pub days: BTreeMap<NaiveDate, String>,
}

/// Result of comparing an existing index against a freshly-derived one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintDecision {
    /// No day's hash changed and no new days appeared.
    NoChange,
    /// There is no prior index to compare against.
    IsNew,
    /// Only new trailing days appeared; prior history is untouched.
    AppendOnly { start: NaiveDate, end: NaiveDate },
    /// A day that existed before now hashes differently, or disappeared.
    HistoricalChange { earliest_changed_day: NaiveDate },
}

/// Derive a day's canonical hash from its bars: canonicalize each bar,
/// sort the resulting lines, concatenate, and hash.
fn day_hash(bars: &[Bar]) -> String {
    let mut lines: Vec<Vec<u8>> = bars
        .iter()
        .map(|b| canon::to_canonical_bytes(&serde_json::to_value(b).expect("Bar serializes")))
        .collect();
    lines.sort();
    let mut joined = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            joined.push(b'\n');
        }
        joined.extend_from_slice(line);
    }
    canon::sha256_hex(&joined)
}

impl FingerprintIndex {
    /// Build an index from a normalized bar sequence, grouping by UTC calendar day.
    pub fn build(bars: &[Bar]) -> Self {
        let mut by_day: BTreeMap<NaiveDate, Vec<Bar>> = BTreeMap::new();
        for bar in bars {
            let day = bar.utc_date();
            by_day.entry(day).or_default().push(*bar);
        }
        let days = by_day
            .into_iter()
            .map(|(day, group)| (day, day_hash(&group)))
            .collect();
        Self { days }
    }

    /// Compare `self` (the newly-derived index) against `previous` (the
    /// persisted index), producing the only decision permitted to gate an
    /// incremental bars/feature rebuild.
    pub fn compare(previous: &Self, current: &Self) -> FingerprintDecision {
        if previous.days.is_empty() {
            return FingerprintDecision::IsNew;
        }

        for (day, old_hash) in &previous.days {
            match current.days.get(day) {
                Some(new_hash) if new_hash == old_hash => continue,
                _ => return FingerprintDecision::HistoricalChange { earliest_changed_day: *day },
            }
        }

        let added: Vec<NaiveDate> = current
            .days
            .keys()
            .filter(|d| !previous.days.contains_key(d))
            .copied()
            .collect();

        match (added.iter().min(), added.iter().max()) {
            (Some(start), Some(end)) => FingerprintDecision::AppendOnly { start: *start, end: *end },
            _ => FingerprintDecision::NoChange,
        }
    }
}
