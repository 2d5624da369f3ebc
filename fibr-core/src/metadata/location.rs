//! Dominant location of a set of geocoded files.

use std::collections::{BTreeMap, HashMap};

/// Address levels, finest first.
const LEVELS: [&str; 3] = ["city", "state", "country"];

pub const WORLDWIDE: &str = "Worldwide";

/// Occurrence counts per address level.
#[derive(Debug, Default, Clone)]
pub struct LocationTally {
    levels: [BTreeMap<String, u64>; 3],
}

impl LocationTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, address: &HashMap<String, String>) {
        for (index, level) in LEVELS.iter().enumerate() {
            if let Some(value) = address.get(*level).filter(|value| !value.is_empty()) {
                *self.levels[index].entry(value.clone()).or_default() += 1;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(BTreeMap::is_empty)
    }

    /// Values holding strictly more than 40% of their level, finest level
    /// first, joined with `", "` in name order. `Worldwide` when no level has
    /// a majority, empty when nothing was ingested.
    pub fn value(&self) -> String {
        if self.is_empty() {
            return String::new();
        }

        self.levels
            .iter()
            .map(majority_of)
            .find(|winners| !winners.is_empty())
            .unwrap_or_else(|| WORLDWIDE.to_string())
    }
}

fn majority_of(counts: &BTreeMap<String, u64>) -> String {
    let sum: u64 = counts.values().sum();
    counts
        .iter()
        .filter(|(_, count)| **count * 10 > sum * 4)
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
