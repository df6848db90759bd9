//! Size budget for the working document.
//!
//! Only the reserved results subtree is ever evicted. User-authored working
//! data is never touched, so the budget is soft: when the reserved area is
//! empty and the document is still too large, eviction stops there.

use tracing::debug;

use crate::core::store::DocumentStore;
use crate::core::types::{RESULTS_KEY, RecordKind};
use crate::tree::{Children, Node};

/// What one enforcement pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub removed: Vec<String>,
    pub size_before: usize,
    pub size_after: usize,
}

impl EvictionReport {
    pub fn evicted_any(&self) -> bool {
        !self.removed.is_empty()
    }
}

/// Evicts the oldest result records until the working document fits `max_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub max_bytes: usize,
}

impl EvictionPolicy {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Remove reserved entries, lowest sequence index first, while over budget.
    pub fn enforce(&self, working: &mut DocumentStore) -> EvictionReport {
        let size_before = working.size_bytes();
        let mut report = EvictionReport {
            removed: Vec::new(),
            size_before,
            size_after: size_before,
        };
        if size_before <= self.max_bytes {
            return report;
        }

        let results_path = vec![RESULTS_KEY.to_string()];
        let mut order = match working.get(&results_path).ok().and_then(Node::as_container) {
            Some(entries) => oldest_first(entries),
            None => return report,
        };
        order.reverse();

        while report.size_after > self.max_bytes {
            let Some(key) = order.pop() else {
                break;
            };
            let path = vec![RESULTS_KEY.to_string(), key.clone()];
            if working.remove(&path).is_ok() {
                report.removed.push(key);
                report.size_after = working.size_bytes();
            }
        }

        debug!(
            removed = report.removed.len(),
            size_before = report.size_before,
            size_after = report.size_after,
            budget = self.max_bytes,
            "eviction pass"
        );
        report
    }
}

/// Keep only the newest `keep` reserved entries of the given note kind.
///
/// Returns the keys removed.
pub fn rotate_notes(working: &mut DocumentStore, kind: &RecordKind, keep: usize) -> Vec<String> {
    let results_path = vec![RESULTS_KEY.to_string()];
    let Some(entries) = working.get(&results_path).ok().and_then(Node::as_container) else {
        return Vec::new();
    };
    let matching: Vec<String> = oldest_first(entries)
        .into_iter()
        .filter(|key| {
            entries
                .get(key)
                .and_then(Node::as_container)
                .and_then(|fields| fields.get("kind"))
                .and_then(Node::as_str)
                == Some(kind.as_str())
        })
        .collect();
    let excess = matching.len().saturating_sub(keep);

    let mut removed = Vec::new();
    for key in matching.into_iter().take(excess) {
        if working
            .remove(&[RESULTS_KEY.to_string(), key.clone()])
            .is_ok()
        {
            removed.push(key);
        }
    }
    removed
}

/// Reserved keys ordered by each entry's recorded sequence index.
fn oldest_first(entries: &Children) -> Vec<String> {
    let mut keyed: Vec<(u64, usize, String)> = entries
        .iter()
        .enumerate()
        .map(|(position, (key, entry))| (sequence_of(key, entry), position, key.clone()))
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, _, key)| key).collect()
}

fn sequence_of(key: &str, entry: &Node) -> u64 {
    entry
        .as_container()
        .and_then(|fields| fields.get("sequence_index"))
        .and_then(|index| index.as_u64().or_else(|| index.as_str()?.parse().ok()))
        .or_else(|| key.parse().ok())
        .unwrap_or(0)
}
