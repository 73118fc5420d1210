//! Rollup duplicate-suppression map.

use dashmap::DashMap;

/// Tracks, per (path, rollup) pair, the earliest wall-time at which the next
/// rollup for that pair is permitted.
///
/// This is an optimization against bursty input, not a correctness
/// mechanism: a restart forgets the map and may redo rollups, which is
/// harmless because rollup writes replace rather than accumulate.
#[derive(Default)]
pub struct RollupWindows {
    next_eligible: DashMap<String, i64>,
}

impl RollupWindows {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a rollup for `(path, rollup)` may proceed at `now`.
    pub fn should_roll(&self, path: &str, rollup: i64, now: i64) -> bool {
        match self.next_eligible.get(&key(path, rollup)) {
            Some(eligible_at) => now >= *eligible_at,
            None => true,
        }
    }

    /// Records a rollup attempt at `now`, deferring the next one by a full
    /// tier window.
    pub fn mark_rolled(&self, path: &str, rollup: i64, now: i64) {
        self.next_eligible.insert(key(path, rollup), now + rollup);
    }
}

fn key(path: &str, rollup: i64) -> String {
    format!("{path}{rollup}")
}
