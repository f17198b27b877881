//! Cooldown gate for fired alerts
//!
//! Deduplication is keyed by [`AlertKey`], i.e. rule and sensor together.
//! The check-and-set in [`CooldownManager::try_fire`] runs under the map's
//! per-shard entry lock, so concurrent attempts on one key cannot both win.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

/// Deduplication unit derived from rule identity and sensor id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertKey(String);

impl AlertKey {
    pub fn new(rule_name: &str, sensor_id: &str) -> Self {
        Self(format!("{rule_name}_{sensor_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-key last-fired tracking
#[derive(Debug, Default)]
pub struct CooldownManager {
    last_fired: DashMap<AlertKey, DateTime<Utc>>,
}

impl CooldownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Approve a firing for `key` at `now`
    ///
    /// Returns `true` and records `now` when the key has never fired or the
    /// time since its last firing strictly exceeds `cooldown`. Otherwise
    /// returns `false` and leaves the stored time untouched. A `now` earlier
    /// than the recorded firing counts as not elapsed.
    pub fn try_fire(&self, key: &AlertKey, now: DateTime<Utc>, cooldown: Duration) -> bool {
        match self.last_fired.entry(key.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
            Entry::Occupied(mut entry) => match (now - *entry.get()).to_std() {
                Ok(elapsed) if elapsed > cooldown => {
                    entry.insert(now);
                    true
                }
                _ => false,
            },
        }
    }

    pub fn last_fired(&self, key: &AlertKey) -> Option<DateTime<Utc>> {
        self.last_fired.get(key).map(|t| *t)
    }

    /// Number of keys that have fired at least once
    pub fn tracked_keys(&self) -> usize {
        self.last_fired.len()
    }
}
