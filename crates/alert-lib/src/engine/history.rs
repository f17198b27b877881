//! Bounded history of fired alerts
//!
//! Holds the most recent approved alerts in firing order with FIFO
//! eviction. It is an inspection aid only; deduplication lives in the
//! cooldown manager.

use crate::models::AlertEvent;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Default number of retained alerts
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Ring buffer of fired alerts
#[derive(Debug, Clone)]
pub struct AlertHistory {
    events: VecDeque<AlertEvent>,
    capacity: usize,
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a fired alert, evicting the oldest beyond capacity
    pub fn record(&mut self, event: AlertEvent) {
        self.events.push_back(event);
        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    /// Alerts with `timestamp > now - since`, oldest first
    pub fn query(&self, since: Duration, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let cutoff = chrono::Duration::from_std(since)
            .ok()
            .and_then(|since| now.checked_sub_signed(since));

        self.events
            .iter()
            .filter(|event| cutoff.map_or(true, |cutoff| event.timestamp > cutoff))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over retained alerts, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &AlertEvent> {
        self.events.iter()
    }
}
