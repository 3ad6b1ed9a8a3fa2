//! Per-node health bookkeeping

use parking_lot::Mutex;
use std::collections::HashMap;

/// Health of one node as seen by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    /// Consecutive failures so far, always below the threshold
    Degraded(u32),
    /// Taken off the ring; never rejoins
    Removed,
}

/// Consecutive-failure counter per node
pub struct HealthTracker {
    threshold: u32,
    states: Mutex<HashMap<String, HealthState>>,
}

impl HealthTracker {
    pub fn new<'a>(threshold: u32, nodes: impl IntoIterator<Item = &'a str>) -> Self {
        let states = nodes
            .into_iter()
            .map(|node| (node.to_string(), HealthState::Healthy))
            .collect();
        Self {
            threshold: threshold.max(1),
            states: Mutex::new(states),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self, node: &str) -> HealthState {
        self.states
            .lock()
            .get(node)
            .copied()
            .unwrap_or(HealthState::Healthy)
    }

    /// Reset the failure count; returns the previous state
    pub fn record_success(&self, node: &str) -> HealthState {
        let mut states = self.states.lock();
        let state = states
            .entry(node.to_string())
            .or_insert(HealthState::Healthy);
        let previous = *state;
        if let HealthState::Degraded(_) = previous {
            *state = HealthState::Healthy;
        }
        previous
    }

    /// Count one failure and return the new state.
    ///
    /// `on_remove` runs exactly once per node, with the tracker lock held,
    /// at the moment the threshold is reached.
    pub fn record_failure(&self, node: &str, on_remove: impl FnOnce(&str)) -> HealthState {
        let mut states = self.states.lock();
        let state = states
            .entry(node.to_string())
            .or_insert(HealthState::Healthy);

        let failures = match *state {
            HealthState::Removed => return HealthState::Removed,
            HealthState::Healthy => 1,
            HealthState::Degraded(n) => n + 1,
        };

        if failures >= self.threshold {
            *state = HealthState::Removed;
            on_remove(node);
        } else {
            *state = HealthState::Degraded(failures);
        }
        *state
    }
}
