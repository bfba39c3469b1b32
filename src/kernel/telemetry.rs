//! Read-only record of placement outcomes for the presentation layer.
//!
//! Nothing here feeds back into reducer or dispatcher decisions.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::entity::EntityId;
use super::error::ErrorKind;
use super::event::{PlacementOutcome, PlacementResult};
use super::time::Tick;

pub const DEFAULT_LOG_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub tick: Tick,
    pub entity_id: EntityId,
    pub outcome: PlacementOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementStats {
    /// Running score shown to the player.
    pub successes: u64,
    pub no_targets: u64,
    pub provision_failures: u64,
    pub refresh_failures: u64,
    /// Results that arrived after their entity left the arena.
    pub discarded: u64,
}

/// Last N applied results plus running counters.
#[derive(Debug)]
pub struct PlacementLog {
    capacity: usize,
    buffer: VecDeque<PlacementRecord>,
    stats: PlacementStats,
}

impl Default for PlacementLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl PlacementLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: VecDeque::with_capacity(capacity.max(1)),
            stats: PlacementStats::default(),
        }
    }

    pub fn record(&mut self, tick: Tick, result: &PlacementResult) {
        match &result.outcome {
            PlacementOutcome::Success { .. } => self.stats.successes += 1,
            PlacementOutcome::Failure { kind } => self.count_failure(*kind),
        }

        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(PlacementRecord {
            tick,
            entity_id: result.entity_id,
            outcome: result.outcome.clone(),
        });
    }

    pub fn record_refresh_failure(&mut self) {
        self.stats.refresh_failures += 1;
    }

    pub fn record_discarded(&mut self) {
        self.stats.discarded += 1;
    }

    fn count_failure(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::NoTargetsAvailable => self.stats.no_targets += 1,
            ErrorKind::ProvisionFailed => self.stats.provision_failures += 1,
            ErrorKind::InventoryUnavailable => self.stats.refresh_failures += 1,
        }
    }

    pub fn stats(&self) -> &PlacementStats {
        &self.stats
    }

    pub fn recent(&self) -> impl Iterator<Item = &PlacementRecord> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Target of the most recent successful placement still in the window.
    pub fn last_target(&self) -> Option<&str> {
        self.buffer.iter().rev().find_map(|r| match &r.outcome {
            PlacementOutcome::Success { target } => Some(target.as_str()),
            PlacementOutcome::Failure { .. } => None,
        })
    }
}
