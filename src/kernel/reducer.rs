use tracing::debug;

use super::entity::{EntityArena, EntityId};
use super::event::PlacementIntent;

/// Turns per-frame resolution signals into placement intents.
/// Synchronous and I/O free; safe to run every frame.
#[derive(Debug, Default)]
pub struct PlacementReducer;

impl PlacementReducer {
    pub fn new() -> Self {
        Self
    }

    /// Emits one intent per entity whose current cycle has not resolved yet,
    /// in the order the ids were supplied. Unknown, stale, pending and
    /// already-resolved ids are skipped.
    pub fn reduce(&self, arena: &mut EntityArena, newly_resolved: &[EntityId]) -> Vec<PlacementIntent> {
        let mut intents = Vec::new();

        for &id in newly_resolved {
            let Some(entity) = arena.get_mut(id) else {
                debug!(entity = %id, "resolution for unknown entity ignored");
                continue;
            };

            if entity.resolved_pending || entity.resolved {
                continue;
            }

            entity.resolved_pending = true;
            entity.resolved = true;
            intents.push(PlacementIntent { entity_id: id });
        }

        intents
    }
}
