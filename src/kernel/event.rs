use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::EntityId;
use super::error::ErrorKind;

/// One placement-eligible host, as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: String,
}

impl TargetRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Emitted once per resolution, consumed by the dispatcher. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementIntent {
    pub entity_id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementOutcome {
    Success { target: String },
    Failure { kind: ErrorKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementResult {
    pub entity_id: EntityId,
    pub outcome: PlacementOutcome,
    /// Name suffix of the last request issued, if any reached the wire.
    pub request_id: Option<Uuid>,
}

impl PlacementResult {
    pub fn success(entity_id: EntityId, target: String, request_id: Uuid) -> Self {
        Self {
            entity_id,
            outcome: PlacementOutcome::Success { target },
            request_id: Some(request_id),
        }
    }

    pub fn failure(entity_id: EntityId, kind: ErrorKind, request_id: Option<Uuid>) -> Self {
        Self {
            entity_id,
            outcome: PlacementOutcome::Failure { kind },
            request_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PlacementOutcome::Success { .. })
    }
}

/// Everything async work reports back to the frame thread.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Placement(PlacementResult),
    /// Ok carries the number of targets in the new snapshot.
    InventoryRefreshed(Result<usize, ErrorKind>),
}
