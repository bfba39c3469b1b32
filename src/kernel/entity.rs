use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::ErrorKind;
use super::time::Tick;

/// Identity of one entity in one reuse cycle.
/// The generation bumps every time a slot is recycled, so a stale id never
/// resolves to the entity that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    pub slot: u32,
    pub generation: u32,
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

/// Placement view of an active entity. The pipeline only annotates it;
/// creation and removal belong to the arena owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub resolved_pending: bool,
    pub assigned_target: Option<String>,
    pub last_error: Option<ErrorKind>,
    /// Set once this cycle has produced its placement intent.
    pub resolved: bool,
    pub spawned_at: Tick,
}

impl TrackedEntity {
    fn new(id: EntityId, spawned_at: Tick) -> Self {
        Self {
            id,
            resolved_pending: false,
            assigned_target: None,
            last_error: None,
            resolved: false,
            spawned_at,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    entity: Option<TrackedEntity>,
}

/// Fixed-size entity pool with identity lookup.
#[derive(Debug, Clone)]
pub struct EntityArena {
    slots: Vec<Slot>,
}

impl EntityArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| Slot { generation: 0, entity: None })
                .collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.entity.is_some()).count()
    }

    /// Activates the first free slot. Returns None when the pool is full.
    pub fn spawn(&mut self, now: Tick) -> Option<EntityId> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.entity.is_none())?;

        let id = EntityId {
            slot: index as u32,
            generation: slot.generation,
        };
        slot.entity = Some(TrackedEntity::new(id, now));
        Some(id)
    }

    /// Frees the slot and bumps its generation. Returns false for stale ids.
    pub fn recycle(&mut self, id: EntityId) -> bool {
        match self.slots.get_mut(id.slot as usize) {
            Some(slot) if slot.generation == id.generation && slot.entity.is_some() => {
                slot.entity = None;
                slot.generation = slot.generation.wrapping_add(1);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&TrackedEntity> {
        self.slots
            .get(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entity.as_ref())
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut TrackedEntity> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entity.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.slots.iter().filter_map(|s| s.entity.as_ref())
    }
}
