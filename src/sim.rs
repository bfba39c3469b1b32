//! Headless arena: stands in for the spawning, motion and hit-detection
//! side of the game so the pipeline can run without a window.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::kernel::entity::{EntityArena, EntityId};
use crate::kernel::reactor::FrameSource;
use crate::kernel::telemetry::PlacementLog;
use crate::kernel::time::Tick;

pub const SPAWN_CHANCE: f64 = 0.05;
/// Frames for an entity to cross a 640px arena at 7px per frame.
pub const LIFETIME_TICKS: u64 = 640 / 7;

pub struct ArenaSim {
    rng: StdRng,
    spawn_chance: f64,
    hit_rate: f64,
    lifetime: u64,
    last_score: u64,
}

impl ArenaSim {
    pub fn new(seed: u64, hit_rate: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            spawn_chance: SPAWN_CHANCE,
            hit_rate: hit_rate.clamp(0.0, 1.0),
            lifetime: LIFETIME_TICKS,
            last_score: 0,
        }
    }
}

impl FrameSource for ArenaSim {
    fn frame(&mut self, arena: &mut EntityArena, tick: Tick) -> Vec<EntityId> {
        // Leave the arena at the top edge
        let expired: Vec<EntityId> = arena
            .iter()
            .filter(|e| tick.since(e.spawned_at) >= self.lifetime)
            .map(|e| e.id)
            .collect();
        for id in expired {
            arena.recycle(id);
        }

        if self.rng.gen_bool(self.spawn_chance) {
            arena.spawn(tick);
        }

        let mut hits = Vec::new();
        for entity in arena.iter().filter(|e| !e.resolved) {
            if self.rng.gen_bool(self.hit_rate) {
                hits.push(entity.id);
            }
        }
        hits
    }

    fn present(&mut self, _arena: &EntityArena, log: &PlacementLog) {
        let score = log.stats().successes;
        if score != self.last_score {
            self.last_score = score;
            info!(
                score,
                node = log.last_target().unwrap_or("-"),
                "pod scheduled"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_frames() {
        let mut a = ArenaSim::new(7, 0.2);
        let mut b = ArenaSim::new(7, 0.2);
        let mut arena_a = EntityArena::with_capacity(8);
        let mut arena_b = EntityArena::with_capacity(8);

        let mut tick = Tick::new();
        for _ in 0..500 {
            tick = tick.next();
            assert_eq!(a.frame(&mut arena_a, tick), b.frame(&mut arena_b, tick));
        }
    }

    #[test]
    fn entities_leave_after_lifetime() {
        let mut sim = ArenaSim::new(1, 0.0);
        let mut arena = EntityArena::with_capacity(4);
        let id = arena.spawn(Tick::new()).unwrap();

        sim.frame(&mut arena, Tick { frame: LIFETIME_TICKS });
        assert!(arena.get(id).is_none());
    }
}
