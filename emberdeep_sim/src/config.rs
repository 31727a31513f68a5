// Tunable simulation parameters.
//
// The sim never uses magic numbers — every gameplay constant reads from
// `SimConfig`, which is part of serialized state so a resync snapshot
// carries it along. All participants must run identical configs; a
// mismatch desyncs on the first tick that touches a differing value.

use serde::{Deserialize, Serialize};

/// All tunable parameters of the dungeon simulation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Slab grid dimensions.
    pub map_width: u16,
    pub map_height: u16,
    /// Base health for newly spawned creatures (plus a small random jitter).
    pub starting_health: u16,
    /// Base damage of the lightning spell before power scaling and jitter.
    pub lightning_base_damage: u16,
    /// Ticks between a summon cast and the creature's arrival.
    pub summon_delay_ticks: u64,
    /// A hatchery produces one creature every this many ticks.
    pub hatchery_spawn_interval: u64,
    /// Hard cap on creatures per participant; spawns beyond it are skipped.
    pub max_creatures_per_owner: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            map_width: 32,
            map_height: 32,
            starting_health: 100,
            lightning_base_damage: 25,
            summon_delay_ticks: 5,
            hatchery_spawn_interval: 20,
            max_creatures_per_owner: 24,
        }
    }
}
