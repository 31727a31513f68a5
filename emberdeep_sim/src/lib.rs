// emberdeep_sim — deterministic dungeon simulation.
//
// The gameplay side of the lock-step contract: creatures, slab territory
// with room designations, spells with delayed effects, per-participant
// cursors, and a portable PRNG. `SimState` implements the engine's
// `Simulation` trait — the engine feeds it ordered commands and ticks, and
// reads digests and snapshots back out. The crate runs fully headless; it
// has no rendering, timing, or input dependencies.
//
// Module overview:
// - `state.rs`:   `SimState` — the single owned state value, digests,
//                 snapshots, autonomous per-tick evolution.
// - `actions.rs`: Command handlers for the closed `TurnAction` set.
// - `rng.rs`:     `GameRng` — hand-rolled LCG with draw accounting.
// - `types.rs`:   Compact IDs, coordinates, the kind enums and their
//                 raw-wire decoding.
// - `config.rs`:  `SimConfig` — every gameplay constant.
//
// **Critical constraint: determinism.** Given the same seed, config, and
// command sequence, two instances of this simulation are bit-identical
// forever. Everything here is written under that constraint: `BTreeMap`
// iteration, counter-assigned IDs, a single PRNG stream, no floating point
// in state.

pub mod actions;
pub mod config;
pub mod rng;
pub mod state;
pub mod types;

pub use config::SimConfig;
pub use rng::GameRng;
pub use state::{Creature, Cursor, OperationFlags, PendingSummon, SimState, Slab};
pub use types::{CreatureId, CreatureKind, CreatureOrder, RoomKind, SlabCoord, SpellKind};
