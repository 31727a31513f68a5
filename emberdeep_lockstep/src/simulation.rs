// The simulation boundary.
//
// The engine never touches game state directly — it hands complete,
// validated commands to `apply`, asks for a digest after each tick, and
// serializes/restores the whole state during resynchronization. Gameplay
// semantics (what a room placement or spell cast actually does) live
// entirely behind this trait, in `emberdeep_sim` for the real game and in
// small test doubles for engine unit tests.
//
// **Critical constraint: determinism.** Every method must produce identical
// results from identical state and inputs on every machine. `apply` is
// called in ascending participant order within a tick; `advance_tick` runs
// exactly once per applied round and must itself honor the pause flag
// (a paused simulation freezes its logical clock but still answers
// `digest`).

use emberdeep_protocol::{StateDigest, TurnCommand};

use crate::error::SnapshotError;

/// Deterministic simulation driven by the lock-step engine.
pub trait Simulation {
    /// Apply one participant's command. Called in ascending participant
    /// order for every command of a completed round, including canonical
    /// empty commands (whose continuous input is all that applies).
    fn apply(&mut self, command: &TurnCommand);

    /// Advance the simulation's own clock by one tick: movement, timers,
    /// scheduled spawns. Must be a no-op while the simulation is paused.
    fn advance_tick(&mut self);

    /// Fingerprint of current state. Computed only after all of a tick's
    /// commands have been applied, never mid-round.
    fn digest(&self) -> StateDigest;

    /// Serialize the complete state for authoritative transfer.
    fn snapshot(&self) -> Vec<u8>;

    /// Atomically replace state from a snapshot. On error the previous
    /// state must remain untouched.
    fn restore(&mut self, bytes: &[u8]) -> Result<(), SnapshotError>;
}
