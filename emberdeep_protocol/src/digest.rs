// Consistency digests — the per-tick state fingerprint exchanged between
// participants to detect silent divergence.
//
// A `StateDigest` is cheap to compute every tick and split into categories
// (creatures, territory, players, PRNG) rather than folded into a single
// hash. The split costs a few bytes on the wire and buys triage: a creature
// or territory mismatch means a command was missed or misapplied, while a
// PRNG mismatch usually means a draw-ordering bug upstream. Both trigger
// the same recovery path; the distinction is for diagnostics.
//
// **Critical constraint: determinism.** Digest inputs must be data that is
// bit-identical on every participant after a correctly-applied tick. Local
// camera position, UI hover state, and anything driven by wall-clock time
// are forbidden.

use serde::{Deserialize, Serialize};

use crate::types::Tick;

/// Per-category checksums of simulation state after one applied tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDigest {
    /// Order-independent sum of per-creature checksums.
    pub creatures: u64,
    /// Order-independent sum of per-slab ownership/room checksums.
    pub territory: u64,
    /// Fold of per-participant cursor state (carried in every command, so
    /// identical on all machines).
    pub players: u64,
    /// Current PRNG seed value.
    pub rng_seed: u64,
    /// Cumulative count of PRNG draws consumed.
    pub rng_draws: u64,
}

impl StateDigest {
    /// True when the gameplay-state categories match (PRNG excluded).
    pub fn state_matches(&self, other: &StateDigest) -> bool {
        self.creatures == other.creatures
            && self.territory == other.territory
            && self.players == other.players
    }

    /// True when the PRNG stream matches.
    pub fn rng_matches(&self, other: &StateDigest) -> bool {
        self.rng_seed == other.rng_seed && self.rng_draws == other.rng_draws
    }

    /// Name of the first mismatching category, for divergence triage logs.
    pub fn first_mismatch(&self, other: &StateDigest) -> Option<&'static str> {
        if self.creatures != other.creatures {
            Some("creatures")
        } else if self.territory != other.territory {
            Some("territory")
        } else if self.players != other.players {
            Some("players")
        } else if self.rng_seed != other.rng_seed {
            Some("rng_seed")
        } else if self.rng_draws != other.rng_draws {
            Some("rng_draws")
        } else {
            None
        }
    }

    /// Collapse all categories into one scalar. Used as the state input of
    /// the command integrity token and as the election key during resync.
    pub fn fold(&self) -> u64 {
        let mut sum: u64 = 0;
        for value in [
            self.creatures,
            self.territory,
            self.players,
            self.rng_seed,
            self.rng_draws,
        ] {
            sum = sum.rotate_left(7) ^ value;
        }
        sum
    }
}

/// One participant's digest for one tick, as carried on the wire. Under
/// correct lock-step execution every participant's record for the same tick
/// is bit-identical.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyRecord {
    pub tick: Tick,
    pub digest: StateDigest,
}
