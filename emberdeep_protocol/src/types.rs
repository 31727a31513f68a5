// Core ID types for the lock-step protocol.
//
// Lightweight newtypes shared by the command model (`command.rs`), the
// consistency digests (`digest.rs`), and the synchronization engine in
// `emberdeep_lockstep`. Participants are addressed by compact integer IDs
// assigned at session setup — the ascending `ParticipantId` order is the
// canonical command-application order, so the `Ord` impl here is
// load-bearing, not cosmetic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session-scoped participant identifier, `0..N-1` for a session of N.
///
/// Commands within a tick are applied in ascending `ParticipantId` order on
/// every machine, regardless of network arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u8);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Monotonically increasing logical simulation tick. Not wall-clock time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl Tick {
    /// The tick immediately after this one.
    #[must_use]
    pub fn next(self) -> Tick {
        Tick(self.0 + 1)
    }

    /// This tick minus `n`, clamped at zero.
    #[must_use]
    pub fn saturating_sub(self, n: u64) -> Tick {
        Tick(self.0.saturating_sub(n))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick {}", self.0)
    }
}
