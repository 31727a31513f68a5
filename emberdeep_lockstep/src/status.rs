// Observable synchronization status, for UI and diagnostics.
//
// The session exposes one coarse status value that user-facing code polls:
// "waiting for player X" banners, a transient "synchronizing" indicator, a
// desync warning. Status is derived state — nothing in the engine branches
// on it — so consumers can poll as lazily as they like.

use serde::{Deserialize, Serialize};

use emberdeep_protocol::{ParticipantId, Tick};

use crate::resync::ResyncPhase;

/// Coarse synchronization state of the local session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Ticking normally; all compared digests agree.
    InSync,
    /// A digest mismatch was observed at `tick` but divergence is not yet
    /// confirmed (still inside the debounce window).
    Diverged { tick: Tick },
    /// Recovery in progress.
    Resyncing { phase: ResyncPhase },
    /// The exchange has waited past its missing-participant threshold for a
    /// still-connected participant. Normal backpressure, not an error: the
    /// session resumes the moment the frame arrives.
    Stalled { waiting_on: ParticipantId },
}
