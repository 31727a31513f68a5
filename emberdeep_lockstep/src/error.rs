// Error taxonomy for the synchronization engine.
//
// The split follows the propagation policy: anything that would break the
// total-order/determinism invariant escalates immediately; anything local
// and cosmetic is recovered in place.
//
// - `CommitError`: programmer/integration error in the local commit path.
//   Duplicate or out-of-order commits would silently corrupt determinism if
//   tolerated, so they are surfaced, never papered over.
// - `IngestError`: a single bad frame from the network. Recovered by
//   dropping the frame and logging — the tick loop never crashes on wire
//   noise.
// - `ResyncError`: recovery itself failed. Fatal to the *session*, not the
//   process; the caller decides whether to tear down or continue local-only.
// - Exchange timeouts are deliberately absent here: waiting on a missing
//   participant is backpressure, reported through `SyncStatus::Stalled`,
//   not an error.

use thiserror::Error;

use emberdeep_protocol::{DecodeError, ParticipantId, Tick, WireError};

/// Violations of the local commit contract: exactly one command per tick,
/// in strictly ascending tick order.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("command for {0} already committed")]
    DuplicateTick(Tick),
    #[error("out-of-order commit: expected {expected}, got {attempted}")]
    OutOfOrder { expected: Tick, attempted: Tick },
}

/// A remote frame that could not be accepted. The frame is dropped; the
/// session keeps running.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Envelope(#[from] WireError),
    #[error(transparent)]
    Command(#[from] DecodeError),
    #[error("frame from {claimed} arrived on {origin}'s connection")]
    IdentityMismatch {
        origin: ParticipantId,
        claimed: ParticipantId,
    },
    #[error("command tick {inner} disagrees with frame tick {envelope}")]
    TickMismatch { envelope: Tick, inner: Tick },
    #[error("integrity token mismatch on command from {from} for {tick}")]
    IntegrityMismatch { from: ParticipantId, tick: Tick },
}

/// Snapshot restore failure inside the simulation boundary.
#[derive(Debug, Error)]
#[error("snapshot decode failed: {0}")]
pub struct SnapshotError(pub String);

/// Resynchronization failure — unrecoverable for the session.
#[derive(Debug, Error)]
pub enum ResyncError {
    #[error("resync source {0} disconnected mid-transfer")]
    SourceDisconnected(ParticipantId),
    #[error("snapshot checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    SnapshotChecksum { expected: u32, actual: u32 },
    #[error(transparent)]
    SnapshotDecode(#[from] SnapshotError),
}

/// Top-level session failure surfaced by `LockstepSession::try_advance`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Resync(#[from] ResyncError),
}
