// Resynchronization — authoritative full-state transfer after confirmed
// divergence.
//
// State machine: AwaitingSource -> Transmitting -> Applying -> Resumed,
// with Failed terminal from any step. Every participant runs the same
// deterministic source election over the same divergence report, so no
// negotiation round is needed: the digest value held by the plurality of
// reporters wins, and the lowest participant id reporting that value
// becomes the source.
//
// The source serializes its entire simulation state, stamps it with a CRC32
// and broadcasts it; everyone else freezes tick application (local input
// keeps committing — it is deferred, never dropped) until the snapshot
// arrives, verifies the CRC, and atomically replaces its state. A source
// disconnect or a corrupt snapshot is fatal to the session: divergence is
// supposed to be rare and investigated, not silently retried forever.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use emberdeep_protocol::{ParticipantId, PeerMessage, StateDigest, Tick};

use crate::error::ResyncError;

/// Where an in-progress recovery currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResyncPhase {
    /// Frozen, waiting for the elected source to produce a snapshot.
    AwaitingSource,
    /// Local participant is the source and is sending the snapshot.
    Transmitting,
    /// Snapshot received; replacing local state.
    Applying,
    /// Recovery complete; normal ticking resumed.
    Resumed,
    /// Unrecoverable. The session surfaces a `ResyncError` and ends.
    Failed,
}

/// Transient record of one recovery attempt.
#[derive(Clone, Debug)]
pub struct ResyncSession {
    pub source: ParticipantId,
    /// Tick at which divergence was confirmed.
    pub diverged_tick: Tick,
    pub phase: ResyncPhase,
}

impl ResyncSession {
    pub fn begin(diverged_tick: Tick, votes: &BTreeMap<ParticipantId, StateDigest>) -> ResyncSession {
        ResyncSession {
            source: elect_source(votes),
            diverged_tick,
            phase: ResyncPhase::AwaitingSource,
        }
    }
}

/// Deterministic, side-effect-free source election.
///
/// Votes are keyed by each participant's folded digest at the diverged
/// tick. The most common digest value wins (a majority of correct peers
/// outvotes one corrupted one); ties break toward the value held by the
/// lowest participant id, and the elected source is the lowest id holding
/// the winning value. Every participant computes the same answer from the
/// same report.
pub fn elect_source(votes: &BTreeMap<ParticipantId, StateDigest>) -> ParticipantId {
    debug_assert!(!votes.is_empty(), "election requires at least one vote");

    // value -> (vote count, lowest id holding it). BTreeMap iteration is in
    // ascending id order, so the first holder seen is the lowest.
    let mut tally: BTreeMap<u64, (usize, ParticipantId)> = BTreeMap::new();
    for (id, digest) in votes {
        let entry = tally.entry(digest.fold()).or_insert((0, *id));
        entry.0 += 1;
    }

    let mut winner: Option<(usize, ParticipantId)> = None;
    for (count, holder) in tally.values() {
        let better = match winner {
            None => true,
            Some((best_count, best_holder)) => {
                *count > best_count || (*count == best_count && *holder < best_holder)
            }
        };
        if better {
            winner = Some((*count, *holder));
        }
    }
    winner.map(|(_, holder)| holder).unwrap_or(ParticipantId(0))
}

/// Wrap a serialized snapshot for broadcast, stamped with its CRC32.
pub fn package_snapshot(tick: Tick, state: Vec<u8>) -> PeerMessage {
    PeerMessage::SnapshotTransfer {
        tick,
        crc32: crc32fast::hash(&state),
        state,
    }
}

/// Verify a received snapshot against its claimed CRC32.
pub fn verify_snapshot(expected: u32, state: &[u8]) -> Result<(), ResyncError> {
    let actual = crc32fast::hash(state);
    if actual != expected {
        return Err(ResyncError::SnapshotChecksum { expected, actual });
    }
    Ok(())
}
