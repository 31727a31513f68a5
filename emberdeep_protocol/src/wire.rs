// Peer-to-peer message envelope.
//
// Two message kinds flow between participants: per-tick turn frames and
// (rarely) full-state snapshots during resynchronization. The envelope is
// JSON — human-readable, forgiving across builds — while the turn command
// inside a frame stays in its fixed binary layout (`command.rs`), so the
// hot per-tick payload is compact and the envelope never needs to
// understand command internals.
//
// Each frame piggybacks the sender's consistency record for its previous
// applied tick, which is how checksums travel without a dedicated round
// trip. The record also supplies the scalar against which the command's
// integrity token is verified on ingest.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digest::ConsistencyRecord;
use crate::types::{ParticipantId, Tick};

/// Messages exchanged directly between session participants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PeerMessage {
    /// One participant's command for one tick, plus the piggybacked
    /// consistency record for the sender's most recently applied tick.
    TurnFrame {
        participant: ParticipantId,
        tick: Tick,
        /// Fixed-layout encoded `TurnCommand` (see `command.rs`).
        command: Vec<u8>,
        audit: Option<ConsistencyRecord>,
    },
    /// Authoritative full-state transfer from the elected resync source.
    SnapshotTransfer {
        /// Exchange tick at which the snapshot was taken.
        tick: Tick,
        /// CRC32 of `state`, verified before the snapshot is applied.
        crc32: u32,
        state: Vec<u8>,
    },
}

/// Envelope decode failure. Dropped and logged by the receiver.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed peer message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialize a peer message for the transport.
pub fn encode_message(msg: &PeerMessage) -> Vec<u8> {
    // Serialization of these enums cannot fail: no maps with non-string
    // keys, no non-finite floats.
    serde_json::to_vec(msg).unwrap_or_default()
}

/// Deserialize a peer message received from the transport.
pub fn decode_message(bytes: &[u8]) -> Result<PeerMessage, WireError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{TurnAction, TurnCommand};
    use crate::digest::StateDigest;

    #[test]
    fn roundtrip_turn_frame() {
        let cmd = TurnCommand::new(
            Tick(10),
            ParticipantId(1),
            TurnAction::PlaceRoom {
                kind: 1,
                slab_x: 5,
                slab_y: 6,
            },
        );
        let msg = PeerMessage::TurnFrame {
            participant: ParticipantId(1),
            tick: Tick(10),
            command: cmd.encode(),
            audit: Some(ConsistencyRecord {
                tick: Tick(9),
                digest: StateDigest {
                    creatures: 1,
                    territory: 2,
                    players: 3,
                    rng_seed: 4,
                    rng_draws: 5,
                },
            }),
        };
        let back = decode_message(&encode_message(&msg)).unwrap();
        assert_eq!(back, msg);

        // The inner command survives the envelope byte-for-byte.
        if let PeerMessage::TurnFrame { command, .. } = back {
            assert_eq!(TurnCommand::decode(&command).unwrap(), cmd);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn roundtrip_turn_frame_without_audit() {
        let msg = PeerMessage::TurnFrame {
            participant: ParticipantId(0),
            tick: Tick(0),
            command: TurnCommand::empty(Tick(0), ParticipantId(0)).encode(),
            audit: None,
        };
        assert_eq!(decode_message(&encode_message(&msg)).unwrap(), msg);
    }

    #[test]
    fn roundtrip_snapshot_transfer() {
        let msg = PeerMessage::SnapshotTransfer {
            tick: Tick(300),
            crc32: 0xABCD_1234,
            state: vec![0xFF; 64],
        };
        assert_eq!(decode_message(&encode_message(&msg)).unwrap(), msg);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_message(b"not json").is_err());
        assert!(decode_message(b"{\"Unknown\":{}}").is_err());
    }
}
