// emberdeep_protocol — turn command model and wire vocabulary for the
// Emberdeep lock-step multiplayer core.
//
// This crate defines the data every participant must agree on byte-for-byte:
// the per-tick turn command and its fixed binary layout, the consistency
// digests used for desync detection, and the JSON envelope messages peers
// exchange. It is shared by the synchronization engine
// (`emberdeep_lockstep`) and the simulation (`emberdeep_sim`) and depends on
// neither.
//
// Module overview:
// - `types.rs`:   Core ID newtypes — `ParticipantId`, `Tick`.
// - `command.rs`: `TurnCommand` / `TurnAction` — one participant's input for
//                 one tick, with a fixed-width big-endian codec and an
//                 integrity token.
// - `digest.rs`:  `StateDigest` / `ConsistencyRecord` — the per-tick state
//                 fingerprint exchanged for divergence detection.
// - `wire.rs`:    `PeerMessage` — JSON envelope for turn frames and resync
//                 snapshot transfers.
//
// Design decisions:
// - **Binary commands, JSON envelope.** The per-tick command uses a fixed
//   29-byte layout so heterogeneous builds interoperate with no padding or
//   endianness ambiguity; the rare control messages around it stay JSON.
// - **Closed action set.** `TurnAction` is an exhaustive enum — an unknown
//   tag is a decode error, never a silent no-op.

pub mod command;
pub mod digest;
pub mod types;
pub mod wire;

pub use command::{
    ControlFlags, DecodeError, ENCODED_LEN, PointerState, TurnAction, TurnCommand, WIRE_VERSION,
};
pub use digest::{ConsistencyRecord, StateDigest};
pub use types::{ParticipantId, Tick};
pub use wire::{PeerMessage, WireError, decode_message, encode_message};
