// The turn command model — one participant's complete input for one tick.
//
// A `TurnCommand` is the unit of deterministic input: a discrete action
// (room placement, spell cast, creature order, pause request) plus the
// continuous input sampled that tick (cursor position, button mask). Every
// participant produces exactly one per tick; all participants apply the
// same set in the same order.
//
// The wire layout is fixed-width big-endian with no padding, so
// heterogeneous builds interoperate byte-for-byte:
//
//   offset  size  field
//   0       1     format version
//   1       8     tick
//   9       1     participant
//   10      1     action tag
//   11      8     action args (4 x u16, unused slots zero)
//   19      4     pointer x, y (u16 each)
//   23      2     control flags
//   25      4     integrity token
//
// `decode` is the exact inverse of `encode` and fails — never panics — on
// truncated or malformed input.
//
// The integrity token is a rolling shift-xor checksum over the command's
// own fields plus a scalar digest of simulation state supplied by the
// caller. It travels with the command and is re-verified on ingest; a
// mismatch means the frame was corrupted or the sender's state already
// disagrees with ours, and the frame is dropped rather than applied.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ParticipantId, Tick};

/// Wire format version. Bumped on any layout change.
pub const WIRE_VERSION: u8 = 1;

/// Exact encoded size of a `TurnCommand` in bytes.
pub const ENCODED_LEN: usize = 29;

bitflags! {
    /// Held-button and cursor-validity bitmask, sampled once per tick.
    // Serialize/Deserialize come from the bitflags `serde` feature.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ControlFlags: u16 {
        /// The pointer coordinates refer to a real map position this tick.
        const CURSOR_VALID = 1 << 0;
        const PRIMARY_CLICK = 1 << 1;
        const PRIMARY_HELD = 1 << 2;
        const PRIMARY_RELEASE = 1 << 3;
        const SECONDARY_CLICK = 1 << 4;
        const SECONDARY_HELD = 1 << 5;
        const SECONDARY_RELEASE = 1 << 6;
        /// A modifier key (queue/drag variant of the action) was held.
        const MODIFIER_HELD = 1 << 7;
    }
}

/// Cursor position in map coordinates, sampled once per tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerState {
    pub x: u16,
    pub y: u16,
}

/// The discrete action a command performs. Closed set, known at build time —
/// dispatch is an exhaustive `match`, never a fallible table lookup.
///
/// Argument fields are raw wire integers; semantic validation (room kind in
/// range, creature exists, slab owned) is the simulation's job and must be
/// deterministic, so an out-of-range value is ignored identically on every
/// machine rather than rejected at decode time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnAction {
    /// No discrete action this tick. Pointer and flags still apply.
    #[default]
    Idle,
    /// Claim a slab and designate a room on it.
    PlaceRoom { kind: u16, slab_x: u16, slab_y: u16 },
    /// Remove a room designation the participant owns.
    SellRoom { slab_x: u16, slab_y: u16 },
    /// Cast a spell at a target slab.
    CastSpell {
        spell: u16,
        target_x: u16,
        target_y: u16,
        power: u16,
    },
    /// Issue an order to one of the participant's creatures.
    CommandCreature {
        creature: u16,
        order: u16,
        target_x: u16,
        target_y: u16,
    },
    /// Lock-step pause/resume request. Applied on the same tick everywhere.
    SetPause { pause: bool, world_influence: bool },
}

impl TurnAction {
    /// True for the pause-control action (always dispatched, even while
    /// the simulation is paused — otherwise no one could ever resume).
    pub fn is_pause(self) -> bool {
        matches!(self, TurnAction::SetPause { .. })
    }

    /// True for actions that mutate gameplay state. These are withheld from
    /// dispatch while the session is paused.
    pub fn is_gameplay(self) -> bool {
        !matches!(self, TurnAction::Idle | TurnAction::SetPause { .. })
    }

    fn tag(self) -> u8 {
        match self {
            TurnAction::Idle => 0,
            TurnAction::PlaceRoom { .. } => 1,
            TurnAction::SellRoom { .. } => 2,
            TurnAction::CastSpell { .. } => 3,
            TurnAction::CommandCreature { .. } => 4,
            TurnAction::SetPause { .. } => 5,
        }
    }

    fn args(self) -> [u16; 4] {
        match self {
            TurnAction::Idle => [0; 4],
            TurnAction::PlaceRoom {
                kind,
                slab_x,
                slab_y,
            } => [kind, slab_x, slab_y, 0],
            TurnAction::SellRoom { slab_x, slab_y } => [slab_x, slab_y, 0, 0],
            TurnAction::CastSpell {
                spell,
                target_x,
                target_y,
                power,
            } => [spell, target_x, target_y, power],
            TurnAction::CommandCreature {
                creature,
                order,
                target_x,
                target_y,
            } => [creature, order, target_x, target_y],
            TurnAction::SetPause {
                pause,
                world_influence,
            } => [u16::from(pause), u16::from(world_influence), 0, 0],
        }
    }

    fn from_wire(tag: u8, args: [u16; 4]) -> Result<TurnAction, DecodeError> {
        match tag {
            0 => Ok(TurnAction::Idle),
            1 => Ok(TurnAction::PlaceRoom {
                kind: args[0],
                slab_x: args[1],
                slab_y: args[2],
            }),
            2 => Ok(TurnAction::SellRoom {
                slab_x: args[0],
                slab_y: args[1],
            }),
            3 => Ok(TurnAction::CastSpell {
                spell: args[0],
                target_x: args[1],
                target_y: args[2],
                power: args[3],
            }),
            4 => Ok(TurnAction::CommandCreature {
                creature: args[0],
                order: args[1],
                target_x: args[2],
                target_y: args[3],
            }),
            5 => Ok(TurnAction::SetPause {
                pause: args[0] != 0,
                world_influence: args[1] != 0,
            }),
            other => Err(DecodeError::UnknownAction(other)),
        }
    }
}

/// Failure modes of `TurnCommand::decode`. Malformed wire data is dropped
/// and logged by the caller — it never crashes the tick loop.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated command: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("unsupported command format version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown action tag {0}")]
    UnknownAction(u8),
    #[error("unknown control flag bits {0:#06x}")]
    UnknownControlFlags(u16),
    #[error("trailing input after command: {len} bytes total")]
    TrailingInput { len: usize },
}

/// One participant's complete input for one logical tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnCommand {
    pub tick: Tick,
    pub participant: ParticipantId,
    pub action: TurnAction,
    pub pointer: PointerState,
    pub control_flags: ControlFlags,
    /// Checksum over this command's fields plus a caller-supplied state
    /// scalar. Zero until `seal` is called.
    pub integrity_token: u32,
}

impl TurnCommand {
    /// A command carrying the given action and no continuous input.
    pub fn new(tick: Tick, participant: ParticipantId, action: TurnAction) -> TurnCommand {
        TurnCommand {
            tick,
            participant,
            action,
            pointer: PointerState::default(),
            control_flags: ControlFlags::empty(),
            integrity_token: 0,
        }
    }

    /// The canonical "no input" command: used for AI substitution of
    /// missing participants and as the skip-dispatch sentinel.
    pub fn empty(tick: Tick, participant: ParticipantId) -> TurnCommand {
        TurnCommand::new(tick, participant, TurnAction::Idle)
    }

    /// True only for the canonical zero command. A sealed `Idle` command
    /// with live pointer input is *not* empty — its continuous input still
    /// applies.
    pub fn is_empty(&self) -> bool {
        self.action == TurnAction::Idle
            && self.pointer == PointerState::default()
            && self.control_flags.is_empty()
    }

    /// Serialize to the fixed 29-byte wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENCODED_LEN);
        out.push(WIRE_VERSION);
        out.extend_from_slice(&self.tick.0.to_be_bytes());
        out.push(self.participant.0);
        out.push(self.action.tag());
        for arg in self.action.args() {
            out.extend_from_slice(&arg.to_be_bytes());
        }
        out.extend_from_slice(&self.pointer.x.to_be_bytes());
        out.extend_from_slice(&self.pointer.y.to_be_bytes());
        out.extend_from_slice(&self.control_flags.bits().to_be_bytes());
        out.extend_from_slice(&self.integrity_token.to_be_bytes());
        debug_assert_eq!(out.len(), ENCODED_LEN);
        out
    }

    /// Deserialize from the fixed wire layout. Exact inverse of `encode`.
    pub fn decode(bytes: &[u8]) -> Result<TurnCommand, DecodeError> {
        if bytes.len() < ENCODED_LEN {
            return Err(DecodeError::Truncated {
                needed: ENCODED_LEN,
                got: bytes.len(),
            });
        }
        if bytes.len() > ENCODED_LEN {
            return Err(DecodeError::TrailingInput { len: bytes.len() });
        }
        if bytes[0] != WIRE_VERSION {
            return Err(DecodeError::UnsupportedVersion(bytes[0]));
        }
        let tick = Tick(u64::from_be_bytes(bytes[1..9].try_into().unwrap()));
        let participant = ParticipantId(bytes[9]);
        let tag = bytes[10];
        let mut args = [0u16; 4];
        for (i, arg) in args.iter_mut().enumerate() {
            let at = 11 + i * 2;
            *arg = u16::from_be_bytes(bytes[at..at + 2].try_into().unwrap());
        }
        let action = TurnAction::from_wire(tag, args)?;
        let pointer = PointerState {
            x: u16::from_be_bytes(bytes[19..21].try_into().unwrap()),
            y: u16::from_be_bytes(bytes[21..23].try_into().unwrap()),
        };
        let bits = u16::from_be_bytes(bytes[23..25].try_into().unwrap());
        let control_flags =
            ControlFlags::from_bits(bits).ok_or(DecodeError::UnknownControlFlags(bits))?;
        let integrity_token = u32::from_be_bytes(bytes[25..29].try_into().unwrap());
        Ok(TurnCommand {
            tick,
            participant,
            action,
            pointer,
            control_flags,
            integrity_token,
        })
    }

    /// Compute the integrity token for this command's fields against the
    /// given state scalar. The token field itself is excluded from the fold.
    fn compute_token(&self, state_scalar: u64) -> u32 {
        let mut sum: u32 = 0;
        fold(&mut sum, (self.tick.0 >> 32) as u32);
        fold(&mut sum, (self.tick.0 & 0xFFFF_FFFF) as u32);
        fold(&mut sum, u32::from(self.participant.0));
        fold(&mut sum, u32::from(self.action.tag()));
        for arg in self.action.args() {
            fold(&mut sum, u32::from(arg));
        }
        fold(&mut sum, u32::from(self.pointer.x));
        fold(&mut sum, u32::from(self.pointer.y));
        fold(&mut sum, u32::from(self.control_flags.bits()));
        fold(&mut sum, (state_scalar >> 32) as u32);
        fold(&mut sum, (state_scalar & 0xFFFF_FFFF) as u32);
        sum
    }

    /// Stamp the integrity token. Called once, after the command's fields
    /// are final and the sender knows its current state scalar.
    pub fn seal(&mut self, state_scalar: u64) {
        self.integrity_token = self.compute_token(state_scalar);
    }

    /// Re-verify the integrity token against the scalar the sender claims.
    pub fn verify(&self, state_scalar: u64) -> bool {
        self.integrity_token == self.compute_token(state_scalar)
    }
}

/// Rolling shift-xor fold: rotate the accumulator and mix in one word.
/// Position-sensitive, so reordered fields produce different sums.
fn fold(sum: &mut u32, value: u32) {
    *sum = sum.rotate_left(5) ^ value;
}
