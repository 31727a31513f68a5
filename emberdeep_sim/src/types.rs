// Core types of the dungeon simulation.
//
// Entities are addressed by compact integer IDs rather than UUIDs because
// turn commands carry them in fixed u16 wire fields — a creature order
// names its target as `CreatureId.0` directly.
//
// The closed kind enums decode raw wire integers via `from_raw`. An
// out-of-range value yields `None` and the command is ignored — identically
// on every machine, which is what keeps a malformed-but-well-formed command
// from desyncing anyone. This replaces the dispatch-table-by-small-integer
// style where an out-of-range index silently no-ops.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact, deterministic creature identifier, assigned from a counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CreatureId(pub u16);

impl fmt::Display for CreatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "creature {}", self.0)
    }
}

/// A position on the slab grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlabCoord {
    pub x: u16,
    pub y: u16,
}

impl SlabCoord {
    pub const fn new(x: u16, y: u16) -> SlabCoord {
        SlabCoord { x, y }
    }
}

impl fmt::Display for SlabCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Room designations a participant can place on owned territory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomKind {
    Lair,
    Hatchery,
    Treasury,
    Library,
    Workshop,
}

impl RoomKind {
    pub fn from_raw(raw: u16) -> Option<RoomKind> {
        match raw {
            0 => Some(RoomKind::Lair),
            1 => Some(RoomKind::Hatchery),
            2 => Some(RoomKind::Treasury),
            3 => Some(RoomKind::Library),
            4 => Some(RoomKind::Workshop),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u16 {
        match self {
            RoomKind::Lair => 0,
            RoomKind::Hatchery => 1,
            RoomKind::Treasury => 2,
            RoomKind::Library => 3,
            RoomKind::Workshop => 4,
        }
    }
}

/// Castable spells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellKind {
    /// Instant damage to every creature on the target slab.
    Lightning,
    /// Open a portal: a creature arrives a few ticks later.
    Summon,
    /// Restore health to the caster's creatures on the target slab.
    Heal,
}

impl SpellKind {
    pub fn from_raw(raw: u16) -> Option<SpellKind> {
        match raw {
            0 => Some(SpellKind::Lightning),
            1 => Some(SpellKind::Summon),
            2 => Some(SpellKind::Heal),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u16 {
        match self {
            SpellKind::Lightning => 0,
            SpellKind::Summon => 1,
            SpellKind::Heal => 2,
        }
    }
}

/// Creature species.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatureKind {
    Imp,
    Beetle,
    Warlock,
    Dragon,
}

/// Orders a participant can give one of their creatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatureOrder {
    /// Walk one slab per tick toward the target.
    MoveTo,
    /// Drop the current movement goal.
    Halt,
}

impl CreatureOrder {
    pub fn from_raw(raw: u16) -> Option<CreatureOrder> {
        match raw {
            0 => Some(CreatureOrder::MoveTo),
            1 => Some(CreatureOrder::Halt),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u16 {
        match self {
            CreatureOrder::MoveTo => 0,
            CreatureOrder::Halt => 1,
        }
    }
}
