// The simulation state — one value, exclusively owned by the tick driver.
//
// `SimState` is everything the consistency digest covers and everything a
// resync snapshot transfers: creatures, slab territory, per-participant
// cursors, pending spell effects, the PRNG, the pause flags, and the config
// itself. It is never shared, never global; the lock-step engine passes it
// by mutable reference into `apply`/`advance_tick` and reads digests and
// snapshots back out.
//
// Entity tables are `BTreeMap`s so iteration order is the key order —
// deterministic by construction, not by accident of insertion or hashing.
//
// See also: `actions.rs` for the command handlers this state dispatches to,
// `rng.rs` for the draw stream the digest fingerprints.
//
// **Critical constraint: determinism.** Mutation happens only in `apply`
// (driven by lock-step commands, identical everywhere) and `advance_tick`
// (pure function of prior state). Anything else would silently diverge.

use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use emberdeep_lockstep::{Simulation, SnapshotError};
use emberdeep_protocol::{ControlFlags, ParticipantId, PointerState, StateDigest, TurnCommand};

use crate::config::SimConfig;
use crate::rng::GameRng;
use crate::types::{CreatureId, CreatureKind, RoomKind, SlabCoord};

bitflags! {
    /// Session-wide operation flags, toggled by lock-step pause commands.
    // Serialize/Deserialize come from the bitflags `serde` feature.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OperationFlags: u8 {
        /// The simulation clock is frozen.
        const PAUSED = 1 << 0;
        /// While paused, gameplay commands still dispatch.
        const WORLD_INFLUENCE = 1 << 1;
    }
}

/// One creature in the dungeon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creature {
    pub kind: CreatureKind,
    pub owner: ParticipantId,
    pub pos: SlabCoord,
    pub health: u16,
    /// Movement target; one slab of progress per tick.
    pub goal: Option<SlabCoord>,
}

/// One cell of the territory grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slab {
    pub owner: Option<ParticipantId>,
    pub room: Option<RoomKind>,
}

/// A participant's continuous input, updated from every applied command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub pointer: PointerState,
    pub buttons: ControlFlags,
}

/// A summon spell in flight: the creature arrives at `due_tick`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSummon {
    pub due_tick: u64,
    pub owner: ParticipantId,
    pub kind: CreatureKind,
    pub at: SlabCoord,
}

/// Complete simulation state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimState {
    pub config: SimConfig,
    /// The simulation's own clock. Frozen while paused — exchange rounds
    /// keep flowing, this counter does not.
    pub tick: u64,
    pub rng: GameRng,
    pub creatures: BTreeMap<CreatureId, Creature>,
    /// Row-major `map_width * map_height` territory grid.
    pub slabs: Vec<Slab>,
    pub cursors: BTreeMap<ParticipantId, Cursor>,
    pub pending_summons: SmallVec<[PendingSummon; 4]>,
    pub flags: OperationFlags,
    next_creature: u16,
}

impl SimState {
    /// Build the starting state: each participant gets a claimed home slab
    /// with a lair and one imp, spread evenly across the map.
    pub fn new(seed: u64, config: SimConfig, participants: &[ParticipantId]) -> SimState {
        let slab_count = usize::from(config.map_width) * usize::from(config.map_height);
        let mut state = SimState {
            tick: 0,
            rng: GameRng::new(seed),
            creatures: BTreeMap::new(),
            slabs: vec![Slab::default(); slab_count],
            cursors: BTreeMap::new(),
            pending_summons: SmallVec::new(),
            flags: OperationFlags::empty(),
            next_creature: 0,
            config,
        };

        let count = participants.len().max(1) as u16;
        for (index, owner) in participants.iter().enumerate() {
            let x = (index as u16 + 1) * state.config.map_width / (count + 1);
            let home = SlabCoord::new(x, state.config.map_height / 2);
            if let Some(slab) = state.slab_mut(home) {
                slab.owner = Some(*owner);
                slab.room = Some(RoomKind::Lair);
            }
            state.spawn_creature(*owner, CreatureKind::Imp, home);
        }
        state
    }

    pub fn paused(&self) -> bool {
        self.flags.contains(OperationFlags::PAUSED)
    }

    pub fn slab_at(&self, pos: SlabCoord) -> Option<&Slab> {
        self.slab_index(pos).map(|i| &self.slabs[i])
    }

    pub fn slab_mut(&mut self, pos: SlabCoord) -> Option<&mut Slab> {
        self.slab_index(pos).map(|i| &mut self.slabs[i])
    }

    pub fn creatures_owned_by(&self, owner: ParticipantId) -> usize {
        self.creatures.values().filter(|c| c.owner == owner).count()
    }

    /// Spawn a creature with a small random health jitter. Returns `None`
    /// when the owner is at their creature cap (the draw is skipped too, so
    /// the stream stays aligned with participants that took the same path).
    pub fn spawn_creature(
        &mut self,
        owner: ParticipantId,
        kind: CreatureKind,
        at: SlabCoord,
    ) -> Option<CreatureId> {
        if self.creatures_owned_by(owner) >= self.config.max_creatures_per_owner {
            return None;
        }
        let id = CreatureId(self.next_creature);
        self.next_creature += 1;
        let jitter = self.rng.roll(16) as u16;
        self.creatures.insert(
            id,
            Creature {
                kind,
                owner,
                pos: at,
                health: self.config.starting_health + jitter,
                goal: None,
            },
        );
        Some(id)
    }

    /// One step of autonomous evolution: creature movement, summon
    /// arrivals, hatchery production. No-op while paused.
    pub fn step_tick(&mut self) {
        if self.paused() {
            return;
        }
        self.tick += 1;

        // Creatures walk one slab toward their goal, in id order.
        for creature in self.creatures.values_mut() {
            let Some(goal) = creature.goal else { continue };
            creature.pos.x = step_toward(creature.pos.x, goal.x);
            creature.pos.y = step_toward(creature.pos.y, goal.y);
            if creature.pos == goal {
                creature.goal = None;
            }
        }

        // Summon portals deliver, in cast order.
        let now = self.tick;
        let mut arrivals: SmallVec<[PendingSummon; 4]> = SmallVec::new();
        self.pending_summons.retain(|summon| {
            if summon.due_tick <= now {
                arrivals.push(*summon);
                false
            } else {
                true
            }
        });
        for summon in arrivals {
            self.spawn_creature(summon.owner, summon.kind, summon.at);
        }

        // Hatcheries produce on their interval, in grid order.
        if self.tick % self.config.hatchery_spawn_interval == 0 {
            let hatcheries: Vec<(ParticipantId, SlabCoord)> = self
                .slabs
                .iter()
                .enumerate()
                .filter(|(_, slab)| slab.room == Some(RoomKind::Hatchery))
                .filter_map(|(i, slab)| {
                    slab.owner.map(|owner| (owner, self.coord_of(i)))
                })
                .collect();
            for (owner, at) in hatcheries {
                self.spawn_creature(owner, CreatureKind::Beetle, at);
            }
        }
    }

    /// Fingerprint of current state, split by category for triage.
    pub fn fold_digest(&self) -> StateDigest {
        let mut creatures: u64 = 0;
        for (id, creature) in &self.creatures {
            // Order-independent sum of per-creature folds: removal or
            // mutation of any one creature changes the total.
            creatures = creatures.wrapping_add(creature_checksum(*id, creature));
        }

        let mut territory: u64 = 0;
        for (index, slab) in self.slabs.iter().enumerate() {
            if let Some(owner) = slab.owner {
                let mut sum: u64 = index as u64;
                sum = sum.rotate_left(5) ^ u64::from(owner.0);
                sum = sum.rotate_left(5) ^ slab.room.map_or(0, |r| u64::from(r.as_raw()) + 1);
                territory = territory.wrapping_add(sum);
            }
        }

        let mut players: u64 = 0;
        for (id, cursor) in &self.cursors {
            players = players.rotate_left(5) ^ u64::from(id.0);
            players = players.rotate_left(5) ^ u64::from(cursor.pointer.x);
            players = players.rotate_left(5) ^ u64::from(cursor.pointer.y);
            players = players.rotate_left(5) ^ u64::from(cursor.buttons.bits());
        }

        StateDigest {
            creatures,
            territory,
            players,
            rng_seed: self.rng.seed(),
            rng_draws: self.rng.draws(),
        }
    }

    fn slab_index(&self, pos: SlabCoord) -> Option<usize> {
        if pos.x >= self.config.map_width || pos.y >= self.config.map_height {
            return None;
        }
        Some(usize::from(pos.y) * usize::from(self.config.map_width) + usize::from(pos.x))
    }

    fn coord_of(&self, index: usize) -> SlabCoord {
        let width = usize::from(self.config.map_width);
        SlabCoord::new((index % width) as u16, (index / width) as u16)
    }
}

fn creature_checksum(id: CreatureId, creature: &Creature) -> u64 {
    let mut sum: u64 = u64::from(id.0);
    sum = sum.rotate_left(5) ^ u64::from(creature.owner.0);
    sum = sum.rotate_left(5) ^ u64::from(creature.pos.x);
    sum = sum.rotate_left(5) ^ u64::from(creature.pos.y);
    sum = sum.rotate_left(5) ^ u64::from(creature.health);
    if let Some(goal) = creature.goal {
        let packed = ((u64::from(goal.x) << 16) | u64::from(goal.y)).wrapping_add(1);
        sum = sum.rotate_left(5) ^ packed;
    }
    sum
}

fn step_toward(from: u16, to: u16) -> u16 {
    match from.cmp(&to) {
        std::cmp::Ordering::Less => from + 1,
        std::cmp::Ordering::Greater => from - 1,
        std::cmp::Ordering::Equal => from,
    }
}

impl Simulation for SimState {
    fn apply(&mut self, command: &TurnCommand) {
        self.apply_command(command);
    }

    fn advance_tick(&mut self) {
        self.step_tick();
    }

    fn digest(&self) -> StateDigest {
        self.fold_digest()
    }

    fn snapshot(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    fn restore(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        let restored: SimState =
            serde_json::from_slice(bytes).map_err(|e| SnapshotError(e.to_string()))?;
        *self = restored;
        Ok(())
    }
}
