// Command handlers — the gameplay side of the lock-step contract.
//
// `apply_command` is the single entry point the engine drives. Dispatch is
// an exhaustive match on the closed `TurnAction` set; semantic validation
// (kind in range, slab in bounds, creature owned by the issuer) happens
// here and an invalid command is *ignored*, identically on every machine —
// rejecting it locally while another participant applied it would be a
// desync, so the only safe failure mode is a deterministic no-op.
//
// Continuous input (cursor, buttons) applies on every command regardless of
// action, and — since it is part of the exchanged command — it is shared
// state, folded into the consistency digest like everything else.
//
// Pause semantics: the `SetPause` action always dispatches (otherwise no
// one could resume); while paused, gameplay actions are withheld unless the
// world-influence flag was granted with the pause.

use log::debug;

use emberdeep_protocol::{ParticipantId, TurnAction, TurnCommand};

use crate::state::{Cursor, OperationFlags, PendingSummon, SimState};
use crate::types::{CreatureId, CreatureKind, CreatureOrder, RoomKind, SlabCoord, SpellKind};

impl SimState {
    /// Apply one participant's command for the current tick.
    pub fn apply_command(&mut self, command: &TurnCommand) {
        self.cursors.insert(
            command.participant,
            Cursor {
                pointer: command.pointer,
                buttons: command.control_flags,
            },
        );

        if let TurnAction::SetPause {
            pause,
            world_influence,
        } = command.action
        {
            self.set_pause(pause, world_influence);
            return;
        }

        if self.paused() && !self.flags.contains(OperationFlags::WORLD_INFLUENCE) {
            // Frozen: gameplay commands are not dispatched. They were still
            // exchanged and ordered, so dropping them here is identical on
            // every participant.
            return;
        }

        match command.action {
            TurnAction::Idle | TurnAction::SetPause { .. } => {}
            TurnAction::PlaceRoom {
                kind,
                slab_x,
                slab_y,
            } => self.place_room(command.participant, kind, SlabCoord::new(slab_x, slab_y)),
            TurnAction::SellRoom { slab_x, slab_y } => {
                self.sell_room(command.participant, SlabCoord::new(slab_x, slab_y));
            }
            TurnAction::CastSpell {
                spell,
                target_x,
                target_y,
                power,
            } => self.cast_spell(
                command.participant,
                spell,
                SlabCoord::new(target_x, target_y),
                power,
            ),
            TurnAction::CommandCreature {
                creature,
                order,
                target_x,
                target_y,
            } => self.command_creature(
                command.participant,
                CreatureId(creature),
                order,
                SlabCoord::new(target_x, target_y),
            ),
        }
    }

    fn set_pause(&mut self, pause: bool, world_influence: bool) {
        if pause {
            self.flags.insert(OperationFlags::PAUSED);
            self.flags
                .set(OperationFlags::WORLD_INFLUENCE, world_influence);
        } else {
            self.flags.remove(OperationFlags::PAUSED);
            self.flags.remove(OperationFlags::WORLD_INFLUENCE);
        }
    }

    fn place_room(&mut self, by: ParticipantId, kind_raw: u16, at: SlabCoord) {
        let Some(kind) = RoomKind::from_raw(kind_raw) else {
            debug!("{by} tried to place unknown room kind {kind_raw}");
            return;
        };
        let Some(slab) = self.slab_mut(at) else {
            return;
        };
        // Claiming enemy territory is not a thing; claiming unowned
        // territory is how dungeons grow.
        if slab.owner.is_some_and(|owner| owner != by) {
            return;
        }
        slab.owner = Some(by);
        slab.room = Some(kind);
    }

    fn sell_room(&mut self, by: ParticipantId, at: SlabCoord) {
        let Some(slab) = self.slab_mut(at) else {
            return;
        };
        if slab.owner == Some(by) && slab.room.is_some() {
            // The designation goes; the territory claim stays.
            slab.room = None;
        }
    }

    fn cast_spell(&mut self, by: ParticipantId, spell_raw: u16, at: SlabCoord, power: u16) {
        let Some(spell) = SpellKind::from_raw(spell_raw) else {
            debug!("{by} tried to cast unknown spell {spell_raw}");
            return;
        };
        if self.slab_at(at).is_none() {
            return;
        }
        match spell {
            SpellKind::Lightning => {
                let targets: Vec<CreatureId> = self
                    .creatures
                    .iter()
                    .filter(|(_, c)| c.pos == at)
                    .map(|(id, _)| *id)
                    .collect();
                for id in targets {
                    let damage = u32::from(self.config.lightning_base_damage)
                        + u32::from(power) * 2
                        + self.rng.roll(8);
                    let Some(creature) = self.creatures.get_mut(&id) else {
                        continue;
                    };
                    let remaining = u32::from(creature.health).saturating_sub(damage);
                    if remaining == 0 {
                        self.creatures.remove(&id);
                    } else {
                        creature.health = remaining as u16;
                    }
                }
            }
            SpellKind::Summon => {
                if self.slab_at(at).and_then(|s| s.owner) != Some(by) {
                    return;
                }
                if self.creatures_owned_by(by) + self.pending_for(by)
                    >= self.config.max_creatures_per_owner
                {
                    return;
                }
                let due_tick = self.tick + self.config.summon_delay_ticks;
                self.pending_summons.push(PendingSummon {
                    due_tick,
                    owner: by,
                    kind: CreatureKind::Warlock,
                    at,
                });
            }
            SpellKind::Heal => {
                let cap = self.config.starting_health;
                for creature in self
                    .creatures
                    .values_mut()
                    .filter(|c| c.owner == by && c.pos == at)
                {
                    creature.health = creature.health.saturating_add(power).min(cap);
                }
            }
        }
    }

    fn command_creature(
        &mut self,
        by: ParticipantId,
        id: CreatureId,
        order_raw: u16,
        target: SlabCoord,
    ) {
        let Some(order) = CreatureOrder::from_raw(order_raw) else {
            debug!("{by} issued unknown creature order {order_raw}");
            return;
        };
        let width = self.config.map_width;
        let height = self.config.map_height;
        let Some(creature) = self.creatures.get_mut(&id) else {
            return;
        };
        if creature.owner != by {
            // Creatures only obey their keeper.
            return;
        }
        match order {
            CreatureOrder::MoveTo => {
                creature.goal = Some(SlabCoord::new(
                    target.x.min(width.saturating_sub(1)),
                    target.y.min(height.saturating_sub(1)),
                ));
            }
            CreatureOrder::Halt => {
                creature.goal = None;
            }
        }
    }

    fn pending_for(&self, owner: ParticipantId) -> usize {
        self.pending_summons
            .iter()
            .filter(|s| s.owner == owner)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use emberdeep_protocol::Tick;

    fn state() -> SimState {
        SimState::new(
            42,
            SimConfig::default(),
            &[ParticipantId(0), ParticipantId(1)],
        )
    }

    fn command(participant: u8, action: TurnAction) -> TurnCommand {
        TurnCommand::new(Tick(0), ParticipantId(participant), action)
    }

    fn first_creature_of(state: &SimState, owner: ParticipantId) -> CreatureId {
        *state
            .creatures
            .iter()
            .find(|(_, c)| c.owner == owner)
            .map(|(id, _)| id)
            .unwrap()
    }

    #[test]
    fn place_room_claims_unowned_territory() {
        let mut state = state();
        state.apply_command(&command(
            0,
            TurnAction::PlaceRoom {
                kind: RoomKind::Treasury.as_raw(),
                slab_x: 5,
                slab_y: 5,
            },
        ));
        let slab = state.slab_at(SlabCoord::new(5, 5)).unwrap();
        assert_eq!(slab.owner, Some(ParticipantId(0)));
        assert_eq!(slab.room, Some(RoomKind::Treasury));
    }

    #[test]
    fn place_room_on_enemy_territory_is_ignored() {
        let mut state = state();
        state.slab_mut(SlabCoord::new(5, 5)).unwrap().owner = Some(ParticipantId(1));
        state.apply_command(&command(
            0,
            TurnAction::PlaceRoom {
                kind: 0,
                slab_x: 5,
                slab_y: 5,
            },
        ));
        let slab = state.slab_at(SlabCoord::new(5, 5)).unwrap();
        assert_eq!(slab.owner, Some(ParticipantId(1)));
        assert_eq!(slab.room, None);
    }

    #[test]
    fn unknown_room_kind_is_a_deterministic_no_op() {
        let mut state = state();
        let before = state.fold_digest();
        state.apply_command(&command(
            0,
            TurnAction::PlaceRoom {
                kind: 999,
                slab_x: 5,
                slab_y: 5,
            },
        ));
        // Cursor bookkeeping aside, no gameplay state moved and — crucially
        // — no rng draw was consumed.
        let after = state.fold_digest();
        assert_eq!(before.creatures, after.creatures);
        assert_eq!(before.territory, after.territory);
        assert_eq!(before.rng_draws, after.rng_draws);
    }

    #[test]
    fn out_of_bounds_targets_are_ignored() {
        let mut state = state();
        let before = state.fold_digest();
        state.apply_command(&command(
            0,
            TurnAction::PlaceRoom {
                kind: 0,
                slab_x: 5000,
                slab_y: 5,
            },
        ));
        assert_eq!(state.fold_digest().territory, before.territory);
    }

    #[test]
    fn sell_room_keeps_the_claim() {
        let mut state = state();
        state.apply_command(&command(
            0,
            TurnAction::PlaceRoom {
                kind: RoomKind::Library.as_raw(),
                slab_x: 3,
                slab_y: 3,
            },
        ));
        state.apply_command(&command(
            0,
            TurnAction::SellRoom {
                slab_x: 3,
                slab_y: 3,
            },
        ));
        let slab = state.slab_at(SlabCoord::new(3, 3)).unwrap();
        assert_eq!(slab.room, None);
        assert_eq!(slab.owner, Some(ParticipantId(0)));
    }

    #[test]
    fn lightning_damages_creatures_on_the_slab() {
        let mut state = state();
        let id = first_creature_of(&state, ParticipantId(1));
        let pos = state.creatures[&id].pos;
        let health_before = state.creatures[&id].health;

        state.apply_command(&command(
            0,
            TurnAction::CastSpell {
                spell: SpellKind::Lightning.as_raw(),
                target_x: pos.x,
                target_y: pos.y,
                power: 0,
            },
        ));
        let health_after = state.creatures[&id].health;
        assert!(health_after < health_before);
    }

    #[test]
    fn lightning_kills_and_removes() {
        let mut state = state();
        let id = first_creature_of(&state, ParticipantId(1));
        let pos = state.creatures[&id].pos;
        state.creatures.get_mut(&id).unwrap().health = 1;

        state.apply_command(&command(
            0,
            TurnAction::CastSpell {
                spell: SpellKind::Lightning.as_raw(),
                target_x: pos.x,
                target_y: pos.y,
                power: 10,
            },
        ));
        assert!(!state.creatures.contains_key(&id));
    }

    #[test]
    fn summon_arrives_after_its_delay() {
        let mut state = state();
        let id = first_creature_of(&state, ParticipantId(0));
        let home = state.creatures[&id].pos;
        let before = state.creatures_owned_by(ParticipantId(0));

        state.apply_command(&command(
            0,
            TurnAction::CastSpell {
                spell: SpellKind::Summon.as_raw(),
                target_x: home.x,
                target_y: home.y,
                power: 0,
            },
        ));
        assert_eq!(state.creatures_owned_by(ParticipantId(0)), before);

        for _ in 0..state.config.summon_delay_ticks {
            state.step_tick();
        }
        assert_eq!(state.creatures_owned_by(ParticipantId(0)), before + 1);
        let warlocks = state
            .creatures
            .values()
            .filter(|c| c.kind == CreatureKind::Warlock)
            .count();
        assert_eq!(warlocks, 1);
    }

    #[test]
    fn summon_requires_owned_territory() {
        let mut state = state();
        state.apply_command(&command(
            0,
            TurnAction::CastSpell {
                spell: SpellKind::Summon.as_raw(),
                target_x: 0,
                target_y: 0,
                power: 0,
            },
        ));
        assert!(state.pending_summons.is_empty());
    }

    #[test]
    fn heal_restores_up_to_the_cap() {
        let mut state = state();
        let id = first_creature_of(&state, ParticipantId(0));
        let pos = state.creatures[&id].pos;
        state.creatures.get_mut(&id).unwrap().health = 10;

        state.apply_command(&command(
            0,
            TurnAction::CastSpell {
                spell: SpellKind::Heal.as_raw(),
                target_x: pos.x,
                target_y: pos.y,
                power: 500,
            },
        ));
        assert_eq!(
            state.creatures[&id].health,
            state.config.starting_health
        );
    }

    #[test]
    fn creatures_obey_only_their_keeper() {
        let mut state = state();
        let id = first_creature_of(&state, ParticipantId(1));

        state.apply_command(&command(
            0,
            TurnAction::CommandCreature {
                creature: id.0,
                order: CreatureOrder::MoveTo.as_raw(),
                target_x: 0,
                target_y: 0,
            },
        ));
        assert_eq!(state.creatures[&id].goal, None);

        state.apply_command(&command(
            1,
            TurnAction::CommandCreature {
                creature: id.0,
                order: CreatureOrder::MoveTo.as_raw(),
                target_x: 0,
                target_y: 0,
            },
        ));
        assert_eq!(state.creatures[&id].goal, Some(SlabCoord::new(0, 0)));
    }

    #[test]
    fn move_targets_clamp_to_the_map() {
        let mut state = state();
        let id = first_creature_of(&state, ParticipantId(0));
        state.apply_command(&command(
            0,
            TurnAction::CommandCreature {
                creature: id.0,
                order: CreatureOrder::MoveTo.as_raw(),
                target_x: 60_000,
                target_y: 60_000,
            },
        ));
        let goal = state.creatures[&id].goal.unwrap();
        assert_eq!(goal.x, state.config.map_width - 1);
        assert_eq!(goal.y, state.config.map_height - 1);
    }

    #[test]
    fn pause_blocks_gameplay_but_not_resume() {
        let mut state = state();
        state.apply_command(&command(
            0,
            TurnAction::SetPause {
                pause: true,
                world_influence: false,
            },
        ));
        assert!(state.paused());

        // Gameplay while paused: withheld.
        state.apply_command(&command(
            1,
            TurnAction::PlaceRoom {
                kind: 0,
                slab_x: 9,
                slab_y: 9,
            },
        ));
        assert_eq!(state.slab_at(SlabCoord::new(9, 9)).unwrap().room, None);

        // Resume while paused: always dispatched.
        state.apply_command(&command(
            1,
            TurnAction::SetPause {
                pause: false,
                world_influence: false,
            },
        ));
        assert!(!state.paused());
    }

    #[test]
    fn world_influence_allows_gameplay_while_paused() {
        let mut state = state();
        state.apply_command(&command(
            0,
            TurnAction::SetPause {
                pause: true,
                world_influence: true,
            },
        ));
        state.apply_command(&command(
            1,
            TurnAction::PlaceRoom {
                kind: 0,
                slab_x: 9,
                slab_y: 9,
            },
        ));
        assert_eq!(
            state.slab_at(SlabCoord::new(9, 9)).unwrap().room,
            Some(RoomKind::Lair)
        );
    }

    #[test]
    fn cursor_updates_apply_regardless_of_action() {
        let mut state = state();
        let mut cmd = command(1, TurnAction::Idle);
        cmd.pointer = emberdeep_protocol::PointerState { x: 12, y: 34 };
        state.apply_command(&cmd);
        assert_eq!(state.cursors[&ParticipantId(1)].pointer.x, 12);
        assert_eq!(state.cursors[&ParticipantId(1)].pointer.y, 34);
    }

    #[test]
    fn identical_command_scripts_produce_identical_digests() {
        // The determinism property at sim level: two instances, same seed,
        // same commands in the same order, digests identical every tick.
        let script: Vec<TurnCommand> = vec![
            command(
                0,
                TurnAction::PlaceRoom {
                    kind: 1,
                    slab_x: 4,
                    slab_y: 4,
                },
            ),
            command(1, TurnAction::Idle),
            command(
                0,
                TurnAction::CastSpell {
                    spell: 1,
                    target_x: 4,
                    target_y: 4,
                    power: 0,
                },
            ),
            command(
                1,
                TurnAction::PlaceRoom {
                    kind: 2,
                    slab_x: 20,
                    slab_y: 20,
                },
            ),
        ];

        let mut a = state();
        let mut b = state();
        for tick in 0..30u64 {
            let cmd = &script[(tick as usize) % script.len()];
            a.apply_command(cmd);
            b.apply_command(cmd);
            a.step_tick();
            b.step_tick();
            assert_eq!(a.fold_digest(), b.fold_digest(), "diverged at tick {tick}");
        }
    }
}
