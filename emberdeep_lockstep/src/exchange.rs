// Exchange coordinator — gathers every participant's command for the
// oldest outstanding tick and releases them for ordered application only
// once the round is complete.
//
// Completion policy, in order of preference:
// 1. All slots present: release immediately.
// 2. Wait-for-missing timeout expired and every missing participant is
//    disconnected or operator-substituted: fill those slots with the
//    canonical empty command, record them `SubstitutedByAi`, release.
// 3. Otherwise: keep waiting. A connected human participant's slot is never
//    defaulted — the session stalls instead, surfaced as `Stalled` status.
//    Consistency beats latency; substitution of a merely-slow participant
//    is an operator decision, never automatic.
//
// Remote commands may legitimately arrive before the local side has
// committed (and thus opened) their tick — clock skew of a tick or two is
// normal. Such frames are parked in a staging map keyed by tick and merged
// when the round opens.
//
// Released commands iterate in ascending `ParticipantId` order — a visible
// property of the `BTreeMap` slot storage, not an accident of array layout —
// so commands touching shared state resolve identically on every machine.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use log::warn;

use emberdeep_protocol::{ParticipantId, Tick, TurnCommand};

use crate::error::IngestError;

/// Frames claiming ticks further than this past the release frontier are
/// dropped instead of staged. Legitimate clock skew is a handful of ticks;
/// anything beyond is a confused or hostile sender, and staging it would
/// let one peer grow our memory without bound.
const STAGING_HORIZON: u64 = 256;

/// How a participant's slot in a round was filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    /// The participant's own command arrived (or is the local command).
    Present,
    /// No command yet. Only ever visible on rounds still being collected —
    /// a released round never contains a missing slot.
    Missing,
    /// Filled with the canonical empty command after the participant
    /// disconnected or was operator-substituted.
    SubstitutedByAi,
}

/// One completed network round: every participant's command for one tick.
#[derive(Clone, Debug)]
pub struct ExchangeRound {
    pub tick: Tick,
    slots: BTreeMap<ParticipantId, (SlotStatus, TurnCommand)>,
}

impl ExchangeRound {
    /// Commands in canonical application order: ascending participant id.
    pub fn commands(&self) -> impl Iterator<Item = &TurnCommand> {
        self.slots.values().map(|(_, cmd)| cmd)
    }

    /// How the given participant's slot was resolved.
    pub fn slot_status(&self, id: ParticipantId) -> Option<SlotStatus> {
        self.slots.get(&id).map(|(status, _)| *status)
    }

    /// Participants whose slots were substituted in this round.
    pub fn substituted(&self) -> Vec<ParticipantId> {
        self.slots
            .iter()
            .filter(|(_, (status, _))| *status == SlotStatus::SubstitutedByAi)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Collects per-tick rounds from the local commit path and the transport.
pub struct ExchangeCoordinator {
    local: ParticipantId,
    /// Full participant set fixed at session start, local included.
    expected: BTreeSet<ParticipantId>,
    /// Participants currently reachable, per the transport roster.
    connected: BTreeSet<ParticipantId>,
    /// Participants the operator has handed to AI control.
    substituted: BTreeSet<ParticipantId>,
    /// Open rounds: tick -> received commands (local and remote).
    rounds: BTreeMap<Tick, BTreeMap<ParticipantId, TurnCommand>>,
    /// Early remote arrivals for ticks whose round has not opened yet.
    staging: BTreeMap<Tick, BTreeMap<ParticipantId, TurnCommand>>,
    /// The next tick to release; rounds release strictly in tick order.
    next_release: Tick,
    /// Deadline for the round currently being waited on.
    deadline: Option<Instant>,
    wait_for_missing: Duration,
    /// Set while the current round is past its deadline but blocked on a
    /// connected human participant.
    stalled: Option<ParticipantId>,
}

impl ExchangeCoordinator {
    pub fn new(
        local: ParticipantId,
        participants: BTreeSet<ParticipantId>,
        wait_for_missing: Duration,
    ) -> ExchangeCoordinator {
        ExchangeCoordinator {
            local,
            connected: participants.clone(),
            expected: participants,
            substituted: BTreeSet::new(),
            rounds: BTreeMap::new(),
            staging: BTreeMap::new(),
            next_release: Tick(0),
            deadline: None,
            wait_for_missing,
            stalled: None,
        }
    }

    /// Open the round for `tick` with the local command, merging any remote
    /// commands that arrived early.
    pub fn begin_round(&mut self, tick: Tick, local_command: TurnCommand) {
        let round = self.rounds.entry(tick).or_default();
        round.insert(self.local, local_command);
        if let Some(staged) = self.staging.remove(&tick) {
            for (id, cmd) in staged {
                round.entry(id).or_insert(cmd);
            }
        }
    }

    /// Decode and file a remote command. `audit_scalar` is the fold of the
    /// consistency record the frame carried (zero if none) — the value the
    /// sender sealed its integrity token against.
    ///
    /// Frames for already-released ticks are ignored: the transport is
    /// at-least-once and late duplicates are normal.
    pub fn ingest_remote(
        &mut self,
        from: ParticipantId,
        tick: Tick,
        bytes: &[u8],
        audit_scalar: u64,
    ) -> Result<(), IngestError> {
        if tick < self.next_release {
            return Ok(());
        }
        if tick.0 > self.next_release.0 + STAGING_HORIZON {
            warn!("dropping frame from {from} for far-future {tick}");
            return Ok(());
        }
        let command = TurnCommand::decode(bytes)?;
        if command.participant != from {
            return Err(IngestError::IdentityMismatch {
                origin: from,
                claimed: command.participant,
            });
        }
        if command.tick != tick {
            return Err(IngestError::TickMismatch {
                envelope: tick,
                inner: command.tick,
            });
        }
        if !command.verify(audit_scalar) {
            return Err(IngestError::IntegrityMismatch { from, tick });
        }

        let bucket = if self.rounds.contains_key(&tick) {
            self.rounds.get_mut(&tick).unwrap()
        } else {
            self.staging.entry(tick).or_default()
        };
        match bucket.get(&from) {
            None => {
                bucket.insert(from, command);
            }
            Some(existing) if same_content(existing, &command) => {
                // Redundant delivery (possibly re-sealed after a resync);
                // keep the first copy.
            }
            Some(_) => {
                // Two different commands for one (participant, tick) pair is
                // a sender-side protocol violation. Keep the first; the
                // divergence auditor will catch any fallout.
                warn!("conflicting duplicate command from {from} for {tick}; keeping first");
            }
        }
        Ok(())
    }

    /// Release the oldest round if it is complete, or resolve it by
    /// substitution if its deadline has passed and policy allows.
    pub fn poll_completed_round(&mut self, now: Instant) -> Option<ExchangeRound> {
        let tick = self.next_release;
        self.stalled = None;
        let received = self.rounds.get(&tick)?;
        if !received.contains_key(&self.local) {
            // The local side has not committed this tick yet; the round
            // exists only because remote frames were merged early.
            return None;
        }

        let missing: Vec<ParticipantId> = self
            .expected
            .iter()
            .copied()
            .filter(|id| !received.contains_key(id))
            .collect();

        if missing.is_empty() {
            self.deadline = None;
            return Some(self.release(tick));
        }

        let deadline = *self.deadline.get_or_insert(now + self.wait_for_missing);
        if now < deadline {
            return None;
        }

        // Deadline expired: substitution is allowed only for participants
        // that are gone or explicitly handed to AI.
        if let Some(blocker) = missing.iter().copied().find(|id| !self.substitutable(*id)) {
            self.stalled = Some(blocker);
            return None;
        }

        self.deadline = None;
        Some(self.release(tick))
    }

    /// The participant the current round is stalled on, if the deadline has
    /// expired and substitution is not permitted.
    pub fn stalled_on(&self) -> Option<ParticipantId> {
        self.stalled
    }

    /// Operator escape hatch: hand a participant's slot to AI substitution
    /// from now on. Never invoked automatically for a slow participant.
    pub fn mark_substituted(&mut self, id: ParticipantId) {
        self.substituted.insert(id);
    }

    /// Refresh the reachable set from the transport roster.
    pub fn update_connected(&mut self, roster: &BTreeSet<ParticipantId>) {
        self.connected = self.expected.intersection(roster).copied().collect();
    }

    /// Peers whose consistency records we still expect: connected,
    /// non-substituted participants other than the local one.
    pub fn live_reporters(&self) -> BTreeSet<ParticipantId> {
        self.connected
            .iter()
            .copied()
            .filter(|id| *id != self.local && !self.substituted.contains(id))
            .collect()
    }

    /// Splice onto a resync snapshot taken at `tick`: all open rounds are
    /// dropped (ticks at or before it are inside the snapshot; later ones
    /// will be re-collected from re-broadcasts), and release continues from
    /// the following tick. Early arrivals beyond the snapshot stay staged.
    pub fn re_anchor(&mut self, tick: Tick) {
        self.rounds.clear();
        self.staging.retain(|t, _| *t > tick);
        self.next_release = tick.next();
        self.deadline = None;
        self.stalled = None;
    }

    fn substitutable(&self, id: ParticipantId) -> bool {
        self.substituted.contains(&id) || !self.connected.contains(&id)
    }

    fn release(&mut self, tick: Tick) -> ExchangeRound {
        let received = self.rounds.remove(&tick).unwrap_or_default();
        let mut slots = BTreeMap::new();
        for id in &self.expected {
            match received.get(id) {
                Some(cmd) => {
                    slots.insert(*id, (SlotStatus::Present, *cmd));
                }
                None => {
                    slots.insert(
                        *id,
                        (SlotStatus::SubstitutedByAi, TurnCommand::empty(tick, *id)),
                    );
                }
            }
        }
        self.next_release = tick.next();
        ExchangeRound { tick, slots }
    }
}

/// Command equality ignoring the integrity token: a command re-broadcast
/// after a resync is re-sealed against the restored state but carries the
/// same input.
fn same_content(a: &TurnCommand, b: &TurnCommand) -> bool {
    a.tick == b.tick
        && a.participant == b.participant
        && a.action == b.action
        && a.pointer == b.pointer
        && a.control_flags == b.control_flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberdeep_protocol::{DecodeError, TurnAction};

    fn participants(n: u8) -> BTreeSet<ParticipantId> {
        (0..n).map(ParticipantId).collect()
    }

    fn coordinator(n: u8, wait: Duration) -> ExchangeCoordinator {
        ExchangeCoordinator::new(ParticipantId(0), participants(n), wait)
    }

    fn sealed(tick: u64, participant: u8, action: TurnAction) -> TurnCommand {
        let mut cmd = TurnCommand::new(Tick(tick), ParticipantId(participant), action);
        cmd.seal(0);
        cmd
    }

    fn ingest(
        coord: &mut ExchangeCoordinator,
        cmd: &TurnCommand,
    ) -> Result<(), IngestError> {
        coord.ingest_remote(cmd.participant, cmd.tick, &cmd.encode(), 0)
    }

    #[test]
    fn complete_round_releases_in_participant_order() {
        let mut coord = coordinator(3, Duration::from_secs(10));
        coord.begin_round(Tick(0), sealed(0, 0, TurnAction::Idle));

        // Remote commands arrive out of id order.
        ingest(&mut coord, &sealed(0, 2, TurnAction::Idle)).unwrap();
        assert!(coord.poll_completed_round(Instant::now()).is_none());
        ingest(
            &mut coord,
            &sealed(
                0,
                1,
                TurnAction::SellRoom {
                    slab_x: 1,
                    slab_y: 1,
                },
            ),
        )
        .unwrap();

        let round = coord.poll_completed_round(Instant::now()).unwrap();
        let order: Vec<ParticipantId> = round.commands().map(|c| c.participant).collect();
        assert_eq!(order, vec![ParticipantId(0), ParticipantId(1), ParticipantId(2)]);
        assert_eq!(round.slot_status(ParticipantId(1)), Some(SlotStatus::Present));
        assert!(round.substituted().is_empty());
    }

    #[test]
    fn poll_without_local_commit_returns_none() {
        let mut coord = coordinator(2, Duration::ZERO);
        ingest(&mut coord, &sealed(0, 1, TurnAction::Idle)).unwrap();
        // Even with the deadline at zero, the round cannot resolve before
        // the local participant has committed.
        assert!(coord.poll_completed_round(Instant::now()).is_none());
    }

    #[test]
    fn early_arrivals_are_staged_and_merged() {
        let mut coord = coordinator(2, Duration::from_secs(10));
        // Remote frame for tick 3 arrives before any local commit.
        ingest(&mut coord, &sealed(3, 1, TurnAction::Idle)).unwrap();

        for t in 0..=3 {
            coord.begin_round(Tick(t), sealed(t, 0, TurnAction::Idle));
        }
        for t in 0..3 {
            ingest(&mut coord, &sealed(t, 1, TurnAction::Idle)).unwrap();
            assert_eq!(
                coord.poll_completed_round(Instant::now()).unwrap().tick,
                Tick(t)
            );
        }
        // Tick 3 completes from the staged frame alone.
        assert_eq!(
            coord.poll_completed_round(Instant::now()).unwrap().tick,
            Tick(3)
        );
    }

    #[test]
    fn connected_human_stalls_rather_than_substituting() {
        let mut coord = coordinator(2, Duration::from_millis(50));
        coord.begin_round(Tick(0), sealed(0, 0, TurnAction::Idle));

        let start = Instant::now();
        assert!(coord.poll_completed_round(start).is_none());
        assert_eq!(coord.stalled_on(), None, "deadline not yet expired");

        let late = start + Duration::from_millis(100);
        assert!(coord.poll_completed_round(late).is_none());
        assert_eq!(coord.stalled_on(), Some(ParticipantId(1)));

        // However long we wait, the human slot is never defaulted.
        let much_later = start + Duration::from_secs(3600);
        assert!(coord.poll_completed_round(much_later).is_none());
    }

    #[test]
    fn disconnected_participant_is_substituted_after_timeout() {
        let mut coord = coordinator(3, Duration::from_millis(50));
        coord.begin_round(Tick(0), sealed(0, 0, TurnAction::Idle));
        ingest(&mut coord, &sealed(0, 1, TurnAction::Idle)).unwrap();

        // Participant 2 drops off the roster.
        coord.update_connected(&participants(2));

        let start = Instant::now();
        assert!(coord.poll_completed_round(start).is_none());
        let round = coord
            .poll_completed_round(start + Duration::from_millis(60))
            .unwrap();
        assert_eq!(
            round.slot_status(ParticipantId(2)),
            Some(SlotStatus::SubstitutedByAi)
        );
        assert_eq!(round.substituted(), vec![ParticipantId(2)]);
        // The substituted slot carries the canonical empty command.
        let sub = round.commands().find(|c| c.participant == ParticipantId(2));
        assert!(sub.unwrap().is_empty());
    }

    #[test]
    fn operator_substitution_unblocks_the_round() {
        let mut coord = coordinator(2, Duration::ZERO);
        coord.begin_round(Tick(0), sealed(0, 0, TurnAction::Idle));

        let now = Instant::now();
        assert!(coord.poll_completed_round(now).is_none());
        assert_eq!(coord.stalled_on(), Some(ParticipantId(1)));

        coord.mark_substituted(ParticipantId(1));
        let round = coord.poll_completed_round(now).unwrap();
        assert_eq!(
            round.slot_status(ParticipantId(1)),
            Some(SlotStatus::SubstitutedByAi)
        );
        assert_eq!(coord.stalled_on(), None);
    }

    #[test]
    fn stale_frames_are_ignored() {
        let mut coord = coordinator(2, Duration::from_secs(10));
        coord.begin_round(Tick(0), sealed(0, 0, TurnAction::Idle));
        ingest(&mut coord, &sealed(0, 1, TurnAction::Idle)).unwrap();
        coord.poll_completed_round(Instant::now()).unwrap();

        // A late duplicate of the released tick is dropped without error.
        assert!(ingest(&mut coord, &sealed(0, 1, TurnAction::Idle)).is_ok());
        coord.begin_round(Tick(1), sealed(1, 0, TurnAction::Idle));
        assert!(coord.poll_completed_round(Instant::now()).is_none());
    }

    #[test]
    fn duplicate_frames_do_not_double_apply() {
        let mut coord = coordinator(2, Duration::from_secs(10));
        coord.begin_round(Tick(0), sealed(0, 0, TurnAction::Idle));
        let remote = sealed(0, 1, TurnAction::Idle);
        ingest(&mut coord, &remote).unwrap();
        ingest(&mut coord, &remote).unwrap();

        let round = coord.poll_completed_round(Instant::now()).unwrap();
        assert_eq!(round.commands().count(), 2);
    }

    #[test]
    fn identity_and_tick_mismatches_are_rejected() {
        let mut coord = coordinator(3, Duration::from_secs(10));
        let cmd = sealed(0, 1, TurnAction::Idle);

        let err = coord
            .ingest_remote(ParticipantId(2), Tick(0), &cmd.encode(), 0)
            .unwrap_err();
        assert!(matches!(err, IngestError::IdentityMismatch { .. }));

        let err = coord
            .ingest_remote(ParticipantId(1), Tick(5), &cmd.encode(), 0)
            .unwrap_err();
        assert!(matches!(err, IngestError::TickMismatch { .. }));
    }

    #[test]
    fn malformed_bytes_surface_a_decode_error() {
        let mut coord = coordinator(2, Duration::from_secs(10));
        let err = coord
            .ingest_remote(ParticipantId(1), Tick(0), &[1, 2, 3], 0)
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Command(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn integrity_mismatch_drops_the_frame() {
        let mut coord = coordinator(2, Duration::from_secs(10));
        let mut cmd = TurnCommand::new(Tick(0), ParticipantId(1), TurnAction::Idle);
        cmd.seal(12345);

        // Receiver believes the sender's scalar was 0.
        let err = coord
            .ingest_remote(ParticipantId(1), Tick(0), &cmd.encode(), 0)
            .unwrap_err();
        assert!(matches!(err, IngestError::IntegrityMismatch { .. }));
    }

    #[test]
    fn far_future_frames_are_dropped_not_staged() {
        let mut coord = coordinator(2, Duration::from_secs(10));
        let far = STAGING_HORIZON + 10;
        assert!(ingest(&mut coord, &sealed(far, 1, TurnAction::Idle)).is_ok());

        // When the round eventually opens, nothing was staged for it.
        for t in 0..=far {
            coord.begin_round(Tick(t), sealed(t, 0, TurnAction::Idle));
        }
        // Drain the rounds below; the far round must still be missing its
        // remote slot.
        for t in 0..far {
            ingest(&mut coord, &sealed(t, 1, TurnAction::Idle)).unwrap();
            assert!(coord.poll_completed_round(Instant::now()).is_some(), "tick {t}");
        }
        assert!(coord.poll_completed_round(Instant::now()).is_none());
    }

    #[test]
    fn re_anchor_discards_open_rounds() {
        let mut coord = coordinator(2, Duration::from_secs(10));
        for t in 0..3 {
            coord.begin_round(Tick(t), sealed(t, 0, TurnAction::Idle));
        }
        ingest(&mut coord, &sealed(5, 1, TurnAction::Idle)).unwrap();

        coord.re_anchor(Tick(2));
        // Rounds restart after the snapshot tick; the staged future frame
        // survives.
        coord.begin_round(Tick(3), sealed(3, 0, TurnAction::Idle));
        assert!(coord.poll_completed_round(Instant::now()).is_none());
        ingest(&mut coord, &sealed(3, 1, TurnAction::Idle)).unwrap();
        assert_eq!(
            coord.poll_completed_round(Instant::now()).unwrap().tick,
            Tick(3)
        );
    }
}
