// The lock-step session driver.
//
// One `LockstepSession` runs per process, on the single simulation thread.
// Each render/input frame the host code calls, in order:
//
//   1. `commit_local_input` — once per new tick: sample local input into a
//      command, seal it, store it in the lag buffer, broadcast it.
//   2. `pump` — drain the transport, file remote commands and consistency
//      records, drop malformed frames in place.
//   3. `try_advance` — if the oldest outstanding tick has cleared the lag
//      window and its round is complete, apply the round in participant
//      order, advance the simulation, record and evaluate digests.
//
// The session never mutates simulation state itself — it hands complete,
// validated rounds to `Simulation::apply` and asks for digests afterwards.
// Ticks are processed strictly sequentially; `try_advance` applying at most
// one round per call keeps the caller in control of pacing.
//
// Divergence recovery is driven from here as well: once the auditor
// confirms divergence, the session freezes normal ticking, elects the
// source, and either transmits (source) or awaits and applies (everyone
// else) the snapshot, then splices the window back onto lock-step and
// re-broadcasts retained local input.

use std::collections::BTreeSet;
use std::time::Instant;

use log::{info, warn};

use emberdeep_protocol::{
    ControlFlags, ParticipantId, PeerMessage, PointerState, Tick, TurnAction, TurnCommand,
    decode_message, encode_message,
};

use crate::auditor::{ConsistencyAuditor, ConsistencyVerdict};
use crate::config::LockstepConfig;
use crate::error::{CommitError, ResyncError, SessionError};
use crate::exchange::ExchangeCoordinator;
use crate::lag_buffer::{InputLagBuffer, PendingExchangeWindow};
use crate::pause::{PauseCoordinator, PauseIntent};
use crate::resync::{ResyncPhase, ResyncSession, package_snapshot, verify_snapshot};
use crate::simulation::Simulation;
use crate::status::SyncStatus;
use crate::transport::Transport;

/// Raw per-tick local input, produced by the input-translation layer
/// exactly once per tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct InputSample {
    pub action: TurnAction,
    pub pointer: PointerState,
    pub control_flags: ControlFlags,
}

impl InputSample {
    /// No discrete action, no continuous input.
    pub fn idle() -> InputSample {
        InputSample::default()
    }

    pub fn action(action: TurnAction) -> InputSample {
        InputSample {
            action,
            ..InputSample::default()
        }
    }
}

/// What one `try_advance` call accomplished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// A full round was applied at this tick.
    Applied(Tick),
    /// Waiting on the lag window or on in-flight frames. Normal.
    NotReady,
    /// Blocked past the missing-participant deadline on a connected human.
    Stalled(ParticipantId),
    /// Divergence recovery is in progress.
    Resyncing(ResyncPhase),
}

/// Per-process driver of one lock-step multiplayer session.
pub struct LockstepSession<S: Simulation, T: Transport> {
    local: ParticipantId,
    config: LockstepConfig,
    sim: S,
    transport: T,
    lag: InputLagBuffer,
    exchange: ExchangeCoordinator,
    auditor: ConsistencyAuditor,
    pause: PauseCoordinator,
    resync: Option<ResyncSession>,
    /// Last applied exchange tick.
    applied: Option<Tick>,
    status: SyncStatus,
    pending_failure: Option<ResyncError>,
}

impl<S: Simulation, T: Transport> LockstepSession<S, T> {
    /// Create a session over a transport whose roster is already complete.
    /// The participant set is fixed here; later roster changes can only
    /// shrink it.
    pub fn new(
        local: ParticipantId,
        sim: S,
        transport: T,
        config: LockstepConfig,
    ) -> LockstepSession<S, T> {
        let participants: BTreeSet<ParticipantId> = transport.roster();
        let exchange =
            ExchangeCoordinator::new(local, participants, config.wait_for_missing);
        let auditor =
            ConsistencyAuditor::new(local, config.divergence_debounce, config.history_ticks);
        LockstepSession {
            local,
            lag: InputLagBuffer::new(Tick(0), config.lag_depth),
            exchange,
            auditor,
            pause: PauseCoordinator::new(),
            resync: None,
            applied: None,
            status: SyncStatus::InSync,
            pending_failure: None,
            config,
            sim,
            transport,
        }
    }

    /// Commit the local input for the next tick: build the command (a due
    /// pause intent overrides the sampled action), seal it, buffer it,
    /// broadcast it, and open its exchange round.
    ///
    /// Called exactly once per tick — including while stalled, paused, or
    /// resyncing: input is never dropped, only its application deferred.
    pub fn commit_local_input(&mut self, sample: InputSample) -> Result<Tick, CommitError> {
        let tick = self.lag.next_commit();
        let action = match self.pause.take_due(tick) {
            Some(intent) => intent.as_action(),
            None => sample.action,
        };
        let mut command = TurnCommand {
            tick,
            participant: self.local,
            action,
            pointer: sample.pointer,
            control_flags: sample.control_flags,
            integrity_token: 0,
        };
        let audit = self.auditor.latest_record();
        command.seal(audit.map_or(0, |record| record.digest.fold()));

        self.lag.commit_local(command)?;
        self.exchange.begin_round(tick, command);
        let frame = PeerMessage::TurnFrame {
            participant: self.local,
            tick,
            command: command.encode(),
            audit,
        };
        self.transport.broadcast(&encode_message(&frame));
        Ok(tick)
    }

    /// Drain the transport. Malformed or inconsistent frames are dropped
    /// and logged; they never abort the session.
    pub fn pump(&mut self) {
        let roster = self.transport.roster();
        self.exchange.update_connected(&roster);

        // A resync source that vanishes mid-transfer is unrecoverable.
        if let Some(resync) = &mut self.resync
            && resync.phase == ResyncPhase::AwaitingSource
            && resync.source != self.local
            && !roster.contains(&resync.source)
        {
            resync.phase = ResyncPhase::Failed;
            self.pending_failure = Some(ResyncError::SourceDisconnected(resync.source));
        }

        while let Some((origin, bytes)) = self.transport.try_receive() {
            match decode_message(&bytes) {
                Ok(PeerMessage::TurnFrame {
                    participant,
                    tick,
                    command,
                    audit,
                }) => {
                    if participant != origin {
                        warn!("frame claiming {participant} arrived from {origin}; dropped");
                        continue;
                    }
                    let scalar = audit.map_or(0, |record| record.digest.fold());
                    match self.exchange.ingest_remote(origin, tick, &command, scalar) {
                        Ok(()) => {
                            if let Some(record) = audit {
                                self.auditor.ingest_remote(origin, record);
                            }
                        }
                        Err(err) => warn!("dropping frame from {origin} for {tick}: {err}"),
                    }
                }
                Ok(PeerMessage::SnapshotTransfer { tick, crc32, state }) => {
                    self.handle_snapshot(origin, tick, crc32, &state);
                }
                Err(err) => warn!("dropping malformed message from {origin}: {err}"),
            }
        }
    }

    /// Attempt to apply the oldest outstanding tick. Applies at most one
    /// round per call.
    pub fn try_advance(&mut self) -> Result<AdvanceOutcome, SessionError> {
        if let Some(failure) = self.pending_failure.take() {
            self.status = SyncStatus::Resyncing {
                phase: ResyncPhase::Failed,
            };
            return Err(SessionError::Resync(failure));
        }

        if let Some(resync) = &self.resync {
            let phase = resync.phase;
            let source = resync.source;
            if phase == ResyncPhase::AwaitingSource && source == self.local {
                return Ok(self.transmit_snapshot());
            }
            self.status = SyncStatus::Resyncing { phase };
            return Ok(AdvanceOutcome::Resyncing(phase));
        }

        let next = self.applied.map_or(Tick(0), Tick::next);
        if self.lag.fetch_for_application(next).is_none() {
            // Still inside the lag window (or not yet committed locally).
            return Ok(AdvanceOutcome::NotReady);
        }

        let Some(round) = self.exchange.poll_completed_round(Instant::now()) else {
            if let Some(waiting_on) = self.exchange.stalled_on() {
                self.status = SyncStatus::Stalled { waiting_on };
                return Ok(AdvanceOutcome::Stalled(waiting_on));
            }
            return Ok(AdvanceOutcome::NotReady);
        };

        // Ordered application: ascending participant id, fixed everywhere.
        for command in round.commands() {
            self.sim.apply(command);
        }
        self.sim.advance_tick();
        let digest = self.sim.digest();
        self.auditor.record_local(next, digest);
        self.applied = Some(next);
        self.lag.advance(next.next());

        if matches!(self.status, SyncStatus::Stalled { .. }) {
            self.status = SyncStatus::InSync;
        }

        let reporters = self.exchange.live_reporters();
        for (tick, verdict) in self.auditor.evaluate_ready(&reporters) {
            if verdict != ConsistencyVerdict::InSync {
                self.status = SyncStatus::Diverged { tick };
            }
        }

        if let Some(report) = self.auditor.divergence_confirmed() {
            let resync = ResyncSession::begin(report.tick, &report.votes);
            info!(
                "divergence confirmed at {}; elected source {}",
                report.tick, resync.source
            );
            self.status = SyncStatus::Resyncing {
                phase: resync.phase,
            };
            self.resync = Some(resync);
            return Ok(AdvanceOutcome::Resyncing(ResyncPhase::AwaitingSource));
        }

        Ok(AdvanceOutcome::Applied(next))
    }

    /// Queue a lock-step pause request for the next committed tick.
    pub fn request_pause(&mut self, world_influence: bool) {
        self.pause.request(
            self.lag.next_commit(),
            PauseIntent {
                pause: true,
                world_influence,
            },
        );
    }

    /// Queue a lock-step resume for the next committed tick.
    pub fn request_resume(&mut self) {
        self.request_resume_after(0);
    }

    /// Queue a resume `grace_ticks` commits ahead — the "unpause after a
    /// short grace period" flow, expressed as a future-tick command rather
    /// than a timer.
    pub fn request_resume_after(&mut self, grace_ticks: u64) {
        self.pause.request(
            Tick(self.lag.next_commit().0 + grace_ticks),
            PauseIntent {
                pause: false,
                world_influence: false,
            },
        );
    }

    /// Operator escape hatch: resolve this participant's future (and
    /// currently blocking) slots by AI substitution.
    pub fn mark_substituted(&mut self, id: ParticipantId) {
        self.exchange.mark_substituted(id);
    }

    /// Current coarse synchronization status, for UI and diagnostics.
    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Last applied exchange tick, if any round has been applied yet.
    pub fn applied_tick(&self) -> Option<Tick> {
        self.applied
    }

    /// Read-only view of the commit/application window.
    pub fn window(&self) -> &PendingExchangeWindow {
        self.lag.window()
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local
    }

    pub fn config(&self) -> &LockstepConfig {
        &self.config
    }

    /// The driven simulation.
    pub fn sim(&self) -> &S {
        &self.sim
    }

    /// Mutable simulation access, for diagnostics and tests. Mutating
    /// through this on a live session will — by design — desynchronize it.
    pub fn sim_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    /// Source-side resync: serialize, stamp, broadcast, splice.
    fn transmit_snapshot(&mut self) -> AdvanceOutcome {
        let anchor = self.applied.unwrap_or(Tick(0));
        if let Some(resync) = &mut self.resync {
            resync.phase = ResyncPhase::Transmitting;
        }
        info!("transmitting resync snapshot at {anchor}");
        let state = self.sim.snapshot();
        let message = package_snapshot(anchor, state);
        self.transport.broadcast(&encode_message(&message));
        self.finish_resync(anchor);
        AdvanceOutcome::Resyncing(ResyncPhase::Resumed)
    }

    /// Receiver-side resync: verify, restore, splice.
    fn handle_snapshot(&mut self, origin: ParticipantId, tick: Tick, crc32: u32, state: &[u8]) {
        let Some(resync) = &self.resync else {
            warn!("unsolicited snapshot from {origin} ignored");
            return;
        };
        if resync.source == self.local {
            // We are the source; nothing to apply.
            return;
        }
        if origin != resync.source {
            warn!("snapshot from non-source {origin} ignored (source is {})", resync.source);
            return;
        }
        if resync.phase != ResyncPhase::AwaitingSource {
            return;
        }

        if let Some(resync) = &mut self.resync {
            resync.phase = ResyncPhase::Applying;
        }
        info!("applying resync snapshot at {tick} from {origin}");
        let outcome = verify_snapshot(crc32, state)
            .and_then(|()| self.sim.restore(state).map_err(ResyncError::from));
        match outcome {
            Ok(()) => self.finish_resync(tick),
            Err(err) => {
                if let Some(resync) = &mut self.resync {
                    resync.phase = ResyncPhase::Failed;
                }
                self.pending_failure = Some(err);
            }
        }
    }

    /// Splice the timeline back onto lock-step at the snapshot tick:
    /// re-anchor the exchange and lag windows, reset the auditor around the
    /// restored state, and re-broadcast retained local input re-sealed
    /// against it.
    fn finish_resync(&mut self, anchor: Tick) {
        self.exchange.re_anchor(anchor);
        self.lag.re_anchor(anchor);
        self.applied = Some(anchor);

        // Evaluation resumes after the anchor; records for the anchor tick
        // from before the splice are stale and must not be compared.
        self.auditor.reset(anchor.next());
        let record = self.auditor.record_local(anchor, self.sim.digest());
        let scalar = record.digest.fold();

        let mut retained = Vec::new();
        for command in self.lag.retained_commands() {
            command.seal(scalar);
            retained.push(*command);
        }
        for command in retained {
            self.exchange.begin_round(command.tick, command);
            let frame = PeerMessage::TurnFrame {
                participant: self.local,
                tick: command.tick,
                command: command.encode(),
                audit: Some(record),
            };
            self.transport.broadcast(&encode_message(&frame));
        }

        self.resync = None;
        self.status = SyncStatus::InSync;
        info!("resynchronized at {anchor}");
    }
}
