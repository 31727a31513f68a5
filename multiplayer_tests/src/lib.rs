// Test harness for multiplayer integration tests.
//
// Wires real `LockstepSession`s over real `SimState`s and a shared
// `LoopbackHub` — the same code paths the game uses, minus the OS network.
// The only test-specific code here is the driver loop: in the game the
// commit/pump/advance cycle is paced by the render loop; in tests
// `step_all` runs one cycle synchronously for every participant.
//
// See also: `tests/lockstep_pipeline.rs` for the scenarios.

use emberdeep_lockstep::{
    AdvanceOutcome, InputSample, LockstepConfig, LockstepSession, LoopbackHub, LoopbackTransport,
    SessionError,
};
use emberdeep_protocol::ParticipantId;
use emberdeep_sim::{SimConfig, SimState};

/// A session over the real simulation and the loopback transport.
pub type TestSession = LockstepSession<SimState, LoopbackTransport>;

/// Bound on driver iterations in helpers that run "until" a condition;
/// hitting it means the pipeline wedged and the test should fail loudly.
pub const MAX_DRIVE_STEPS: usize = 200;

/// Build a hub and one session per participant, all sharing the same seed
/// and configs — the multiplayer invariant the tests exercise.
pub fn session_group(
    participants: u8,
    seed: u64,
    config: LockstepConfig,
) -> (LoopbackHub, Vec<TestSession>) {
    let hub = LoopbackHub::new();
    let ids: Vec<ParticipantId> = (0..participants).map(ParticipantId).collect();

    // Attach every endpoint before constructing any session, so each
    // session sees the complete roster at creation.
    let transports: Vec<LoopbackTransport> = ids.iter().map(|id| hub.attach(*id)).collect();

    let sessions = ids
        .iter()
        .zip(transports)
        .map(|(id, transport)| {
            let sim = SimState::new(seed, SimConfig::default(), &ids);
            LockstepSession::new(*id, sim, transport, config.clone())
        })
        .collect();
    (hub, sessions)
}

/// One driver cycle for every session: commit the given samples, pump,
/// advance once. Returns each session's advance outcome.
pub fn step_all(
    sessions: &mut [TestSession],
    samples: &[InputSample],
) -> Vec<Result<AdvanceOutcome, SessionError>> {
    for (session, sample) in sessions.iter_mut().zip(samples) {
        session
            .commit_local_input(*sample)
            .expect("driver commits exactly once per tick");
    }
    for session in sessions.iter_mut() {
        session.pump();
    }
    sessions.iter_mut().map(|s| s.try_advance()).collect()
}

/// Drive everyone with idle input for `steps` cycles.
pub fn idle_steps(sessions: &mut [TestSession], steps: usize) {
    let samples = vec![InputSample::idle(); sessions.len()];
    for _ in 0..steps {
        step_all(sessions, &samples);
    }
}

/// Drive everyone with idle input until the predicate holds, panicking
/// after `MAX_DRIVE_STEPS` cycles.
pub fn drive_until(sessions: &mut [TestSession], mut done: impl FnMut(&[TestSession]) -> bool) {
    let samples = vec![InputSample::idle(); sessions.len()];
    for _ in 0..MAX_DRIVE_STEPS {
        if done(sessions) {
            return;
        }
        step_all(sessions, &samples);
    }
    panic!("condition not reached within {MAX_DRIVE_STEPS} driver steps");
}

/// Assert that every session has applied the same tick and every simulation
/// reports the same digest.
pub fn assert_converged(sessions: &[TestSession]) {
    let reference_tick = sessions[0].applied_tick();
    let reference_digest = sessions[0].sim().fold_digest();
    for session in &sessions[1..] {
        assert_eq!(
            session.applied_tick(),
            reference_tick,
            "participants applied different ticks"
        );
        assert_eq!(
            session.sim().fold_digest(),
            reference_digest,
            "participants diverged"
        );
    }
}
