// emberdeep_lockstep — deterministic lock-step synchronization engine.
//
// This crate keeps N participants' simulations bit-identical: it collects
// one turn command per participant per logical tick, exchanges them over an
// abstract transport, applies them in identical participant order on every
// machine, detects divergence via rolling state digests, and recovers by
// transferring an authoritative snapshot. It knows nothing about gameplay —
// the simulation sits behind the `Simulation` trait, the network behind
// `Transport`.
//
// Module overview:
// - `session.rs`:    `LockstepSession` — the per-process driver: commit,
//                    pump, advance. Start here.
// - `lag_buffer.rs`: `InputLagBuffer` — holds local commands for
//                    `lag_depth` ticks so remote commands have time to
//                    arrive before anyone must apply.
// - `exchange.rs`:   `ExchangeCoordinator` — per-tick round collection,
//                    out-of-order staging, the wait/substitute/stall policy.
// - `auditor.rs`:    `ConsistencyAuditor` — piggybacked digest comparison,
//                    debounced divergence confirmation, triage history.
// - `resync.rs`:     `ResyncSession` — source election, CRC-stamped
//                    snapshot transfer, timeline splicing.
// - `pause.rs`:      `PauseCoordinator` — lock-step pause/resume intents,
//                    including scheduled resume.
// - `simulation.rs`: The `Simulation` boundary trait.
// - `transport.rs`:  The `Transport` boundary trait + in-memory loopback.
// - `config.rs`:     `LockstepConfig` — every policy knob.
// - `status.rs`:     `SyncStatus` — the observable state stream.
// - `error.rs`:      `CommitError` / `IngestError` / `ResyncError` /
//                    `SessionError`.
//
// **Critical constraint: determinism.** The engine processes ticks strictly
// sequentially on one thread. Within a tick, commands apply in ascending
// participant id; across ticks, strictly monotonic order. Everything that
// feeds `Simulation::apply` is identical on every machine, by construction.

pub mod auditor;
pub mod config;
pub mod error;
pub mod exchange;
pub mod lag_buffer;
pub mod pause;
pub mod resync;
pub mod session;
pub mod simulation;
pub mod status;
pub mod transport;

pub use auditor::{ConsistencyAuditor, ConsistencyVerdict, DivergenceReport};
pub use config::LockstepConfig;
pub use error::{CommitError, IngestError, ResyncError, SessionError, SnapshotError};
pub use exchange::{ExchangeCoordinator, ExchangeRound, SlotStatus};
pub use lag_buffer::{InputLagBuffer, PendingExchangeWindow};
pub use pause::{PauseCoordinator, PauseIntent};
pub use resync::{ResyncPhase, ResyncSession, elect_source};
pub use session::{AdvanceOutcome, InputSample, LockstepSession};
pub use simulation::Simulation;
pub use status::SyncStatus;
pub use transport::{LoopbackHub, LoopbackTransport, Transport};
