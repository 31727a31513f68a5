// Tunable parameters of the synchronization engine.
//
// Every policy knob lives here rather than as a buried constant, because
// each one trades responsiveness against robustness and the right values
// depend on the deployment (LAN vs. internet, 2 vs. 8 participants). All
// participants in a session must run identical values — `lag_depth` in
// particular changes which tick a command applies on, so a mismatch is an
// instant desync.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a lock-step session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockstepConfig {
    /// Number of ticks a locally-committed command is held before it is
    /// eligible for application. Chosen to exceed the expected round-trip
    /// latency in ticks; larger values feel laggier but stall less.
    pub lag_depth: u64,

    /// How long the exchange coordinator waits on a missing participant
    /// before resolving substitutable slots. After expiry a disconnected or
    /// operator-substituted participant gets the canonical empty command; a
    /// connected human participant stalls the session instead — consistency
    /// over latency.
    pub wait_for_missing: Duration,

    /// Consecutive mismatching ticks required before divergence is treated
    /// as real and resynchronization starts. A single-tick mismatch is
    /// tolerated as a possible transient in the audit fold.
    pub divergence_debounce: u32,

    /// How many ticks of local digest history the auditor retains for
    /// post-mortem triage.
    pub history_ticks: usize,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            lag_depth: 2,
            wait_for_missing: Duration::from_millis(500),
            divergence_debounce: 2,
            history_ticks: 40,
        }
    }
}
