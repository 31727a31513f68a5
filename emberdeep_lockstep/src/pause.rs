// Pause/unpause coordination — lock-step, like everything else.
//
// A locally-toggled pause would freeze participants on different ticks and,
// worse, skew *when* buffered commands apply. So pause and resume are
// ordinary commands: an intent queued here overrides the sampled action at
// its target commit tick, flows through the input-lag buffer and exchange
// like any other input, and flips the simulation's pause flag on the same
// tick everywhere.
//
// Delayed resume ("unpause after a grace period") is just an intent queued
// a few ticks ahead — no timer thread, nothing outside the deterministic
// pipeline.

use std::collections::BTreeMap;

use emberdeep_protocol::{Tick, TurnAction};

/// A queued pause-state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PauseIntent {
    pub pause: bool,
    /// While paused, whether gameplay commands still dispatch (the
    /// "influence the world while frozen" mode).
    pub world_influence: bool,
}

impl PauseIntent {
    /// The command action carrying this intent through the pipeline.
    pub fn as_action(self) -> TurnAction {
        TurnAction::SetPause {
            pause: self.pause,
            world_influence: self.world_influence,
        }
    }
}

/// Queue of pause-state changes keyed by target commit tick.
#[derive(Debug, Default)]
pub struct PauseCoordinator {
    scheduled: BTreeMap<Tick, PauseIntent>,
}

impl PauseCoordinator {
    pub fn new() -> PauseCoordinator {
        PauseCoordinator::default()
    }

    /// Queue an intent for the given commit tick. A later request for the
    /// same tick replaces the earlier one — last decision wins.
    pub fn request(&mut self, at: Tick, intent: PauseIntent) {
        self.scheduled.insert(at, intent);
    }

    /// Intent due at (or overdue by) the given commit tick, if any. Overdue
    /// intents fire late rather than never; among several due, the latest
    /// wins and the rest are dropped.
    pub fn take_due(&mut self, tick: Tick) -> Option<PauseIntent> {
        let mut due = None;
        while let Some(entry) = self.scheduled.first_entry() {
            if *entry.key() > tick {
                break;
            }
            due = Some(entry.remove());
        }
        due
    }

    /// Number of queued intents (diagnostics).
    pub fn pending(&self) -> usize {
        self.scheduled.len()
    }
}
