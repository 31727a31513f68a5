// Input-lag buffer — decouples "when the local participant decided" from
// "when the decision is safe to apply".
//
// The local command for tick T is committed immediately (and broadcast by
// the session at commit time) but only becomes eligible for application
// once the commit frontier has moved `lag_depth` ticks past it. That slack
// is what gives every other participant time to receive the command before
// anyone must apply it, which is the whole trick behind a responsive-feeling
// lock-step game.
//
// The buffer is a plain ring of consecutive-tick commands with explicit
// window bounds — no free lists, no sentinel slots. Duplicate and
// out-of-order commits are contract violations reported as errors, never
// silently overwritten: an overwrite here would corrupt determinism for the
// whole session.

use std::collections::VecDeque;

use emberdeep_protocol::{Tick, TurnCommand};

use crate::error::CommitError;

/// Read-only view of the sliding commit/application window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingExchangeWindow {
    /// Oldest tick whose exchange round has not yet been applied.
    pub oldest_unconfirmed: Tick,
    /// Most recent tick with a committed local command, if any.
    pub newest_committed: Option<Tick>,
    /// Ticks a local command is held before becoming eligible.
    pub lag_depth: u64,
}

/// Ring buffer of the local participant's committed commands.
pub struct InputLagBuffer {
    /// Committed commands at strictly consecutive ticks; front is oldest.
    entries: VecDeque<TurnCommand>,
    window: PendingExchangeWindow,
}

impl InputLagBuffer {
    pub fn new(start: Tick, lag_depth: u64) -> InputLagBuffer {
        InputLagBuffer {
            entries: VecDeque::new(),
            window: PendingExchangeWindow {
                oldest_unconfirmed: start,
                newest_committed: None,
                lag_depth,
            },
        }
    }

    /// The tick the next `commit_local` must target.
    pub fn next_commit(&self) -> Tick {
        match self.window.newest_committed {
            Some(newest) => newest.next(),
            None => self.window.oldest_unconfirmed,
        }
    }

    /// Store the local command at its logical tick. Ticks must arrive in
    /// strictly ascending order with no gaps.
    pub fn commit_local(&mut self, command: TurnCommand) -> Result<(), CommitError> {
        let expected = self.next_commit();
        if command.tick < expected {
            return Err(CommitError::DuplicateTick(command.tick));
        }
        if command.tick > expected {
            return Err(CommitError::OutOfOrder {
                expected,
                attempted: command.tick,
            });
        }
        self.entries.push_back(command);
        self.window.newest_committed = Some(command.tick);
        Ok(())
    }

    /// Newest tick currently eligible for application, if any: the commit
    /// frontier minus the lag depth.
    pub fn eligible_bound(&self) -> Option<Tick> {
        let newest = self.window.newest_committed?;
        newest.0.checked_sub(self.window.lag_depth).map(Tick)
    }

    /// The local command for `tick`, provided the tick is at or before the
    /// eligible bound and still retained. `None` while the tick is inside
    /// the lag window — the command exists but is not yet safe to apply.
    pub fn fetch_for_application(&self, tick: Tick) -> Option<&TurnCommand> {
        let bound = self.eligible_bound()?;
        if tick > bound {
            return None;
        }
        self.retained(tick)
    }

    /// Drop entries older than the new window floor. Called once a tick's
    /// exchange round has been fully applied.
    pub fn advance(&mut self, new_oldest: Tick) {
        while self
            .entries
            .front()
            .is_some_and(|cmd| cmd.tick < new_oldest)
        {
            self.entries.pop_front();
        }
        if new_oldest > self.window.oldest_unconfirmed {
            self.window.oldest_unconfirmed = new_oldest;
        }
    }

    /// Splice the window onto a resync snapshot taken at `tick`: everything
    /// at or before it is already reflected in the snapshot and is dropped;
    /// later commits are retained for re-broadcast. If the snapshot is ahead
    /// of the local commit frontier, the frontier jumps to it so the next
    /// commit lands on `tick + 1`.
    pub fn re_anchor(&mut self, tick: Tick) {
        self.advance(tick.next());
        if self.window.newest_committed.is_none_or(|newest| newest < tick) {
            self.window.newest_committed = Some(tick);
        }
    }

    /// Retained commands in ascending tick order. After `re_anchor` these
    /// are exactly the commands that must be re-broadcast: committed input
    /// is deferred by recovery, never dropped.
    pub fn retained_commands(&mut self) -> impl Iterator<Item = &mut TurnCommand> {
        self.entries.iter_mut()
    }

    /// Read-only view of the window bounds.
    pub fn window(&self) -> &PendingExchangeWindow {
        &self.window
    }

    fn retained(&self, tick: Tick) -> Option<&TurnCommand> {
        let front = self.entries.front()?.tick;
        let index = tick.0.checked_sub(front.0)?;
        self.entries.get(usize::try_from(index).ok()?)
    }
}
