// Consistency auditor — continuous, cheap detection of silent divergence.
//
// After every applied tick the simulation produces a `StateDigest`; the
// session records it here and piggybacks it on the next outgoing turn
// frame, so checksums ride the existing exchange instead of costing a round
// trip. Remote records accumulate per tick; once every live reporter has
// weighed in on a tick, it is evaluated and a verdict produced.
//
// A single mismatching tick is tolerated — the fold is cheap enough that a
// transient accounting glitch is conceivable and a spurious resync is
// expensive. Only `divergence_debounce` *consecutive* mismatching ticks
// confirm real divergence. The threshold is configuration, not a constant:
// it trades false-positive resyncs against detection latency.
//
// The auditor also keeps a bounded rolling history of local digests, and
// logs which category (creatures / territory / players / rng) first
// disagreed — state divergence points at a missed or misapplied command,
// seed divergence at a draw-ordering bug upstream.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::warn;

use emberdeep_protocol::{ConsistencyRecord, ParticipantId, StateDigest, Tick};

/// Outcome of comparing one tick's digests across participants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsistencyVerdict {
    InSync,
    /// Gameplay state disagreed: a command was missed or misapplied.
    StateDiverged,
    /// Gameplay state agreed but the PRNG stream did not: usually an
    /// ordering bug upstream. Recovery path is identical.
    RandomSeedDiverged,
}

/// Snapshot of everyone's digest for the tick that confirmed divergence,
/// used to elect the resync source.
#[derive(Clone, Debug)]
pub struct DivergenceReport {
    pub tick: Tick,
    pub votes: BTreeMap<ParticipantId, StateDigest>,
}

pub struct ConsistencyAuditor {
    local_id: ParticipantId,
    /// Local digests, bounded rolling window in tick order.
    history: VecDeque<ConsistencyRecord>,
    history_ticks: usize,
    /// Remote records not yet evaluated: tick -> reporter -> digest.
    remote: BTreeMap<Tick, BTreeMap<ParticipantId, StateDigest>>,
    /// Next tick awaiting evaluation.
    next_eval: Tick,
    debounce: u32,
    consecutive_mismatches: u32,
    confirmed: Option<DivergenceReport>,
}

impl ConsistencyAuditor {
    pub fn new(local_id: ParticipantId, debounce: u32, history_ticks: usize) -> ConsistencyAuditor {
        ConsistencyAuditor {
            local_id,
            history: VecDeque::new(),
            history_ticks,
            remote: BTreeMap::new(),
            next_eval: Tick(0),
            debounce,
            consecutive_mismatches: 0,
            confirmed: None,
        }
    }

    /// Record the local digest for a freshly applied tick. Returns the
    /// record to piggyback on the next outgoing frame.
    pub fn record_local(&mut self, tick: Tick, digest: StateDigest) -> ConsistencyRecord {
        let record = ConsistencyRecord { tick, digest };
        self.history.push_back(record);
        while self.history.len() > self.history_ticks {
            self.history.pop_front();
        }
        record
    }

    /// The most recent local record, if any — attached to outgoing frames
    /// and the source of the integrity-token scalar.
    pub fn latest_record(&self) -> Option<ConsistencyRecord> {
        self.history.back().copied()
    }

    /// File a remote participant's record. First write per (tick, reporter)
    /// wins; records for already-evaluated ticks are ignored.
    pub fn ingest_remote(&mut self, from: ParticipantId, record: ConsistencyRecord) {
        if record.tick < self.next_eval {
            return;
        }
        self.remote
            .entry(record.tick)
            .or_default()
            .entry(from)
            .or_insert(record.digest);
    }

    /// Evaluate as many pending ticks as possible. A tick is ready once the
    /// local digest exists and every participant in `reporters` has filed a
    /// record for it. Returns the verdicts produced, oldest first.
    pub fn evaluate_ready(
        &mut self,
        reporters: &BTreeSet<ParticipantId>,
    ) -> Vec<(Tick, ConsistencyVerdict)> {
        let mut verdicts = Vec::new();
        loop {
            let tick = self.next_eval;
            let Some(local) = self.local_digest(tick) else {
                break;
            };
            let filed = self.remote.entry(tick).or_default();
            if !reporters.iter().all(|id| filed.contains_key(id)) {
                break;
            }
            let filed = self.remote.remove(&tick).unwrap_or_default();
            let verdict = self.compare(tick, &local, &filed, reporters);
            if verdict == ConsistencyVerdict::InSync {
                self.consecutive_mismatches = 0;
            } else {
                self.consecutive_mismatches += 1;
                if self.consecutive_mismatches >= self.debounce && self.confirmed.is_none() {
                    let mut votes = filed.clone();
                    votes.insert(self.local_id, local);
                    self.confirmed = Some(DivergenceReport { tick, votes });
                }
            }
            self.next_eval = tick.next();
            verdicts.push((tick, verdict));
        }
        verdicts
    }

    /// The confirmed divergence, once `divergence_debounce` consecutive
    /// mismatching ticks have been observed.
    pub fn divergence_confirmed(&self) -> Option<&DivergenceReport> {
        self.confirmed.as_ref()
    }

    /// Wipe all rolling state after a resync splice. `resume_from` is the
    /// first tick that will be evaluated; records for earlier ticks —
    /// including stale pre-splice records for the snapshot tick itself —
    /// are ignored from here on.
    pub fn reset(&mut self, resume_from: Tick) {
        self.history.clear();
        self.remote.clear();
        self.consecutive_mismatches = 0;
        self.confirmed = None;
        self.next_eval = resume_from;
    }

    /// Number of retained local history entries (diagnostics).
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn local_digest(&self, tick: Tick) -> Option<StateDigest> {
        self.history
            .iter()
            .find(|r| r.tick == tick)
            .map(|r| r.digest)
    }

    fn compare(
        &self,
        tick: Tick,
        local: &StateDigest,
        filed: &BTreeMap<ParticipantId, StateDigest>,
        reporters: &BTreeSet<ParticipantId>,
    ) -> ConsistencyVerdict {
        let mut verdict = ConsistencyVerdict::InSync;
        for id in reporters {
            let Some(remote) = filed.get(id) else {
                continue;
            };
            if !local.state_matches(remote) {
                warn!(
                    "digest mismatch vs {id} at {tick}: first differing category {}",
                    local.first_mismatch(remote).unwrap_or("none")
                );
                return ConsistencyVerdict::StateDiverged;
            }
            if !local.rng_matches(remote) {
                warn!(
                    "rng stream mismatch vs {id} at {tick}: first differing category {}",
                    local.first_mismatch(remote).unwrap_or("none")
                );
                verdict = ConsistencyVerdict::RandomSeedDiverged;
            }
        }
        verdict
    }
}
