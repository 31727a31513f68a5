// The transport boundary, plus an in-memory loopback implementation.
//
// The engine assumes a reliable, order-preserving-per-sender, at-least-once
// delivery service to a fixed, addressable set of participants. Whatever
// concurrency a real transport uses internally, it must present this
// synchronous, non-blocking poll surface — the engine is single-threaded
// and no transport callback ever mutates simulation state.
//
// `LoopbackHub` is the provided implementation: deterministic in-memory
// mailboxes for integration tests and single-machine sessions. Its hold and
// disconnect controls let tests script packet delay and participant
// departure without touching real sockets. Real network transports are
// external collaborators and live outside this repository.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use emberdeep_protocol::ParticipantId;

/// Best-effort delivery of opaque byte buffers between session participants.
///
/// Delivery failures are the transport's problem (retry, reconnect); at this
/// boundary only "never arrived" is observable, and the exchange coordinator
/// handles that via its substitution/stall policy.
pub trait Transport {
    /// Queue a payload to every other connected participant.
    fn broadcast(&mut self, payload: &[u8]);

    /// Queue a payload to one participant.
    fn send_to(&mut self, dest: ParticipantId, payload: &[u8]);

    /// Non-blocking poll: the next pending (sender, payload) pair, if any.
    fn try_receive(&mut self) -> Option<(ParticipantId, Vec<u8>)>;

    /// The currently connected participant set, local participant included.
    /// Membership changes are observed by polling this between pumps.
    fn roster(&self) -> BTreeSet<ParticipantId>;
}

struct HubState {
    connected: BTreeSet<ParticipantId>,
    mailboxes: BTreeMap<ParticipantId, VecDeque<(ParticipantId, Vec<u8>)>>,
    /// Destinations whose inbound delivery is suspended; pending payloads
    /// accumulate here until the link is released.
    held: BTreeMap<ParticipantId, VecDeque<(ParticipantId, Vec<u8>)>>,
}

impl HubState {
    fn deliver(&mut self, from: ParticipantId, dest: ParticipantId, payload: &[u8]) {
        if !self.connected.contains(&dest) {
            return;
        }
        if let Some(queue) = self.held.get_mut(&dest) {
            queue.push_back((from, payload.to_vec()));
        } else if let Some(mailbox) = self.mailboxes.get_mut(&dest) {
            mailbox.push_back((from, payload.to_vec()));
        }
    }
}

/// Shared in-memory message hub. Create one per test session and `attach`
/// each participant to get its `LoopbackTransport` endpoint.
#[derive(Clone)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> LoopbackHub {
        LoopbackHub {
            state: Arc::new(Mutex::new(HubState {
                connected: BTreeSet::new(),
                mailboxes: BTreeMap::new(),
                held: BTreeMap::new(),
            })),
        }
    }

    /// Register a participant and return its transport endpoint.
    pub fn attach(&self, id: ParticipantId) -> LoopbackTransport {
        let mut state = self.state.lock().unwrap();
        state.connected.insert(id);
        state.mailboxes.entry(id).or_default();
        LoopbackTransport {
            id,
            state: Arc::clone(&self.state),
        }
    }

    /// Remove a participant from the roster. Its pending mail is dropped;
    /// subsequent sends to it are discarded.
    pub fn disconnect(&self, id: ParticipantId) {
        let mut state = self.state.lock().unwrap();
        state.connected.remove(&id);
        state.mailboxes.remove(&id);
        state.held.remove(&id);
    }

    /// Suspend or release inbound delivery to one participant. While held,
    /// payloads queue up in order and are flushed on release — simulating a
    /// slow link rather than a lossy one.
    pub fn hold_delivery(&self, id: ParticipantId, held: bool) {
        let mut state = self.state.lock().unwrap();
        if held {
            state.held.entry(id).or_default();
        } else if let Some(mut queue) = state.held.remove(&id)
            && let Some(mailbox) = state.mailboxes.get_mut(&id)
        {
            mailbox.append(&mut queue);
        }
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        LoopbackHub::new()
    }
}

/// One participant's endpoint on a `LoopbackHub`.
pub struct LoopbackTransport {
    id: ParticipantId,
    state: Arc<Mutex<HubState>>,
}

impl Transport for LoopbackTransport {
    fn broadcast(&mut self, payload: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let peers: Vec<ParticipantId> = state
            .connected
            .iter()
            .copied()
            .filter(|id| *id != self.id)
            .collect();
        for dest in peers {
            state.deliver(self.id, dest, payload);
        }
    }

    fn send_to(&mut self, dest: ParticipantId, payload: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.deliver(self.id, dest, payload);
    }

    fn try_receive(&mut self) -> Option<(ParticipantId, Vec<u8>)> {
        let mut state = self.state.lock().unwrap();
        state.mailboxes.get_mut(&self.id)?.pop_front()
    }

    fn roster(&self) -> BTreeSet<ParticipantId> {
        self.state.lock().unwrap().connected.clone()
    }
}
