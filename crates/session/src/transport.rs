use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use groundcover_common::PeerId;

use crate::SessionError;

/// Unreliable, unordered datagram delivery between peers.
pub trait Transport: Send {
    fn local_peer(&self) -> PeerId;

    /// Fire and forget; loss is not reported.
    fn send_to(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), SessionError>;

    /// Next inbound datagram, if any.
    fn try_recv(&self) -> Option<(PeerId, Vec<u8>)>;
}

/// Deterministic message loss for the loopback network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LossPolicy {
    #[default]
    None,
    /// Drop every n-th message sent on the network.
    DropEveryNth(u64),
    /// Drop roughly `per_mille` of messages, driven by a fixed seed.
    Seeded { seed: u64, per_mille: u16 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub sent: u64,
    pub dropped: u64,
    pub delivered: u64,
}

#[derive(Debug, Default)]
struct NetworkState {
    inboxes: BTreeMap<PeerId, VecDeque<(PeerId, Vec<u8>)>>,
    loss: LossPolicy,
    rng: u64,
    stats: NetworkStats,
}

impl NetworkState {
    fn should_drop(&mut self) -> bool {
        match self.loss {
            LossPolicy::None => false,
            LossPolicy::DropEveryNth(n) => n > 0 && self.stats.sent % n == 0,
            LossPolicy::Seeded { per_mille, .. } => {
                (splitmix64(&mut self.rng) % 1000) < u64::from(per_mille)
            }
        }
    }
}

/// In-memory network shared by any number of endpoints.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loss(loss: LossPolicy) -> Self {
        let net = Self::new();
        net.set_loss(loss);
        net
    }

    pub fn set_loss(&self, loss: LossPolicy) {
        let mut state = self.lock();
        state.loss = loss;
        if let LossPolicy::Seeded { seed, .. } = loss {
            state.rng = seed;
        }
    }

    /// Register a new peer and return its endpoint.
    pub fn endpoint(&self) -> LoopbackEndpoint {
        let peer = PeerId::new();
        self.lock().inboxes.entry(peer).or_default();
        LoopbackEndpoint {
            peer,
            network: self.clone(),
        }
    }

    pub fn stats(&self) -> NetworkStats {
        self.lock().stats
    }

    /// Messages waiting in all inboxes.
    pub fn in_flight(&self) -> usize {
        self.lock().inboxes.values().map(VecDeque::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// One peer's view of a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackEndpoint {
    peer: PeerId,
    network: LoopbackNetwork,
}

impl Transport for LoopbackEndpoint {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn send_to(&self, peer: PeerId, bytes: Vec<u8>) -> Result<(), SessionError> {
        let mut state = self.network.lock();
        if !state.inboxes.contains_key(&peer) {
            return Err(SessionError::Transport(format!("unknown peer {peer}")));
        }
        state.stats.sent += 1;
        if state.should_drop() {
            state.stats.dropped += 1;
            tracing::trace!(from = %self.peer, to = %peer, "loopback dropped message");
            return Ok(());
        }
        state.stats.delivered += 1;
        if let Some(inbox) = state.inboxes.get_mut(&peer) {
            inbox.push_back((self.peer, bytes));
        }
        Ok(())
    }

    fn try_recv(&self) -> Option<(PeerId, Vec<u8>)> {
        self.network
            .lock()
            .inboxes
            .get_mut(&self.peer)
            .and_then(VecDeque::pop_front)
    }
}

/// SplitMix64 step.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
