use std::sync::{Arc, Weak};

use groundcover_common::PeerId;
use groundcover_kernel::{Dataset, TypeCatalog};
use groundcover_persist::{CborCodec, Codec};
use groundcover_render::BatchBackend;
use groundcover_stream::{Observer, RefreshReport};
use groundcover_transfer::{
    PayloadKind, ReceiveSession, TickOutcome, TransferFailure, TransferId, TransferMessage,
};

use crate::{
    GroundcoverConfig, LoadPhase, LoadTracker, ReadyGate, SessionError, Transport, WireMessage,
    WorldSession, host::send_all,
};

/// Result of driving the client forward by one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPoll {
    /// Still receiving; these requests should go to the host.
    Pending(Vec<WireMessage>),
    /// The world was built and the ready gate opened.
    Ready,
    TimedOut,
    Failed(TransferFailure),
    /// Nothing left to drive.
    Idle,
}

/// A remote observer's peer: fetches the world from the host and mirrors
/// destruction and resync broadcasts.
pub struct ClientRole<B> {
    host: PeerId,
    config: GroundcoverConfig,
    template: Dataset,
    catalog: TypeCatalog,
    gate: ReadyGate,
    codec: CborCodec,
    tracker: Option<LoadTracker>,
    receive: Option<ReceiveSession>,
    backend: Option<B>,
    world: Option<WorldSession<B>>,
    pending: Vec<WireMessage>,
    observers: Vec<Weak<dyn Observer>>,
}

impl<B: BatchBackend> ClientRole<B> {
    pub fn new(
        host: PeerId,
        config: GroundcoverConfig,
        template: Dataset,
        catalog: TypeCatalog,
        backend: B,
        gate: ReadyGate,
    ) -> Self {
        Self {
            host,
            config,
            template,
            catalog,
            gate,
            codec: CborCodec::default(),
            tracker: Some(LoadTracker::new()),
            receive: None,
            backend: Some(backend),
            world: None,
            pending: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn host(&self) -> PeerId {
        self.host
    }

    pub fn phase(&self) -> LoadPhase {
        match (&self.world, &self.tracker) {
            (Some(world), _) => world.phase(),
            (None, Some(tracker)) => tracker.phase(),
            (None, None) => LoadPhase::Unloaded,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.world.is_some()
    }

    pub fn world(&self) -> Option<&WorldSession<B>> {
        self.world.as_ref()
    }

    pub fn world_mut(&mut self) -> Option<&mut WorldSession<B>> {
        self.world.as_mut()
    }

    /// Broadcasts received before the world was ready.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Observers registered before the world exists are attached when it is built.
    pub fn register_observer<O: Observer + 'static>(&mut self, observer: &Arc<O>) {
        match self.world.as_mut() {
            Some(world) => world.register_observer(observer),
            None => {
                let weak: Weak<O> = Arc::downgrade(observer);
                self.observers.push(weak);
            }
        }
    }

    /// Open a transfer and return the request for the host.
    pub fn start(&mut self, kind: PayloadKind) -> Result<WireMessage, SessionError> {
        let tracker = self
            .tracker
            .as_mut()
            .ok_or(SessionError::IllegalTransition {
                from: LoadPhase::Ready,
                to: LoadPhase::AwaitingNetwork,
            })?;
        tracker.advance(LoadPhase::AwaitingNetwork)?;
        let session = ReceiveSession::new(TransferId::new(), kind, &self.config.transfer);
        let request = WireMessage::Transfer(session.request());
        tracing::info!(host = %self.host, transfer = %session.transfer(), ?kind, "requesting world");
        self.receive = Some(session);
        Ok(request)
    }

    /// Hand the receive session to an async driver.
    pub fn take_receive_session(&mut self) -> Option<ReceiveSession> {
        self.receive.take()
    }

    pub fn handle(&mut self, message: WireMessage) -> Result<(), SessionError> {
        match message {
            WireMessage::Transfer(segment @ TransferMessage::Segment { .. }) => {
                match self.receive.as_mut() {
                    Some(session) => {
                        session.on_segment(&segment);
                    }
                    None => tracing::debug!("segment with no transfer in progress"),
                }
                Ok(())
            }
            WireMessage::Destroyed { .. } | WireMessage::Resync { .. } => match self.world.as_mut() {
                Some(world) => apply_broadcast(world, &message),
                None => {
                    tracing::debug!(message = message.name(), "world not ready, queueing");
                    self.pending.push(message);
                    Ok(())
                }
            },
            other => {
                tracing::warn!(message = other.name(), "unexpected message at client");
                Ok(())
            }
        }
    }

    /// One receive tick.
    pub fn poll(&mut self) -> Result<ClientPoll, SessionError> {
        let Some(session) = self.receive.as_mut() else {
            return Ok(ClientPoll::Idle);
        };
        match session.tick() {
            TickOutcome::Pending(action) => Ok(ClientPoll::Pending(
                action.into_messages().into_iter().map(WireMessage::Transfer).collect(),
            )),
            outcome => {
                let kind = session.kind();
                self.receive = None;
                self.finish(kind, outcome)
            }
        }
    }

    /// Consume a terminal transfer outcome. A timeout or failure leaves the
    /// client unloaded so [`Self::start`] can be called again.
    pub fn finish(&mut self, kind: PayloadKind, outcome: TickOutcome) -> Result<ClientPoll, SessionError> {
        match outcome {
            TickOutcome::Completed(payload) => match self.decode_payload(kind, &payload) {
                Ok(dataset) => {
                    self.build_world(dataset)?;
                    Ok(ClientPoll::Ready)
                }
                Err(reason) => {
                    tracing::error!(?kind, error = %reason, "completed transfer did not decode");
                    self.reset();
                    Ok(ClientPoll::Failed(TransferFailure::Decode(reason)))
                }
            },
            TickOutcome::TimedOut => {
                self.reset();
                Ok(ClientPoll::TimedOut)
            }
            TickOutcome::Failed(failure) => {
                self.reset();
                Ok(ClientPoll::Failed(failure))
            }
            TickOutcome::Pending(_) | TickOutcome::Closed => Ok(ClientPoll::Idle),
        }
    }

    fn reset(&mut self) {
        self.receive = None;
        if self.world.is_none() {
            self.tracker = Some(LoadTracker::new());
        }
    }

    fn decode_payload(&self, kind: PayloadKind, payload: &[u8]) -> Result<Dataset, String> {
        let dataset = match kind {
            PayloadKind::Full => self.codec.decode_dataset(payload).map_err(|e| e.to_string())?,
            PayloadKind::Diff => {
                let diff = self.codec.decode_diff(payload).map_err(|e| e.to_string())?;
                self.template.clone().apply_diff(&diff).map_err(|e| e.to_string())?
            }
        };
        dataset.validate().map_err(|e| e.to_string())?;
        Ok(dataset)
    }

    fn build_world(&mut self, dataset: Dataset) -> Result<(), SessionError> {
        let mut tracker = self.tracker.take().unwrap_or_default();
        tracker.advance(LoadPhase::VersionCheck)?;
        if dataset.version < self.config.dataset_version {
            tracing::warn!(
                received = dataset.version,
                expected = self.config.dataset_version,
                "host dataset is older than this client expects"
            );
        }
        let backend = self.backend.take().ok_or(SessionError::NoTransfer)?;
        let mut world = WorldSession::assemble(tracker, dataset, &self.catalog, &self.config, backend, None)?;
        for observer in self.observers.drain(..) {
            world.register_weak_observer(observer);
        }
        for message in std::mem::take(&mut self.pending) {
            if let Err(e) = apply_broadcast(&mut world, &message) {
                tracing::warn!(message = message.name(), error = %e, "queued broadcast could not be applied");
            }
        }
        self.world = Some(world);
        self.gate.open();
        Ok(())
    }

    pub fn refresh(&mut self) -> Result<RefreshReport, SessionError> {
        match self.world.as_mut() {
            Some(world) => world.refresh(),
            None => Err(SessionError::NotReady(self.phase())),
        }
    }

    /// Drain the transport into [`Self::handle`]. Bad datagrams and broadcasts
    /// that fail to apply are logged and skipped.
    pub fn pump<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<usize, SessionError> {
        let mut handled = 0;
        while let Some((from, bytes)) = transport.try_recv() {
            if from != self.host {
                tracing::warn!(%from, "datagram from unknown peer dropped");
                continue;
            }
            let message = match WireMessage::decode(&bytes) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable datagram dropped");
                    continue;
                }
            };
            let name = message.name();
            if let Err(e) = self.handle(message) {
                tracing::warn!(message = name, error = %e, "client failed to handle message");
            }
            handled += 1;
        }
        Ok(handled)
    }

    /// Poll once and send any resulting requests to the host.
    pub fn poll_and_send<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<ClientPoll, SessionError> {
        let poll = self.poll()?;
        if let ClientPoll::Pending(requests) = &poll {
            let outgoing = requests.iter().map(|m| (self.host, m.clone())).collect();
            send_all(transport, outgoing)?;
        }
        Ok(poll)
    }
}

fn apply_broadcast<B: BatchBackend>(world: &mut WorldSession<B>, message: &WireMessage) -> Result<(), SessionError> {
    match message {
        WireMessage::Destroyed { id } => world.mark_destroyed(*id),
        WireMessage::Resync { ids } => world.resync(ids).map(|_| ()),
        _ => Ok(()),
    }
}
