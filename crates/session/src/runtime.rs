use std::sync::Arc;
use std::time::Duration;

use groundcover_render::BatchBackend;
use groundcover_stream::RefreshReport;
use groundcover_transfer::{OutboundTransfer, ReceiveSession, TickOutcome, TransferMessage};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::{ClientRole, HostRole, SessionError, WorldSession};

/// Opens once, when a peer's world reaches `Ready`. Clones share the gate.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("ready gate opened");
        }
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves when the gate opens.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Something with a periodic streaming pass.
pub trait Refreshable: Send {
    fn refresh(&mut self) -> Result<RefreshReport, SessionError>;
}

/// Something that can write its world to a save slot.
pub trait Persistable: Send {
    fn persist(&mut self) -> bool;
}

impl<B: BatchBackend + Send> Refreshable for WorldSession<B> {
    fn refresh(&mut self) -> Result<RefreshReport, SessionError> {
        WorldSession::refresh(self)
    }
}

impl<B: BatchBackend + Send> Persistable for WorldSession<B> {
    fn persist(&mut self) -> bool {
        WorldSession::persist(self)
    }
}

impl<B: BatchBackend + Send> Refreshable for HostRole<B> {
    fn refresh(&mut self) -> Result<RefreshReport, SessionError> {
        self.world_mut().refresh()
    }
}

impl<B: BatchBackend + Send> Persistable for HostRole<B> {
    fn persist(&mut self) -> bool {
        self.world_mut().persist()
    }
}

impl<B: BatchBackend + Send> Refreshable for ClientRole<B> {
    fn refresh(&mut self) -> Result<RefreshReport, SessionError> {
        ClientRole::refresh(self)
    }
}

/// Run a receive session to its terminal outcome.
///
/// Sends the initial snapshot request, then feeds inbound segments and ticks
/// the session every `poll`. Resync requests go out on `requests`. The
/// outcome is delivered on `done` as soon as the payload completes, the
/// session times out or reassembly fails.
pub async fn drive_receive(
    mut session: ReceiveSession,
    mut inbound: mpsc::Receiver<TransferMessage>,
    requests: mpsc::Sender<TransferMessage>,
    poll: Duration,
    done: oneshot::Sender<TickOutcome>,
) {
    let transfer = session.transfer();
    if requests.send(session.request()).await.is_err() {
        tracing::warn!(%transfer, "request channel closed before the transfer started");
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut inbound_open = true;

    let outcome = loop {
        tokio::select! {
            message = inbound.recv(), if inbound_open => match message {
                Some(message) => {
                    let ack = session.on_segment(&message);
                    tracing::trace!(%transfer, ?ack, "segment");
                    if session.is_complete() {
                        break session.tick();
                    }
                }
                None => {
                    tracing::debug!(%transfer, "inbound channel closed, ticking until timeout");
                    inbound_open = false;
                }
            },
            _ = ticker.tick() => match session.tick() {
                TickOutcome::Pending(action) => {
                    for message in action.into_messages() {
                        if requests.send(message).await.is_err() {
                            tracing::warn!(%transfer, "request channel closed");
                            break;
                        }
                    }
                }
                outcome => break outcome,
            },
        }
    };

    if done.send(outcome).is_err() {
        tracing::debug!(%transfer, "transfer outcome dropped, nobody waiting");
    }
}

/// Push every remaining segment, waiting `delay` between sends. Returns how
/// many went out before the channel closed.
pub async fn push_segments(
    outbound: &mut OutboundTransfer,
    segments: &mpsc::Sender<TransferMessage>,
    delay: Duration,
) -> usize {
    let mut sent = 0;
    while let Some(message) = outbound.next_push() {
        if sent > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if segments.send(message).await.is_err() {
            tracing::warn!(transfer = %outbound.id(), sent, "segment channel closed mid-push");
            break;
        }
        sent += 1;
    }
    sent
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Wait for `gate`, then refresh `target` every `interval` until `shutdown`
/// flips to true. Returns the number of refreshes that ran.
pub async fn run_refresh_loop<T: Refreshable>(
    target: Arc<Mutex<T>>,
    gate: ReadyGate,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    tokio::select! {
        _ = gate.wait() => {}
        _ = stopped(&mut shutdown) => return 0,
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut passes = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = target.lock().await.refresh();
                match result {
                    Ok(report) if !report.loaded.is_empty() || !report.unloaded.is_empty() => {
                        tracing::debug!(loaded = report.loaded.len(), unloaded = report.unloaded.len(), "refresh");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "refresh failed"),
                }
                passes += 1;
            }
            _ = stopped(&mut shutdown) => break,
        }
    }
    passes
}

/// Persist `target` every `interval` until shutdown, then once more.
pub async fn run_autosave<T: Persistable>(
    target: Arc<Mutex<T>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut saves = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if target.lock().await.persist() {
                    saves += 1;
                }
            }
            _ = stopped(&mut shutdown) => break,
        }
    }
    if target.lock().await.persist() {
        saves += 1;
    }
    tracing::info!(saves, "autosave stopped");
    saves
}
