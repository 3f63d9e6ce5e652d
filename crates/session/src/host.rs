use std::collections::{BTreeSet, HashMap};

use groundcover_common::{EntityId, PeerId};
use groundcover_kernel::Dataset;
use groundcover_render::BatchBackend;
use groundcover_transfer::{
    OutboundTransfer, PayloadKind, TransferConfig, TransferError, TransferId, TransferMessage,
};

use crate::{SessionError, Transport, WireMessage, WorldSession};

/// Messages a role wants sent, with their destination.
pub type Outgoing = Vec<(PeerId, WireMessage)>;

/// A serialized snapshot kept for re-requests until its receiver has
/// necessarily given up.
struct ServedTransfer {
    peer: PeerId,
    outbound: OutboundTransfer,
    last_request: u64,
}

/// The authoritative peer: serves snapshots and applies damage.
///
/// Served transfers are dropped once `timeout_ticks` host pumps pass without a
/// request for them, or when their peer is removed.
pub struct HostRole<B> {
    world: WorldSession<B>,
    template: Dataset,
    transfer: TransferConfig,
    outbound: HashMap<TransferId, ServedTransfer>,
    clients: BTreeSet<PeerId>,
    ticks: u64,
}

impl<B: BatchBackend> HostRole<B> {
    /// `template` must be the dataset clients hold locally; diffs are taken against it.
    pub fn new(world: WorldSession<B>, template: Dataset, transfer: TransferConfig) -> Self {
        Self {
            world,
            template,
            transfer,
            outbound: HashMap::new(),
            clients: BTreeSet::new(),
            ticks: 0,
        }
    }

    pub fn world(&self) -> &WorldSession<B> {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut WorldSession<B> {
        &mut self.world
    }

    pub fn clients(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.clients.iter().copied()
    }

    pub fn add_client(&mut self, peer: PeerId) {
        if self.clients.insert(peer) {
            tracing::info!(%peer, "client joined");
        }
    }

    /// Forget a disconnected peer and any snapshot still held for it.
    pub fn remove_client(&mut self, peer: PeerId) -> bool {
        self.outbound.retain(|_, served| served.peer != peer);
        let removed = self.clients.remove(&peer);
        if removed {
            tracing::info!(%peer, "client left");
        }
        removed
    }

    /// Snapshots currently held for re-requests.
    pub fn served_transfers(&self) -> usize {
        self.outbound.len()
    }

    /// Advance the host clock by one pump and drop served transfers that no
    /// receiver can still be waiting on. Returns how many were dropped.
    pub fn expire_transfers(&mut self) -> usize {
        self.ticks += 1;
        let now = self.ticks;
        let window = u64::from(self.transfer.timeout_ticks);
        let before = self.outbound.len();
        self.outbound.retain(|transfer, served| {
            let keep = now - served.last_request <= window;
            if !keep {
                tracing::debug!(%transfer, peer = %served.peer, "served transfer expired");
            }
            keep
        });
        before - self.outbound.len()
    }

    /// Serialize (once per transfer id) and return a fresh push cursor.
    pub fn prepare_snapshot(
        &mut self,
        from: PeerId,
        transfer: TransferId,
        kind: PayloadKind,
    ) -> Result<OutboundTransfer, SessionError> {
        self.add_client(from);
        if let Some(existing) = self.outbound.get_mut(&transfer) {
            tracing::debug!(%transfer, "snapshot re-requested, resending");
            existing.last_request = self.ticks;
            existing.outbound.rewind();
            return Ok(existing.outbound.clone());
        }
        let payload = self.world.snapshot_bytes(kind, &self.template)?;
        let outbound = OutboundTransfer::new(
            transfer,
            kind,
            &payload,
            self.transfer.segment_policy,
            self.transfer.zstd_level,
        )?;
        if outbound.total() > self.transfer.max_segments {
            return Err(TransferError::TooManySegments {
                total: outbound.total(),
                max: self.transfer.max_segments,
            }
            .into());
        }
        tracing::info!(%from, %transfer, ?kind, segments = outbound.total(), "serving snapshot");
        self.outbound.insert(
            transfer,
            ServedTransfer {
                peer: from,
                outbound: outbound.clone(),
                last_request: self.ticks,
            },
        );
        Ok(outbound)
    }

    pub fn handle(&mut self, from: PeerId, message: WireMessage) -> Result<Outgoing, SessionError> {
        match message {
            WireMessage::Transfer(TransferMessage::RequestSnapshot { transfer, kind }) => {
                let mut outbound = self.prepare_snapshot(from, transfer, kind)?;
                Ok(std::iter::from_fn(|| outbound.next_push())
                    .map(|m| (from, WireMessage::Transfer(m)))
                    .collect())
            }
            WireMessage::Transfer(TransferMessage::RequestSegment { transfer, index }) => {
                let Some(served) = self.outbound.get_mut(&transfer) else {
                    tracing::warn!(%from, %transfer, index, "segment requested for unknown transfer");
                    return Ok(Vec::new());
                };
                served.last_request = self.ticks;
                let segment = served.outbound.segment_message(index)?;
                Ok(vec![(from, WireMessage::Transfer(segment))])
            }
            WireMessage::Damage { id, amount } => self.damage(id, amount),
            other => {
                tracing::warn!(%from, message = other.name(), "unexpected message at host");
                Ok(Vec::new())
            }
        }
    }

    /// Apply damage and broadcast destruction to every known client.
    pub fn damage(&mut self, id: EntityId, amount: f32) -> Result<Outgoing, SessionError> {
        let report = self.world.apply_damage(id, amount)?;
        if !report.destroyed {
            return Ok(Vec::new());
        }
        tracing::info!(%id, clients = self.clients.len(), "broadcasting destruction");
        Ok(self.broadcast(WireMessage::Destroyed { id }))
    }

    /// Re-enable `ids` locally and on every client.
    pub fn resync(&mut self, ids: Vec<EntityId>) -> Result<Outgoing, SessionError> {
        self.world.resync(&ids)?;
        Ok(self.broadcast(WireMessage::Resync { ids }))
    }

    fn broadcast(&self, message: WireMessage) -> Outgoing {
        self.clients.iter().map(|c| (*c, message.clone())).collect()
    }

    /// Drain the transport, handle everything, send the replies. Bad
    /// datagrams and failed commands are logged and skipped. Each call is one
    /// tick of the clock that expires served transfers.
    pub fn pump<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<usize, SessionError> {
        self.expire_transfers();
        let mut handled = 0;
        while let Some((from, bytes)) = transport.try_recv() {
            let message = match WireMessage::decode(&bytes) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(%from, error = %e, "undecodable datagram dropped");
                    continue;
                }
            };
            let name = message.name();
            match self.handle(from, message) {
                Ok(outgoing) => send_all(transport, outgoing)?,
                Err(e) => tracing::warn!(%from, message = name, error = %e, "host failed to handle message"),
            }
            handled += 1;
        }
        Ok(handled)
    }
}

pub(crate) fn send_all<T: Transport + ?Sized>(transport: &T, outgoing: Outgoing) -> Result<(), SessionError> {
    for (peer, message) in outgoing {
        transport.send_to(peer, message.encode()?)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GroundcoverConfig, Persistence};
    use glam::Vec3;
    use groundcover_common::{BoundingShape, TransformMatrix};
    use groundcover_kernel::{EntityRecord, TypeCatalog};
    use groundcover_persist::MemorySaveStore;
    use groundcover_render::RecordingBackend;
    use groundcover_stream::GridConfig;
    use groundcover_transfer::SegmentPolicy;

    fn template() -> Dataset {
        let records = (0..6)
            .map(|i| {
                EntityRecord::new(
                    EntityId(i),
                    "oak",
                    TransformMatrix::from_translation(Vec3::new(i as f32 * 15.0, 0.0, 5.0)),
                    100.0,
                )
            })
            .collect();
        Dataset::new(1, records)
    }

    fn host() -> HostRole<RecordingBackend> {
        host_with(TransferConfig {
            segment_policy: SegmentPolicy::FixedCount(3),
            ..TransferConfig::default()
        })
    }

    fn host_with(transfer: TransferConfig) -> HostRole<RecordingBackend> {
        let config = GroundcoverConfig {
            grid: GridConfig::new(100.0, 10.0),
            ..GroundcoverConfig::default()
        };
        let catalog = TypeCatalog::new().with_type("oak", BoundingShape::default());
        let world = WorldSession::load_host(
            &config,
            &template(),
            &catalog,
            Persistence::new(MemorySaveStore::new(), "forest"),
            RecordingBackend::new(),
        )
        .unwrap();
        HostRole::new(world, template(), transfer)
    }

    #[test]
    fn snapshot_request_pushes_every_segment() {
        let mut host = host();
        let client = PeerId::new();
        let transfer = TransferId::new();
        let out = host
            .handle(
                client,
                WireMessage::Transfer(TransferMessage::RequestSnapshot {
                    transfer,
                    kind: PayloadKind::Full,
                }),
            )
            .unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|(peer, _)| *peer == client));
        assert_eq!(host.clients().collect::<Vec<_>>(), vec![client]);

        let pulled = host
            .handle(
                client,
                WireMessage::Transfer(TransferMessage::RequestSegment { transfer, index: 2 }),
            )
            .unwrap();
        assert!(matches!(
            &pulled[0].1,
            WireMessage::Transfer(TransferMessage::Segment { index: 2, .. })
        ));
    }

    #[test]
    fn re_request_reuses_serialized_payload() {
        let mut host = host();
        let client = PeerId::new();
        let transfer = TransferId::new();
        let first = host.prepare_snapshot(client, transfer, PayloadKind::Full).unwrap();
        host.damage(EntityId(0), 10.0).unwrap();
        let second = host.prepare_snapshot(client, transfer, PayloadKind::Full).unwrap();
        assert_eq!(first.digest(), second.digest());
    }

    #[test]
    fn destruction_is_broadcast() {
        let mut host = host();
        let a = PeerId::new();
        let b = PeerId::new();
        host.add_client(a);
        host.add_client(b);
        assert!(host.damage(EntityId(3), 20.0).unwrap().is_empty());
        let out = host
            .handle(a, WireMessage::Damage { id: EntityId(3), amount: 100.0 })
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out
            .iter()
            .all(|(_, m)| *m == WireMessage::Destroyed { id: EntityId(3) }));
        assert!(host.world().store().record(EntityId(3)).unwrap().is_destroyed());
    }

    #[test]
    fn unknown_transfer_segment_request_is_ignored() {
        let mut host = host();
        let out = host
            .handle(
                PeerId::new(),
                WireMessage::Transfer(TransferMessage::RequestSegment {
                    transfer: TransferId::new(),
                    index: 0,
                }),
            )
            .unwrap();
        assert!(out.is_empty());
    }

    fn request(transfer: TransferId) -> WireMessage {
        WireMessage::Transfer(TransferMessage::RequestSnapshot {
            transfer,
            kind: PayloadKind::Full,
        })
    }

    #[test]
    fn idle_transfers_expire_after_the_timeout_window() {
        let mut host = host_with(TransferConfig {
            segment_policy: SegmentPolicy::FixedCount(3),
            timeout_ticks: 4,
            ..TransferConfig::default()
        });
        for _ in 0..500 {
            host.handle(PeerId::new(), request(TransferId::new())).unwrap();
        }
        let kept = TransferId::new();
        let client = PeerId::new();
        host.handle(client, request(kept)).unwrap();
        assert_eq!(host.served_transfers(), 501);

        for _ in 0..4 {
            assert_eq!(host.expire_transfers(), 0);
            host.handle(
                client,
                WireMessage::Transfer(TransferMessage::RequestSegment { transfer: kept, index: 1 }),
            )
            .unwrap();
        }
        assert_eq!(host.expire_transfers(), 500);
        assert_eq!(host.served_transfers(), 1);

        for _ in 0..5 {
            host.expire_transfers();
        }
        assert_eq!(host.served_transfers(), 0);
        let late = host
            .handle(
                client,
                WireMessage::Transfer(TransferMessage::RequestSegment { transfer: kept, index: 0 }),
            )
            .unwrap();
        assert!(late.is_empty());
    }

    #[test]
    fn removing_a_client_drops_its_transfers() {
        let mut host = host();
        let a = PeerId::new();
        let b = PeerId::new();
        host.handle(a, request(TransferId::new())).unwrap();
        host.handle(b, request(TransferId::new())).unwrap();
        assert!(host.remove_client(a));
        assert!(!host.remove_client(a));
        assert_eq!(host.served_transfers(), 1);
        assert_eq!(host.clients().collect::<Vec<_>>(), vec![b]);
    }

    #[test]
    fn snapshot_over_the_segment_limit_is_refused() {
        let mut host = host_with(TransferConfig {
            segment_policy: SegmentPolicy::MaxSegmentBytes(1),
            max_segments: 8,
            ..TransferConfig::default()
        });
        let err = host
            .prepare_snapshot(PeerId::new(), TransferId::new(), PayloadKind::Full)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transfer(TransferError::TooManySegments { max: 8, .. })
        ));
        assert_eq!(host.served_transfers(), 0);
    }
}
