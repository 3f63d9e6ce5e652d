use std::sync::Arc;

use anyhow::{Context, bail};
use glam::Vec3;
use groundcover_common::EntityId;
use groundcover_kernel::{Dataset, TypeCatalog};
use groundcover_persist::SaveStore;
use groundcover_render::RecordingBackend;
use groundcover_session::{
    ClientPoll, ClientRole, GroundcoverConfig, HostRole, LoopbackNetwork, LossPolicy, Persistence,
    ReadyGate, Transport, WireMessage, WorldSession,
};
use groundcover_stream::{Observer, ObserverPoint};
use groundcover_transfer::PayloadKind;

/// Knobs for one host/client run over the loopback network.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub kind: PayloadKind,
    pub loss: LossPolicy,
    /// Observer steps taken after the client is ready.
    pub walk_steps: u32,
    /// Damage one entity every this many steps (0 disables).
    pub damage_every: u32,
    pub max_ticks: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub transfer_ticks: u32,
    pub sent: u64,
    pub dropped: u64,
    pub destroyed: usize,
    pub peak_allocated: usize,
    pub cells_loaded: usize,
    pub host_hash: u64,
    pub client_hash: u64,
}

impl SimulationReport {
    pub fn in_sync(&self) -> bool {
        self.host_hash == self.client_hash
    }
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "transfer: {} ticks, {} sent, {} dropped\nwalk: {} cell loads, peak {} instances, {} destroyed\nhash: host={:#018x} client={:#018x} {}",
            self.transfer_ticks,
            self.sent,
            self.dropped,
            self.cells_loaded,
            self.peak_allocated,
            self.destroyed,
            self.host_hash,
            self.client_hash,
            if self.in_sync() { "OK" } else { "MISMATCH" }
        )
    }
}

/// Host loads from `saves`, a client fetches the world, then walks an
/// observer diagonally across the grid while damaging what it passes.
pub fn run(
    config: &GroundcoverConfig,
    template: &Dataset,
    catalog: &TypeCatalog,
    saves: impl SaveStore + Send + 'static,
    params: &SimulationParams,
) -> anyhow::Result<SimulationReport> {
    let net = LoopbackNetwork::with_loss(params.loss);
    let host_ep = net.endpoint();
    let client_ep = net.endpoint();

    let world = WorldSession::load_host(
        config,
        template,
        catalog,
        Persistence::new(saves, config.save_key.clone()),
        RecordingBackend::new(),
    )
    .context("host failed to load")?;
    let mut host = HostRole::new(world, template.clone(), config.transfer);

    let gate = ReadyGate::new();
    let mut client = ClientRole::new(
        host_ep.local_peer(),
        config.clone(),
        template.clone(),
        catalog.clone(),
        RecordingBackend::new(),
        gate.clone(),
    );
    let observer = Arc::new(ObserverPoint::new(Vec3::ZERO));
    client.register_observer(&observer);

    let request = client.start(params.kind)?;
    client_ep.send_to(host_ep.local_peer(), request.encode()?)?;
    let mut transfer_ticks = 0;
    loop {
        transfer_ticks += 1;
        host.pump(&host_ep)?;
        client.pump(&client_ep)?;
        match client.poll_and_send(&client_ep)? {
            ClientPoll::Pending(_) if transfer_ticks < params.max_ticks => {}
            ClientPoll::Ready => break,
            ClientPoll::TimedOut => bail!("transfer timed out after {transfer_ticks} ticks"),
            ClientPoll::Failed(failure) => bail!("transfer failed: {failure:?}"),
            other => bail!("transfer did not settle: {other:?}"),
        }
    }
    tracing::info!(transfer_ticks, "client ready");
    net.set_loss(LossPolicy::None);

    let mut report = SimulationReport {
        transfer_ticks,
        sent: net.stats().sent,
        dropped: net.stats().dropped,
        destroyed: 0,
        peak_allocated: 0,
        cells_loaded: 0,
        host_hash: 0,
        client_hash: 0,
    };

    let steps = params.walk_steps.max(1);
    let extent = config.grid.extent;
    for step in 0..steps {
        let t = step as f32 / steps as f32;
        observer.set_position(Vec3::new(t * extent, 0.0, t * extent));
        let refresh = client.refresh()?;
        report.cells_loaded += refresh.loaded.len();

        if params.damage_every > 0 && step % params.damage_every == 0 {
            if let Some(target) = nearest_alive(&client, observer.position()) {
                let damage = WireMessage::Damage { id: target, amount: 100.0 };
                client_ep.send_to(host_ep.local_peer(), damage.encode()?)?;
                host.pump(&host_ep)?;
                client.pump(&client_ep)?;
            }
        }

        host.world_mut().refresh()?;
        if let Some(world) = client.world() {
            report.peak_allocated = report.peak_allocated.max(world.controller().stats().allocated);
        }
    }

    let host_world = host.world();
    report.destroyed = host_world
        .store()
        .records()
        .iter()
        .filter(|r| r.is_destroyed())
        .count();
    report.host_hash = host_world.state_hash();
    report.client_hash = client
        .world()
        .map(|w| w.state_hash())
        .context("client world missing after ready")?;
    if !host.world_mut().persist() {
        tracing::warn!("host save failed at end of simulation");
    }
    Ok(report)
}

fn nearest_alive(client: &ClientRole<RecordingBackend>, from: Vec3) -> Option<EntityId> {
    let world = client.world()?;
    let cell = world.controller().index().cell_for_position(from)?;
    cell.members
        .iter()
        .filter_map(|id| world.store().record(*id))
        .filter(|r| !r.is_destroyed())
        .min_by(|a, b| {
            a.position()
                .distance_squared(from)
                .total_cmp(&b.position().distance_squared(from))
        })
        .map(|r| r.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate;
    use groundcover_persist::MemorySaveStore;
    use groundcover_stream::GridConfig;
    use groundcover_transfer::SegmentPolicy;

    fn config() -> GroundcoverConfig {
        let mut config = GroundcoverConfig {
            grid: GridConfig::new(200.0, 20.0),
            ..GroundcoverConfig::default()
        };
        config.transfer.resync_every = 2;
        config.transfer.segment_policy = SegmentPolicy::MaxSegmentBytes(256);
        config
    }

    fn params(loss: LossPolicy) -> SimulationParams {
        SimulationParams {
            kind: PayloadKind::Diff,
            loss,
            walk_steps: 40,
            damage_every: 3,
            max_ticks: 400,
        }
    }

    #[test]
    fn lossless_run_stays_in_sync() {
        let config = config();
        let template = generate::template(&config.grid, 400, 11, 1);
        let report = run(
            &config,
            &template,
            &generate::catalog(),
            MemorySaveStore::new(),
            &params(LossPolicy::None),
        )
        .unwrap();
        assert!(report.in_sync(), "{report}");
        assert_eq!(report.dropped, 0);
        assert!(report.cells_loaded > 0);
        assert!(report.destroyed > 0);
    }

    #[test]
    fn lossy_run_still_converges() {
        let config = config();
        let template = generate::template(&config.grid, 400, 12, 1);
        let report = run(
            &config,
            &template,
            &generate::catalog(),
            MemorySaveStore::new(),
            &params(LossPolicy::Seeded { seed: 5, per_mille: 200 }),
        )
        .unwrap();
        assert!(report.in_sync(), "{report}");
        assert!(report.dropped > 0);
    }
}
