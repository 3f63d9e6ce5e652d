use std::sync::{Arc, Weak};

use groundcover_common::EntityId;
use groundcover_kernel::{DamageReport, Dataset, EntityStore, StoreEvent, TypeCatalog};
use groundcover_persist::{
    CborCodec, Codec, DatasetReconciler, HostLoad, SaveStore, load_host_dataset, persist_dataset,
};
use groundcover_render::{BatchBackend, initialize_all, sync_dirty};
use groundcover_stream::{Observer, RefreshReport, SpatialIndex, StreamingController};
use groundcover_transfer::PayloadKind;

use crate::{GroundcoverConfig, LoadPhase, LoadTracker, SessionError};

/// Save store plus the slot this world persists to.
pub struct Persistence {
    pub saves: Box<dyn SaveStore + Send>,
    pub key: String,
}

impl Persistence {
    pub fn new(saves: impl SaveStore + Send + 'static, key: impl Into<String>) -> Self {
        Self {
            saves: Box::new(saves),
            key: key.into(),
        }
    }
}

/// One peer's loaded world: entity store, streaming, render batches.
pub struct WorldSession<B> {
    store: EntityStore,
    controller: StreamingController,
    backend: B,
    tracker: LoadTracker,
    persistence: Option<Persistence>,
    codec: CborCodec,
    /// Health changes since the last successful save.
    unsaved: usize,
}

impl<B: BatchBackend> WorldSession<B> {
    /// Host load: save slot or template, reconciled to the configured version.
    pub fn load_host(
        config: &GroundcoverConfig,
        template: &Dataset,
        catalog: &TypeCatalog,
        mut persistence: Persistence,
        backend: B,
    ) -> Result<Self, SessionError> {
        let mut tracker = LoadTracker::new();
        tracker.advance(LoadPhase::LoadingFromDisk)?;
        let codec = CborCodec::default();
        let reconciler = DatasetReconciler::new(config.dataset_version);
        let HostLoad {
            dataset,
            source,
            reconciled,
            ..
        } = load_host_dataset(
            &codec,
            persistence.saves.as_mut(),
            &persistence.key,
            template,
            &reconciler,
        );
        tracing::info!(?source, version = dataset.version, "host dataset loaded");

        tracker.advance(LoadPhase::VersionCheck)?;
        if reconciled.is_some() {
            tracker.advance(LoadPhase::Reconciling)?;
        }
        Self::assemble(tracker, dataset, catalog, config, backend, Some(persistence))
    }

    /// Finish loading from a dataset; `tracker` must be at `VersionCheck` or
    /// `Reconciling`.
    pub(crate) fn assemble(
        mut tracker: LoadTracker,
        dataset: Dataset,
        catalog: &TypeCatalog,
        config: &GroundcoverConfig,
        mut backend: B,
        persistence: Option<Persistence>,
    ) -> Result<Self, SessionError> {
        let mut store = EntityStore::new(dataset, catalog);
        let index = SpatialIndex::build(config.grid, store.records())?;
        tracker.advance(LoadPhase::RuntimeIndexBuilt)?;

        let controller = StreamingController::new(index, config.stream);
        initialize_all(&mut store, &mut backend)?;
        tracker.advance(LoadPhase::PoolInitialized)?;
        tracker.advance(LoadPhase::Ready)?;

        Ok(Self {
            store,
            controller,
            backend,
            tracker,
            persistence,
            codec: CborCodec::default(),
            unsaved: 0,
        })
    }

    pub fn phase(&self) -> LoadPhase {
        self.tracker.phase()
    }

    pub fn phase_history(&self) -> &[LoadPhase] {
        self.tracker.history()
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn controller(&self) -> &StreamingController {
        &self.controller
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn register_observer<O: Observer + 'static>(&mut self, observer: &Arc<O>) {
        self.controller.register_observer(observer);
    }

    pub(crate) fn register_weak_observer(&mut self, observer: Weak<dyn Observer>) {
        self.controller.register_weak(observer);
    }

    /// One streaming pass, then push any changed batches.
    pub fn refresh(&mut self) -> Result<RefreshReport, SessionError> {
        if !self.tracker.is_ready() {
            return Err(SessionError::NotReady(self.tracker.phase()));
        }
        let report = self.controller.refresh(&self.store)?;
        sync_dirty(&mut self.store, &mut self.backend)?;
        Ok(report)
    }

    /// Host-side damage. A destroying hit is followed by [`Self::mark_destroyed`].
    pub fn apply_damage(&mut self, id: EntityId, amount: f32) -> Result<DamageReport, SessionError> {
        let report = self.store.apply_damage(id, amount)?;
        if report.destroyed {
            self.mark_destroyed(id)?;
        }
        self.settle_events();
        Ok(report)
    }

    /// Tombstone the entity, stop streaming it and reload its cell.
    pub fn mark_destroyed(&mut self, id: EntityId) -> Result<(), SessionError> {
        let alive = self
            .store
            .record(id)
            .map(|r| !r.is_destroyed())
            .ok_or(groundcover_kernel::StoreError::UnknownEntity(id))?;
        if alive {
            self.store.set_health(id, 0.0)?;
        }
        self.store.set_calculation_eligible(id, false)?;
        if let Some(cell) = self.controller.cell_of(id) {
            self.controller.force_reload(cell, &self.store)?;
        }
        sync_dirty(&mut self.store, &mut self.backend)?;
        self.settle_events();
        tracing::debug!(%id, "entity marked destroyed");
        Ok(())
    }

    /// Re-enable calculation for `ids` and allocate them into loaded cells.
    /// Destroyed entities stay disabled. Returns how many were allocated.
    pub fn resync(&mut self, ids: &[EntityId]) -> Result<usize, SessionError> {
        let mut allocated = 0;
        for &id in ids {
            let destroyed = self
                .store
                .record(id)
                .map(|r| r.is_destroyed())
                .ok_or(groundcover_kernel::StoreError::UnknownEntity(id))?;
            if destroyed {
                continue;
            }
            self.store.set_calculation_eligible(id, true)?;
            if self.controller.force_allocate(id, &self.store)? {
                allocated += 1;
            }
        }
        sync_dirty(&mut self.store, &mut self.backend)?;
        self.settle_events();
        tracing::debug!(requested = ids.len(), allocated, "entities resynced");
        Ok(allocated)
    }

    /// Encoded dataset, either whole or as a diff against `template`.
    pub fn snapshot_bytes(&self, kind: PayloadKind, template: &Dataset) -> Result<Vec<u8>, SessionError> {
        let bytes = match kind {
            PayloadKind::Full => self.codec.encode(self.store.dataset())?,
            PayloadKind::Diff => self.codec.encode(&self.store.dataset().diff_against(template)?)?,
        };
        Ok(bytes)
    }

    /// Drain the store's mutation log, counting what a save would capture.
    fn settle_events(&mut self) {
        for event in self.store.drain_events() {
            tracing::trace!(?event, "store event");
            if matches!(event, StoreEvent::Damaged { .. } | StoreEvent::HealthSet { .. }) {
                self.unsaved += 1;
            }
        }
    }

    /// Health changes not yet written to the save slot.
    pub fn unsaved_changes(&self) -> usize {
        self.unsaved
    }

    /// Write the dataset to the save slot. Failures are logged, never fatal.
    pub fn persist(&mut self) -> bool {
        self.settle_events();
        let Some(persistence) = self.persistence.as_mut() else {
            return false;
        };
        let saved = persist_dataset(
            &self.codec,
            persistence.saves.as_mut(),
            &persistence.key,
            self.store.dataset(),
        );
        if saved {
            tracing::debug!(changes = self.unsaved, "dataset saved");
            self.unsaved = 0;
        }
        saved
    }

    pub fn state_hash(&self) -> u64 {
        self.store.state_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use groundcover_common::{BoundingShape, TransformMatrix};
    use groundcover_kernel::EntityRecord;
    use groundcover_persist::MemorySaveStore;
    use groundcover_render::RecordingBackend;
    use groundcover_stream::{GridConfig, ObserverPoint};

    fn config() -> GroundcoverConfig {
        GroundcoverConfig {
            grid: GridConfig::new(100.0, 10.0),
            ..GroundcoverConfig::default()
        }
    }

    fn catalog() -> TypeCatalog {
        TypeCatalog::new().with_type("oak", BoundingShape::default())
    }

    fn template() -> Dataset {
        let records = [(1.0, 1.0), (2.0, 2.0), (55.0, 55.0)]
            .iter()
            .enumerate()
            .map(|(i, (x, z))| {
                EntityRecord::new(
                    EntityId(i as u32),
                    "oak",
                    TransformMatrix::from_translation(Vec3::new(*x, 0.0, *z)),
                    100.0,
                )
            })
            .collect();
        Dataset::new(1, records)
    }

    fn host(saves: MemorySaveStore) -> WorldSession<RecordingBackend> {
        WorldSession::load_host(
            &config(),
            &template(),
            &catalog(),
            Persistence::new(saves, "forest"),
            RecordingBackend::new(),
        )
        .unwrap()
    }

    #[test]
    fn first_load_walks_host_phases() {
        let world = host(MemorySaveStore::new());
        assert_eq!(
            world.phase_history(),
            &[
                LoadPhase::Unloaded,
                LoadPhase::LoadingFromDisk,
                LoadPhase::VersionCheck,
                LoadPhase::RuntimeIndexBuilt,
                LoadPhase::PoolInitialized,
                LoadPhase::Ready,
            ]
        );
        assert_eq!(world.backend().batch("oak").unwrap().matrices.len(), 3);
    }

    #[test]
    fn stale_save_passes_through_reconciling() {
        let mut saves = MemorySaveStore::new();
        let mut old = template();
        old.version = 0;
        old.records[2].health = 10.0;
        saves
            .save("forest", &CborCodec::default().encode(&old).unwrap())
            .unwrap();
        let world = host(saves);
        assert!(world.phase_history().contains(&LoadPhase::Reconciling));
        assert_eq!(world.store().record(EntityId(2)).unwrap().health, 10.0);
        assert_eq!(world.store().version(), 1);
    }

    #[test]
    fn destroying_damage_reloads_cell() {
        let mut world = host(MemorySaveStore::new());
        let observer = Arc::new(ObserverPoint::new(Vec3::new(0.5, 0.0, 0.5)));
        world.register_observer(&observer);
        world.refresh().unwrap();
        assert_eq!(world.controller().stats().allocated, 2);

        let report = world.apply_damage(EntityId(1), 150.0).unwrap();
        assert!(report.destroyed);
        assert_eq!(world.controller().stats().allocated, 1);
        assert_eq!(world.backend().batch("oak").unwrap().matrices.len(), 2);
        assert!(!world.store().record(EntityId(1)).unwrap().calculation_eligible);
    }

    #[test]
    fn resync_skips_destroyed_entities() {
        let mut world = host(MemorySaveStore::new());
        let observer = Arc::new(ObserverPoint::new(Vec3::new(0.5, 0.0, 0.5)));
        world.register_observer(&observer);
        world.refresh().unwrap();
        world.mark_destroyed(EntityId(0)).unwrap();
        assert_eq!(world.resync(&[EntityId(0), EntityId(1)]).unwrap(), 0);
        assert_eq!(world.controller().allocated_in(groundcover_common::CellId(0)), vec![EntityId(1)]);
    }

    #[test]
    fn diff_snapshot_holds_only_changes() {
        let mut world = host(MemorySaveStore::new());
        world.apply_damage(EntityId(2), 5.0).unwrap();
        let bytes = world.snapshot_bytes(PayloadKind::Diff, &template()).unwrap();
        let diff = CborCodec::default().decode_diff(&bytes).unwrap();
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].health, 95.0);
    }

    #[test]
    fn persist_writes_current_dataset() {
        let mut world = host(MemorySaveStore::new());
        world.apply_damage(EntityId(0), 30.0).unwrap();
        assert!(world.persist());
        let codec = CborCodec::default();
        let stored = world
            .persistence
            .as_ref()
            .map(|p| p.saves.load("forest").unwrap().unwrap())
            .unwrap();
        assert_eq!(codec.decode_dataset(&stored).unwrap().records[0].health, 70.0);
    }

    #[test]
    fn mutation_log_is_drained_into_the_unsaved_count() {
        let mut world = host(MemorySaveStore::new());
        for _ in 0..1000 {
            world.apply_damage(EntityId(2), 0.01).unwrap();
        }
        assert!(world.store().events().is_empty());
        assert_eq!(world.unsaved_changes(), 1000);

        assert!(world.persist());
        assert_eq!(world.unsaved_changes(), 0);

        world.apply_damage(EntityId(0), 150.0).unwrap();
        world.mark_destroyed(EntityId(1)).unwrap();
        assert!(world.store().events().is_empty());
        // One destroying hit, one tombstoning health write.
        assert_eq!(world.unsaved_changes(), 2);
    }
}
