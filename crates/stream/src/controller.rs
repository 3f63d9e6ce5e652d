use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, Weak};

use glam::Vec3;
use groundcover_common::{CellId, EntityId};
use groundcover_kernel::EntityStore;
use serde::{Deserialize, Serialize};

use crate::grid::SpatialIndex;
use crate::pool::{ObjectPool, PoolError, PoolHandle, PoolStats};

/// Errors from streaming operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("unknown cell {0:?}")]
    UnknownCell(CellId),
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Anything with a world position that should keep nearby entities streamed in.
pub trait Observer: Send + Sync {
    fn position(&self) -> Vec3;
}

/// A movable observer, for cameras driven elsewhere and for tests.
#[derive(Debug, Default)]
pub struct ObserverPoint {
    position: RwLock<Vec3>,
}

impl ObserverPoint {
    pub fn new(position: Vec3) -> Self {
        Self {
            position: RwLock::new(position),
        }
    }

    pub fn set_position(&self, position: Vec3) {
        match self.position.write() {
            Ok(mut guard) => *guard = position,
            Err(poisoned) => *poisoned.into_inner() = position,
        }
    }
}

impl Observer for ObserverPoint {
    fn position(&self) -> Vec3 {
        match self.position.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Streaming configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Interval between refresh passes, in milliseconds.
    pub refresh_interval_ms: u64,
    /// Instances pre-populated in the object pool.
    pub pool_budget: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 300,
            pool_budget: 100,
        }
    }
}

/// Cells that changed state during one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub loaded: Vec<CellId>,
    pub unloaded: Vec<CellId>,
    pub observers: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub active_cells: usize,
    pub loaded_cells: usize,
    pub allocated: usize,
    pub observers: usize,
    pub pool: PoolStats,
}

#[derive(Debug, Default)]
struct CellRuntime {
    loaded: bool,
    allocated: Vec<(EntityId, PoolHandle)>,
}

/// Decides which cells are materialized from observer positions and keeps
/// pooled instances bound to the active entities of loaded cells.
pub struct StreamingController {
    config: StreamConfig,
    index: SpatialIndex,
    pool: ObjectPool,
    cells: Vec<CellRuntime>,
    active: BTreeSet<CellId>,
    observers: Vec<Weak<dyn Observer>>,
}

impl StreamingController {
    pub fn new(index: SpatialIndex, config: StreamConfig) -> Self {
        let cells = (0..index.len()).map(|_| CellRuntime::default()).collect();
        Self {
            config,
            index,
            pool: ObjectPool::with_budget(config.pool_budget),
            cells,
            active: BTreeSet::new(),
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn pool(&self) -> &ObjectPool {
        &self.pool
    }

    /// The controller holds only a weak reference; dropping the last `Arc`
    /// unregisters the observer on the next refresh.
    pub fn register_observer<O: Observer + 'static>(&mut self, observer: &Arc<O>) {
        let weak: Weak<O> = Arc::downgrade(observer);
        self.observers.push(weak);
    }

    pub fn register_weak(&mut self, observer: Weak<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.iter().filter(|o| o.strong_count() > 0).count()
    }

    /// Reconcile loaded cells with the cells observers currently stand in.
    pub fn refresh(&mut self, store: &EntityStore) -> Result<RefreshReport, StreamError> {
        let _span = tracing::info_span!("stream_refresh").entered();

        self.observers.retain(|o| o.strong_count() > 0);
        let desired: BTreeSet<CellId> = self
            .observers
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|o| self.index.cell_for_position(o.position()).map(|c| c.id))
            .collect();

        let mut report = RefreshReport {
            observers: self.observers.len(),
            ..RefreshReport::default()
        };
        let stale: Vec<CellId> = self.active.difference(&desired).copied().collect();
        for cell in stale {
            if self.unload_cell(cell)? {
                report.unloaded.push(cell);
            }
        }
        self.active = desired;
        let active: Vec<CellId> = self.active.iter().copied().collect();
        for cell in active {
            if self.load_cell(cell, store)? {
                report.loaded.push(cell);
            }
        }

        tracing::trace!(
            loaded = report.loaded.len(),
            unloaded = report.unloaded.len(),
            active = self.active.len(),
            "stream refresh complete"
        );
        Ok(report)
    }

    /// Allocate instances for the cell's active members. Returns `false` when
    /// the cell was already loaded.
    pub fn load_cell(&mut self, cell: CellId, store: &EntityStore) -> Result<bool, StreamError> {
        let members = self
            .index
            .cell(cell)
            .ok_or(StreamError::UnknownCell(cell))?
            .members
            .clone();
        let runtime = &mut self.cells[cell.index()];
        if runtime.loaded {
            return Ok(false);
        }
        runtime.loaded = true;
        for id in members {
            Self::allocate(&mut self.pool, runtime, id, store)?;
        }
        tracing::debug!(?cell, allocated = runtime.allocated.len(), "cell loaded");
        Ok(true)
    }

    /// Release every instance of the cell. Returns `false` when it was not loaded.
    pub fn unload_cell(&mut self, cell: CellId) -> Result<bool, StreamError> {
        let runtime = self
            .cells
            .get_mut(cell.index())
            .ok_or(StreamError::UnknownCell(cell))?;
        if !runtime.loaded {
            return Ok(false);
        }
        runtime.loaded = false;
        let released = runtime.allocated.len();
        for (_, handle) in runtime.allocated.drain(..) {
            self.pool.deactivate(handle)?;
            self.pool.release(handle)?;
        }
        tracing::debug!(?cell, released, "cell unloaded");
        Ok(true)
    }

    pub fn force_reload(&mut self, cell: CellId, store: &EntityStore) -> Result<(), StreamError> {
        self.unload_cell(cell)?;
        self.load_cell(cell, store)?;
        Ok(())
    }

    /// Allocate one entity into its cell right away. Does nothing when the
    /// cell is not loaded or already holds the entity.
    pub fn force_allocate(&mut self, id: EntityId, store: &EntityStore) -> Result<bool, StreamError> {
        let record = store.record(id).ok_or(StreamError::UnknownEntity(id))?;
        let Some(cell) = self.index.cell_for_position(record.position()).map(|c| c.id) else {
            return Ok(false);
        };
        let runtime = &mut self.cells[cell.index()];
        if !runtime.loaded || runtime.allocated.iter().any(|(e, _)| *e == id) {
            return Ok(false);
        }
        let allocated = Self::allocate(&mut self.pool, runtime, id, store)?;
        if allocated {
            tracing::debug!(%id, ?cell, "entity force-allocated");
        }
        Ok(allocated)
    }

    fn allocate(
        pool: &mut ObjectPool,
        runtime: &mut CellRuntime,
        id: EntityId,
        store: &EntityStore,
    ) -> Result<bool, StreamError> {
        let Some(record) = store.record(id) else {
            return Ok(false);
        };
        if !record.is_active() {
            return Ok(false);
        }
        let Some(shape) = store.bounding_shape(&record.type_name) else {
            return Ok(false);
        };
        let handle = pool.acquire();
        pool.bind(handle, id, &record.transform, shape)?;
        runtime.allocated.push((id, handle));
        Ok(true)
    }

    pub fn cell_of(&self, id: EntityId) -> Option<CellId> {
        self.index.cell_of(id)
    }

    pub fn is_loaded(&self, cell: CellId) -> bool {
        self.cells.get(cell.index()).is_some_and(|c| c.loaded)
    }

    pub fn active_cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.active.iter().copied()
    }

    /// Entities with a bound instance in `cell`, in allocation order.
    pub fn allocated_in(&self, cell: CellId) -> Vec<EntityId> {
        self.cells
            .get(cell.index())
            .map(|c| c.allocated.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            active_cells: self.active.len(),
            loaded_cells: self.cells.iter().filter(|c| c.loaded).count(),
            allocated: self.cells.iter().map(|c| c.allocated.len()).sum(),
            observers: self.observer_count(),
            pool: self.pool.stats(),
        }
    }
}
