use groundcover_common::{BoundingShape, EntityId, Transform, TransformMatrix};

/// Errors from pool bookkeeping.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    #[error("unknown pool handle {0:?}")]
    UnknownHandle(PoolHandle),
    #[error("pool handle {0:?} is still visible; deactivate it first")]
    StillVisible(PoolHandle),
    #[error("pool handle {0:?} is already free")]
    AlreadyFree(PoolHandle),
}

/// Opaque slot index into the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolHandle(u32);

impl PoolHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One reusable runtime instance standing in for a streamed entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledInstance {
    pub bound: Option<EntityId>,
    pub transform: Transform,
    pub shape: BoundingShape,
    pub visible: bool,
    free: bool,
}

impl PooledInstance {
    fn idle() -> Self {
        Self {
            bound: None,
            transform: Transform::default(),
            shape: BoundingShape::default(),
            visible: false,
            free: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub total: usize,
    pub free_count: usize,
    pub allocated_count: usize,
    pub growth_events: u64,
}

/// Growable pool of instances. Never shrinks.
#[derive(Debug, Default)]
pub struct ObjectPool {
    instances: Vec<PooledInstance>,
    free: Vec<PoolHandle>,
    growth_events: u64,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(budget: usize) -> Self {
        let mut pool = Self::new();
        pool.initialize(budget);
        pool
    }

    /// Add `budget` free instances.
    pub fn initialize(&mut self, budget: usize) {
        let start = self.instances.len();
        self.instances
            .extend((0..budget).map(|_| PooledInstance::idle()));
        // Lowest handles are handed out first.
        self.free
            .extend((start..start + budget).rev().map(|i| PoolHandle(i as u32)));
        tracing::debug!(budget, total = self.instances.len(), "pool initialized");
    }

    /// Pop a free handle, growing by one when the pool is exhausted.
    pub fn acquire(&mut self) -> PoolHandle {
        let handle = match self.free.pop() {
            Some(handle) => handle,
            None => {
                let handle = PoolHandle(self.instances.len() as u32);
                self.instances.push(PooledInstance::idle());
                self.growth_events += 1;
                tracing::warn!(
                    total = self.instances.len(),
                    growth_events = self.growth_events,
                    "object pool exhausted, growing"
                );
                handle
            }
        };
        self.instances[handle.index()].free = false;
        handle
    }

    /// Place the instance at `matrix` and show it.
    pub fn bind(
        &mut self,
        handle: PoolHandle,
        id: EntityId,
        matrix: &TransformMatrix,
        shape: BoundingShape,
    ) -> Result<(), PoolError> {
        let instance = self.allocated_mut(handle)?;
        instance.bound = Some(id);
        instance.transform = matrix.decompose();
        instance.shape = shape;
        instance.visible = true;
        Ok(())
    }

    /// Hide and unbind.
    pub fn deactivate(&mut self, handle: PoolHandle) -> Result<(), PoolError> {
        let instance = self.allocated_mut(handle)?;
        instance.visible = false;
        instance.bound = None;
        Ok(())
    }

    pub fn release(&mut self, handle: PoolHandle) -> Result<(), PoolError> {
        let instance = self.allocated_mut(handle)?;
        if instance.visible {
            return Err(PoolError::StillVisible(handle));
        }
        instance.free = true;
        self.free.push(handle);
        Ok(())
    }

    pub fn instance(&self, handle: PoolHandle) -> Option<&PooledInstance> {
        self.instances.get(handle.index())
    }

    /// Instances currently shown, with the entity they stand for.
    pub fn visible(&self) -> impl Iterator<Item = (PoolHandle, &PooledInstance)> {
        self.instances
            .iter()
            .enumerate()
            .filter(|(_, i)| i.visible)
            .map(|(idx, i)| (PoolHandle(idx as u32), i))
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.instances.len(),
            free_count: self.free.len(),
            allocated_count: self.instances.len() - self.free.len(),
            growth_events: self.growth_events,
        }
    }

    fn allocated_mut(&mut self, handle: PoolHandle) -> Result<&mut PooledInstance, PoolError> {
        let instance = self
            .instances
            .get_mut(handle.index())
            .ok_or(PoolError::UnknownHandle(handle))?;
        if instance.free {
            return Err(PoolError::AlreadyFree(handle));
        }
        Ok(instance)
    }
}
