use std::collections::{BTreeMap, BTreeSet};

use groundcover_common::{BoundingShape, EntityId, TransformMatrix};
use serde::{Deserialize, Serialize};

use crate::{Dataset, EntityRecord, StoreError};

/// Prototype table: bounding shape per entity type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeCatalog {
    types: BTreeMap<String, BoundingShape>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, name: impl Into<String>, shape: BoundingShape) -> Self {
        self.insert(name, shape);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, shape: BoundingShape) {
        self.types.insert(name.into(), shape);
    }

    pub fn get(&self, name: &str) -> Option<&BoundingShape> {
        self.types.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Per-type bookkeeping derived from the dataset at load time.
#[derive(Debug, Clone)]
pub struct RuntimeTypeData {
    pub bounding_shape: BoundingShape,
    /// Ids of this type that were alive at load, in dataset order.
    pub members: Vec<EntityId>,
    /// Last batch produced by [`EntityStore::recalculate_transform_batch`].
    pub render_matrices: Vec<TransformMatrix>,
    pub dirty: bool,
}

impl RuntimeTypeData {
    fn new(bounding_shape: BoundingShape) -> Self {
        Self {
            bounding_shape,
            members: Vec::new(),
            render_matrices: Vec::new(),
            dirty: true,
        }
    }
}

/// Mutation record produced by every store operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    Damaged { id: EntityId, old: f32, new: f32 },
    /// Health crossed from positive to zero or below.
    Destroyed { id: EntityId },
    HealthSet { id: EntityId, health: f32 },
    EligibilityChanged { id: EntityId, eligible: bool },
}

/// Result of [`EntityStore::apply_damage`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageReport {
    pub id: EntityId,
    pub health: f32,
    /// True only on the call that took health to `<= 0`.
    pub destroyed: bool,
}

/// Owner of the canonical record array and the per-type runtime index.
///
/// The array is only mutated through damage, health and eligibility calls;
/// reads used to build render batches see those writes immediately.
#[derive(Debug, Clone)]
pub struct EntityStore {
    dataset: Dataset,
    runtime: BTreeMap<String, RuntimeTypeData>,
    missing_types: BTreeSet<String>,
    events: Vec<StoreEvent>,
}

impl EntityStore {
    /// Build the runtime index for `dataset`.
    ///
    /// Living records of a catalogued type become calculation-eligible. Records
    /// of a type missing from the catalog stay ineligible; the type is logged
    /// once and the remaining types load normally.
    pub fn new(mut dataset: Dataset, catalog: &TypeCatalog) -> Self {
        let mut runtime: BTreeMap<String, RuntimeTypeData> = catalog
            .types
            .iter()
            .map(|(name, shape)| (name.clone(), RuntimeTypeData::new(*shape)))
            .collect();
        let mut missing_types = BTreeSet::new();

        for record in &mut dataset.records {
            record.calculation_eligible = false;
            if record.is_destroyed() {
                continue;
            }
            match runtime.get_mut(&record.type_name) {
                Some(data) => {
                    record.calculation_eligible = true;
                    data.members.push(record.id);
                }
                None => {
                    if missing_types.insert(record.type_name.clone()) {
                        tracing::error!(
                            type_name = %record.type_name,
                            "no runtime data for entity type; its entities will not stream"
                        );
                    }
                }
            }
        }

        tracing::info!(
            records = dataset.len(),
            types = runtime.len(),
            missing = missing_types.len(),
            "entity store built"
        );

        Self {
            dataset,
            runtime,
            missing_types,
            events: Vec::new(),
        }
    }

    pub fn version(&self) -> u32 {
        self.dataset.version
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }

    pub fn records(&self) -> &[EntityRecord] {
        &self.dataset.records
    }

    pub fn record(&self, id: EntityId) -> Option<&EntityRecord> {
        self.dataset.get(id)
    }

    fn record_mut(&mut self, id: EntityId) -> Result<&mut EntityRecord, StoreError> {
        self.dataset
            .records
            .get_mut(id.index())
            .ok_or(StoreError::UnknownEntity(id))
    }

    pub fn runtime_type(&self, type_name: &str) -> Option<&RuntimeTypeData> {
        self.runtime.get(type_name)
    }

    pub fn bounding_shape(&self, type_name: &str) -> Option<BoundingShape> {
        self.runtime.get(type_name).map(|d| d.bounding_shape)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.runtime.keys().map(String::as_str)
    }

    /// Types referenced by records but absent from the catalog.
    pub fn missing_types(&self) -> &BTreeSet<String> {
        &self.missing_types
    }

    /// Types whose batch changed since it was last recalculated.
    pub fn dirty_types(&self) -> Vec<String> {
        self.runtime
            .iter()
            .filter(|(_, d)| d.dirty)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Subtract `amount` from the record's health.
    ///
    /// When this takes health to `<= 0` the caller is responsible for
    /// clearing calculation eligibility and reloading the record's cell.
    pub fn apply_damage(&mut self, id: EntityId, amount: f32) -> Result<DamageReport, StoreError> {
        let record = self.record_mut(id)?;
        let old = record.health;
        record.health -= amount;
        let new = record.health;
        let destroyed = old > 0.0 && new <= 0.0;
        let type_name = record.type_name.clone();

        self.events.push(StoreEvent::Damaged { id, old, new });
        if destroyed {
            tracing::debug!(%id, "entity destroyed");
            self.mark_dirty(&type_name);
            self.events.push(StoreEvent::Destroyed { id });
        }
        Ok(DamageReport {
            id,
            health: new,
            destroyed,
        })
    }

    /// Overwrite health, e.g. when a replacement object reports back.
    pub fn set_health(&mut self, id: EntityId, health: f32) -> Result<(), StoreError> {
        let record = self.record_mut(id)?;
        record.health = health;
        let type_name = record.type_name.clone();
        self.mark_dirty(&type_name);
        self.events.push(StoreEvent::HealthSet { id, health });
        Ok(())
    }

    /// Returns whether the flag changed.
    pub fn set_calculation_eligible(&mut self, id: EntityId, eligible: bool) -> Result<bool, StoreError> {
        let record = self.record_mut(id)?;
        if record.calculation_eligible == eligible {
            return Ok(false);
        }
        record.calculation_eligible = eligible;
        let type_name = record.type_name.clone();
        self.mark_dirty(&type_name);
        self.events.push(StoreEvent::EligibilityChanged { id, eligible });
        Ok(true)
    }

    fn mark_dirty(&mut self, type_name: &str) {
        if let Some(data) = self.runtime.get_mut(type_name) {
            data.dirty = true;
        }
    }

    /// Transforms of every active member of `type_name`, in member-list order.
    ///
    /// The order is stable between calls so a backend can keep its internal
    /// indices across incremental updates.
    pub fn recalculate_transform_batch(&mut self, type_name: &str) -> Result<Vec<TransformMatrix>, StoreError> {
        let data = self
            .runtime
            .get_mut(type_name)
            .ok_or_else(|| StoreError::UnknownType(type_name.to_string()))?;
        let records = &self.dataset.records;
        let batch: Vec<TransformMatrix> = data
            .members
            .iter()
            .filter_map(|id| records.get(id.index()))
            .filter(|r| r.is_active())
            .map(|r| r.transform)
            .collect();
        data.render_matrices = batch.clone();
        data.dirty = false;
        Ok(batch)
    }

    /// Drain and return the mutation log.
    pub fn drain_events(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[StoreEvent] {
        &self.events
    }

    /// Deterministic hash of the persistent state, for host/client comparison.
    pub fn state_hash(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
        let mix = |h: &mut u64, bytes: &[u8]| {
            for &b in bytes {
                *h ^= b as u64;
                *h = h.wrapping_mul(0x0100_0000_01b3);
            }
        };
        mix(&mut h, &self.dataset.version.to_le_bytes());
        for record in &self.dataset.records {
            mix(&mut h, &record.id.0.to_le_bytes());
            mix(&mut h, record.type_name.as_bytes());
            mix(&mut h, &record.transform.encode_bytes());
            mix(&mut h, &record.health.to_le_bytes());
        }
        h
    }
}
