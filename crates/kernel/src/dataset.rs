use glam::Vec3;
use groundcover_common::{EntityId, TransformMatrix};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// One persistent world entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    /// Key into the type catalog.
    pub type_name: String,
    pub transform: TransformMatrix,
    /// `<= 0` means destroyed.
    pub health: f32,
    /// Whether the record currently takes part in streaming and batching.
    #[serde(skip)]
    pub calculation_eligible: bool,
}

impl EntityRecord {
    pub fn new(id: EntityId, type_name: impl Into<String>, transform: TransformMatrix, health: f32) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            transform,
            health,
            calculation_eligible: false,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position()
    }

    pub fn is_destroyed(&self) -> bool {
        self.health <= 0.0
    }

    /// Eligible for calculation and still alive.
    pub fn is_active(&self) -> bool {
        self.calculation_eligible && !self.is_destroyed()
    }

    /// Compares the serialized fields only.
    pub fn same_persistent_state(&self, other: &EntityRecord) -> bool {
        self.id == other.id
            && self.type_name == other.type_name
            && self.transform == other.transform
            && self.health.to_bits() == other.health.to_bits()
    }
}

/// The serialized snapshot: a versioned, fixed-length record array.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub version: u32,
    pub records: Vec<EntityRecord>,
}

impl Dataset {
    pub fn new(version: u32, records: Vec<EntityRecord>) -> Self {
        Self { version, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityRecord> {
        self.records.get(id.index())
    }

    /// Every record id must equal its index.
    pub fn validate(&self) -> Result<(), StoreError> {
        for (index, record) in self.records.iter().enumerate() {
            if record.id.index() != index {
                return Err(StoreError::IdMismatch {
                    index,
                    id: record.id,
                });
            }
        }
        Ok(())
    }

    /// Records that differ from `template`, for diff-only sync.
    pub fn diff_against(&self, template: &Dataset) -> Result<DatasetDiff, StoreError> {
        if self.len() != template.len() {
            return Err(StoreError::DiffLengthMismatch {
                expected: self.len(),
                found: template.len(),
            });
        }
        let changed = self
            .records
            .iter()
            .zip(&template.records)
            .filter(|(ours, base)| !ours.same_persistent_state(base))
            .map(|(ours, _)| ours.clone())
            .collect();
        Ok(DatasetDiff {
            base_len: template.len() as u32,
            version: self.version,
            changed,
        })
    }

    /// Overlay `diff` onto this template.
    pub fn apply_diff(mut self, diff: &DatasetDiff) -> Result<Dataset, StoreError> {
        if diff.base_len as usize != self.len() {
            return Err(StoreError::DiffLengthMismatch {
                expected: diff.base_len as usize,
                found: self.len(),
            });
        }
        for record in &diff.changed {
            let slot = self
                .records
                .get_mut(record.id.index())
                .ok_or(StoreError::UnknownEntity(record.id))?;
            *slot = record.clone();
        }
        self.version = diff.version;
        Ok(self)
    }
}

/// Records changed relative to a template of `base_len` records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetDiff {
    pub base_len: u32,
    pub version: u32,
    pub changed: Vec<EntityRecord>,
}
