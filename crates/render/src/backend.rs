use std::collections::BTreeMap;
use std::fmt::Write as _;

use groundcover_common::{BoundingShape, TransformMatrix};
use groundcover_kernel::{EntityStore, StoreError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("batch {0:?} was updated before it was initialized")]
    UninitializedBatch(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Instanced batch sink, one batch per entity type.
///
/// A batch must be initialized once before it is updated. Updates replace
/// the whole batch.
pub trait BatchBackend {
    fn initialize_batch(
        &mut self,
        type_name: &str,
        shape: BoundingShape,
        matrices: &[TransformMatrix],
    ) -> Result<(), RenderError>;

    fn update_batch(&mut self, type_name: &str, matrices: &[TransformMatrix]) -> Result<(), RenderError>;
}

impl<B: BatchBackend + ?Sized> BatchBackend for Box<B> {
    fn initialize_batch(
        &mut self,
        type_name: &str,
        shape: BoundingShape,
        matrices: &[TransformMatrix],
    ) -> Result<(), RenderError> {
        (**self).initialize_batch(type_name, shape, matrices)
    }

    fn update_batch(&mut self, type_name: &str, matrices: &[TransformMatrix]) -> Result<(), RenderError> {
        (**self).update_batch(type_name, matrices)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    pub shape: BoundingShape,
    pub matrices: Vec<TransformMatrix>,
    pub initialize_calls: u32,
    pub update_calls: u32,
}

/// Backend that keeps the last batch per type.
#[derive(Debug, Default, Clone)]
pub struct RecordingBackend {
    batches: BTreeMap<String, BatchRecord>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch(&self, type_name: &str) -> Option<&BatchRecord> {
        self.batches.get(type_name)
    }

    /// The batch as the raw column-major float buffer a GPU would receive.
    pub fn batch_bytes(&self, type_name: &str) -> Option<&[u8]> {
        self.batches
            .get(type_name)
            .map(|b| bytemuck::cast_slice(b.matrices.as_slice()))
    }

    pub fn batch_names(&self) -> impl Iterator<Item = &str> {
        self.batches.keys().map(String::as_str)
    }

    /// Total instances across all batches.
    pub fn instance_count(&self) -> usize {
        self.batches.values().map(|b| b.matrices.len()).sum()
    }

    /// Human-readable listing, one line per batch.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "=== Batches ({} types, {} instances) ===",
            self.batches.len(),
            self.instance_count()
        );
        for (name, batch) in &self.batches {
            let _ = writeln!(
                out,
                "  {name}: {} instances (init={}, updates={})",
                batch.matrices.len(),
                batch.initialize_calls,
                batch.update_calls
            );
        }
        out
    }
}

impl BatchBackend for RecordingBackend {
    fn initialize_batch(
        &mut self,
        type_name: &str,
        shape: BoundingShape,
        matrices: &[TransformMatrix],
    ) -> Result<(), RenderError> {
        let entry = self
            .batches
            .entry(type_name.to_string())
            .or_insert_with(|| BatchRecord {
                shape,
                matrices: Vec::new(),
                initialize_calls: 0,
                update_calls: 0,
            });
        entry.shape = shape;
        entry.matrices = matrices.to_vec();
        entry.initialize_calls += 1;
        Ok(())
    }

    fn update_batch(&mut self, type_name: &str, matrices: &[TransformMatrix]) -> Result<(), RenderError> {
        let entry = self
            .batches
            .get_mut(type_name)
            .ok_or_else(|| RenderError::UninitializedBatch(type_name.to_string()))?;
        entry.matrices = matrices.to_vec();
        entry.update_calls += 1;
        Ok(())
    }
}

/// Initialize one batch per type known to the store. Returns the number of batches.
pub fn initialize_all<B>(store: &mut EntityStore, backend: &mut B) -> Result<usize, RenderError>
where
    B: BatchBackend + ?Sized,
{
    let names: Vec<String> = store.type_names().map(str::to_string).collect();
    for name in &names {
        let shape = store
            .bounding_shape(name)
            .ok_or_else(|| StoreError::UnknownType(name.clone()))?;
        let batch = store.recalculate_transform_batch(name)?;
        backend.initialize_batch(name, shape, &batch)?;
    }
    tracing::debug!(batches = names.len(), "render batches initialized");
    Ok(names.len())
}

/// Push fresh batches for every dirty type. Returns the types that were sent.
pub fn sync_dirty<B>(store: &mut EntityStore, backend: &mut B) -> Result<Vec<String>, RenderError>
where
    B: BatchBackend + ?Sized,
{
    let dirty = store.dirty_types();
    for name in &dirty {
        let batch = store.recalculate_transform_batch(name)?;
        backend.update_batch(name, &batch)?;
    }
    if !dirty.is_empty() {
        tracing::debug!(types = dirty.len(), "render batches updated");
    }
    Ok(dirty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use groundcover_common::EntityId;
    use groundcover_kernel::{Dataset, EntityRecord, TypeCatalog};

    fn store() -> EntityStore {
        let records = (0..4)
            .map(|i| {
                EntityRecord::new(
                    EntityId(i),
                    if i < 3 { "oak" } else { "pine" },
                    TransformMatrix::from_translation(Vec3::new(i as f32, 0.0, 0.0)),
                    100.0,
                )
            })
            .collect();
        let catalog = TypeCatalog::new()
            .with_type("oak", BoundingShape::default())
            .with_type(
                "pine",
                BoundingShape::Capsule {
                    center: Vec3::ZERO,
                    radius: 0.4,
                    height: 6.0,
                },
            );
        EntityStore::new(Dataset::new(1, records), &catalog)
    }

    #[test]
    fn initialize_sends_every_type() {
        let mut store = store();
        let mut backend = RecordingBackend::new();
        assert_eq!(initialize_all(&mut store, &mut backend).unwrap(), 2);
        assert_eq!(backend.batch("oak").unwrap().matrices.len(), 3);
        assert_eq!(backend.batch("pine").unwrap().matrices.len(), 1);
        assert!(store.dirty_types().is_empty());
        assert_eq!(backend.instance_count(), 4);
    }

    #[test]
    fn sync_sends_only_dirty_types() {
        let mut store = store();
        let mut backend = RecordingBackend::new();
        initialize_all(&mut store, &mut backend).unwrap();

        store.apply_damage(EntityId(1), 200.0).unwrap();
        store.set_calculation_eligible(EntityId(1), false).unwrap();
        let sent = sync_dirty(&mut store, &mut backend).unwrap();
        assert_eq!(sent, vec!["oak".to_string()]);

        let oak = backend.batch("oak").unwrap();
        assert_eq!(oak.update_calls, 1);
        let xs: Vec<f32> = oak.matrices.iter().map(|m| m.position().x).collect();
        assert_eq!(xs, vec![0.0, 2.0]);
        assert_eq!(backend.batch("pine").unwrap().update_calls, 0);

        assert!(sync_dirty(&mut store, &mut backend).unwrap().is_empty());
    }

    #[test]
    fn batch_bytes_are_raw_floats() {
        let mut store = store();
        let mut backend = RecordingBackend::new();
        initialize_all(&mut store, &mut backend).unwrap();
        let bytes = backend.batch_bytes("pine").unwrap();
        assert_eq!(bytes.len(), 64);
        let x = f32::from_ne_bytes([bytes[48], bytes[49], bytes[50], bytes[51]]);
        assert_eq!(x, 3.0);
    }

    #[test]
    fn update_before_initialize_is_rejected() {
        let mut backend = RecordingBackend::new();
        assert_eq!(
            backend.update_batch("oak", &[]),
            Err(RenderError::UninitializedBatch("oak".into()))
        );
    }

    #[test]
    fn summary_lists_batches() {
        let mut store = store();
        let mut backend = RecordingBackend::new();
        initialize_all(&mut store, &mut backend).unwrap();
        let text = backend.summary();
        assert!(text.contains("2 types, 4 instances"));
        assert!(text.contains("oak: 3 instances"));
    }
}
