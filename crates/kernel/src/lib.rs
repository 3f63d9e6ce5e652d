//! Entity kernel: the canonical entity array and its derived per-type index.
//!
//! # Invariants
//! - The record array length is fixed once a dataset is built. Destroyed
//!   entities stay in place as zero-health tombstones so ids stay valid.
//! - All mutations flow through [`EntityStore`] and are logged as [`StoreEvent`]s.
//! - Per-type member lists keep their load order; render batches derive from it.

pub mod dataset;
pub mod store;

pub use dataset::{Dataset, DatasetDiff, EntityRecord};
pub use store::{DamageReport, EntityStore, RuntimeTypeData, StoreEvent, TypeCatalog};

use groundcover_common::EntityId;

/// Errors from dataset and store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("no runtime data for type {0:?}")]
    UnknownType(String),
    #[error("record at index {index} carries id {id}")]
    IdMismatch { index: usize, id: EntityId },
    #[error("diff was computed against {expected} records, template has {found}")]
    DiffLengthMismatch { expected: usize, found: usize },
}
