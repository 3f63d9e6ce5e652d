//! Shared types for groundcover.
//!
//! # Invariants
//! - Entity ids are array indices and are never reused.
//! - Transform encodings round-trip exactly (encode → decode → encode is stable).

mod matrix;
mod types;

pub use matrix::TransformMatrix;
pub use types::{BoundingShape, CellId, EntityId, PeerId, Transform};

/// Errors raised while decoding shared value types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommonError {
    #[error("unsupported transform encoding tag: {0:?}")]
    UnsupportedEncoding(String),
    #[error("transform encoding has {found} components, expected 16")]
    ComponentCount { found: usize },
    #[error("invalid float {value:?} at component {index}")]
    InvalidFloat { index: usize, value: String },
    #[error("transform byte buffer has length {0}, expected 64")]
    ByteLength(usize),
}
