//! Streaming: spatial grid index, pooled instances, observer-driven cells.
//!
//! # Invariants
//! - A cell exists only if at least one record maps into it, and every record
//!   resolves to the cell that lists it.
//! - `free + allocated == total` in the pool at all times; the pool never shrinks.
//! - A refresh with unchanged observers and store changes nothing.
//! - Streaming never mutates entity records.

mod controller;
mod grid;
mod pool;

pub use controller::{
    Observer, ObserverPoint, RefreshReport, StreamConfig, StreamError, StreamStats,
    StreamingController,
};
pub use grid::{CellCoord, GenerationError, GridConfig, SpatialCell, SpatialIndex};
pub use pool::{ObjectPool, PoolError, PoolHandle, PoolStats, PooledInstance};
