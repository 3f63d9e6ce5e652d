//! Rendering adapter: per-type instanced batches derived from the entity store.
//!
//! # Invariants
//! - Backends only read batches; they never mutate entity records.
//! - A batch lists the active members of one type in member-list order.
//!
//! The real GPU and collision backends live outside this workspace. The
//! [`RecordingBackend`] keeps what it was sent so batches can be inspected.

mod backend;

pub use backend::{BatchBackend, BatchRecord, RecordingBackend, RenderError, initialize_all, sync_dirty};
