//! Persistence: snapshot codec, save slots, versioned reconciliation.
//!
//! # Invariants
//! - Decoding never yields a partial dataset; malformed bytes are an error.
//! - A save slot whose bytes do not match the integrity manifest fails closed.
//! - Reconciliation keeps template order and length; only health is carried.

pub mod codec;
pub mod loader;
pub mod reconcile;
pub mod save;

pub use codec::{CborCodec, Codec, CodecError};
pub use loader::{FallbackReason, HostLoad, LoadSource, load_host_dataset, persist_dataset};
pub use reconcile::{DatasetReconciler, Reconciliation};
pub use save::{FileSaveStore, MemorySaveStore, SaveError, SaveStore};
