//! Chunked transfer of a serialized snapshot (or a diff of it) over a lossy,
//! unordered channel.
//!
//! # Invariants
//! - Reassembly concatenates slots by ascending index; arrival order is irrelevant.
//! - A completed payload always matches the digest announced by its segments.
//! - Each receive session reports exactly one terminal outcome.
//! - A receiver never buffers more than `max_segments` slots.

mod config;
mod digest;
mod error;
mod message;
mod receiver;
mod segment;
mod sender;

pub use config::{DEFAULT_MAX_SEGMENTS, MAX_PAYLOAD_BYTES, SegmentPolicy, TransferConfig};
pub use digest::PayloadDigest;
pub use error::TransferError;
pub use message::{PayloadKind, TransferId, TransferMessage};
pub use receiver::{IgnoreReason, ReceiveSession, ResyncAction, SegmentAck, TickOutcome, TransferFailure};
pub use segment::{SegmentPlan, reassemble};
pub use sender::OutboundTransfer;
