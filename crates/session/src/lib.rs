//! Sessions: configuration, load phases, host and client roles, the wire
//! protocol and the async tasks that drive a peer.
//!
//! # Invariants
//! - A world is built only by walking [`LoadPhase`]s in order; `refresh` is
//!   rejected before `Ready`.
//! - The host is authoritative. Clients never persist and only mirror
//!   `Destroyed`/`Resync` broadcasts.
//! - Broadcasts that reach a client before its world exists are replayed in
//!   arrival order once it does.
//! - A client's [`ReadyGate`] opens at most once and never after a timed-out
//!   or failed transfer.

mod client;
mod config;
mod error;
mod host;
mod phase;
mod protocol;
mod runtime;
mod transport;
mod world;

pub use client::{ClientPoll, ClientRole};
pub use config::GroundcoverConfig;
pub use error::SessionError;
pub use host::{HostRole, Outgoing};
pub use phase::{LoadPhase, LoadTracker};
pub use protocol::WireMessage;
pub use runtime::{
    Persistable, ReadyGate, Refreshable, drive_receive, push_segments, run_autosave,
    run_refresh_loop,
};
pub use transport::{LoopbackEndpoint, LoopbackNetwork, LossPolicy, NetworkStats, Transport};
pub use world::{Persistence, WorldSession};
