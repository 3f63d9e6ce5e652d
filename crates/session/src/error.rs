use groundcover_kernel::StoreError;
use groundcover_persist::CodecError;
use groundcover_render::RenderError;
use groundcover_stream::{GenerationError, StreamError};
use groundcover_transfer::TransferError;

use crate::LoadPhase;

/// Errors surfaced by sessions and roles.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("illegal load transition {from:?} -> {to:?}")]
    IllegalTransition { from: LoadPhase, to: LoadPhase },
    #[error("world is not ready (phase {0:?})")]
    NotReady(LoadPhase),
    #[error("no transfer in progress")]
    NoTransfer,
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}
