use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::PayloadDigest;

/// Identifies one transfer; chosen by the requesting peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// What the payload holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    /// The complete dataset.
    Full,
    /// Only the records that differ from the shared template.
    Diff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferMessage {
    RequestSnapshot {
        transfer: TransferId,
        kind: PayloadKind,
    },
    Segment {
        transfer: TransferId,
        index: u32,
        total: u32,
        digest: PayloadDigest,
        bytes: Vec<u8>,
    },
    RequestSegment {
        transfer: TransferId,
        index: u32,
    },
}

impl TransferMessage {
    pub fn transfer(&self) -> TransferId {
        match self {
            Self::RequestSnapshot { transfer, .. }
            | Self::Segment { transfer, .. }
            | Self::RequestSegment { transfer, .. } => *transfer,
        }
    }
}
