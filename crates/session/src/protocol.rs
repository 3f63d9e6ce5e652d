use groundcover_common::EntityId;
use groundcover_persist::{CborCodec, Codec};
use groundcover_transfer::TransferMessage;
use serde::{Deserialize, Serialize};

use crate::SessionError;

/// Everything that crosses the wire between host and clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    Transfer(TransferMessage),
    /// Client asks the host to damage an entity.
    Damage { id: EntityId, amount: f32 },
    /// Host tells clients an entity was destroyed.
    Destroyed { id: EntityId },
    /// Host tells clients to re-enable and re-allocate these entities.
    Resync { ids: Vec<EntityId> },
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>, SessionError> {
        Ok(CborCodec::plain().encode(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SessionError> {
        Ok(CborCodec::plain().decode(bytes)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Transfer(TransferMessage::RequestSnapshot { .. }) => "request_snapshot",
            Self::Transfer(TransferMessage::Segment { .. }) => "segment",
            Self::Transfer(TransferMessage::RequestSegment { .. }) => "request_segment",
            Self::Damage { .. } => "damage",
            Self::Destroyed { .. } => "destroyed",
            Self::Resync { .. } => "resync",
        }
    }
}

impl From<TransferMessage> for WireMessage {
    fn from(message: TransferMessage) -> Self {
        Self::Transfer(message)
    }
}
