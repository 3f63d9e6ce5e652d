use std::io::Write;

use crate::{PayloadDigest, PayloadKind, SegmentPlan, SegmentPolicy, TransferError, TransferId, TransferMessage};

/// Send side of one transfer: the payload is compressed and split once, then
/// served in push order or by index.
#[derive(Debug, Clone)]
pub struct OutboundTransfer {
    id: TransferId,
    kind: PayloadKind,
    plan: SegmentPlan,
    digest: PayloadDigest,
    cursor: u32,
}

impl OutboundTransfer {
    pub fn new(
        id: TransferId,
        kind: PayloadKind,
        payload: &[u8],
        policy: SegmentPolicy,
        zstd_level: i32,
    ) -> Result<Self, TransferError> {
        let wire = compress(payload, zstd_level)?;
        let digest = PayloadDigest::of(&wire);
        let count = policy.segment_count(wire.len());
        let plan = SegmentPlan::new(wire, count)?;
        tracing::debug!(
            transfer = %id,
            ?kind,
            raw = payload.len(),
            wire = plan.payload().len(),
            segments = count,
            "outbound transfer prepared"
        );
        Ok(Self {
            id,
            kind,
            plan,
            digest,
            cursor: 0,
        })
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    pub fn total(&self) -> u32 {
        self.plan.count()
    }

    pub fn digest(&self) -> PayloadDigest {
        self.digest
    }

    /// Next segment in push order, `None` once all were pushed.
    pub fn next_push(&mut self) -> Option<TransferMessage> {
        if self.cursor >= self.plan.count() {
            return None;
        }
        let index = self.cursor;
        self.cursor += 1;
        self.segment_message(index).ok()
    }

    pub fn is_push_complete(&self) -> bool {
        self.cursor >= self.plan.count()
    }

    /// Restart push mode from the first segment.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Pull mode: the segment at `index`.
    pub fn segment_message(&self, index: u32) -> Result<TransferMessage, TransferError> {
        let bytes = self
            .plan
            .segment(index)
            .ok_or(TransferError::SegmentOutOfRange {
                index,
                total: self.plan.count(),
            })?;
        Ok(TransferMessage::Segment {
            transfer: self.id,
            index,
            total: self.plan.count(),
            digest: self.digest,
            bytes: bytes.to_vec(),
        })
    }
}

fn compress(data: &[u8], level: i32) -> Result<Vec<u8>, TransferError> {
    let run = || -> std::io::Result<Vec<u8>> {
        let mut encoder = zstd::Encoder::new(Vec::new(), level)?;
        encoder.write_all(data)?;
        encoder.finish()
    };
    run().map_err(|e| TransferError::Compression(e.to_string()))
}
