use crate::TransferError;

/// A payload cut into `count` slices of `ceil(len / count)` bytes; the last
/// slice is truncated and trailing slices may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    payload: Vec<u8>,
    count: u32,
    slice_len: usize,
}

impl SegmentPlan {
    pub fn new(payload: Vec<u8>, count: u32) -> Result<Self, TransferError> {
        if count == 0 {
            return Err(TransferError::ZeroSegments);
        }
        let slice_len = payload.len().div_ceil(count as usize);
        Ok(Self {
            payload,
            count,
            slice_len,
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn segment(&self, index: u32) -> Option<&[u8]> {
        if index >= self.count {
            return None;
        }
        let len = self.payload.len();
        let start = (index as usize * self.slice_len).min(len);
        let end = (start + self.slice_len).min(len);
        Some(&self.payload[start..end])
    }
}

/// Concatenate filled slots by ascending index.
pub fn reassemble(slots: &[Option<Vec<u8>>]) -> Result<Vec<u8>, TransferError> {
    let mut out = Vec::with_capacity(slots.iter().flatten().map(Vec::len).sum());
    for (index, slot) in slots.iter().enumerate() {
        let bytes = slot
            .as_ref()
            .ok_or(TransferError::MissingSegment(index as u32))?;
        out.extend_from_slice(bytes);
    }
    Ok(out)
}
