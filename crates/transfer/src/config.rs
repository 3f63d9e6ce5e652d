use serde::{Deserialize, Serialize};

use crate::TransferError;

/// How a payload is cut into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPolicy {
    /// Always exactly this many segments.
    FixedCount(u32),
    /// As many segments as needed to keep each under this size.
    MaxSegmentBytes(usize),
}

impl Default for SegmentPolicy {
    fn default() -> Self {
        Self::FixedCount(12)
    }
}

impl SegmentPolicy {
    /// Segment count for a payload of `len` bytes, at least 1.
    pub fn segment_count(&self, len: usize) -> u32 {
        let n = match *self {
            Self::FixedCount(n) => n,
            Self::MaxSegmentBytes(max) => len.div_ceil(max.max(1)) as u32,
        };
        n.max(1)
    }
}

/// Largest compressed payload a receiver is prepared to buffer.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Segment count a receiver accepts by default: the largest payload cut into
/// 16 KiB segments.
pub const DEFAULT_MAX_SEGMENTS: u32 = (MAX_PAYLOAD_BYTES / (16 * 1024)) as u32;

/// Transfer tuning shared by sender and receiver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub segment_policy: SegmentPolicy,
    /// Receive poll interval; one tick per poll.
    pub poll_interval_ms: u64,
    /// Ticks without completion before the session gives up.
    pub timeout_ticks: u32,
    /// Ticks without progress between re-requests.
    pub resync_every: u32,
    /// Non-final segments shorter than this are re-requested.
    pub min_segment_len: usize,
    /// Delay between pushed segments.
    pub push_delay_ms: u64,
    pub zstd_level: i32,
    /// Upper bound on a transfer's segment count. Segments announcing more
    /// are ignored before any buffer is allocated.
    pub max_segments: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            segment_policy: SegmentPolicy::default(),
            poll_interval_ms: 1000,
            timeout_ticks: 100,
            resync_every: 6,
            min_segment_len: 5,
            push_delay_ms: 300,
            zstd_level: 3,
            max_segments: DEFAULT_MAX_SEGMENTS,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        match self.segment_policy {
            SegmentPolicy::FixedCount(0) => {
                return Err(TransferError::InvalidConfig("segment count must be at least 1".into()));
            }
            SegmentPolicy::MaxSegmentBytes(0) => {
                return Err(TransferError::InvalidConfig("max segment bytes must be at least 1".into()));
            }
            _ => {}
        }
        if self.timeout_ticks == 0 || self.resync_every == 0 {
            return Err(TransferError::InvalidConfig(
                "timeout_ticks and resync_every must be at least 1".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(TransferError::InvalidConfig("poll_interval_ms must be positive".into()));
        }
        if self.max_segments == 0 {
            return Err(TransferError::InvalidConfig("max_segments must be at least 1".into()));
        }
        if let SegmentPolicy::FixedCount(n) = self.segment_policy {
            if n > self.max_segments {
                return Err(TransferError::InvalidConfig(format!(
                    "segment count {n} exceeds max_segments {}",
                    self.max_segments
                )));
            }
        }
        Ok(())
    }
}
