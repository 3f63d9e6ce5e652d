/// Errors from planning or serving a transfer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransferError {
    #[error("invalid transfer config: {0}")]
    InvalidConfig(String),
    #[error("a transfer needs at least one segment")]
    ZeroSegments,
    #[error("segment {index} out of range for a {total}-segment transfer")]
    SegmentOutOfRange { index: u32, total: u32 },
    #[error("segment {0} is missing")]
    MissingSegment(u32),
    #[error("transfer needs {total} segments, more than the limit of {max}")]
    TooManySegments { total: u32, max: u32 },
    #[error("compression error: {0}")]
    Compression(String),
}
