use std::io::Read;

use crate::{PayloadDigest, PayloadKind, TransferConfig, TransferId, TransferMessage, reassemble};

/// What happened to one inbound segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentAck {
    Filled { index: u32, received: u32, total: u32 },
    /// An implausibly short slot was overwritten by a fuller copy.
    Replaced { index: u32 },
    Duplicate { index: u32 },
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    NotASegment,
    ForeignTransfer(TransferId),
    IndexOutOfRange { index: u32, total: u32 },
    TotalMismatch { expected: u32, found: u32 },
    TooManySegments { total: u32, max: u32 },
    DigestMismatch,
    Finished,
}

/// Requests the receiver wants sent back to the host.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResyncAction {
    #[default]
    None,
    /// Nothing arrived yet; ask for the whole transfer again.
    RequestSnapshot(TransferMessage),
    RequestSegments(Vec<TransferMessage>),
}

impl ResyncAction {
    pub fn into_messages(self) -> Vec<TransferMessage> {
        match self {
            Self::None => Vec::new(),
            Self::RequestSnapshot(m) => vec![m],
            Self::RequestSegments(ms) => ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFailure {
    DigestMismatch {
        expected: PayloadDigest,
        actual: PayloadDigest,
    },
    Decode(String),
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Pending(ResyncAction),
    /// The decompressed payload.
    Completed(Vec<u8>),
    TimedOut,
    Failed(TransferFailure),
    /// A terminal outcome was already reported.
    Closed,
}

impl TickOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::TimedOut | Self::Failed(_))
    }
}

/// Receive side of one transfer. Fed segments as they arrive and polled once
/// per tick.
#[derive(Debug)]
pub struct ReceiveSession {
    transfer: TransferId,
    kind: PayloadKind,
    timeout_ticks: u32,
    resync_every: u32,
    min_segment_len: usize,
    max_segments: u32,
    expected: Option<u32>,
    digest: Option<PayloadDigest>,
    slots: Vec<Option<Vec<u8>>>,
    received: u32,
    elapsed_ticks: u32,
    resync_ticks: u32,
    finished: bool,
}

impl ReceiveSession {
    pub fn new(transfer: TransferId, kind: PayloadKind, config: &TransferConfig) -> Self {
        Self {
            transfer,
            kind,
            timeout_ticks: config.timeout_ticks,
            resync_every: config.resync_every,
            min_segment_len: config.min_segment_len,
            max_segments: config.max_segments,
            expected: None,
            digest: None,
            slots: Vec::new(),
            received: 0,
            elapsed_ticks: 0,
            resync_ticks: 0,
            finished: false,
        }
    }

    pub fn transfer(&self) -> TransferId {
        self.transfer
    }

    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// The initial request that opens this transfer.
    pub fn request(&self) -> TransferMessage {
        TransferMessage::RequestSnapshot {
            transfer: self.transfer,
            kind: self.kind,
        }
    }

    pub fn expected(&self) -> Option<u32> {
        self.expected
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn elapsed_ticks(&self) -> u32 {
        self.elapsed_ticks
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_complete(&self) -> bool {
        self.expected.is_some_and(|n| self.received == n)
    }

    pub fn on_segment(&mut self, message: &TransferMessage) -> SegmentAck {
        let TransferMessage::Segment {
            transfer,
            index,
            total,
            digest,
            bytes,
        } = message
        else {
            return self.ignore(IgnoreReason::NotASegment);
        };
        let (index, total) = (*index, *total);
        if *transfer != self.transfer {
            return self.ignore(IgnoreReason::ForeignTransfer(*transfer));
        }
        if self.finished {
            return self.ignore(IgnoreReason::Finished);
        }

        let expected = match self.expected {
            Some(expected) => expected,
            None => {
                if total == 0 {
                    return self.ignore(IgnoreReason::IndexOutOfRange { index, total });
                }
                if total > self.max_segments {
                    tracing::warn!(transfer = %self.transfer, total, max = self.max_segments, "segment count over limit");
                    return self.ignore(IgnoreReason::TooManySegments {
                        total,
                        max: self.max_segments,
                    });
                }
                self.expected = Some(total);
                self.digest = Some(*digest);
                self.slots = vec![None; total as usize];
                total
            }
        };
        if total != expected {
            return self.ignore(IgnoreReason::TotalMismatch {
                expected,
                found: total,
            });
        }
        if index >= expected {
            return self.ignore(IgnoreReason::IndexOutOfRange { index, total });
        }
        if self.digest != Some(*digest) {
            return self.ignore(IgnoreReason::DigestMismatch);
        }

        let short = self.is_short(index);
        let slot = &mut self.slots[index as usize];
        match slot {
            Some(existing) => {
                if short && bytes.len() > existing.len() {
                    *existing = bytes.clone();
                    self.resync_ticks = 0;
                    tracing::debug!(transfer = %self.transfer, index, "short segment replaced");
                    SegmentAck::Replaced { index }
                } else {
                    tracing::warn!(transfer = %self.transfer, index, "duplicate segment ignored");
                    SegmentAck::Duplicate { index }
                }
            }
            None => {
                *slot = Some(bytes.clone());
                self.received += 1;
                self.resync_ticks = 0;
                tracing::trace!(transfer = %self.transfer, index, received = self.received, total, "segment received");
                SegmentAck::Filled {
                    index,
                    received: self.received,
                    total,
                }
            }
        }
    }

    /// One poll: complete, time out, or ask for what is missing.
    pub fn tick(&mut self) -> TickOutcome {
        if self.finished {
            return TickOutcome::Closed;
        }
        if self.is_complete() {
            self.finished = true;
            return self.finish();
        }

        self.elapsed_ticks += 1;
        self.resync_ticks += 1;
        if self.elapsed_ticks >= self.timeout_ticks {
            self.finished = true;
            tracing::error!(
                transfer = %self.transfer,
                received = self.received,
                expected = ?self.expected,
                ticks = self.elapsed_ticks,
                "transfer timed out"
            );
            return TickOutcome::TimedOut;
        }
        if self.resync_ticks < self.resync_every {
            return TickOutcome::Pending(ResyncAction::None);
        }
        self.resync_ticks = 0;

        if self.expected.is_none() {
            tracing::debug!(transfer = %self.transfer, "nothing received, re-requesting snapshot");
            return TickOutcome::Pending(ResyncAction::RequestSnapshot(self.request()));
        }
        let requests: Vec<TransferMessage> = (0..self.slots.len() as u32)
            .filter(|i| self.slots[*i as usize].is_none() || self.is_short(*i))
            .map(|index| TransferMessage::RequestSegment {
                transfer: self.transfer,
                index,
            })
            .collect();
        tracing::debug!(transfer = %self.transfer, missing = requests.len(), "re-requesting segments");
        TickOutcome::Pending(ResyncAction::RequestSegments(requests))
    }

    fn finish(&mut self) -> TickOutcome {
        let wire = match reassemble(&self.slots) {
            Ok(wire) => wire,
            Err(e) => return TickOutcome::Failed(TransferFailure::Decode(e.to_string())),
        };
        let actual = PayloadDigest::of(&wire);
        match self.digest {
            Some(expected) if expected != actual => {
                tracing::error!(transfer = %self.transfer, %expected, %actual, "transfer digest mismatch");
                return TickOutcome::Failed(TransferFailure::DigestMismatch { expected, actual });
            }
            _ => {}
        }
        match decompress(&wire) {
            Ok(payload) => {
                tracing::info!(
                    transfer = %self.transfer,
                    kind = ?self.kind,
                    segments = self.received,
                    bytes = payload.len(),
                    ticks = self.elapsed_ticks,
                    "transfer completed"
                );
                TickOutcome::Completed(payload)
            }
            Err(e) => {
                tracing::error!(transfer = %self.transfer, error = %e, "transfer payload failed to decompress");
                TickOutcome::Failed(TransferFailure::Decode(e.to_string()))
            }
        }
    }

    /// Filled but implausibly short; the last slot is exempt.
    fn is_short(&self, index: u32) -> bool {
        let last = self.slots.len().saturating_sub(1);
        index as usize != last
            && self.slots[index as usize]
                .as_ref()
                .is_some_and(|b| b.len() < self.min_segment_len)
    }

    fn ignore(&self, reason: IgnoreReason) -> SegmentAck {
        tracing::debug!(transfer = %self.transfer, ?reason, "segment ignored");
        SegmentAck::Ignored(reason)
    }
}

fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}
