//! Bounded native sample ring buffer with epoch/cursor semantics.
//!
//! The native streaming backends push records into the ring; the pipeline
//! pulls them through a monotonic [`RingCursor`]. When the backend restarts
//! or the buffer is cleared the epoch counter increments, invalidating every
//! outstanding cursor. Cursor invalidation is a hard reset-and-resync, never
//! undefined behavior.

use crate::sample::NativeSample;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RingError {
    #[error("cursor epoch {cursor_epoch} does not match ring epoch {ring_epoch}")]
    CursorInvalidated { cursor_epoch: u64, ring_epoch: u64 },
}

/// Read position into a [`NativeSampleRing`].
///
/// A cursor is only valid for the epoch it was created in. `next_seq` is the
/// sequence number of the next unread record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursor {
    pub epoch: u64,
    pub next_seq: u64,
}

/// Result of draining the ring from a cursor.
#[derive(Debug, Default)]
pub struct RingRead {
    /// Unread records in sequence order.
    pub samples: Vec<NativeSample>,
    /// Records lost to overwrite before the reader caught up.
    pub dropped: u64,
}

/// Bounded ring of native samples with monotonic sequence numbers.
///
/// Single writer (the native input callback), single reader (the pipeline).
/// Capacity is rounded up to a power of two.
pub struct NativeSampleRing {
    slots: Vec<Option<NativeSample>>,
    capacity: usize,
    /// Sequence number the next push will receive.
    next_seq: u64,
    epoch: u64,
}

impl NativeSampleRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            slots: vec![None; capacity],
            capacity,
            next_seq: 0,
            epoch: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Sequence number of the oldest record still held.
    #[inline]
    pub fn oldest_seq(&self) -> u64 {
        self.next_seq.saturating_sub(self.capacity as u64)
    }

    /// Push a record, assigning its sequence number. Overwrites the oldest
    /// record when full. Returns the assigned sequence number.
    pub fn push(&mut self, mut sample: NativeSample) -> u64 {
        let seq = self.next_seq;
        sample.seq = seq;
        let slot = (seq % self.capacity as u64) as usize;
        self.slots[slot] = Some(sample);
        self.next_seq += 1;
        seq
    }

    /// Drop all content and invalidate every outstanding cursor.
    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.next_seq = 0;
        self.epoch += 1;
        debug!(epoch = self.epoch, "native ring cleared");
    }

    /// A cursor at the current write head (reads nothing until new pushes).
    pub fn head_cursor(&self) -> RingCursor {
        RingCursor {
            epoch: self.epoch,
            next_seq: self.next_seq,
        }
    }

    /// A cursor at the oldest retained record.
    pub fn tail_cursor(&self) -> RingCursor {
        RingCursor {
            epoch: self.epoch,
            next_seq: self.oldest_seq(),
        }
    }

    /// Drain every unread record, advancing the cursor.
    ///
    /// Errors with [`RingError::CursorInvalidated`] when the cursor belongs
    /// to a previous epoch; the caller must resync via [`Self::tail_cursor`]
    /// (or [`Self::head_cursor`]) and report the reset. If the reader lagged
    /// behind a wraparound, the lost count is reported in
    /// [`RingRead::dropped`] and reading resumes at the oldest survivor.
    pub fn read_from(&self, cursor: &mut RingCursor) -> Result<RingRead, RingError> {
        if cursor.epoch != self.epoch {
            return Err(RingError::CursorInvalidated {
                cursor_epoch: cursor.epoch,
                ring_epoch: self.epoch,
            });
        }

        let mut read = RingRead::default();
        let oldest = self.oldest_seq();
        if cursor.next_seq < oldest {
            read.dropped = oldest - cursor.next_seq;
            cursor.next_seq = oldest;
        }

        while cursor.next_seq < self.next_seq {
            let slot = (cursor.next_seq % self.capacity as u64) as usize;
            if let Some(sample) = self.slots[slot] {
                read.samples.push(sample);
            }
            cursor.next_seq += 1;
        }

        Ok(read)
    }
}
