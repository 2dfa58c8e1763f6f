//! Lock-free bounded SPSC ring of variable-length frames.
//!
//! Each frame is a little-endian `u32` length followed by the payload, padded
//! to [`RECORD_ALIGN`]. When a frame does not fit before the end of the
//! storage the producer writes [`WRAP_MARKER`] (or, with fewer than 4 bytes
//! left, nothing) and restarts at offset 0.
//!
//! `head` and `tail` are wrapping byte counters; their difference is the
//! number of bytes in use.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use crate::layout::{record_size, RECORD_ALIGN, WRAP_MARKER};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    #[error("ring is full")]
    Full,
    #[error("frame larger than the ring")]
    TooLarge,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    #[error("ring is empty")]
    Empty,
    /// A length field points past the committed data.
    #[error("ring contents are corrupt")]
    Corrupt,
}

pub struct FrameRing {
    cap: u32,
    head: AtomicU32,
    tail: AtomicU32,
    storage: Box<[UnsafeCell<u8>]>,
}

// The producer only writes bytes in `[tail, head + cap)` and the consumer only
// reads bytes in `[head, tail)`; the atomics order the hand-off. Callers
// guarantee a single producer and a single consumer.
unsafe impl Send for FrameRing {}
unsafe impl Sync for FrameRing {}

impl FrameRing {
    pub fn new(capacity_bytes: usize) -> Self {
        assert!(capacity_bytes > 0);
        assert_eq!(capacity_bytes % RECORD_ALIGN, 0);
        assert!(capacity_bytes < u32::MAX as usize);
        let storage = (0..capacity_bytes).map(|_| UnsafeCell::new(0u8)).collect();
        Self {
            cap: capacity_bytes as u32,
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            storage,
        }
    }

    pub fn capacity_bytes(&self) -> usize {
        self.cap as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Largest payload that can ever be pushed.
    pub fn max_payload_len(&self) -> usize {
        (self.cap as usize).saturating_sub(4 + (RECORD_ALIGN - 1))
    }

    pub fn try_push(&self, payload: &[u8]) -> Result<(), PushError> {
        let size = record_size(payload.len());
        if payload.len() > u32::MAX as usize - 4 || size > self.cap as usize {
            return Err(PushError::TooLarge);
        }

        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        let free = self.cap - tail.wrapping_sub(head);

        let tail_index = (tail % self.cap) as usize;
        let remaining = self.cap as usize - tail_index;
        let (padding, write_wrap_marker) = if remaining < 4 {
            (remaining, false)
        } else if remaining < size {
            (remaining, true)
        } else {
            (0, false)
        };

        if (padding + size) as u32 > free {
            return Err(PushError::Full);
        }

        if write_wrap_marker {
            self.write_u32(tail_index, WRAP_MARKER);
        }
        let start = if padding > 0 { 0 } else { tail_index };
        self.write_u32(start, payload.len() as u32);
        self.write_bytes(start + 4, payload);

        self.tail
            .store(tail.wrapping_add((padding + size) as u32), Ordering::Release);
        Ok(())
    }

    pub fn try_pop(&self) -> Result<Vec<u8>, PopError> {
        loop {
            let head = self.head.load(Ordering::Relaxed);
            let tail = self.tail.load(Ordering::Acquire);
            if head == tail {
                return Err(PopError::Empty);
            }

            let head_index = (head % self.cap) as usize;
            let remaining = self.cap as usize - head_index;
            if remaining < 4 {
                self.head
                    .store(head.wrapping_add(remaining as u32), Ordering::Release);
                continue;
            }

            let len = self.read_u32(head_index);
            if len == WRAP_MARKER {
                self.head
                    .store(head.wrapping_add(remaining as u32), Ordering::Release);
                continue;
            }

            let total = record_size(len as usize);
            if total > remaining || tail.wrapping_sub(head) < total as u32 {
                return Err(PopError::Corrupt);
            }

            let out = self.read_bytes(head_index + 4, len as usize);
            self.head
                .store(head.wrapping_add(total as u32), Ordering::Release);
            return Ok(out);
        }
    }

    fn write_u32(&self, index: usize, v: u32) {
        self.write_bytes(index, &v.to_le_bytes());
    }

    fn read_u32(&self, index: usize) -> u32 {
        let b = self.read_bytes(index, 4);
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn write_bytes(&self, index: usize, bytes: &[u8]) {
        let cells = &self.storage[index..index + bytes.len()];
        for (cell, b) in cells.iter().zip(bytes) {
            // SAFETY: the producer owns this range until `tail` is published.
            unsafe { *cell.get() = *b };
        }
    }

    fn read_bytes(&self, index: usize, len: usize) -> Vec<u8> {
        self.storage[index..index + len]
            .iter()
            // SAFETY: the consumer owns this range until `head` is published.
            .map(|cell| unsafe { *cell.get() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_with_marker() {
        let ring = FrameRing::new(32);
        ring.try_push(&[1; 12]).unwrap(); // 16 bytes
        assert_eq!(ring.try_pop().unwrap(), vec![1; 12]);
        ring.try_push(&[2; 8]).unwrap(); // 12 bytes, ends at 28
        // 4 bytes left before the end: needs a wrap marker.
        ring.try_push(&[3; 4]).unwrap();
        assert_eq!(ring.try_pop().unwrap(), vec![2; 8]);
        assert_eq!(ring.try_pop().unwrap(), vec![3; 4]);
        assert_eq!(ring.try_pop(), Err(PopError::Empty));
    }

    #[test]
    fn full_and_too_large() {
        let ring = FrameRing::new(16);
        assert_eq!(ring.try_push(&[0; 13]), Err(PushError::TooLarge));
        ring.try_push(&[0; 4]).unwrap();
        ring.try_push(&[0; 4]).unwrap();
        assert_eq!(ring.try_push(&[]), Err(PushError::Full));
    }

    #[test]
    fn zero_length_frames_are_legal() {
        let ring = FrameRing::new(8);
        ring.try_push(&[]).unwrap();
        assert!(!ring.is_empty());
        assert_eq!(ring.try_pop().unwrap(), Vec::<u8>::new());
        assert!(ring.is_empty());
    }
}
