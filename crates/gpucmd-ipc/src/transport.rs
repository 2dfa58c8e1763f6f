//! Ordered, reliable duplex transport between two threads.
//!
//! Each direction is a [`FrameRing`] plus a doorbell. Closing either endpoint
//! (explicitly or by dropping it) closes both directions; the peer drains
//! frames already queued and then sees [`TransportError::Closed`]. A blocked
//! `recv` or `send` is woken by close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use thiserror::Error;
use tracing::debug;

use crate::layout::DEFAULT_RING_BYTES;
use crate::ring::{FrameRing, PopError, PushError};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("frame of {0} bytes exceeds the transport capacity")]
    FrameTooLarge(usize),
    #[error("transport ring corrupt")]
    Corrupt,
}

struct Pipe {
    ring: FrameRing,
    closed: AtomicBool,
    lock: Mutex<()>,
    doorbell: Condvar,
}

impl Pipe {
    fn new(capacity_bytes: usize) -> Self {
        Self {
            ring: FrameRing::new(capacity_bytes),
            closed: AtomicBool::new(false),
            lock: Mutex::new(()),
            doorbell: Condvar::new(),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ring_doorbell(&self) {
        let _guard = self.guard();
        self.doorbell.notify_all();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ring_doorbell();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Frames up to half the ring always fit once the consumer catches up,
    /// whatever the wrap position.
    fn max_frame_len(&self) -> usize {
        self.ring.capacity_bytes() / 2 - 4
    }

    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > self.max_frame_len() {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        let mut guard = self.guard();
        loop {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            match self.ring.try_push(frame) {
                Ok(()) => {
                    self.doorbell.notify_all();
                    return Ok(());
                }
                Err(PushError::TooLarge) => return Err(TransportError::FrameTooLarge(frame.len())),
                Err(PushError::Full) => {
                    guard = self.doorbell.wait(guard).unwrap_or_else(|e| e.into_inner());
                }
            }
        }
    }

    fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.ring.try_pop() {
            Ok(frame) => {
                self.ring_doorbell();
                Ok(Some(frame))
            }
            Err(PopError::Empty) if self.is_closed() => Err(TransportError::Closed),
            Err(PopError::Empty) => Ok(None),
            Err(PopError::Corrupt) => Err(TransportError::Corrupt),
        }
    }

    fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.guard();
        loop {
            match self.ring.try_pop() {
                Ok(frame) => {
                    self.doorbell.notify_all();
                    return Ok(frame);
                }
                Err(PopError::Corrupt) => return Err(TransportError::Corrupt),
                Err(PopError::Empty) => {
                    if self.is_closed() {
                        return Err(TransportError::Closed);
                    }
                    guard = self.doorbell.wait(guard).unwrap_or_else(|e| e.into_inner());
                }
            }
        }
    }
}

/// One side of a duplex link. Exactly one producer and one consumer exist per
/// direction, so sending and receiving need `&mut self`.
pub struct Endpoint {
    tx: Arc<Pipe>,
    rx: Arc<Pipe>,
}

/// Creates a connected pair with the default per-direction capacity.
pub fn duplex() -> (Endpoint, Endpoint) {
    duplex_with_capacity(DEFAULT_RING_BYTES)
}

pub fn duplex_with_capacity(capacity_bytes: usize) -> (Endpoint, Endpoint) {
    let a_to_b = Arc::new(Pipe::new(capacity_bytes));
    let b_to_a = Arc::new(Pipe::new(capacity_bytes));
    (
        Endpoint {
            tx: a_to_b.clone(),
            rx: b_to_a.clone(),
        },
        Endpoint {
            tx: b_to_a,
            rx: a_to_b,
        },
    )
}

impl Endpoint {
    /// Blocks while the outgoing ring is full.
    pub fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.tx.send(frame)
    }

    /// Blocks until a frame arrives or the link closes.
    pub fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.rx.recv()
    }

    pub fn try_recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.rx.try_recv()
    }

    pub fn close(&self) {
        if !self.is_closed() {
            debug!("closing transport endpoint");
        }
        self.tx.close();
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.rx.is_closed()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn frames_arrive_in_order() {
        let (mut a, mut b) = duplex_with_capacity(64);
        let producer = thread::spawn(move || {
            for i in 0u32..1000 {
                a.send(&i.to_le_bytes()).unwrap();
            }
            a
        });
        for i in 0u32..1000 {
            assert_eq!(b.recv().unwrap(), i.to_le_bytes().to_vec());
        }
        drop(producer.join().unwrap());
        assert_eq!(b.recv(), Err(TransportError::Closed));
    }

    #[test]
    fn close_wakes_blocked_receiver() {
        let (a, mut b) = duplex();
        let waiter = thread::spawn(move || b.recv());
        thread::sleep(std::time::Duration::from_millis(20));
        a.close();
        assert_eq!(waiter.join().unwrap(), Err(TransportError::Closed));
    }

    #[test]
    fn queued_frames_drain_before_closed() {
        let (mut a, mut b) = duplex();
        a.send(b"last words").unwrap();
        drop(a);
        assert_eq!(b.try_recv().unwrap(), Some(b"last words".to_vec()));
        assert_eq!(b.try_recv(), Err(TransportError::Closed));
        assert_eq!(b.send(b"x"), Err(TransportError::Closed));
    }
}
