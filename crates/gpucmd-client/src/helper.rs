//! Ring buffer writer.
//!
//! The helper owns the client half of the ring protocol: it writes commands
//! at `put`, waits for the service to free space by reading `get` back
//! through [`CommandBuffer::flush_sync`], and wraps to the start of the ring
//! by padding the tail with `Noop` commands. Tokens give callers a cheap way
//! to learn when the service has passed a point in the stream.

use std::sync::Arc;

use gpucmd_ipc::SharedRegion;
use gpucmd_protocol::common::CommonCommand;
use gpucmd_protocol::header::MAX_COMMAND_SIZE;
use gpucmd_protocol::writer::encode_command;
use gpucmd_protocol::{CbError, CommandEncoder, CommandHeader, State, ENTRY_SIZE};
use thiserror::Error;
use tracing::{trace, warn};

use crate::command_buffer::CommandBuffer;

/// Tokens live in `[0, 2^31)`.
const TOKEN_MASK: i32 = 0x7fff_ffff;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HelperError {
    #[error("command buffer could not be initialized")]
    InitFailed,
    #[error("command buffer has no ring")]
    NoRing,
    #[error("transfer buffer access out of bounds")]
    TransferBuffer,
    #[error("command buffer error: {0}")]
    CommandBuffer(CbError),
    #[error("command of {entries} entries does not fit a ring of {capacity}")]
    CommandTooLarge { entries: i32, capacity: i32 },
    #[error("token {0} was never inserted")]
    TokenNotInserted(i32),
    #[error("command buffer drained without reaching token {0}")]
    TokenNotReached(i32),
}

pub struct CommandBufferHelper<C: CommandBuffer> {
    command_buffer: C,
    ring: Option<Arc<SharedRegion>>,
    total_entries: i32,
    put: i32,
    last_flushed_put: i32,
    token: i32,
    /// First failure seen while emitting; later commands are dropped.
    error: Option<HelperError>,
}

impl<C: CommandBuffer> CommandBufferHelper<C> {
    pub fn new(command_buffer: C) -> Self {
        Self {
            command_buffer,
            ring: None,
            total_entries: 0,
            put: 0,
            last_flushed_put: 0,
            token: 0,
            error: None,
        }
    }

    /// Allocates a ring of `ring_bytes` (rounded down to whole entries).
    pub fn initialize(&mut self, ring_bytes: u32) -> Result<(), HelperError> {
        let ring_bytes = ring_bytes - ring_bytes % ENTRY_SIZE as u32;
        if !self.command_buffer.initialize(ring_bytes) {
            return Err(HelperError::InitFailed);
        }
        let ring = self.command_buffer.ring().ok_or(HelperError::NoRing)?;
        self.total_entries = (ring.len() / ENTRY_SIZE) as i32;
        self.ring = Some(ring);
        self.put = 0;
        self.last_flushed_put = 0;
        Ok(())
    }

    pub fn command_buffer(&self) -> &C {
        &self.command_buffer
    }

    pub fn command_buffer_mut(&mut self) -> &mut C {
        &mut self.command_buffer
    }

    pub fn put_offset(&self) -> i32 {
        self.put
    }

    pub fn total_entries(&self) -> i32 {
        self.total_entries
    }

    pub fn last_token(&self) -> i32 {
        self.token
    }

    pub fn last_state(&self) -> State {
        self.command_buffer.last_state()
    }

    fn get_offset(&self) -> i32 {
        self.command_buffer.last_state().get_offset
    }

    /// The first emit failure, if any. Clears it.
    pub fn take_error(&mut self) -> Option<HelperError> {
        self.error.take()
    }

    /// Entries that can be written before `put` would catch up with `get`.
    pub fn available_entries(&self) -> i32 {
        if self.total_entries == 0 {
            return 0;
        }
        (self.get_offset() - self.put - 1).rem_euclid(self.total_entries)
    }

    fn check_state(&self) -> Result<State, HelperError> {
        let state = self.command_buffer.last_state();
        if state.error.is_error() {
            return Err(HelperError::CommandBuffer(state.error));
        }
        Ok(state)
    }

    fn flush_sync(&mut self) -> Result<State, HelperError> {
        let state = self.command_buffer.flush_sync(self.put, self.get_offset());
        self.last_flushed_put = self.put;
        if state.error.is_error() {
            return Err(HelperError::CommandBuffer(state.error));
        }
        Ok(state)
    }

    /// Publishes `put` without waiting.
    pub fn flush(&mut self) {
        if self.put != self.last_flushed_put {
            self.command_buffer.flush(self.put);
            self.last_flushed_put = self.put;
        }
    }

    /// Blocks until the service has processed everything written so far.
    pub fn finish(&mut self) -> Result<(), HelperError> {
        self.check_state()?;
        loop {
            let state = self.flush_sync()?;
            if state.get_offset == self.put {
                return Ok(());
            }
        }
    }

    /// Waits until `count` entries can be written contiguously at `put`.
    pub fn wait_for_available_entries(&mut self, count: i32) -> Result<(), HelperError> {
        let ring = self.ring.clone().ok_or(HelperError::NoRing)?;
        if count >= self.total_entries {
            return Err(HelperError::CommandTooLarge {
                entries: count,
                capacity: self.total_entries,
            });
        }
        if self.put + count > self.total_entries {
            // The command does not fit before the end. Wait until the reader
            // is somewhere in (0, put], then pad the tail and wrap.
            while self.get_offset() > self.put || self.get_offset() == 0 {
                self.flush_sync()?;
            }
            let mut remaining = (self.total_entries - self.put) as u32;
            while remaining > 0 {
                let size = remaining.min(MAX_COMMAND_SIZE);
                let header = CommandHeader::new(CommonCommand::Noop as u32, size).to_word();
                write_words(&ring, self.put, &[header])?;
                self.put += size as i32;
                remaining -= size;
            }
            trace!(entries = self.total_entries, "ring wrapped");
            self.put = 0;
        }
        while self.available_entries() < count {
            self.flush_sync()?;
        }
        Ok(())
    }

    fn write_command(&mut self, words: &[u32]) -> Result<(), HelperError> {
        self.check_state()?;
        let count = words.len() as i32;
        self.wait_for_available_entries(count)?;
        let ring = self.ring.clone().ok_or(HelperError::NoRing)?;
        write_words(&ring, self.put, words)?;
        self.put += count;
        if self.put == self.total_entries {
            self.put = 0;
        }
        // Keep the service busy while the client fills the rest of the ring.
        let pending = (self.put - self.last_flushed_put).rem_euclid(self.total_entries);
        if pending > self.total_entries / 2 {
            self.flush();
        }
        Ok(())
    }

    /// Inserts a `SetToken` and returns its value.
    pub fn insert_token(&mut self) -> i32 {
        self.token = self.token.wrapping_add(1) & TOKEN_MASK;
        let token = self.token;
        self.set_token(token);
        if token == 0 {
            // Wrapped: older tokens only compare correctly once all of them
            // have been passed.
            if let Err(err) = self.finish() {
                warn!(%err, "finish after token wrap failed");
            }
        }
        token
    }

    pub fn has_token_passed(&self, token: i32) -> bool {
        token > self.token || self.command_buffer.last_state().token >= token
    }

    /// Blocks until the service has executed the `SetToken` for `token`.
    pub fn wait_for_token(&mut self, token: i32) -> Result<(), HelperError> {
        if token < 0 {
            return Ok(());
        }
        if token > self.token {
            return Err(HelperError::TokenNotInserted(token));
        }
        self.check_state()?;
        if self.command_buffer.last_state().token >= token {
            return Ok(());
        }
        loop {
            let state = self.flush_sync()?;
            if state.token >= token {
                return Ok(());
            }
            if state.get_offset == self.put {
                return Err(HelperError::TokenNotReached(token));
            }
        }
    }
}

fn write_words(ring: &SharedRegion, offset: i32, words: &[u32]) -> Result<(), HelperError> {
    ring.write_words(offset as usize * ENTRY_SIZE, words)
        .map_err(|_| HelperError::CommandBuffer(CbError::OutOfBounds))
}

impl<C: CommandBuffer> CommandEncoder for CommandBufferHelper<C> {
    fn emit(&mut self, command: u32, args: &[u32], payload: &[u8]) {
        if self.error.is_some() {
            return;
        }
        let words = encode_command(command, args, payload);
        if let Err(err) = self.write_command(&words) {
            warn!(command, %err, "command dropped");
            self.error = Some(err);
        }
    }
}
