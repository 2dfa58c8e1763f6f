//! Recorded command streams.
//!
//! A trace is the little-endian image of ring entries exactly as a client
//! wrote them. [`dump`] walks the headers without executing anything;
//! [`replay`] runs the stream through a headless decoder on [`SoftGl`].

use std::fmt;
use std::rc::Rc;

use gpucmd_ipc::{SharedMemoryRegistry, ShmError, Size};
use gpucmd_protocol::gl::GLenum;
use gpucmd_protocol::{CbError, CommandHeader, CommandNames, State, ENTRY_SIZE};
use gpucmd_service::context_group::ContextGroup;
use gpucmd_service::latch::LatchTable;
use gpucmd_service::{
    CommandBufferService, ConfigError, DecoderEvent, Gles2Decoder, GlDriver, GpuScheduler, HeadlessSurface,
    InitError, ProcessOutcome, ServiceConfig, SoftGl,
};
use thiserror::Error;
use tracing::{debug, info};

/// Transfer buffer id a replay provides for commands that read or write
/// shared memory.
pub const REPLAY_SHM_ID: i32 = 1;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("trace length {0} is not a whole number of entries")]
    UnalignedLength(usize),
    #[error("command at entry {offset} has size 0")]
    InvalidSize { offset: usize },
    #[error("command at entry {offset} needs {size} entries, only {remaining} remain")]
    Truncated { offset: usize, size: u32, remaining: usize },
    #[error("trace of {entries} entries does not fit the largest ring")]
    TooLarge { entries: usize },
    #[error("shared memory: {0}")]
    Shm(#[from] ShmError),
    #[error("decoder init: {0}")]
    Init(#[from] InitError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Splits a trace file into entries.
pub fn read_trace(bytes: &[u8]) -> Result<Vec<u32>, TraceError> {
    if bytes.len() % ENTRY_SIZE != 0 {
        return Err(TraceError::UnalignedLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(ENTRY_SIZE)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpEntry {
    /// In entries from the start of the trace.
    pub offset: usize,
    pub command: u32,
    pub name: &'static str,
    pub args: Vec<u32>,
}

impl fmt::Display for DumpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}  {} ({} args)", self.offset, self.name, self.args.len())
    }
}

pub fn dump(words: &[u32], names: &CommandNames) -> Result<Vec<DumpEntry>, TraceError> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < words.len() {
        let header = CommandHeader::from_word(words[offset]);
        if header.size == 0 {
            return Err(TraceError::InvalidSize { offset });
        }
        let remaining = words.len() - offset;
        if header.size as usize > remaining {
            return Err(TraceError::Truncated {
                offset,
                size: header.size,
                remaining,
            });
        }
        let end = offset + header.size as usize;
        entries.push(DumpEntry {
            offset,
            command: header.command,
            name: names.get(header.command),
            args: words[offset + 1..end].to_vec(),
        });
        offset = end;
    }
    Ok(entries)
}

#[derive(Debug, Clone, Copy)]
pub struct ReplayOptions {
    pub config: ServiceConfig,
    pub surface_size: Size,
    /// Size of the transfer buffer registered as [`REPLAY_SHM_ID`].
    pub transfer_buffer_bytes: u32,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            config: ServiceConfig::default(),
            surface_size: Size::new(64, 64),
            transfer_buffer_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub state: State,
    /// Oldest GL error left unretrieved by the stream.
    pub gl_error: GLenum,
    pub swaps: u32,
    /// The stream stopped on a latch nothing will set.
    pub blocked: bool,
    pub driver_calls: usize,
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "get={} put={} token={} error={:?}",
            self.state.get_offset, self.state.put_offset, self.state.token, self.state.error
        )?;
        writeln!(f, "gl_error={:#06x} swaps={} driver_calls={}", self.gl_error, self.swaps, self.driver_calls)?;
        if self.blocked {
            writeln!(f, "blocked on a latch")?;
        }
        Ok(())
    }
}

pub fn replay(words: &[u32], options: &ReplayOptions) -> Result<ReplayReport, TraceError> {
    let config = &options.config;
    config.validate()?;
    // `put` must stay below the ring size, so keep one spare entry.
    let entries = words.len() + 1;
    let ring_bytes = entries
        .checked_mul(ENTRY_SIZE)
        .filter(|&bytes| bytes <= config.channel.max_ring_buffer_bytes as usize)
        .ok_or(TraceError::TooLarge { entries })?;

    let registry = SharedMemoryRegistry::new();
    let ring_handle = registry.create(ring_bytes)?;
    registry.open(ring_handle)?.write_words(0, words)?;

    let mut command_buffer = CommandBufferService::new(registry.clone(), &config.channel);
    if !command_buffer.initialize(ring_handle, ring_bytes as u32) {
        return Err(TraceError::TooLarge { entries });
    }
    let shm_id = command_buffer.create_transfer_buffer(options.transfer_buffer_bytes, REPLAY_SHM_ID);
    debug!(shm_id, bytes = options.transfer_buffer_bytes, "replay transfer buffer");

    let gl = Rc::new(SoftGl::new());
    let driver: Rc<dyn GlDriver> = gl.clone();
    let decoder = Gles2Decoder::new(
        driver,
        HeadlessSurface::new(options.surface_size),
        ContextGroup::new_ref(),
        LatchTable::new(),
        Rc::new(CommandNames::new()),
        config.decoder,
    );
    let mut scheduler = GpuScheduler::new(decoder, &config.decoder);
    scheduler.initialize(&command_buffer, &config.context_group)?;

    if !words.is_empty() {
        command_buffer.flush_sync(words.len() as i32);
    }

    let mut swaps = 0;
    let mut blocked = false;
    loop {
        let outcome = scheduler.process_commands(&mut command_buffer);
        for event in scheduler.take_events() {
            match event {
                DecoderEvent::SwapBuffers => swaps += 1,
                DecoderEvent::ResizeRequested(size) => {
                    scheduler.resize_offscreen_frame_buffer(size);
                }
                DecoderEvent::LatchSet(_) => {}
            }
        }
        match outcome {
            ProcessOutcome::Yielded => continue,
            ProcessOutcome::Blocked => {
                blocked = true;
                break;
            }
            ProcessOutcome::Idle | ProcessOutcome::Descheduled | ProcessOutcome::Error(_) => break,
        }
    }

    let report = ReplayReport {
        state: command_buffer.get_state(),
        gl_error: scheduler.decoder().pending_gl_errors().lowest_gl_error(),
        swaps,
        blocked,
        driver_calls: gl.calls().len(),
    };
    if report.state.error != CbError::NoError {
        info!(error = %report.state.error, get = report.state.get_offset, "replay stopped on an error");
    }
    scheduler.destroy();
    command_buffer.destroy();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpucmd_protocol::gl;
    use gpucmd_protocol::{CommandEncoder, CommandWriter};
    use pretty_assertions::assert_eq;

    #[test]
    fn read_trace_rejects_partial_entries() {
        assert!(matches!(read_trace(&[1, 2, 3]), Err(TraceError::UnalignedLength(3))));
        assert_eq!(read_trace(&[1, 0, 0, 0, 2, 0, 0, 0]).unwrap(), [1, 2]);
    }

    #[test]
    fn dump_names_every_command() {
        let mut w = CommandWriter::new();
        w.set_token(3);
        w.clear_color(0.0, 0.0, 0.0, 1.0);
        w.noop(2);
        let entries = dump(w.entries(), &CommandNames::new()).unwrap();
        let summary: Vec<_> = entries.iter().map(|e| (e.offset, e.name, e.args.len())).collect();
        assert_eq!(summary, [(0, "SetToken", 1), (2, "ClearColor", 4), (7, "Noop", 2)]);
        assert_eq!(entries[0].to_string(), "       0  SetToken (1 args)");
    }

    #[test]
    fn dump_stops_at_malformed_headers() {
        let mut w = CommandWriter::new();
        w.set_token(1);
        w.push_raw(CommandHeader::new(0, 0).to_word());
        assert!(matches!(
            dump(w.entries(), &CommandNames::new()),
            Err(TraceError::InvalidSize { offset: 2 })
        ));

        let truncated = [CommandHeader::new(0, 5).to_word(), 0];
        assert!(matches!(
            dump(&truncated, &CommandNames::new()),
            Err(TraceError::Truncated {
                offset: 0,
                size: 5,
                remaining: 2
            })
        ));
    }

    #[test]
    fn replay_runs_to_the_end() {
        let mut w = CommandWriter::new();
        w.clear_color(1.0, 0.0, 0.0, 1.0);
        w.clear(gl::COLOR_BUFFER_BIT);
        w.swap_buffers();
        w.viewport(0, 0, -1, 1);
        w.set_token(42);
        let report = replay(w.entries(), &ReplayOptions::default()).unwrap();
        assert_eq!(report.state.error, CbError::NoError);
        assert_eq!(report.state.get_offset, w.len_entries() as i32);
        assert_eq!(report.state.token, 42);
        assert_eq!(report.swaps, 1);
        assert_eq!(report.gl_error, gl::INVALID_VALUE);
        assert!(!report.blocked);
    }

    #[test]
    fn replay_reports_parse_errors_and_latches() {
        let mut w = CommandWriter::new();
        w.wait_latch(5);
        let report = replay(w.entries(), &ReplayOptions::default()).unwrap();
        assert!(report.blocked);
        assert_eq!(report.state.get_offset, 0);

        let mut w = CommandWriter::new();
        w.push_raw(CommandHeader::new(2000, 1).to_word());
        let report = replay(w.entries(), &ReplayOptions::default()).unwrap();
        assert_eq!(report.state.error, CbError::UnknownCommand);
    }

    #[test]
    fn replay_offers_a_transfer_buffer() {
        let mut w = CommandWriter::new();
        w.get_error(REPLAY_SHM_ID, 0);
        w.get_error(REPLAY_SHM_ID + 1, 0);
        let report = replay(w.entries(), &ReplayOptions::default()).unwrap();
        assert_eq!(report.state.error, CbError::OutOfBounds);
        assert_eq!(report.state.get_offset, 3);
    }
}
