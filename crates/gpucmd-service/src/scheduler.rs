//! Drives one context: feeds the ring to the decoder in bounded batches.

use std::sync::Arc;

use gpucmd_ipc::Size;
use gpucmd_protocol::CbError;
use tracing::{debug, warn};

use crate::command_buffer::{CommandBufferEngine, CommandBufferService};
use crate::config::{ContextGroupConfig, DecoderConfig};
use crate::decoder::{DecoderEvent, Gles2Decoder, InitError};
use crate::parser::CommandParser;
use crate::surface::PlatformSurface;

/// Why [`GpuScheduler::process_commands`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Everything up to `put` was processed.
    Idle,
    /// Work remains (batch exhausted or a frame was presented); run again
    /// once other routes had their turn.
    Yielded,
    /// A command waits on a latch; run again when one is set.
    Blocked,
    /// Not scheduled; nothing was processed.
    Descheduled,
    /// The command buffer carries this sticky error.
    Error(CbError),
}

pub struct GpuScheduler<S: PlatformSurface> {
    decoder: Gles2Decoder<S>,
    parser: Option<CommandParser>,
    commands_per_batch: u32,
    scheduled: bool,
}

impl<S: PlatformSurface> GpuScheduler<S> {
    pub fn new(decoder: Gles2Decoder<S>, config: &DecoderConfig) -> Self {
        Self {
            decoder,
            parser: None,
            commands_per_batch: config.commands_per_batch.max(1),
            scheduled: true,
        }
    }

    /// Attaches the parser to the command buffer's ring and initializes the
    /// decoder. The command buffer must be initialized.
    pub fn initialize(
        &mut self,
        command_buffer: &CommandBufferService,
        group_config: &ContextGroupConfig,
    ) -> Result<(), InitError> {
        let Some(ring) = command_buffer.ring_buffer() else {
            return Err(InitError::NoRing);
        };
        self.decoder.initialize(group_config)?;
        self.parser = Some(CommandParser::new(Arc::clone(&ring.region), command_buffer.num_entries()));
        Ok(())
    }

    pub fn decoder(&self) -> &Gles2Decoder<S> {
        &self.decoder
    }

    pub fn decoder_mut(&mut self) -> &mut Gles2Decoder<S> {
        &mut self.decoder
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn set_scheduled(&mut self, scheduled: bool) {
        if self.scheduled != scheduled {
            debug!(scheduled, "scheduling changed");
        }
        self.scheduled = scheduled;
    }

    /// Processes at most one batch of commands between the parser's `get`
    /// and the command buffer's `put`, then publishes `get`.
    pub fn process_commands(&mut self, command_buffer: &mut CommandBufferService) -> ProcessOutcome {
        if !self.scheduled {
            return ProcessOutcome::Descheduled;
        }
        let error = command_buffer.error();
        if error.is_error() {
            return ProcessOutcome::Error(error);
        }
        let Some(parser) = self.parser.as_mut() else {
            return ProcessOutcome::Idle;
        };
        if !self.decoder.make_current() {
            warn!("could not make context current");
            self.decoder.lose_context();
            command_buffer.set_parse_error(CbError::LostContext);
            return ProcessOutcome::Error(CbError::LostContext);
        }
        if !parser.set_put(command_buffer.put_offset()) {
            command_buffer.set_parse_error(CbError::OutOfBounds);
            return ProcessOutcome::Error(CbError::OutOfBounds);
        }

        let mut outcome = ProcessOutcome::Idle;
        let mut processed = 0;
        while !parser.is_empty() {
            if processed == self.commands_per_batch {
                outcome = ProcessOutcome::Yielded;
                break;
            }
            processed += 1;
            match parser.process_command(&mut self.decoder, command_buffer) {
                CbError::NoError => {}
                CbError::Waiting => {
                    outcome = ProcessOutcome::Blocked;
                    break;
                }
                CbError::Throttle => {
                    outcome = ProcessOutcome::Yielded;
                    break;
                }
                error => {
                    if error == CbError::LostContext {
                        self.decoder.lose_context();
                    }
                    command_buffer.set_parse_error(error);
                    outcome = ProcessOutcome::Error(command_buffer.error());
                    break;
                }
            }
        }
        command_buffer.set_get_offset(parser.get());
        outcome
    }

    pub fn take_events(&mut self) -> Vec<DecoderEvent> {
        self.decoder.take_events()
    }

    pub fn resize_offscreen_frame_buffer(&mut self, size: Size) -> bool {
        self.decoder.make_current() && self.decoder.resize_offscreen(size)
    }

    /// Creates `client_id` as a texture in `parent`'s namespace and makes our
    /// frames land in it. Our context is current again on return.
    pub fn allocate_parent_texture<P: PlatformSurface>(
        &mut self,
        parent: &mut GpuScheduler<P>,
        client_id: u32,
        size: Size,
    ) -> bool {
        if !parent.decoder.make_current() {
            return false;
        }
        let texture = parent.decoder.create_parent_texture(client_id, size);
        let restored = self.decoder.make_current();
        let Some(texture) = texture else {
            return false;
        };
        self.decoder.set_parent_texture(Some(texture));
        restored
    }

    pub fn destroy(&mut self) {
        self.parser = None;
        self.decoder.destroy();
    }
}
