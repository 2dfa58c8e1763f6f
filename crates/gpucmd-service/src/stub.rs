//! Service end of one command buffer route.

use gpucmd_ipc::{Event, Reply, Request, RouteId, ShmHandle, Size};
use gpucmd_protocol::CbError;
use tracing::{debug, warn};

use crate::channel_manager::{HostMessage, HostOutbox};
use crate::command_buffer::CommandBufferService;
use crate::config::ContextGroupConfig;
use crate::decoder::DecoderEvent;
use crate::scheduler::{GpuScheduler, ProcessOutcome};
use crate::surface::PlatformSurface;

pub type StubScheduler = GpuScheduler<Box<dyn PlatformSurface>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubTarget {
    /// Renders into decoder-owned targets; frames may be copied into a
    /// texture of `parent`.
    Offscreen { parent: Option<(RouteId, u32)> },
    View { view_id: i32 },
}

/// What handling one request produced besides its reply.
#[derive(Debug, Default)]
pub struct StubOutput {
    /// Unsolicited events for this route's client.
    pub events: Vec<Event>,
    /// Outcome of the scheduler run the request triggered, if any.
    pub outcome: Option<ProcessOutcome>,
    /// A latch was set; routes blocked on latches may proceed.
    pub latch_set: bool,
    /// Asynchronous work hit a lost context; every context on the channel
    /// must be lost.
    pub lose_all_contexts: bool,
}

pub struct GpuCommandBufferStub {
    renderer_id: i32,
    route_id: RouteId,
    target: StubTarget,
    group_config: ContextGroupConfig,
    host: HostOutbox,
    /// Destroyed before `command_buffer`.
    scheduler: Option<StubScheduler>,
    command_buffer: CommandBufferService,
    initialized: bool,
}

impl GpuCommandBufferStub {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        renderer_id: i32,
        route_id: RouteId,
        target: StubTarget,
        scheduler: StubScheduler,
        command_buffer: CommandBufferService,
        group_config: ContextGroupConfig,
        host: HostOutbox,
    ) -> Self {
        Self {
            renderer_id,
            route_id,
            target,
            group_config,
            host,
            scheduler: Some(scheduler),
            command_buffer,
            initialized: false,
        }
    }

    pub fn route_id(&self) -> RouteId {
        self.route_id
    }

    pub fn target(&self) -> StubTarget {
        self.target
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn command_buffer(&self) -> &CommandBufferService {
        &self.command_buffer
    }

    pub fn scheduler(&self) -> Option<&StubScheduler> {
        self.scheduler.as_ref()
    }

    pub fn scheduler_mut(&mut self) -> Option<&mut StubScheduler> {
        self.scheduler.as_mut()
    }

    /// Handles one request addressed to this route. Requests that were
    /// posted rather than sent have their reply discarded by the channel.
    pub fn handle(&mut self, request: Request, out: &mut StubOutput) -> Reply {
        match request {
            Request::Initialize { ring_handle, size } => Reply::Initialized(self.initialize(ShmHandle(ring_handle), size)),
            Request::GetState => Reply::State(self.command_buffer.get_state()),
            Request::AsyncGetState => {
                out.events.push(Event::UpdateState(self.command_buffer.get_state()));
                Reply::Ack
            }
            Request::Flush { put_offset, last_known_get } => {
                self.flush(put_offset, out);
                let state = self.command_buffer.get_state();
                if state.get_offset == last_known_get && state.put_offset != state.get_offset {
                    debug!(route_id = self.route_id, get = state.get_offset, "flush made no progress");
                }
                Reply::State(state)
            }
            Request::AsyncFlush { put_offset } => {
                self.flush(put_offset, out);
                let state = self.command_buffer.get_state();
                if state.error == CbError::LostContext {
                    out.lose_all_contexts = true;
                } else {
                    out.events.push(Event::UpdateState(state));
                }
                Reply::Ack
            }
            Request::CreateTransferBuffer { size, id_request } => {
                Reply::TransferBufferId(self.command_buffer.create_transfer_buffer(size, id_request))
            }
            Request::RegisterTransferBuffer {
                handle,
                size,
                id_request,
            } => Reply::TransferBufferId(self.command_buffer.register_transfer_buffer(
                ShmHandle(handle),
                size,
                id_request,
            )),
            Request::DestroyTransferBuffer { id } => {
                self.command_buffer.destroy_transfer_buffer(id);
                Reply::Ack
            }
            Request::GetTransferBuffer { id } => match self.command_buffer.get_transfer_buffer(id) {
                Some(buffer) => Reply::TransferBuffer {
                    handle: buffer.handle().0,
                    size: buffer.size,
                },
                None => Reply::TransferBuffer { handle: 0, size: 0 },
            },
            Request::ResizeOffscreenFrameBuffer { size } => {
                self.resize_offscreen(size);
                Reply::Ack
            }
            Request::SetWindowSize { size } => {
                self.set_window_size(size);
                Reply::Ack
            }
            Request::CreateOffscreenCommandBuffer { .. }
            | Request::CreateViewCommandBuffer { .. }
            | Request::DestroyCommandBuffer { .. } => {
                warn!(route_id = self.route_id, "control request on a command buffer route");
                Reply::Ack
            }
        }
    }

    fn initialize(&mut self, ring_handle: ShmHandle, size: u32) -> bool {
        if self.initialized {
            warn!(route_id = self.route_id, "command buffer already initialized");
            return false;
        }
        let Some(scheduler) = self.scheduler.as_mut() else {
            return false;
        };
        if !self.command_buffer.initialize(ring_handle, size) {
            return false;
        }
        if let Err(err) = scheduler.initialize(&self.command_buffer, &self.group_config) {
            warn!(route_id = self.route_id, %err, "could not initialize context");
            return false;
        }
        self.initialized = true;
        debug!(route_id = self.route_id, size, "command buffer stub initialized");
        true
    }

    fn flush(&mut self, put_offset: i32, out: &mut StubOutput) {
        if self.command_buffer.flush_sync(put_offset) {
            self.run_scheduler(out);
        }
    }

    /// Processes one batch and reacts to what the decoder asked for.
    pub fn run_scheduler(&mut self, out: &mut StubOutput) -> ProcessOutcome {
        let Some(scheduler) = self.scheduler.as_mut() else {
            return ProcessOutcome::Error(CbError::LostContext);
        };
        let outcome = scheduler.process_commands(&mut self.command_buffer);
        for event in scheduler.take_events() {
            match event {
                DecoderEvent::SwapBuffers => out.events.push(Event::SwapBuffers),
                DecoderEvent::LatchSet(_) => out.latch_set = true,
                DecoderEvent::ResizeRequested(size) => match self.target {
                    StubTarget::Offscreen { .. } => {
                        if !scheduler.resize_offscreen_frame_buffer(size) {
                            warn!(route_id = self.route_id, ?size, "offscreen resize failed");
                        }
                    }
                    StubTarget::View { view_id } => {
                        scheduler.set_scheduled(false);
                        self.host.borrow_mut().push_back(HostMessage::ResizeView {
                            renderer_id: self.renderer_id,
                            route_id: self.route_id,
                            view_id,
                            size,
                        });
                    }
                },
            }
        }
        out.outcome = Some(outcome);
        outcome
    }

    fn resize_offscreen(&mut self, size: Size) {
        if !matches!(self.target, StubTarget::Offscreen { .. }) {
            return;
        }
        if let Some(scheduler) = self.scheduler.as_mut() {
            if !scheduler.resize_offscreen_frame_buffer(size) {
                warn!(route_id = self.route_id, ?size, "offscreen resize failed");
            }
        }
    }

    fn set_window_size(&mut self, size: Size) {
        if !matches!(self.target, StubTarget::View { .. }) {
            return;
        }
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.decoder_mut().surface_mut().resize(size);
        }
    }

    /// The host finished resizing our view.
    pub fn view_resized(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.set_scheduled(true);
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduler.as_ref().is_some_and(GpuScheduler::is_scheduled)
    }

    pub fn lose_context(&mut self) {
        if let Some(scheduler) = self.scheduler.as_mut() {
            scheduler.decoder_mut().lose_context();
        }
        self.command_buffer.set_parse_error(CbError::LostContext);
    }
}

impl Drop for GpuCommandBufferStub {
    fn drop(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.destroy();
        }
        self.command_buffer.destroy();
        self.host.borrow_mut().push_back(HostMessage::DestroyCommandBuffer {
            renderer_id: self.renderer_id,
            route_id: self.route_id,
        });
        debug!(route_id = self.route_id, "command buffer stub destroyed");
    }
}
