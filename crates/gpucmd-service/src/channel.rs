//! Service end of one renderer's channel.
//!
//! Routes messages to command buffer stubs by route id. Route 0 is the
//! control route, which creates and destroys stubs. Routes whose scheduler
//! yielded are run again whenever no message is waiting; routes blocked on a
//! latch are run again after any context sets one.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

use gpucmd_ipc::message::CONTROL_ROUTE_ID;
use gpucmd_ipc::{
    decode_message, encode_message, Endpoint, Event, Message, Reply, Request, RouteId, SharedMemoryRegistry, Size,
    TransportError,
};
use gpucmd_protocol::CommandNames;
use tracing::{debug, info, warn};

use crate::channel_manager::{HostMessage, HostOutbox};
use crate::command_buffer::CommandBufferService;
use crate::config::ServiceConfig;
use crate::context_group::{ContextGroup, ContextGroupRef};
use crate::decoder::Gles2Decoder;
use crate::gl::GlDriver;
use crate::latch::LatchTable;
use crate::scheduler::{GpuScheduler, ProcessOutcome};
use crate::stub::{GpuCommandBufferStub, StubOutput, StubTarget};
use crate::surface::{HeadlessSurface, PlatformSurface, ViewSurface};

pub struct GpuChannel {
    renderer_id: i32,
    endpoint: Endpoint,
    gl: Rc<dyn GlDriver>,
    registry: SharedMemoryRegistry,
    config: ServiceConfig,
    names: Rc<CommandNames>,
    latches: LatchTable,
    host: HostOutbox,
    stubs: BTreeMap<RouteId, GpuCommandBufferStub>,
    /// Share group of each route; offscreen children join their parent's.
    groups: BTreeMap<RouteId, ContextGroupRef>,
    next_route_id: RouteId,
    runnable: VecDeque<RouteId>,
    blocked: BTreeSet<RouteId>,
    lost: bool,
}

impl GpuChannel {
    pub fn new(
        renderer_id: i32,
        endpoint: Endpoint,
        gl: Rc<dyn GlDriver>,
        registry: SharedMemoryRegistry,
        config: ServiceConfig,
        host: HostOutbox,
    ) -> Self {
        Self {
            renderer_id,
            endpoint,
            gl,
            registry,
            config,
            names: Rc::new(CommandNames::new()),
            latches: LatchTable::new(),
            host,
            stubs: BTreeMap::new(),
            groups: BTreeMap::new(),
            next_route_id: CONTROL_ROUTE_ID + 1,
            runnable: VecDeque::new(),
            blocked: BTreeSet::new(),
            lost: false,
        }
    }

    pub fn renderer_id(&self) -> i32 {
        self.renderer_id
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn route_count(&self) -> usize {
        self.stubs.len()
    }

    pub fn stub(&self, route_id: RouteId) -> Option<&GpuCommandBufferStub> {
        self.stubs.get(&route_id)
    }

    /// Serves the channel until the transport closes or the channel is lost.
    pub fn run(&mut self) {
        while !self.lost {
            let frame = if self.runnable.is_empty() {
                self.endpoint.recv().map(Some)
            } else {
                self.endpoint.try_recv()
            };
            match frame {
                Ok(Some(frame)) => self.on_frame(&frame),
                Ok(None) => self.run_next_route(),
                Err(TransportError::Closed) => {
                    debug!(renderer_id = self.renderer_id, "channel transport closed");
                    break;
                }
                Err(err) => {
                    warn!(renderer_id = self.renderer_id, %err, "channel transport failed");
                    self.lose_all_contexts();
                }
            }
        }
    }

    /// Handles every waiting message and one batch of each runnable route
    /// without blocking. Returns whether anything happened.
    pub fn pump(&mut self) -> bool {
        let mut progressed = false;
        while !self.lost {
            match self.endpoint.try_recv() {
                Ok(Some(frame)) => {
                    self.on_frame(&frame);
                    progressed = true;
                }
                Ok(None) => break,
                Err(TransportError::Closed) => {
                    self.lost = true;
                    self.host
                        .borrow_mut()
                        .push_back(HostMessage::ChannelLost { renderer_id: self.renderer_id });
                }
                Err(err) => {
                    warn!(renderer_id = self.renderer_id, %err, "channel transport failed");
                    self.lose_all_contexts();
                }
            }
        }
        for _ in 0..self.runnable.len() {
            if self.lost {
                break;
            }
            self.run_next_route();
            progressed = true;
        }
        progressed
    }

    fn on_frame(&mut self, frame: &[u8]) {
        match decode_message(frame) {
            Ok(message) => self.on_message(message),
            Err(err) => {
                warn!(renderer_id = self.renderer_id, %err, "malformed channel message");
                self.lose_all_contexts();
            }
        }
    }

    pub fn on_message(&mut self, message: Message) {
        match message {
            Message::Request {
                route_id,
                request_id,
                body,
            } => {
                let reply = self.dispatch(route_id, body);
                self.send(Message::Reply {
                    route_id,
                    request_id,
                    body: reply,
                });
            }
            Message::Post { route_id, body } => {
                self.dispatch(route_id, body);
            }
            Message::Reply { route_id, .. } | Message::Event { route_id, .. } => {
                warn!(route_id, "unexpected message from client");
            }
        }
    }

    fn dispatch(&mut self, route_id: RouteId, request: Request) -> Reply {
        if route_id == CONTROL_ROUTE_ID {
            return self.on_control_request(request);
        }
        let Some(stub) = self.stubs.get_mut(&route_id) else {
            warn!(route_id, "request for unknown route");
            return match request {
                Request::Initialize { .. } => Reply::Initialized(false),
                _ => Reply::Ack,
            };
        };
        let initializing = matches!(request, Request::Initialize { .. });
        let mut out = StubOutput::default();
        let mut reply = stub.handle(request, &mut out);
        if initializing && reply == Reply::Initialized(true) {
            reply = Reply::Initialized(self.attach_to_parent(route_id));
        }
        self.after_stub_work(route_id, out);
        reply
    }

    fn on_control_request(&mut self, request: Request) -> Reply {
        match request {
            Request::CreateOffscreenCommandBuffer {
                size,
                parent_route_id,
                parent_texture_id,
            } => Reply::RouteCreated(self.create_offscreen_command_buffer(size, parent_route_id, parent_texture_id)),
            Request::CreateViewCommandBuffer { view_id, size } => {
                Reply::RouteCreated(self.create_view_command_buffer(view_id, size))
            }
            Request::DestroyCommandBuffer { route_id } => {
                self.destroy_command_buffer(route_id);
                Reply::Ack
            }
            other => {
                warn!(request = ?other, "command buffer request on the control route");
                Reply::Ack
            }
        }
    }

    /// `parent_route_id <= 0` creates a context with its own share group.
    /// Returns the new route, or `-1` if the parent is unknown.
    pub fn create_offscreen_command_buffer(
        &mut self,
        size: Size,
        parent_route_id: RouteId,
        parent_texture_id: u32,
    ) -> RouteId {
        let parent = if parent_route_id > CONTROL_ROUTE_ID {
            let Some(group) = self.groups.get(&parent_route_id) else {
                warn!(parent_route_id, "unknown parent route");
                return -1;
            };
            Some((Rc::clone(group), (parent_route_id, parent_texture_id)))
        } else {
            None
        };
        let (group, parent) = match parent {
            Some((group, parent)) => (group, Some(parent)),
            None => (ContextGroup::new_ref(), None),
        };
        let surface: Box<dyn PlatformSurface> = Box::new(HeadlessSurface::new(size));
        self.add_stub(StubTarget::Offscreen { parent }, surface, group)
    }

    pub fn create_view_command_buffer(&mut self, view_id: i32, size: Size) -> RouteId {
        let surface: Box<dyn PlatformSurface> = Box::new(ViewSurface::new(view_id, size));
        self.add_stub(StubTarget::View { view_id }, surface, ContextGroup::new_ref())
    }

    fn add_stub(&mut self, target: StubTarget, surface: Box<dyn PlatformSurface>, group: ContextGroupRef) -> RouteId {
        let route_id = self.next_route_id;
        self.next_route_id += 1;
        let decoder = Gles2Decoder::new(
            Rc::clone(&self.gl),
            surface,
            Rc::clone(&group),
            self.latches.clone(),
            Rc::clone(&self.names),
            self.config.decoder,
        );
        let scheduler = GpuScheduler::new(decoder, &self.config.decoder);
        let command_buffer = CommandBufferService::new(self.registry.clone(), &self.config.channel);
        let stub = GpuCommandBufferStub::new(
            self.renderer_id,
            route_id,
            target,
            scheduler,
            command_buffer,
            self.config.context_group,
            Rc::clone(&self.host),
        );
        self.stubs.insert(route_id, stub);
        self.groups.insert(route_id, group);
        info!(renderer_id = self.renderer_id, route_id, ?target, "command buffer created");
        route_id
    }

    /// Allocates the parent texture of a freshly initialized offscreen
    /// route. Routes without a parent succeed trivially.
    fn attach_to_parent(&mut self, route_id: RouteId) -> bool {
        let Some(stub) = self.stubs.get(&route_id) else {
            return false;
        };
        let StubTarget::Offscreen {
            parent: Some((parent_route_id, texture_id)),
        } = stub.target()
        else {
            return true;
        };
        let size = stub
            .scheduler()
            .and_then(|s| s.decoder().offscreen_size())
            .unwrap_or_default();
        // Both stubs are borrowed mutably; take the child out for the call.
        let Some(mut child) = self.stubs.remove(&route_id) else {
            return false;
        };
        let attached = match (
            child.scheduler_mut(),
            self.stubs.get_mut(&parent_route_id).and_then(|p| p.scheduler_mut()),
        ) {
            (Some(child_scheduler), Some(parent_scheduler)) => {
                child_scheduler.allocate_parent_texture(parent_scheduler, texture_id, size)
            }
            _ => false,
        };
        self.stubs.insert(route_id, child);
        if !attached {
            warn!(route_id, parent_route_id, texture_id, "could not allocate parent texture");
        }
        attached
    }

    pub fn destroy_command_buffer(&mut self, route_id: RouteId) -> bool {
        let Some(stub) = self.stubs.remove(&route_id) else {
            return false;
        };
        self.runnable.retain(|&r| r != route_id);
        self.blocked.remove(&route_id);
        drop(stub);
        self.groups.remove(&route_id);
        info!(renderer_id = self.renderer_id, route_id, "command buffer destroyed");
        true
    }

    pub fn view_resized(&mut self, route_id: RouteId) -> bool {
        let Some(stub) = self.stubs.get_mut(&route_id) else {
            return false;
        };
        stub.view_resized();
        self.make_runnable(route_id);
        true
    }

    fn make_runnable(&mut self, route_id: RouteId) {
        self.blocked.remove(&route_id);
        if !self.runnable.contains(&route_id) {
            self.runnable.push_back(route_id);
        }
    }

    fn run_next_route(&mut self) {
        let Some(route_id) = self.runnable.pop_front() else {
            return;
        };
        let Some(stub) = self.stubs.get_mut(&route_id) else {
            return;
        };
        let mut out = StubOutput::default();
        stub.run_scheduler(&mut out);
        out.events
            .push(Event::UpdateState(stub.command_buffer().get_state()));
        self.after_stub_work(route_id, out);
    }

    /// Sends what a stub produced and requeues routes by outcome.
    fn after_stub_work(&mut self, route_id: RouteId, out: StubOutput) {
        if out.lose_all_contexts {
            self.lose_all_contexts();
            return;
        }
        for event in out.events {
            self.send(Message::Event { route_id, body: event });
        }
        match out.outcome {
            Some(ProcessOutcome::Yielded) => self.make_runnable(route_id),
            Some(ProcessOutcome::Blocked) => {
                self.runnable.retain(|&r| r != route_id);
                self.blocked.insert(route_id);
            }
            Some(_) => {
                self.runnable.retain(|&r| r != route_id);
                self.blocked.remove(&route_id);
            }
            None => {}
        }
        if out.latch_set {
            let woken: Vec<RouteId> = self.blocked.iter().copied().collect();
            for route in woken {
                self.make_runnable(route);
            }
        }
    }

    /// Marks every context lost, tells the client, and closes the transport.
    pub fn lose_all_contexts(&mut self) {
        if self.lost {
            return;
        }
        warn!(renderer_id = self.renderer_id, routes = self.stubs.len(), "losing all contexts");
        let routes: Vec<RouteId> = self.stubs.keys().copied().collect();
        for route_id in routes {
            if let Some(stub) = self.stubs.get_mut(&route_id) {
                stub.lose_context();
            }
            self.send(Message::Event {
                route_id,
                body: Event::ContextLost,
            });
        }
        self.runnable.clear();
        self.blocked.clear();
        self.lost = true;
        self.endpoint.close();
        self.host
            .borrow_mut()
            .push_back(HostMessage::ChannelLost { renderer_id: self.renderer_id });
    }

    fn send(&mut self, message: Message) {
        if self.endpoint.is_closed() {
            return;
        }
        if let Err(err) = self.endpoint.send(&encode_message(&message)) {
            debug!(renderer_id = self.renderer_id, %err, "could not send to client");
        }
    }
}

impl Drop for GpuChannel {
    fn drop(&mut self) {
        // Children before parents: a child copies into its parent's texture.
        while let Some((&route_id, _)) = self.stubs.last_key_value() {
            self.destroy_command_buffer(route_id);
        }
        self.endpoint.close();
    }
}
