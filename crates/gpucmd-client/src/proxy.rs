//! Renderer-side handle for one command buffer route.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use gpucmd_ipc::message::CONTROL_ROUTE_ID;
use gpucmd_ipc::{Reply, Request, RouteId, SharedRegion, ShmHandle, Size};
use gpucmd_protocol::{CbError, State};
use tracing::{debug, warn};

use crate::channel_host::{ChannelError, ChannelHostRef, RouteState};
use crate::command_buffer::CommandBuffer;

pub struct CommandBufferProxy {
    host: ChannelHostRef,
    route_id: RouteId,
    route: Rc<RefCell<RouteState>>,
    ring: Option<Arc<SharedRegion>>,
    transfer_buffers: BTreeMap<i32, Arc<SharedRegion>>,
}

impl CommandBufferProxy {
    /// Creates an offscreen command buffer. With a `parent`, the new context
    /// joins the parent's share group and presents into `parent_texture_id`
    /// on the parent.
    pub fn create_offscreen(
        host: &ChannelHostRef,
        size: Size,
        parent: Option<(&CommandBufferProxy, u32)>,
    ) -> Result<Self, ChannelError> {
        let (parent_route_id, parent_texture_id) = match parent {
            Some((parent, texture_id)) => (parent.route_id, texture_id),
            None => (0, 0),
        };
        let request = Request::CreateOffscreenCommandBuffer {
            size,
            parent_route_id,
            parent_texture_id,
        };
        Self::create(host, request)
    }

    pub fn create_view(host: &ChannelHostRef, view_id: i32, size: Size) -> Result<Self, ChannelError> {
        Self::create(host, Request::CreateViewCommandBuffer { view_id, size })
    }

    fn create(host: &ChannelHostRef, request: Request) -> Result<Self, ChannelError> {
        let route_id = host.borrow_mut().create_route(request)?;
        if route_id < 0 {
            return Err(ChannelError::Lost);
        }
        let route = host.borrow_mut().add_route(route_id);
        debug!(route_id, "command buffer created");
        Ok(Self {
            host: Rc::clone(host),
            route_id,
            route,
            ring: None,
            transfer_buffers: BTreeMap::new(),
        })
    }

    pub fn route_id(&self) -> RouteId {
        self.route_id
    }

    pub fn is_lost(&self) -> bool {
        self.route.borrow().lost
    }

    /// Frames the service has presented for this route.
    pub fn swap_count(&self) -> u64 {
        self.route.borrow().swap_count
    }

    fn send_sync(&self, request: Request) -> Option<Reply> {
        if self.is_lost() {
            return None;
        }
        match self.host.borrow_mut().send_sync(self.route_id, request) {
            Ok(reply) => Some(reply),
            Err(err) => {
                warn!(route_id = self.route_id, %err, "command buffer request failed");
                self.route.borrow_mut().record(State::lost());
                None
            }
        }
    }

    fn send_async(&self, request: Request) {
        if self.is_lost() {
            return;
        }
        if let Err(err) = self.host.borrow_mut().send_async(self.route_id, request) {
            warn!(route_id = self.route_id, %err, "command buffer post failed");
        }
    }

    fn on_state(&self, reply: Option<Reply>) -> State {
        match reply {
            Some(Reply::State(state)) => self.route.borrow_mut().record(state),
            Some(reply) => warn!(route_id = self.route_id, ?reply, "unexpected reply to a state request"),
            None => {}
        }
        self.last_state()
    }

    /// Hands a region the renderer created itself to the service.
    pub fn register_transfer_buffer(&mut self, region: Arc<SharedRegion>, id_request: i32) -> i32 {
        let request = Request::RegisterTransferBuffer {
            handle: region.handle().0,
            size: region.len() as u32,
            id_request,
        };
        match self.send_sync(request) {
            Some(Reply::TransferBufferId(id)) if id >= 0 => {
                self.transfer_buffers.insert(id, region);
                id
            }
            _ => -1,
        }
    }

    pub fn resize_offscreen_frame_buffer(&self, size: Size) {
        self.send_async(Request::ResizeOffscreenFrameBuffer { size });
    }

    pub fn set_window_size(&self, size: Size) {
        self.send_async(Request::SetWindowSize { size });
    }

    /// Applies events the service sent since the last round trip.
    pub fn pump(&self) {
        if let Err(err) = self.host.borrow_mut().pump() {
            debug!(route_id = self.route_id, %err, "pump failed");
        }
    }
}

impl CommandBuffer for CommandBufferProxy {
    fn initialize(&mut self, size_bytes: u32) -> bool {
        if self.ring.is_some() {
            warn!(route_id = self.route_id, "command buffer already initialized");
            return false;
        }
        let registry = self.host.borrow().registry().clone();
        let ring = match registry
            .create(size_bytes as usize)
            .and_then(|handle| registry.open(handle))
        {
            Ok(ring) => ring,
            Err(err) => {
                warn!(route_id = self.route_id, %err, size_bytes, "could not allocate ring");
                return false;
            }
        };
        let request = Request::Initialize {
            ring_handle: ring.handle().0,
            size: size_bytes,
        };
        match self.send_sync(request) {
            Some(Reply::Initialized(true)) => {
                self.ring = Some(ring);
                true
            }
            _ => {
                if let Err(err) = registry.close(ring.handle()) {
                    debug!(%err, "could not release the ring after a failed initialize");
                }
                false
            }
        }
    }

    fn ring(&self) -> Option<Arc<SharedRegion>> {
        self.ring.clone()
    }

    fn last_state(&self) -> State {
        self.route.borrow().last_state
    }

    fn get_state(&mut self) -> State {
        let reply = self.send_sync(Request::GetState);
        self.on_state(reply)
    }

    fn flush(&mut self, put_offset: i32) {
        self.send_async(Request::AsyncFlush { put_offset });
    }

    fn flush_sync(&mut self, put_offset: i32, last_known_get: i32) -> State {
        if self.last_state().error != CbError::NoError {
            return self.last_state();
        }
        let reply = self.send_sync(Request::Flush {
            put_offset,
            last_known_get,
        });
        self.on_state(reply)
    }

    fn create_transfer_buffer(&mut self, size: u32, id_request: i32) -> i32 {
        match self.send_sync(Request::CreateTransferBuffer { size, id_request }) {
            Some(Reply::TransferBufferId(id)) => id,
            _ => -1,
        }
    }

    fn destroy_transfer_buffer(&mut self, id: i32) {
        self.transfer_buffers.remove(&id);
        self.send_async(Request::DestroyTransferBuffer { id });
    }

    fn get_transfer_buffer(&mut self, id: i32) -> Option<Arc<SharedRegion>> {
        if let Some(region) = self.transfer_buffers.get(&id) {
            return Some(Arc::clone(region));
        }
        let (handle, size) = match self.send_sync(Request::GetTransferBuffer { id })? {
            Reply::TransferBuffer { handle, size } if handle != 0 => (handle, size),
            _ => return None,
        };
        let region = match self.host.borrow().registry().open(ShmHandle(handle)) {
            Ok(region) if region.len() >= size as usize => region,
            Ok(_) | Err(_) => {
                warn!(route_id = self.route_id, id, handle, "could not map transfer buffer");
                return None;
            }
        };
        self.transfer_buffers.insert(id, Arc::clone(&region));
        Some(region)
    }
}

impl Drop for CommandBufferProxy {
    fn drop(&mut self) {
        let mut host = self.host.borrow_mut();
        if !host.is_lost() {
            let request = Request::DestroyCommandBuffer {
                route_id: self.route_id,
            };
            if let Err(err) = host.send_async(CONTROL_ROUTE_ID, request) {
                debug!(route_id = self.route_id, %err, "could not destroy command buffer");
            }
        }
        host.remove_route(self.route_id);
        if let Some(ring) = self.ring.take() {
            if let Err(err) = host.registry().close(ring.handle()) {
                debug!(route_id = self.route_id, %err, "could not release the ring");
            }
        }
    }
}
