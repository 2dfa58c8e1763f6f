//! Owns the GPU channels of every renderer.
//!
//! Channels and the manager live on one thread. Anything the embedding host
//! must act on (resizing a native view, bookkeeping for destroyed command
//! buffers) is queued as a [`HostMessage`].

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use gpucmd_ipc::{duplex, Endpoint, RouteId, SharedMemoryRegistry, Size};
use tracing::{debug, info};

use crate::channel::GpuChannel;
use crate::config::ServiceConfig;
use crate::gl::GlDriver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    /// An on-screen context asked for a new size. The route stays
    /// descheduled until [`GpuChannelManager::view_resized`].
    ResizeView {
        renderer_id: i32,
        route_id: RouteId,
        view_id: i32,
        size: Size,
    },
    DestroyCommandBuffer { renderer_id: i32, route_id: RouteId },
    ChannelLost { renderer_id: i32 },
}

pub type HostOutbox = Rc<RefCell<VecDeque<HostMessage>>>;

pub struct GpuChannelManager {
    gl: Rc<dyn GlDriver>,
    registry: SharedMemoryRegistry,
    config: ServiceConfig,
    channels: BTreeMap<i32, GpuChannel>,
    host: HostOutbox,
}

impl GpuChannelManager {
    pub fn new(gl: Rc<dyn GlDriver>, registry: SharedMemoryRegistry, config: ServiceConfig) -> Self {
        Self {
            gl,
            registry,
            config,
            channels: BTreeMap::new(),
            host: HostOutbox::default(),
        }
    }

    /// Opens a channel for `renderer_id` and returns the renderer's end.
    /// `None` if the renderer already has one.
    pub fn establish_channel(&mut self, renderer_id: i32) -> Option<Endpoint> {
        if self.channels.contains_key(&renderer_id) {
            debug!(renderer_id, "channel already established");
            return None;
        }
        let (service_end, client_end) = duplex();
        let channel = GpuChannel::new(
            renderer_id,
            service_end,
            Rc::clone(&self.gl),
            self.registry.clone(),
            self.config,
            Rc::clone(&self.host),
        );
        self.channels.insert(renderer_id, channel);
        info!(renderer_id, "channel established");
        Some(client_end)
    }

    /// Drops the channel and every command buffer on it.
    pub fn close_channel(&mut self, renderer_id: i32) -> bool {
        let closed = self.channels.remove(&renderer_id).is_some();
        if closed {
            info!(renderer_id, "channel closed");
        }
        closed
    }

    pub fn channel(&self, renderer_id: i32) -> Option<&GpuChannel> {
        self.channels.get(&renderer_id)
    }

    pub fn channel_mut(&mut self, renderer_id: i32) -> Option<&mut GpuChannel> {
        self.channels.get_mut(&renderer_id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Services every channel without blocking. Lost channels are dropped.
    /// Returns whether any channel did work.
    pub fn pump(&mut self) -> bool {
        let mut progressed = false;
        for channel in self.channels.values_mut() {
            progressed |= channel.pump();
        }
        self.channels.retain(|&renderer_id, channel| {
            if channel.is_lost() {
                debug!(renderer_id, "dropping lost channel");
            }
            !channel.is_lost()
        });
        progressed
    }

    pub fn view_resized(&mut self, renderer_id: i32, route_id: RouteId) -> bool {
        self.channels
            .get_mut(&renderer_id)
            .is_some_and(|channel| channel.view_resized(route_id))
    }

    pub fn take_host_messages(&mut self) -> Vec<HostMessage> {
        self.host.borrow_mut().drain(..).collect()
    }
}
