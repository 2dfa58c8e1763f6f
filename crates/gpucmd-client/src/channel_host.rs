//! Renderer end of a GPU channel.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use gpucmd_ipc::message::CONTROL_ROUTE_ID;
use gpucmd_ipc::{
    decode_message, encode_message, DecodeError, Endpoint, Event, Message, Reply, Request, RouteId,
    SharedMemoryRegistry, TransportError,
};
use gpucmd_protocol::{CbError, State};
use thiserror::Error;
use tracing::{debug, info, warn};

pub type ChannelHostRef = Rc<RefCell<GpuChannelHost>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unconnected,
    Connected,
    /// Terminal.
    Lost,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,
    #[error("channel lost")]
    Lost,
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed message from service: {0}")]
    Decode(#[from] DecodeError),
}

/// What the host knows about one route, updated as replies and events arrive.
#[derive(Debug, Clone, Default)]
pub struct RouteState {
    pub last_state: State,
    pub swap_count: u64,
    pub lost: bool,
}

impl RouteState {
    fn lose(&mut self) {
        self.lost = true;
        self.last_state.error = CbError::LostContext;
    }

    /// Keeps the freshest snapshot. `get` and `token` only move forward
    /// between wraps, so an older reply never replaces a newer update.
    pub(crate) fn record(&mut self, state: State) {
        if self.lost {
            return;
        }
        self.last_state = state;
        if state.error == CbError::LostContext {
            self.lost = true;
        }
    }
}

pub struct GpuChannelHost {
    state: ChannelState,
    endpoint: Option<Endpoint>,
    registry: SharedMemoryRegistry,
    routes: BTreeMap<RouteId, Rc<RefCell<RouteState>>>,
    next_request_id: u32,
}

impl GpuChannelHost {
    pub fn new(registry: SharedMemoryRegistry) -> Self {
        Self {
            state: ChannelState::Unconnected,
            endpoint: None,
            registry,
            routes: BTreeMap::new(),
            next_request_id: 1,
        }
    }

    pub fn connect(&mut self, endpoint: Endpoint) -> bool {
        if self.state != ChannelState::Unconnected {
            warn!(state = ?self.state, "channel already connected");
            return false;
        }
        self.endpoint = Some(endpoint);
        self.state = ChannelState::Connected;
        info!("channel connected");
        true
    }

    pub fn into_ref(self) -> ChannelHostRef {
        Rc::new(RefCell::new(self))
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_lost(&self) -> bool {
        self.state == ChannelState::Lost
    }

    pub fn registry(&self) -> &SharedMemoryRegistry {
        &self.registry
    }

    pub fn add_route(&mut self, route_id: RouteId) -> Rc<RefCell<RouteState>> {
        let route = Rc::new(RefCell::new(RouteState::default()));
        if self.is_lost() {
            route.borrow_mut().lose();
        }
        self.routes.insert(route_id, Rc::clone(&route));
        route
    }

    pub fn remove_route(&mut self, route_id: RouteId) {
        self.routes.remove(&route_id);
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    fn endpoint(&mut self) -> Result<&mut Endpoint, ChannelError> {
        match self.state {
            ChannelState::Unconnected => Err(ChannelError::NotConnected),
            ChannelState::Lost => Err(ChannelError::Lost),
            ChannelState::Connected => self.endpoint.as_mut().ok_or(ChannelError::NotConnected),
        }
    }

    /// Sends `request` and blocks until its reply. Events arriving meanwhile
    /// are applied to their routes.
    pub fn send_sync(&mut self, route_id: RouteId, request: Request) -> Result<Reply, ChannelError> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let message = Message::Request {
            route_id,
            request_id,
            body: request,
        };
        self.send(&message)?;
        loop {
            let frame = match self.endpoint()?.recv() {
                Ok(frame) => frame,
                Err(err) => return Err(self.fail(err.into())),
            };
            match decode_message(&frame) {
                Ok(Message::Reply {
                    request_id: id, body, ..
                }) if id == request_id => return Ok(body),
                Ok(message) => self.on_message(message),
                Err(err) => return Err(self.fail(err.into())),
            }
        }
    }

    pub fn send_async(&mut self, route_id: RouteId, request: Request) -> Result<(), ChannelError> {
        self.send(&Message::Post {
            route_id,
            body: request,
        })
    }

    fn send(&mut self, message: &Message) -> Result<(), ChannelError> {
        let frame = encode_message(message);
        match self.endpoint()?.send(&frame) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// Applies every event already received. Returns how many messages were
    /// handled.
    pub fn pump(&mut self) -> Result<usize, ChannelError> {
        let mut handled = 0;
        loop {
            let frame = match self.endpoint()?.try_recv() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(handled),
                Err(err) => return Err(self.fail(err.into())),
            };
            match decode_message(&frame) {
                Ok(message) => self.on_message(message),
                Err(err) => return Err(self.fail(err.into())),
            }
            handled += 1;
        }
    }

    fn on_message(&mut self, message: Message) {
        match message {
            Message::Event { route_id, body } => {
                let Some(route) = self.routes.get(&route_id) else {
                    debug!(route_id, "event for unknown route");
                    return;
                };
                let mut route = route.borrow_mut();
                match body {
                    Event::UpdateState(state) => route.record(state),
                    Event::SwapBuffers => route.swap_count += 1,
                    Event::ContextLost => {
                        warn!(route_id, "context lost");
                        route.lose();
                    }
                }
            }
            Message::Reply { route_id, request_id, .. } => {
                warn!(route_id, request_id, "reply nobody waits for");
            }
            Message::Request { route_id, .. } | Message::Post { route_id, .. } => {
                warn!(route_id, "request from service");
            }
        }
    }

    /// Moves the channel and every route to lost.
    fn fail(&mut self, error: ChannelError) -> ChannelError {
        if self.state != ChannelState::Lost {
            warn!(%error, routes = self.routes.len(), "channel lost");
            self.state = ChannelState::Lost;
            for route in self.routes.values() {
                route.borrow_mut().lose();
            }
            if let Some(endpoint) = self.endpoint.take() {
                endpoint.close();
            }
        }
        match error {
            ChannelError::Transport(TransportError::Closed) => ChannelError::Lost,
            error => error,
        }
    }

    /// Asks the service for a new route on the control route.
    pub(crate) fn create_route(&mut self, request: Request) -> Result<RouteId, ChannelError> {
        match self.send_sync(CONTROL_ROUTE_ID, request)? {
            Reply::RouteCreated(route_id) => Ok(route_id),
            reply => {
                warn!(?reply, "unexpected reply to route creation");
                Ok(-1)
            }
        }
    }
}

impl Drop for GpuChannelHost {
    fn drop(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpucmd_ipc::duplex;

    #[test]
    fn unconnected_host_refuses_requests() {
        let mut host = GpuChannelHost::new(SharedMemoryRegistry::new());
        assert_eq!(host.send_sync(1, Request::GetState), Err(ChannelError::NotConnected));
        assert_eq!(host.state(), ChannelState::Unconnected);
    }

    #[test]
    fn closed_transport_loses_every_route() {
        let (client, service) = duplex();
        let mut host = GpuChannelHost::new(SharedMemoryRegistry::new());
        assert!(host.connect(client));
        let a = host.add_route(1);
        let b = host.add_route(2);
        drop(service);

        assert_eq!(host.send_sync(1, Request::GetState), Err(ChannelError::Lost));
        assert!(host.is_lost());
        assert!(a.borrow().lost);
        assert_eq!(b.borrow().last_state.error, CbError::LostContext);
        assert_eq!(host.send_async(2, Request::AsyncGetState), Err(ChannelError::Lost));
        // Routes added afterwards start out lost.
        assert!(host.add_route(3).borrow().lost);
    }

    #[test]
    fn events_update_routes_while_waiting() {
        let (client, mut service) = duplex();
        let mut host = GpuChannelHost::new(SharedMemoryRegistry::new());
        host.connect(client);
        let route = host.add_route(4);

        let update = State {
            size: 16,
            get_offset: 3,
            put_offset: 3,
            token: 9,
            error: CbError::NoError,
        };
        for body in [Event::SwapBuffers, Event::UpdateState(update)] {
            let frame = encode_message(&Message::Event { route_id: 4, body });
            service.send(&frame).unwrap();
        }
        let reply = Message::Reply {
            route_id: 4,
            request_id: 1,
            body: Reply::Ack,
        };
        service.send(&encode_message(&reply)).unwrap();

        assert_eq!(host.send_sync(4, Request::AsyncGetState), Ok(Reply::Ack));
        assert_eq!(route.borrow().swap_count, 1);
        assert_eq!(route.borrow().last_state, update);
    }

    #[test]
    fn garbage_from_service_is_fatal() {
        let (client, mut service) = duplex();
        let mut host = GpuChannelHost::new(SharedMemoryRegistry::new());
        host.connect(client);
        service.send(&[0xee]).unwrap();
        assert!(matches!(host.pump(), Err(ChannelError::Decode(_))));
        assert!(host.is_lost());
        assert!(service.is_closed());
    }
}
