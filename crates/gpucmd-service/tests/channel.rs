mod common;

use std::rc::Rc;
use std::sync::Arc;

use gpucmd_ipc::{
    decode_message, encode_message, Endpoint, Event, Message, Reply, Request, RouteId, SharedMemoryRegistry,
    SharedRegion, ShmHandle, Size, TransportError,
};
use gpucmd_protocol::gl;
use gpucmd_protocol::{CbError, CommandEncoder, CommandWriter, State};
use gpucmd_service::{GlDriver, GpuChannelManager, HostMessage, ServiceConfig, SoftGl};
use pretty_assertions::assert_eq;

const RENDERER: i32 = 3;
const RING_ENTRIES: u32 = 1024;

struct Context {
    route_id: RouteId,
    ring: Arc<SharedRegion>,
    put: i32,
}

/// Plays the renderer side of one channel by hand.
struct Renderer {
    gl: Rc<SoftGl>,
    registry: SharedMemoryRegistry,
    manager: GpuChannelManager,
    endpoint: Endpoint,
    next_request_id: u32,
    events: Vec<(RouteId, Event)>,
}

impl Renderer {
    fn new() -> Self {
        common::init_tracing();
        let gl = Rc::new(SoftGl::new());
        let driver: Rc<dyn GlDriver> = gl.clone();
        let registry = SharedMemoryRegistry::new();
        let mut manager = GpuChannelManager::new(driver, registry.clone(), ServiceConfig::default());
        let endpoint = manager.establish_channel(RENDERER).unwrap();
        Self {
            gl,
            registry,
            manager,
            endpoint,
            next_request_id: 1,
            events: Vec::new(),
        }
    }

    /// Drains everything the service sent; returns the replies.
    fn drain(&mut self) -> Vec<(u32, Reply)> {
        let mut replies = Vec::new();
        loop {
            match self.endpoint.try_recv() {
                Ok(Some(frame)) => match decode_message(&frame).unwrap() {
                    Message::Reply { request_id, body, .. } => replies.push((request_id, body)),
                    Message::Event { route_id, body } => self.events.push((route_id, body)),
                    other => panic!("unexpected message from service: {other:?}"),
                },
                Ok(None) | Err(TransportError::Closed) => return replies,
                Err(err) => panic!("transport failed: {err}"),
            }
        }
    }

    fn send(&mut self, route_id: RouteId, body: Request) -> u32 {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let message = Message::Request {
            route_id,
            request_id,
            body,
        };
        self.endpoint.send(&encode_message(&message)).unwrap();
        request_id
    }

    fn post(&mut self, route_id: RouteId, body: Request) {
        self.endpoint
            .send(&encode_message(&Message::Post { route_id, body }))
            .unwrap();
        self.manager.pump();
        self.drain();
    }

    fn request(&mut self, route_id: RouteId, body: Request) -> Reply {
        let request_id = self.send(route_id, body);
        self.manager.pump();
        let replies = self.drain();
        let [(id, reply)] = <[_; 1]>::try_from(replies).expect("exactly one reply");
        assert_eq!(id, request_id);
        reply
    }

    fn create_offscreen(&mut self, parent_route_id: RouteId, parent_texture_id: u32) -> Context {
        let reply = self.request(
            0,
            Request::CreateOffscreenCommandBuffer {
                size: Size::new(4, 4),
                parent_route_id,
                parent_texture_id,
            },
        );
        let Reply::RouteCreated(route_id) = reply else {
            panic!("unexpected reply {reply:?}");
        };
        assert!(route_id > 0);
        self.initialize(route_id)
    }

    fn initialize(&mut self, route_id: RouteId) -> Context {
        let handle = self.registry.create(RING_ENTRIES as usize * 4).unwrap();
        let ring = self.registry.open(handle).unwrap();
        let reply = self.request(
            route_id,
            Request::Initialize {
                ring_handle: handle.0,
                size: RING_ENTRIES * 4,
            },
        );
        assert_eq!(reply, Reply::Initialized(true));
        Context { route_id, ring, put: 0 }
    }

    fn write(&mut self, ctx: &mut Context, build: impl FnOnce(&mut CommandWriter)) {
        let mut w = CommandWriter::new();
        build(&mut w);
        ctx.ring.write_words(ctx.put as usize * 4, w.entries()).unwrap();
        ctx.put += w.len_entries() as i32;
    }

    fn flush(&mut self, ctx: &mut Context, build: impl FnOnce(&mut CommandWriter)) -> State {
        self.write(ctx, build);
        let reply = self.request(
            ctx.route_id,
            Request::Flush {
                put_offset: ctx.put,
                last_known_get: 0,
            },
        );
        let Reply::State(state) = reply else {
            panic!("unexpected reply {reply:?}");
        };
        state
    }

    fn get_state(&mut self, ctx: &Context) -> State {
        match self.request(ctx.route_id, Request::GetState) {
            Reply::State(state) => state,
            reply => panic!("unexpected reply {reply:?}"),
        }
    }

    fn events_for(&self, route_id: RouteId) -> Vec<Event> {
        self.events
            .iter()
            .filter(|(r, _)| *r == route_id)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[test]
fn flush_runs_commands_and_reports_state() {
    let mut r = Renderer::new();
    let mut ctx = r.create_offscreen(0, 0);
    let state = r.flush(&mut ctx, |w| {
        w.set_token(11);
        w.clear(gl::COLOR_BUFFER_BIT);
    });
    assert_eq!(state.get_offset, ctx.put);
    assert_eq!(state.token, 11);
    assert_eq!(state.error, CbError::NoError);
    assert_eq!(r.get_state(&ctx), state);
}

#[test]
fn async_flush_answers_with_an_update() {
    let mut r = Renderer::new();
    let mut ctx = r.create_offscreen(0, 0);
    r.write(&mut ctx, |w| w.set_token(5));
    r.post(ctx.route_id, Request::AsyncFlush { put_offset: ctx.put });
    let updates: Vec<State> = r
        .events_for(ctx.route_id)
        .into_iter()
        .filter_map(|e| match e {
            Event::UpdateState(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(updates.last().map(|s| s.token), Some(5));
}

#[test]
fn transfer_buffers_are_shared_with_the_renderer() {
    let mut r = Renderer::new();
    let ctx = r.create_offscreen(0, 0);
    let reply = r.request(
        ctx.route_id,
        Request::CreateTransferBuffer {
            size: 256,
            id_request: 0,
        },
    );
    let Reply::TransferBufferId(id) = reply else {
        panic!("unexpected reply {reply:?}");
    };
    assert!(id > 0);
    let reply = r.request(ctx.route_id, Request::GetTransferBuffer { id });
    let Reply::TransferBuffer { handle, size } = reply else {
        panic!("unexpected reply {reply:?}");
    };
    assert_eq!(size, 256);
    assert!(r.registry.open(ShmHandle(handle)).is_ok());

    assert_eq!(r.request(ctx.route_id, Request::DestroyTransferBuffer { id }), Reply::Ack);
    assert_eq!(
        r.request(ctx.route_id, Request::GetTransferBuffer { id }),
        Reply::TransferBuffer { handle: 0, size: 0 }
    );
}

#[test]
fn flush_past_the_ring_is_out_of_bounds() {
    let mut r = Renderer::new();
    let ctx = r.create_offscreen(0, 0);
    let reply = r.request(
        ctx.route_id,
        Request::Flush {
            put_offset: RING_ENTRIES as i32,
            last_known_get: 0,
        },
    );
    let Reply::State(state) = reply else {
        panic!("unexpected reply {reply:?}");
    };
    assert_eq!(state.error, CbError::OutOfBounds);
    assert_eq!(state.put_offset, 0);
}

#[test]
fn requests_for_unknown_routes_are_harmless() {
    let mut r = Renderer::new();
    assert_eq!(
        r.request(
            9,
            Request::Initialize {
                ring_handle: 1,
                size: 64
            }
        ),
        Reply::Initialized(false)
    );
    assert_eq!(r.request(9, Request::GetState), Reply::Ack);
    assert_eq!(
        r.request(
            0,
            Request::CreateOffscreenCommandBuffer {
                size: Size::new(4, 4),
                parent_route_id: 9,
                parent_texture_id: 1,
            }
        ),
        Reply::RouteCreated(-1)
    );
    assert!(!r.manager.channel(RENDERER).unwrap().is_lost());
}

#[test]
fn malformed_message_loses_every_context() {
    let mut r = Renderer::new();
    let routes: Vec<RouteId> = (0..3).map(|_| r.create_offscreen(0, 0).route_id).collect();

    r.endpoint.send(&[0xff, 0xff, 0x00]).unwrap();
    r.manager.pump();
    r.drain();

    for &route_id in &routes {
        assert_eq!(r.events_for(route_id), [Event::ContextLost]);
    }
    assert!(r.endpoint.is_closed());
    let host = r.manager.take_host_messages();
    assert!(host.contains(&HostMessage::ChannelLost { renderer_id: RENDERER }));
    // The lost channel and its stubs are gone.
    assert_eq!(r.manager.channel_count(), 0);
    assert!(host.contains(&HostMessage::DestroyCommandBuffer {
        renderer_id: RENDERER,
        route_id: routes[0],
    }));
    assert_eq!(r.gl.live_contexts(), 0);
}

#[test]
fn async_flush_on_a_lost_context_loses_the_channel() {
    let mut r = Renderer::new();
    let mut a = r.create_offscreen(0, 0);
    let b = r.create_offscreen(0, 0);

    // Another context takes the driver and ours cannot come back.
    let other = r.gl.create_context().unwrap();
    assert!(r.gl.make_current(other));
    r.gl.set_fail_make_current(true);

    r.write(&mut a, |w| w.set_token(1));
    r.post(a.route_id, Request::AsyncFlush { put_offset: a.put });
    assert_eq!(r.events_for(a.route_id), [Event::ContextLost]);
    assert_eq!(r.events_for(b.route_id), [Event::ContextLost]);
    assert!(r.endpoint.is_closed());
}

#[test]
fn swap_buffers_notifies_the_client() {
    let mut r = Renderer::new();
    let mut ctx = r.create_offscreen(0, 0);
    let state = r.flush(&mut ctx, |w| {
        w.swap_buffers();
        w.set_token(2);
    });
    // The sync flush stops at the swap; the channel finishes the rest.
    assert_eq!(state.token, 0);
    assert!(r.events_for(ctx.route_id).contains(&Event::SwapBuffers));
    r.manager.pump();
    r.drain();
    assert_eq!(r.get_state(&ctx).token, 2);
}

#[test]
fn latch_set_by_one_context_releases_another() {
    let mut r = Renderer::new();
    let mut waiter = r.create_offscreen(0, 0);
    let mut setter = r.create_offscreen(0, 0);

    let state = r.flush(&mut waiter, |w| {
        w.wait_latch(5);
        w.set_token(1);
    });
    assert_eq!(state.token, 0);
    assert_eq!(state.error, CbError::NoError);
    r.manager.pump();
    assert_eq!(r.get_state(&waiter).token, 0);

    r.flush(&mut setter, |w| w.set_latch(5));
    r.manager.pump();
    r.drain();
    assert_eq!(r.get_state(&waiter).token, 1);
}

#[test]
fn offscreen_child_presents_into_its_parent_texture() {
    let mut r = Renderer::new();
    let parent = r.create_offscreen(0, 0);
    let mut child = r.create_offscreen(parent.route_id, 77);

    r.flush(&mut child, |w| {
        w.clear_color(0.0, 1.0, 0.0, 1.0);
        w.clear(gl::COLOR_BUFFER_BIT);
        w.swap_buffers();
    });

    let channel = r.manager.channel(RENDERER).unwrap();
    let service_id = channel
        .stub(parent.route_id)
        .and_then(|stub| stub.scheduler())
        .and_then(|scheduler| scheduler.decoder().group().borrow().ids.textures.get_service_id(77))
        .expect("parent texture registered");
    let level = r.gl.texture_level(service_id, gl::TEXTURE_2D, 0).unwrap();
    assert_eq!((level.width, level.height), (4, 4));
    assert_eq!(&level.data[..4], &[0, 255, 0, 255]);
}

#[test]
fn parent_texture_id_collision_fails_initialization() {
    let mut r = Renderer::new();
    let mut parent = r.create_offscreen(0, 0);
    r.flush(&mut parent, |w| w.gen_textures(&[77]));

    let reply = r.request(
        0,
        Request::CreateOffscreenCommandBuffer {
            size: Size::new(4, 4),
            parent_route_id: parent.route_id,
            parent_texture_id: 77,
        },
    );
    let Reply::RouteCreated(route_id) = reply else {
        panic!("unexpected reply {reply:?}");
    };
    let handle = r.registry.create(RING_ENTRIES as usize * 4).unwrap();
    let reply = r.request(
        route_id,
        Request::Initialize {
            ring_handle: handle.0,
            size: RING_ENTRIES * 4,
        },
    );
    assert_eq!(reply, Reply::Initialized(false));
}

#[test]
fn view_resize_waits_for_the_host() {
    let mut r = Renderer::new();
    let reply = r.request(
        0,
        Request::CreateViewCommandBuffer {
            view_id: 40,
            size: Size::new(8, 8),
        },
    );
    let Reply::RouteCreated(route_id) = reply else {
        panic!("unexpected reply {reply:?}");
    };
    let mut ctx = r.initialize(route_id);

    r.flush(&mut ctx, |w| w.resize(32, 16));
    let host = r.manager.take_host_messages();
    assert_eq!(
        host,
        [HostMessage::ResizeView {
            renderer_id: RENDERER,
            route_id,
            view_id: 40,
            size: Size::new(32, 16),
        }]
    );

    let state = r.flush(&mut ctx, |w| w.set_token(6));
    assert_eq!(state.token, 0);
    assert!(r.manager.view_resized(RENDERER, route_id));
    r.manager.pump();
    r.drain();
    assert_eq!(r.get_state(&ctx).token, 6);
}

#[test]
fn destroying_a_route_tells_the_host() {
    let mut r = Renderer::new();
    let ctx = r.create_offscreen(0, 0);
    assert_eq!(
        r.request(0, Request::DestroyCommandBuffer { route_id: ctx.route_id }),
        Reply::Ack
    );
    assert_eq!(r.manager.channel(RENDERER).unwrap().route_count(), 0);
    assert_eq!(
        r.manager.take_host_messages(),
        [HostMessage::DestroyCommandBuffer {
            renderer_id: RENDERER,
            route_id: ctx.route_id,
        }]
    );
}

#[test]
fn share_group_objects_live_until_its_last_context_goes() {
    let mut r = Renderer::new();
    let mut parent = r.create_offscreen(0, 0);
    let mut child = r.create_offscreen(parent.route_id, 77);
    r.flush(&mut parent, |w| w.gen_buffers(&[1, 2]));
    r.flush(&mut child, |w| w.gen_textures(&[3]));
    assert_eq!(r.gl.live_buffers(), 2);

    assert_eq!(
        r.request(0, Request::DestroyCommandBuffer { route_id: child.route_id }),
        Reply::Ack
    );
    assert_eq!(r.gl.live_contexts(), 1);
    assert_eq!(r.gl.live_buffers(), 2);
    // The parent still uses what the child left behind.
    let state = r.flush(&mut parent, |w| {
        w.bind_buffer(gl::ARRAY_BUFFER, 2);
        w.bind_texture(gl::TEXTURE_2D, 3);
    });
    assert_eq!(state.error, CbError::NoError);
    let group = r
        .manager
        .channel(RENDERER)
        .and_then(|channel| channel.stub(parent.route_id))
        .and_then(|stub| stub.scheduler())
        .map(|scheduler| scheduler.decoder().group().borrow().context_count());
    assert_eq!(group, Some(1));

    assert_eq!(
        r.request(0, Request::DestroyCommandBuffer { route_id: parent.route_id }),
        Reply::Ack
    );
    assert_eq!(r.gl.live_contexts(), 0);
    assert_eq!(r.gl.live_buffers(), 0);
    assert_eq!(r.gl.live_textures(), 0);
}

#[test]
fn dropping_the_renderer_end_closes_the_channel() {
    let mut r = Renderer::new();
    r.create_offscreen(0, 0);
    let Renderer {
        gl, mut manager, endpoint, ..
    } = r;
    drop(endpoint);
    manager.pump();
    assert_eq!(manager.channel_count(), 0);
    assert_eq!(gl.live_contexts(), 0);
}
