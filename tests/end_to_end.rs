//! Several renderers and contexts sharing one GPU service thread.

use std::rc::Rc;
use std::sync::mpsc::{self, TryRecvError};
use std::thread::{self, JoinHandle};

use gpucmd_client::{
    ChannelHostRef, ChannelState, CommandBufferHelper, CommandBufferProxy, Gles2CmdHelper, GpuChannelHost, HelperError,
    DEFAULT_RING_BUFFER_BYTES,
};
use gpucmd_ipc::{Endpoint, SharedMemoryRegistry, Size};
use gpucmd_protocol::{gl, CbError, CommandEncoder};
use gpucmd_service::{GpuChannelManager, ServiceConfig, SoftGl};
use pretty_assertions::assert_eq;

struct Service {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<usize>,
}

impl Service {
    /// Starts a service with one channel per renderer id.
    fn spawn(registry: SharedMemoryRegistry, renderers: &[i32]) -> (Self, Vec<Endpoint>) {
        let renderers = renderers.to_vec();
        let count = renderers.len();
        let (endpoint_tx, endpoint_rx) = mpsc::channel();
        let (stop, stop_rx) = mpsc::channel();
        let thread = thread::spawn(move || {
            let mut manager = GpuChannelManager::new(Rc::new(SoftGl::new()), registry, ServiceConfig::default());
            for renderer_id in renderers {
                endpoint_tx
                    .send(manager.establish_channel(renderer_id).unwrap())
                    .unwrap();
            }
            while matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                if !manager.pump() {
                    thread::yield_now();
                }
            }
            manager.channel_count()
        });
        let endpoints = (0..count).map(|_| endpoint_rx.recv().unwrap()).collect();
        (Self { stop, thread }, endpoints)
    }

    /// Returns how many channels were still open.
    fn stop(self) -> usize {
        let _ = self.stop.send(());
        self.thread.join().unwrap()
    }
}

fn host(registry: &SharedMemoryRegistry, endpoint: Endpoint) -> ChannelHostRef {
    let host = GpuChannelHost::new(registry.clone()).into_ref();
    assert!(host.borrow_mut().connect(endpoint));
    host
}

fn offscreen(host: &ChannelHostRef) -> Gles2CmdHelper<CommandBufferProxy> {
    let proxy = CommandBufferProxy::create_offscreen(host, Size::new(4, 4), None).unwrap();
    let mut helper = CommandBufferHelper::new(proxy);
    helper.initialize(DEFAULT_RING_BUFFER_BYTES).unwrap();
    Gles2CmdHelper::new(helper).unwrap()
}

#[test]
fn latch_orders_work_between_contexts() {
    let registry = SharedMemoryRegistry::new();
    let (service, endpoints) = Service::spawn(registry.clone(), &[1]);
    let host = host(&registry, endpoints.into_iter().next().unwrap());
    let mut consumer = offscreen(&host);
    let mut producer = offscreen(&host);

    consumer.wait_latch(3);
    consumer.clear(gl::COLOR_BUFFER_BIT);
    consumer.swap_buffers();
    consumer.flush();

    producer.clear_color(0.0, 0.0, 1.0, 1.0);
    producer.clear(gl::COLOR_BUFFER_BIT);
    producer.set_latch(3);
    producer.finish().unwrap();

    consumer.finish().unwrap();
    assert_eq!(consumer.helper().command_buffer().swap_count(), 1);
    assert_eq!(consumer.helper().last_state().error, CbError::NoError);
    assert_eq!(producer.get_error().unwrap(), gl::NO_ERROR);

    drop(consumer);
    drop(producer);
    drop(host);
    service.stop();
}

#[test]
fn a_parse_error_stays_with_its_context() {
    let registry = SharedMemoryRegistry::new();
    let (service, endpoints) = Service::spawn(registry.clone(), &[1]);
    let host = host(&registry, endpoints.into_iter().next().unwrap());
    let mut broken = offscreen(&host);
    let mut healthy = offscreen(&host);

    broken.gen_textures(&[0]);
    assert_eq!(
        broken.finish(),
        Err(HelperError::CommandBuffer(CbError::InvalidArguments))
    );

    healthy.clear(gl::COLOR_BUFFER_BIT);
    healthy.finish().unwrap();
    let pixels = healthy.read_pixels(0, 0, 1, 1, gl::RGBA, gl::UNSIGNED_BYTE).unwrap();
    assert_eq!(pixels, Some(vec![0, 0, 0, 0]));
    assert_eq!(host.borrow().state(), ChannelState::Connected);

    drop(broken);
    drop(healthy);
    drop(host);
    service.stop();
}

#[test]
fn renderers_do_not_share_a_fate() {
    let registry = SharedMemoryRegistry::new();
    let (service, endpoints) = Service::spawn(registry.clone(), &[1, 2]);
    let mut endpoints = endpoints.into_iter();
    let first = host(&registry, endpoints.next().unwrap());
    let second = host(&registry, endpoints.next().unwrap());

    let mut a = offscreen(&first);
    let mut b = offscreen(&second);
    a.clear(gl::COLOR_BUFFER_BIT);
    a.finish().unwrap();

    // The first renderer goes away with its context still alive.
    drop(a);
    drop(first);

    b.clear_color(1.0, 1.0, 1.0, 1.0);
    b.clear(gl::COLOR_BUFFER_BIT);
    let pixels = b.read_pixels(3, 3, 1, 1, gl::RGBA, gl::UNSIGNED_BYTE).unwrap();
    assert_eq!(pixels, Some(vec![255; 4]));
    assert!(!b.helper().command_buffer().is_lost());

    drop(b);
    drop(second);
    service.stop();
}
