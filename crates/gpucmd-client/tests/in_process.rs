//! Client helpers driven against a real service on the same thread.

use std::rc::Rc;
use std::sync::Arc;

use gpucmd_client::{CommandBuffer, CommandBufferHelper, Gles2CmdHelper, HelperError};
use gpucmd_ipc::{SharedMemoryRegistry, SharedRegion, Size};
use gpucmd_protocol::gl;
use gpucmd_protocol::{CbError, CommandEncoder, CommandNames, State};
use gpucmd_service::context_group::ContextGroup;
use gpucmd_service::latch::LatchTable;
use gpucmd_service::{
    ChannelConfig, CommandBufferService, ContextGroupConfig, DecoderConfig, Gles2Decoder, GlDriver, GpuScheduler,
    HeadlessSurface, SoftGl,
};
use pretty_assertions::assert_eq;

/// A [`CommandBuffer`] whose sync flush runs one scheduler batch inline.
struct InProcess {
    gl: Rc<SoftGl>,
    registry: SharedMemoryRegistry,
    service: CommandBufferService,
    scheduler: GpuScheduler<HeadlessSurface>,
    ring: Option<Arc<SharedRegion>>,
    flushes: u32,
}

impl InProcess {
    fn new(config: DecoderConfig) -> Self {
        let gl = Rc::new(SoftGl::new());
        let driver: Rc<dyn GlDriver> = gl.clone();
        let registry = SharedMemoryRegistry::new();
        let decoder = Gles2Decoder::new(
            driver,
            HeadlessSurface::new(Size::new(4, 4)),
            ContextGroup::new_ref(),
            LatchTable::new(),
            Rc::new(CommandNames::new()),
            config,
        );
        Self {
            gl,
            service: CommandBufferService::new(registry.clone(), &ChannelConfig::default()),
            registry,
            scheduler: GpuScheduler::new(decoder, &config),
            ring: None,
            flushes: 0,
        }
    }
}

impl CommandBuffer for InProcess {
    fn initialize(&mut self, size_bytes: u32) -> bool {
        let Ok(handle) = self.registry.create(size_bytes as usize) else {
            return false;
        };
        if !self.service.initialize(handle, size_bytes) {
            return false;
        }
        if self
            .scheduler
            .initialize(&self.service, &ContextGroupConfig::default())
            .is_err()
        {
            return false;
        }
        self.ring = self.registry.open(handle).ok();
        true
    }

    fn ring(&self) -> Option<Arc<SharedRegion>> {
        self.ring.clone()
    }

    fn last_state(&self) -> State {
        self.service.get_state()
    }

    fn get_state(&mut self) -> State {
        self.service.get_state()
    }

    fn flush(&mut self, put_offset: i32) {
        self.service.flush_sync(put_offset);
    }

    fn flush_sync(&mut self, put_offset: i32, _last_known_get: i32) -> State {
        self.flushes += 1;
        if self.service.flush_sync(put_offset) {
            self.scheduler.process_commands(&mut self.service);
        }
        self.service.get_state()
    }

    fn create_transfer_buffer(&mut self, size: u32, id_request: i32) -> i32 {
        self.service.create_transfer_buffer(size, id_request)
    }

    fn destroy_transfer_buffer(&mut self, id: i32) {
        self.service.destroy_transfer_buffer(id);
    }

    fn get_transfer_buffer(&mut self, id: i32) -> Option<Arc<SharedRegion>> {
        self.service.get_transfer_buffer(id).map(|buffer| buffer.region)
    }
}

fn gles2(ring_bytes: u32, result_bytes: u32) -> Gles2CmdHelper<InProcess> {
    gles2_with(DecoderConfig::default(), ring_bytes, result_bytes)
}

fn gles2_with(config: DecoderConfig, ring_bytes: u32, result_bytes: u32) -> Gles2CmdHelper<InProcess> {
    let mut helper = CommandBufferHelper::new(InProcess::new(config));
    helper.initialize(ring_bytes).unwrap();
    Gles2CmdHelper::with_result_bytes(helper, result_bytes).unwrap()
}

#[test]
fn small_ring_wraps_many_times() {
    let mut g = gles2(64 * 4, 4096);
    g.clear_color(0.0, 0.0, 1.0, 1.0);
    for _ in 0..200 {
        g.clear(gl::COLOR_BUFFER_BIT);
    }
    g.finish().unwrap();

    let command_buffer = g.helper().command_buffer();
    assert_eq!(command_buffer.gl.call_count("clear("), 200);
    assert_eq!(command_buffer.service.error(), CbError::NoError);
    assert_eq!(g.get_error().unwrap(), gl::NO_ERROR);
}

#[test]
fn read_pixels_round_trip() {
    let mut g = gles2(4096, 4096);
    g.clear_color(0.0, 1.0, 0.0, 1.0);
    g.clear(gl::COLOR_BUFFER_BIT);
    let pixels = g.read_pixels(0, 0, 2, 2, gl::RGBA, gl::UNSIGNED_BYTE).unwrap();
    assert_eq!(pixels, Some([0, 255, 0, 255].repeat(4)));

    // Rejected formats leave a GL error and no pixels.
    assert_eq!(g.read_pixels(0, 0, 1, 1, 0x1234, gl::UNSIGNED_BYTE).unwrap(), None);
    assert_eq!(g.get_error().unwrap(), gl::INVALID_ENUM);
}

#[test]
fn read_pixels_larger_than_the_result_buffer_is_refused() {
    let mut g = gles2(4096, 64);
    let err = g.read_pixels(0, 0, 8, 8, gl::RGBA, gl::UNSIGNED_BYTE).unwrap_err();
    assert!(matches!(err, HelperError::CommandTooLarge { .. }));
    assert_eq!(g.helper().command_buffer().gl.call_count("read_pixels"), 0);
}

#[test]
fn strings_come_back_through_a_bucket() {
    let mut g = gles2(4096, 4096);
    assert_eq!(g.get_string(gl::VENDOR).unwrap(), "gpucmd");
    assert!(g.get_string(gl::VERSION).unwrap().starts_with("OpenGL ES 2.0"));
}

#[test]
fn shader_source_is_chunked_through_a_small_result_buffer() {
    let mut g = gles2(4096, 36);
    let source = "uniform vec4 u_color; ".repeat(20) + "void main() {}";
    g.create_shader(gl::VERTEX_SHADER, 5);
    g.shader_source(5, &source).unwrap();
    assert_eq!(g.get_shader_source(5).unwrap(), source);
    assert_eq!(
        g.get_shaderiv(5, gl::SHADER_SOURCE_LENGTH).unwrap(),
        source.len() as i32 + 1
    );
    assert_eq!(g.get_error().unwrap(), gl::NO_ERROR);
}

#[test]
fn locations_and_link_status() {
    let mut g = gles2(4096, 4096);
    g.create_shader(gl::VERTEX_SHADER, 2);
    g.shader_source(2, "attribute vec4 a_position; uniform vec4 u_color; void main() {}")
        .unwrap();
    g.compile_shader(2);
    g.create_shader(gl::FRAGMENT_SHADER, 3);
    g.shader_source(3, "precision mediump float; void main() {}").unwrap();
    g.compile_shader(3);
    g.create_program(1);
    g.attach_shader(1, 2);
    g.attach_shader(1, 3);

    // Not linked yet.
    assert_eq!(g.get_uniform_location(1, "u_color").unwrap(), -1);
    assert_eq!(g.get_error().unwrap(), gl::INVALID_OPERATION);
    g.link_program(1);
    assert_eq!(g.get_programiv(1, gl::LINK_STATUS).unwrap(), 1);
    assert!(g.get_uniform_location(1, "u_color").unwrap() >= 0);
    assert!(g.get_attrib_location(1, "a_position").unwrap() >= 0);
    assert_eq!(g.get_uniform_location(1, "u_missing").unwrap(), -1);
    assert_eq!(g.get_error().unwrap(), gl::NO_ERROR);
}

#[test]
fn uniform_and_shader_queries() {
    let mut g = gles2(4096, 4096);
    g.create_shader(gl::VERTEX_SHADER, 2);
    g.shader_source(2, "uniform vec4 u_color; uniform sampler2D u_tex; void main() {}")
        .unwrap();
    g.compile_shader(2);
    g.create_shader(gl::FRAGMENT_SHADER, 3);
    g.shader_source(3, "precision mediump float; void main() {}").unwrap();
    g.compile_shader(3);
    g.create_program(1);
    g.attach_shader(1, 2);
    g.attach_shader(1, 3);
    g.link_program(1);
    assert_eq!(g.get_attached_shaders(1).unwrap(), [2, 3]);

    let color = g.get_uniform_location(1, "u_color").unwrap();
    let sampler = g.get_uniform_location(1, "u_tex").unwrap();
    g.use_program(1);
    g.uniform4fv(color, &[0.25, 0.5, 0.75, 1.0]);
    g.uniform1i(sampler, 2);
    assert_eq!(g.get_uniformfv(1, color).unwrap(), [0.25, 0.5, 0.75, 1.0]);
    assert_eq!(g.get_uniformiv(1, sampler).unwrap(), [2]);
    assert_eq!(g.get_error().unwrap(), gl::NO_ERROR);

    assert!(g.get_uniformiv(1, 40).unwrap().is_empty());
    assert_eq!(g.get_error().unwrap(), gl::INVALID_OPERATION);

    assert_eq!(
        g.get_shader_precision_format(gl::FRAGMENT_SHADER, gl::MEDIUM_FLOAT).unwrap(),
        Some(([-62, 62], -16))
    );
    assert_eq!(g.get_shader_precision_format(gl::FRAGMENT_SHADER, gl::RGBA).unwrap(), None);
    assert_eq!(g.get_error().unwrap(), gl::INVALID_ENUM);
}

#[test]
fn tokens_track_the_service() {
    let mut g = gles2(4096, 4096);
    let helper = g.helper_mut();
    helper.noop(3);
    let token = helper.insert_token();
    assert!(!helper.has_token_passed(token));
    helper.wait_for_token(token).unwrap();
    assert_eq!(helper.last_state().token, token);
    assert!(helper.has_token_passed(token));
}

#[test]
fn finish_loops_until_every_batch_ran() {
    let config = DecoderConfig {
        commands_per_batch: 4,
        ..DecoderConfig::default()
    };
    let mut g = gles2_with(config, 4096, 4096);
    for _ in 0..10 {
        g.clear(gl::COLOR_BUFFER_BIT);
    }
    g.finish().unwrap();
    let command_buffer = g.helper().command_buffer();
    assert_eq!(command_buffer.gl.call_count("clear("), 10);
    assert!(command_buffer.flushes >= 3);
}

#[test]
fn lost_context_stops_the_helper() {
    let mut g = gles2(4096, 4096);
    g.clear(gl::COLOR_BUFFER_BIT);
    g.finish().unwrap();

    // Another context takes the driver and ours cannot be made current again.
    let driver = &g.helper().command_buffer().gl;
    let other = driver.create_context().unwrap();
    assert!(driver.make_current(other));
    driver.set_fail_make_current(true);
    g.clear(gl::COLOR_BUFFER_BIT);
    assert_eq!(g.finish(), Err(HelperError::CommandBuffer(CbError::LostContext)));

    // Everything after the loss fails fast instead of waiting.
    assert_eq!(g.get_error(), Err(HelperError::CommandBuffer(CbError::LostContext)));
    let helper = g.helper_mut();
    let token = helper.insert_token();
    assert_eq!(
        helper.wait_for_token(token),
        Err(HelperError::CommandBuffer(CbError::LostContext))
    );
}

#[test]
fn commands_after_a_parse_error_are_not_run() {
    let mut g = gles2(4096, 4096);
    // Generating id 0 is a fault, not a GL error.
    g.gen_buffers(&[0]);
    g.clear(gl::COLOR_BUFFER_BIT);
    assert_eq!(
        g.finish(),
        Err(HelperError::CommandBuffer(CbError::InvalidArguments))
    );
    assert_eq!(g.helper().command_buffer().gl.call_count("clear("), 0);
}
