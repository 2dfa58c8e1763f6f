#![allow(dead_code)]

use std::rc::Rc;
use std::sync::Arc;

use gpucmd_ipc::{SharedMemoryRegistry, SharedRegion, Size};
use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::{CbError, CommandEncoder, CommandNames, CommandWriter};
use gpucmd_service::context_group::ContextGroup;
use gpucmd_service::latch::LatchTable;
use gpucmd_service::{
    ChannelConfig, CommandBufferService, ContextGroupConfig, DecoderConfig, Gles2Decoder, GlDriver, GpuScheduler,
    HeadlessSurface, ProcessOutcome, SoftGl,
};

pub const RING_ENTRIES: u32 = 4096;
pub const SHM_BYTES: u32 = 64 * 1024;

pub const VS: &str = "attribute vec4 a_position; uniform vec4 u_color; void main() {}";
pub const FS: &str = "precision mediump float; uniform sampler2D u_tex; void main() {}";

/// One offscreen context on a [`SoftGl`], fed through a real ring and a
/// transfer buffer for results.
pub struct Harness {
    pub gl: Rc<SoftGl>,
    pub registry: SharedMemoryRegistry,
    pub command_buffer: CommandBufferService,
    pub scheduler: GpuScheduler<HeadlessSurface>,
    pub ring: Arc<SharedRegion>,
    pub shm_id: i32,
    pub shm: Arc<SharedRegion>,
    put: i32,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DecoderConfig::default())
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        let gl = Rc::new(SoftGl::new());
        let driver: Rc<dyn GlDriver> = gl.clone();
        Self::on_driver(gl, driver, config)
    }

    fn on_driver(gl: Rc<SoftGl>, driver: Rc<dyn GlDriver>, config: DecoderConfig) -> Self {
        let registry = SharedMemoryRegistry::new();
        let ring_handle = registry.create(RING_ENTRIES as usize * 4).unwrap();
        let ring = registry.open(ring_handle).unwrap();

        let mut command_buffer = CommandBufferService::new(registry.clone(), &ChannelConfig::default());
        assert!(command_buffer.initialize(ring_handle, RING_ENTRIES * 4));
        let shm_id = command_buffer.create_transfer_buffer(SHM_BYTES, 0);
        let shm = registry
            .open(command_buffer.get_transfer_buffer(shm_id).unwrap().handle())
            .unwrap();

        let decoder = Gles2Decoder::new(
            driver,
            HeadlessSurface::new(Size::new(4, 4)),
            ContextGroup::new_ref(),
            LatchTable::new(),
            Rc::new(CommandNames::new()),
            config,
        );
        let mut scheduler = GpuScheduler::new(decoder, &config);
        scheduler
            .initialize(&command_buffer, &ContextGroupConfig::default())
            .unwrap();
        Self {
            gl,
            registry,
            command_buffer,
            scheduler,
            ring,
            shm_id,
            shm,
            put: 0,
        }
    }

    /// Copies `writer` into the ring after the previous submission and
    /// publishes the new `put`.
    pub fn submit(&mut self, writer: &CommandWriter) {
        let words = writer.entries();
        assert!(self.put as usize + words.len() < RING_ENTRIES as usize, "ring overflow in test");
        self.ring.write_words(self.put as usize * 4, words).unwrap();
        self.put += words.len() as i32;
        assert!(self.command_buffer.flush_sync(self.put));
    }

    /// Runs batches until the scheduler stops yielding.
    pub fn process(&mut self) -> ProcessOutcome {
        loop {
            match self.scheduler.process_commands(&mut self.command_buffer) {
                ProcessOutcome::Yielded => continue,
                outcome => return outcome,
            }
        }
    }

    pub fn run(&mut self, build: impl FnOnce(&mut CommandWriter)) -> ProcessOutcome {
        let mut writer = CommandWriter::new();
        build(&mut writer);
        self.submit(&writer);
        self.process()
    }

    pub fn error(&self) -> CbError {
        self.command_buffer.error()
    }

    pub fn read_i32(&self, offset: u32) -> i32 {
        self.shm.read_u32(offset as usize).unwrap() as i32
    }

    pub fn write_i32(&self, offset: u32, value: i32) {
        self.shm.write_u32(offset as usize, value as u32).unwrap();
    }

    /// Drains the GL error queue the client would see.
    pub fn gl_errors(&mut self) -> Vec<GLenum> {
        let mut errors = Vec::new();
        for _ in 0..8 {
            self.write_i32(0, -1);
            let shm_id = self.shm_id;
            self.run(|w| w.get_error(shm_id, 0));
            let error = self.read_i32(0) as GLenum;
            if error == gl::NO_ERROR {
                break;
            }
            errors.push(error);
        }
        errors
    }

    /// Client program `program` linked from [`VS`] and [`FS`] with shader ids
    /// `program + 1` and `program + 2`.
    pub fn link_program(&mut self, program: u32) {
        let (vs, fs) = (program + 1, program + 2);
        let outcome = self.run(|w| {
            w.create_shader(gl::VERTEX_SHADER, vs);
            w.shader_source_immediate(vs, VS);
            w.compile_shader(vs);
            w.create_shader(gl::FRAGMENT_SHADER, fs);
            w.shader_source_immediate(fs, FS);
            w.compile_shader(fs);
            w.create_program(program);
            w.attach_shader(program, vs);
            w.attach_shader(program, fs);
            w.link_program(program);
        });
        assert_eq!(outcome, ProcessOutcome::Idle);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
