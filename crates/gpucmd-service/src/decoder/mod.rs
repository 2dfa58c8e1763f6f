//! GLES2 command decoder.
//!
//! One decoder per context. It validates every command against the shadow
//! state of its [`ContextGroup`](crate::context_group::ContextGroup) and its
//! own pipeline state before touching the driver. Validation failures follow
//! GL conventions (an error bit, no driver call); malformed commands (bad
//! shared memory ranges, short payloads) fail the command with a [`CbError`].
//!
//! Handlers live in child modules by area; they all return [`CmdResult`].

mod buckets;
mod draw;
mod programs;
mod resources;
mod textures;

use std::collections::HashMap;
use std::rc::Rc;

use gpucmd_ipc::Size;
use gpucmd_protocol::common::CommonCommand;
use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::gl_utils::{face_target, GlErrorBits, NUM_CUBE_FACES};
use gpucmd_protocol::gles2::CommandId;
use gpucmd_protocol::{CbError, CommandInfo, CommandNames};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::buffer_manager::BufferInfo;
use crate::command_buffer::CommandBufferEngine;
use crate::config::{ContextGroupConfig, DecoderConfig};
use crate::context_group::ContextGroupRef;
use crate::gl::{GlContextId, GlDriver};
use crate::latch::LatchTable;
use crate::parser::AsyncApiHandler;
use crate::program_manager::ProgramRef;
use crate::surface::PlatformSurface;
use crate::texture_manager::{LevelInfo, TextureRef};
use crate::vertex_attrib::VertexAttribManager;

/// Outcome of one command handler. `Err` carries the command buffer status
/// (a fault, or the `Waiting`/`Throttle` sentinels).
pub(crate) type CmdResult = Result<(), CbError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Uninitialized,
    Ready,
    /// Terminal.
    Lost,
}

/// Things the decoder asks its owner to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    SwapBuffers,
    ResizeRequested(Size),
    LatchSet(u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitError {
    #[error("decoder already initialized")]
    AlreadyInitialized,
    #[error("could not create a driver context")]
    ContextCreation,
    #[error("could not make the new context current")]
    MakeCurrent,
    #[error("could not initialize the context group")]
    GroupInit,
    #[error("could not allocate offscreen targets of size {0:?}")]
    Offscreen(Size),
    #[error("command buffer has no ring")]
    NoRing,
}

#[derive(Debug, Clone)]
struct TextureUnit {
    bound_2d: TextureRef,
    bound_cube: TextureRef,
}

impl TextureUnit {
    fn bound(&self, target: GLenum) -> &TextureRef {
        if target == gl::TEXTURE_2D {
            &self.bound_2d
        } else {
            &self.bound_cube
        }
    }
}

/// Render targets of an offscreen context. Client framebuffer `0` resolves
/// to `framebuffer`.
#[derive(Debug, Clone, Copy)]
struct OffscreenTarget {
    framebuffer: u32,
    color_texture: u32,
    depth_renderbuffer: u32,
    size: Size,
}

pub struct Gles2Decoder<S: PlatformSurface> {
    gl: Rc<dyn GlDriver>,
    surface: S,
    group: ContextGroupRef,
    latches: LatchTable,
    names: Rc<CommandNames>,
    config: DecoderConfig,
    context: Option<GlContextId>,
    state: DecoderState,

    errors: GlErrorBits,
    pack_alignment: i32,
    unpack_alignment: i32,

    bound_array_buffer: Option<Rc<BufferInfo>>,
    bound_element_array_buffer: Option<Rc<BufferInfo>>,
    /// Service ids; `0` is the context's default target.
    bound_framebuffer: u32,
    bound_renderbuffer: u32,

    vertex_attribs: VertexAttribManager,
    active_texture_unit: u32,
    texture_units: Vec<TextureUnit>,
    black_2d: u32,
    black_cube: u32,
    current_program: Option<ProgramRef>,

    buckets: HashMap<u32, Vec<u8>>,
    events: Vec<DecoderEvent>,
    offscreen: Option<OffscreenTarget>,
    /// Texture in the parent's namespace that receives our frames.
    parent_texture: Option<TextureRef>,
}

impl<S: PlatformSurface> Gles2Decoder<S> {
    pub fn new(
        gl: Rc<dyn GlDriver>,
        surface: S,
        group: ContextGroupRef,
        latches: LatchTable,
        names: Rc<CommandNames>,
        config: DecoderConfig,
    ) -> Self {
        Self {
            gl,
            surface,
            group,
            latches,
            names,
            config,
            context: None,
            state: DecoderState::Uninitialized,
            errors: GlErrorBits::empty(),
            pack_alignment: 4,
            unpack_alignment: 4,
            bound_array_buffer: None,
            bound_element_array_buffer: None,
            bound_framebuffer: 0,
            bound_renderbuffer: 0,
            vertex_attribs: VertexAttribManager::new(0),
            active_texture_unit: 0,
            texture_units: Vec::new(),
            black_2d: 0,
            black_cube: 0,
            current_program: None,
            buckets: HashMap::new(),
            events: Vec::new(),
            offscreen: None,
            parent_texture: None,
        }
    }

    /// Creates and binds the driver context, then builds the per-context
    /// tables from the group's limits.
    pub fn initialize(&mut self, group_config: &ContextGroupConfig) -> Result<(), InitError> {
        if self.state != DecoderState::Uninitialized {
            return Err(InitError::AlreadyInitialized);
        }
        let context = self.gl.create_context().ok_or(InitError::ContextCreation)?;
        self.context = Some(context);
        self.group.borrow_mut().add_context();
        if !self.surface.make_current(&*self.gl, context) {
            self.destroy();
            return Err(InitError::MakeCurrent);
        }
        if !self.group.borrow_mut().initialize(&*self.gl, group_config) {
            self.destroy();
            return Err(InitError::GroupInit);
        }

        {
            let group = self.group.borrow();
            self.vertex_attribs = VertexAttribManager::new(group.max_vertex_attribs());
            let unit = TextureUnit {
                bound_2d: group.texture_manager.default_texture(gl::TEXTURE_2D),
                bound_cube: group.texture_manager.default_texture(gl::TEXTURE_CUBE_MAP),
            };
            self.texture_units = vec![unit; group.max_texture_units() as usize];
        }
        self.create_black_textures();

        if self.surface.is_offscreen() {
            let size = self.surface.size();
            if !self.create_offscreen_target(size) {
                self.destroy();
                return Err(InitError::Offscreen(size));
            }
        }

        self.state = DecoderState::Ready;
        debug!(
            context = context.0,
            offscreen = self.surface.is_offscreen(),
            "decoder initialized"
        );
        Ok(())
    }

    /// 1x1 opaque black stand-ins for textures that cannot be sampled.
    fn create_black_textures(&mut self) {
        const BLACK: [u8; 4] = [0, 0, 0, 255];
        self.black_2d = self.gl.gen_texture();
        self.gl.bind_texture(gl::TEXTURE_2D, self.black_2d);
        self.gl.tex_image_2d(gl::TEXTURE_2D, 0, gl::RGBA, 1, 1, 0, gl::RGBA, gl::UNSIGNED_BYTE, Some(&BLACK));
        self.gl.bind_texture(gl::TEXTURE_2D, 0);

        self.black_cube = self.gl.gen_texture();
        self.gl.bind_texture(gl::TEXTURE_CUBE_MAP, self.black_cube);
        for face in 0..NUM_CUBE_FACES {
            self.gl
                .tex_image_2d(face_target(face), 0, gl::RGBA, 1, 1, 0, gl::RGBA, gl::UNSIGNED_BYTE, Some(&BLACK));
        }
        self.gl.bind_texture(gl::TEXTURE_CUBE_MAP, 0);
    }

    fn create_offscreen_target(&mut self, size: Size) -> bool {
        if size.is_empty() {
            return false;
        }
        let target = OffscreenTarget {
            framebuffer: self.gl.gen_framebuffer(),
            color_texture: self.gl.gen_texture(),
            depth_renderbuffer: self.gl.gen_renderbuffer(),
            size,
        };
        self.offscreen = Some(target);
        self.allocate_offscreen_color(size);
        self.gl.bind_renderbuffer(gl::RENDERBUFFER, target.depth_renderbuffer);
        self.gl.bind_renderbuffer(gl::RENDERBUFFER, self.bound_renderbuffer);
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, target.framebuffer);
        true
    }

    fn allocate_offscreen_color(&mut self, size: Size) {
        let Some(target) = self.offscreen else {
            return;
        };
        self.gl.active_texture(gl::TEXTURE0);
        self.gl.bind_texture(gl::TEXTURE_2D, target.color_texture);
        self.gl.tex_image_2d(
            gl::TEXTURE_2D,
            0,
            gl::RGBA,
            size.width as i32,
            size.height as i32,
            0,
            gl::RGBA,
            gl::UNSIGNED_BYTE,
            None,
        );
        self.restore_texture_binding(0, gl::TEXTURE_2D);
        self.gl.active_texture(gl::TEXTURE0 + self.active_texture_unit);
    }

    /// Rebinds what the client has bound on `unit` for `target`. Leaves
    /// `unit` active.
    fn restore_texture_binding(&self, unit: u32, target: GLenum) {
        let service_id = self
            .texture_units
            .get(unit as usize)
            .map_or(0, |u| u.bound(target).borrow().service_id());
        self.gl.active_texture(gl::TEXTURE0 + unit);
        self.gl.bind_texture(target, service_id);
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn is_lost(&self) -> bool {
        self.state == DecoderState::Lost
    }

    /// Marks the context lost. Every later command fails with
    /// `LostContext`.
    pub fn lose_context(&mut self) {
        if self.state != DecoderState::Lost {
            warn!(context = ?self.context, "context lost");
            self.state = DecoderState::Lost;
        }
    }

    pub fn context(&self) -> Option<GlContextId> {
        self.context
    }

    pub fn group(&self) -> &ContextGroupRef {
        &self.group
    }

    pub fn latches(&self) -> &LatchTable {
        &self.latches
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn gl(&self) -> &Rc<dyn GlDriver> {
        &self.gl
    }

    pub fn current_program(&self) -> Option<ProgramRef> {
        self.current_program.clone()
    }

    pub fn vertex_attribs(&self) -> &VertexAttribManager {
        &self.vertex_attribs
    }

    /// GL errors recorded by validation and not yet retrieved.
    pub fn pending_gl_errors(&self) -> GlErrorBits {
        self.errors
    }

    pub fn offscreen_size(&self) -> Option<Size> {
        self.offscreen.map(|t| t.size)
    }

    pub fn take_events(&mut self) -> Vec<DecoderEvent> {
        std::mem::take(&mut self.events)
    }

    /// Makes our context current unless it already is.
    pub fn make_current(&mut self) -> bool {
        let Some(context) = self.context else {
            return false;
        };
        if self.surface.is_current(&*self.gl, context) {
            return true;
        }
        self.surface.make_current(&*self.gl, context)
    }

    /// Reallocates the offscreen color buffer. Needs our context current.
    pub fn resize_offscreen(&mut self, size: Size) -> bool {
        let Some(target) = self.offscreen.as_mut() else {
            return false;
        };
        if size.is_empty() {
            return false;
        }
        if target.size == size {
            return true;
        }
        target.size = size;
        self.allocate_offscreen_color(size);
        self.surface.resize(size);
        debug!(width = size.width, height = size.height, "offscreen target resized");
        true
    }

    /// Creates `client_id` in our texture namespace as the target our
    /// offscreen children present into. Needs our context current.
    pub fn create_parent_texture(&mut self, client_id: u32, size: Size) -> Option<TextureRef> {
        if self.state != DecoderState::Ready || client_id == 0 || size.is_empty() {
            return None;
        }
        let service_id = self.gl.gen_texture();
        let mut group = self.group.borrow_mut();
        if !group.ids.textures.add_mapping(client_id, service_id) {
            self.gl.delete_texture(service_id);
            warn!(client_id, "parent texture id already in use");
            return None;
        }
        let texture = group.texture_manager.create_texture_info(client_id, service_id);
        group.texture_manager.set_info_target(&texture, gl::TEXTURE_2D);

        let (width, height) = (size.width as i32, size.height as i32);
        self.gl.active_texture(gl::TEXTURE0);
        self.gl.bind_texture(gl::TEXTURE_2D, service_id);
        self.gl
            .tex_image_2d(gl::TEXTURE_2D, 0, gl::RGBA, width, height, 0, gl::RGBA, gl::UNSIGNED_BYTE, None);
        group
            .texture_manager
            .set_level_info(&texture, gl::TEXTURE_2D, 0, rgba_level(width, height));
        for (pname, value) in [
            (gl::TEXTURE_MIN_FILTER, gl::LINEAR),
            (gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE),
            (gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE),
        ] {
            self.gl.tex_parameteri(gl::TEXTURE_2D, pname, value as i32);
            group.texture_manager.set_parameter(&texture, pname, value as i32);
        }
        drop(group);
        self.restore_texture_binding(0, gl::TEXTURE_2D);
        self.gl.active_texture(gl::TEXTURE0 + self.active_texture_unit);
        debug!(client_id, service_id, "parent texture created");
        Some(texture)
    }

    pub fn set_parent_texture(&mut self, texture: Option<TextureRef>) {
        self.parent_texture = texture;
    }

    /// Copies the offscreen color buffer into the parent texture.
    fn copy_to_parent_texture(&mut self) {
        let (Some(target), Some(parent)) = (self.offscreen, self.parent_texture.clone()) else {
            return;
        };
        if parent.borrow().is_deleted() {
            return;
        }
        let (width, height) = (target.size.width as i32, target.size.height as i32);
        let service_id = parent.borrow().service_id();
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, target.framebuffer);
        self.gl.active_texture(gl::TEXTURE0);
        self.gl.bind_texture(gl::TEXTURE_2D, service_id);
        self.gl.copy_tex_image_2d(gl::TEXTURE_2D, gl::RGBA, width, height);
        self.group
            .borrow_mut()
            .texture_manager
            .set_level_info(&parent, gl::TEXTURE_2D, 0, rgba_level(width, height));
        self.restore_texture_binding(0, gl::TEXTURE_2D);
        self.gl.active_texture(gl::TEXTURE0 + self.active_texture_unit);
        self.gl.bind_framebuffer(gl::FRAMEBUFFER, self.framebuffer_service_id());
    }

    fn framebuffer_service_id(&self) -> u32 {
        match (self.bound_framebuffer, self.offscreen) {
            (0, Some(target)) => target.framebuffer,
            (id, _) => id,
        }
    }

    /// Releases our driver objects, and the group's if ours was its last
    /// context.
    /// Safe to call more than once.
    pub fn destroy(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        let current = self.surface.make_current(&*self.gl, context);
        if current {
            for texture in [self.black_2d, self.black_cube] {
                if texture != 0 {
                    self.gl.delete_texture(texture);
                }
            }
            if let Some(target) = self.offscreen.take() {
                self.gl.delete_framebuffer(target.framebuffer);
                self.gl.delete_texture(target.color_texture);
                self.gl.delete_renderbuffer(target.depth_renderbuffer);
            }
        } else {
            warn!(context = context.0, "could not make context current for teardown");
        }

        self.current_program = None;
        self.bound_array_buffer = None;
        self.bound_element_array_buffer = None;
        self.texture_units.clear();
        self.vertex_attribs = VertexAttribManager::new(0);
        self.parent_texture = None;
        self.black_2d = 0;
        self.black_cube = 0;

        let last = self.group.borrow_mut().remove_context();
        if current && last {
            self.group.borrow_mut().destroy(&*self.gl);
        }
        self.surface.destroy(&*self.gl);
        self.gl.destroy_context(context);
        self.state = DecoderState::Lost;
        debug!(context = context.0, "decoder destroyed");
    }

    // Errors.

    /// Records a GL error. Always `Ok`: a GL error never fails the command.
    fn gl_error(&mut self, error: GLenum, reason: &str) -> CmdResult {
        debug!(error = format_args!("{error:#x}"), reason, "GL error");
        self.errors |= GlErrorBits::from_gl_error(error);
        Ok(())
    }

    /// Moves pending driver errors into our bits so the next driver error
    /// read belongs to the call that follows.
    fn copy_real_gl_errors(&mut self) {
        for _ in 0..16 {
            let error = self.gl.get_error();
            if error == gl::NO_ERROR {
                break;
            }
            self.errors |= GlErrorBits::from_gl_error(error);
        }
    }

    /// Driver errors first, then the lowest recorded bit, which is cleared.
    fn take_gl_error(&mut self) -> GLenum {
        let error = self.gl.get_error();
        if error != gl::NO_ERROR {
            return error;
        }
        let error = self.errors.lowest_gl_error();
        self.errors.remove(GlErrorBits::from_gl_error(error));
        error
    }

    // Dispatch.

    fn dispatch(
        &mut self,
        engine: &mut dyn CommandBufferEngine,
        command: u32,
        args: &[u32],
        immediate_data_size: u32,
    ) -> CmdResult {
        if let Some(command) = CommonCommand::from_u32(command) {
            return self.do_common_command(engine, command, args, immediate_data_size);
        }
        let Some(id) = CommandId::from_u32(command) else {
            return Err(CbError::UnknownCommand);
        };
        let a = args;
        let imm = immediate_data_size;
        match id {
            CommandId::ActiveTexture => self.do_active_texture(a[0]),
            CommandId::AttachShader => self.do_attach_shader(a[0], a[1]),
            CommandId::BindBuffer => self.do_bind_buffer(a[0], a[1]),
            CommandId::BindFramebuffer => self.do_bind_framebuffer(a[0], a[1]),
            CommandId::BindRenderbuffer => self.do_bind_renderbuffer(a[0], a[1]),
            CommandId::BindTexture => self.do_bind_texture(a[0], a[1]),
            CommandId::BufferData => {
                let data = shm_read_optional(engine, a[2], a[3], a[1])?;
                self.do_buffer_data(a[0], a[1] as i32, data.as_deref(), a[4])
            }
            CommandId::BufferDataImmediate => {
                let data = immediate_bytes(&a[3..], imm, a[1])?;
                self.do_buffer_data(a[0], a[1] as i32, Some(&data), a[2])
            }
            CommandId::BufferSubData => {
                let data = shm_read(engine, a[3], a[4], a[2])?;
                self.do_buffer_sub_data(a[0], a[1] as i32, &data)
            }
            CommandId::Clear => self.do_clear(a[0]),
            CommandId::ClearColor => {
                let [r, g, b, alpha] = [a[0], a[1], a[2], a[3]].map(f32::from_bits);
                self.gl.clear_color(r, g, b, alpha);
                Ok(())
            }
            CommandId::CompileShader => self.do_compile_shader(a[0]),
            CommandId::CompressedTexImage2D => {
                let data = shm_read(engine, a[7], a[8], a[6])?;
                self.do_compressed_tex_image_2d(a[0], a[1] as i32, a[2], a[3] as i32, a[4] as i32, a[5] as i32, &data)
            }
            CommandId::CompressedTexImage2DImmediate => {
                let data = immediate_bytes(&a[7..], imm, a[6])?;
                self.do_compressed_tex_image_2d(a[0], a[1] as i32, a[2], a[3] as i32, a[4] as i32, a[5] as i32, &data)
            }
            CommandId::CreateProgram => self.do_create_program(a[0]),
            CommandId::CreateShader => self.do_create_shader(a[0], a[1]),
            CommandId::DeleteBuffersImmediate => {
                let ids = immediate_ids(&a[1..], imm, a[0])?;
                self.do_delete_buffers(&ids)
            }
            CommandId::DeleteFramebuffersImmediate => {
                let ids = immediate_ids(&a[1..], imm, a[0])?;
                self.do_delete_framebuffers(&ids)
            }
            CommandId::DeleteProgram => self.do_delete_program(a[0]),
            CommandId::DeleteRenderbuffersImmediate => {
                let ids = immediate_ids(&a[1..], imm, a[0])?;
                self.do_delete_renderbuffers(&ids)
            }
            CommandId::DeleteShader => self.do_delete_shader(a[0]),
            CommandId::DeleteTexturesImmediate => {
                let ids = immediate_ids(&a[1..], imm, a[0])?;
                self.do_delete_textures(&ids)
            }
            CommandId::DetachShader => self.do_detach_shader(a[0], a[1]),
            CommandId::DisableVertexAttribArray => self.do_enable_vertex_attrib_array(a[0], false),
            CommandId::DrawArrays => self.do_draw_arrays(a[0], a[1] as i32, a[2] as i32),
            CommandId::DrawElements => self.do_draw_elements(a[0], a[1] as i32, a[2], a[3]),
            CommandId::EnableVertexAttribArray => self.do_enable_vertex_attrib_array(a[0], true),
            CommandId::Finish => {
                self.gl.finish();
                Ok(())
            }
            CommandId::Flush => {
                self.gl.flush();
                Ok(())
            }
            CommandId::GenBuffersImmediate => {
                let ids = immediate_ids(&a[1..], imm, a[0])?;
                self.do_gen_buffers(&ids)
            }
            CommandId::GenFramebuffersImmediate => {
                let ids = immediate_ids(&a[1..], imm, a[0])?;
                self.do_gen_framebuffers(&ids)
            }
            CommandId::GenRenderbuffersImmediate => {
                let ids = immediate_ids(&a[1..], imm, a[0])?;
                self.do_gen_renderbuffers(&ids)
            }
            CommandId::GenTexturesImmediate => {
                let ids = immediate_ids(&a[1..], imm, a[0])?;
                self.do_gen_textures(&ids)
            }
            CommandId::GenerateMipmap => self.do_generate_mipmap(a[0]),
            CommandId::GetActiveAttrib => self.do_get_active_attrib(engine, a[0], a[1], a[2], a[3], a[4]),
            CommandId::GetActiveUniform => self.do_get_active_uniform(engine, a[0], a[1], a[2], a[3], a[4]),
            CommandId::GetAttachedShaders => self.do_get_attached_shaders(engine, a[0], a[1], a[2], a[3]),
            CommandId::GetAttribLocation => {
                let name = shm_read(engine, a[1], a[2], a[5])?;
                self.do_get_attrib_location(engine, a[0], &name, a[3], a[4])
            }
            CommandId::GetAttribLocationImmediate => {
                let name = immediate_bytes(&a[4..], imm, a[3])?;
                self.do_get_attrib_location(engine, a[0], &name, a[1], a[2])
            }
            CommandId::GetError => {
                let error = self.take_gl_error();
                shm_write(engine, a[0], a[1], &error.to_le_bytes())
            }
            CommandId::GetProgramiv => self.do_get_programiv(engine, a[0], a[1], a[2], a[3]),
            CommandId::GetShaderiv => self.do_get_shaderiv(engine, a[0], a[1], a[2], a[3]),
            CommandId::GetShaderPrecisionFormat => {
                self.do_get_shader_precision_format(engine, a[0], a[1], a[2], a[3])
            }
            CommandId::GetShaderSource => self.do_get_shader_source(a[0], a[1]),
            CommandId::GetString => self.do_get_string(a[0], a[1]),
            CommandId::GetUniformfv => self.do_get_uniformfv(engine, a[0], a[1] as i32, a[2], a[3]),
            CommandId::GetUniformiv => self.do_get_uniformiv(engine, a[0], a[1] as i32, a[2], a[3]),
            CommandId::GetUniformLocation => {
                let name = shm_read(engine, a[1], a[2], a[5])?;
                self.do_get_uniform_location(engine, a[0], &name, a[3], a[4])
            }
            CommandId::GetUniformLocationImmediate => {
                let name = immediate_bytes(&a[4..], imm, a[3])?;
                self.do_get_uniform_location(engine, a[0], &name, a[1], a[2])
            }
            CommandId::GetVertexAttribPointerv => {
                self.do_get_vertex_attrib_pointerv(engine, a[0], a[1], a[2], a[3])
            }
            CommandId::LinkProgram => self.do_link_program(a[0]),
            CommandId::PixelStorei => self.do_pixel_storei(a[0], a[1] as i32),
            CommandId::ReadPixels => self.do_read_pixels(engine, a),
            CommandId::ShaderSource => {
                let source = shm_read(engine, a[1], a[2], a[3])?;
                self.do_shader_source(a[0], &source)
            }
            CommandId::ShaderSourceImmediate => {
                let source = immediate_bytes(&a[2..], imm, a[1])?;
                self.do_shader_source(a[0], &source)
            }
            CommandId::ShaderSourceBucket => {
                let source = self.buckets.get(&a[1]).cloned().ok_or(CbError::InvalidArguments)?;
                self.do_shader_source(a[0], &source)
            }
            CommandId::TexImage2D => self.do_tex_image_2d(engine, a, None),
            CommandId::TexImage2DImmediate => self.do_tex_image_2d(engine, a, Some(imm)),
            CommandId::TexParameterf => self.do_tex_parameter(a[0], a[1], f32::from_bits(a[2]) as i32),
            CommandId::TexParameterfv => {
                let value = f32::from_bits(shm_read_i32(engine, a[2], a[3])? as u32);
                self.do_tex_parameter(a[0], a[1], value as i32)
            }
            CommandId::TexParameterfvImmediate => {
                let values = immediate_words(&a[2..], imm, 1, 1)?;
                self.do_tex_parameter(a[0], a[1], f32::from_bits(values[0]) as i32)
            }
            CommandId::TexParameteri => self.do_tex_parameter(a[0], a[1], a[2] as i32),
            CommandId::TexParameteriv => {
                let value = shm_read_i32(engine, a[2], a[3])?;
                self.do_tex_parameter(a[0], a[1], value)
            }
            CommandId::TexParameterivImmediate => {
                let values = immediate_words(&a[2..], imm, 1, 1)?;
                self.do_tex_parameter(a[0], a[1], values[0] as i32)
            }
            CommandId::TexSubImage2D => self.do_tex_sub_image_2d(engine, a, None),
            CommandId::TexSubImage2DImmediate => self.do_tex_sub_image_2d(engine, a, Some(imm)),
            CommandId::Uniform1f => self.do_uniform1f(a[0] as i32, f32::from_bits(a[1])),
            CommandId::Uniform1i => self.do_uniform1iv(a[0] as i32, &[a[1] as i32]),
            CommandId::Uniform1iv => {
                let size = a[1].checked_mul(4).ok_or(CbError::OutOfBounds)?;
                let bytes = shm_read(engine, a[2], a[3], size)?;
                let values: Vec<i32> = bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                self.do_uniform1iv(a[0] as i32, &values)
            }
            CommandId::Uniform1ivImmediate => {
                let values = immediate_words(&a[2..], imm, a[1], 1)?;
                let values: Vec<i32> = values.iter().map(|&v| v as i32).collect();
                self.do_uniform1iv(a[0] as i32, &values)
            }
            CommandId::Uniform4fvImmediate => {
                let values = immediate_words(&a[2..], imm, a[1], 4)?;
                let values: Vec<f32> = values.iter().map(|&v| f32::from_bits(v)).collect();
                self.do_uniform4fv(a[0] as i32, &values)
            }
            CommandId::UseProgram => self.do_use_program(a[0]),
            CommandId::VertexAttribPointer => {
                self.do_vertex_attrib_pointer(a[0], a[1] as i32, a[2], a[3] != 0, a[4] as i32, a[5])
            }
            CommandId::Viewport => self.do_viewport(a[0] as i32, a[1] as i32, a[2] as i32, a[3] as i32),
            CommandId::SwapBuffers => self.do_swap_buffers(),
            CommandId::ResizeCHROMIUM => {
                self.events.push(DecoderEvent::ResizeRequested(Size::new(a[0], a[1])));
                Ok(())
            }
            CommandId::SetLatchCHROMIUM => {
                self.gl.flush();
                self.latches.set(a[0]);
                self.events.push(DecoderEvent::LatchSet(a[0]));
                Ok(())
            }
            CommandId::WaitLatchCHROMIUM => {
                if self.latches.take(a[0]) {
                    Ok(())
                } else {
                    Err(CbError::Waiting)
                }
            }
        }
    }
}

impl<S: PlatformSurface> AsyncApiHandler for Gles2Decoder<S> {
    fn command_info(&self, command: u32) -> Option<CommandInfo> {
        match CommonCommand::from_u32(command) {
            Some(command) => Some(command.info()),
            None => CommandId::from_u32(command).map(CommandId::info),
        }
    }

    fn do_command(
        &mut self,
        engine: &mut dyn CommandBufferEngine,
        command: u32,
        args: &[u32],
        immediate_data_size: u32,
    ) -> CbError {
        match self.state {
            DecoderState::Ready => {}
            DecoderState::Lost => return CbError::LostContext,
            DecoderState::Uninitialized => return CbError::GenericError,
        }
        if self.config.debug {
            trace!(command = self.names.get(command), args = args.len(), "decode");
        }
        // Handlers index fixed arguments directly.
        match self.command_info(command) {
            None => return CbError::UnknownCommand,
            Some(info) if (args.len() as u32) < info.arg_count => return CbError::InvalidArguments,
            Some(_) => {}
        }
        match self.dispatch(engine, command, args, immediate_data_size) {
            Ok(()) => CbError::NoError,
            Err(error) => {
                if error.is_error() {
                    debug!(command = self.names.get(command), %error, "command failed");
                }
                error
            }
        }
    }

    fn command_name(&self, command: u32) -> &'static str {
        self.names.get(command)
    }
}

impl<S: PlatformSurface> Drop for Gles2Decoder<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn rgba_level(width: i32, height: i32) -> LevelInfo {
    LevelInfo {
        internal_format: gl::RGBA,
        width,
        height,
        depth: 1,
        border: 0,
        format: gl::RGBA,
        ty: gl::UNSIGNED_BYTE,
    }
}

// Shared memory and payload access. Each read is a single bounded copy.

fn shm_read(engine: &dyn CommandBufferEngine, shm_id: u32, offset: u32, size: u32) -> Result<Vec<u8>, CbError> {
    engine
        .get_shared_memory_buffer(shm_id as i32)
        .and_then(|buffer| buffer.read(offset, size))
        .ok_or(CbError::OutOfBounds)
}

/// Shared memory id `0` means "no data".
fn shm_read_optional(
    engine: &dyn CommandBufferEngine,
    shm_id: u32,
    offset: u32,
    size: u32,
) -> Result<Option<Vec<u8>>, CbError> {
    if shm_id == 0 && offset == 0 {
        return Ok(None);
    }
    shm_read(engine, shm_id, offset, size).map(Some)
}

fn shm_write(engine: &dyn CommandBufferEngine, shm_id: u32, offset: u32, data: &[u8]) -> CmdResult {
    engine
        .get_shared_memory_buffer(shm_id as i32)
        .and_then(|buffer| buffer.write(offset, data))
        .ok_or(CbError::OutOfBounds)
}

fn shm_read_i32(engine: &dyn CommandBufferEngine, shm_id: u32, offset: u32) -> Result<i32, CbError> {
    let bytes = shm_read(engine, shm_id, offset, 4)?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// The first `size` bytes of the immediate payload.
fn immediate_bytes(payload: &[u32], immediate_data_size: u32, size: u32) -> Result<Vec<u8>, CbError> {
    if size > immediate_data_size {
        return Err(CbError::OutOfBounds);
    }
    let mut bytes: Vec<u8> = payload.iter().flat_map(|w| w.to_le_bytes()).collect();
    bytes.truncate(size as usize);
    Ok(bytes)
}

/// `count * per_element` entries of immediate payload.
fn immediate_words(payload: &[u32], immediate_data_size: u32, count: u32, per_element: u32) -> Result<Vec<u32>, CbError> {
    let words = count.checked_mul(per_element).ok_or(CbError::OutOfBounds)?;
    let bytes = words.checked_mul(4).ok_or(CbError::OutOfBounds)?;
    if bytes > immediate_data_size || words as usize > payload.len() {
        return Err(CbError::OutOfBounds);
    }
    Ok(payload[..words as usize].to_vec())
}

fn immediate_ids(payload: &[u32], immediate_data_size: u32, n: u32) -> Result<Vec<u32>, CbError> {
    if (n as i32) < 0 {
        return Err(CbError::InvalidArguments);
    }
    immediate_words(payload, immediate_data_size, n, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_payload_is_bounded_by_its_size() {
        let payload = [u32::from_le_bytes(*b"abcd"), u32::from_le_bytes(*b"ef\0\0")];
        assert_eq!(immediate_bytes(&payload, 8, 6).unwrap(), b"abcdef");
        assert_eq!(immediate_bytes(&payload, 8, 9), Err(CbError::OutOfBounds));
        assert_eq!(immediate_words(&payload, 8, 1, 4), Err(CbError::OutOfBounds));
        assert_eq!(immediate_ids(&payload, 8, u32::MAX), Err(CbError::InvalidArguments));
    }
}
