//! Deterministic software [`GlDriver`].
//!
//! Models object lifetimes, compile and link results, uniform storage and a
//! single flat-colored framebuffer per context, and records every call. It
//! never rasterizes: `Clear` fills the color buffer, draws are only counted.
//!
//! Compilation fails for an empty source or one containing `#error`. Linking
//! needs one compiled vertex and one compiled fragment shader; the program's
//! attributes and uniforms are read from `attribute`/`uniform` declarations.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::gl_utils::{compute_image_data_size, uniform_components};

use crate::gl::{ActiveVariable, GlContextId, GlDriver};

#[derive(Debug, Clone)]
struct SoftShader {
    ty: GLenum,
    source: String,
    compiled: bool,
    log: String,
}

#[derive(Debug, Clone, Default)]
struct SoftProgram {
    shaders: Vec<u32>,
    linked: bool,
    log: String,
    attribs: Vec<ActiveVariable>,
    uniforms: Vec<ActiveVariable>,
    /// Base location of each uniform, parallel to `uniforms`.
    uniform_bases: Vec<i32>,
}

/// A texture level as last specified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftTexLevel {
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct SoftState {
    next_object: u32,
    next_context: u32,
    contexts: HashSet<u32>,
    current: Option<u32>,
    fail_create_context: bool,
    fail_make_current: bool,
    fail_link: bool,
    errors: VecDeque<GLenum>,
    limits: HashMap<GLenum, i32>,
    calls: Vec<String>,

    buffers: HashMap<u32, Vec<u8>>,
    bound_buffers: HashMap<GLenum, u32>,
    textures: HashMap<u32, BTreeMap<(GLenum, i32), SoftTexLevel>>,
    active_unit: u32,
    unit_bindings: BTreeMap<(u32, GLenum), u32>,
    framebuffers: HashSet<u32>,
    renderbuffers: HashSet<u32>,
    shaders: HashMap<u32, SoftShader>,
    programs: HashMap<u32, SoftProgram>,
    current_program: u32,
    uniform_values: HashMap<(u32, i32), Vec<f32>>,
    enabled_attribs: HashSet<u32>,
    pack_alignment: i32,
    clear_color: [f32; 4],
    color: HashMap<u32, [u8; 4]>,
    draw_calls: u32,
    last_draw_bindings: Vec<(u32, GLenum, u32)>,
}

impl Default for SoftState {
    fn default() -> Self {
        let limits = HashMap::from([
            (gl::MAX_TEXTURE_SIZE, 2048),
            (gl::MAX_CUBE_MAP_TEXTURE_SIZE, 2048),
            (gl::MAX_VERTEX_ATTRIBS, 16),
            (gl::MAX_TEXTURE_IMAGE_UNITS, 8),
            (gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS, 16),
        ]);
        Self {
            next_object: 1,
            next_context: 1,
            contexts: HashSet::new(),
            current: None,
            fail_create_context: false,
            fail_make_current: false,
            fail_link: false,
            errors: VecDeque::new(),
            limits,
            calls: Vec::new(),
            buffers: HashMap::new(),
            bound_buffers: HashMap::new(),
            textures: HashMap::new(),
            active_unit: 0,
            unit_bindings: BTreeMap::new(),
            framebuffers: HashSet::new(),
            renderbuffers: HashSet::new(),
            shaders: HashMap::new(),
            programs: HashMap::new(),
            current_program: 0,
            uniform_values: HashMap::new(),
            enabled_attribs: HashSet::new(),
            pack_alignment: 4,
            clear_color: [0.0; 4],
            color: HashMap::new(),
            draw_calls: 0,
            last_draw_bindings: Vec::new(),
        }
    }
}

impl SoftState {
    fn alloc(&mut self) -> u32 {
        let id = self.next_object;
        self.next_object += 1;
        id
    }

    fn record(&mut self, call: String) {
        self.calls.push(call);
    }
}

#[derive(Debug, Default)]
pub struct SoftGl {
    state: RefCell<SoftState>,
}

impl SoftGl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error for the next `get_error` calls.
    pub fn inject_error(&self, error: GLenum) {
        self.state.borrow_mut().errors.push_back(error);
    }

    pub fn set_fail_create_context(&self, fail: bool) {
        self.state.borrow_mut().fail_create_context = fail;
    }

    pub fn set_fail_make_current(&self, fail: bool) {
        self.state.borrow_mut().fail_make_current = fail;
    }

    /// Forces every subsequent link to fail.
    pub fn set_fail_link(&self, fail: bool) {
        self.state.borrow_mut().fail_link = fail;
    }

    pub fn set_limit(&self, pname: GLenum, value: i32) {
        self.state.borrow_mut().limits.insert(pname, value);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Number of recorded calls whose text starts with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn draw_calls(&self) -> u32 {
        self.state.borrow().draw_calls
    }

    /// `(unit, target, texture)` bindings in effect at the last draw.
    pub fn last_draw_bindings(&self) -> Vec<(u32, GLenum, u32)> {
        self.state.borrow().last_draw_bindings.clone()
    }

    pub fn live_buffers(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.state.borrow().textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn live_contexts(&self) -> usize {
        self.state.borrow().contexts.len()
    }

    pub fn buffer_contents(&self, buffer: u32) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&buffer).cloned()
    }

    pub fn texture_level(&self, texture: u32, target: GLenum, level: i32) -> Option<SoftTexLevel> {
        self.state
            .borrow()
            .textures
            .get(&texture)
            .and_then(|levels| levels.get(&(target, level)))
            .cloned()
    }

    pub fn uniform_value(&self, program: u32, location: i32) -> Option<Vec<f32>> {
        self.state
            .borrow()
            .uniform_values
            .get(&(program, location))
            .cloned()
    }

    pub fn current_program(&self) -> u32 {
        self.state.borrow().current_program
    }

    /// RGBA of the current context's color buffer.
    pub fn color(&self) -> [u8; 4] {
        let state = self.state.borrow();
        state
            .current
            .and_then(|ctx| state.color.get(&ctx).copied())
            .unwrap_or([0; 4])
    }

    fn bound_texture(state: &SoftState, target: GLenum) -> u32 {
        let bind_target = if target == gl::TEXTURE_2D {
            gl::TEXTURE_2D
        } else {
            gl::TEXTURE_CUBE_MAP
        };
        state
            .unit_bindings
            .get(&(state.active_unit, bind_target))
            .copied()
            .unwrap_or(0)
    }

    fn set_level(&self, target: GLenum, level: i32, width: i32, height: i32, data: Vec<u8>) {
        let mut state = self.state.borrow_mut();
        let texture = Self::bound_texture(&state, target);
        if let Some(levels) = state.textures.get_mut(&texture) {
            levels.insert((target, level), SoftTexLevel { width, height, data });
        }
    }
}

fn glsl_type(word: &str) -> Option<GLenum> {
    Some(match word {
        "float" => gl::FLOAT,
        "vec2" => gl::FLOAT_VEC2,
        "vec3" => gl::FLOAT_VEC3,
        "vec4" => gl::FLOAT_VEC4,
        "int" => gl::INT,
        "ivec2" => gl::INT_VEC2,
        "ivec3" => gl::INT_VEC3,
        "ivec4" => gl::INT_VEC4,
        "bool" => gl::BOOL,
        "mat2" => gl::FLOAT_MAT2,
        "mat3" => gl::FLOAT_MAT3,
        "mat4" => gl::FLOAT_MAT4,
        "sampler2D" => gl::SAMPLER_2D,
        "samplerCube" => gl::SAMPLER_CUBE,
        _ => return None,
    })
}

/// Pulls `<qualifier> [precision] <type> <name>[N];` declarations out of a
/// shader source.
fn declarations(source: &str, qualifier: &str) -> Vec<ActiveVariable> {
    let mut out = Vec::new();
    for statement in source.split(';') {
        let mut words = statement.split_whitespace().peekable();
        if words.peek() != Some(&qualifier) {
            continue;
        }
        words.next();
        if matches!(words.peek(), Some(&("lowp" | "mediump" | "highp"))) {
            words.next();
        }
        let (Some(ty), Some(decl)) = (words.next().and_then(glsl_type), words.next()) else {
            continue;
        };
        let (name, size) = match decl.split_once('[') {
            Some((base, rest)) => {
                let count = rest.trim_end_matches(']').parse::<i32>().unwrap_or(1).max(1);
                (format!("{base}[0]"), count)
            }
            None => (decl.to_string(), 1),
        };
        out.push(ActiveVariable { name, size, ty });
    }
    out
}

/// `name`, `name[0]` and `name[i]` all resolve against an array uniform
/// reported as `name[0]`.
fn uniform_location(program: &SoftProgram, name: &str) -> i32 {
    let (base, index) = match name.strip_suffix(']').and_then(|n| n.rsplit_once('[')) {
        Some((base, index)) => match index.parse::<i32>() {
            Ok(index) => (base, index),
            Err(_) => return -1,
        },
        None => (name, 0),
    };
    for (uniform, &location) in program.uniforms.iter().zip(&program.uniform_bases) {
        let uniform_base = uniform.name.strip_suffix("[0]").unwrap_or(&uniform.name);
        let is_array = uniform.name.ends_with("[0]");
        if uniform_base == base && (is_array || index == 0) && index < uniform.size {
            return location + index;
        }
    }
    -1
}

/// Type of the uniform whose elements cover `location`.
fn uniform_type_at(program: &SoftProgram, location: i32) -> Option<GLenum> {
    program
        .uniforms
        .iter()
        .zip(&program.uniform_bases)
        .find(|(uniform, &base)| (base..base + uniform.size).contains(&location))
        .map(|(uniform, _)| uniform.ty)
}

/// Row stride of `len` bytes holding `height` rows of `row_bytes`, the last
/// one unpadded.
fn row_stride(len: usize, height: usize, row_bytes: usize) -> usize {
    if height > 1 {
        (len.saturating_sub(row_bytes)) / (height - 1)
    } else {
        row_bytes
    }
}

impl GlDriver for SoftGl {
    fn create_context(&self) -> Option<GlContextId> {
        let mut state = self.state.borrow_mut();
        if state.fail_create_context {
            return None;
        }
        let id = state.next_context;
        state.next_context += 1;
        state.contexts.insert(id);
        state.record(format!("create_context() -> {id}"));
        Some(GlContextId(id))
    }

    fn make_current(&self, context: GlContextId) -> bool {
        let mut state = self.state.borrow_mut();
        if state.fail_make_current || !state.contexts.contains(&context.0) {
            state.current = None;
            return false;
        }
        state.current = Some(context.0);
        state.record(format!("make_current({})", context.0));
        true
    }

    fn current_context(&self) -> Option<GlContextId> {
        self.state.borrow().current.map(GlContextId)
    }

    fn destroy_context(&self, context: GlContextId) {
        let mut state = self.state.borrow_mut();
        state.contexts.remove(&context.0);
        state.color.remove(&context.0);
        if state.current == Some(context.0) {
            state.current = None;
        }
        state.record(format!("destroy_context({})", context.0));
    }

    fn get_error(&self) -> GLenum {
        self.state
            .borrow_mut()
            .errors
            .pop_front()
            .unwrap_or(gl::NO_ERROR)
    }

    fn get_integer(&self, pname: GLenum) -> i32 {
        let mut state = self.state.borrow_mut();
        match state.limits.get(&pname).copied() {
            Some(v) => v,
            None if pname == gl::PACK_ALIGNMENT => state.pack_alignment,
            None => {
                state.errors.push_back(gl::INVALID_ENUM);
                0
            }
        }
    }

    fn get_string(&self, name: GLenum) -> String {
        match name {
            gl::VENDOR => "gpucmd".into(),
            gl::RENDERER => "SoftGl".into(),
            gl::VERSION => "OpenGL ES 2.0 SoftGl".into(),
            gl::SHADING_LANGUAGE_VERSION => "OpenGL ES GLSL ES 1.0".into(),
            gl::EXTENSIONS => "GL_OES_texture_npot GL_OES_texture_float GL_OES_texture_half_float \
                               GL_OES_compressed_ETC1_RGB8_texture"
                .into(),
            _ => {
                self.state.borrow_mut().errors.push_back(gl::INVALID_ENUM);
                String::new()
            }
        }
    }

    fn gen_buffer(&self) -> u32 {
        let mut state = self.state.borrow_mut();
        let id = state.alloc();
        state.buffers.insert(id, Vec::new());
        state.record(format!("gen_buffer() -> {id}"));
        id
    }

    fn delete_buffer(&self, buffer: u32) {
        let mut state = self.state.borrow_mut();
        state.buffers.remove(&buffer);
        state.bound_buffers.retain(|_, b| *b != buffer);
        state.record(format!("delete_buffer({buffer})"));
    }

    fn bind_buffer(&self, target: GLenum, buffer: u32) {
        let mut state = self.state.borrow_mut();
        state.bound_buffers.insert(target, buffer);
        state.record(format!("bind_buffer({target:#x}, {buffer})"));
    }

    fn buffer_data(&self, target: GLenum, size: u32, data: Option<&[u8]>, usage: GLenum) {
        let mut state = self.state.borrow_mut();
        let buffer = state.bound_buffers.get(&target).copied().unwrap_or(0);
        let contents = match data {
            Some(data) => data.to_vec(),
            None => vec![0; size as usize],
        };
        if let Some(b) = state.buffers.get_mut(&buffer) {
            *b = contents;
        }
        state.record(format!("buffer_data({target:#x}, {size}, {usage:#x})"));
    }

    fn buffer_sub_data(&self, target: GLenum, offset: u32, data: &[u8]) {
        let mut state = self.state.borrow_mut();
        let buffer = state.bound_buffers.get(&target).copied().unwrap_or(0);
        if let Some(b) = state.buffers.get_mut(&buffer) {
            let start = offset as usize;
            if let Some(dst) = b.get_mut(start..start + data.len()) {
                dst.copy_from_slice(data);
            }
        }
        state.record(format!("buffer_sub_data({target:#x}, {offset}, {})", data.len()));
    }

    fn gen_texture(&self) -> u32 {
        let mut state = self.state.borrow_mut();
        let id = state.alloc();
        state.textures.insert(id, BTreeMap::new());
        state.record(format!("gen_texture() -> {id}"));
        id
    }

    fn delete_texture(&self, texture: u32) {
        let mut state = self.state.borrow_mut();
        state.textures.remove(&texture);
        state.unit_bindings.retain(|_, t| *t != texture);
        state.record(format!("delete_texture({texture})"));
    }

    fn active_texture(&self, unit: GLenum) {
        let mut state = self.state.borrow_mut();
        state.active_unit = unit.saturating_sub(gl::TEXTURE0);
        state.record(format!("active_texture({unit:#x})"));
    }

    fn bind_texture(&self, target: GLenum, texture: u32) {
        let mut state = self.state.borrow_mut();
        let unit = state.active_unit;
        state.unit_bindings.insert((unit, target), texture);
        state.record(format!("bind_texture({target:#x}, {texture})"));
    }

    fn tex_image_2d(
        &self,
        target: GLenum,
        level: i32,
        internal_format: GLenum,
        width: i32,
        height: i32,
        _border: i32,
        format: GLenum,
        ty: GLenum,
        pixels: Option<&[u8]>,
    ) {
        let data = match pixels {
            Some(p) => p.to_vec(),
            None => {
                let size = compute_image_data_size(width, height, format, ty, 4).unwrap_or(0);
                vec![0; size as usize]
            }
        };
        self.set_level(target, level, width, height, data);
        self.state.borrow_mut().record(format!(
            "tex_image_2d({target:#x}, {level}, {internal_format:#x}, {width}, {height})"
        ));
    }

    fn compressed_tex_image_2d(
        &self,
        target: GLenum,
        level: i32,
        internal_format: GLenum,
        width: i32,
        height: i32,
        _border: i32,
        data: &[u8],
    ) {
        self.set_level(target, level, width, height, data.to_vec());
        self.state.borrow_mut().record(format!(
            "compressed_tex_image_2d({target:#x}, {level}, {internal_format:#x}, {width}, {height})"
        ));
    }

    fn tex_sub_image_2d(
        &self,
        target: GLenum,
        level: i32,
        xoffset: i32,
        yoffset: i32,
        width: i32,
        height: i32,
        format: GLenum,
        ty: GLenum,
        pixels: &[u8],
    ) {
        let mut state = self.state.borrow_mut();
        state.record(format!(
            "tex_sub_image_2d({target:#x}, {level}, {xoffset}, {yoffset}, {width}, {height})"
        ));
        let texture = Self::bound_texture(&state, target);
        let Some(dest) = state
            .textures
            .get_mut(&texture)
            .and_then(|levels| levels.get_mut(&(target, level)))
        else {
            return;
        };
        let pixel = compute_image_data_size(1, 1, format, ty, 1).unwrap_or(0) as usize;
        let [x, y, w, h] = [xoffset, yoffset, width, height].map(|v| v.max(0) as usize);
        let src_row = w * pixel;
        let src_stride = row_stride(pixels.len(), h, src_row);
        let dest_stride = row_stride(dest.data.len(), dest.height.max(0) as usize, dest.width.max(0) as usize * pixel);
        for row in 0..h {
            let src = row * src_stride;
            let at = (y + row) * dest_stride + x * pixel;
            let (Some(from), Some(to)) = (pixels.get(src..src + src_row), dest.data.get_mut(at..at + src_row)) else {
                break;
            };
            to.copy_from_slice(from);
        }
    }

    fn tex_parameteri(&self, target: GLenum, pname: GLenum, value: i32) {
        self.state
            .borrow_mut()
            .record(format!("tex_parameteri({target:#x}, {pname:#x}, {value:#x})"));
    }

    fn tex_parameterf(&self, target: GLenum, pname: GLenum, value: f32) {
        self.state
            .borrow_mut()
            .record(format!("tex_parameterf({target:#x}, {pname:#x}, {value})"));
    }

    fn generate_mipmap(&self, target: GLenum) {
        self.state
            .borrow_mut()
            .record(format!("generate_mipmap({target:#x})"));
    }

    fn copy_tex_image_2d(&self, target: GLenum, internal_format: GLenum, width: i32, height: i32) {
        let pixel = self.color();
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take((width.max(0) * height.max(0) * 4) as usize)
            .collect();
        self.set_level(target, 0, width, height, data);
        self.state.borrow_mut().record(format!(
            "copy_tex_image_2d({target:#x}, {internal_format:#x}, {width}, {height})"
        ));
    }

    fn gen_framebuffer(&self) -> u32 {
        let mut state = self.state.borrow_mut();
        let id = state.alloc();
        state.framebuffers.insert(id);
        state.record(format!("gen_framebuffer() -> {id}"));
        id
    }

    fn delete_framebuffer(&self, framebuffer: u32) {
        let mut state = self.state.borrow_mut();
        state.framebuffers.remove(&framebuffer);
        state.record(format!("delete_framebuffer({framebuffer})"));
    }

    fn bind_framebuffer(&self, target: GLenum, framebuffer: u32) {
        self.state
            .borrow_mut()
            .record(format!("bind_framebuffer({target:#x}, {framebuffer})"));
    }

    fn gen_renderbuffer(&self) -> u32 {
        let mut state = self.state.borrow_mut();
        let id = state.alloc();
        state.renderbuffers.insert(id);
        state.record(format!("gen_renderbuffer() -> {id}"));
        id
    }

    fn delete_renderbuffer(&self, renderbuffer: u32) {
        let mut state = self.state.borrow_mut();
        state.renderbuffers.remove(&renderbuffer);
        state.record(format!("delete_renderbuffer({renderbuffer})"));
    }

    fn bind_renderbuffer(&self, target: GLenum, renderbuffer: u32) {
        self.state
            .borrow_mut()
            .record(format!("bind_renderbuffer({target:#x}, {renderbuffer})"));
    }

    fn create_shader(&self, ty: GLenum) -> u32 {
        let mut state = self.state.borrow_mut();
        let id = state.alloc();
        state.shaders.insert(
            id,
            SoftShader {
                ty,
                source: String::new(),
                compiled: false,
                log: String::new(),
            },
        );
        state.record(format!("create_shader({ty:#x}) -> {id}"));
        id
    }

    fn delete_shader(&self, shader: u32) {
        let mut state = self.state.borrow_mut();
        state.shaders.remove(&shader);
        state.record(format!("delete_shader({shader})"));
    }

    fn shader_source(&self, shader: u32, source: &str) {
        let mut state = self.state.borrow_mut();
        if let Some(s) = state.shaders.get_mut(&shader) {
            s.source = source.to_string();
        }
        state.record(format!("shader_source({shader})"));
    }

    fn compile_shader(&self, shader: u32) {
        let mut state = self.state.borrow_mut();
        if let Some(s) = state.shaders.get_mut(&shader) {
            if s.source.trim().is_empty() {
                s.compiled = false;
                s.log = "ERROR: empty shader".into();
            } else if s.source.contains("#error") {
                s.compiled = false;
                s.log = "ERROR: #error directive".into();
            } else {
                s.compiled = true;
                s.log.clear();
            }
        }
        state.record(format!("compile_shader({shader})"));
    }

    fn get_shaderiv(&self, shader: u32, pname: GLenum) -> i32 {
        let state = self.state.borrow();
        let Some(s) = state.shaders.get(&shader) else {
            return 0;
        };
        match pname {
            gl::SHADER_TYPE => s.ty as i32,
            gl::COMPILE_STATUS => i32::from(s.compiled),
            gl::INFO_LOG_LENGTH if s.log.is_empty() => 0,
            gl::INFO_LOG_LENGTH => s.log.len() as i32 + 1,
            gl::SHADER_SOURCE_LENGTH if s.source.is_empty() => 0,
            gl::SHADER_SOURCE_LENGTH => s.source.len() as i32 + 1,
            _ => 0,
        }
    }

    fn get_shader_info_log(&self, shader: u32) -> String {
        self.state
            .borrow()
            .shaders
            .get(&shader)
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    fn create_program(&self) -> u32 {
        let mut state = self.state.borrow_mut();
        let id = state.alloc();
        state.programs.insert(id, SoftProgram::default());
        state.record(format!("create_program() -> {id}"));
        id
    }

    fn delete_program(&self, program: u32) {
        let mut state = self.state.borrow_mut();
        state.programs.remove(&program);
        state.uniform_values.retain(|(p, _), _| *p != program);
        state.record(format!("delete_program({program})"));
    }

    fn attach_shader(&self, program: u32, shader: u32) {
        let mut state = self.state.borrow_mut();
        if let Some(p) = state.programs.get_mut(&program) {
            if !p.shaders.contains(&shader) {
                p.shaders.push(shader);
            }
        }
        state.record(format!("attach_shader({program}, {shader})"));
    }

    fn detach_shader(&self, program: u32, shader: u32) {
        let mut state = self.state.borrow_mut();
        if let Some(p) = state.programs.get_mut(&program) {
            p.shaders.retain(|&s| s != shader);
        }
        state.record(format!("detach_shader({program}, {shader})"));
    }

    fn link_program(&self, program: u32) {
        let mut state = self.state.borrow_mut();
        state.record(format!("link_program({program})"));
        let Some(attached) = state.programs.get(&program).map(|p| p.shaders.clone()) else {
            return;
        };
        let shaders: Vec<SoftShader> = attached
            .iter()
            .filter_map(|id| state.shaders.get(id).cloned())
            .collect();
        let vertex = shaders.iter().find(|s| s.ty == gl::VERTEX_SHADER);
        let fragment = shaders.iter().find(|s| s.ty == gl::FRAGMENT_SHADER);

        let failure = if state.fail_link {
            Some("link failed")
        } else {
            match (vertex, fragment) {
                (Some(v), Some(f)) if v.compiled && f.compiled => None,
                (Some(_), Some(_)) => Some("attached shader not compiled"),
                _ => Some("missing vertex or fragment shader"),
            }
        };

        let mut linked = SoftProgram {
            shaders: attached,
            ..SoftProgram::default()
        };
        match (failure, vertex) {
            (None, Some(vertex)) => {
                linked.linked = true;
                linked.attribs = declarations(&vertex.source, "attribute");
                let mut next_location = 0;
                for shader in &shaders {
                    for uniform in declarations(&shader.source, "uniform") {
                        if linked.uniforms.iter().any(|u| u.name == uniform.name) {
                            continue;
                        }
                        linked.uniform_bases.push(next_location);
                        next_location += uniform.size;
                        linked.uniforms.push(uniform);
                    }
                }
            }
            (failure, _) => {
                linked.log = failure.unwrap_or("link failed").to_string();
            }
        }
        state.programs.insert(program, linked);
        state.uniform_values.retain(|(p, _), _| *p != program);
    }

    fn get_programiv(&self, program: u32, pname: GLenum) -> i32 {
        let state = self.state.borrow();
        let Some(p) = state.programs.get(&program) else {
            return 0;
        };
        let max_len = |vars: &[ActiveVariable]| {
            vars.iter()
                .map(|v| v.name.len() as i32 + 1)
                .max()
                .unwrap_or(0)
        };
        match pname {
            gl::LINK_STATUS => i32::from(p.linked),
            gl::VALIDATE_STATUS => i32::from(p.linked),
            gl::ATTACHED_SHADERS => p.shaders.len() as i32,
            gl::ACTIVE_ATTRIBUTES => p.attribs.len() as i32,
            gl::ACTIVE_UNIFORMS => p.uniforms.len() as i32,
            gl::ACTIVE_ATTRIBUTE_MAX_LENGTH => max_len(&p.attribs),
            gl::ACTIVE_UNIFORM_MAX_LENGTH => max_len(&p.uniforms),
            gl::INFO_LOG_LENGTH if p.log.is_empty() => 0,
            gl::INFO_LOG_LENGTH => p.log.len() as i32 + 1,
            _ => 0,
        }
    }

    fn get_program_info_log(&self, program: u32) -> String {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|p| p.log.clone())
            .unwrap_or_default()
    }

    fn get_attached_shaders(&self, program: u32) -> Vec<u32> {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|p| p.shaders.clone())
            .unwrap_or_default()
    }

    fn get_active_attribs(&self, program: u32) -> Vec<ActiveVariable> {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|p| p.attribs.clone())
            .unwrap_or_default()
    }

    fn get_active_uniforms(&self, program: u32) -> Vec<ActiveVariable> {
        self.state
            .borrow()
            .programs
            .get(&program)
            .map(|p| p.uniforms.clone())
            .unwrap_or_default()
    }

    fn get_attrib_location(&self, program: u32, name: &str) -> i32 {
        let state = self.state.borrow();
        state
            .programs
            .get(&program)
            .filter(|p| p.linked)
            .and_then(|p| p.attribs.iter().position(|a| a.name == name))
            .map_or(-1, |i| i as i32)
    }

    fn get_uniform_location(&self, program: u32, name: &str) -> i32 {
        let state = self.state.borrow();
        state
            .programs
            .get(&program)
            .filter(|p| p.linked)
            .map_or(-1, |p| uniform_location(p, name))
    }

    fn use_program(&self, program: u32) {
        let mut state = self.state.borrow_mut();
        state.current_program = program;
        state.record(format!("use_program({program})"));
    }

    fn get_uniformfv(&self, program: u32, location: i32) -> Vec<f32> {
        let state = self.state.borrow();
        let Some(ty) = state
            .programs
            .get(&program)
            .filter(|p| p.linked)
            .and_then(|p| uniform_type_at(p, location))
        else {
            return Vec::new();
        };
        let mut values = state
            .uniform_values
            .get(&(program, location))
            .cloned()
            .unwrap_or_default();
        values.resize(uniform_components(ty) as usize, 0.0);
        values
    }

    fn get_uniformiv(&self, program: u32, location: i32) -> Vec<i32> {
        self.get_uniformfv(program, location)
            .into_iter()
            .map(|v| v as i32)
            .collect()
    }

    fn uniform1i(&self, location: i32, value: i32) {
        self.uniform1iv(location, &[value]);
    }

    fn uniform1iv(&self, location: i32, values: &[i32]) {
        let mut state = self.state.borrow_mut();
        let program = state.current_program;
        for (i, &v) in values.iter().enumerate() {
            state
                .uniform_values
                .insert((program, location + i as i32), vec![v as f32]);
        }
        state.record(format!("uniform1iv({location}, {values:?})"));
    }

    fn uniform1f(&self, location: i32, value: f32) {
        let mut state = self.state.borrow_mut();
        let program = state.current_program;
        state.uniform_values.insert((program, location), vec![value]);
        state.record(format!("uniform1f({location}, {value})"));
    }

    fn uniform4fv(&self, location: i32, values: &[f32]) {
        let mut state = self.state.borrow_mut();
        let program = state.current_program;
        for (i, chunk) in values.chunks(4).enumerate() {
            state
                .uniform_values
                .insert((program, location + i as i32), chunk.to_vec());
        }
        state.record(format!("uniform4fv({location}, {})", values.len() / 4));
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        let mut state = self.state.borrow_mut();
        state.enabled_attribs.insert(index);
        state.record(format!("enable_vertex_attrib_array({index})"));
    }

    fn disable_vertex_attrib_array(&self, index: u32) {
        let mut state = self.state.borrow_mut();
        state.enabled_attribs.remove(&index);
        state.record(format!("disable_vertex_attrib_array({index})"));
    }

    fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        ty: GLenum,
        normalized: bool,
        stride: i32,
        offset: u32,
    ) {
        self.state.borrow_mut().record(format!(
            "vertex_attrib_pointer({index}, {size}, {ty:#x}, {normalized}, {stride}, {offset})"
        ));
    }

    fn draw_arrays(&self, mode: GLenum, first: i32, count: i32) {
        let mut state = self.state.borrow_mut();
        state.draw_calls += 1;
        state.last_draw_bindings = state
            .unit_bindings
            .iter()
            .map(|(&(unit, target), &tex)| (unit, target, tex))
            .collect();
        state.record(format!("draw_arrays({mode:#x}, {first}, {count})"));
    }

    fn draw_elements(&self, mode: GLenum, count: i32, ty: GLenum, offset: u32) {
        let mut state = self.state.borrow_mut();
        state.draw_calls += 1;
        state.last_draw_bindings = state
            .unit_bindings
            .iter()
            .map(|(&(unit, target), &tex)| (unit, target, tex))
            .collect();
        state.record(format!("draw_elements({mode:#x}, {count}, {ty:#x}, {offset})"));
    }

    fn clear(&self, mask: u32) {
        let mut state = self.state.borrow_mut();
        if mask & gl::COLOR_BUFFER_BIT != 0 {
            if let Some(ctx) = state.current {
                let rgba = state
                    .clear_color
                    .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
                state.color.insert(ctx, rgba);
            }
        }
        state.record(format!("clear({mask:#x})"));
    }

    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        let mut state = self.state.borrow_mut();
        state.clear_color = [r, g, b, a];
        state.record(format!("clear_color({r}, {g}, {b}, {a})"));
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.state
            .borrow_mut()
            .record(format!("viewport({x}, {y}, {width}, {height})"));
    }

    fn pixel_storei(&self, pname: GLenum, value: i32) {
        let mut state = self.state.borrow_mut();
        if pname == gl::PACK_ALIGNMENT {
            state.pack_alignment = value;
        }
        state.record(format!("pixel_storei({pname:#x}, {value})"));
    }

    fn read_pixels(&self, x: i32, y: i32, width: i32, height: i32, format: GLenum, ty: GLenum) -> Vec<u8> {
        let pixel = self.color();
        let mut state = self.state.borrow_mut();
        state.record(format!("read_pixels({x}, {y}, {width}, {height})"));
        let size = compute_image_data_size(width, height, format, ty, state.pack_alignment.max(1) as u32).unwrap_or(0);
        if format == gl::RGBA && ty == gl::UNSIGNED_BYTE {
            pixel.iter().copied().cycle().take(size as usize).collect()
        } else {
            vec![0; size as usize]
        }
    }

    fn flush(&self) {
        self.state.borrow_mut().record("flush()".into());
    }

    fn finish(&self) {
        self.state.borrow_mut().record("finish()".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VS: &str = "attribute vec4 a_position; attribute vec2 a_uv; uniform mat4 u_mvp; void main() {}";
    const FS: &str = "precision mediump float; uniform sampler2D u_tex; uniform vec4 u_colors[3]; void main() {}";

    fn linked(gl: &SoftGl) -> u32 {
        let vs = gl.create_shader(gl::VERTEX_SHADER);
        gl.shader_source(vs, VS);
        gl.compile_shader(vs);
        let fs = gl.create_shader(gl::FRAGMENT_SHADER);
        gl.shader_source(fs, FS);
        gl.compile_shader(fs);
        let program = gl.create_program();
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);
        program
    }

    #[test]
    fn link_reports_declared_variables() {
        let gl = SoftGl::new();
        let program = linked(&gl);
        assert_eq!(gl.get_programiv(program, gl::LINK_STATUS), 1);
        let attribs: Vec<_> = gl.get_active_attribs(program).into_iter().map(|a| a.name).collect();
        assert_eq!(attribs, ["a_position", "a_uv"]);
        let uniforms = gl.get_active_uniforms(program);
        assert_eq!(uniforms[2].name, "u_colors[0]");
        assert_eq!(uniforms[2].size, 3);
        assert_eq!(gl.get_uniform_location(program, "u_tex"), 1);
        assert_eq!(gl.get_uniform_location(program, "u_colors[2]"), 4);
        assert_eq!(gl.get_uniform_location(program, "u_colors[3]"), -1);
        assert_eq!(gl.get_uniform_location(program, "u_mvp[1]"), -1);
    }

    #[test]
    fn compile_errors_fail_the_link() {
        let gl = SoftGl::new();
        let vs = gl.create_shader(gl::VERTEX_SHADER);
        gl.shader_source(vs, "#error nope");
        gl.compile_shader(vs);
        assert_eq!(gl.get_shaderiv(vs, gl::COMPILE_STATUS), 0);
        let program = gl.create_program();
        gl.attach_shader(program, vs);
        gl.link_program(program);
        assert_eq!(gl.get_programiv(program, gl::LINK_STATUS), 0);
        assert!(gl.get_programiv(program, gl::INFO_LOG_LENGTH) > 0);
    }

    #[test]
    fn clear_fills_the_color_buffer() {
        let gl = SoftGl::new();
        let ctx = gl.create_context().unwrap();
        assert!(gl.make_current(ctx));
        gl.clear_color(1.0, 0.0, 0.0, 1.0);
        gl.clear(gl::COLOR_BUFFER_BIT);
        assert_eq!(gl.read_pixels(0, 0, 2, 1, gl::RGBA, gl::UNSIGNED_BYTE), [255, 0, 0, 255, 255, 0, 0, 255]);
    }

    #[test]
    fn uniforms_read_back_with_their_type_width() {
        let gl = SoftGl::new();
        let program = linked(&gl);
        gl.use_program(program);
        gl.uniform4fv(3, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(gl.get_uniformfv(program, 3), [1.0, 2.0, 3.0, 4.0]);
        // Unset elements of the same array read as zero.
        assert_eq!(gl.get_uniformiv(program, 4), [0, 0, 0, 0]);
        assert_eq!(gl.get_uniformfv(program, 0).len(), 16);
        assert!(gl.get_uniformfv(program, 9).is_empty());
    }

    #[test]
    fn sub_image_patches_the_level() {
        let gl = SoftGl::new();
        let texture = gl.gen_texture();
        gl.bind_texture(gl::TEXTURE_2D, texture);
        gl.tex_image_2d(gl::TEXTURE_2D, 0, gl::RGBA, 2, 2, 0, gl::RGBA, gl::UNSIGNED_BYTE, None);
        gl.tex_sub_image_2d(gl::TEXTURE_2D, 0, 1, 1, 1, 1, gl::RGBA, gl::UNSIGNED_BYTE, &[9, 8, 7, 6]);
        let level = gl.texture_level(texture, gl::TEXTURE_2D, 0).unwrap();
        assert_eq!(&level.data[..12], &[0; 12]);
        assert_eq!(&level.data[12..], &[9, 8, 7, 6]);
    }

    #[test]
    fn injected_errors_drain_in_order() {
        let gl = SoftGl::new();
        gl.inject_error(gl::OUT_OF_MEMORY);
        gl.inject_error(gl::INVALID_VALUE);
        assert_eq!(gl.get_error(), gl::OUT_OF_MEMORY);
        assert_eq!(gl.get_error(), gl::INVALID_VALUE);
        assert_eq!(gl.get_error(), gl::NO_ERROR);
    }
}
