//! The driver seam.
//!
//! The decoder never talks to a GL implementation directly; everything goes
//! through [`GlDriver`]. All ids crossing this trait are service ids.

use gpucmd_protocol::gl::GLenum;

/// Driver-side context handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GlContextId(pub u32);

/// One entry of a linked program's attribute or uniform table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveVariable {
    pub name: String,
    pub size: i32,
    pub ty: GLenum,
}

pub trait GlDriver {
    fn create_context(&self) -> Option<GlContextId>;
    fn make_current(&self, context: GlContextId) -> bool;
    fn current_context(&self) -> Option<GlContextId>;
    fn destroy_context(&self, context: GlContextId);

    fn get_error(&self) -> GLenum;
    fn get_integer(&self, pname: GLenum) -> i32;
    fn get_string(&self, name: GLenum) -> String;

    fn gen_buffer(&self) -> u32;
    fn delete_buffer(&self, buffer: u32);
    fn bind_buffer(&self, target: GLenum, buffer: u32);
    fn buffer_data(&self, target: GLenum, size: u32, data: Option<&[u8]>, usage: GLenum);
    fn buffer_sub_data(&self, target: GLenum, offset: u32, data: &[u8]);

    fn gen_texture(&self) -> u32;
    fn delete_texture(&self, texture: u32);
    fn active_texture(&self, unit: GLenum);
    fn bind_texture(&self, target: GLenum, texture: u32);
    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d(
        &self,
        target: GLenum,
        level: i32,
        internal_format: GLenum,
        width: i32,
        height: i32,
        border: i32,
        format: GLenum,
        ty: GLenum,
        pixels: Option<&[u8]>,
    );
    #[allow(clippy::too_many_arguments)]
    fn compressed_tex_image_2d(
        &self,
        target: GLenum,
        level: i32,
        internal_format: GLenum,
        width: i32,
        height: i32,
        border: i32,
        data: &[u8],
    );
    #[allow(clippy::too_many_arguments)]
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
    );
    fn tex_parameteri(&self, target: GLenum, pname: GLenum, value: i32);
    fn tex_parameterf(&self, target: GLenum, pname: GLenum, value: f32);
    fn generate_mipmap(&self, target: GLenum);
    /// Copies the current color buffer into level 0 of the bound texture.
    fn copy_tex_image_2d(&self, target: GLenum, internal_format: GLenum, width: i32, height: i32);

    fn gen_framebuffer(&self) -> u32;
    fn delete_framebuffer(&self, framebuffer: u32);
    fn bind_framebuffer(&self, target: GLenum, framebuffer: u32);
    fn gen_renderbuffer(&self) -> u32;
    fn delete_renderbuffer(&self, renderbuffer: u32);
    fn bind_renderbuffer(&self, target: GLenum, renderbuffer: u32);

    fn create_shader(&self, ty: GLenum) -> u32;
    fn delete_shader(&self, shader: u32);
    fn shader_source(&self, shader: u32, source: &str);
    fn compile_shader(&self, shader: u32);
    fn get_shaderiv(&self, shader: u32, pname: GLenum) -> i32;
    fn get_shader_info_log(&self, shader: u32) -> String;

    fn create_program(&self) -> u32;
    fn delete_program(&self, program: u32);
    fn attach_shader(&self, program: u32, shader: u32);
    fn detach_shader(&self, program: u32, shader: u32);
    fn link_program(&self, program: u32);
    fn get_programiv(&self, program: u32, pname: GLenum) -> i32;
    fn get_program_info_log(&self, program: u32) -> String;
    fn get_attached_shaders(&self, program: u32) -> Vec<u32>;
    fn get_active_attribs(&self, program: u32) -> Vec<ActiveVariable>;
    fn get_active_uniforms(&self, program: u32) -> Vec<ActiveVariable>;
    fn get_attrib_location(&self, program: u32, name: &str) -> i32;
    fn get_uniform_location(&self, program: u32, name: &str) -> i32;
    fn use_program(&self, program: u32);
    /// Components of the uniform at `location`, in the program's current
    /// value. Unset uniforms read as zero.
    fn get_uniformfv(&self, program: u32, location: i32) -> Vec<f32>;
    fn get_uniformiv(&self, program: u32, location: i32) -> Vec<i32>;

    fn uniform1i(&self, location: i32, value: i32);
    fn uniform1iv(&self, location: i32, values: &[i32]);
    fn uniform1f(&self, location: i32, value: f32);
    fn uniform4fv(&self, location: i32, values: &[f32]);

    fn enable_vertex_attrib_array(&self, index: u32);
    fn disable_vertex_attrib_array(&self, index: u32);
    #[allow(clippy::too_many_arguments)]
    fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        ty: GLenum,
        normalized: bool,
        stride: i32,
        offset: u32,
    );

    fn draw_arrays(&self, mode: GLenum, first: i32, count: i32);
    fn draw_elements(&self, mode: GLenum, count: i32, ty: GLenum, offset: u32);
    fn clear(&self, mask: u32);
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32);
    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    fn pixel_storei(&self, pname: GLenum, value: i32);
    /// Returns tightly packed RGBA8 rows, bottom row first.
    fn read_pixels(&self, x: i32, y: i32, width: i32, height: i32, format: GLenum, ty: GLenum) -> Vec<u8>;
    fn flush(&self);
    fn finish(&self);
}
