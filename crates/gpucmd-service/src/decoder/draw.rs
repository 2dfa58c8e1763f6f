//! Vertex attributes, draws, framebuffer operations and presentation.

use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::gl_utils::{compute_image_data_size, type_size, validate, ClearMask};
use gpucmd_protocol::gles2::results;
use gpucmd_protocol::CbError;
use tracing::warn;

use super::{shm_read, shm_write, CmdResult, DecoderEvent, Gles2Decoder};
use crate::command_buffer::CommandBufferEngine;
use crate::gl::GlDriver;
use crate::surface::PlatformSurface;

/// Largest stride `VertexAttribPointer` accepts.
const MAX_VERTEX_ATTRIB_STRIDE: i32 = 255;

impl<S: PlatformSurface> Gles2Decoder<S> {
    pub(super) fn do_enable_vertex_attrib_array(&mut self, index: u32, enable: bool) -> CmdResult {
        if !self.vertex_attribs.enable(index, enable) {
            return self.gl_error(gl::INVALID_VALUE, "EnableVertexAttribArray: index out of range");
        }
        if enable {
            self.gl.enable_vertex_attrib_array(index);
        } else {
            self.gl.disable_vertex_attrib_array(index);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn do_vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        ty: GLenum,
        normalized: bool,
        stride: i32,
        offset: u32,
    ) -> CmdResult {
        let Some(buffer) = self.bound_array_buffer.clone() else {
            return self.gl_error(gl::INVALID_VALUE, "VertexAttribPointer: no array buffer bound");
        };
        if !validate::vertex_attrib_type(ty) {
            return self.gl_error(gl::INVALID_ENUM, "VertexAttribPointer: type");
        }
        if !validate::vertex_attrib_size(size) {
            return self.gl_error(gl::INVALID_VALUE, "VertexAttribPointer: size");
        }
        if index >= self.vertex_attribs.max_vertex_attribs() {
            return self.gl_error(gl::INVALID_VALUE, "VertexAttribPointer: index out of range");
        }
        if !(0..=MAX_VERTEX_ATTRIB_STRIDE).contains(&stride) {
            return self.gl_error(gl::INVALID_VALUE, "VertexAttribPointer: stride");
        }
        let component_size = type_size(ty);
        if offset % component_size != 0 || stride as u32 % component_size != 0 {
            return self.gl_error(gl::INVALID_OPERATION, "VertexAttribPointer: misaligned offset or stride");
        }
        if let Some(attrib) = self.vertex_attribs.get_mut(index) {
            attrib.set_info(Some(buffer), size, ty, normalized, stride, offset);
        }
        self.gl.vertex_attrib_pointer(index, size, ty, normalized, stride, offset);
        Ok(())
    }

    /// Writes the attribute's buffer offset as a one-element sized result.
    /// The count must be zero on entry.
    pub(super) fn do_get_vertex_attrib_pointerv(
        &mut self,
        engine: &dyn CommandBufferEngine,
        index: u32,
        pname: GLenum,
        shm_id: u32,
        shm_offset: u32,
    ) -> CmdResult {
        let current = shm_read(engine, shm_id, shm_offset, results::sized_result_bytes(1))?;
        if current[..4] != [0; 4] {
            return Err(CbError::InvalidArguments);
        }
        if !validate::vertex_pointer(pname) {
            return self.gl_error(gl::INVALID_ENUM, "GetVertexAttribPointerv: pname");
        }
        let Some(attrib) = self.vertex_attribs.get(index) else {
            return self.gl_error(gl::INVALID_VALUE, "GetVertexAttribPointerv: index out of range");
        };
        let mut result = Vec::with_capacity(results::sized_result_bytes(1) as usize);
        result.extend_from_slice(&1u32.to_le_bytes());
        result.extend_from_slice(&attrib.offset().to_le_bytes());
        shm_write(engine, shm_id, shm_offset, &result)
    }

    fn has_usable_program(&self) -> bool {
        self.current_program
            .as_ref()
            .is_some_and(|program| program.borrow().is_valid())
    }

    /// Whether every enabled attribute the program reads can fetch vertex
    /// `max_vertex`.
    fn attribs_accessible(&self, max_vertex: u32) -> bool {
        let Some(program) = self.current_program.as_ref() else {
            return false;
        };
        let program = program.borrow();
        let Some(info) = program.info.as_ref() else {
            return false;
        };
        info.attribs().iter().all(|attrib| {
            u32::try_from(attrib.location)
                .ok()
                .and_then(|location| self.vertex_attribs.get(location))
                .map_or(true, |vertex_attrib| vertex_attrib.can_access(max_vertex))
        })
    }

    /// Binds the black textures over every sampled texture that cannot be
    /// rendered. Returns the `(unit, target)` pairs to restore.
    fn bind_black_textures(&self) -> Vec<(u32, GLenum)> {
        let mut replaced = Vec::new();
        let Some(program) = self.current_program.as_ref() else {
            return replaced;
        };
        let group = self.group.borrow();
        if !group.texture_manager.have_unrenderable_textures() {
            return replaced;
        }
        let program = program.borrow();
        let Some(info) = program.info.as_ref() else {
            return replaced;
        };
        for sampler in info.samplers() {
            let (target, black) = if sampler.ty == gl::SAMPLER_2D {
                (gl::TEXTURE_2D, self.black_2d)
            } else {
                (gl::TEXTURE_CUBE_MAP, self.black_cube)
            };
            for &unit in &sampler.texture_units {
                let Some(texture_unit) = u32::try_from(unit).ok().and_then(|u| self.texture_units.get(u as usize))
                else {
                    continue;
                };
                let unit = unit as u32;
                if replaced.contains(&(unit, target)) || group.texture_manager.can_render(texture_unit.bound(target)) {
                    continue;
                }
                self.gl.active_texture(gl::TEXTURE0 + unit);
                self.gl.bind_texture(target, black);
                replaced.push((unit, target));
            }
        }
        if !replaced.is_empty() {
            self.gl.active_texture(gl::TEXTURE0 + self.active_texture_unit);
        }
        replaced
    }

    fn restore_black_textures(&self, replaced: &[(u32, GLenum)]) {
        if replaced.is_empty() {
            return;
        }
        for &(unit, target) in replaced {
            self.restore_texture_binding(unit, target);
        }
        self.gl.active_texture(gl::TEXTURE0 + self.active_texture_unit);
    }

    fn draw_with_black_textures(&self, draw: impl FnOnce(&dyn GlDriver)) {
        let replaced = self.bind_black_textures();
        draw(&*self.gl);
        self.restore_black_textures(&replaced);
    }

    pub(super) fn do_draw_arrays(&mut self, mode: GLenum, first: i32, count: i32) -> CmdResult {
        if !validate::draw_mode(mode) {
            return self.gl_error(gl::INVALID_ENUM, "DrawArrays: mode");
        }
        if first < 0 || count < 0 {
            return self.gl_error(gl::INVALID_VALUE, "DrawArrays: negative first or count");
        }
        if count == 0 || !self.has_usable_program() {
            return Ok(());
        }
        let Some(max_vertex) = first.checked_add(count - 1) else {
            return self.gl_error(gl::INVALID_OPERATION, "DrawArrays: range overflows");
        };
        if !self.attribs_accessible(max_vertex as u32) {
            return self.gl_error(gl::INVALID_OPERATION, "DrawArrays: attribs out of range");
        }
        self.draw_with_black_textures(|gl| gl.draw_arrays(mode, first, count));
        Ok(())
    }

    pub(super) fn do_draw_elements(&mut self, mode: GLenum, count: i32, ty: GLenum, offset: u32) -> CmdResult {
        if !validate::draw_mode(mode) {
            return self.gl_error(gl::INVALID_ENUM, "DrawElements: mode");
        }
        if !validate::index_type(ty) {
            return self.gl_error(gl::INVALID_ENUM, "DrawElements: type");
        }
        if count < 0 {
            return self.gl_error(gl::INVALID_VALUE, "DrawElements: count < 0");
        }
        let Some(buffer) = self.bound_element_array_buffer.clone() else {
            return self.gl_error(gl::INVALID_OPERATION, "DrawElements: no element array buffer");
        };
        if count == 0 {
            return Ok(());
        }
        let Some(max_vertex) = buffer.max_value_for_range(offset, count as u32, ty) else {
            return self.gl_error(gl::INVALID_OPERATION, "DrawElements: range out of bounds");
        };
        if !self.has_usable_program() {
            return Ok(());
        }
        if !self.attribs_accessible(max_vertex) {
            return self.gl_error(gl::INVALID_OPERATION, "DrawElements: attribs out of range");
        }
        self.draw_with_black_textures(|gl| gl.draw_elements(mode, count, ty, offset));
        Ok(())
    }

    pub(super) fn do_clear(&mut self, mask: u32) -> CmdResult {
        if ClearMask::from_bits(mask).is_none() {
            return self.gl_error(gl::INVALID_VALUE, "Clear: mask");
        }
        self.gl.clear(mask);
        Ok(())
    }

    pub(super) fn do_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) -> CmdResult {
        if width < 0 || height < 0 {
            return self.gl_error(gl::INVALID_VALUE, "Viewport: negative size");
        }
        self.gl.viewport(x, y, width, height);
        Ok(())
    }

    /// Arguments: `x, y, width, height, format, type, pixels_shm_id,
    /// pixels_shm_offset, result_shm_id, result_shm_offset`. The result is a
    /// `u32` success flag that must be zero on entry.
    pub(super) fn do_read_pixels(&mut self, engine: &dyn CommandBufferEngine, a: &[u32]) -> CmdResult {
        let (x, y, width, height) = (a[0] as i32, a[1] as i32, a[2] as i32, a[3] as i32);
        let (format, ty) = (a[4], a[5]);
        let (pixels_shm_id, pixels_shm_offset, result_shm_id, result_shm_offset) = (a[6], a[7], a[8], a[9]);

        let result = shm_read(engine, result_shm_id, result_shm_offset, results::READ_PIXELS_BYTES)?;
        if result != [0; 4] {
            return Err(CbError::InvalidArguments);
        }
        if !validate::read_pixel_format(format) {
            return self.gl_error(gl::INVALID_ENUM, "ReadPixels: format");
        }
        if !validate::pixel_type(ty) {
            return self.gl_error(gl::INVALID_ENUM, "ReadPixels: type");
        }
        if width < 0 || height < 0 {
            return self.gl_error(gl::INVALID_VALUE, "ReadPixels: negative size");
        }
        let Some(size) = compute_image_data_size(width, height, format, ty, self.pack_alignment as u32) else {
            return Err(CbError::OutOfBounds);
        };
        // Fails before the driver is touched when the destination is short.
        shm_read(engine, pixels_shm_id, pixels_shm_offset, size)?;

        self.copy_real_gl_errors();
        let mut pixels = self.gl.read_pixels(x, y, width, height, format, ty);
        let error = self.gl.get_error();
        if error != gl::NO_ERROR {
            return self.gl_error(error, "ReadPixels: driver");
        }
        pixels.resize(size as usize, 0);
        shm_write(engine, pixels_shm_id, pixels_shm_offset, &pixels)?;
        shm_write(engine, result_shm_id, result_shm_offset, &1u32.to_le_bytes())
    }

    pub(super) fn do_get_string(&mut self, name: GLenum, bucket_id: u32) -> CmdResult {
        if !validate::string_type(name) {
            return self.gl_error(gl::INVALID_ENUM, "GetString: name");
        }
        let value = self.gl.get_string(name);
        self.set_bucket(bucket_id, value.into_bytes());
        Ok(())
    }

    /// Presents the frame and yields with `Throttle`.
    pub(super) fn do_swap_buffers(&mut self) -> CmdResult {
        self.copy_to_parent_texture();
        if !self.surface.swap_buffers(&*self.gl) {
            warn!(context = ?self.context, "swap failed");
            self.lose_context();
            return Err(CbError::LostContext);
        }
        self.events.push(DecoderEvent::SwapBuffers);
        Err(CbError::Throttle)
    }
}

