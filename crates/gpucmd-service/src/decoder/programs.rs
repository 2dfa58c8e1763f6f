//! Shaders, programs and uniforms.

use std::rc::Rc;

use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::gl_utils::{is_sampler_type, uniform_components, validate};
use gpucmd_protocol::gles2::results;
use gpucmd_protocol::CbError;

use super::{shm_read, shm_read_i32, shm_write, CmdResult, Gles2Decoder};
use crate::command_buffer::CommandBufferEngine;
use crate::surface::PlatformSurface;

/// Names arrive as raw bytes, possibly NUL terminated.
fn name_from_bytes(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl<S: PlatformSurface> Gles2Decoder<S> {
    /// Programs and shaders live in one client namespace.
    fn check_new_program_or_shader(&self, client_id: u32) -> CmdResult {
        let group = self.group.borrow();
        if client_id == 0
            || group.ids.programs.contains_client_id(client_id)
            || group.ids.shaders.contains_client_id(client_id)
        {
            return Err(CbError::InvalidArguments);
        }
        Ok(())
    }

    pub(super) fn do_create_program(&mut self, client_id: u32) -> CmdResult {
        self.check_new_program_or_shader(client_id)?;
        let service_id = self.gl.create_program();
        let mut group = self.group.borrow_mut();
        group.ids.programs.add_mapping(client_id, service_id);
        group.program_manager.create_program_info(client_id, service_id);
        Ok(())
    }

    pub(super) fn do_create_shader(&mut self, ty: GLenum, client_id: u32) -> CmdResult {
        if !validate::shader_type(ty) {
            return self.gl_error(gl::INVALID_ENUM, "CreateShader: type");
        }
        self.check_new_program_or_shader(client_id)?;
        let service_id = self.gl.create_shader(ty);
        let mut group = self.group.borrow_mut();
        group.ids.shaders.add_mapping(client_id, service_id);
        group.shader_manager.create_shader_info(client_id, service_id, ty);
        Ok(())
    }

    pub(super) fn do_delete_shader(&mut self, client_id: u32) -> CmdResult {
        let mut group = self.group.borrow_mut();
        let Some(service_id) = group.ids.shaders.get_service_id(client_id) else {
            return Ok(());
        };
        group.ids.shaders.remove_mapping(client_id, service_id);
        group.shader_manager.remove_shader_info(client_id);
        self.gl.delete_shader(service_id);
        Ok(())
    }

    pub(super) fn do_delete_program(&mut self, client_id: u32) -> CmdResult {
        let removed = {
            let mut group = self.group.borrow_mut();
            let Some(service_id) = group.ids.programs.get_service_id(client_id) else {
                return Ok(());
            };
            group.ids.programs.remove_mapping(client_id, service_id);
            self.gl.delete_program(service_id);
            group.program_manager.remove_program_info(client_id)
        };
        let is_current = match (&removed, &self.current_program) {
            (Some(removed), Some(current)) => Rc::ptr_eq(removed, current),
            _ => false,
        };
        if is_current {
            self.current_program = None;
            self.gl.use_program(0);
        }
        Ok(())
    }

    /// Stores the source; the driver only sees it on `CompileShader`.
    pub(super) fn do_shader_source(&mut self, client_id: u32, source: &[u8]) -> CmdResult {
        let shader = self.group.borrow().shader_manager.get_shader_info(client_id);
        let Some(shader) = shader else {
            return self.gl_error(gl::INVALID_VALUE, "ShaderSource: unknown shader");
        };
        shader.borrow_mut().source = Some(name_from_bytes(source));
        Ok(())
    }

    pub(super) fn do_compile_shader(&mut self, client_id: u32) -> CmdResult {
        let shader = self.group.borrow().shader_manager.get_shader_info(client_id);
        let Some(shader) = shader else {
            return self.gl_error(gl::INVALID_VALUE, "CompileShader: unknown shader");
        };
        let mut shader = shader.borrow_mut();
        let service_id = shader.service_id;
        self.gl
            .shader_source(service_id, shader.source.as_deref().unwrap_or_default());
        self.gl.compile_shader(service_id);
        shader.compiled = self.gl.get_shaderiv(service_id, gl::COMPILE_STATUS) != 0;
        shader.log = self.gl.get_shader_info_log(service_id);
        Ok(())
    }

    pub(super) fn do_get_shaderiv(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        pname: GLenum,
        shm_id: u32,
        shm_offset: u32,
    ) -> CmdResult {
        if !validate::shader_parameter(pname) {
            return self.gl_error(gl::INVALID_ENUM, "GetShaderiv: pname");
        }
        let shader = self.group.borrow().shader_manager.get_shader_info(client_id);
        let Some(shader) = shader else {
            return self.gl_error(gl::INVALID_VALUE, "GetShaderiv: unknown shader");
        };
        let shader = shader.borrow();
        let text_length = |s: &str| if s.is_empty() { 0 } else { s.len() as i32 + 1 };
        let value = match pname {
            gl::SHADER_TYPE => shader.shader_type as i32,
            gl::COMPILE_STATUS => i32::from(shader.compiled),
            gl::INFO_LOG_LENGTH => text_length(&shader.log),
            gl::SHADER_SOURCE_LENGTH => text_length(shader.source.as_deref().unwrap_or_default()),
            _ => 0,
        };
        shm_write(engine, shm_id, shm_offset, &value.to_le_bytes())
    }

    pub(super) fn do_get_shader_source(&mut self, client_id: u32, bucket_id: u32) -> CmdResult {
        let shader = self.group.borrow().shader_manager.get_shader_info(client_id);
        let Some(shader) = shader else {
            return self.gl_error(gl::INVALID_VALUE, "GetShaderSource: unknown shader");
        };
        let source = shader.borrow().source.clone().unwrap_or_default();
        self.set_bucket(bucket_id, source.into_bytes());
        Ok(())
    }

    pub(super) fn do_attach_shader(&mut self, program_id: u32, shader_id: u32) -> CmdResult {
        let (program, shader) = {
            let group = self.group.borrow();
            (
                group.program_manager.get_program_info(program_id),
                group.shader_manager.get_shader_info(shader_id),
            )
        };
        let (Some(program), Some(shader)) = (program, shader) else {
            return self.gl_error(gl::INVALID_VALUE, "AttachShader: unknown program or shader");
        };
        let shader = shader.borrow();
        let mut program = program.borrow_mut();
        if program.is_attached(shader_id) || program.has_shader_of_type(shader.shader_type) {
            return self.gl_error(gl::INVALID_OPERATION, "AttachShader: already attached");
        }
        self.gl.attach_shader(program.service_id, shader.service_id);
        program.attached_shaders.push((shader_id, shader.shader_type));
        Ok(())
    }

    pub(super) fn do_detach_shader(&mut self, program_id: u32, shader_id: u32) -> CmdResult {
        let (program, shader_service_id) = {
            let group = self.group.borrow();
            (
                group.program_manager.get_program_info(program_id),
                group.ids.shaders.get_service_id(shader_id),
            )
        };
        let (Some(program), Some(shader_service_id)) = (program, shader_service_id) else {
            return self.gl_error(gl::INVALID_VALUE, "DetachShader: unknown program or shader");
        };
        let mut program = program.borrow_mut();
        if !program.is_attached(shader_id) {
            return self.gl_error(gl::INVALID_OPERATION, "DetachShader: not attached");
        }
        self.gl.detach_shader(program.service_id, shader_service_id);
        program.attached_shaders.retain(|&(id, _)| id != shader_id);
        Ok(())
    }

    pub(super) fn do_link_program(&mut self, client_id: u32) -> CmdResult {
        let program = self.group.borrow().program_manager.get_program_info(client_id);
        let Some(program) = program else {
            return self.gl_error(gl::INVALID_VALUE, "LinkProgram: unknown program");
        };
        let mut program = program.borrow_mut();
        self.gl.link_program(program.service_id);
        program.update_after_link(&*self.gl);
        Ok(())
    }

    pub(super) fn do_use_program(&mut self, client_id: u32) -> CmdResult {
        if client_id == 0 {
            self.current_program = None;
            self.gl.use_program(0);
            return Ok(());
        }
        let program = self.group.borrow().program_manager.get_program_info(client_id);
        let Some(program) = program else {
            return self.gl_error(gl::INVALID_VALUE, "UseProgram: unknown program");
        };
        if !program.borrow().is_valid() {
            return self.gl_error(gl::INVALID_OPERATION, "UseProgram: program not linked");
        }
        self.gl.use_program(program.borrow().service_id);
        self.current_program = Some(program);
        Ok(())
    }

    pub(super) fn do_get_programiv(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        pname: GLenum,
        shm_id: u32,
        shm_offset: u32,
    ) -> CmdResult {
        if !validate::program_parameter(pname) {
            return self.gl_error(gl::INVALID_ENUM, "GetProgramiv: pname");
        }
        let program = self.group.borrow().program_manager.get_program_info(client_id);
        let Some(program) = program else {
            return self.gl_error(gl::INVALID_VALUE, "GetProgramiv: unknown program");
        };
        let value = program.borrow().get_programiv(pname);
        shm_write(engine, shm_id, shm_offset, &value.to_le_bytes())
    }

    pub(super) fn do_get_attrib_location(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        name: &[u8],
        shm_id: u32,
        shm_offset: u32,
    ) -> CmdResult {
        self.get_location(engine, client_id, name, shm_id, shm_offset, false)
    }

    pub(super) fn do_get_uniform_location(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        name: &[u8],
        shm_id: u32,
        shm_offset: u32,
    ) -> CmdResult {
        self.get_location(engine, client_id, name, shm_id, shm_offset, true)
    }

    /// The result slot must hold `-1` on entry; it is only overwritten on
    /// success.
    fn get_location(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        name: &[u8],
        shm_id: u32,
        shm_offset: u32,
        uniform: bool,
    ) -> CmdResult {
        if shm_read_i32(engine, shm_id, shm_offset)? != -1 {
            return Err(CbError::InvalidArguments);
        }
        let program = self.group.borrow().program_manager.get_program_info(client_id);
        let Some(program) = program else {
            return self.gl_error(gl::INVALID_VALUE, "GetLocation: unknown program");
        };
        let program = program.borrow();
        let Some(info) = program.info.as_ref() else {
            return self.gl_error(gl::INVALID_OPERATION, "GetLocation: program not linked");
        };
        let name = name_from_bytes(name);
        let location = if uniform {
            info.get_uniform_location(&name)
        } else {
            info.get_attrib_location(&name)
        };
        shm_write(engine, shm_id, shm_offset, &location.to_le_bytes())
    }

    pub(super) fn do_get_active_attrib(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        index: u32,
        bucket_id: u32,
        shm_id: u32,
        shm_offset: u32,
    ) -> CmdResult {
        self.get_active(engine, client_id, index, bucket_id, shm_id, shm_offset, false)
    }

    pub(super) fn do_get_active_uniform(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        index: u32,
        bucket_id: u32,
        shm_id: u32,
        shm_offset: u32,
    ) -> CmdResult {
        self.get_active(engine, client_id, index, bucket_id, shm_id, shm_offset, true)
    }

    /// Result layout is `{success: i32, size: i32, type: u32}`; `success`
    /// must be zero on entry. The name goes to `bucket_id`.
    #[allow(clippy::too_many_arguments)]
    fn get_active(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        index: u32,
        bucket_id: u32,
        shm_id: u32,
        shm_offset: u32,
        uniform: bool,
    ) -> CmdResult {
        let current = shm_read(engine, shm_id, shm_offset, results::ACTIVE_INFO_BYTES)?;
        if current[..4] != [0; 4] {
            return Err(CbError::InvalidArguments);
        }
        let program = self.group.borrow().program_manager.get_program_info(client_id);
        let Some(program) = program else {
            return self.gl_error(gl::INVALID_VALUE, "GetActive: unknown program");
        };
        let variable = {
            let program = program.borrow();
            let info = program.info.as_ref();
            if uniform {
                info.and_then(|i| i.uniforms().get(index as usize))
                    .map(|u| (u.name.clone(), u.size, u.ty))
            } else {
                info.and_then(|i| i.attribs().get(index as usize))
                    .map(|a| (a.name.clone(), a.size, a.ty))
            }
        };
        let Some((name, size, ty)) = variable else {
            return self.gl_error(gl::INVALID_VALUE, "GetActive: index out of range");
        };
        let mut result = Vec::with_capacity(results::ACTIVE_INFO_BYTES as usize);
        result.extend_from_slice(&1i32.to_le_bytes());
        result.extend_from_slice(&size.to_le_bytes());
        result.extend_from_slice(&ty.to_le_bytes());
        shm_write(engine, shm_id, shm_offset, &result)?;
        self.set_bucket(bucket_id, name.into_bytes());
        Ok(())
    }

    /// Attached shaders as client ids, into a sized result of at most
    /// `result_size` bytes. The count must be zero on entry.
    pub(super) fn do_get_attached_shaders(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        shm_id: u32,
        shm_offset: u32,
        result_size: u32,
    ) -> CmdResult {
        let service_id = self.group.borrow().ids.programs.get_service_id(client_id);
        let Some(service_id) = service_id else {
            return self.gl_error(gl::INVALID_VALUE, "GetAttachedShaders: unknown program");
        };
        let max_count = result_size.saturating_sub(results::SIZED_RESULT_HEADER_BYTES) / 4;
        let current = shm_read(engine, shm_id, shm_offset, results::sized_result_bytes(max_count))?;
        if current[..4] != [0; 4] {
            return Err(CbError::InvalidArguments);
        }
        let mut shaders = self.gl.get_attached_shaders(service_id);
        shaders.truncate(max_count as usize);
        let mut result = Vec::with_capacity(results::sized_result_bytes(shaders.len() as u32) as usize);
        result.extend_from_slice(&(shaders.len() as u32).to_le_bytes());
        {
            let group = self.group.borrow();
            for service_shader in shaders {
                let client_shader = group
                    .ids
                    .shaders
                    .get_client_id(service_shader)
                    .ok_or(CbError::GenericError)?;
                result.extend_from_slice(&client_shader.to_le_bytes());
            }
        }
        shm_write(engine, shm_id, shm_offset, &result)
    }

    /// Fixed ranges matching IEEE single precision and 32-bit integers.
    /// `success` must be zero on entry.
    pub(super) fn do_get_shader_precision_format(
        &mut self,
        engine: &dyn CommandBufferEngine,
        shader_type: GLenum,
        precision_type: GLenum,
        shm_id: u32,
        shm_offset: u32,
    ) -> CmdResult {
        let current = shm_read(engine, shm_id, shm_offset, results::PRECISION_FORMAT_BYTES)?;
        if current[..4] != [0; 4] {
            return Err(CbError::InvalidArguments);
        }
        if !validate::shader_type(shader_type) {
            return self.gl_error(gl::INVALID_ENUM, "GetShaderPrecisionFormat: shadertype");
        }
        let [min_range, max_range, precision]: [i32; 3] = match precision_type {
            gl::LOW_INT | gl::MEDIUM_INT | gl::HIGH_INT => [-31, 31, 0],
            gl::LOW_FLOAT | gl::MEDIUM_FLOAT | gl::HIGH_FLOAT => [-62, 62, -16],
            _ => return self.gl_error(gl::INVALID_ENUM, "GetShaderPrecisionFormat: precisiontype"),
        };
        let result: Vec<u8> = [1, min_range, max_range, precision]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        shm_write(engine, shm_id, shm_offset, &result)
    }

    pub(super) fn do_get_uniformiv(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        location: i32,
        shm_id: u32,
        shm_offset: u32,
    ) -> CmdResult {
        self.get_uniform(engine, client_id, location, shm_id, shm_offset, false)
    }

    pub(super) fn do_get_uniformfv(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        location: i32,
        shm_id: u32,
        shm_offset: u32,
    ) -> CmdResult {
        self.get_uniform(engine, client_id, location, shm_id, shm_offset, true)
    }

    /// Sized result with one element per component of the uniform's type.
    /// The count is cleared before validation, so a failed query reads back
    /// as empty.
    fn get_uniform(
        &mut self,
        engine: &dyn CommandBufferEngine,
        client_id: u32,
        location: i32,
        shm_id: u32,
        shm_offset: u32,
        float: bool,
    ) -> CmdResult {
        shm_write(engine, shm_id, shm_offset, &0u32.to_le_bytes())?;
        let program = self.group.borrow().program_manager.get_program_info(client_id);
        let Some(program) = program else {
            return self.gl_error(gl::INVALID_VALUE, "GetUniform: unknown program");
        };
        let (service_id, ty) = {
            let program = program.borrow();
            let Some(info) = program.info.as_ref() else {
                return self.gl_error(gl::INVALID_OPERATION, "GetUniform: program not linked");
            };
            let Some(ty) = info.get_uniform_type_by_location(location) else {
                return self.gl_error(gl::INVALID_OPERATION, "GetUniform: unknown location");
            };
            (program.service_id, ty)
        };
        let components = uniform_components(ty);
        if components == 0 {
            return self.gl_error(gl::INVALID_OPERATION, "GetUniform: unsupported type");
        }
        shm_read(engine, shm_id, shm_offset, results::sized_result_bytes(components))?;
        let words: Vec<u32> = if float {
            self.gl
                .get_uniformfv(service_id, location)
                .into_iter()
                .map(f32::to_bits)
                .collect()
        } else {
            self.gl
                .get_uniformiv(service_id, location)
                .into_iter()
                .map(|v| v as u32)
                .collect()
        };
        let mut result = Vec::with_capacity(results::sized_result_bytes(components) as usize);
        result.extend_from_slice(&components.to_le_bytes());
        for i in 0..components as usize {
            result.extend_from_slice(&words.get(i).copied().unwrap_or(0).to_le_bytes());
        }
        shm_write(engine, shm_id, shm_offset, &result)
    }

    /// Type of the current program's uniform at `location` and the number of
    /// array elements from it to the end. `Ok(None)` for location `-1`.
    fn uniform_at(&self, location: i32) -> Result<Option<(GLenum, usize)>, &'static str> {
        let Some(program) = self.current_program.as_ref() else {
            return Err("no current program");
        };
        if location == -1 {
            return Ok(None);
        }
        let program = program.borrow();
        let Some((uniform, element)) = program.info.as_ref().and_then(|i| i.uniform_by_location(location)) else {
            return Err("unknown location");
        };
        let remaining = (uniform.size.max(1) as usize).saturating_sub(element);
        Ok(Some((uniform.ty, remaining)))
    }

    pub(super) fn do_uniform1f(&mut self, location: i32, value: f32) -> CmdResult {
        let (ty, _) = match self.uniform_at(location) {
            Ok(Some(found)) => found,
            Ok(None) => return Ok(()),
            Err(reason) => return self.gl_error(gl::INVALID_OPERATION, reason),
        };
        if ty != gl::FLOAT && ty != gl::BOOL {
            return self.gl_error(gl::INVALID_OPERATION, "Uniform1f: type mismatch");
        }
        self.gl.uniform1f(location, value);
        Ok(())
    }

    pub(super) fn do_uniform1iv(&mut self, location: i32, values: &[i32]) -> CmdResult {
        let (ty, remaining) = match self.uniform_at(location) {
            Ok(Some(found)) => found,
            Ok(None) => return Ok(()),
            Err(reason) => return self.gl_error(gl::INVALID_OPERATION, reason),
        };
        if ty != gl::INT && ty != gl::BOOL && !is_sampler_type(ty) {
            return self.gl_error(gl::INVALID_OPERATION, "Uniform1iv: type mismatch");
        }
        let values = &values[..values.len().min(remaining)];
        if is_sampler_type(ty) {
            let units = self.group.borrow().max_texture_units();
            let accepted = self.current_program.as_ref().is_some_and(|program| {
                program
                    .borrow_mut()
                    .info
                    .as_mut()
                    .is_some_and(|info| info.set_samplers(location, values, units))
            });
            if !accepted {
                return self.gl_error(gl::INVALID_VALUE, "Uniform1iv: texture unit out of range");
            }
        }
        if let [value] = values {
            self.gl.uniform1i(location, *value);
        } else {
            self.gl.uniform1iv(location, values);
        }
        Ok(())
    }

    pub(super) fn do_uniform4fv(&mut self, location: i32, values: &[f32]) -> CmdResult {
        let (ty, remaining) = match self.uniform_at(location) {
            Ok(Some(found)) => found,
            Ok(None) => return Ok(()),
            Err(reason) => return self.gl_error(gl::INVALID_OPERATION, reason),
        };
        if ty != gl::FLOAT_VEC4 {
            return self.gl_error(gl::INVALID_OPERATION, "Uniform4fv: type mismatch");
        }
        let count = (values.len() / 4).min(remaining);
        self.gl.uniform4fv(location, &values[..count * 4]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_stop_at_first_nul() {
        assert_eq!(name_from_bytes(b"a_position\0\0\0"), "a_position");
        assert_eq!(name_from_bytes(b"u_tex"), "u_tex");
        assert_eq!(name_from_bytes(b""), "");
    }
}
