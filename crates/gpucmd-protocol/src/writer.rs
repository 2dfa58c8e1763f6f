//! Safe command stream builder.
//!
//! [`CommandEncoder`] carries one typed method per command on top of a single
//! required `emit` hook, so the same encoders serve the in-memory
//! [`CommandWriter`] (tests, fixtures, trace files) and the client's ring
//! buffer helper.

use crate::common::CommonCommand;
use crate::gl::GLenum;
use crate::gles2::CommandId;
use crate::header::CommandHeader;
use crate::ENTRY_SIZE;

/// Number of entries needed to hold `bytes` bytes.
pub const fn entries_for_bytes(bytes: usize) -> usize {
    bytes.div_ceil(ENTRY_SIZE)
}

/// Appends `payload` to `out` as little-endian entries, zero-padding the last
/// one.
pub fn push_payload(out: &mut Vec<u32>, payload: &[u8]) {
    let mut chunks = payload.chunks_exact(ENTRY_SIZE);
    for chunk in &mut chunks {
        out.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut last = [0u8; ENTRY_SIZE];
        last[..rem.len()].copy_from_slice(rem);
        out.push(u32::from_le_bytes(last));
    }
}

/// Encodes a whole command (header, fixed args, padded payload).
pub fn encode_command(command: u32, args: &[u32], payload: &[u8]) -> Vec<u32> {
    let size = 1 + args.len() + entries_for_bytes(payload.len());
    let mut out = Vec::with_capacity(size);
    out.push(CommandHeader::new(command, size as u32).to_word());
    out.extend_from_slice(args);
    push_payload(&mut out, payload);
    out
}

/// Typed command encoders.
///
/// Implementors only provide [`CommandEncoder::emit`]; every other method is
/// a thin wrapper that lays out arguments in wire order.
pub trait CommandEncoder {
    /// Appends one command. `args` are the fixed arguments; `payload` is the
    /// immediate data, padded to whole entries by the implementor.
    fn emit(&mut self, command: u32, args: &[u32], payload: &[u8]);

    fn emit_gles2(&mut self, id: CommandId, args: &[u32], payload: &[u8]) {
        self.emit(id.id(), args, payload);
    }

    // Common commands.

    fn noop(&mut self, skip_entries: u32) {
        let padding = vec![0u8; skip_entries as usize * ENTRY_SIZE];
        self.emit(CommonCommand::Noop as u32, &[], &padding);
    }

    fn set_token(&mut self, token: i32) {
        self.emit(CommonCommand::SetToken as u32, &[token as u32], &[]);
    }

    fn set_bucket_size(&mut self, bucket_id: u32, size: u32) {
        self.emit(CommonCommand::SetBucketSize as u32, &[bucket_id, size], &[]);
    }

    fn set_bucket_data(&mut self, bucket_id: u32, offset: u32, size: u32, shm_id: i32, shm_offset: u32) {
        self.emit(
            CommonCommand::SetBucketData as u32,
            &[bucket_id, offset, size, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn set_bucket_data_immediate(&mut self, bucket_id: u32, offset: u32, data: &[u8]) {
        self.emit(
            CommonCommand::SetBucketDataImmediate as u32,
            &[bucket_id, offset, data.len() as u32],
            data,
        );
    }

    fn get_bucket_size(&mut self, bucket_id: u32, shm_id: i32, shm_offset: u32) {
        self.emit(
            CommonCommand::GetBucketSize as u32,
            &[bucket_id, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn get_bucket_data(&mut self, bucket_id: u32, offset: u32, size: u32, shm_id: i32, shm_offset: u32) {
        self.emit(
            CommonCommand::GetBucketData as u32,
            &[bucket_id, offset, size, shm_id as u32, shm_offset],
            &[],
        );
    }

    // GLES2 commands.

    fn active_texture(&mut self, texture: GLenum) {
        self.emit_gles2(CommandId::ActiveTexture, &[texture], &[]);
    }

    fn attach_shader(&mut self, program: u32, shader: u32) {
        self.emit_gles2(CommandId::AttachShader, &[program, shader], &[]);
    }

    fn bind_buffer(&mut self, target: GLenum, buffer: u32) {
        self.emit_gles2(CommandId::BindBuffer, &[target, buffer], &[]);
    }

    fn bind_framebuffer(&mut self, target: GLenum, framebuffer: u32) {
        self.emit_gles2(CommandId::BindFramebuffer, &[target, framebuffer], &[]);
    }

    fn bind_renderbuffer(&mut self, target: GLenum, renderbuffer: u32) {
        self.emit_gles2(CommandId::BindRenderbuffer, &[target, renderbuffer], &[]);
    }

    fn bind_texture(&mut self, target: GLenum, texture: u32) {
        self.emit_gles2(CommandId::BindTexture, &[target, texture], &[]);
    }

    fn buffer_data(&mut self, target: GLenum, size: u32, shm_id: i32, shm_offset: u32, usage: GLenum) {
        self.emit_gles2(
            CommandId::BufferData,
            &[target, size, shm_id as u32, shm_offset, usage],
            &[],
        );
    }

    fn buffer_data_immediate(&mut self, target: GLenum, data: &[u8], usage: GLenum) {
        self.emit_gles2(
            CommandId::BufferDataImmediate,
            &[target, data.len() as u32, usage],
            data,
        );
    }

    fn buffer_sub_data(&mut self, target: GLenum, offset: u32, size: u32, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::BufferSubData,
            &[target, offset, size, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn clear(&mut self, mask: u32) {
        self.emit_gles2(CommandId::Clear, &[mask], &[]);
    }

    fn clear_color(&mut self, red: f32, green: f32, blue: f32, alpha: f32) {
        self.emit_gles2(
            CommandId::ClearColor,
            &[red.to_bits(), green.to_bits(), blue.to_bits(), alpha.to_bits()],
            &[],
        );
    }

    fn compile_shader(&mut self, shader: u32) {
        self.emit_gles2(CommandId::CompileShader, &[shader], &[]);
    }

    #[allow(clippy::too_many_arguments)]
    fn compressed_tex_image_2d(
        &mut self,
        target: GLenum,
        level: i32,
        internal_format: GLenum,
        width: i32,
        height: i32,
        border: i32,
        image_size: u32,
        shm_id: i32,
        shm_offset: u32,
    ) {
        self.emit_gles2(
            CommandId::CompressedTexImage2D,
            &[
                target,
                level as u32,
                internal_format,
                width as u32,
                height as u32,
                border as u32,
                image_size,
                shm_id as u32,
                shm_offset,
            ],
            &[],
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn compressed_tex_image_2d_immediate(
        &mut self,
        target: GLenum,
        level: i32,
        internal_format: GLenum,
        width: i32,
        height: i32,
        border: i32,
        data: &[u8],
    ) {
        self.emit_gles2(
            CommandId::CompressedTexImage2DImmediate,
            &[
                target,
                level as u32,
                internal_format,
                width as u32,
                height as u32,
                border as u32,
                data.len() as u32,
            ],
            data,
        );
    }

    fn create_program(&mut self, client_id: u32) {
        self.emit_gles2(CommandId::CreateProgram, &[client_id], &[]);
    }

    fn create_shader(&mut self, shader_type: GLenum, client_id: u32) {
        self.emit_gles2(CommandId::CreateShader, &[shader_type, client_id], &[]);
    }

    fn delete_buffers(&mut self, ids: &[u32]) {
        self.emit_gles2(
            CommandId::DeleteBuffersImmediate,
            &[ids.len() as u32],
            bytemuck::cast_slice(ids),
        );
    }

    fn delete_framebuffers(&mut self, ids: &[u32]) {
        self.emit_gles2(
            CommandId::DeleteFramebuffersImmediate,
            &[ids.len() as u32],
            bytemuck::cast_slice(ids),
        );
    }

    fn delete_program(&mut self, program: u32) {
        self.emit_gles2(CommandId::DeleteProgram, &[program], &[]);
    }

    fn delete_renderbuffers(&mut self, ids: &[u32]) {
        self.emit_gles2(
            CommandId::DeleteRenderbuffersImmediate,
            &[ids.len() as u32],
            bytemuck::cast_slice(ids),
        );
    }

    fn delete_shader(&mut self, shader: u32) {
        self.emit_gles2(CommandId::DeleteShader, &[shader], &[]);
    }

    fn delete_textures(&mut self, ids: &[u32]) {
        self.emit_gles2(
            CommandId::DeleteTexturesImmediate,
            &[ids.len() as u32],
            bytemuck::cast_slice(ids),
        );
    }

    fn detach_shader(&mut self, program: u32, shader: u32) {
        self.emit_gles2(CommandId::DetachShader, &[program, shader], &[]);
    }

    fn disable_vertex_attrib_array(&mut self, index: u32) {
        self.emit_gles2(CommandId::DisableVertexAttribArray, &[index], &[]);
    }

    fn draw_arrays(&mut self, mode: GLenum, first: i32, count: i32) {
        self.emit_gles2(CommandId::DrawArrays, &[mode, first as u32, count as u32], &[]);
    }

    fn draw_elements(&mut self, mode: GLenum, count: i32, index_type: GLenum, index_offset: u32) {
        self.emit_gles2(
            CommandId::DrawElements,
            &[mode, count as u32, index_type, index_offset],
            &[],
        );
    }

    fn enable_vertex_attrib_array(&mut self, index: u32) {
        self.emit_gles2(CommandId::EnableVertexAttribArray, &[index], &[]);
    }

    fn finish_gl(&mut self) {
        self.emit_gles2(CommandId::Finish, &[], &[]);
    }

    fn flush_gl(&mut self) {
        self.emit_gles2(CommandId::Flush, &[], &[]);
    }

    fn gen_buffers(&mut self, ids: &[u32]) {
        self.emit_gles2(
            CommandId::GenBuffersImmediate,
            &[ids.len() as u32],
            bytemuck::cast_slice(ids),
        );
    }

    fn gen_framebuffers(&mut self, ids: &[u32]) {
        self.emit_gles2(
            CommandId::GenFramebuffersImmediate,
            &[ids.len() as u32],
            bytemuck::cast_slice(ids),
        );
    }

    fn gen_renderbuffers(&mut self, ids: &[u32]) {
        self.emit_gles2(
            CommandId::GenRenderbuffersImmediate,
            &[ids.len() as u32],
            bytemuck::cast_slice(ids),
        );
    }

    fn gen_textures(&mut self, ids: &[u32]) {
        self.emit_gles2(
            CommandId::GenTexturesImmediate,
            &[ids.len() as u32],
            bytemuck::cast_slice(ids),
        );
    }

    fn generate_mipmap(&mut self, target: GLenum) {
        self.emit_gles2(CommandId::GenerateMipmap, &[target], &[]);
    }

    fn get_active_attrib(&mut self, program: u32, index: u32, name_bucket_id: u32, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::GetActiveAttrib,
            &[program, index, name_bucket_id, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn get_active_uniform(&mut self, program: u32, index: u32, name_bucket_id: u32, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::GetActiveUniform,
            &[program, index, name_bucket_id, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn get_attached_shaders(&mut self, program: u32, shm_id: i32, shm_offset: u32, result_size: u32) {
        self.emit_gles2(
            CommandId::GetAttachedShaders,
            &[program, shm_id as u32, shm_offset, result_size],
            &[],
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn get_attrib_location(
        &mut self,
        program: u32,
        name_shm_id: i32,
        name_shm_offset: u32,
        location_shm_id: i32,
        location_shm_offset: u32,
        data_size: u32,
    ) {
        self.emit_gles2(
            CommandId::GetAttribLocation,
            &[
                program,
                name_shm_id as u32,
                name_shm_offset,
                location_shm_id as u32,
                location_shm_offset,
                data_size,
            ],
            &[],
        );
    }

    fn get_attrib_location_immediate(&mut self, program: u32, location_shm_id: i32, location_shm_offset: u32, name: &str) {
        self.emit_gles2(
            CommandId::GetAttribLocationImmediate,
            &[program, location_shm_id as u32, location_shm_offset, name.len() as u32],
            name.as_bytes(),
        );
    }

    fn get_error(&mut self, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(CommandId::GetError, &[shm_id as u32, shm_offset], &[]);
    }

    fn get_programiv(&mut self, program: u32, pname: GLenum, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::GetProgramiv,
            &[program, pname, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn get_shaderiv(&mut self, shader: u32, pname: GLenum, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::GetShaderiv,
            &[shader, pname, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn get_shader_precision_format(&mut self, shader_type: GLenum, precision_type: GLenum, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::GetShaderPrecisionFormat,
            &[shader_type, precision_type, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn get_shader_source(&mut self, shader: u32, bucket_id: u32) {
        self.emit_gles2(CommandId::GetShaderSource, &[shader, bucket_id], &[]);
    }

    fn get_string(&mut self, name: GLenum, bucket_id: u32) {
        self.emit_gles2(CommandId::GetString, &[name, bucket_id], &[]);
    }

    fn get_uniformfv(&mut self, program: u32, location: i32, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::GetUniformfv,
            &[program, location as u32, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn get_uniformiv(&mut self, program: u32, location: i32, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::GetUniformiv,
            &[program, location as u32, shm_id as u32, shm_offset],
            &[],
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn get_uniform_location(
        &mut self,
        program: u32,
        name_shm_id: i32,
        name_shm_offset: u32,
        location_shm_id: i32,
        location_shm_offset: u32,
        data_size: u32,
    ) {
        self.emit_gles2(
            CommandId::GetUniformLocation,
            &[
                program,
                name_shm_id as u32,
                name_shm_offset,
                location_shm_id as u32,
                location_shm_offset,
                data_size,
            ],
            &[],
        );
    }

    fn get_uniform_location_immediate(&mut self, program: u32, location_shm_id: i32, location_shm_offset: u32, name: &str) {
        self.emit_gles2(
            CommandId::GetUniformLocationImmediate,
            &[program, location_shm_id as u32, location_shm_offset, name.len() as u32],
            name.as_bytes(),
        );
    }

    fn get_vertex_attrib_pointerv(&mut self, index: u32, pname: GLenum, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::GetVertexAttribPointerv,
            &[index, pname, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn link_program(&mut self, program: u32) {
        self.emit_gles2(CommandId::LinkProgram, &[program], &[]);
    }

    fn pixel_storei(&mut self, pname: GLenum, param: i32) {
        self.emit_gles2(CommandId::PixelStorei, &[pname, param as u32], &[]);
    }

    #[allow(clippy::too_many_arguments)]
    fn read_pixels(
        &mut self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: GLenum,
        pixel_type: GLenum,
        pixels_shm_id: i32,
        pixels_shm_offset: u32,
        result_shm_id: i32,
        result_shm_offset: u32,
    ) {
        self.emit_gles2(
            CommandId::ReadPixels,
            &[
                x as u32,
                y as u32,
                width as u32,
                height as u32,
                format,
                pixel_type,
                pixels_shm_id as u32,
                pixels_shm_offset,
                result_shm_id as u32,
                result_shm_offset,
            ],
            &[],
        );
    }

    fn shader_source(&mut self, shader: u32, shm_id: i32, shm_offset: u32, size: u32) {
        self.emit_gles2(
            CommandId::ShaderSource,
            &[shader, shm_id as u32, shm_offset, size],
            &[],
        );
    }

    fn shader_source_immediate(&mut self, shader: u32, source: &str) {
        self.emit_gles2(
            CommandId::ShaderSourceImmediate,
            &[shader, source.len() as u32],
            source.as_bytes(),
        );
    }

    fn shader_source_bucket(&mut self, shader: u32, bucket_id: u32) {
        self.emit_gles2(CommandId::ShaderSourceBucket, &[shader, bucket_id], &[]);
    }

    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d(
        &mut self,
        target: GLenum,
        level: i32,
        internal_format: GLenum,
        width: i32,
        height: i32,
        border: i32,
        format: GLenum,
        pixel_type: GLenum,
        shm_id: i32,
        shm_offset: u32,
    ) {
        self.emit_gles2(
            CommandId::TexImage2D,
            &[
                target,
                level as u32,
                internal_format,
                width as u32,
                height as u32,
                border as u32,
                format,
                pixel_type,
                shm_id as u32,
                shm_offset,
            ],
            &[],
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d_immediate(
        &mut self,
        target: GLenum,
        level: i32,
        internal_format: GLenum,
        width: i32,
        height: i32,
        border: i32,
        format: GLenum,
        pixel_type: GLenum,
        pixels: &[u8],
    ) {
        self.emit_gles2(
            CommandId::TexImage2DImmediate,
            &[
                target,
                level as u32,
                internal_format,
                width as u32,
                height as u32,
                border as u32,
                format,
                pixel_type,
            ],
            pixels,
        );
    }

    fn tex_parameterf(&mut self, target: GLenum, pname: GLenum, param: f32) {
        self.emit_gles2(CommandId::TexParameterf, &[target, pname, param.to_bits()], &[]);
    }

    fn tex_parameterfv(&mut self, target: GLenum, pname: GLenum, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::TexParameterfv,
            &[target, pname, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn tex_parameterfv_immediate(&mut self, target: GLenum, pname: GLenum, param: f32) {
        self.emit_gles2(
            CommandId::TexParameterfvImmediate,
            &[target, pname],
            &param.to_bits().to_le_bytes(),
        );
    }

    fn tex_parameteri(&mut self, target: GLenum, pname: GLenum, param: i32) {
        self.emit_gles2(CommandId::TexParameteri, &[target, pname, param as u32], &[]);
    }

    fn tex_parameteriv(&mut self, target: GLenum, pname: GLenum, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::TexParameteriv,
            &[target, pname, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn tex_parameteriv_immediate(&mut self, target: GLenum, pname: GLenum, param: i32) {
        self.emit_gles2(CommandId::TexParameterivImmediate, &[target, pname], &param.to_le_bytes());
    }

    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image_2d(
        &mut self,
        target: GLenum,
        level: i32,
        xoffset: i32,
        yoffset: i32,
        width: i32,
        height: i32,
        format: GLenum,
        pixel_type: GLenum,
        shm_id: i32,
        shm_offset: u32,
    ) {
        self.emit_gles2(
            CommandId::TexSubImage2D,
            &[
                target,
                level as u32,
                xoffset as u32,
                yoffset as u32,
                width as u32,
                height as u32,
                format,
                pixel_type,
                shm_id as u32,
                shm_offset,
            ],
            &[],
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image_2d_immediate(
        &mut self,
        target: GLenum,
        level: i32,
        xoffset: i32,
        yoffset: i32,
        width: i32,
        height: i32,
        format: GLenum,
        pixel_type: GLenum,
        pixels: &[u8],
    ) {
        self.emit_gles2(
            CommandId::TexSubImage2DImmediate,
            &[
                target,
                level as u32,
                xoffset as u32,
                yoffset as u32,
                width as u32,
                height as u32,
                format,
                pixel_type,
            ],
            pixels,
        );
    }

    fn uniform1f(&mut self, location: i32, x: f32) {
        self.emit_gles2(CommandId::Uniform1f, &[location as u32, x.to_bits()], &[]);
    }

    fn uniform1i(&mut self, location: i32, x: i32) {
        self.emit_gles2(CommandId::Uniform1i, &[location as u32, x as u32], &[]);
    }

    fn uniform1iv_shm(&mut self, location: i32, count: u32, shm_id: i32, shm_offset: u32) {
        self.emit_gles2(
            CommandId::Uniform1iv,
            &[location as u32, count, shm_id as u32, shm_offset],
            &[],
        );
    }

    fn uniform1iv(&mut self, location: i32, values: &[i32]) {
        self.emit_gles2(
            CommandId::Uniform1ivImmediate,
            &[location as u32, values.len() as u32],
            bytemuck::cast_slice(values),
        );
    }

    /// `values` holds `4 * count` floats.
    fn uniform4fv(&mut self, location: i32, values: &[f32]) {
        self.emit_gles2(
            CommandId::Uniform4fvImmediate,
            &[location as u32, (values.len() / 4) as u32],
            bytemuck::cast_slice(values),
        );
    }

    fn use_program(&mut self, program: u32) {
        self.emit_gles2(CommandId::UseProgram, &[program], &[]);
    }

    #[allow(clippy::too_many_arguments)]
    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        attrib_type: GLenum,
        normalized: bool,
        stride: i32,
        offset: u32,
    ) {
        self.emit_gles2(
            CommandId::VertexAttribPointer,
            &[index, size as u32, attrib_type, normalized as u32, stride as u32, offset],
            &[],
        );
    }

    fn viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.emit_gles2(
            CommandId::Viewport,
            &[x as u32, y as u32, width as u32, height as u32],
            &[],
        );
    }

    fn swap_buffers(&mut self) {
        self.emit_gles2(CommandId::SwapBuffers, &[], &[]);
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.emit_gles2(CommandId::ResizeCHROMIUM, &[width, height], &[]);
    }

    fn set_latch(&mut self, latch_id: u32) {
        self.emit_gles2(CommandId::SetLatchCHROMIUM, &[latch_id], &[]);
    }

    fn wait_latch(&mut self, latch_id: u32) {
        self.emit_gles2(CommandId::WaitLatchCHROMIUM, &[latch_id], &[]);
    }
}

/// In-memory command stream.
#[derive(Debug, Default, Clone)]
pub struct CommandWriter {
    entries: Vec<u32>,
}

impl CommandWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    pub fn finish(self) -> Vec<u32> {
        self.entries
    }

    /// Little-endian byte image, as stored in a ring or a trace file.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.entries.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// Appends a raw word. Lets tests build malformed streams.
    pub fn push_raw(&mut self, word: u32) {
        self.entries.push(word);
    }
}

impl CommandEncoder for CommandWriter {
    fn emit(&mut self, command: u32, args: &[u32], payload: &[u8]) {
        let size = 1 + args.len() + entries_for_bytes(payload.len());
        self.entries
            .push(CommandHeader::new(command, size as u32).to_word());
        self.entries.extend_from_slice(args);
        push_payload(&mut self.entries, payload);
    }
}
