//! GLES2 commands with round trips.
//!
//! Every typed encoder from [`CommandEncoder`] is available directly. Queries
//! that return data write a sentinel into a dedicated result transfer buffer,
//! emit the command, [`CommandBufferHelper::finish`] and read the answer back.
//! Strings travel through a scratch bucket.

use std::sync::Arc;

use gpucmd_ipc::SharedRegion;
use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::gl_utils::compute_image_data_size;
use gpucmd_protocol::gles2::CommandId;
use gpucmd_protocol::CommandEncoder;
use tracing::debug;

use crate::command_buffer::CommandBuffer;
use crate::helper::{CommandBufferHelper, HelperError};
use crate::DEFAULT_TRANSFER_BUFFER_BYTES;

/// Bucket used for string results.
const SCRATCH_BUCKET_ID: u32 = 1;

/// Header of the result buffer: room for one `u32` answer.
const RESULT_HEADER_BYTES: u32 = 4;

pub struct Gles2CmdHelper<C: CommandBuffer> {
    helper: CommandBufferHelper<C>,
    result_shm_id: i32,
    result: Arc<SharedRegion>,
    result_bytes: u32,
    pack_alignment: i32,
}

impl<C: CommandBuffer> Gles2CmdHelper<C> {
    /// Wraps an initialized helper and allocates its result buffer.
    pub fn new(helper: CommandBufferHelper<C>) -> Result<Self, HelperError> {
        Self::with_result_bytes(helper, DEFAULT_TRANSFER_BUFFER_BYTES)
    }

    pub fn with_result_bytes(mut helper: CommandBufferHelper<C>, result_bytes: u32) -> Result<Self, HelperError> {
        let command_buffer = helper.command_buffer_mut();
        let result_shm_id = command_buffer.create_transfer_buffer(result_bytes, -1);
        if result_shm_id < 0 {
            return Err(HelperError::InitFailed);
        }
        let result = command_buffer
            .get_transfer_buffer(result_shm_id)
            .ok_or(HelperError::InitFailed)?;
        debug!(result_shm_id, result_bytes, "gles2 helper ready");
        Ok(Self {
            helper,
            result_shm_id,
            result,
            result_bytes,
            pack_alignment: 4,
        })
    }

    pub fn helper(&self) -> &CommandBufferHelper<C> {
        &self.helper
    }

    pub fn helper_mut(&mut self) -> &mut CommandBufferHelper<C> {
        &mut self.helper
    }

    pub fn into_helper(self) -> CommandBufferHelper<C> {
        self.helper
    }

    pub fn result_shm_id(&self) -> i32 {
        self.result_shm_id
    }

    pub fn flush(&mut self) {
        self.helper.flush();
    }

    pub fn finish(&mut self) -> Result<(), HelperError> {
        self.helper.finish()
    }

    fn write_result(&self, offset: u32, value: u32) -> Result<(), HelperError> {
        self.result
            .write_u32(offset as usize, value)
            .map_err(|_| HelperError::TransferBuffer)
    }

    fn read_result(&self, offset: u32) -> Result<u32, HelperError> {
        self.result.read_u32(offset as usize).map_err(|_| HelperError::TransferBuffer)
    }

    /// Sends everything emitted so far and waits for it to execute. Fails
    /// with the first emit error, if any.
    fn round_trip(&mut self) -> Result<(), HelperError> {
        if let Some(err) = self.helper.take_error() {
            return Err(err);
        }
        self.helper.finish()
    }

    /// Oldest pending GL error, or `NO_ERROR`.
    pub fn get_error(&mut self) -> Result<GLenum, HelperError> {
        self.write_result(0, gl::NO_ERROR)?;
        let shm_id = self.result_shm_id;
        self.helper.get_error(shm_id, 0);
        self.round_trip()?;
        self.read_result(0)
    }

    /// `-1` when the program is unknown, unlinked or has no such uniform.
    pub fn get_uniform_location(&mut self, program: u32, name: &str) -> Result<i32, HelperError> {
        self.write_result(0, -1i32 as u32)?;
        let shm_id = self.result_shm_id;
        self.helper.get_uniform_location_immediate(program, shm_id, 0, name);
        self.round_trip()?;
        Ok(self.read_result(0)? as i32)
    }

    pub fn get_attrib_location(&mut self, program: u32, name: &str) -> Result<i32, HelperError> {
        self.write_result(0, -1i32 as u32)?;
        let shm_id = self.result_shm_id;
        self.helper.get_attrib_location_immediate(program, shm_id, 0, name);
        self.round_trip()?;
        Ok(self.read_result(0)? as i32)
    }

    pub fn get_programiv(&mut self, program: u32, pname: GLenum) -> Result<i32, HelperError> {
        self.write_result(0, 0)?;
        let shm_id = self.result_shm_id;
        self.helper.get_programiv(program, pname, shm_id, 0);
        self.round_trip()?;
        Ok(self.read_result(0)? as i32)
    }

    pub fn get_shaderiv(&mut self, shader: u32, pname: GLenum) -> Result<i32, HelperError> {
        self.write_result(0, 0)?;
        let shm_id = self.result_shm_id;
        self.helper.get_shaderiv(shader, pname, shm_id, 0);
        self.round_trip()?;
        Ok(self.read_result(0)? as i32)
    }

    /// Element count followed by that many words, at the start of the result
    /// buffer.
    fn read_sized_result(&self) -> Result<Vec<u32>, HelperError> {
        let count = self.read_result(0)?;
        (0..count).map(|i| self.read_result(RESULT_HEADER_BYTES + i * 4)).collect()
    }

    /// Components of a uniform of a linked program. Empty when the query was
    /// rejected (the GL error says why).
    pub fn get_uniformfv(&mut self, program: u32, location: i32) -> Result<Vec<f32>, HelperError> {
        self.write_result(0, 0)?;
        let shm_id = self.result_shm_id;
        self.helper.get_uniformfv(program, location, shm_id, 0);
        self.round_trip()?;
        Ok(self.read_sized_result()?.into_iter().map(f32::from_bits).collect())
    }

    pub fn get_uniformiv(&mut self, program: u32, location: i32) -> Result<Vec<i32>, HelperError> {
        self.write_result(0, 0)?;
        let shm_id = self.result_shm_id;
        self.helper.get_uniformiv(program, location, shm_id, 0);
        self.round_trip()?;
        Ok(self.read_sized_result()?.into_iter().map(|v| v as i32).collect())
    }

    /// Client ids of the shaders attached to `program`.
    pub fn get_attached_shaders(&mut self, program: u32) -> Result<Vec<u32>, HelperError> {
        self.write_result(0, 0)?;
        let (shm_id, result_bytes) = (self.result_shm_id, self.result_bytes);
        self.helper.get_attached_shaders(program, shm_id, 0, result_bytes);
        self.round_trip()?;
        self.read_sized_result()
    }

    /// `([min, max] range, precision)`, or `None` for rejected enums.
    pub fn get_shader_precision_format(
        &mut self,
        shader_type: GLenum,
        precision_type: GLenum,
    ) -> Result<Option<([i32; 2], i32)>, HelperError> {
        self.write_result(0, 0)?;
        let shm_id = self.result_shm_id;
        self.helper
            .get_shader_precision_format(shader_type, precision_type, shm_id, 0);
        self.round_trip()?;
        if self.read_result(0)? == 0 {
            return Ok(None);
        }
        let [min, max, precision] = [4, 8, 12].map(|offset| self.read_result(offset).map(|v| v as i32));
        Ok(Some(([min?, max?], precision?)))
    }

    pub fn get_string(&mut self, name: GLenum) -> Result<String, HelperError> {
        self.helper.get_string(name, SCRATCH_BUCKET_ID);
        let bytes = self.read_bucket(SCRATCH_BUCKET_ID)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn get_shader_source(&mut self, shader: u32) -> Result<String, HelperError> {
        self.helper.get_shader_source(shader, SCRATCH_BUCKET_ID);
        let bytes = self.read_bucket(SCRATCH_BUCKET_ID)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Uploads `source` through a bucket, which works for sources larger
    /// than a single command.
    pub fn shader_source(&mut self, shader: u32, source: &str) -> Result<(), HelperError> {
        self.write_bucket(SCRATCH_BUCKET_ID, source.as_bytes())?;
        self.helper.shader_source_bucket(shader, SCRATCH_BUCKET_ID);
        self.helper.set_bucket_size(SCRATCH_BUCKET_ID, 0);
        Ok(())
    }

    /// Copies a bucket back in chunks of the result buffer, then frees it.
    pub fn read_bucket(&mut self, bucket_id: u32) -> Result<Vec<u8>, HelperError> {
        let shm_id = self.result_shm_id;
        self.write_result(0, 0)?;
        self.helper.get_bucket_size(bucket_id, shm_id, 0);
        self.round_trip()?;
        let size = self.read_result(0)?;

        let chunk = self.result_bytes - RESULT_HEADER_BYTES;
        let mut data = Vec::with_capacity(size as usize);
        let mut offset = 0;
        while offset < size {
            let len = chunk.min(size - offset);
            self.helper
                .get_bucket_data(bucket_id, offset, len, shm_id, RESULT_HEADER_BYTES);
            self.round_trip()?;
            let bytes = self
                .result
                .read(RESULT_HEADER_BYTES as usize, len as usize)
                .map_err(|_| HelperError::TransferBuffer)?;
            data.extend_from_slice(&bytes);
            offset += len;
        }
        self.helper.set_bucket_size(bucket_id, 0);
        Ok(data)
    }

    /// Fills a bucket through the result buffer.
    pub fn write_bucket(&mut self, bucket_id: u32, data: &[u8]) -> Result<(), HelperError> {
        let shm_id = self.result_shm_id;
        self.helper.set_bucket_size(bucket_id, data.len() as u32);
        let chunk = (self.result_bytes - RESULT_HEADER_BYTES) as usize;
        for (i, part) in data.chunks(chunk).enumerate() {
            // The result buffer is reused, so each chunk must land first.
            self.round_trip()?;
            self.result
                .write(RESULT_HEADER_BYTES as usize, part)
                .map_err(|_| HelperError::TransferBuffer)?;
            let offset = (i * chunk) as u32;
            self.helper
                .set_bucket_data(bucket_id, offset, part.len() as u32, shm_id, RESULT_HEADER_BYTES);
        }
        Ok(())
    }

    /// Reads a `width` x `height` block. `None` when the service rejected
    /// the request (the GL error says why).
    #[allow(clippy::too_many_arguments)]
    pub fn read_pixels(
        &mut self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: GLenum,
        pixel_type: GLenum,
    ) -> Result<Option<Vec<u8>>, HelperError> {
        let Some(size) = compute_image_data_size(width, height, format, pixel_type, self.pack_alignment as u32)
        else {
            return Ok(None);
        };
        if size > self.result_bytes - RESULT_HEADER_BYTES {
            return Err(HelperError::CommandTooLarge {
                entries: size.div_ceil(4) as i32,
                capacity: ((self.result_bytes - RESULT_HEADER_BYTES) / 4) as i32,
            });
        }
        self.write_result(0, 0)?;
        let shm_id = self.result_shm_id;
        self.helper.read_pixels(
            x,
            y,
            width,
            height,
            format,
            pixel_type,
            shm_id,
            RESULT_HEADER_BYTES,
            shm_id,
            0,
        );
        self.round_trip()?;
        if self.read_result(0)? == 0 {
            return Ok(None);
        }
        let pixels = self
            .result
            .read(RESULT_HEADER_BYTES as usize, size as usize)
            .map_err(|_| HelperError::TransferBuffer)?;
        Ok(Some(pixels))
    }
}

impl<C: CommandBuffer> CommandEncoder for Gles2CmdHelper<C> {
    fn emit(&mut self, command: u32, args: &[u32], payload: &[u8]) {
        self.helper.emit(command, args, payload);
    }

    fn pixel_storei(&mut self, pname: GLenum, param: i32) {
        if pname == gl::PACK_ALIGNMENT && matches!(param, 1 | 2 | 4 | 8) {
            self.pack_alignment = param;
        }
        self.emit_gles2(CommandId::PixelStorei, &[pname, param as u32], &[]);
    }
}
