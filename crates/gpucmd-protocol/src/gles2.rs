//! GLES2 command set.
//!
//! Argument layouts (one entry per argument, in order) are listed next to
//! each command. Handles are client ids; `*_shm_id`/`*_shm_offset` pairs name
//! a byte range in a transfer buffer; floats travel as their IEEE bit pattern.

use crate::common::LAST_COMMON_COMMAND;
use crate::header::{ArgFlags, CommandInfo};

/// Id of the first GLES2 command.
pub const FIRST_COMMAND: u32 = LAST_COMMON_COMMAND + 1;

macro_rules! gles2_commands {
    ($($name:ident = $flags:ident($count:expr);)*) => {
        /// GLES2 opcode. The wire id is [`CommandId::id`], not the
        /// discriminant.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum CommandId {
            $($name,)*
        }

        impl CommandId {
            pub const ALL: &'static [CommandId] = &[$(Self::$name,)*];

            pub const fn id(self) -> u32 {
                FIRST_COMMAND + self as u32
            }

            pub fn from_u32(v: u32) -> Option<Self> {
                let index = v.checked_sub(FIRST_COMMAND)?;
                Self::ALL.get(index as usize).copied()
            }

            pub const fn info(self) -> CommandInfo {
                match self {
                    $(Self::$name => CommandInfo {
                        arg_flags: ArgFlags::$flags,
                        arg_count: $count,
                    },)*
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name),)*
                }
            }
        }
    };
}

gles2_commands! {
    // texture
    ActiveTexture = Fixed(1);
    // program, shader
    AttachShader = Fixed(2);
    // target, buffer
    BindBuffer = Fixed(2);
    // target, framebuffer
    BindFramebuffer = Fixed(2);
    // target, renderbuffer
    BindRenderbuffer = Fixed(2);
    // target, texture
    BindTexture = Fixed(2);
    // target, size, data_shm_id, data_shm_offset, usage
    BufferData = Fixed(5);
    // target, size, usage + data
    BufferDataImmediate = AtLeastN(3);
    // target, offset, size, data_shm_id, data_shm_offset
    BufferSubData = Fixed(5);
    // mask
    Clear = Fixed(1);
    // red, green, blue, alpha
    ClearColor = Fixed(4);
    // shader
    CompileShader = Fixed(1);
    // target, level, internalformat, width, height, border, image_size, data_shm_id, data_shm_offset
    CompressedTexImage2D = Fixed(9);
    // target, level, internalformat, width, height, border, image_size + data
    CompressedTexImage2DImmediate = AtLeastN(7);
    // client_id
    CreateProgram = Fixed(1);
    // type, client_id
    CreateShader = Fixed(2);
    // n + ids
    DeleteBuffersImmediate = AtLeastN(1);
    // n + ids
    DeleteFramebuffersImmediate = AtLeastN(1);
    // program
    DeleteProgram = Fixed(1);
    // n + ids
    DeleteRenderbuffersImmediate = AtLeastN(1);
    // shader
    DeleteShader = Fixed(1);
    // n + ids
    DeleteTexturesImmediate = AtLeastN(1);
    // program, shader
    DetachShader = Fixed(2);
    // index
    DisableVertexAttribArray = Fixed(1);
    // mode, first, count
    DrawArrays = Fixed(3);
    // mode, count, type, index_offset
    DrawElements = Fixed(4);
    // index
    EnableVertexAttribArray = Fixed(1);
    Finish = Fixed(0);
    Flush = Fixed(0);
    // n + ids
    GenBuffersImmediate = AtLeastN(1);
    // n + ids
    GenFramebuffersImmediate = AtLeastN(1);
    // n + ids
    GenRenderbuffersImmediate = AtLeastN(1);
    // n + ids
    GenTexturesImmediate = AtLeastN(1);
    // target
    GenerateMipmap = Fixed(1);
    // program, index, name_bucket_id, result_shm_id, result_shm_offset
    GetActiveAttrib = Fixed(5);
    // program, index, name_bucket_id, result_shm_id, result_shm_offset
    GetActiveUniform = Fixed(5);
    // program, result_shm_id, result_shm_offset, result_size
    GetAttachedShaders = Fixed(4);
    // program, name_shm_id, name_shm_offset, location_shm_id, location_shm_offset, data_size
    GetAttribLocation = Fixed(6);
    // program, location_shm_id, location_shm_offset, data_size + name
    GetAttribLocationImmediate = AtLeastN(4);
    // result_shm_id, result_shm_offset
    GetError = Fixed(2);
    // program, pname, params_shm_id, params_shm_offset
    GetProgramiv = Fixed(4);
    // shader, pname, params_shm_id, params_shm_offset
    GetShaderiv = Fixed(4);
    // shadertype, precisiontype, result_shm_id, result_shm_offset
    GetShaderPrecisionFormat = Fixed(4);
    // shader, bucket_id
    GetShaderSource = Fixed(2);
    // name, bucket_id
    GetString = Fixed(2);
    // program, location, params_shm_id, params_shm_offset
    GetUniformfv = Fixed(4);
    // program, location, params_shm_id, params_shm_offset
    GetUniformiv = Fixed(4);
    // program, name_shm_id, name_shm_offset, location_shm_id, location_shm_offset, data_size
    GetUniformLocation = Fixed(6);
    // program, location_shm_id, location_shm_offset, data_size + name
    GetUniformLocationImmediate = AtLeastN(4);
    // index, pname, pointer_shm_id, pointer_shm_offset
    GetVertexAttribPointerv = Fixed(4);
    // program
    LinkProgram = Fixed(1);
    // pname, param
    PixelStorei = Fixed(2);
    // x, y, width, height, format, type, pixels_shm_id, pixels_shm_offset, result_shm_id, result_shm_offset
    ReadPixels = Fixed(10);
    // shader, data_shm_id, data_shm_offset, data_size
    ShaderSource = Fixed(4);
    // shader, data_size + source
    ShaderSourceImmediate = AtLeastN(2);
    // shader, data_bucket_id
    ShaderSourceBucket = Fixed(2);
    // target, level, internalformat, width, height, border, format, type, pixels_shm_id, pixels_shm_offset
    TexImage2D = Fixed(10);
    // target, level, internalformat, width, height, border, format, type + pixels
    TexImage2DImmediate = AtLeastN(8);
    // target, pname, param (f32 bits)
    TexParameterf = Fixed(3);
    // target, pname, params_shm_id, params_shm_offset
    TexParameterfv = Fixed(4);
    // target, pname + 1 value (f32 bits)
    TexParameterfvImmediate = AtLeastN(2);
    // target, pname, param
    TexParameteri = Fixed(3);
    // target, pname, params_shm_id, params_shm_offset
    TexParameteriv = Fixed(4);
    // target, pname + 1 value
    TexParameterivImmediate = AtLeastN(2);
    // target, level, xoffset, yoffset, width, height, format, type, pixels_shm_id, pixels_shm_offset
    TexSubImage2D = Fixed(10);
    // target, level, xoffset, yoffset, width, height, format, type + pixels
    TexSubImage2DImmediate = AtLeastN(8);
    // location, x (f32 bits)
    Uniform1f = Fixed(2);
    // location, x
    Uniform1i = Fixed(2);
    // location, count, v_shm_id, v_shm_offset
    Uniform1iv = Fixed(4);
    // location, count + values
    Uniform1ivImmediate = AtLeastN(2);
    // location, count + values (4 floats per element)
    Uniform4fvImmediate = AtLeastN(2);
    // program
    UseProgram = Fixed(1);
    // indx, size, type, normalized, stride, offset
    VertexAttribPointer = Fixed(6);
    // x, y, width, height
    Viewport = Fixed(4);
    SwapBuffers = Fixed(0);
    // width, height
    ResizeCHROMIUM = Fixed(2);
    // latch_id
    SetLatchCHROMIUM = Fixed(1);
    // latch_id
    WaitLatchCHROMIUM = Fixed(1);
}

/// Byte layouts of results written back into transfer buffers.
pub mod results {
    /// `GetActiveAttrib`/`GetActiveUniform`: `{success: i32, size: i32, type: u32}`.
    pub const ACTIVE_INFO_BYTES: u32 = 12;
    /// `GetAttribLocation`/`GetUniformLocation`: `i32` location.
    pub const LOCATION_BYTES: u32 = 4;
    /// `GetError`: `u32` GL error.
    pub const ERROR_BYTES: u32 = 4;
    /// `GetProgramiv`/`GetShaderiv`: `i32` value.
    pub const PARAM_BYTES: u32 = 4;
    /// `ReadPixels`: `u32` success flag.
    pub const READ_PIXELS_BYTES: u32 = 4;
    /// `GetBucketSize`: `u32` size.
    pub const BUCKET_SIZE_BYTES: u32 = 4;
    /// `GetShaderPrecisionFormat`: `{success, min_range, max_range, precision}`, all `i32`.
    pub const PRECISION_FORMAT_BYTES: u32 = 16;
    /// Header of a sized result: `u32` element count, then the elements.
    pub const SIZED_RESULT_HEADER_BYTES: u32 = 4;

    /// Bytes of a sized result holding `count` 4-byte elements.
    pub const fn sized_result_bytes(count: u32) -> u32 {
        SIZED_RESULT_HEADER_BYTES + count * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_after_common_range() {
        assert_eq!(CommandId::ActiveTexture.id(), LAST_COMMON_COMMAND + 1);
        assert_eq!(CommandId::from_u32(LAST_COMMON_COMMAND), None);
        let last = *CommandId::ALL.last().unwrap();
        assert_eq!(CommandId::from_u32(last.id()), Some(last));
        assert_eq!(CommandId::from_u32(last.id() + 1), None);
    }

    #[test]
    fn immediate_commands_accept_payload() {
        for id in CommandId::ALL {
            let info = id.info();
            let immediate = id.name().ends_with("Immediate");
            assert_eq!(
                info.arg_flags == ArgFlags::AtLeastN,
                immediate,
                "{} has unexpected arg flags",
                id.name()
            );
        }
    }
}
