//! Validation and sizing helpers for GL enums carried in commands.

use bitflags::bitflags;

use crate::gl::{self, GLenum};

pub const NUM_CUBE_FACES: usize = 6;

bitflags! {
    /// Recorded GL errors, one bit per GL error code.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct GlErrorBits: u32 {
        const INVALID_ENUM = 1 << 0;
        const INVALID_VALUE = 1 << 1;
        const INVALID_OPERATION = 1 << 2;
        const OUT_OF_MEMORY = 1 << 3;
        const INVALID_FRAMEBUFFER_OPERATION = 1 << 4;
    }
}

impl GlErrorBits {
    pub const fn from_gl_error(error: GLenum) -> Self {
        match error {
            gl::INVALID_ENUM => Self::INVALID_ENUM,
            gl::INVALID_VALUE => Self::INVALID_VALUE,
            gl::INVALID_OPERATION => Self::INVALID_OPERATION,
            gl::OUT_OF_MEMORY => Self::OUT_OF_MEMORY,
            gl::INVALID_FRAMEBUFFER_OPERATION => Self::INVALID_FRAMEBUFFER_OPERATION,
            _ => Self::empty(),
        }
    }

    /// GL error code of the lowest set bit, or `NO_ERROR`.
    pub fn lowest_gl_error(self) -> GLenum {
        if self.contains(Self::INVALID_ENUM) {
            gl::INVALID_ENUM
        } else if self.contains(Self::INVALID_VALUE) {
            gl::INVALID_VALUE
        } else if self.contains(Self::INVALID_OPERATION) {
            gl::INVALID_OPERATION
        } else if self.contains(Self::OUT_OF_MEMORY) {
            gl::OUT_OF_MEMORY
        } else if self.contains(Self::INVALID_FRAMEBUFFER_OPERATION) {
            gl::INVALID_FRAMEBUFFER_OPERATION
        } else {
            gl::NO_ERROR
        }
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ClearMask: u32 {
        const COLOR = gl::COLOR_BUFFER_BIT;
        const DEPTH = gl::DEPTH_BUFFER_BIT;
        const STENCIL = gl::STENCIL_BUFFER_BIT;
    }
}

pub fn is_npot(v: i32) -> bool {
    v > 0 && (v & (v - 1)) != 0
}

/// Number of mip levels of a full chain for the given base dimensions.
pub fn compute_mip_map_count(width: i32, height: i32, depth: i32) -> i32 {
    let max = width.max(height).max(depth);
    if max <= 0 {
        return 1;
    }
    1 + (31 - (max as u32).leading_zeros() as i32)
}

/// Size in bytes of one component of `ty` as stored in textures or buffers;
/// 0 for unknown types.
pub fn type_size(ty: GLenum) -> u32 {
    match ty {
        gl::BYTE | gl::UNSIGNED_BYTE => 1,
        gl::SHORT | gl::UNSIGNED_SHORT | gl::HALF_FLOAT_OES => 2,
        gl::UNSIGNED_SHORT_5_6_5 | gl::UNSIGNED_SHORT_4_4_4_4 | gl::UNSIGNED_SHORT_5_5_5_1 => 2,
        gl::INT | gl::UNSIGNED_INT | gl::FLOAT | gl::FIXED => 4,
        _ => 0,
    }
}

fn components_per_element(format: GLenum) -> u32 {
    match format {
        gl::ALPHA | gl::LUMINANCE => 1,
        gl::LUMINANCE_ALPHA => 2,
        gl::RGB => 3,
        gl::RGBA => 4,
        _ => 0,
    }
}

fn bytes_per_group(format: GLenum, ty: GLenum) -> u32 {
    match ty {
        gl::UNSIGNED_SHORT_5_6_5 | gl::UNSIGNED_SHORT_4_4_4_4 | gl::UNSIGNED_SHORT_5_5_5_1 => 2,
        _ => components_per_element(format) * type_size(ty),
    }
}

/// Bytes needed for a `width` x `height` image with rows padded to
/// `alignment` (the last row is not padded). `None` on negative sizes or
/// overflow.
pub fn compute_image_data_size(
    width: i32,
    height: i32,
    format: GLenum,
    ty: GLenum,
    alignment: u32,
) -> Option<u32> {
    if width < 0 || height < 0 || alignment == 0 {
        return None;
    }
    let row_size = (width as u32).checked_mul(bytes_per_group(format, ty))?;
    if height > 1 {
        let padded = row_size.checked_add(alignment - 1)? / alignment * alignment;
        let all_but_last = (height as u32 - 1).checked_mul(padded)?;
        all_but_last.checked_add(row_size)
    } else {
        Some(height as u32 * row_size)
    }
}

pub fn face_index(target: GLenum) -> Option<usize> {
    match target {
        gl::TEXTURE_2D | gl::TEXTURE_CUBE_MAP_POSITIVE_X => Some(0),
        gl::TEXTURE_CUBE_MAP_NEGATIVE_X => Some(1),
        gl::TEXTURE_CUBE_MAP_POSITIVE_Y => Some(2),
        gl::TEXTURE_CUBE_MAP_NEGATIVE_Y => Some(3),
        gl::TEXTURE_CUBE_MAP_POSITIVE_Z => Some(4),
        gl::TEXTURE_CUBE_MAP_NEGATIVE_Z => Some(5),
        _ => None,
    }
}

pub fn face_target(index: usize) -> GLenum {
    gl::TEXTURE_CUBE_MAP_POSITIVE_X + index as GLenum
}

/// Bind target a level target belongs to (`TEXTURE_2D` or `TEXTURE_CUBE_MAP`).
pub fn bind_target_for(target: GLenum) -> GLenum {
    if target == gl::TEXTURE_2D {
        gl::TEXTURE_2D
    } else {
        gl::TEXTURE_CUBE_MAP
    }
}

/// Number of scalar components `glGetUniform*` writes for a uniform of type
/// `ty`; 0 for unknown types.
pub fn uniform_components(ty: GLenum) -> u32 {
    match ty {
        gl::FLOAT | gl::INT | gl::BOOL | gl::SAMPLER_2D | gl::SAMPLER_CUBE => 1,
        gl::FLOAT_VEC2 | gl::INT_VEC2 => 2,
        gl::FLOAT_VEC3 | gl::INT_VEC3 => 3,
        gl::FLOAT_VEC4 | gl::INT_VEC4 | gl::FLOAT_MAT2 => 4,
        gl::FLOAT_MAT3 => 9,
        gl::FLOAT_MAT4 => 16,
        _ => 0,
    }
}

pub fn is_sampler_type(ty: GLenum) -> bool {
    matches!(ty, gl::SAMPLER_2D | gl::SAMPLER_CUBE)
}

/// Per-enum-class validators. Each returns whether the value is acceptable
/// for that argument; callers record `INVALID_ENUM` otherwise.
pub mod validate {
    use crate::gl::{self, GLenum};

    pub fn buffer_target(v: GLenum) -> bool {
        matches!(v, gl::ARRAY_BUFFER | gl::ELEMENT_ARRAY_BUFFER)
    }

    pub fn buffer_usage(v: GLenum) -> bool {
        matches!(v, gl::STREAM_DRAW | gl::STATIC_DRAW | gl::DYNAMIC_DRAW)
    }

    pub fn framebuffer_target(v: GLenum) -> bool {
        v == gl::FRAMEBUFFER
    }

    pub fn renderbuffer_target(v: GLenum) -> bool {
        v == gl::RENDERBUFFER
    }

    pub fn texture_bind_target(v: GLenum) -> bool {
        matches!(v, gl::TEXTURE_2D | gl::TEXTURE_CUBE_MAP)
    }

    pub fn texture_target(v: GLenum) -> bool {
        v == gl::TEXTURE_2D
            || (gl::TEXTURE_CUBE_MAP_POSITIVE_X..=gl::TEXTURE_CUBE_MAP_NEGATIVE_Z).contains(&v)
    }

    pub fn texture_format(v: GLenum) -> bool {
        matches!(
            v,
            gl::ALPHA | gl::LUMINANCE | gl::LUMINANCE_ALPHA | gl::RGB | gl::RGBA
        )
    }

    pub fn compressed_texture_format(v: GLenum) -> bool {
        v == gl::ETC1_RGB8_OES
    }

    pub fn pixel_type(v: GLenum) -> bool {
        matches!(
            v,
            gl::UNSIGNED_BYTE
                | gl::UNSIGNED_SHORT_5_6_5
                | gl::UNSIGNED_SHORT_4_4_4_4
                | gl::UNSIGNED_SHORT_5_5_5_1
                | gl::FLOAT
                | gl::HALF_FLOAT_OES
        )
    }

    pub fn read_pixel_format(v: GLenum) -> bool {
        matches!(v, gl::ALPHA | gl::RGB | gl::RGBA)
    }

    pub fn draw_mode(v: GLenum) -> bool {
        v <= gl::TRIANGLE_FAN
    }

    pub fn index_type(v: GLenum) -> bool {
        matches!(v, gl::UNSIGNED_BYTE | gl::UNSIGNED_SHORT)
    }

    pub fn vertex_attrib_type(v: GLenum) -> bool {
        matches!(
            v,
            gl::BYTE | gl::UNSIGNED_BYTE | gl::SHORT | gl::UNSIGNED_SHORT | gl::FLOAT
        )
    }

    pub fn vertex_attrib_size(v: i32) -> bool {
        (1..=4).contains(&v)
    }

    pub fn pixel_store(v: GLenum) -> bool {
        matches!(v, gl::PACK_ALIGNMENT | gl::UNPACK_ALIGNMENT)
    }

    pub fn pixel_store_alignment(v: i32) -> bool {
        matches!(v, 1 | 2 | 4 | 8)
    }

    pub fn texture_parameter(v: GLenum) -> bool {
        matches!(
            v,
            gl::TEXTURE_MIN_FILTER | gl::TEXTURE_MAG_FILTER | gl::TEXTURE_WRAP_S | gl::TEXTURE_WRAP_T
        )
    }

    /// Value check for a texture parameter whose name already passed
    /// [`texture_parameter`].
    pub fn texture_parameter_value(pname: GLenum, value: i32) -> bool {
        let v = value as GLenum;
        match pname {
            gl::TEXTURE_MIN_FILTER => matches!(
                v,
                gl::NEAREST
                    | gl::LINEAR
                    | gl::NEAREST_MIPMAP_NEAREST
                    | gl::LINEAR_MIPMAP_NEAREST
                    | gl::NEAREST_MIPMAP_LINEAR
                    | gl::LINEAR_MIPMAP_LINEAR
            ),
            gl::TEXTURE_MAG_FILTER => matches!(v, gl::NEAREST | gl::LINEAR),
            gl::TEXTURE_WRAP_S | gl::TEXTURE_WRAP_T => {
                matches!(v, gl::REPEAT | gl::CLAMP_TO_EDGE | gl::MIRRORED_REPEAT)
            }
            _ => false,
        }
    }

    pub fn shader_type(v: GLenum) -> bool {
        matches!(v, gl::VERTEX_SHADER | gl::FRAGMENT_SHADER)
    }

    pub fn shader_parameter(v: GLenum) -> bool {
        matches!(
            v,
            gl::SHADER_TYPE
                | gl::DELETE_STATUS
                | gl::COMPILE_STATUS
                | gl::INFO_LOG_LENGTH
                | gl::SHADER_SOURCE_LENGTH
        )
    }

    pub fn program_parameter(v: GLenum) -> bool {
        matches!(
            v,
            gl::DELETE_STATUS
                | gl::LINK_STATUS
                | gl::VALIDATE_STATUS
                | gl::INFO_LOG_LENGTH
                | gl::ATTACHED_SHADERS
                | gl::ACTIVE_ATTRIBUTES
                | gl::ACTIVE_ATTRIBUTE_MAX_LENGTH
                | gl::ACTIVE_UNIFORMS
                | gl::ACTIVE_UNIFORM_MAX_LENGTH
        )
    }

    pub fn shader_precision(v: GLenum) -> bool {
        matches!(
            v,
            gl::LOW_FLOAT | gl::MEDIUM_FLOAT | gl::HIGH_FLOAT | gl::LOW_INT | gl::MEDIUM_INT | gl::HIGH_INT
        )
    }

    pub fn vertex_pointer(v: GLenum) -> bool {
        v == gl::VERTEX_ATTRIB_ARRAY_POINTER
    }

    pub fn string_type(v: GLenum) -> bool {
        matches!(
            v,
            gl::VENDOR | gl::RENDERER | gl::VERSION | gl::SHADING_LANGUAGE_VERSION | gl::EXTENSIONS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_bits_map_both_ways() {
        let bits = GlErrorBits::from_gl_error(gl::INVALID_VALUE) | GlErrorBits::INVALID_OPERATION;
        assert_eq!(bits.lowest_gl_error(), gl::INVALID_VALUE);
        assert_eq!(GlErrorBits::empty().lowest_gl_error(), gl::NO_ERROR);
        assert_eq!(GlErrorBits::from_gl_error(0x1234), GlErrorBits::empty());
    }

    #[test]
    fn image_size_pads_all_but_last_row() {
        // 3 RGB texels = 9 bytes per row, padded to 12 with alignment 4.
        assert_eq!(
            compute_image_data_size(3, 2, gl::RGB, gl::UNSIGNED_BYTE, 4),
            Some(12 + 9)
        );
        assert_eq!(
            compute_image_data_size(3, 1, gl::RGB, gl::UNSIGNED_BYTE, 4),
            Some(9)
        );
        assert_eq!(
            compute_image_data_size(2, 2, gl::RGBA, gl::UNSIGNED_SHORT_4_4_4_4, 1),
            Some(8)
        );
        assert_eq!(compute_image_data_size(0, 0, gl::RGBA, gl::UNSIGNED_BYTE, 4), Some(0));
        assert_eq!(compute_image_data_size(-1, 1, gl::RGBA, gl::UNSIGNED_BYTE, 4), None);
    }

    #[test]
    fn image_size_overflow_is_rejected() {
        assert_eq!(
            compute_image_data_size(i32::MAX, i32::MAX, gl::RGBA, gl::FLOAT, 4),
            None
        );
    }

    #[test]
    fn mip_counts() {
        assert_eq!(compute_mip_map_count(1, 1, 1), 1);
        assert_eq!(compute_mip_map_count(4, 4, 1), 3);
        assert_eq!(compute_mip_map_count(8, 2, 1), 4);
        assert_eq!(compute_mip_map_count(5, 3, 1), 3);
    }

    #[test]
    fn npot() {
        assert!(!is_npot(0));
        assert!(!is_npot(1));
        assert!(!is_npot(64));
        assert!(is_npot(3));
        assert!(is_npot(100));
    }

    #[test]
    fn faces_round_trip_through_targets() {
        for index in 0..NUM_CUBE_FACES {
            assert_eq!(face_index(face_target(index)), Some(index));
        }
        assert_eq!(face_index(gl::TEXTURE_2D), Some(0));
        assert_eq!(face_index(gl::TEXTURE_CUBE_MAP), None);
    }

    #[test]
    fn uniform_components_cover_matrices() {
        assert_eq!(uniform_components(gl::SAMPLER_CUBE), 1);
        assert_eq!(uniform_components(gl::INT_VEC3), 3);
        assert_eq!(uniform_components(gl::FLOAT_MAT2), 4);
        assert_eq!(uniform_components(gl::FLOAT_MAT4), 16);
        assert_eq!(uniform_components(gl::UNSIGNED_BYTE), 0);
    }
}
