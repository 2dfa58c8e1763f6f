//! Texture objects, units, level uploads and pixel store state.

use std::rc::Rc;

use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::gl_utils::{bind_target_for, compute_image_data_size, validate};

use super::resources::check_new_ids;
use super::{immediate_bytes, shm_read, shm_read_optional, CmdResult, Gles2Decoder};
use crate::command_buffer::CommandBufferEngine;
use crate::surface::PlatformSurface;
use crate::texture_manager::{LevelInfo, TextureRef};

/// Bytes of an ETC1 image: 8 per 4x4 block.
fn etc1_size(width: i32, height: i32) -> Option<u32> {
    let blocks_wide = (width.max(0) as u32).div_ceil(4);
    let blocks_high = (height.max(0) as u32).div_ceil(4);
    blocks_wide.checked_mul(blocks_high)?.checked_mul(8)
}

impl<S: PlatformSurface> Gles2Decoder<S> {
    /// Texture bound to the active unit for the bind target of `target`.
    /// `None` when the default texture is bound.
    fn bound_texture(&self, target: GLenum) -> Option<TextureRef> {
        let unit = self.texture_units.get(self.active_texture_unit as usize)?;
        let texture = unit.bound(bind_target_for(target));
        (texture.borrow().service_id() != 0).then(|| Rc::clone(texture))
    }

    pub(super) fn do_active_texture(&mut self, texture: GLenum) -> CmdResult {
        let unit = texture.wrapping_sub(gl::TEXTURE0);
        if unit as usize >= self.texture_units.len() {
            return self.gl_error(gl::INVALID_ENUM, "ActiveTexture: unit out of range");
        }
        self.active_texture_unit = unit;
        self.gl.active_texture(texture);
        Ok(())
    }

    pub(super) fn do_gen_textures(&mut self, ids: &[u32]) -> CmdResult {
        let mut group = self.group.borrow_mut();
        check_new_ids(&group.ids.textures, ids)?;
        for &client_id in ids {
            let service_id = self.gl.gen_texture();
            group.ids.textures.add_mapping(client_id, service_id);
            group.texture_manager.create_texture_info(client_id, service_id);
        }
        Ok(())
    }

    pub(super) fn do_delete_textures(&mut self, ids: &[u32]) -> CmdResult {
        for &client_id in ids {
            let removed = {
                let mut group = self.group.borrow_mut();
                let Some(service_id) = group.ids.textures.get_service_id(client_id) else {
                    continue;
                };
                group.ids.textures.remove_mapping(client_id, service_id);
                self.gl.delete_texture(service_id);
                group.texture_manager.remove_texture_info(client_id)
            };
            let Some(texture) = removed else {
                continue;
            };
            let group = self.group.borrow();
            for unit in &mut self.texture_units {
                if Rc::ptr_eq(&unit.bound_2d, &texture) {
                    unit.bound_2d = group.texture_manager.default_texture(gl::TEXTURE_2D);
                }
                if Rc::ptr_eq(&unit.bound_cube, &texture) {
                    unit.bound_cube = group.texture_manager.default_texture(gl::TEXTURE_CUBE_MAP);
                }
            }
        }
        Ok(())
    }

    pub(super) fn do_bind_texture(&mut self, target: GLenum, client_id: u32) -> CmdResult {
        if !validate::texture_bind_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "BindTexture: target");
        }
        let texture = if client_id == 0 {
            self.group.borrow().texture_manager.default_texture(target)
        } else {
            let texture = self.group.borrow().texture_manager.get_texture_info(client_id);
            let Some(texture) = texture else {
                return self.gl_error(gl::INVALID_VALUE, "BindTexture: unknown texture");
            };
            let bound_target = texture.borrow().target();
            if bound_target == 0 {
                self.group.borrow_mut().texture_manager.set_info_target(&texture, target);
            } else if bound_target != target {
                return self.gl_error(gl::INVALID_OPERATION, "BindTexture: texture bound to another target");
            }
            texture
        };
        self.gl.bind_texture(target, texture.borrow().service_id());
        let Some(unit) = self.texture_units.get_mut(self.active_texture_unit as usize) else {
            return Ok(());
        };
        if target == gl::TEXTURE_2D {
            unit.bound_2d = texture;
        } else {
            unit.bound_cube = texture;
        }
        Ok(())
    }

    /// `TexImage2D` and its immediate form. Argument layout is shared up to
    /// the pixel source; `immediate_data_size` is `Some` for the latter.
    pub(super) fn do_tex_image_2d(
        &mut self,
        engine: &dyn CommandBufferEngine,
        a: &[u32],
        immediate_data_size: Option<u32>,
    ) -> CmdResult {
        let (target, level, internal_format) = (a[0], a[1] as i32, a[2]);
        let (width, height, border, format, ty) = (a[3] as i32, a[4] as i32, a[5] as i32, a[6], a[7]);

        if !validate::texture_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "TexImage2D: target");
        }
        if !validate::texture_format(internal_format) || !validate::texture_format(format) {
            return self.gl_error(gl::INVALID_ENUM, "TexImage2D: format");
        }
        if !validate::pixel_type(ty) {
            return self.gl_error(gl::INVALID_ENUM, "TexImage2D: type");
        }
        if internal_format != format {
            return self.gl_error(gl::INVALID_OPERATION, "TexImage2D: format != internalformat");
        }
        if border != 0 {
            return self.gl_error(gl::INVALID_VALUE, "TexImage2D: border != 0");
        }
        let valid = self
            .group
            .borrow()
            .texture_manager
            .valid_for_target(target, level, width, height, 1);
        if !valid {
            return self.gl_error(gl::INVALID_VALUE, "TexImage2D: dimensions out of range");
        }
        let Some(size) = compute_image_data_size(width, height, format, ty, self.unpack_alignment as u32) else {
            return self.gl_error(gl::INVALID_VALUE, "TexImage2D: image too large");
        };
        let pixels = match immediate_data_size {
            Some(imm) => Some(immediate_bytes(&a[8..], imm, size)?),
            None => shm_read_optional(engine, a[8], a[9], size)?,
        };
        let Some(texture) = self.bound_texture(target) else {
            return self.gl_error(gl::INVALID_OPERATION, "TexImage2D: no texture bound");
        };

        self.copy_real_gl_errors();
        self.gl.tex_image_2d(
            target,
            level,
            internal_format,
            width,
            height,
            border,
            format,
            ty,
            pixels.as_deref(),
        );
        let error = self.gl.get_error();
        if error != gl::NO_ERROR {
            return self.gl_error(error, "TexImage2D: driver");
        }
        let level_info = LevelInfo {
            internal_format,
            width,
            height,
            depth: 1,
            border,
            format,
            ty,
        };
        self.group
            .borrow_mut()
            .texture_manager
            .set_level_info(&texture, target, level, level_info);
        Ok(())
    }

    /// `TexSubImage2D` and its immediate form. The region must lie inside a
    /// level that was already specified with the same format and type.
    pub(super) fn do_tex_sub_image_2d(
        &mut self,
        engine: &dyn CommandBufferEngine,
        a: &[u32],
        immediate_data_size: Option<u32>,
    ) -> CmdResult {
        let (target, level, xoffset, yoffset) = (a[0], a[1] as i32, a[2] as i32, a[3] as i32);
        let (width, height, format, ty) = (a[4] as i32, a[5] as i32, a[6], a[7]);

        if !validate::texture_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "TexSubImage2D: target");
        }
        if !validate::texture_format(format) {
            return self.gl_error(gl::INVALID_ENUM, "TexSubImage2D: format");
        }
        if !validate::pixel_type(ty) {
            return self.gl_error(gl::INVALID_ENUM, "TexSubImage2D: type");
        }
        if width < 0 || height < 0 {
            return self.gl_error(gl::INVALID_VALUE, "TexSubImage2D: dimensions < 0");
        }
        let Some(size) = compute_image_data_size(width, height, format, ty, self.unpack_alignment as u32) else {
            return self.gl_error(gl::INVALID_VALUE, "TexSubImage2D: image too large");
        };
        let pixels = match immediate_data_size {
            Some(imm) => immediate_bytes(&a[8..], imm, size)?,
            None => shm_read(engine, a[8], a[9], size)?,
        };
        let Some(texture) = self.bound_texture(target) else {
            return self.gl_error(gl::INVALID_OPERATION, "TexSubImage2D: no texture bound");
        };
        let level_format = {
            let texture = texture.borrow();
            if !texture.valid_for_texture(target, level, xoffset, yoffset, width, height) {
                None
            } else {
                texture.level_info(target, level).map(|info| (info.format, info.ty))
            }
        };
        let Some(level_format) = level_format else {
            return self.gl_error(gl::INVALID_VALUE, "TexSubImage2D: bad dimensions");
        };
        if level_format != (format, ty) {
            return self.gl_error(gl::INVALID_OPERATION, "TexSubImage2D: format or type mismatch");
        }
        self.gl
            .tex_sub_image_2d(target, level, xoffset, yoffset, width, height, format, ty, &pixels);
        Ok(())
    }

    pub(super) fn do_compressed_tex_image_2d(
        &mut self,
        target: GLenum,
        level: i32,
        internal_format: GLenum,
        width: i32,
        height: i32,
        border: i32,
        data: &[u8],
    ) -> CmdResult {
        if !validate::texture_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "CompressedTexImage2D: target");
        }
        if !validate::compressed_texture_format(internal_format) {
            return self.gl_error(gl::INVALID_ENUM, "CompressedTexImage2D: internalformat");
        }
        if border != 0 {
            return self.gl_error(gl::INVALID_VALUE, "CompressedTexImage2D: border != 0");
        }
        let valid = self
            .group
            .borrow()
            .texture_manager
            .valid_for_target(target, level, width, height, 1);
        if !valid || etc1_size(width, height) != Some(data.len() as u32) {
            return self.gl_error(gl::INVALID_VALUE, "CompressedTexImage2D: bad size");
        }
        let Some(texture) = self.bound_texture(target) else {
            return self.gl_error(gl::INVALID_OPERATION, "CompressedTexImage2D: no texture bound");
        };

        self.copy_real_gl_errors();
        self.gl
            .compressed_tex_image_2d(target, level, internal_format, width, height, border, data);
        let error = self.gl.get_error();
        if error != gl::NO_ERROR {
            return self.gl_error(error, "CompressedTexImage2D: driver");
        }
        let level_info = LevelInfo {
            internal_format,
            width,
            height,
            depth: 1,
            border,
            format: internal_format,
            ty: gl::UNSIGNED_BYTE,
        };
        self.group
            .borrow_mut()
            .texture_manager
            .set_level_info(&texture, target, level, level_info);
        Ok(())
    }

    pub(super) fn do_tex_parameter(&mut self, target: GLenum, pname: GLenum, value: i32) -> CmdResult {
        if !validate::texture_bind_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "TexParameter: target");
        }
        if !validate::texture_parameter(pname) || !validate::texture_parameter_value(pname, value) {
            return self.gl_error(gl::INVALID_ENUM, "TexParameter: pname or value");
        }
        let Some(texture) = self.bound_texture(target) else {
            return self.gl_error(gl::INVALID_VALUE, "TexParameter: no texture bound");
        };
        self.group
            .borrow_mut()
            .texture_manager
            .set_parameter(&texture, pname, value);
        self.gl.tex_parameteri(target, pname, value);
        Ok(())
    }

    pub(super) fn do_generate_mipmap(&mut self, target: GLenum) -> CmdResult {
        if !validate::texture_bind_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "GenerateMipmap: target");
        }
        let Some(texture) = self.bound_texture(target) else {
            return self.gl_error(gl::INVALID_OPERATION, "GenerateMipmap: no texture bound");
        };
        if !self.group.borrow().texture_manager.can_generate_mipmaps(&texture) {
            return self.gl_error(gl::INVALID_OPERATION, "GenerateMipmap: texture not mipmappable");
        }
        self.gl.generate_mipmap(target);
        self.group
            .borrow_mut()
            .texture_manager
            .mark_mipmaps_generated(&texture);
        Ok(())
    }

    pub(super) fn do_pixel_storei(&mut self, pname: GLenum, param: i32) -> CmdResult {
        if !validate::pixel_store(pname) {
            return self.gl_error(gl::INVALID_ENUM, "PixelStorei: pname");
        }
        if !validate::pixel_store_alignment(param) {
            return self.gl_error(gl::INVALID_VALUE, "PixelStorei: alignment");
        }
        self.gl.pixel_storei(pname, param);
        if pname == gl::PACK_ALIGNMENT {
            self.pack_alignment = param;
        } else {
            self.unpack_alignment = param;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etc1_rounds_up_to_whole_blocks() {
        assert_eq!(etc1_size(4, 4), Some(8));
        assert_eq!(etc1_size(5, 4), Some(16));
        assert_eq!(etc1_size(1, 1), Some(8));
        assert_eq!(etc1_size(0, 4), Some(0));
    }
}
