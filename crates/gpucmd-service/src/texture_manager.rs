//! Shadow state for texture objects.
//!
//! Completeness is recomputed eagerly on every level or parameter change so
//! draws only have to ask [`TextureManager::can_render`]. Changes go through
//! the manager, which keeps a running count of unrenderable textures.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::gl_utils::{
    bind_target_for, compute_mip_map_count, face_index, is_npot, validate, NUM_CUBE_FACES,
};
use tracing::trace;

use crate::gl::GlDriver;

/// What the driver can do with textures, fixed per share group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureFeatures {
    pub npot_ok: bool,
    pub float_linear: bool,
    pub half_float_linear: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelInfo {
    pub internal_format: GLenum,
    pub width: i32,
    pub height: i32,
    pub depth: i32,
    pub border: i32,
    pub format: GLenum,
    pub ty: GLenum,
}

impl LevelInfo {
    fn same_format(&self, other: &LevelInfo) -> bool {
        self.internal_format == other.internal_format && self.format == other.format && self.ty == other.ty
    }
}

#[derive(Debug)]
pub struct TextureInfo {
    service_id: u32,
    /// `0` until first bound.
    target: GLenum,
    deleted: bool,
    /// `[face][level]`.
    level_infos: Vec<Vec<Option<LevelInfo>>>,
    max_level_set: i32,
    min_filter: GLenum,
    mag_filter: GLenum,
    wrap_s: GLenum,
    wrap_t: GLenum,
    npot: bool,
    texture_complete: bool,
    cube_complete: bool,
}

pub type TextureRef = Rc<RefCell<TextureInfo>>;

impl TextureInfo {
    fn new(service_id: u32) -> Self {
        Self {
            service_id,
            target: 0,
            deleted: false,
            level_infos: Vec::new(),
            max_level_set: -1,
            min_filter: gl::NEAREST_MIPMAP_LINEAR,
            mag_filter: gl::LINEAR,
            wrap_s: gl::REPEAT,
            wrap_t: gl::REPEAT,
            npot: false,
            texture_complete: false,
            cube_complete: false,
        }
    }

    pub fn service_id(&self) -> u32 {
        self.service_id
    }

    pub fn target(&self) -> GLenum {
        self.target
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn npot(&self) -> bool {
        self.npot
    }

    pub fn texture_complete(&self) -> bool {
        self.texture_complete
    }

    pub fn cube_complete(&self) -> bool {
        self.cube_complete
    }

    pub fn min_filter(&self) -> GLenum {
        self.min_filter
    }

    pub fn mag_filter(&self) -> GLenum {
        self.mag_filter
    }

    pub fn wrap_s(&self) -> GLenum {
        self.wrap_s
    }

    pub fn wrap_t(&self) -> GLenum {
        self.wrap_t
    }

    pub fn level_info(&self, target: GLenum, level: i32) -> Option<&LevelInfo> {
        let face = face_index(target)?;
        let level = usize::try_from(level).ok()?;
        self.level_infos.get(face)?.get(level)?.as_ref()
    }

    fn first_face(&self) -> Option<&LevelInfo> {
        self.level_infos.first()?.first()?.as_ref()
    }

    pub fn needs_mips(&self) -> bool {
        self.min_filter != gl::NEAREST && self.min_filter != gl::LINEAR
    }

    pub fn can_render(&self, features: &TextureFeatures) -> bool {
        if self.target == 0 || self.deleted {
            return false;
        }
        let Some(first) = self.first_face() else {
            return false;
        };
        if first.width == 0 || first.height == 0 {
            return false;
        }
        let nearest_only = matches!(self.min_filter, gl::NEAREST | gl::NEAREST_MIPMAP_NEAREST)
            && self.mag_filter == gl::NEAREST;
        if first.ty == gl::FLOAT && !features.float_linear && !nearest_only {
            return false;
        }
        if first.ty == gl::HALF_FLOAT_OES && !features.half_float_linear && !nearest_only {
            return false;
        }
        let needs_mips = self.needs_mips();
        if self.npot && !features.npot_ok {
            return !needs_mips && self.wrap_s == gl::CLAMP_TO_EDGE && self.wrap_t == gl::CLAMP_TO_EDGE;
        }
        let cube_ok = self.target != gl::TEXTURE_CUBE_MAP || self.cube_complete;
        if needs_mips {
            self.texture_complete && cube_ok
        } else {
            cube_ok
        }
    }

    pub fn can_generate_mipmaps(&self, features: &TextureFeatures) -> bool {
        if (self.npot && !features.npot_ok) || self.level_infos.is_empty() || self.deleted {
            return false;
        }
        let Some(first) = self.first_face() else {
            return false;
        };
        if validate::compressed_texture_format(first.internal_format) {
            return false;
        }
        self.level_infos.iter().all(|face| match face.first() {
            Some(Some(info)) => {
                info.width == first.width
                    && info.height == first.height
                    && info.depth == 1
                    && info.same_format(first)
            }
            _ => false,
        })
    }

    fn set_info_target(&mut self, target: GLenum, max_levels: i32) {
        self.target = target;
        let faces = if target == gl::TEXTURE_CUBE_MAP { NUM_CUBE_FACES } else { 1 };
        self.level_infos = vec![vec![None; max_levels.max(1) as usize]; faces];
        self.update();
    }

    fn set_level_info(&mut self, target: GLenum, level: i32, info: LevelInfo) -> bool {
        let (Some(face), Ok(index)) = (face_index(target), usize::try_from(level)) else {
            return false;
        };
        let Some(slot) = self.level_infos.get_mut(face).and_then(|f| f.get_mut(index)) else {
            return false;
        };
        *slot = Some(info);
        self.max_level_set = self.max_level_set.max(level);
        self.update();
        true
    }

    /// Fails for values the parameter does not accept.
    fn set_parameter(&mut self, pname: GLenum, value: i32) -> bool {
        if !validate::texture_parameter_value(pname, value) {
            return false;
        }
        let value = value as GLenum;
        match pname {
            gl::TEXTURE_MIN_FILTER => self.min_filter = value,
            gl::TEXTURE_MAG_FILTER => self.mag_filter = value,
            gl::TEXTURE_WRAP_S => self.wrap_s = value,
            gl::TEXTURE_WRAP_T => self.wrap_t = value,
            _ => return false,
        }
        self.update();
        true
    }

    fn mark_mipmaps_generated(&mut self) -> bool {
        let Some(faces) = self
            .level_infos
            .iter()
            .map(|f| f.first().copied().flatten())
            .collect::<Option<Vec<LevelInfo>>>()
        else {
            return false;
        };
        for (face, level0) in faces.into_iter().enumerate() {
            let levels = compute_mip_map_count(level0.width, level0.height, level0.depth);
            let (mut width, mut height, mut depth) = (level0.width, level0.height, level0.depth);
            for level in 1..levels {
                width = (width >> 1).max(1);
                height = (height >> 1).max(1);
                depth = (depth >> 1).max(1);
                if let Some(slot) = self.level_infos[face].get_mut(level as usize) {
                    *slot = Some(LevelInfo {
                        width,
                        height,
                        depth,
                        ..level0
                    });
                    self.max_level_set = self.max_level_set.max(level);
                }
            }
        }
        self.update();
        true
    }

    /// Fits `width`x`height` at `(x, y)` inside an existing level.
    pub fn valid_for_texture(&self, target: GLenum, level: i32, x: i32, y: i32, width: i32, height: i32) -> bool {
        let Some(info) = self.level_info(target, level) else {
            return false;
        };
        x >= 0
            && y >= 0
            && width >= 0
            && height >= 0
            && i64::from(x) + i64::from(width) <= i64::from(info.width)
            && i64::from(y) + i64::from(height) <= i64::from(info.height)
    }

    fn update(&mut self) {
        self.npot = self
            .level_infos
            .iter()
            .filter_map(|face| face.first().copied().flatten())
            .any(|l| is_npot(l.width) || is_npot(l.height) || is_npot(l.depth));

        let Some(first) = self.first_face().copied() else {
            self.texture_complete = false;
            self.cube_complete = false;
            return;
        };
        let levels_needed = compute_mip_map_count(first.width, first.height, first.depth);
        self.texture_complete = self.max_level_set >= levels_needed - 1 && first.width > 0 && first.height > 0;
        self.cube_complete = self.level_infos.len() == NUM_CUBE_FACES && first.width == first.height;

        for face in &self.level_infos {
            let Some(level0) = face.first().copied().flatten() else {
                self.cube_complete = false;
                self.texture_complete = false;
                continue;
            };
            if level0.width != first.width
                || level0.height != first.height
                || level0.depth != 1
                || !level0.same_format(&first)
            {
                self.cube_complete = false;
            }
            let (mut width, mut height, mut depth) = (level0.width, level0.height, level0.depth);
            for level in 1..levels_needed.max(1) as usize {
                width = (width >> 1).max(1);
                height = (height >> 1).max(1);
                depth = (depth >> 1).max(1);
                let ok = matches!(
                    face.get(level).copied().flatten(),
                    Some(info) if info.width == width
                        && info.height == height
                        && info.depth == depth
                        && info.same_format(&level0)
                );
                if !ok {
                    self.texture_complete = false;
                    break;
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct TextureManager {
    features: TextureFeatures,
    max_texture_size: i32,
    max_cube_map_texture_size: i32,
    max_levels: i32,
    max_cube_map_levels: i32,
    textures: HashMap<u32, TextureRef>,
    default_2d: TextureRef,
    default_cube: TextureRef,
    num_unrenderable: usize,
}

impl TextureManager {
    /// The default textures stand for client id `0` and use service id `0`.
    pub fn new(features: TextureFeatures, max_texture_size: i32, max_cube_map_texture_size: i32) -> Self {
        let max_levels = compute_mip_map_count(max_texture_size, max_texture_size, 1);
        let max_cube_map_levels = compute_mip_map_count(max_cube_map_texture_size, max_cube_map_texture_size, 1);
        let mut manager = Self {
            features,
            max_texture_size,
            max_cube_map_texture_size,
            max_levels,
            max_cube_map_levels,
            textures: HashMap::new(),
            default_2d: Rc::new(RefCell::new(TextureInfo::new(0))),
            default_cube: Rc::new(RefCell::new(TextureInfo::new(0))),
            num_unrenderable: 2,
        };
        let (default_2d, default_cube) = (Rc::clone(&manager.default_2d), Rc::clone(&manager.default_cube));
        manager.set_info_target(&default_2d, gl::TEXTURE_2D);
        manager.set_info_target(&default_cube, gl::TEXTURE_CUBE_MAP);
        manager
    }

    pub fn features(&self) -> &TextureFeatures {
        &self.features
    }

    pub fn max_size_for_target(&self, target: GLenum) -> i32 {
        if bind_target_for(target) == gl::TEXTURE_CUBE_MAP {
            self.max_cube_map_texture_size
        } else {
            self.max_texture_size
        }
    }

    pub fn max_levels_for_target(&self, target: GLenum) -> i32 {
        if bind_target_for(target) == gl::TEXTURE_CUBE_MAP {
            self.max_cube_map_levels
        } else {
            self.max_levels
        }
    }

    /// Whether a level of these dimensions may be specified for `target`.
    pub fn valid_for_target(&self, target: GLenum, level: i32, width: i32, height: i32, depth: i32) -> bool {
        let max_size = self.max_size_for_target(target);
        let is_cube = bind_target_for(target) == gl::TEXTURE_CUBE_MAP;
        level >= 0
            && width >= 0
            && height >= 0
            && depth >= 0
            && level < self.max_levels_for_target(target)
            && width <= max_size
            && height <= max_size
            && depth <= max_size
            && (level == 0 || self.features.npot_ok || (!is_npot(width) && !is_npot(height) && !is_npot(depth)))
            && (!is_cube || (width == height && depth == 1))
            && (is_cube || depth == 1)
    }

    pub fn default_texture(&self, target: GLenum) -> TextureRef {
        if target == gl::TEXTURE_CUBE_MAP {
            Rc::clone(&self.default_cube)
        } else {
            Rc::clone(&self.default_2d)
        }
    }

    pub fn create_texture_info(&mut self, client_id: u32, service_id: u32) -> TextureRef {
        let info = Rc::new(RefCell::new(TextureInfo::new(service_id)));
        if let Some(old) = self.textures.insert(client_id, Rc::clone(&info)) {
            self.forget(&old);
        }
        self.num_unrenderable += 1;
        info
    }

    pub fn get_texture_info(&self, client_id: u32) -> Option<TextureRef> {
        self.textures.get(&client_id).cloned()
    }

    pub fn remove_texture_info(&mut self, client_id: u32) -> Option<TextureRef> {
        let info = self.textures.remove(&client_id)?;
        self.forget(&info);
        Some(info)
    }

    fn forget(&mut self, info: &TextureRef) {
        if !info.borrow().can_render(&self.features) {
            self.num_unrenderable = self.num_unrenderable.saturating_sub(1);
        }
        info.borrow_mut().deleted = true;
    }

    fn tracked<R>(&mut self, info: &TextureRef, f: impl FnOnce(&mut TextureInfo) -> R) -> R {
        let was = info.borrow().can_render(&self.features);
        let result = f(&mut info.borrow_mut());
        let now = info.borrow().can_render(&self.features);
        match (was, now) {
            (true, false) => self.num_unrenderable += 1,
            (false, true) => self.num_unrenderable = self.num_unrenderable.saturating_sub(1),
            _ => {}
        }
        result
    }

    pub fn set_info_target(&mut self, info: &TextureRef, target: GLenum) {
        let max_levels = self.max_levels_for_target(target);
        self.tracked(info, |t| t.set_info_target(target, max_levels));
    }

    pub fn set_level_info(&mut self, info: &TextureRef, target: GLenum, level: i32, level_info: LevelInfo) -> bool {
        trace!(target, level, width = level_info.width, height = level_info.height, "set_level_info");
        self.tracked(info, |t| t.set_level_info(target, level, level_info))
    }

    pub fn set_parameter(&mut self, info: &TextureRef, pname: GLenum, value: i32) -> bool {
        self.tracked(info, |t| t.set_parameter(pname, value))
    }

    pub fn mark_mipmaps_generated(&mut self, info: &TextureRef) -> bool {
        self.tracked(info, |t| t.mark_mipmaps_generated())
    }

    pub fn can_render(&self, info: &TextureRef) -> bool {
        info.borrow().can_render(&self.features)
    }

    pub fn can_generate_mipmaps(&self, info: &TextureRef) -> bool {
        info.borrow().can_generate_mipmaps(&self.features)
    }

    pub fn num_unrenderable_textures(&self) -> usize {
        self.num_unrenderable
    }

    pub fn have_unrenderable_textures(&self) -> bool {
        self.num_unrenderable > 0
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        for (_, info) in self.textures.drain() {
            let mut info = info.borrow_mut();
            info.deleted = true;
            gl.delete_texture(info.service_id);
        }
        self.num_unrenderable = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(width: i32, height: i32) -> LevelInfo {
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

    fn manager() -> TextureManager {
        TextureManager::new(TextureFeatures::default(), 64, 64)
    }

    #[test]
    fn cube_completeness_tracks_face_edits() {
        let mut tm = manager();
        let cube = tm.create_texture_info(1, 10);
        tm.set_info_target(&cube, gl::TEXTURE_CUBE_MAP);
        for face in 0..NUM_CUBE_FACES {
            tm.set_level_info(&cube, gpucmd_protocol::gl_utils::face_target(face), 0, rgba(4, 4));
        }
        assert!(cube.borrow().cube_complete());

        tm.set_level_info(&cube, gl::TEXTURE_CUBE_MAP_NEGATIVE_Y, 0, rgba(8, 8));
        assert!(!cube.borrow().cube_complete());

        tm.set_level_info(&cube, gl::TEXTURE_CUBE_MAP_NEGATIVE_Y, 0, rgba(4, 4));
        assert!(cube.borrow().cube_complete());

        let mut rgb = rgba(4, 4);
        rgb.format = gl::RGB;
        rgb.internal_format = gl::RGB;
        tm.set_level_info(&cube, gl::TEXTURE_CUBE_MAP_POSITIVE_Z, 0, rgb);
        assert!(!cube.borrow().cube_complete());
    }

    #[test]
    fn mip_chain_makes_texture_complete() {
        let mut tm = manager();
        let tex = tm.create_texture_info(1, 10);
        tm.set_info_target(&tex, gl::TEXTURE_2D);
        tm.set_level_info(&tex, gl::TEXTURE_2D, 0, rgba(4, 2));
        assert!(!tex.borrow().texture_complete());
        assert!(!tm.can_render(&tex));
        assert_eq!(tm.num_unrenderable_textures(), 3);

        tm.set_level_info(&tex, gl::TEXTURE_2D, 1, rgba(2, 1));
        tm.set_level_info(&tex, gl::TEXTURE_2D, 2, rgba(1, 1));
        assert!(tex.borrow().texture_complete());
        assert!(tm.can_render(&tex));
        assert_eq!(tm.num_unrenderable_textures(), 2);
    }

    #[test]
    fn generated_mipmaps_complete_the_chain() {
        let mut tm = manager();
        let tex = tm.create_texture_info(1, 10);
        tm.set_info_target(&tex, gl::TEXTURE_2D);
        tm.set_level_info(&tex, gl::TEXTURE_2D, 0, rgba(8, 8));
        assert!(tm.can_generate_mipmaps(&tex));
        assert!(tm.mark_mipmaps_generated(&tex));
        assert!(tm.can_render(&tex));
        assert_eq!(tex.borrow().level_info(gl::TEXTURE_2D, 3).map(|l| l.width), Some(1));
    }

    #[test]
    fn npot_needs_clamp_and_no_mips_without_npot_support() {
        let mut tm = manager();
        let tex = tm.create_texture_info(1, 10);
        tm.set_info_target(&tex, gl::TEXTURE_2D);
        tm.set_level_info(&tex, gl::TEXTURE_2D, 0, rgba(3, 3));
        assert!(tex.borrow().npot());
        assert!(!tm.can_generate_mipmaps(&tex));
        tm.set_parameter(&tex, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32);
        assert!(!tm.can_render(&tex));
        tm.set_parameter(&tex, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
        tm.set_parameter(&tex, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);
        assert!(tm.can_render(&tex));
        assert!(!tm.set_parameter(&tex, gl::TEXTURE_WRAP_T, gl::LINEAR as i32));
    }

    #[test]
    fn float_textures_need_nearest_filtering() {
        let mut tm = manager();
        let tex = tm.create_texture_info(1, 10);
        tm.set_info_target(&tex, gl::TEXTURE_2D);
        let mut info = rgba(2, 2);
        info.ty = gl::FLOAT;
        tm.set_level_info(&tex, gl::TEXTURE_2D, 0, info);
        tm.set_parameter(&tex, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32);
        assert!(!tm.can_render(&tex));
        tm.set_parameter(&tex, gl::TEXTURE_MIN_FILTER, gl::NEAREST as i32);
        tm.set_parameter(&tex, gl::TEXTURE_MAG_FILTER, gl::NEAREST as i32);
        assert!(tm.can_render(&tex));
    }

    #[test]
    fn valid_for_target_checks_limits() {
        let tm = manager();
        assert_eq!(tm.max_levels_for_target(gl::TEXTURE_2D), 7);
        assert!(tm.valid_for_target(gl::TEXTURE_2D, 0, 64, 3, 1));
        assert!(!tm.valid_for_target(gl::TEXTURE_2D, 0, 65, 1, 1));
        assert!(!tm.valid_for_target(gl::TEXTURE_2D, 1, 3, 3, 1));
        assert!(!tm.valid_for_target(gl::TEXTURE_2D, 7, 1, 1, 1));
        assert!(!tm.valid_for_target(gl::TEXTURE_CUBE_MAP_POSITIVE_X, 0, 4, 2, 1));
    }

    #[test]
    fn deleting_an_unrenderable_texture_drops_the_count() {
        let mut tm = manager();
        tm.create_texture_info(1, 10);
        assert_eq!(tm.num_unrenderable_textures(), 3);
        let info = tm.remove_texture_info(1).unwrap();
        assert!(info.borrow().is_deleted());
        assert_eq!(tm.num_unrenderable_textures(), 2);
    }
}
