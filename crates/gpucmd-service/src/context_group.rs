//! Share group: the objects and limits several contexts have in common.
//!
//! Decoders of one group hold `Rc` handles to the same [`ContextGroup`] and
//! register their driver context with it; the group's driver objects are
//! released by whichever decoder tears down the last registered context.

use std::cell::RefCell;
use std::rc::Rc;

use gpucmd_protocol::gl;
use tracing::{debug, warn};

use crate::buffer_manager::BufferManager;
use crate::config::ContextGroupConfig;
use crate::gl::GlDriver;
use crate::id_map::ResourceIds;
use crate::program_manager::ProgramManager;
use crate::shader_manager::ShaderManager;
use crate::texture_manager::{TextureFeatures, TextureManager};

pub type ContextGroupRef = Rc<RefCell<ContextGroup>>;

#[derive(Debug)]
pub struct ContextGroup {
    initialized: bool,
    /// Driver contexts created by decoders of this group and not yet torn down.
    contexts: u32,
    max_vertex_attribs: u32,
    max_texture_units: u32,
    pub ids: ResourceIds,
    pub buffer_manager: BufferManager,
    pub texture_manager: TextureManager,
    pub shader_manager: ShaderManager,
    pub program_manager: ProgramManager,
}

impl Default for ContextGroup {
    fn default() -> Self {
        Self {
            initialized: false,
            contexts: 0,
            max_vertex_attribs: 0,
            max_texture_units: 0,
            ids: ResourceIds::new(),
            buffer_manager: BufferManager::new(),
            texture_manager: TextureManager::new(TextureFeatures::default(), 1, 1),
            shader_manager: ShaderManager::new(),
            program_manager: ProgramManager::new(),
        }
    }
}

impl ContextGroup {
    pub fn new_ref() -> ContextGroupRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn add_context(&mut self) {
        self.contexts += 1;
    }

    /// Returns whether that was the last context of the group.
    pub fn remove_context(&mut self) -> bool {
        self.contexts = self.contexts.saturating_sub(1);
        self.contexts == 0
    }

    pub fn context_count(&self) -> u32 {
        self.contexts
    }

    /// Queries limits and features once; later calls are no-ops. Needs a
    /// current context.
    pub fn initialize(&mut self, gl: &dyn GlDriver, config: &ContextGroupConfig) -> bool {
        if self.initialized {
            return true;
        }
        let query = |pname| u32::try_from(gl.get_integer(pname)).unwrap_or(0);
        self.max_vertex_attribs = config
            .max_vertex_attribs_override
            .unwrap_or_else(|| query(gl::MAX_VERTEX_ATTRIBS));
        self.max_texture_units = config
            .max_texture_units_override
            .unwrap_or_else(|| query(gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS));
        let max_texture_size = gl.get_integer(gl::MAX_TEXTURE_SIZE);
        let max_cube_map_texture_size = gl.get_integer(gl::MAX_CUBE_MAP_TEXTURE_SIZE);

        if self.max_vertex_attribs == 0 || self.max_texture_units == 0 || max_texture_size <= 0 {
            warn!(
                vertex_attribs = self.max_vertex_attribs,
                texture_units = self.max_texture_units,
                texture_size = max_texture_size,
                "driver reported unusable limits"
            );
            return false;
        }

        let extensions = gl.get_string(gl::EXTENSIONS);
        let has = |name: &str| extensions.split_whitespace().any(|e| e == name);
        let features = TextureFeatures {
            npot_ok: config.allow_npot.unwrap_or_else(|| has("GL_OES_texture_npot")),
            float_linear: has("GL_OES_texture_float_linear"),
            half_float_linear: has("GL_OES_texture_half_float_linear"),
        };
        self.texture_manager = TextureManager::new(features, max_texture_size, max_cube_map_texture_size);
        self.initialized = true;
        debug!(
            vertex_attribs = self.max_vertex_attribs,
            texture_units = self.max_texture_units,
            npot = features.npot_ok,
            "context group initialized"
        );
        true
    }

    pub fn max_vertex_attribs(&self) -> u32 {
        self.max_vertex_attribs
    }

    pub fn max_texture_units(&self) -> u32 {
        self.max_texture_units
    }

    /// Deletes every driver object of the group. Needs a current context.
    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        self.buffer_manager.destroy(gl);
        self.texture_manager.destroy(gl);
        self.program_manager.destroy(gl);
        self.shader_manager.destroy(gl);
        for (_, service_id) in self.ids.framebuffers.pairs() {
            gl.delete_framebuffer(service_id);
        }
        for (_, service_id) in self.ids.renderbuffers.pairs() {
            gl.delete_renderbuffer(service_id);
        }
        self.ids = ResourceIds::new();
        debug!("context group destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft_gl::SoftGl;

    #[test]
    fn overrides_win_over_driver_limits() {
        let gl = SoftGl::new();
        let mut group = ContextGroup::default();
        let config = ContextGroupConfig {
            max_vertex_attribs_override: Some(4),
            allow_npot: Some(false),
            ..ContextGroupConfig::default()
        };
        assert!(group.initialize(&gl, &config));
        assert_eq!(group.max_vertex_attribs(), 4);
        assert_eq!(group.max_texture_units(), 16);
        assert!(!group.texture_manager.features().npot_ok);
    }

    #[test]
    fn destroy_releases_driver_objects() {
        let gl = SoftGl::new();
        let mut group = ContextGroup::default();
        assert!(group.initialize(&gl, &ContextGroupConfig::default()));
        assert!(group.texture_manager.features().npot_ok);
        let service = gl.gen_buffer();
        group.ids.buffers.add_mapping(1, service);
        group.buffer_manager.create_buffer_info(1, service);
        group.destroy(&gl);
        assert_eq!(gl.live_buffers(), 0);
        assert!(group.ids.buffers.is_empty());
    }

    #[test]
    fn only_the_last_context_is_reported() {
        let mut group = ContextGroup::default();
        group.add_context();
        group.add_context();
        assert!(!group.remove_context());
        assert_eq!(group.context_count(), 1);
        assert!(group.remove_context());
    }

    #[test]
    fn zero_limits_fail_initialization() {
        let gl = SoftGl::new();
        gl.set_limit(gl::MAX_VERTEX_ATTRIBS, 0);
        let mut group = ContextGroup::default();
        assert!(!group.initialize(&gl, &ContextGroupConfig::default()));
        assert!(!group.is_initialized());
    }
}
