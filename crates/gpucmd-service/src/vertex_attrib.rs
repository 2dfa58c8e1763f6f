//! Vertex attribute state of one context.

use std::rc::Rc;

use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::gl_utils::type_size;

use crate::buffer_manager::BufferInfo;

#[derive(Debug, Clone)]
pub struct VertexAttribInfo {
    index: u32,
    enabled: bool,
    size: i32,
    ty: GLenum,
    normalized: bool,
    /// As given by the client; `0` means tightly packed.
    gl_stride: i32,
    real_stride: u32,
    offset: u32,
    buffer: Option<Rc<BufferInfo>>,
}

impl VertexAttribInfo {
    fn new(index: u32) -> Self {
        Self {
            index,
            enabled: false,
            size: 4,
            ty: gl::FLOAT,
            normalized: false,
            gl_stride: 0,
            real_stride: 16,
            offset: 0,
            buffer: None,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn ty(&self) -> GLenum {
        self.ty
    }

    pub fn normalized(&self) -> bool {
        self.normalized
    }

    pub fn gl_stride(&self) -> i32 {
        self.gl_stride
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn buffer(&self) -> Option<&Rc<BufferInfo>> {
        self.buffer.as_ref()
    }

    pub fn has_live_buffer(&self) -> bool {
        self.buffer.as_ref().is_some_and(|b| !b.is_deleted())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_info(
        &mut self,
        buffer: Option<Rc<BufferInfo>>,
        size: i32,
        ty: GLenum,
        normalized: bool,
        gl_stride: i32,
        offset: u32,
    ) {
        let element_size = type_size(ty) * size.max(0) as u32;
        self.buffer = buffer;
        self.size = size;
        self.ty = ty;
        self.normalized = normalized;
        self.gl_stride = gl_stride;
        self.real_stride = if gl_stride > 0 { gl_stride as u32 } else { element_size };
        self.offset = offset;
    }

    /// Whether vertex `index` can be fetched. Disabled attributes never
    /// fetch from their buffer and always pass.
    pub fn can_access(&self, index: u32) -> bool {
        if !self.enabled {
            return true;
        }
        if !self.has_live_buffer() {
            return false;
        }
        let buffer_size = self.buffer.as_ref().map_or(0, |b| b.size());
        if self.offset > buffer_size || self.real_stride == 0 {
            return false;
        }
        let usable = buffer_size - self.offset;
        let element_size = type_size(self.ty) * self.size.max(0) as u32;
        let num_elements = usable / self.real_stride + u32::from(usable % self.real_stride >= element_size);
        index < num_elements
    }
}

#[derive(Debug)]
pub struct VertexAttribManager {
    attribs: Vec<VertexAttribInfo>,
}

impl VertexAttribManager {
    pub fn new(max_vertex_attribs: u32) -> Self {
        Self {
            attribs: (0..max_vertex_attribs).map(VertexAttribInfo::new).collect(),
        }
    }

    pub fn max_vertex_attribs(&self) -> u32 {
        self.attribs.len() as u32
    }

    pub fn get(&self, index: u32) -> Option<&VertexAttribInfo> {
        self.attribs.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u32) -> Option<&mut VertexAttribInfo> {
        self.attribs.get_mut(index as usize)
    }

    /// Fails for an index past the attribute count.
    pub fn enable(&mut self, index: u32, enable: bool) -> bool {
        match self.attribs.get_mut(index as usize) {
            Some(attrib) => {
                attrib.enabled = enable;
                true
            }
            None => false,
        }
    }

    pub fn enabled_attribs(&self) -> impl Iterator<Item = &VertexAttribInfo> + '_ {
        self.attribs.iter().filter(|a| a.enabled)
    }

    /// Drops every reference to `buffer`.
    pub fn unbind_buffer(&mut self, buffer: &Rc<BufferInfo>) {
        for attrib in &mut self.attribs {
            if attrib.buffer.as_ref().is_some_and(|b| Rc::ptr_eq(b, buffer)) {
                attrib.buffer = None;
            }
        }
    }
}
