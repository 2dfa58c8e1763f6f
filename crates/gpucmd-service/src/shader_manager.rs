//! Shadow state for shader objects.
//!
//! Sources are kept here and only handed to the driver on `CompileShader`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use gpucmd_protocol::gl::GLenum;

use crate::gl::GlDriver;

#[derive(Debug)]
pub struct ShaderInfo {
    pub service_id: u32,
    pub shader_type: GLenum,
    pub source: Option<String>,
    pub compiled: bool,
    pub log: String,
}

pub type ShaderRef = Rc<RefCell<ShaderInfo>>;

#[derive(Debug, Default)]
pub struct ShaderManager {
    shaders: HashMap<u32, ShaderRef>,
}

impl ShaderManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_shader_info(&mut self, client_id: u32, service_id: u32, shader_type: GLenum) -> ShaderRef {
        let info = Rc::new(RefCell::new(ShaderInfo {
            service_id,
            shader_type,
            source: None,
            compiled: false,
            log: String::new(),
        }));
        self.shaders.insert(client_id, Rc::clone(&info));
        info
    }

    pub fn get_shader_info(&self, client_id: u32) -> Option<ShaderRef> {
        self.shaders.get(&client_id).cloned()
    }

    pub fn remove_shader_info(&mut self, client_id: u32) -> Option<ShaderRef> {
        self.shaders.remove(&client_id)
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        for (_, info) in self.shaders.drain() {
            gl.delete_shader(info.borrow().service_id);
        }
    }
}
