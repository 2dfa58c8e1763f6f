//! Shadow state for program objects.
//!
//! A [`ProgramRecord`] exists from `CreateProgram` until deletion. Its
//! [`ProgramInfo`] (the attribute and uniform tables) only exists while the
//! last link succeeded.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::gl_utils::is_sampler_type;
use tracing::debug;

use crate::gl::GlDriver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttribInfo {
    pub name: String,
    pub size: i32,
    pub ty: GLenum,
    pub location: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformInfo {
    /// Name as reported by the driver, `[0]` included for arrays.
    pub name: String,
    pub size: i32,
    pub ty: GLenum,
    pub is_array: bool,
    /// Driver location of each element; `-1` for elements the driver dropped.
    pub element_locations: Vec<i32>,
    /// Texture unit of each element; samplers only.
    pub texture_units: Vec<i32>,
}

impl UniformInfo {
    fn base_name(&self) -> &str {
        if self.is_array {
            self.name.strip_suffix("[0]").unwrap_or(&self.name)
        } else {
            &self.name
        }
    }
}

/// Tables of a successfully linked program.
#[derive(Debug, Clone, Default)]
pub struct ProgramInfo {
    attribs: Vec<AttribInfo>,
    uniforms: Vec<UniformInfo>,
    sampler_indices: Vec<usize>,
    attrib_location_to_index: HashMap<i32, usize>,
    /// Element location → (uniform index, element index).
    uniform_location_to_index: HashMap<i32, (usize, usize)>,
    max_attrib_name_length: i32,
    max_uniform_name_length: i32,
}

/// Names starting with `gl_` are built-ins and never exposed to clients.
fn is_builtin(name: &str) -> bool {
    name.starts_with("gl_")
}

impl ProgramInfo {
    /// Reads the tables of a linked program back from the driver.
    pub fn from_driver(gl: &dyn GlDriver, service_id: u32) -> Self {
        let mut info = ProgramInfo::default();

        for attrib in gl.get_active_attribs(service_id) {
            if is_builtin(&attrib.name) {
                continue;
            }
            let location = gl.get_attrib_location(service_id, &attrib.name);
            info.max_attrib_name_length = info.max_attrib_name_length.max(attrib.name.len() as i32 + 1);
            info.attrib_location_to_index.insert(location, info.attribs.len());
            info.attribs.push(AttribInfo {
                name: attrib.name,
                size: attrib.size,
                ty: attrib.ty,
                location,
            });
        }

        for uniform in gl.get_active_uniforms(service_id) {
            if is_builtin(&uniform.name) {
                continue;
            }
            let is_array = uniform.name.ends_with("[0]");
            let element_locations: Vec<i32> = if is_array {
                let base = uniform.name.trim_end_matches("[0]");
                (0..uniform.size)
                    .map(|i| gl.get_uniform_location(service_id, &format!("{base}[{i}]")))
                    .collect()
            } else {
                vec![gl.get_uniform_location(service_id, &uniform.name)]
            };
            let index = info.uniforms.len();
            for (element, &location) in element_locations.iter().enumerate() {
                if location != -1 {
                    info.uniform_location_to_index.insert(location, (index, element));
                }
            }
            let sampler = is_sampler_type(uniform.ty);
            if sampler {
                info.sampler_indices.push(index);
            }
            info.max_uniform_name_length = info.max_uniform_name_length.max(uniform.name.len() as i32 + 1);
            info.uniforms.push(UniformInfo {
                texture_units: if sampler { vec![0; element_locations.len()] } else { Vec::new() },
                name: uniform.name,
                size: uniform.size,
                ty: uniform.ty,
                is_array,
                element_locations,
            });
        }
        info
    }

    pub fn attribs(&self) -> &[AttribInfo] {
        &self.attribs
    }

    pub fn uniforms(&self) -> &[UniformInfo] {
        &self.uniforms
    }

    pub fn attrib_info_by_location(&self, location: i32) -> Option<&AttribInfo> {
        self.attrib_location_to_index
            .get(&location)
            .and_then(|&i| self.attribs.get(i))
    }

    pub fn get_attrib_location(&self, name: &str) -> i32 {
        self.attribs
            .iter()
            .find(|a| a.name == name)
            .map_or(-1, |a| a.location)
    }

    /// Accepts `name`, and for arrays also `name[i]`.
    pub fn get_uniform_location(&self, name: &str) -> i32 {
        for uniform in &self.uniforms {
            if uniform.name == name || uniform.base_name() == name {
                return uniform.element_locations.first().copied().unwrap_or(-1);
            }
        }
        let Some((base, index)) = name.strip_suffix(']').and_then(|n| n.rsplit_once('[')) else {
            return -1;
        };
        let Ok(index) = index.parse::<usize>() else {
            return -1;
        };
        self.uniforms
            .iter()
            .find(|u| u.is_array && u.base_name() == base)
            .and_then(|u| u.element_locations.get(index).copied())
            .unwrap_or(-1)
    }

    pub fn uniform_by_location(&self, location: i32) -> Option<(&UniformInfo, usize)> {
        let &(index, element) = self.uniform_location_to_index.get(&location)?;
        self.uniforms.get(index).map(|u| (u, element))
    }

    pub fn get_uniform_type_by_location(&self, location: i32) -> Option<GLenum> {
        self.uniform_by_location(location).map(|(u, _)| u.ty)
    }

    /// Records texture unit assignments for a sampler uniform. Fails when a
    /// unit is out of range; locations that are not samplers are ignored.
    pub fn set_samplers(&mut self, location: i32, values: &[i32], num_texture_units: u32) -> bool {
        let Some(&(index, element)) = self.uniform_location_to_index.get(&location) else {
            return true;
        };
        let uniform = &mut self.uniforms[index];
        if !is_sampler_type(uniform.ty) {
            return true;
        }
        if values.iter().any(|&v| v < 0 || v as u32 >= num_texture_units) {
            return false;
        }
        for (unit, &value) in uniform.texture_units.iter_mut().skip(element).zip(values) {
            *unit = value;
        }
        true
    }

    /// Sampler uniforms, in declaration order.
    pub fn samplers(&self) -> impl Iterator<Item = &UniformInfo> + '_ {
        self.sampler_indices.iter().filter_map(|&i| self.uniforms.get(i))
    }

    pub fn max_attrib_name_length(&self) -> i32 {
        self.max_attrib_name_length
    }

    pub fn max_uniform_name_length(&self) -> i32 {
        self.max_uniform_name_length
    }
}

#[derive(Debug)]
pub struct ProgramRecord {
    pub service_id: u32,
    /// `(client shader id, shader type)` of attached shaders.
    pub attached_shaders: Vec<(u32, GLenum)>,
    pub link_status: bool,
    pub log: String,
    pub deleted: bool,
    pub info: Option<ProgramInfo>,
}

pub type ProgramRef = Rc<RefCell<ProgramRecord>>;

impl ProgramRecord {
    fn new(service_id: u32) -> Self {
        Self {
            service_id,
            attached_shaders: Vec::new(),
            link_status: false,
            log: String::new(),
            deleted: false,
            info: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.info.is_some()
    }

    pub fn is_attached(&self, shader: u32) -> bool {
        self.attached_shaders.iter().any(|&(id, _)| id == shader)
    }

    pub fn has_shader_of_type(&self, ty: GLenum) -> bool {
        self.attached_shaders.iter().any(|&(_, t)| t == ty)
    }

    /// Refreshes link status, log and tables after a driver link.
    pub fn update_after_link(&mut self, gl: &dyn GlDriver) {
        self.link_status = gl.get_programiv(self.service_id, gl::LINK_STATUS) != 0;
        self.log = gl.get_program_info_log(self.service_id);
        self.info = self
            .link_status
            .then(|| ProgramInfo::from_driver(gl, self.service_id));
        debug!(program = self.service_id, linked = self.link_status, "program linked");
    }

    /// Answers for `GetProgramiv`. `pname` must already be validated.
    pub fn get_programiv(&self, pname: GLenum) -> i32 {
        let info = self.info.as_ref();
        match pname {
            gl::DELETE_STATUS => i32::from(self.deleted),
            gl::LINK_STATUS | gl::VALIDATE_STATUS => i32::from(self.link_status),
            gl::INFO_LOG_LENGTH if self.log.is_empty() => 0,
            gl::INFO_LOG_LENGTH => self.log.len() as i32 + 1,
            gl::ATTACHED_SHADERS => self.attached_shaders.len() as i32,
            gl::ACTIVE_ATTRIBUTES => info.map_or(0, |i| i.attribs.len() as i32),
            gl::ACTIVE_ATTRIBUTE_MAX_LENGTH => info.map_or(0, |i| i.max_attrib_name_length),
            gl::ACTIVE_UNIFORMS => info.map_or(0, |i| i.uniforms.len() as i32),
            gl::ACTIVE_UNIFORM_MAX_LENGTH => info.map_or(0, |i| i.max_uniform_name_length),
            _ => 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct ProgramManager {
    programs: HashMap<u32, ProgramRef>,
}

impl ProgramManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_program_info(&mut self, client_id: u32, service_id: u32) -> ProgramRef {
        let record = Rc::new(RefCell::new(ProgramRecord::new(service_id)));
        self.programs.insert(client_id, Rc::clone(&record));
        record
    }

    pub fn get_program_info(&self, client_id: u32) -> Option<ProgramRef> {
        self.programs.get(&client_id).cloned()
    }

    pub fn remove_program_info(&mut self, client_id: u32) -> Option<ProgramRef> {
        let record = self.programs.remove(&client_id)?;
        record.borrow_mut().deleted = true;
        Some(record)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        for (_, record) in self.programs.drain() {
            let mut record = record.borrow_mut();
            record.deleted = true;
            gl.delete_program(record.service_id);
        }
    }
}
