//! Buffers, framebuffers and renderbuffers.

use std::collections::HashSet;
use std::rc::Rc;

use gpucmd_protocol::gl::{self, GLenum};
use gpucmd_protocol::gl_utils::validate;
use gpucmd_protocol::CbError;

use super::{CmdResult, Gles2Decoder};
use crate::buffer_manager::BufferInfo;
use crate::id_map::{IdMap, ResourceKind};
use crate::surface::PlatformSurface;

/// Ids handed to a `Gen*` command must be non-zero, distinct and unused.
pub(super) fn check_new_ids(map: &IdMap, ids: &[u32]) -> CmdResult {
    let mut seen = HashSet::with_capacity(ids.len());
    for &id in ids {
        if id == 0 || map.contains_client_id(id) || !seen.insert(id) {
            return Err(CbError::InvalidArguments);
        }
    }
    Ok(())
}

impl<S: PlatformSurface> Gles2Decoder<S> {
    pub(super) fn do_gen_buffers(&mut self, ids: &[u32]) -> CmdResult {
        let mut group = self.group.borrow_mut();
        check_new_ids(&group.ids.buffers, ids)?;
        for &client_id in ids {
            let service_id = self.gl.gen_buffer();
            group.ids.buffers.add_mapping(client_id, service_id);
            group.buffer_manager.create_buffer_info(client_id, service_id);
        }
        Ok(())
    }

    pub(super) fn do_delete_buffers(&mut self, ids: &[u32]) -> CmdResult {
        for &client_id in ids {
            let removed = {
                let mut group = self.group.borrow_mut();
                let Some(service_id) = group.ids.buffers.get_service_id(client_id) else {
                    continue;
                };
                group.ids.buffers.remove_mapping(client_id, service_id);
                self.gl.delete_buffer(service_id);
                group.buffer_manager.remove_buffer_info(client_id)
            };
            let Some(buffer) = removed else {
                continue;
            };
            self.vertex_attribs.unbind_buffer(&buffer);
            if self.bound_array_buffer.as_ref().is_some_and(|b| Rc::ptr_eq(b, &buffer)) {
                self.bound_array_buffer = None;
            }
            if self
                .bound_element_array_buffer
                .as_ref()
                .is_some_and(|b| Rc::ptr_eq(b, &buffer))
            {
                self.bound_element_array_buffer = None;
            }
        }
        Ok(())
    }

    pub(super) fn do_bind_buffer(&mut self, target: GLenum, client_id: u32) -> CmdResult {
        if !validate::buffer_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "BindBuffer: target");
        }
        let buffer = if client_id == 0 {
            None
        } else {
            let buffer = self.group.borrow().buffer_manager.get_buffer_info(client_id);
            let Some(buffer) = buffer else {
                return self.gl_error(gl::INVALID_VALUE, "BindBuffer: unknown buffer");
            };
            if buffer.target() != 0 && buffer.target() != target {
                return self.gl_error(gl::INVALID_OPERATION, "BindBuffer: buffer bound to another target");
            }
            buffer.set_target(target);
            Some(buffer)
        };
        self.gl.bind_buffer(target, buffer.as_ref().map_or(0, |b| b.service_id()));
        if target == gl::ARRAY_BUFFER {
            self.bound_array_buffer = buffer;
        } else {
            self.bound_element_array_buffer = buffer;
        }
        Ok(())
    }

    fn bound_buffer(&self, target: GLenum) -> Option<Rc<BufferInfo>> {
        if target == gl::ARRAY_BUFFER {
            self.bound_array_buffer.clone()
        } else {
            self.bound_element_array_buffer.clone()
        }
    }

    pub(super) fn do_buffer_data(&mut self, target: GLenum, size: i32, data: Option<&[u8]>, usage: GLenum) -> CmdResult {
        if !validate::buffer_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "BufferData: target");
        }
        if !validate::buffer_usage(usage) {
            return self.gl_error(gl::INVALID_ENUM, "BufferData: usage");
        }
        if size < 0 {
            return self.gl_error(gl::INVALID_VALUE, "BufferData: size < 0");
        }
        let Some(buffer) = self.bound_buffer(target) else {
            return self.gl_error(gl::INVALID_VALUE, "BufferData: no buffer bound");
        };
        self.copy_real_gl_errors();
        self.gl.buffer_data(target, size as u32, data, usage);
        let error = self.gl.get_error();
        if error != gl::NO_ERROR {
            return self.gl_error(error, "BufferData: driver");
        }
        buffer.set_data(size as u32, data);
        Ok(())
    }

    pub(super) fn do_buffer_sub_data(&mut self, target: GLenum, offset: i32, data: &[u8]) -> CmdResult {
        if !validate::buffer_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "BufferSubData: target");
        }
        let Some(buffer) = self.bound_buffer(target) else {
            return self.gl_error(gl::INVALID_VALUE, "BufferSubData: no buffer bound");
        };
        if offset < 0 || !buffer.set_sub_data(offset as u32, data) {
            return self.gl_error(gl::INVALID_VALUE, "BufferSubData: out of range");
        }
        self.gl.buffer_sub_data(target, offset as u32, data);
        Ok(())
    }

    pub(super) fn do_gen_framebuffers(&mut self, ids: &[u32]) -> CmdResult {
        self.gen_plain_objects(ResourceKind::Framebuffer, ids)
    }

    pub(super) fn do_gen_renderbuffers(&mut self, ids: &[u32]) -> CmdResult {
        self.gen_plain_objects(ResourceKind::Renderbuffer, ids)
    }

    /// Objects tracked by id alone.
    fn gen_plain_objects(&mut self, kind: ResourceKind, ids: &[u32]) -> CmdResult {
        let mut group = self.group.borrow_mut();
        check_new_ids(group.ids.map(kind), ids)?;
        for &client_id in ids {
            let service_id = match kind {
                ResourceKind::Framebuffer => self.gl.gen_framebuffer(),
                _ => self.gl.gen_renderbuffer(),
            };
            group.ids.map_mut(kind).add_mapping(client_id, service_id);
        }
        Ok(())
    }

    pub(super) fn do_delete_framebuffers(&mut self, ids: &[u32]) -> CmdResult {
        for &client_id in ids {
            let Some(service_id) = self.group.borrow().ids.framebuffers.get_service_id(client_id) else {
                continue;
            };
            self.group
                .borrow_mut()
                .ids
                .framebuffers
                .remove_mapping(client_id, service_id);
            self.gl.delete_framebuffer(service_id);
            if self.bound_framebuffer == service_id {
                self.bound_framebuffer = 0;
                self.gl.bind_framebuffer(gl::FRAMEBUFFER, self.framebuffer_service_id());
            }
        }
        Ok(())
    }

    pub(super) fn do_delete_renderbuffers(&mut self, ids: &[u32]) -> CmdResult {
        for &client_id in ids {
            let Some(service_id) = self.group.borrow().ids.renderbuffers.get_service_id(client_id) else {
                continue;
            };
            self.group
                .borrow_mut()
                .ids
                .renderbuffers
                .remove_mapping(client_id, service_id);
            self.gl.delete_renderbuffer(service_id);
            if self.bound_renderbuffer == service_id {
                self.bound_renderbuffer = 0;
            }
        }
        Ok(())
    }

    pub(super) fn do_bind_framebuffer(&mut self, target: GLenum, client_id: u32) -> CmdResult {
        if !validate::framebuffer_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "BindFramebuffer: target");
        }
        let service_id = if client_id == 0 {
            0
        } else {
            let service_id = self.group.borrow().ids.framebuffers.get_service_id(client_id);
            match service_id {
                Some(id) => id,
                None => return self.gl_error(gl::INVALID_VALUE, "BindFramebuffer: unknown framebuffer"),
            }
        };
        self.bound_framebuffer = service_id;
        self.gl.bind_framebuffer(target, self.framebuffer_service_id());
        Ok(())
    }

    pub(super) fn do_bind_renderbuffer(&mut self, target: GLenum, client_id: u32) -> CmdResult {
        if !validate::renderbuffer_target(target) {
            return self.gl_error(gl::INVALID_ENUM, "BindRenderbuffer: target");
        }
        let service_id = if client_id == 0 {
            0
        } else {
            let service_id = self.group.borrow().ids.renderbuffers.get_service_id(client_id);
            match service_id {
                Some(id) => id,
                None => return self.gl_error(gl::INVALID_VALUE, "BindRenderbuffer: unknown renderbuffer"),
            }
        };
        self.bound_renderbuffer = service_id;
        self.gl.bind_renderbuffer(target, service_id);
        Ok(())
    }
}
