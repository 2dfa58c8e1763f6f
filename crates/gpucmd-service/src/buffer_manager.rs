//! Shadow state for buffer objects.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use gpucmd_protocol::gl::{self, GLenum};
use tracing::debug;

use crate::gl::GlDriver;

#[derive(Debug)]
pub struct BufferInfo {
    service_id: u32,
    size: Cell<u32>,
    /// `0` until first bound; a buffer never changes target afterwards.
    target: Cell<GLenum>,
    /// Copy of the data of element array buffers, for index range checks.
    shadow: RefCell<Vec<u8>>,
    deleted: Cell<bool>,
}

impl BufferInfo {
    fn new(service_id: u32) -> Self {
        Self {
            service_id,
            size: Cell::new(0),
            target: Cell::new(0),
            shadow: RefCell::new(Vec::new()),
            deleted: Cell::new(false),
        }
    }

    pub fn service_id(&self) -> u32 {
        self.service_id
    }

    pub fn size(&self) -> u32 {
        self.size.get()
    }

    pub fn target(&self) -> GLenum {
        self.target.get()
    }

    pub fn set_target(&self, target: GLenum) {
        self.target.set(target);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.get()
    }

    fn keeps_shadow(&self) -> bool {
        self.target.get() == gl::ELEMENT_ARRAY_BUFFER
    }

    /// Records a full upload of `size` bytes; `data` of `None` zero-fills.
    pub fn set_data(&self, size: u32, data: Option<&[u8]>) {
        self.size.set(size);
        let mut shadow = self.shadow.borrow_mut();
        shadow.clear();
        if self.keeps_shadow() {
            match data {
                Some(data) => shadow.extend_from_slice(data),
                None => shadow.resize(size as usize, 0),
            }
        }
    }

    /// Fails when the range leaves the buffer.
    pub fn set_sub_data(&self, offset: u32, data: &[u8]) -> bool {
        let Some(end) = u32::try_from(data.len()).ok().and_then(|n| offset.checked_add(n)) else {
            return false;
        };
        if end > self.size.get() {
            return false;
        }
        if self.keeps_shadow() {
            let mut shadow = self.shadow.borrow_mut();
            if let Some(dst) = shadow.get_mut(offset as usize..end as usize) {
                dst.copy_from_slice(data);
            }
        }
        true
    }

    /// Largest index among `count` indices of type `ty` starting at byte
    /// `offset`. `None` when the range is misaligned or leaves the buffer.
    pub fn max_value_for_range(&self, offset: u32, count: u32, ty: GLenum) -> Option<u32> {
        let width: u32 = match ty {
            gl::UNSIGNED_BYTE => 1,
            gl::UNSIGNED_SHORT => 2,
            _ => return None,
        };
        if offset % width != 0 {
            return None;
        }
        let end = offset.checked_add(count.checked_mul(width)?)?;
        if end > self.size.get() {
            return None;
        }
        let shadow = self.shadow.borrow();
        let bytes = shadow.get(offset as usize..end as usize)?;
        let max = match width {
            1 => bytes.iter().map(|&b| u32::from(b)).max(),
            _ => bytes
                .chunks_exact(2)
                .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
                .max(),
        };
        Some(max.unwrap_or(0))
    }
}

#[derive(Debug, Default)]
pub struct BufferManager {
    buffers: HashMap<u32, Rc<BufferInfo>>,
}

impl BufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_buffer_info(&mut self, client_id: u32, service_id: u32) -> Rc<BufferInfo> {
        let info = Rc::new(BufferInfo::new(service_id));
        self.buffers.insert(client_id, Rc::clone(&info));
        info
    }

    pub fn get_buffer_info(&self, client_id: u32) -> Option<Rc<BufferInfo>> {
        self.buffers.get(&client_id).cloned()
    }

    /// Forgets the buffer and flags any outstanding handle as deleted.
    pub fn remove_buffer_info(&mut self, client_id: u32) -> Option<Rc<BufferInfo>> {
        let info = self.buffers.remove(&client_id)?;
        info.deleted.set(true);
        Some(info)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Deletes every driver object still tracked.
    pub fn destroy(&mut self, gl: &dyn GlDriver) {
        debug!(count = self.buffers.len(), "destroying buffers");
        for (_, info) in self.buffers.drain() {
            info.deleted.set(true);
            gl.delete_buffer(info.service_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element_buffer(data: &[u8]) -> BufferInfo {
        let info = BufferInfo::new(1);
        info.set_target(gl::ELEMENT_ARRAY_BUFFER);
        info.set_data(data.len() as u32, Some(data));
        info
    }

    #[test]
    fn max_value_reads_the_shadow() {
        let info = element_buffer(&[1, 0, 9, 0, 4, 0, 2, 0]);
        assert_eq!(info.max_value_for_range(0, 4, gl::UNSIGNED_SHORT), Some(9));
        assert_eq!(info.max_value_for_range(4, 2, gl::UNSIGNED_SHORT), Some(4));
        assert_eq!(info.max_value_for_range(0, 8, gl::UNSIGNED_BYTE), Some(9));
        assert_eq!(info.max_value_for_range(0, 0, gl::UNSIGNED_SHORT), Some(0));
    }

    #[test]
    fn max_value_rejects_bad_ranges() {
        let info = element_buffer(&[0; 8]);
        assert_eq!(info.max_value_for_range(1, 1, gl::UNSIGNED_SHORT), None);
        assert_eq!(info.max_value_for_range(4, 3, gl::UNSIGNED_SHORT), None);
        assert_eq!(info.max_value_for_range(0, 1, gl::FLOAT), None);
        assert_eq!(info.max_value_for_range(u32::MAX - 1, 2, gl::UNSIGNED_SHORT), None);
    }

    #[test]
    fn sub_data_updates_shadow_within_bounds() {
        let info = element_buffer(&[0; 4]);
        assert!(info.set_sub_data(2, &[7, 0]));
        assert!(!info.set_sub_data(3, &[1, 1]));
        assert_eq!(info.max_value_for_range(0, 2, gl::UNSIGNED_SHORT), Some(7));
    }

    #[test]
    fn remove_marks_outstanding_handles_deleted() {
        let mut manager = BufferManager::new();
        let info = manager.create_buffer_info(5, 50);
        assert!(manager.remove_buffer_info(5).is_some());
        assert!(info.is_deleted());
        assert!(manager.get_buffer_info(5).is_none());
    }
}
