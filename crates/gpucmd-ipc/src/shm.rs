//! Shared region registry.
//!
//! Stands in for the platform's shared-memory mapping service: a region is
//! created once, named by a small integer handle, and opened by any party
//! holding the registry. Both sides may write a region at any time, so every
//! read is a single bounded copy that callers validate afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::debug;

/// Largest region the registry hands out.
pub const MAX_REGION_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShmHandle(pub u32);

impl ShmHandle {
    /// Never names a region.
    pub const INVALID: ShmHandle = ShmHandle(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShmError {
    #[error("shared region size {0} is invalid")]
    InvalidSize(usize),
    #[error("no shared region with handle {0}")]
    UnknownHandle(u32),
    #[error("access at {offset}+{len} outside region of {size} bytes")]
    OutOfBounds { offset: usize, len: usize, size: usize },
}

pub struct SharedRegion {
    handle: ShmHandle,
    bytes: Mutex<Box<[u8]>>,
    len: usize,
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("handle", &self.handle)
            .field("len", &self.len)
            .finish()
    }
}

impl SharedRegion {
    fn new(handle: ShmHandle, len: usize) -> Self {
        Self {
            handle,
            bytes: Mutex::new(vec![0u8; len].into_boxed_slice()),
            len,
        }
    }

    pub fn handle(&self) -> ShmHandle {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), ShmError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(ShmError::OutOfBounds {
                offset,
                len,
                size: self.len,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.bytes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copies `len` bytes starting at `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, ShmError> {
        self.check(offset, len)?;
        Ok(self.lock()[offset..offset + len].to_vec())
    }

    pub fn read_into(&self, offset: usize, out: &mut [u8]) -> Result<(), ShmError> {
        self.check(offset, out.len())?;
        out.copy_from_slice(&self.lock()[offset..offset + out.len()]);
        Ok(())
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), ShmError> {
        self.check(offset, data.len())?;
        self.lock()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32, ShmError> {
        let mut b = [0u8; 4];
        self.read_into(offset, &mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn write_u32(&self, offset: usize, v: u32) -> Result<(), ShmError> {
        self.write(offset, &v.to_le_bytes())
    }

    /// Copies `count` little-endian words starting at byte `offset`.
    pub fn read_words(&self, offset: usize, count: usize) -> Result<Vec<u32>, ShmError> {
        let len = count.checked_mul(4).ok_or(ShmError::OutOfBounds {
            offset,
            len: usize::MAX,
            size: self.len,
        })?;
        let bytes = self.read(offset, len)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn write_words(&self, offset: usize, words: &[u32]) -> Result<(), ShmError> {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write(offset, &bytes)
    }
}

#[derive(Default)]
struct RegistryInner {
    next_handle: u32,
    regions: HashMap<ShmHandle, Arc<SharedRegion>>,
}

/// Process-pair wide table of shared regions. Cloning shares the table.
#[derive(Clone, Default)]
pub struct SharedMemoryRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SharedMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(&self, size: usize) -> Result<ShmHandle, ShmError> {
        if size == 0 || size > MAX_REGION_BYTES {
            return Err(ShmError::InvalidSize(size));
        }
        let mut inner = self.lock();
        inner.next_handle += 1;
        let handle = ShmHandle(inner.next_handle);
        inner
            .regions
            .insert(handle, Arc::new(SharedRegion::new(handle, size)));
        debug!(handle = handle.0, size, "created shared region");
        Ok(handle)
    }

    pub fn open(&self, handle: ShmHandle) -> Result<Arc<SharedRegion>, ShmError> {
        self.lock()
            .regions
            .get(&handle)
            .cloned()
            .ok_or(ShmError::UnknownHandle(handle.0))
    }

    /// Removes the name. Parties that already opened the region keep their
    /// mapping.
    pub fn close(&self, handle: ShmHandle) -> Result<(), ShmError> {
        self.lock()
            .regions
            .remove(&handle)
            .map(|_| ())
            .ok_or(ShmError::UnknownHandle(handle.0))
    }

    pub fn len(&self) -> usize {
        self.lock().regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_open_close() {
        let reg = SharedMemoryRegistry::new();
        let h = reg.create(64).unwrap();
        assert!(h.is_valid());
        let a = reg.open(h).unwrap();
        let b = reg.open(h).unwrap();
        a.write_u32(60, 0xdead_beef).unwrap();
        assert_eq!(b.read_u32(60).unwrap(), 0xdead_beef);

        reg.close(h).unwrap();
        assert_eq!(reg.open(h).unwrap_err(), ShmError::UnknownHandle(h.0));
        // Existing mappings survive.
        assert_eq!(a.read_u32(60).unwrap(), 0xdead_beef);
    }

    #[test]
    fn accesses_are_bounded() {
        let reg = SharedMemoryRegistry::new();
        let region = reg.open(reg.create(8).unwrap()).unwrap();
        assert!(region.read(4, 4).is_ok());
        assert!(matches!(region.read(5, 4), Err(ShmError::OutOfBounds { .. })));
        assert!(matches!(region.read(usize::MAX, 2), Err(ShmError::OutOfBounds { .. })));
        assert!(matches!(region.read_words(0, usize::MAX), Err(ShmError::OutOfBounds { .. })));
        assert_eq!(reg.create(0), Err(ShmError::InvalidSize(0)));
    }
}
