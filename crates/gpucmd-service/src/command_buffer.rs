//! Service side of the ring buffer protocol.
//!
//! Owns the ring mapping, the cursors, the token, the sticky error and the
//! transfer buffer table of one command buffer. `put_offset` only moves via
//! [`CommandBufferService::flush_sync`]; `get_offset` only via
//! [`CommandBufferEngine::set_get_offset`], which the scheduler calls with the
//! parser's cursor.

use std::collections::BTreeMap;
use std::sync::Arc;

use gpucmd_ipc::{SharedMemoryRegistry, SharedRegion, ShmHandle};
use gpucmd_protocol::{CbError, State, ENTRY_SIZE};
use tracing::{debug, warn};

use crate::config::ChannelConfig;

/// A mapped transfer buffer (or the ring itself).
#[derive(Clone, Debug)]
pub struct TransferBuffer {
    pub region: Arc<SharedRegion>,
    pub size: u32,
}

impl TransferBuffer {
    pub fn handle(&self) -> ShmHandle {
        self.region.handle()
    }

    /// Copies `size` bytes at `offset`, or `None` when the range leaves the
    /// buffer.
    pub fn read(&self, offset: u32, size: u32) -> Option<Vec<u8>> {
        let end = offset.checked_add(size)?;
        if end > self.size {
            return None;
        }
        self.region.read(offset as usize, size as usize).ok()
    }

    pub fn write(&self, offset: u32, data: &[u8]) -> Option<()> {
        let end = offset.checked_add(u32::try_from(data.len()).ok()?)?;
        if end > self.size {
            return None;
        }
        self.region.write(offset as usize, data).ok()
    }
}

/// What the decoder may touch of its command buffer.
pub trait CommandBufferEngine {
    fn get_shared_memory_buffer(&self, shm_id: i32) -> Option<TransferBuffer>;
    fn set_token(&mut self, token: i32);
    fn get_get_offset(&self) -> i32;
    /// Fails when `offset` is outside the ring.
    fn set_get_offset(&mut self, offset: i32) -> bool;
}

struct TransferBufferEntry {
    buffer: TransferBuffer,
    /// Created by us, so the registry name is ours to close.
    owned: bool,
}

pub struct CommandBufferService {
    registry: SharedMemoryRegistry,
    ring: Option<TransferBuffer>,
    num_entries: i32,
    get_offset: i32,
    put_offset: i32,
    token: i32,
    error: CbError,
    transfer_buffers: BTreeMap<i32, TransferBufferEntry>,
    max_transfer_buffers: i32,
    max_ring_buffer_bytes: u32,
}

impl CommandBufferService {
    pub fn new(registry: SharedMemoryRegistry, config: &ChannelConfig) -> Self {
        Self {
            registry,
            ring: None,
            num_entries: 0,
            get_offset: 0,
            put_offset: 0,
            token: 0,
            error: CbError::NoError,
            transfer_buffers: BTreeMap::new(),
            max_transfer_buffers: config.max_transfer_buffers.min(i32::MAX as u32) as i32,
            max_ring_buffer_bytes: config.max_ring_buffer_bytes,
        }
    }

    /// Maps the client's ring. `size` must be a non-zero whole number of
    /// entries no larger than the region.
    pub fn initialize(&mut self, ring_handle: ShmHandle, size: u32) -> bool {
        if self.ring.is_some() {
            warn!("command buffer already initialized");
            return false;
        }
        if size == 0 || size as usize % ENTRY_SIZE != 0 || size > self.max_ring_buffer_bytes {
            warn!(size, "rejected ring buffer size");
            return false;
        }
        let region = match self.registry.open(ring_handle) {
            Ok(region) => region,
            Err(err) => {
                warn!(%err, "could not map ring buffer");
                return false;
            }
        };
        if size as usize > region.len() {
            warn!(size, region = region.len(), "ring buffer larger than its region");
            return false;
        }
        self.num_entries = (size as usize / ENTRY_SIZE) as i32;
        self.ring = Some(TransferBuffer { region, size });
        debug!(entries = self.num_entries, "command buffer initialized");
        true
    }

    pub fn ring_buffer(&self) -> Option<&TransferBuffer> {
        self.ring.as_ref()
    }

    pub fn num_entries(&self) -> i32 {
        self.num_entries
    }

    pub fn get_state(&self) -> State {
        State {
            size: self.num_entries,
            get_offset: self.get_offset,
            put_offset: self.put_offset,
            token: self.token,
            error: self.error,
        }
    }

    pub fn put_offset(&self) -> i32 {
        self.put_offset
    }

    pub fn error(&self) -> CbError {
        self.error
    }

    /// Publishes the client's new `put_offset`. An offset outside
    /// `[0, num_entries)` is rejected, leaves `put_offset` unchanged and
    /// records `OutOfBounds`.
    pub fn flush_sync(&mut self, put_offset: i32) -> bool {
        if put_offset < 0 || put_offset >= self.num_entries {
            warn!(put_offset, entries = self.num_entries, "flush outside the ring");
            self.set_parse_error(CbError::OutOfBounds);
            return false;
        }
        self.put_offset = put_offset;
        true
    }

    /// Records `error` unless an error is already recorded. `LostContext`
    /// replaces any other error and is never replaced.
    pub fn set_parse_error(&mut self, error: CbError) {
        let replace = match self.error {
            CbError::NoError => true,
            CbError::LostContext => false,
            _ => error == CbError::LostContext,
        };
        if replace && error != CbError::NoError {
            warn!(%error, "command buffer error");
            self.error = error;
        }
    }

    pub fn create_transfer_buffer(&mut self, size: u32, id_request: i32) -> i32 {
        if size == 0 {
            return -1;
        }
        let handle = match self.registry.create(size as usize) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%err, size, "could not create transfer buffer");
                return -1;
            }
        };
        let id = self.insert_transfer_buffer(handle, size, id_request, true);
        if id < 0 {
            if let Err(err) = self.registry.close(handle) {
                debug!(%err, "could not release an unregistered transfer buffer");
            }
        }
        id
    }

    /// Adopts a region the client created itself.
    pub fn register_transfer_buffer(&mut self, handle: ShmHandle, size: u32, id_request: i32) -> i32 {
        if size == 0 {
            return -1;
        }
        self.insert_transfer_buffer(handle, size, id_request, false)
    }

    fn insert_transfer_buffer(&mut self, handle: ShmHandle, size: u32, id_request: i32, owned: bool) -> i32 {
        let Some(id) = self.pick_transfer_buffer_id(id_request) else {
            warn!("out of transfer buffer ids");
            return -1;
        };
        let region = match self.registry.open(handle) {
            Ok(region) if region.len() >= size as usize => region,
            Ok(region) => {
                warn!(size, region = region.len(), "transfer buffer larger than its region");
                return -1;
            }
            Err(err) => {
                warn!(%err, "could not map transfer buffer");
                return -1;
            }
        };
        self.transfer_buffers.insert(
            id,
            TransferBufferEntry {
                buffer: TransferBuffer { region, size },
                owned,
            },
        );
        debug!(id, size, "transfer buffer registered");
        id
    }

    /// The requested id if free and in range, otherwise the lowest free id.
    fn pick_transfer_buffer_id(&self, id_request: i32) -> Option<i32> {
        if (1..=self.max_transfer_buffers).contains(&id_request)
            && !self.transfer_buffers.contains_key(&id_request)
        {
            return Some(id_request);
        }
        (1..=self.max_transfer_buffers).find(|id| !self.transfer_buffers.contains_key(id))
    }

    pub fn destroy_transfer_buffer(&mut self, id: i32) -> bool {
        match self.transfer_buffers.remove(&id) {
            Some(entry) => {
                if entry.owned {
                    if let Err(err) = self.registry.close(entry.buffer.handle()) {
                        debug!(id, %err, "transfer buffer region already released");
                    }
                }
                debug!(id, "transfer buffer destroyed");
                true
            }
            None => false,
        }
    }

    pub fn get_transfer_buffer(&self, id: i32) -> Option<TransferBuffer> {
        self.transfer_buffers.get(&id).map(|e| e.buffer.clone())
    }

    pub fn transfer_buffer_count(&self) -> usize {
        self.transfer_buffers.len()
    }

    /// Releases every transfer buffer and the ring.
    pub fn destroy(&mut self) {
        let ids: Vec<i32> = self.transfer_buffers.keys().copied().collect();
        for id in ids {
            self.destroy_transfer_buffer(id);
        }
        self.ring = None;
    }
}

impl CommandBufferEngine for CommandBufferService {
    fn get_shared_memory_buffer(&self, shm_id: i32) -> Option<TransferBuffer> {
        self.get_transfer_buffer(shm_id)
    }

    fn set_token(&mut self, token: i32) {
        self.token = token;
    }

    fn get_get_offset(&self) -> i32 {
        self.get_offset
    }

    fn set_get_offset(&mut self, offset: i32) -> bool {
        if offset < 0 || offset >= self.num_entries.max(1) {
            return false;
        }
        self.get_offset = offset;
        true
    }
}

impl Drop for CommandBufferService {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(entries: u32) -> (SharedMemoryRegistry, CommandBufferService) {
        let registry = SharedMemoryRegistry::new();
        let ring = registry.create(entries as usize * 4).unwrap();
        let mut cb = CommandBufferService::new(registry.clone(), &ChannelConfig::default());
        assert!(cb.initialize(ring, entries * 4));
        (registry, cb)
    }

    #[test]
    fn flush_outside_ring_is_rejected_without_moving_put() {
        let (_registry, mut cb) = service(16);
        assert!(cb.flush_sync(8));
        assert!(!cb.flush_sync(16));
        assert!(!cb.flush_sync(-1));
        let state = cb.get_state();
        assert_eq!(state.put_offset, 8);
        assert_eq!(state.error, CbError::OutOfBounds);
    }

    #[test]
    fn transfer_buffer_round_trip() {
        let (registry, mut cb) = service(16);
        let id = cb.create_transfer_buffer(100, 0);
        assert_eq!(id, 1);
        let buffer = cb.get_transfer_buffer(id).unwrap();
        assert_eq!(buffer.size, 100);
        assert!(registry.open(buffer.handle()).is_ok());

        assert!(cb.destroy_transfer_buffer(id));
        assert!(cb.get_transfer_buffer(id).is_none());
        assert!(registry.open(buffer.handle()).is_err());
        assert!(!cb.destroy_transfer_buffer(id));
    }

    #[test]
    fn destroying_a_buffer_whose_region_is_gone_still_frees_the_id() {
        let (registry, mut cb) = service(16);
        let id = cb.create_transfer_buffer(64, 0);
        let handle = cb.get_transfer_buffer(id).unwrap().handle();
        registry.close(handle).unwrap();

        assert!(cb.destroy_transfer_buffer(id));
        assert_eq!(cb.transfer_buffer_count(), 0);
        assert_eq!(cb.create_transfer_buffer(64, id), id);
    }

    #[test]
    fn requested_ids_are_honoured_when_free() {
        let (_registry, mut cb) = service(16);
        assert_eq!(cb.create_transfer_buffer(8, 5), 5);
        assert_eq!(cb.create_transfer_buffer(8, 5), 1);
        assert_eq!(cb.create_transfer_buffer(8, 0), 2);
        assert_eq!(cb.create_transfer_buffer(8, 100_000), 3);
        assert_eq!(cb.create_transfer_buffer(0, 4), -1);
    }

    #[test]
    fn ring_must_fit_its_region() {
        let registry = SharedMemoryRegistry::new();
        let ring = registry.create(64).unwrap();
        let mut cb = CommandBufferService::new(registry, &ChannelConfig::default());
        assert!(!cb.initialize(ring, 0));
        assert!(!cb.initialize(ring, 62));
        assert!(!cb.initialize(ring, 128));
        assert!(cb.initialize(ring, 64));
        assert!(!cb.initialize(ring, 64));
        assert_eq!(cb.num_entries(), 16);
    }

    #[test]
    fn first_error_sticks() {
        let (_registry, mut cb) = service(4);
        cb.set_parse_error(CbError::UnknownCommand);
        cb.set_parse_error(CbError::OutOfBounds);
        assert_eq!(cb.error(), CbError::UnknownCommand);
        cb.set_parse_error(CbError::LostContext);
        cb.set_parse_error(CbError::InvalidSize);
        assert_eq!(cb.error(), CbError::LostContext);
    }
}
