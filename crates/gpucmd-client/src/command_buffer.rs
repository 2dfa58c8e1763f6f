use std::sync::Arc;

use gpucmd_ipc::SharedRegion;
use gpucmd_protocol::State;

/// The renderer's view of one command buffer.
///
/// [`crate::CommandBufferProxy`] implements this over a channel; tests can
/// implement it directly over a service to drive a helper without threads.
/// Failures never surface as Rust errors here: they show up as
/// `error != NoError` in the returned [`State`].
pub trait CommandBuffer {
    /// Allocates a ring of `size_bytes` and hands it to the service.
    fn initialize(&mut self, size_bytes: u32) -> bool;

    /// The ring, once initialized.
    fn ring(&self) -> Option<Arc<SharedRegion>>;

    /// Latest state known without a round trip.
    fn last_state(&self) -> State;

    /// Asks the service for its current state.
    fn get_state(&mut self) -> State;

    /// Publishes `put_offset` without waiting.
    fn flush(&mut self, put_offset: i32);

    /// Publishes `put_offset`, lets the service process some commands and
    /// returns the resulting state.
    fn flush_sync(&mut self, put_offset: i32, last_known_get: i32) -> State;

    /// Returns the new id, or `-1`.
    fn create_transfer_buffer(&mut self, size: u32, id_request: i32) -> i32;

    fn destroy_transfer_buffer(&mut self, id: i32);

    fn get_transfer_buffer(&mut self, id: i32) -> Option<Arc<SharedRegion>>;
}
