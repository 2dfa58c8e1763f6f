//! Process-boundary plumbing for the GPU command buffer.
//!
//! - [`shm`]: shared region registry (small integer handle -> mapped bytes).
//! - [`ring`]: SPSC ring of length-prefixed frames.
//! - [`transport`]: ordered, reliable duplex endpoints built on two rings.
//! - [`message`]: the binary channel message format carried in each frame.

pub mod layout;
pub mod message;
pub mod ring;
pub mod shm;
pub mod transport;

pub use message::{decode_message, encode_message, DecodeError, Event, Message, Reply, Request, RouteId, Size};
pub use shm::{SharedMemoryRegistry, SharedRegion, ShmError, ShmHandle};
pub use transport::{duplex, Endpoint, TransportError};
