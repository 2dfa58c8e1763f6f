//! Renderer side of the GPU command buffer.
//!
//! A [`GpuChannelHost`] owns the renderer's end of one channel and routes
//! replies and events to per-context [`CommandBufferProxy`] handles. A
//! [`CommandBufferHelper`] writes commands into a proxy's ring and tracks
//! `put`, `get` and tokens; [`Gles2CmdHelper`] adds the round trips that read
//! results back through a transfer buffer.
//!
//! Nothing here hangs on a dead channel: a transport failure moves the host
//! and every route to lost, and every later call observes `LostContext`.

pub mod channel_host;
pub mod command_buffer;
pub mod gles2_helper;
pub mod helper;
pub mod proxy;

pub use channel_host::{ChannelError, ChannelHostRef, ChannelState, GpuChannelHost, RouteState};
pub use command_buffer::CommandBuffer;
pub use gles2_helper::Gles2CmdHelper;
pub use helper::{CommandBufferHelper, HelperError};
pub use proxy::CommandBufferProxy;

/// Ring size a helper asks for when the caller has no preference.
pub const DEFAULT_RING_BUFFER_BYTES: u32 = 1024 * 1024;

/// Size of the transfer buffer [`Gles2CmdHelper`] reads results through.
pub const DEFAULT_TRANSFER_BUFFER_BYTES: u32 = 1024 * 1024;
