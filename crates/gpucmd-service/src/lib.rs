//! GPU-process side of the command buffer.
//!
//! Everything here runs on the channel's thread. Commands arrive through the
//! shared ring, are walked by the [`parser`], validated against shadow state
//! kept by the managers in a [`context_group`], and executed on a
//! [`gl::GlDriver`] by the [`decoder`]. The [`scheduler`] drives that loop per
//! context; [`stub`] and [`channel`] carry it across the process boundary.

pub mod buffer_manager;
pub mod channel;
pub mod channel_manager;
pub mod command_buffer;
pub mod config;
pub mod context_group;
pub mod decoder;
pub mod gl;
pub mod id_map;
pub mod latch;
pub mod parser;
pub mod program_manager;
pub mod scheduler;
pub mod shader_manager;
pub mod soft_gl;
pub mod stub;
pub mod surface;
pub mod texture_manager;
pub mod vertex_attrib;

pub use channel::GpuChannel;
pub use channel_manager::{GpuChannelManager, HostMessage};
pub use command_buffer::{CommandBufferEngine, CommandBufferService, TransferBuffer};
pub use config::{ChannelConfig, ConfigError, ContextGroupConfig, DecoderConfig, ServiceConfig};
pub use decoder::{DecoderEvent, DecoderState, Gles2Decoder, InitError};
pub use gl::{GlContextId, GlDriver};
pub use parser::{AsyncApiHandler, CommandParser};
pub use scheduler::{GpuScheduler, ProcessOutcome};
pub use soft_gl::SoftGl;
pub use stub::GpuCommandBufferStub;
pub use surface::{HeadlessSurface, PlatformSurface, ViewSurface};
