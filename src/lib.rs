//! GPU command buffers shared between a renderer and a GPU service.
//!
//! The renderer encodes GLES2 commands into a ring in shared memory
//! ([`client`]); the service validates and executes them against a GL
//! driver ([`service`]). Both sides agree on the entry format in
//! [`protocol`] and talk over the channel messages in [`ipc`].

pub use gpucmd_client as client;
pub use gpucmd_ipc as ipc;
pub use gpucmd_protocol as protocol;
pub use gpucmd_service as service;
