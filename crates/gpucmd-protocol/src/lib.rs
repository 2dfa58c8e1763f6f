//! Wire protocol shared by the GPU command buffer client and service.
//!
//! The command buffer is a ring of 32-bit entries. Each command starts with a
//! [`CommandHeader`] followed by its fixed arguments and, for "immediate"
//! commands, a payload padded to whole entries.
//!
//! This crate provides:
//! - the entry header and argument-count rules (see [`header`]);
//! - the closed command enumerations for common and GLES2 commands
//!   (see [`common`] and [`gles2`]);
//! - an explicit command-name table for logging (see [`CommandNames`]);
//! - the status codes and state snapshot exchanged across the process boundary
//!   (see [`constants`]);
//! - GL enum constants, validators and sizing helpers (see [`gl`] and
//!   [`gl_utils`]);
//! - a safe command stream builder (see [`writer::CommandWriter`]).

pub mod common;
pub mod constants;
pub mod gl;
pub mod gl_utils;
pub mod gles2;
pub mod header;
pub mod names;
pub mod writer;

pub use constants::{CbError, State, ENTRY_SIZE};
pub use header::{ArgFlags, CommandHeader, CommandInfo};
pub use names::CommandNames;
pub use writer::{CommandEncoder, CommandWriter};
