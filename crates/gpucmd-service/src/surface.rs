//! Platform surfaces a decoder renders into.
//!
//! The decoder is generic over [`PlatformSurface`]; each target provides one
//! implementation instead of branching inside the decoder.

use gpucmd_ipc::Size;
use tracing::debug;

use crate::gl::{GlContextId, GlDriver};

pub trait PlatformSurface {
    /// Offscreen surfaces render into decoder-owned targets and have no
    /// window to resize.
    fn is_offscreen(&self) -> bool;

    fn size(&self) -> Size;

    fn make_current(&mut self, gl: &dyn GlDriver, context: GlContextId) -> bool {
        gl.make_current(context)
    }

    fn is_current(&self, gl: &dyn GlDriver, context: GlContextId) -> bool {
        gl.current_context() == Some(context)
    }

    fn swap_buffers(&mut self, gl: &dyn GlDriver) -> bool;

    fn resize(&mut self, size: Size) -> bool;

    fn destroy(&mut self, gl: &dyn GlDriver);
}

impl<S: PlatformSurface + ?Sized> PlatformSurface for Box<S> {
    fn is_offscreen(&self) -> bool {
        (**self).is_offscreen()
    }

    fn size(&self) -> Size {
        (**self).size()
    }

    fn make_current(&mut self, gl: &dyn GlDriver, context: GlContextId) -> bool {
        (**self).make_current(gl, context)
    }

    fn is_current(&self, gl: &dyn GlDriver, context: GlContextId) -> bool {
        (**self).is_current(gl, context)
    }

    fn swap_buffers(&mut self, gl: &dyn GlDriver) -> bool {
        (**self).swap_buffers(gl)
    }

    fn resize(&mut self, size: Size) -> bool {
        (**self).resize(size)
    }

    fn destroy(&mut self, gl: &dyn GlDriver) {
        (**self).destroy(gl)
    }
}

/// Offscreen surface.
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    size: Size,
    destroyed: bool,
}

impl HeadlessSurface {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            destroyed: false,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl PlatformSurface for HeadlessSurface {
    fn is_offscreen(&self) -> bool {
        true
    }

    fn size(&self) -> Size {
        self.size
    }

    fn swap_buffers(&mut self, gl: &dyn GlDriver) -> bool {
        gl.flush();
        !self.destroyed
    }

    fn resize(&mut self, size: Size) -> bool {
        if self.destroyed {
            return false;
        }
        self.size = size;
        true
    }

    fn destroy(&mut self, _gl: &dyn GlDriver) {
        self.destroyed = true;
    }
}

/// Surface backed by a host view. Resizing is owned by the host, so
/// [`PlatformSurface::resize`] only records the size the host settled on.
#[derive(Debug, Clone)]
pub struct ViewSurface {
    view_id: i32,
    size: Size,
    swaps: u64,
    destroyed: bool,
}

impl ViewSurface {
    pub fn new(view_id: i32, size: Size) -> Self {
        Self {
            view_id,
            size,
            swaps: 0,
            destroyed: false,
        }
    }

    pub fn view_id(&self) -> i32 {
        self.view_id
    }

    pub fn swap_count(&self) -> u64 {
        self.swaps
    }
}

impl PlatformSurface for ViewSurface {
    fn is_offscreen(&self) -> bool {
        false
    }

    fn size(&self) -> Size {
        self.size
    }

    fn swap_buffers(&mut self, gl: &dyn GlDriver) -> bool {
        if self.destroyed {
            return false;
        }
        gl.flush();
        self.swaps += 1;
        debug!(view_id = self.view_id, swaps = self.swaps, "present");
        true
    }

    fn resize(&mut self, size: Size) -> bool {
        self.size = size;
        !self.destroyed
    }

    fn destroy(&mut self, _gl: &dyn GlDriver) {
        self.destroyed = true;
    }
}
