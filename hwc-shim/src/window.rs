//! Render targets feeding the presentation pipeline
//!
//! On hardware the renderer draws into an `HWCNativeWindow` through EGL and
//! libhybris calls back into the [`Presenter`] from `eglSwapBuffers`. The
//! virtual window owns its scanout ring directly and frames are queued by
//! hand.

use crate::buffer::{BufferUsage, PixelFormat};
use crate::fence::Fence;
use crate::gbm_device::GbmDevice;
use crate::hal::virtual_hal::VirtualHal;
use crate::present::Presenter;
use crate::swapchain::{Swapchain, SLOT_COUNT};
use crate::{Error, Result};
use std::os::raw::c_void;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub trait NativeWindow: Send {
    /// `EGLNativeWindowType` for `eglCreateWindowSurface`, or null when the
    /// window has no EGL side.
    fn as_ptr(&self) -> *mut c_void;

    fn buffer_count(&self) -> usize;

    /// Present the current back buffer once `acquire` signals.
    fn queue_frame(&mut self, acquire: Fence) -> Result<()>;
}

/// Window of the virtual composer, rotating its own scanout buffers.
pub struct VirtualWindow {
    hal: VirtualHal,
    gbm: Arc<GbmDevice>,
    presenter: Arc<Presenter>,
    swapchain: Option<Swapchain>,
}

impl VirtualWindow {
    pub(crate) fn new(
        hal: VirtualHal,
        gbm: Arc<GbmDevice>,
        presenter: Arc<Presenter>,
        width: u32,
        height: u32,
        fence_timeout: Duration,
    ) -> Result<Self> {
        hal.window_created()?;
        let mut window = Self {
            hal,
            gbm,
            presenter,
            swapchain: None,
        };

        // Dropping `window` on error releases whatever was allocated so far.
        let mut buffers = Vec::with_capacity(SLOT_COUNT);
        for _ in 0..SLOT_COUNT {
            match window.gbm.create(
                width,
                height,
                PixelFormat::Abgr8888,
                BufferUsage::SCANOUT | BufferUsage::RENDERING,
            ) {
                Ok(bo) => buffers.push(bo),
                Err(err) => {
                    window.swapchain = Some(Swapchain::new(buffers, fence_timeout));
                    return Err(err);
                }
            }
        }
        window.swapchain = Some(Swapchain::new(buffers, fence_timeout));
        info!("Virtual window {}x{} with {} buffers", width, height, SLOT_COUNT);
        Ok(window)
    }
}

impl NativeWindow for VirtualWindow {
    fn as_ptr(&self) -> *mut c_void {
        std::ptr::null_mut()
    }

    fn buffer_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, Swapchain::len)
    }

    fn queue_frame(&mut self, acquire: Fence) -> Result<()> {
        let swapchain = self.swapchain.as_mut().ok_or(Error::NotInitialized)?;
        let slot = swapchain.dequeue()?;
        let bo = swapchain
            .buffer(slot)
            .cloned()
            .ok_or(Error::NotInitialized)?;

        // The slot's fence signaled, so the display is done with the buffer.
        if self.gbm.is_locked(bo.id()) {
            self.gbm.release(bo.id())?;
        }

        let present_fence = self.presenter.present(slot as u32, bo.handle(), acquire);
        if present_fence.is_some() {
            self.gbm.lock(bo.id())?;
        } else {
            debug!(slot, "Frame dropped, buffer stays with the renderer");
        }
        swapchain.attach_present_fence(slot, present_fence);
        Ok(())
    }
}

impl Drop for VirtualWindow {
    fn drop(&mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            for bo in swapchain.into_buffers() {
                if self.gbm.is_locked(bo.id()) {
                    if let Err(err) = self.gbm.release(bo.id()) {
                        warn!("Failed to unlock window buffer {}: {}", bo.id(), err);
                    }
                }
                if let Err(err) = self.gbm.destroy(bo.id()) {
                    warn!("Failed to free window buffer {}: {}", bo.id(), err);
                }
            }
        }
        self.hal.window_destroyed();
    }
}
