//! hwcomposer2 through libhybris
//!
//! HAL callbacks receive the `HWC2EventListener` pointer we registered. The
//! listener is the first field of a `#[repr(C)]` [`CallbackContext`], so the
//! callback recovers its context from that pointer without any global.

use super::{Composer, DisplayConfig, DisplayId, HalStatus, PowerMode, ValidateOutcome};
use crate::buffer::{Allocation, Allocator, BufferUsage, NativeHandle, PixelFormat};
use crate::events::{EventSender, HalEvent};
use crate::fence::Fence;
use crate::ffi::*;
use crate::present::Presenter;
use crate::swapchain::SLOT_COUNT;
use crate::window::NativeWindow;
use crate::{Error, Result};
use std::os::raw::c_void;
use std::ptr;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[repr(C)]
struct CallbackContext {
    listener: HWC2EventListener,
    events: EventSender,
}

fn context<'a>(listener: *mut HWC2EventListener) -> Option<&'a CallbackContext> {
    // SAFETY: the HAL only hands back the listener we registered, which is
    // the first field of a live, boxed CallbackContext.
    unsafe { listener.cast::<CallbackContext>().as_ref() }
}

extern "C" fn on_vsync(listener: *mut HWC2EventListener, _seq: i32, display: u64, timestamp: i64) {
    if let Some(ctx) = context(listener) {
        ctx.events.send(HalEvent::Vsync {
            display,
            timestamp_ns: timestamp,
        });
    }
}

extern "C" fn on_hotplug(
    listener: *mut HWC2EventListener,
    _seq: i32,
    display: u64,
    connected: bool,
    primary: bool,
) {
    if let Some(ctx) = context(listener) {
        ctx.events.send(HalEvent::Hotplug {
            display,
            connected,
            primary,
        });
    }
}

extern "C" fn on_refresh(listener: *mut HWC2EventListener, _seq: i32, display: u64) {
    if let Some(ctx) = context(listener) {
        ctx.events.send(HalEvent::Refresh { display });
    }
}

pub struct HybrisComposer {
    device: *mut Hwc2CompatDevice,
    display: *mut Hwc2CompatDisplay,
    layer: *mut Hwc2CompatLayer,
    callbacks: Option<Box<CallbackContext>>,
}

// The raw handles are only touched while holding the presenter's mutex.
unsafe impl Send for HybrisComposer {}

impl Default for HybrisComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl HybrisComposer {
    pub fn new() -> Self {
        Self {
            device: ptr::null_mut(),
            display: ptr::null_mut(),
            layer: ptr::null_mut(),
            callbacks: None,
        }
    }

    fn display(&self) -> Result<*mut Hwc2CompatDisplay> {
        if self.display.is_null() {
            Err(Error::NotInitialized)
        } else {
            Ok(self.display)
        }
    }
}

impl Composer for HybrisComposer {
    fn name(&self) -> &'static str {
        "hybris"
    }

    fn create_device(&mut self) -> Result<()> {
        info!("Creating hwc2 device");
        let device = unsafe { hwc2_compat_device_new(false) };
        if device.is_null() {
            return Err(Error::Hal {
                call: "hwc2_compat_device_new",
                status: HalStatus::NO_RESOURCES,
            });
        }
        self.device = device;
        Ok(())
    }

    fn register_callbacks(&mut self, events: EventSender) -> Result<()> {
        if self.device.is_null() {
            return Err(Error::NotInitialized);
        }
        let mut callbacks = Box::new(CallbackContext {
            listener: HWC2EventListener {
                on_vsync_received: Some(on_vsync),
                on_hotplug_received: Some(on_hotplug),
                on_refresh_received: Some(on_refresh),
            },
            events,
        });
        let listener: *mut HWC2EventListener = &mut callbacks.listener;
        unsafe { hwc2_compat_device_register_callback(self.device, listener, 0) };
        self.callbacks = Some(callbacks);
        Ok(())
    }

    fn on_hotplug(&mut self, display: DisplayId, connected: bool) {
        if !self.device.is_null() {
            unsafe { hwc2_compat_device_on_hotplug(self.device, display, connected) };
        }
    }

    fn open_display(&mut self, display: DisplayId) -> Result<()> {
        let handle = unsafe { hwc2_compat_device_get_display_by_id(self.device, display) };
        if handle.is_null() {
            return Err(Error::Hal {
                call: "get_display_by_id",
                status: HalStatus::BAD_DISPLAY,
            });
        }
        self.display = handle;
        Ok(())
    }

    fn active_config(&mut self) -> Option<DisplayConfig> {
        let display = self.display().ok()?;
        let raw = unsafe { hwc2_compat_display_get_active_config(display) };
        if raw.is_null() {
            return None;
        }
        let config = unsafe { (*raw).clone() };
        unsafe { libc::free(raw.cast()) };
        Some(DisplayConfig {
            width: config.width,
            height: config.height,
            vsync_period_ns: config.vsync_period,
            dpi_x: config.dpi_x,
            dpi_y: config.dpi_y,
        })
    }

    fn set_power_mode(&mut self, mode: PowerMode) -> Result<()> {
        let display = self.display()?;
        HalStatus(unsafe { hwc2_compat_display_set_power_mode(display, mode.hwc2_value()) })
            .check("set_power_mode")
    }

    fn set_vsync_enabled(&mut self, enabled: bool) -> Result<()> {
        let display = self.display()?;
        HalStatus(unsafe { hwc2_compat_display_set_vsync_enabled(display, enabled as i32) })
            .check("set_vsync_enabled")
    }

    fn create_client_layer(&mut self, width: u32, height: u32) -> Result<()> {
        let display = self.display()?;
        let layer = unsafe { hwc2_compat_display_create_layer(display) };
        if layer.is_null() {
            return Err(Error::Hal {
                call: "create_layer",
                status: HalStatus::NO_RESOURCES,
            });
        }
        self.layer = layer;

        let (w, h) = (width as i32, height as i32);
        let steps = unsafe {
            [
                (
                    "set_composition_type",
                    hwc2_compat_layer_set_composition_type(layer, HWC2_COMPOSITION_CLIENT),
                ),
                (
                    "set_blend_mode",
                    hwc2_compat_layer_set_blend_mode(layer, HWC2_BLEND_MODE_NONE),
                ),
                (
                    "set_display_frame",
                    hwc2_compat_layer_set_display_frame(layer, 0, 0, w, h),
                ),
                (
                    "set_source_crop",
                    hwc2_compat_layer_set_source_crop(layer, 0.0, 0.0, w as f32, h as f32),
                ),
                (
                    "set_visible_region",
                    hwc2_compat_layer_set_visible_region(layer, 0, 0, w, h),
                ),
                ("set_plane_alpha", hwc2_compat_layer_set_plane_alpha(layer, 1.0)),
            ]
        };
        for (call, status) in steps {
            if status != 0 {
                warn!("layer {} returned {}", call, HalStatus(status));
            }
        }
        info!("hwc2 client layer configured {}x{}", width, height);
        Ok(())
    }

    fn set_client_target(
        &mut self,
        slot: u32,
        target: NativeHandle,
        acquire: Fence,
    ) -> Result<()> {
        let display = self.display()?;
        let buffer = target.as_ptr().cast::<ANativeWindowBuffer>();
        let acquire_fd = acquire.into_raw_fd();

        if !self.layer.is_null() {
            // The layer takes its own copy of the acquire fence.
            let layer_fd = if acquire_fd >= 0 {
                unsafe { libc::dup(acquire_fd) }
            } else {
                -1
            };
            let status =
                HalStatus(unsafe { hwc2_compat_layer_set_buffer(self.layer, slot, buffer, layer_fd) });
            if !status.is_ok() {
                debug!("layer set_buffer returned {}", status);
            }
        }

        HalStatus(unsafe {
            hwc2_compat_display_set_client_target(
                display,
                slot,
                buffer,
                acquire_fd,
                HAL_DATASPACE_UNKNOWN,
            )
        })
        .check("set_client_target")
    }

    fn validate(&mut self) -> Result<ValidateOutcome> {
        let display = self.display()?;
        let mut outcome = ValidateOutcome::default();
        let status = HalStatus(unsafe {
            hwc2_compat_display_validate(display, &mut outcome.num_types, &mut outcome.num_requests)
        });
        if status.is_ok() || status == HalStatus::HAS_CHANGES {
            Ok(outcome)
        } else {
            Err(Error::Hal {
                call: "validate",
                status,
            })
        }
    }

    fn accept_changes(&mut self) -> Result<()> {
        let display = self.display()?;
        HalStatus(unsafe { hwc2_compat_display_accept_changes(display) }).check("accept_changes")
    }

    fn present(&mut self) -> Result<Fence> {
        let display = self.display()?;
        let mut fence_fd: i32 = -1;
        HalStatus(unsafe { hwc2_compat_display_present(display, &mut fence_fd) })
            .check("present")?;
        Ok(unsafe { Fence::from_raw_fd(fence_fd) })
    }

    fn destroy_layer(&mut self) {
        if !self.layer.is_null() && !self.display.is_null() {
            unsafe { hwc2_compat_display_destroy_layer(self.display, self.layer) };
        }
        self.layer = ptr::null_mut();
    }

    fn destroy_display(&mut self) {
        if !self.display.is_null() && !self.device.is_null() {
            unsafe { hwc2_compat_device_destroy_display(self.device, self.display) };
        }
        self.display = ptr::null_mut();
    }

    fn destroy_device(&mut self) {
        // The compat layer has no device destructor; the handle is leaked.
        // The callback context has to outlive it, so it is leaked as well.
        if let Some(callbacks) = self.callbacks.take() {
            Box::leak(callbacks);
        }
        self.device = ptr::null_mut();
    }
}

/// gralloc via `hybris_gralloc_*`.
#[derive(Default)]
pub struct GrallocAllocator {
    initialized: bool,
}

impl GrallocAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Allocator for GrallocAllocator {
    fn initialize(&mut self) -> Result<()> {
        if !self.initialized {
            info!("Initializing gralloc");
            unsafe { hybris_gralloc_initialize(0) };
            self.initialized = true;
        }
        Ok(())
    }

    fn allocate(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> Result<Allocation> {
        let mut handle: BufferHandleT = ptr::null_mut();
        let mut stride: u32 = 0;
        let ret = unsafe {
            hybris_gralloc_allocate(
                width as i32,
                height as i32,
                format.hal_format(),
                usage.gralloc_usage() as i32,
                &mut handle,
                &mut stride,
            )
        };
        if ret != 0 || handle.is_null() {
            return Err(Error::AllocationFailure(format!(
                "gralloc allocate {}x{} {:?} returned {}",
                width, height, format, ret
            )));
        }
        Ok(Allocation {
            handle: NativeHandle::from_ptr(handle),
            stride_pixels: stride,
        })
    }

    fn release(&mut self, handle: NativeHandle) {
        if !handle.is_null() {
            unsafe { hybris_gralloc_release(handle.as_ptr().cast(), 1) };
        }
    }
}

/// `HWCNativeWindow` whose present callback runs the presentation
/// pipeline. Buffer rotation and slot reuse are handled by the window: it
/// waits on the present fence attached to each buffer before dequeueing it
/// again.
pub struct HybrisWindow {
    window: *mut ANativeWindow,
    presenter: *const Presenter,
}

unsafe impl Send for HybrisWindow {}

extern "C" fn present_callback(
    user_data: *mut c_void,
    _window: *mut ANativeWindow,
    buffer: *mut ANativeWindowBuffer,
) {
    // SAFETY: user_data is the Arc<Presenter> leaked in HybrisWindow::new,
    // alive until HybrisWindow is dropped after the window is destroyed.
    let Some(presenter) = (unsafe { user_data.cast::<Presenter>().as_ref() }) else {
        return;
    };
    let acquire = unsafe { Fence::from_raw_fd(HWCNativeBufferGetFence(buffer)) };
    let slot = presenter.next_slot();
    if let Some(present_fence) = presenter.present(slot, NativeHandle::from_ptr(buffer), acquire) {
        unsafe { HWCNativeBufferSetFence(buffer, present_fence.into_raw_fd()) };
    }
}

impl HybrisWindow {
    pub fn new(presenter: Arc<Presenter>, width: u32, height: u32) -> Result<Self> {
        info!("Creating HWCNativeWindow {}x{}", width, height);
        let presenter = Arc::into_raw(presenter);
        let window = unsafe {
            HWCNativeWindowCreate(
                width,
                height,
                crate::buffer::hal_format::RGBA_8888 as u32,
                present_callback,
                presenter as *mut c_void,
            )
        };
        if window.is_null() {
            unsafe { drop(Arc::from_raw(presenter)) };
            return Err(Error::Unsupported("HWCNativeWindowCreate returned null"));
        }
        unsafe { HWCNativeWindowSetBufferCount(window, SLOT_COUNT as i32) };
        Ok(Self { window, presenter })
    }
}

impl NativeWindow for HybrisWindow {
    fn as_ptr(&self) -> *mut c_void {
        self.window.cast()
    }

    fn buffer_count(&self) -> usize {
        SLOT_COUNT
    }

    fn queue_frame(&mut self, _acquire: Fence) -> Result<()> {
        Err(Error::Unsupported("frames are queued by eglSwapBuffers"))
    }
}

impl Drop for HybrisWindow {
    fn drop(&mut self) {
        unsafe {
            HWCNativeWindowDestroy(self.window);
            drop(Arc::from_raw(self.presenter));
        }
    }
}
