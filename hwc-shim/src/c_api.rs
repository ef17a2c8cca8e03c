//! C API for compositors that are not written in Rust
//!
//! Integer returns are 0 on success and -1 on failure, with the message
//! available from `flick_hwc_get_error`. Every entry point accepts null
//! pointers.

#![allow(non_camel_case_types)]

use crate::buffer::{BufferObject, BufferUsage, PixelFormat};
use crate::context::{Backend, HwcContext, InitOptions};
use crate::error::{clear_last_error, last_error_ptr, set_last_error};
use crate::fence::Fence;
use crate::gbm_device::GbmDevice;
use crate::{Error, DRM_FORMAT_MOD_INVALID};
use calloop::channel::Event;
use calloop::EventLoop;
use std::ffi::{c_char, c_int, c_uint, c_void};
use std::ptr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Opaque context handed to C callers.
pub struct FlickHwcContext {
    ctx: HwcContext,
    event_loop: EventLoop<'static, HwcContext>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FlickDisplayInfo {
    pub width: i32,
    pub height: i32,
    pub physical_width: i32,
    pub physical_height: i32,
    pub vsync_period_ns: i64,
    pub refresh_rate: f32,
    pub dpi_x: f32,
    pub dpi_y: f32,
}

pub type FlickVsyncCallback = extern "C" fn(user_data: *mut c_void, timestamp_ns: i64);

fn wrap(mut ctx: HwcContext) -> *mut FlickHwcContext {
    let event_loop: EventLoop<'static, HwcContext> = match EventLoop::try_new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            error!("Failed to create event loop: {}", err);
            set_last_error(format!("event loop: {}", err));
            return ptr::null_mut();
        }
    };
    if let Some(channel) = ctx.take_event_channel() {
        let inserted = event_loop.handle().insert_source(channel, |event, _, ctx| {
            if let Event::Msg(event) = event {
                ctx.handle_event(event);
            }
        });
        if let Err(err) = inserted {
            set_last_error(format!("event source: {}", err.error));
            return ptr::null_mut();
        }
    }
    Box::into_raw(Box::new(FlickHwcContext { ctx, event_loop }))
}

unsafe fn context<'a>(ctx: *mut FlickHwcContext) -> Option<&'a mut FlickHwcContext> {
    if ctx.is_null() {
        set_last_error(Error::NotInitialized);
        None
    } else {
        Some(&mut *ctx)
    }
}

fn status(result: crate::Result<()>) -> c_int {
    match result {
        Ok(()) => {
            clear_last_error();
            0
        }
        Err(err) => {
            debug!("C API call failed: {}", err);
            set_last_error(err);
            -1
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// Bring up the display. Returns null on failure.
#[no_mangle]
pub extern "C" fn flick_hwc_init() -> *mut FlickHwcContext {
    let _ = tracing_subscriber::fmt().try_init();
    info!("flick_hwc_init");
    match HwcContext::init(Backend::from_env(), InitOptions::default()) {
        Ok(ctx) => wrap(ctx),
        Err(_) => ptr::null_mut(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn flick_hwc_get_display_info(
    ctx: *mut FlickHwcContext,
    out: *mut FlickDisplayInfo,
) -> c_int {
    let Some(ctx) = context(ctx) else { return -1 };
    if out.is_null() {
        set_last_error("null display info pointer");
        return -1;
    }
    let info = ctx.ctx.display_info();
    *out = FlickDisplayInfo {
        width: info.width,
        height: info.height,
        physical_width: info.physical_width,
        physical_height: info.physical_height,
        vsync_period_ns: info.vsync_period_ns,
        refresh_rate: info.refresh_rate,
        dpi_x: info.dpi_x,
        dpi_y: info.dpi_y,
    };
    0
}

/// `EGLNativeWindowType` for `eglCreateWindowSurface`.
#[no_mangle]
pub unsafe extern "C" fn flick_hwc_get_native_window(ctx: *mut FlickHwcContext) -> *mut c_void {
    match context(ctx) {
        Some(ctx) => ctx.ctx.native_window(),
        None => ptr::null_mut(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn flick_hwc_set_power(ctx: *mut FlickHwcContext, on: bool) -> c_int {
    let Some(ctx) = context(ctx) else { return -1 };
    status(ctx.ctx.set_power(on))
}

#[no_mangle]
pub unsafe extern "C" fn flick_hwc_set_vsync_enabled(
    ctx: *mut FlickHwcContext,
    enabled: bool,
) -> c_int {
    let Some(ctx) = context(ctx) else { return -1 };
    status(ctx.ctx.set_vsync_enabled(enabled))
}

/// `callback` runs from `flick_hwc_dispatch` on the caller's thread. Pass
/// null to remove it.
#[no_mangle]
pub unsafe extern "C" fn flick_hwc_set_vsync_callback(
    ctx: *mut FlickHwcContext,
    callback: Option<FlickVsyncCallback>,
    user_data: *mut c_void,
) {
    let Some(ctx) = context(ctx) else { return };
    ctx.ctx.set_vsync_callback(
        callback.map(|cb| Box::new(move |ts: i64| cb(user_data, ts)) as Box<dyn FnMut(i64)>),
    );
}

/// Deliver pending HAL events without blocking.
#[no_mangle]
pub unsafe extern "C" fn flick_hwc_dispatch(ctx: *mut FlickHwcContext) -> c_int {
    let Some(ctx) = context(ctx) else { return -1 };
    let FlickHwcContext { ctx, event_loop } = ctx;
    match event_loop.dispatch(Some(Duration::ZERO), ctx) {
        Ok(()) => 0,
        Err(err) => {
            set_last_error(format!("dispatch: {}", err));
            -1
        }
    }
}

/// Present the next frame of windows not driven by EGL. Takes ownership of
/// `acquire_fence_fd`; pass -1 when the frame is already complete.
#[no_mangle]
pub unsafe extern "C" fn flick_hwc_present(ctx: *mut FlickHwcContext, acquire_fence_fd: c_int) -> c_int {
    let acquire = Fence::from_raw_fd(acquire_fence_fd);
    let Some(ctx) = context(ctx) else { return -1 };
    status(ctx.ctx.queue_frame(acquire))
}

#[no_mangle]
pub unsafe extern "C" fn flick_hwc_get_stats(
    ctx: *mut FlickHwcContext,
    frames: *mut u32,
    errors: *mut u32,
) {
    let Some(ctx) = context(ctx) else { return };
    let stats = ctx.ctx.stats();
    if !frames.is_null() {
        *frames = stats.frames;
    }
    if !errors.is_null() {
        *errors = stats.errors;
    }
}

#[no_mangle]
pub unsafe extern "C" fn flick_hwc_unblank_display(ctx: *mut FlickHwcContext) {
    if let Some(ctx) = context(ctx) {
        ctx.ctx.unblank_display();
    }
}

#[no_mangle]
pub unsafe extern "C" fn flick_hwc_destroy(ctx: *mut FlickHwcContext) {
    if ctx.is_null() {
        return;
    }
    debug!("flick_hwc_destroy");
    let mut ctx = Box::from_raw(ctx);
    ctx.ctx.destroy();
}

/// Last error on the calling thread, or null. Owned by the library.
#[no_mangle]
pub extern "C" fn flick_hwc_get_error() -> *const c_char {
    last_error_ptr()
}

// =============================================================================
// GBM-style buffer objects
// =============================================================================

/// Opaque GBM device handle
pub struct gbm_device {
    inner: Arc<GbmDevice>,
}

/// Opaque GBM buffer object handle
pub struct gbm_bo {
    bo: BufferObject,
    device: *mut gbm_device,
}

pub const GBM_BO_USE_SCANOUT: u32 = BufferUsage::SCANOUT.bits();
pub const GBM_BO_USE_CURSOR: u32 = BufferUsage::CURSOR.bits();
pub const GBM_BO_USE_RENDERING: u32 = BufferUsage::RENDERING.bits();
pub const GBM_BO_USE_WRITE: u32 = BufferUsage::WRITE.bits();
pub const GBM_BO_USE_LINEAR: u32 = BufferUsage::LINEAR.bits();

/// Union for various handle types
#[repr(C)]
pub union GbmBoHandle {
    pub ptr: *mut c_void,
    pub s32: i32,
    pub u32_: u32,
    pub s64: i64,
    pub u64_: u64,
}

/// Buffer device backed by the context's allocator. Free with
/// `gbm_device_destroy` before destroying the context.
#[no_mangle]
pub unsafe extern "C" fn flick_hwc_gbm_device(ctx: *mut FlickHwcContext) -> *mut gbm_device {
    let Some(ctx) = context(ctx) else {
        return ptr::null_mut();
    };
    match ctx.ctx.gbm() {
        Some(inner) => Box::into_raw(Box::new(gbm_device { inner })),
        None => {
            set_last_error(Error::NotInitialized);
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn gbm_device_destroy(device: *mut gbm_device) {
    if !device.is_null() {
        drop(Box::from_raw(device));
    }
}

#[no_mangle]
pub unsafe extern "C" fn gbm_device_is_format_supported(
    device: *mut gbm_device,
    format: u32,
    _usage: u32,
) -> c_int {
    if device.is_null() {
        return 0;
    }
    (*device).inner.is_format_supported(format) as c_int
}

unsafe fn create_bo(
    device: *mut gbm_device,
    create: impl FnOnce(&GbmDevice, PixelFormat) -> crate::Result<BufferObject>,
    format: u32,
) -> *mut gbm_bo {
    if device.is_null() {
        set_last_error(Error::NotInitialized);
        return ptr::null_mut();
    }
    let Some(format) = PixelFormat::from_fourcc(format) else {
        error!("Unsupported format: 0x{:08x}", format);
        set_last_error(Error::UnsupportedFormat(format));
        return ptr::null_mut();
    };
    match create(&(*device).inner, format) {
        Ok(bo) => Box::into_raw(Box::new(gbm_bo { bo, device })),
        Err(err) => {
            error!("Failed to create buffer: {}", err);
            set_last_error(err);
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_create(
    device: *mut gbm_device,
    width: u32,
    height: u32,
    format: u32,
    flags: u32,
) -> *mut gbm_bo {
    debug!("gbm_bo_create({}x{}, format=0x{:08x}, flags=0x{:x})", width, height, format, flags);
    create_bo(
        device,
        |gbm, format| gbm.create(width, height, format, BufferUsage::from_bits(flags)),
        format,
    )
}

/// Modifiers are accepted and ignored; buffers report
/// `DRM_FORMAT_MOD_INVALID`.
#[no_mangle]
pub unsafe extern "C" fn gbm_bo_create_with_modifiers(
    device: *mut gbm_device,
    width: u32,
    height: u32,
    format: u32,
    modifiers: *const u64,
    count: c_uint,
) -> *mut gbm_bo {
    let modifiers: &[u64] = if modifiers.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(modifiers, count as usize)
    };
    create_bo(
        device,
        |gbm, format| gbm.create_with_modifiers(width, height, format, modifiers),
        format,
    )
}

/// Buffers still held by the display are freed once released.
#[no_mangle]
pub unsafe extern "C" fn gbm_bo_destroy(bo: *mut gbm_bo) {
    if bo.is_null() {
        return;
    }
    let bo = Box::from_raw(bo);
    if bo.device.is_null() {
        return;
    }
    if let Err(err) = (*bo.device).inner.destroy(bo.bo.id()) {
        debug!("gbm_bo_destroy: {}", err);
    }
}

unsafe fn with_bo<T>(bo: *mut gbm_bo, default: T, f: impl FnOnce(&BufferObject) -> T) -> T {
    if bo.is_null() {
        default
    } else {
        f(&(*bo).bo)
    }
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_width(bo: *mut gbm_bo) -> u32 {
    with_bo(bo, 0, BufferObject::width)
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_height(bo: *mut gbm_bo) -> u32 {
    with_bo(bo, 0, BufferObject::height)
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_stride(bo: *mut gbm_bo) -> u32 {
    with_bo(bo, 0, BufferObject::stride)
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_stride_for_plane(bo: *mut gbm_bo, plane: c_int) -> u32 {
    with_bo(bo, 0, |b| {
        usize::try_from(plane)
            .ok()
            .and_then(|p| b.stride_for_plane(p))
            .unwrap_or(0)
    })
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_format(bo: *mut gbm_bo) -> u32 {
    with_bo(bo, 0, |b| b.format().fourcc())
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_bpp(bo: *mut gbm_bo) -> u32 {
    with_bo(bo, 0, |b| b.format().bpp())
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_offset(bo: *mut gbm_bo, plane: c_int) -> u32 {
    with_bo(bo, 0, |b| {
        usize::try_from(plane)
            .ok()
            .and_then(|p| b.offset(p))
            .unwrap_or(0)
    })
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_plane_count(bo: *mut gbm_bo) -> c_int {
    with_bo(bo, 0, |b| b.plane_count() as c_int)
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_modifier(bo: *mut gbm_bo) -> u64 {
    with_bo(bo, DRM_FORMAT_MOD_INVALID, BufferObject::modifier)
}

#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_device(bo: *mut gbm_bo) -> *mut gbm_device {
    if bo.is_null() {
        return ptr::null_mut();
    }
    (*bo).device
}

/// Native (gralloc) handle of the buffer.
#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_handle(bo: *mut gbm_bo) -> GbmBoHandle {
    GbmBoHandle {
        ptr: with_bo(bo, ptr::null_mut(), |b| b.handle().as_ptr()),
    }
}

/// Duplicated dma-buf fd of imported buffers; the caller closes it.
#[no_mangle]
pub unsafe extern "C" fn gbm_bo_get_fd(bo: *mut gbm_bo) -> c_int {
    with_bo(bo, -1, |b| match b.fd() {
        Some(fd) => libc::dup(fd),
        None => -1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::virtual_hal::{VirtualControl, VirtualHal};
    use std::ffi::CStr;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn init_virtual() -> (*mut FlickHwcContext, VirtualControl) {
        let hal = VirtualHal::new();
        let control = hal.control();
        let options = InitOptions {
            hotplug_settle: Duration::ZERO,
            unblank: None,
            fb_virtual_size: PathBuf::from("/nonexistent/virtual_size"),
            use_env: false,
            ..InitOptions::default()
        };
        let ctx = HwcContext::init(Backend::Virtual(hal), options).unwrap();
        let raw = wrap(ctx);
        assert!(!raw.is_null());
        (raw, control)
    }

    fn error_message() -> String {
        let msg = flick_hwc_get_error();
        assert!(!msg.is_null());
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }

    #[test]
    fn test_null_context_is_tolerated() {
        unsafe {
            assert_eq!(flick_hwc_set_power(ptr::null_mut(), true), -1);
            assert!(error_message().contains("not initialized"));
            assert_eq!(flick_hwc_set_vsync_enabled(ptr::null_mut(), true), -1);
            assert_eq!(flick_hwc_dispatch(ptr::null_mut()), -1);
            assert_eq!(flick_hwc_present(ptr::null_mut(), -1), -1);
            assert_eq!(
                flick_hwc_get_display_info(ptr::null_mut(), ptr::null_mut()),
                -1
            );
            assert!(flick_hwc_get_native_window(ptr::null_mut()).is_null());
            assert!(flick_hwc_gbm_device(ptr::null_mut()).is_null());
            flick_hwc_get_stats(ptr::null_mut(), ptr::null_mut(), ptr::null_mut());
            flick_hwc_set_vsync_callback(ptr::null_mut(), None, ptr::null_mut());
            flick_hwc_unblank_display(ptr::null_mut());
            flick_hwc_destroy(ptr::null_mut());
            gbm_bo_destroy(ptr::null_mut());
            gbm_device_destroy(ptr::null_mut());
            assert_eq!(gbm_bo_get_width(ptr::null_mut()), 0);
            assert_eq!(gbm_bo_get_modifier(ptr::null_mut()), DRM_FORMAT_MOD_INVALID);
            assert_eq!(gbm_bo_get_fd(ptr::null_mut()), -1);
        }
    }

    #[test]
    fn test_display_info_and_stats() {
        let (ctx, control) = init_virtual();
        unsafe {
            let mut info = FlickDisplayInfo::default();
            assert_eq!(flick_hwc_get_display_info(ctx, &mut info), 0);
            assert_eq!((info.width, info.height), (1080, 2340));
            assert_eq!(info.vsync_period_ns, 16_666_667);
            assert!(info.physical_width > 0);

            assert_eq!(flick_hwc_present(ctx, -1), 0);
            assert_eq!(flick_hwc_present(ctx, -1), 0);
            let (mut frames, mut errors) = (0u32, 0u32);
            flick_hwc_get_stats(ctx, &mut frames, &mut errors);
            assert_eq!((frames, errors), (2, 0));
            assert_eq!(control.presented(), 2);

            assert_eq!(flick_hwc_set_power(ctx, false), 0);
            flick_hwc_destroy(ctx);
        }
        assert_eq!(control.live_allocations(), 0);
    }

    static LAST_VSYNC: AtomicI64 = AtomicI64::new(0);

    extern "C" fn record_vsync(user_data: *mut c_void, timestamp_ns: i64) {
        assert_eq!(user_data as usize, 0x1234);
        LAST_VSYNC.store(timestamp_ns, Ordering::SeqCst);
    }

    #[test]
    fn test_vsync_callback_runs_on_dispatch() {
        let (ctx, control) = init_virtual();
        unsafe {
            flick_hwc_set_vsync_callback(ctx, Some(record_vsync), 0x1234 as *mut c_void);
            control.emit(crate::HalEvent::Vsync {
                display: 0,
                timestamp_ns: 42,
            });
            assert_eq!(LAST_VSYNC.load(Ordering::SeqCst), 0);
            assert_eq!(flick_hwc_dispatch(ctx), 0);
            assert_eq!(LAST_VSYNC.load(Ordering::SeqCst), 42);
            flick_hwc_destroy(ctx);
        }
    }

    #[test]
    fn test_gbm_subset() {
        let (ctx, control) = init_virtual();
        unsafe {
            let device = flick_hwc_gbm_device(ctx);
            assert!(!device.is_null());
            let argb = PixelFormat::Argb8888.fourcc();
            assert_eq!(gbm_device_is_format_supported(device, argb, 0), 1);
            assert_eq!(gbm_device_is_format_supported(device, 0xdead_beef, 0), 0);

            let bo = gbm_bo_create(device, 100, 50, argb, GBM_BO_USE_RENDERING);
            assert!(!bo.is_null());
            assert_eq!(gbm_bo_get_width(bo), 100);
            assert_eq!(gbm_bo_get_height(bo), 50);
            assert_eq!(gbm_bo_get_format(bo), argb);
            assert_eq!(gbm_bo_get_bpp(bo), 32);
            assert!(gbm_bo_get_stride(bo) >= 400);
            assert_eq!(gbm_bo_get_plane_count(bo), 1);
            assert_eq!(gbm_bo_get_offset(bo, 0), 0);
            assert_eq!(gbm_bo_get_stride_for_plane(bo, 1), 0);
            assert_eq!(gbm_bo_get_modifier(bo), DRM_FORMAT_MOD_INVALID);
            assert_eq!(gbm_bo_get_device(bo), device);
            assert!(!gbm_bo_get_handle(bo).ptr.is_null());

            let modifiers = [0u64, 1];
            let nv12 = PixelFormat::Nv12.fourcc();
            let planar = gbm_bo_create_with_modifiers(device, 64, 64, nv12, modifiers.as_ptr(), 2);
            assert!(!planar.is_null());
            assert_eq!(gbm_bo_get_plane_count(planar), 2);
            assert_eq!(gbm_bo_get_offset(planar, 1), gbm_bo_get_stride(planar) * 64);
            assert_eq!(gbm_bo_get_modifier(planar), DRM_FORMAT_MOD_INVALID);

            assert!(gbm_bo_create(device, 0, 10, argb, 0).is_null());
            assert!(gbm_bo_create(device, 10, 10, 0xdead_beef, 0).is_null());
            assert!(error_message().contains("unsupported"));

            let live = control.live_allocations();
            gbm_bo_destroy(bo);
            gbm_bo_destroy(planar);
            assert_eq!(control.live_allocations(), live - 2);
            gbm_device_destroy(device);
            flick_hwc_destroy(ctx);
        }
    }
}
