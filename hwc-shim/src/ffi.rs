//! Raw libhybris bindings: hwc2 compat layer, gralloc and HWCNativeWindow.
//!
//! Only compiled with the `hybris` feature; the safe side lives in
//! `hal::hybris`.

#![allow(non_snake_case)]

use std::os::raw::{c_int, c_void};

pub type Hwc2DisplayT = u64;
pub type Hwc2ConfigT = u32;
pub type Hwc2ErrorT = i32;
pub type AndroidDataspaceT = i32;

pub const HWC2_COMPOSITION_CLIENT: c_int = 1;
pub const HWC2_BLEND_MODE_NONE: c_int = 1;
pub const HAL_DATASPACE_UNKNOWN: AndroidDataspaceT = 0;

#[repr(C)]
#[derive(Debug, Clone)]
pub struct HWC2DisplayConfig {
    pub id: Hwc2ConfigT,
    pub display: Hwc2DisplayT,
    pub width: i32,
    pub height: i32,
    pub vsync_period: i64,
    pub dpi_x: f32,
    pub dpi_y: f32,
}

pub type VsyncReceived =
    extern "C" fn(listener: *mut HWC2EventListener, sequence_id: i32, display: Hwc2DisplayT, timestamp: i64);
pub type HotplugReceived = extern "C" fn(
    listener: *mut HWC2EventListener,
    sequence_id: i32,
    display: Hwc2DisplayT,
    connected: bool,
    primary_display: bool,
);
pub type RefreshReceived =
    extern "C" fn(listener: *mut HWC2EventListener, sequence_id: i32, display: Hwc2DisplayT);

#[repr(C)]
pub struct HWC2EventListener {
    pub on_vsync_received: Option<VsyncReceived>,
    pub on_hotplug_received: Option<HotplugReceived>,
    pub on_refresh_received: Option<RefreshReceived>,
}

#[repr(C)]
pub struct Hwc2CompatDevice {
    _data: [u8; 0],
}

#[repr(C)]
pub struct Hwc2CompatDisplay {
    _data: [u8; 0],
}

#[repr(C)]
pub struct Hwc2CompatLayer {
    _data: [u8; 0],
}

#[repr(C)]
pub struct ANativeWindow {
    _data: [u8; 0],
}

#[repr(C)]
pub struct ANativeWindowBuffer {
    _data: [u8; 0],
}

pub type HWCPresentCallback = extern "C" fn(
    user_data: *mut c_void,
    window: *mut ANativeWindow,
    buffer: *mut ANativeWindowBuffer,
);

#[repr(C)]
pub struct BufferHandle {
    _data: [u8; 0],
}

pub type BufferHandleT = *mut BufferHandle;

#[link(name = "gralloc")]
extern "C" {
    pub fn hybris_gralloc_initialize(framebuffer: c_int);

    pub fn hybris_gralloc_allocate(
        width: c_int,
        height: c_int,
        format: c_int,
        usage: c_int,
        handle_ptr: *mut BufferHandleT,
        stride_ptr: *mut u32,
    ) -> c_int;

    /// `was_allocated`: 1 for buffers we allocated, 0 for imported ones.
    pub fn hybris_gralloc_release(handle: BufferHandleT, was_allocated: c_int) -> c_int;
}

#[link(name = "hybris-hwcomposerwindow")]
#[link(name = "hwc2")]
extern "C" {
    pub fn hwc2_compat_device_new(use_vr_composer: bool) -> *mut Hwc2CompatDevice;

    pub fn hwc2_compat_device_register_callback(
        device: *mut Hwc2CompatDevice,
        listener: *mut HWC2EventListener,
        composer_sequence_id: c_int,
    );

    pub fn hwc2_compat_device_on_hotplug(
        device: *mut Hwc2CompatDevice,
        display_id: Hwc2DisplayT,
        connected: bool,
    );

    pub fn hwc2_compat_device_get_display_by_id(
        device: *mut Hwc2CompatDevice,
        id: Hwc2DisplayT,
    ) -> *mut Hwc2CompatDisplay;

    pub fn hwc2_compat_device_destroy_display(
        device: *mut Hwc2CompatDevice,
        display: *mut Hwc2CompatDisplay,
    );

    /// Returned config is heap allocated; release with `free`.
    pub fn hwc2_compat_display_get_active_config(
        display: *mut Hwc2CompatDisplay,
    ) -> *mut HWC2DisplayConfig;

    pub fn hwc2_compat_display_accept_changes(display: *mut Hwc2CompatDisplay) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_create_layer(
        display: *mut Hwc2CompatDisplay,
    ) -> *mut Hwc2CompatLayer;

    pub fn hwc2_compat_display_destroy_layer(
        display: *mut Hwc2CompatDisplay,
        layer: *mut Hwc2CompatLayer,
    );

    pub fn hwc2_compat_display_present(
        display: *mut Hwc2CompatDisplay,
        out_present_fence: *mut i32,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_set_client_target(
        display: *mut Hwc2CompatDisplay,
        slot: u32,
        buffer: *mut ANativeWindowBuffer,
        acquire_fence_fd: i32,
        dataspace: AndroidDataspaceT,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_set_power_mode(
        display: *mut Hwc2CompatDisplay,
        mode: c_int,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_set_vsync_enabled(
        display: *mut Hwc2CompatDisplay,
        enabled: c_int,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_display_validate(
        display: *mut Hwc2CompatDisplay,
        out_num_types: *mut u32,
        out_num_requests: *mut u32,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_buffer(
        layer: *mut Hwc2CompatLayer,
        slot: u32,
        buffer: *mut ANativeWindowBuffer,
        acquire_fence_fd: i32,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_blend_mode(layer: *mut Hwc2CompatLayer, mode: c_int)
        -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_composition_type(
        layer: *mut Hwc2CompatLayer,
        comp_type: c_int,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_display_frame(
        layer: *mut Hwc2CompatLayer,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_plane_alpha(layer: *mut Hwc2CompatLayer, alpha: f32)
        -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_source_crop(
        layer: *mut Hwc2CompatLayer,
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
    ) -> Hwc2ErrorT;

    pub fn hwc2_compat_layer_set_visible_region(
        layer: *mut Hwc2CompatLayer,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    ) -> Hwc2ErrorT;

    pub fn HWCNativeWindowCreate(
        width: u32,
        height: u32,
        format: u32,
        present: HWCPresentCallback,
        cb_data: *mut c_void,
    ) -> *mut ANativeWindow;

    pub fn HWCNativeWindowDestroy(window: *mut ANativeWindow);

    pub fn HWCNativeWindowSetBufferCount(window: *mut ANativeWindow, cnt: c_int) -> c_int;

    pub fn HWCNativeBufferGetFence(buf: *mut ANativeWindowBuffer) -> c_int;

    pub fn HWCNativeBufferSetFence(buf: *mut ANativeWindowBuffer, fd: c_int);
}
