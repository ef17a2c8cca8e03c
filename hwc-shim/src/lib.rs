//! Display backend for Flick on Android-based Linux phones
//!
//! Drives Android's hwcomposer2 (through libhybris) as the display of a
//! Wayland compositor: brings the HAL up, hands the renderer a native window
//! to draw into, and presents every finished frame through a triple
//! buffered client target.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Flick compositor (smithay)                     │
//! └─────────────────────────────────────────────────────────────┘
//!                  │ HwcContext / flick_hwc_* C ABI
//! ┌─────────────────────────────────────────────────────────────┐
//! │              flick-hwc                                      │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐ │
//! │  │ Presenter   │  │ GbmDevice   │  │ event relay         │ │
//! │  │ (per frame) │  │ (buffers)   │  │ (vsync / hotplug)   │ │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘ │
//! │                 hal::Composer / Allocator                   │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                   │
//!   libhybris (hwc2, gralloc)          virtual composer (tests)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use flick_hwc::{Backend, HwcContext, InitOptions};
//!
//! let mut ctx = HwcContext::init(Backend::from_env(), InitOptions::default())?;
//! let info = ctx.display_info();
//! let window = ctx.native_window();
//! // eglCreateWindowSurface(display, config, window, ...)
//! ```

pub mod buffer;
pub mod c_api;
pub mod context;
pub mod display;
pub mod error;
pub mod events;
pub mod fence;
#[cfg(feature = "hybris")]
pub mod ffi;
pub mod gbm_device;
pub mod hal;
pub mod present;
pub mod swapchain;
pub mod unblank;
pub mod window;

pub use buffer::{BufferId, BufferObject, BufferUsage, PixelFormat, DRM_FORMAT_MOD_INVALID};
pub use context::{Backend, HwcContext, InitOptions};
pub use display::DisplayInfo;
pub use error::{last_error, Error, InitStage};
pub use events::HalEvent;
pub use fence::Fence;
pub use gbm_device::GbmDevice;
pub use hal::virtual_hal::{FenceMode, VirtualControl, VirtualHal};
pub use present::FrameStats;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
