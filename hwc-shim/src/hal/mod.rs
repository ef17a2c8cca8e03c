//! Composition HAL abstraction
//!
//! [`Composer`] mirrors the slice of the hwc2 compat API the presentation
//! pipeline needs: one device, the primary display and a single client
//! composition layer. `hybris` talks to the real HAL through libhybris,
//! `virtual_hal` is a software stand-in used by tests and headless runs.

#[cfg(feature = "hybris")]
pub mod hybris;
pub mod virtual_hal;

use crate::buffer::NativeHandle;
use crate::events::EventSender;
use crate::fence::Fence;
use crate::{Error, Result};
use std::fmt;

/// hwc2 display id. The primary panel is always 0.
pub type DisplayId = u64;

pub const PRIMARY_DISPLAY: DisplayId = 0;

/// hwc2 error code (`hwc2_error_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalStatus(pub i32);

impl HalStatus {
    pub const NONE: HalStatus = HalStatus(0);
    pub const BAD_CONFIG: HalStatus = HalStatus(1);
    pub const BAD_DISPLAY: HalStatus = HalStatus(2);
    pub const BAD_LAYER: HalStatus = HalStatus(3);
    pub const BAD_PARAMETER: HalStatus = HalStatus(4);
    pub const HAS_CHANGES: HalStatus = HalStatus(5);
    pub const NO_RESOURCES: HalStatus = HalStatus(6);
    pub const NOT_VALIDATED: HalStatus = HalStatus(7);
    pub const UNSUPPORTED: HalStatus = HalStatus(8);

    pub fn is_ok(self) -> bool {
        self == Self::NONE
    }

    /// Map a raw return code to `Ok` or [`Error::Hal`].
    pub fn check(self, call: &'static str) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(Error::Hal { call, status: self })
        }
    }
}

impl fmt::Display for HalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::NONE => "NONE",
            Self::BAD_CONFIG => "BAD_CONFIG",
            Self::BAD_DISPLAY => "BAD_DISPLAY",
            Self::BAD_LAYER => "BAD_LAYER",
            Self::BAD_PARAMETER => "BAD_PARAMETER",
            Self::HAS_CHANGES => "HAS_CHANGES",
            Self::NO_RESOURCES => "NO_RESOURCES",
            Self::NOT_VALIDATED => "NOT_VALIDATED",
            Self::UNSUPPORTED => "UNSUPPORTED",
            _ => return write!(f, "hwc2 error {}", self.0),
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    Off,
    On,
}

impl PowerMode {
    pub fn hwc2_value(self) -> i32 {
        match self {
            PowerMode::Off => 0,
            PowerMode::On => 2,
        }
    }
}

/// Active display configuration as reported by the HAL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayConfig {
    pub width: i32,
    pub height: i32,
    pub vsync_period_ns: i64,
    pub dpi_x: f32,
    pub dpi_y: f32,
}

/// Outcome of `validate`: how many composition types / layer requests the
/// HAL changed. Non-zero counts have to be accepted before presenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidateOutcome {
    pub num_types: u32,
    pub num_requests: u32,
}

impl ValidateOutcome {
    pub fn has_changes(&self) -> bool {
        self.num_types > 0 || self.num_requests > 0
    }
}

/// Device, display and layer operations of a composition HAL.
///
/// Calls are made in the order documented on [`HwcContext::init`] and
/// torn down in reverse. Implementations must tolerate teardown calls for
/// resources that were never acquired.
///
/// [`HwcContext::init`]: crate::HwcContext::init
pub trait Composer: Send {
    fn name(&self) -> &'static str;

    fn create_device(&mut self) -> Result<()>;

    /// Hook vsync/hotplug/refresh delivery up to `events`.
    fn register_callbacks(&mut self, events: EventSender) -> Result<()>;

    /// Tell the device about a (dis)connected display.
    fn on_hotplug(&mut self, display: DisplayId, connected: bool);

    fn open_display(&mut self, display: DisplayId) -> Result<()>;

    /// `None` when the HAL cannot report the active config.
    fn active_config(&mut self) -> Option<DisplayConfig>;

    fn set_power_mode(&mut self, mode: PowerMode) -> Result<()>;

    fn set_vsync_enabled(&mut self, enabled: bool) -> Result<()>;

    /// Create the single full-screen client composition layer: no blending,
    /// display frame / source crop / visible region covering the screen,
    /// plane alpha 1.0.
    fn create_client_layer(&mut self, width: u32, height: u32) -> Result<()>;

    /// Submit `target` as the display's client target for `slot`.
    fn set_client_target(&mut self, slot: u32, target: NativeHandle, acquire: Fence)
        -> Result<()>;

    fn validate(&mut self) -> Result<ValidateOutcome>;

    fn accept_changes(&mut self) -> Result<()>;

    /// Present and return the present fence.
    fn present(&mut self) -> Result<Fence>;

    fn destroy_layer(&mut self);

    fn destroy_display(&mut self);

    fn destroy_device(&mut self);
}
