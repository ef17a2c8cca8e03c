//! Input handling - touch gestures and keyboard shortcuts
//!
//! This module provides:
//! - Edge gesture recognition with single-owner arbitration
//! - Keyboard shortcut mapping
//! - The libinput glue for the Wayland build

mod gestures;
#[cfg(feature = "wayland")]
mod handler;
pub mod keys;

pub use gestures::*;
#[cfg(feature = "wayland")]
pub use handler::*;
pub use keys::{Modifiers, Shortcuts};
