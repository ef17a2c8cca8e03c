//! Flick - a touch-first mobile shell and Wayland compositor
//!
//! The shell logic (gestures, navigation, scene) is plain Rust and does not
//! depend on smithay; the `wayland` feature adds the compositor glue and
//! the hwcomposer display backend used by the `flick` binary.

pub mod config;
pub mod desktop;
pub mod input;
pub mod scene;
pub mod shell;

#[cfg(feature = "wayland")]
pub mod backend;
#[cfg(feature = "wayland")]
pub mod state;

pub use config::FlickConfig;
pub use desktop::{Desktop, MapChange, TouchRoute};
