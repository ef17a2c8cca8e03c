//! Display geometry and timing
//!
//! Taken from the HAL's active config when it reports one. Otherwise the
//! size comes from `FLICK_DISPLAY_WIDTH`/`FLICK_DISPLAY_HEIGHT`, then the
//! fbdev `virtual_size` attribute, then a 1080x2340 default, at 60 Hz.

use crate::hal::DisplayConfig;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_WIDTH: i32 = 1080;
pub const DEFAULT_HEIGHT: i32 = 2340;
pub const DEFAULT_VSYNC_PERIOD_NS: i64 = 16_666_667;
pub const FB_VIRTUAL_SIZE: &str = "/sys/class/graphics/fb0/virtual_size";

const MM_PER_INCH: f32 = 25.4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayInfo {
    pub width: i32,
    pub height: i32,
    /// Millimetres, 0 when unknown.
    pub physical_width: i32,
    pub physical_height: i32,
    pub vsync_period_ns: i64,
    pub refresh_rate: f32,
    pub dpi_x: f32,
    pub dpi_y: f32,
}

impl DisplayInfo {
    pub fn from_config(config: &DisplayConfig) -> Self {
        let vsync_period_ns = if config.vsync_period_ns > 0 {
            config.vsync_period_ns
        } else {
            DEFAULT_VSYNC_PERIOD_NS
        };
        let physical = |pixels: i32, dpi: f32| {
            if dpi > 0.0 {
                (pixels as f32 / dpi * MM_PER_INCH) as i32
            } else {
                0
            }
        };
        Self {
            width: config.width,
            height: config.height,
            physical_width: physical(config.width, config.dpi_x),
            physical_height: physical(config.height, config.dpi_y),
            vsync_period_ns,
            refresh_rate: 1_000_000_000.0 / vsync_period_ns as f32,
            dpi_x: config.dpi_x,
            dpi_y: config.dpi_y,
        }
    }

    pub fn with_size(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            physical_width: 0,
            physical_height: 0,
            vsync_period_ns: DEFAULT_VSYNC_PERIOD_NS,
            refresh_rate: 60.0,
            dpi_x: 0.0,
            dpi_y: 0.0,
        }
    }

    /// Pick the HAL config if it has usable dimensions, else fall back.
    pub fn resolve(
        config: Option<DisplayConfig>,
        env: impl Fn(&str) -> Option<String>,
        fb_virtual_size: &Path,
    ) -> Self {
        match config {
            Some(config) if config.width > 0 && config.height > 0 => {
                let info = Self::from_config(&config);
                info!(
                    "hwc2 config: {}x{} @ {:.1}Hz, DPI {:.1}x{:.1}",
                    info.width, info.height, info.refresh_rate, info.dpi_x, info.dpi_y
                );
                info
            }
            _ => {
                info!("hwc2 config unavailable, using fallback");
                let (width, height) = fallback_size(env, fb_virtual_size);
                Self::with_size(width, height)
            }
        }
    }

    pub fn refresh_mhz(&self) -> i32 {
        (self.refresh_rate * 1000.0).round() as i32
    }
}

/// Size when the HAL cannot tell.
pub fn fallback_size(env: impl Fn(&str) -> Option<String>, fb_virtual_size: &Path) -> (i32, i32) {
    let from_env = env("FLICK_DISPLAY_WIDTH")
        .zip(env("FLICK_DISPLAY_HEIGHT"))
        .and_then(|(w, h)| parse_size(w.trim(), h.trim()));
    if let Some(size) = from_env {
        debug!("Display size from environment: {:?}", size);
        return size;
    }

    if let Ok(contents) = std::fs::read_to_string(fb_virtual_size) {
        if let Some((w, h)) = contents.trim().split_once(',') {
            if let Some(size) = parse_size(w, h) {
                debug!("Display size from fbdev: {:?}", size);
                return size;
            }
        }
    }

    (DEFAULT_WIDTH, DEFAULT_HEIGHT)
}

fn parse_size(w: &str, h: &str) -> Option<(i32, i32)> {
    let w: i32 = w.parse().ok()?;
    let h: i32 = h.parse().ok()?;
    (w > 0 && h > 0).then_some((w, h))
}

/// Environment lookup used outside of tests.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_config_derives_refresh_and_physical_size() {
        let info = DisplayInfo::from_config(&DisplayConfig {
            width: 1080,
            height: 2340,
            vsync_period_ns: 16_666_667,
            dpi_x: 400.0,
            dpi_y: 400.0,
        });
        assert!((info.refresh_rate - 60.0).abs() < 0.01);
        assert_eq!(info.physical_width, 68);
        assert_eq!(info.physical_height, 148);
        assert_eq!(info.refresh_mhz(), 60_000);
    }

    #[test]
    fn test_env_override_wins_over_fbdev() {
        let dir = tempfile::tempdir().unwrap();
        let fb = dir.path().join("virtual_size");
        std::fs::write(&fb, "720,1440\n").unwrap();

        let env = |key: &str| match key {
            "FLICK_DISPLAY_WIDTH" => Some("1200".to_string()),
            "FLICK_DISPLAY_HEIGHT" => Some("2000".to_string()),
            _ => None,
        };
        assert_eq!(fallback_size(env, &fb), (1200, 2000));
        assert_eq!(fallback_size(no_env, &fb), (720, 1440));
    }

    #[test]
    fn test_garbage_falls_through_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let fb = dir.path().join("virtual_size");
        std::fs::write(&fb, "wide").unwrap();
        let env = |key: &str| (key == "FLICK_DISPLAY_WIDTH").then(|| "800".to_string());
        assert_eq!(fallback_size(env, &fb), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
    }

    #[test]
    fn test_zero_sized_config_uses_fallback() {
        let config = DisplayConfig {
            width: 0,
            height: 0,
            vsync_period_ns: 0,
            dpi_x: 0.0,
            dpi_y: 0.0,
        };
        let info = DisplayInfo::resolve(Some(config), no_env, Path::new("/nonexistent"));
        assert_eq!((info.width, info.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert_eq!(info.vsync_period_ns, DEFAULT_VSYNC_PERIOD_NS);
    }
}
