//! Display wake-up
//!
//! Some kernels leave the panel blanked when the Android side never ran.
//! Each strategy is tried independently and any one succeeding is enough.

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FBIOBLANK: libc::c_ulong = 0x4611;
const FB_BLANK_UNBLANK: libc::c_ulong = 0;
const FULL_BRIGHTNESS: &str = "255";

/// Sysfs and device nodes touched while unblanking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnblankPaths {
    pub bl_power: PathBuf,
    pub brightness: PathBuf,
    pub fb_device: PathBuf,
    pub fb_blank: PathBuf,
}

impl Default for UnblankPaths {
    fn default() -> Self {
        Self {
            bl_power: "/sys/class/backlight/panel0-backlight/bl_power".into(),
            brightness: "/sys/class/backlight/panel0-backlight/brightness".into(),
            fb_device: "/dev/fb0".into(),
            fb_blank: "/sys/class/graphics/fb0/blank".into(),
        }
    }
}

impl UnblankPaths {
    /// Same layout below another root, for sandboxes and tests.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let defaults = Self::default();
        let rebase = |p: PathBuf| root.join(p.strip_prefix("/").unwrap_or(&p));
        Self {
            bl_power: rebase(defaults.bl_power),
            brightness: rebase(defaults.brightness),
            fb_device: rebase(defaults.fb_device),
            fb_blank: rebase(defaults.fb_blank),
        }
    }
}

/// Which strategies worked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnblankReport {
    pub bl_power: bool,
    pub brightness: bool,
    pub fbioblank: bool,
    pub sysfs_blank: bool,
}

impl UnblankReport {
    pub fn any(&self) -> bool {
        self.bl_power || self.brightness || self.fbioblank || self.sysfs_blank
    }
}

pub fn unblank_display(paths: &UnblankPaths) -> UnblankReport {
    let report = UnblankReport {
        bl_power: write_value(&paths.bl_power, "0"),
        brightness: ensure_brightness(paths),
        fbioblank: fb_unblank_ioctl(paths),
        sysfs_blank: write_value(&paths.fb_blank, "0"),
    };
    if report.any() {
        info!(?report, "Display unblank");
    } else {
        warn!("Could not unblank display through any method");
    }
    report
}

fn write_value(path: &Path, value: &str) -> bool {
    match std::fs::write(path, value) {
        Ok(()) => {
            debug!("Wrote {} to {}", value, path.display());
            true
        }
        Err(err) => {
            debug!("Cannot write {}: {}", path.display(), err);
            false
        }
    }
}

fn ensure_brightness(paths: &UnblankPaths) -> bool {
    let Ok(current) = std::fs::read_to_string(&paths.brightness) else {
        return false;
    };
    match current.trim().parse::<u32>() {
        Ok(0) => write_value(&paths.brightness, FULL_BRIGHTNESS),
        Ok(_) => true,
        Err(_) => false,
    }
}

fn fb_unblank_ioctl(paths: &UnblankPaths) -> bool {
    let file = match OpenOptions::new().read(true).write(true).open(&paths.fb_device) {
        Ok(file) => file,
        Err(err) => {
            debug!("Cannot open {}: {}", paths.fb_device.display(), err);
            return false;
        }
    };
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), FBIOBLANK as _, FB_BLANK_UNBLANK) };
    if ret != 0 {
        debug!(
            "FBIOBLANK failed: {}",
            std::io::Error::last_os_error()
        );
    }
    ret == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sysfs() -> (tempfile::TempDir, UnblankPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = UnblankPaths::under(dir.path());
        for path in [&paths.bl_power, &paths.fb_blank, &paths.fb_device] {
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        }
        std::fs::create_dir_all(paths.brightness.parent().unwrap()).unwrap();
        (dir, paths)
    }

    #[test]
    fn test_zero_brightness_is_raised() {
        let (_dir, paths) = sysfs();
        std::fs::write(&paths.bl_power, "4").unwrap();
        std::fs::write(&paths.brightness, "0\n").unwrap();
        std::fs::write(&paths.fb_blank, "1").unwrap();

        let report = unblank_display(&paths);
        assert!(report.bl_power);
        assert!(report.brightness);
        assert!(report.sysfs_blank);
        // No framebuffer node in the fixture.
        assert!(!report.fbioblank);
        assert!(report.any());

        assert_eq!(std::fs::read_to_string(&paths.bl_power).unwrap(), "0");
        assert_eq!(std::fs::read_to_string(&paths.brightness).unwrap(), "255");
    }

    #[test]
    fn test_nonzero_brightness_is_left_alone() {
        let (_dir, paths) = sysfs();
        std::fs::write(&paths.brightness, "120").unwrap();
        let report = unblank_display(&paths);
        assert!(report.brightness);
        assert_eq!(std::fs::read_to_string(&paths.brightness).unwrap(), "120");
    }

    #[test]
    fn test_total_failure_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let paths = UnblankPaths::under(dir.path().join("missing"));
        assert_eq!(unblank_display(&paths), UnblankReport::default());
    }
}
