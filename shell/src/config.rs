//! Compositor configuration
//!
//! Read from `--config <path>` or `$XDG_CONFIG_HOME/flick/compositor.toml`.
//! Every section and field is optional; a missing file means defaults.
//!
//! ```toml
//! [gestures]
//! edge_zone = 80
//! short_threshold = 100
//! long_threshold = 200
//!
//! [display]
//! width = 1080
//! height = 2340
//! hotplug_settle_ms = 100
//! backend = "hybris"
//!
//! [shell]
//! start_locked = true
//! ```

use crate::input::GestureConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlickConfig {
    pub gestures: GesturesConfig,
    pub display: DisplayConfig,
    pub shell: ShellConfig,
}

/// Edge swipe thresholds, in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GesturesConfig {
    pub edge_zone: f64,
    pub short_threshold: f64,
    pub long_threshold: f64,
}

impl Default for GesturesConfig {
    fn default() -> Self {
        Self {
            edge_zone: 80.0,
            short_threshold: 100.0,
            long_threshold: 200.0,
        }
    }
}

impl From<&GesturesConfig> for GestureConfig {
    fn from(config: &GesturesConfig) -> Self {
        GestureConfig {
            edge_threshold: config.edge_zone,
            swipe_complete_threshold: config.short_threshold,
            long_swipe_threshold: config.long_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Panel size override, for HALs that report nonsense.
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub hotplug_settle_ms: u64,
    /// `virtual` or `hybris`; `FLICK_HWC_BACKEND` when unset.
    pub backend: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            hotplug_settle_ms: 100,
            backend: None,
        }
    }
}

impl DisplayConfig {
    pub fn size_override(&self) -> Option<(i32, i32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        }
    }

    pub fn hotplug_settle(&self) -> Duration {
        Duration::from_millis(self.hotplug_settle_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Start on the lock screen even if no lock method is configured.
    pub start_locked: bool,
}

impl FlickConfig {
    /// Load from `path`, or from the default location. A missing file
    /// yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_path(),
        };
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        let config: FlickConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate(&path)?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        let g = &self.gestures;
        let invalid = |reason: &str| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if g.edge_zone <= 0.0 || g.short_threshold <= 0.0 || g.long_threshold <= 0.0 {
            return Err(invalid("gesture thresholds must be positive"));
        }
        if g.long_threshold < g.short_threshold {
            return Err(invalid("long_threshold must not be below short_threshold"));
        }
        if let Some((w, h)) = self.display.size_override() {
            if w <= 0 || h <= 0 {
                return Err(invalid("display size must be positive"));
            }
        }
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/flick/compositor.toml`, falling back to `~/.config`.
pub fn default_path() -> PathBuf {
    let config_home = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    config_home.join("flick/compositor.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FlickConfig::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config, FlickConfig::default());
        assert_eq!(config.gestures.edge_zone, 80.0);
        assert_eq!(config.display.hotplug_settle(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compositor.toml");
        fs::write(
            &path,
            "[gestures]\nedge_zone = 60\n\n[display]\nwidth = 720\nheight = 1440\n\n[shell]\nstart_locked = true\n",
        )
        .unwrap();

        let config = FlickConfig::load(Some(&path)).unwrap();
        assert_eq!(config.gestures.edge_zone, 60.0);
        assert_eq!(config.gestures.long_threshold, 200.0);
        assert_eq!(config.display.size_override(), Some((720, 1440)));
        assert!(config.shell.start_locked);

        let gestures = GestureConfig::from(&config.gestures);
        assert_eq!(gestures.edge_threshold, 60.0);
        assert_eq!(gestures.swipe_complete_threshold, 100.0);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compositor.toml");
        fs::write(&path, "[gestures\nedge_zone = ").unwrap();
        assert!(matches!(
            FlickConfig::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));

        fs::write(&path, "[gestures]\nshort_threshold = 300\n").unwrap();
        assert!(matches!(
            FlickConfig::load(Some(&path)),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
