//! Lock state shared with the external lock screen client
//!
//! The lock screen UI is a separate client that authenticates the user and
//! writes the unlock signal file on success. The compositor only reads the
//! lock configuration (to decide whether to start locked) and polls the
//! signal file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lock screen authentication method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMethod {
    /// No lock - unlock immediately (for development/testing)
    #[default]
    None,
    /// 4-6 digit PIN
    Pin,
    /// 3x3 pattern lock (Android-style)
    Pattern,
    /// Full PAM password
    Password,
}

/// Lock screen configuration, written by the settings app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Authentication method
    pub method: LockMethod,
    /// Auto-lock timeout in seconds (0 = immediate, -1 = never)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: i32,
    /// Number of failed attempts before lockout
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_timeout() -> i32 {
    300
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            method: LockMethod::None,
            timeout_seconds: default_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl LockConfig {
    /// Load from the state dir, defaults if absent or unreadable.
    pub fn load() -> Self {
        Self::load_from(&state_dir().join("lock_config.json"))
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded lock config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Ignoring malformed lock config {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No lock config found, using defaults (no lock)");
                Self::default()
            }
        }
    }

    pub fn requires_lock(&self) -> bool {
        self.method != LockMethod::None
    }
}

/// Flick's state directory.
///
/// `FLICK_STATE_DIR` if set, otherwise `~/.local/state/flick` of the real
/// user (the `SUDO_USER` home when running via sudo).
pub fn state_dir() -> PathBuf {
    if let Ok(state_dir) = std::env::var("FLICK_STATE_DIR") {
        return PathBuf::from(state_dir);
    }
    let home = match std::env::var("SUDO_USER") {
        Ok(sudo_user) => format!("/home/{}", sudo_user),
        Err(_) => std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()),
    };
    PathBuf::from(home).join(".local/state/flick")
}

/// Path to unlock signal file (written by lock screen app on successful auth)
pub fn unlock_signal_path() -> PathBuf {
    state_dir().join("unlock_signal")
}

/// Poller for the unlock signal file.
#[derive(Debug, Clone)]
pub struct UnlockSignal {
    path: PathBuf,
}

impl UnlockSignal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a stale signal left over from a previous session.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Consume the signal. True once per successful authentication.
    pub fn poll(&self) -> bool {
        if !self.path.exists() {
            return false;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove unlock signal {:?}: {}", self.path, e);
        }
        debug!("Unlock signal received");
        true
    }
}

impl Default for UnlockSignal {
    fn default() -> Self {
        Self::new(unlock_signal_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_config_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock_config.json");

        assert_eq!(LockConfig::load_from(&path), LockConfig::default());

        fs::write(&path, r#"{"method": "pin", "pin_hash": "$2b$..."}"#).unwrap();
        let config = LockConfig::load_from(&path);
        assert_eq!(config.method, LockMethod::Pin);
        assert_eq!(config.timeout_seconds, 300);
        assert!(config.requires_lock());

        fs::write(&path, "not json").unwrap();
        assert!(!LockConfig::load_from(&path).requires_lock());
    }

    #[test]
    fn test_unlock_signal_is_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let signal = UnlockSignal::new(dir.path().join("unlock_signal"));
        assert!(!signal.poll());

        fs::write(signal.path(), "").unwrap();
        assert!(signal.poll());
        assert!(!signal.poll());
        assert!(signal.clear().is_ok());
    }
}
