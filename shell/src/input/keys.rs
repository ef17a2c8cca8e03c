//! Compositor keyboard shortcuts
//!
//! Keycodes are raw evdev codes; smithay reports XKB codes, which are
//! evdev + 8.

use crate::shell::ShellAction;

pub const KEY_ESC: u32 = 1;
pub const KEY_TAB: u32 = 15;
pub const KEY_LEFTCTRL: u32 = 29;
pub const KEY_LEFTSHIFT: u32 = 42;
pub const KEY_RIGHTSHIFT: u32 = 54;
pub const KEY_LEFTALT: u32 = 56;
pub const KEY_RIGHTCTRL: u32 = 97;
pub const KEY_RIGHTALT: u32 = 100;
pub const KEY_POWER: u32 = 116;
pub const KEY_LEFTMETA: u32 = 125;
pub const KEY_RIGHTMETA: u32 = 126;
pub const KEY_BACK: u32 = 158;

/// XKB keycode to evdev keycode.
pub fn xkb_to_evdev(raw: u32) -> u32 {
    raw.saturating_sub(8)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub super_key: bool,
}

impl Modifiers {
    /// Track modifier keys. Returns true if `keycode` is a modifier.
    pub fn update(&mut self, keycode: u32, pressed: bool) -> bool {
        match keycode {
            KEY_LEFTCTRL | KEY_RIGHTCTRL => self.ctrl = pressed,
            KEY_LEFTALT | KEY_RIGHTALT => self.alt = pressed,
            KEY_LEFTSHIFT | KEY_RIGHTSHIFT => self.shift = pressed,
            KEY_LEFTMETA | KEY_RIGHTMETA => self.super_key = pressed,
            _ => return false,
        }
        true
    }
}

/// Maps key presses to shell actions.
#[derive(Debug, Default)]
pub struct Shortcuts {
    modifiers: Modifiers,
}

impl Shortcuts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// Returns the action bound to this key event, if any. Bound keys are
    /// not forwarded to clients.
    pub fn key(&mut self, keycode: u32, pressed: bool) -> Option<ShellAction> {
        let was_super = self.modifiers.super_key;
        if self.modifiers.update(keycode, pressed) {
            // Super tapped on its own goes home.
            return match keycode {
                KEY_LEFTMETA | KEY_RIGHTMETA if pressed && !was_super => Some(ShellAction::Home),
                _ => None,
            };
        }
        if !pressed {
            return None;
        }
        match keycode {
            KEY_TAB if self.modifiers.alt => Some(ShellAction::CycleWindows),
            KEY_POWER => Some(ShellAction::Lock),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_super_goes_home() {
        let mut keys = Shortcuts::new();
        assert_eq!(keys.key(KEY_LEFTMETA, true), Some(ShellAction::Home));
        assert_eq!(keys.key(KEY_RIGHTMETA, true), None);
        assert_eq!(keys.key(KEY_LEFTMETA, false), None);
        assert!(!keys.modifiers().super_key);
    }

    #[test]
    fn test_alt_tab_cycles() {
        let mut keys = Shortcuts::new();
        assert_eq!(keys.key(KEY_TAB, true), None);
        keys.key(KEY_LEFTALT, true);
        assert_eq!(keys.key(KEY_TAB, true), Some(ShellAction::CycleWindows));
        assert_eq!(keys.key(KEY_TAB, false), None);
        keys.key(KEY_LEFTALT, false);
        assert_eq!(keys.key(KEY_TAB, true), None);
    }

    #[test]
    fn test_power_locks_and_other_keys_pass() {
        let mut keys = Shortcuts::new();
        assert_eq!(keys.key(KEY_POWER, true), Some(ShellAction::Lock));
        assert_eq!(keys.key(KEY_ESC, true), None);
        assert_eq!(xkb_to_evdev(KEY_TAB + 8), KEY_TAB);
    }
}
