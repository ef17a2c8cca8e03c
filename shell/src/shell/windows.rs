//! Mapped toplevel bookkeeping for the shell

use std::fmt;

/// Handle to a mapped toplevel. The surface itself lives in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: WindowId,
    pub title: String,
    /// xdg app_id, i.e. the app class
    pub app_id: String,
}

impl WindowInfo {
    pub fn new(id: WindowId, title: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            app_id: app_id.into(),
        }
    }
}

/// Windows in the order they were mapped.
#[derive(Debug, Clone, Default)]
pub struct WindowList {
    windows: Vec<WindowInfo>,
}

impl WindowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry with the same id.
    pub fn insert(&mut self, info: WindowInfo) {
        match self.windows.iter_mut().find(|w| w.id == info.id) {
            Some(existing) => *existing = info,
            None => self.windows.push(info),
        }
    }

    pub fn remove(&mut self, id: WindowId) -> Option<WindowInfo> {
        let index = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(index))
    }

    pub fn get(&self, id: WindowId) -> Option<&WindowInfo> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.get(id).is_some()
    }

    pub fn last(&self) -> Option<WindowId> {
        self.windows.last().map(|w| w.id)
    }

    /// The window after `id`, wrapping around.
    pub fn next_after(&self, id: WindowId) -> Option<WindowId> {
        let index = self.windows.iter().position(|w| w.id == id)?;
        let next = (index + 1) % self.windows.len();
        Some(self.windows[next].id)
    }

    pub fn ids(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.windows.iter().map(|w| w.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowInfo> {
        self.windows.iter()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_after_wraps() {
        let mut list = WindowList::new();
        for id in 1..=3 {
            list.insert(WindowInfo::new(WindowId(id), "", ""));
        }
        assert_eq!(list.next_after(WindowId(1)), Some(WindowId(2)));
        assert_eq!(list.next_after(WindowId(3)), Some(WindowId(1)));
        assert_eq!(list.next_after(WindowId(9)), None);

        list.remove(WindowId(2));
        assert_eq!(list.next_after(WindowId(1)), Some(WindowId(3)));
        assert_eq!(list.last(), Some(WindowId(3)));
    }

    #[test]
    fn test_insert_replaces_same_id() {
        let mut list = WindowList::new();
        list.insert(WindowInfo::new(WindowId(1), "old", "app"));
        list.insert(WindowInfo::new(WindowId(1), "new", "app"));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(WindowId(1)).map(|w| w.title.as_str()), Some("new"));
    }
}
