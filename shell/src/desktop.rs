//! Input to output: gestures drive the shell, the shell drives the scene
//!
//! [`Desktop`] is the compositor's shell state without any Wayland types.
//! The smithay glue feeds it touches, keys and toplevel lifecycle, then
//! drains seat requests and the render list.

use crate::config::FlickConfig;
use crate::input::{GestureConfig, GestureEvent, GestureRecognizer, Position, Shortcuts};
use crate::scene::{switcher_cards, RenderItem, Scene, Toplevel};
use crate::shell::{ShellAction, ShellStateMachine, ShellView, WindowId};
use std::collections::HashMap;
use tracing::{debug, info};

/// Who a touch event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchRoute {
    /// Consumed by the shell.
    Shell,
    /// Forward to this client.
    Client(WindowId),
}

/// Mapping change caused by a toplevel commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapChange {
    /// First buffer attached; the window joined the shell.
    Mapped(WindowId),
    /// Buffer removed; the window left the shell but the toplevel lives on.
    Unmapped(WindowId),
}

pub struct Desktop<T> {
    pub gestures: GestureRecognizer,
    pub shell: ShellStateMachine,
    pub scene: Scene<T>,
    shortcuts: Shortcuts,
    /// Toplevels without a buffer yet, or whose buffer was removed.
    unmapped: Vec<T>,
    /// Non-edge touches landing on shell UI, with their last position.
    shell_touches: HashMap<i32, Position>,
}

impl<T: Toplevel> Desktop<T> {
    pub fn new(config: &FlickConfig, output_size: (i32, i32), start_locked: bool) -> Self {
        let shell = ShellStateMachine::new(start_locked);
        let mut scene = Scene::new(output_size);
        scene.apply(&shell.initial_effects());
        info!(
            "Shell starting in {:?} at {}x{}",
            shell.view(),
            output_size.0,
            output_size.1
        );
        Self {
            gestures: GestureRecognizer::new(GestureConfig::from(&config.gestures), output_size),
            shell,
            scene,
            shortcuts: Shortcuts::new(),
            unmapped: Vec::new(),
            shell_touches: HashMap::new(),
        }
    }

    pub fn view(&self) -> ShellView {
        self.shell.view()
    }

    fn dispatch_gesture(&mut self, event: GestureEvent) {
        let effects = self.shell.handle_gesture(&event);
        self.scene.apply(&effects);
        if matches!(event, GestureEvent::EdgeSwipeEnd { .. }) {
            self.scene.end_reveal();
        }
    }

    pub fn action(&mut self, action: ShellAction) {
        let effects = self.shell.handle_action(action);
        self.scene.apply(&effects);
    }

    fn client_route(&self) -> TouchRoute {
        if self.scene.input_blocked() || self.shell.view() != ShellView::App {
            return TouchRoute::Shell;
        }
        self.scene
            .focused()
            .map_or(TouchRoute::Shell, TouchRoute::Client)
    }

    pub fn touch_down(&mut self, id: i32, pos: Position, time: u32) -> TouchRoute {
        if let Some(event) = self.gestures.touch_down(id, pos, time) {
            self.dispatch_gesture(event);
            return TouchRoute::Shell;
        }
        if self.gestures.is_tracking(id) {
            return TouchRoute::Shell;
        }
        let route = self.client_route();
        if route == TouchRoute::Shell {
            self.shell_touches.insert(id, pos);
        }
        route
    }

    pub fn touch_motion(&mut self, id: i32, pos: Position, time: u32) -> TouchRoute {
        if self.gestures.is_tracking(id) {
            if let Some(event) = self.gestures.touch_motion(id, pos, time) {
                self.dispatch_gesture(event);
            }
            return TouchRoute::Shell;
        }
        if let Some(last) = self.shell_touches.get_mut(&id) {
            *last = pos;
            return TouchRoute::Shell;
        }
        self.client_route()
    }

    pub fn touch_up(&mut self, id: i32, time: u32) -> TouchRoute {
        if self.gestures.is_tracking(id) {
            if let Some(event) = self.gestures.touch_up(id, time) {
                self.dispatch_gesture(event);
            }
            return TouchRoute::Shell;
        }
        if let Some(pos) = self.shell_touches.remove(&id) {
            self.shell_tap(pos);
            return TouchRoute::Shell;
        }
        self.client_route()
    }

    pub fn touch_cancel(&mut self, id: i32) {
        if let Some(event) = self.gestures.touch_cancel(id) {
            self.dispatch_gesture(event);
        }
        self.shell_touches.remove(&id);
    }

    /// Seat-wide cancel frame.
    pub fn touch_cancel_all(&mut self) {
        if let Some(event) = self.gestures.touch_cancel_all() {
            self.dispatch_gesture(event);
        }
        self.shell_touches.clear();
    }

    fn shell_tap(&mut self, pos: Position) {
        if self.shell.view() != ShellView::Switcher {
            return;
        }
        if let Some(id) = self.switcher_hit(pos) {
            debug!(%id, "Switcher card tapped");
            self.action(ShellAction::SelectWindow(id));
        }
    }

    /// Switcher card under `pos`; cards are rows, oldest window on top.
    pub fn switcher_hit(&self, pos: Position) -> Option<WindowId> {
        let windows = self.shell.windows();
        switcher_cards(windows.len(), self.scene.output_size())
            .iter()
            .zip(windows.ids())
            .find(|(card, _)| card.contains(pos.x, pos.y))
            .map(|(_, id)| id)
    }

    /// Keyboard event with an evdev keycode. Returns true if consumed.
    pub fn key(&mut self, keycode: u32, pressed: bool) -> bool {
        if let Some(action) = self.shortcuts.key(keycode, pressed) {
            debug!(keycode, ?action, "Shortcut");
            self.action(action);
            return true;
        }
        self.scene.input_blocked()
    }

    /// A client created a toplevel. It stays out of the shell until it
    /// commits a buffer.
    pub fn add_toplevel(&mut self, toplevel: T) {
        self.unmapped.push(toplevel);
    }

    /// A toplevel's root surface committed. Maps it on its first buffer and
    /// unmaps it when the client attaches a null buffer; a later buffer maps
    /// it again under a new id.
    pub fn toplevel_committed(
        &mut self,
        mut is_toplevel: impl FnMut(&T) -> bool,
        has_buffer: bool,
    ) -> Option<MapChange> {
        if let Some(index) = self.unmapped.iter().position(&mut is_toplevel) {
            if !has_buffer {
                // Initial commit, or a commit while unmapped: keep it fullscreen
                self.unmapped[index].configure_fullscreen(self.scene.output_size());
                return None;
            }
            let toplevel = self.unmapped.remove(index);
            return Some(MapChange::Mapped(self.map_window(toplevel)));
        }
        if has_buffer {
            return None;
        }
        let id = self.scene.find(is_toplevel)?;
        let toplevel = self.unmap_window(id)?;
        self.unmapped.push(toplevel);
        Some(MapChange::Unmapped(id))
    }

    /// The client destroyed a toplevel, mapped or not.
    pub fn remove_toplevel(&mut self, mut is_toplevel: impl FnMut(&T) -> bool) -> Option<T> {
        if let Some(index) = self.unmapped.iter().position(&mut is_toplevel) {
            return Some(self.unmapped.remove(index));
        }
        let id = self.scene.find(is_toplevel)?;
        self.unmap_window(id)
    }

    /// Mapped or unmapped toplevel matching `pred`.
    pub fn find_toplevel(&self, mut pred: impl FnMut(&T) -> bool) -> Option<&T> {
        if let Some(id) = self.scene.find(&mut pred) {
            return self.scene.get(id);
        }
        self.unmapped.iter().find(|t| pred(t))
    }

    /// Put a toplevel with content on screen: register it with the scene
    /// and hand it to the shell.
    pub fn map_window(&mut self, toplevel: T) -> WindowId {
        let info = self.scene.map(toplevel);
        let id = info.id;
        self.action(ShellAction::WindowMapped(info));
        id
    }

    /// Take a mapped window out of the scene and the shell.
    pub fn unmap_window(&mut self, id: WindowId) -> Option<T> {
        let toplevel = self.scene.unmap(id)?;
        self.action(ShellAction::WindowUnmapped(id));
        Some(toplevel)
    }

    pub fn set_output_size(&mut self, width: i32, height: i32) {
        self.gestures.set_screen_size(width, height);
        self.scene.set_output_size(width, height);
        for toplevel in &self.unmapped {
            toplevel.configure_fullscreen((width, height));
        }
    }

    pub fn render_list(&self) -> Vec<RenderItem> {
        self.scene
            .render_list(self.shell.view(), self.shell.windows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::keys::{KEY_LEFTMETA, KEY_POWER};
    use crate::scene::tests::FakeToplevel;
    use crate::scene::SeatRequest;

    fn desktop() -> Desktop<FakeToplevel> {
        Desktop::new(&FlickConfig::default(), (720, 1440), false)
    }

    fn swipe(desktop: &mut Desktop<FakeToplevel>, from: (f64, f64), to: (f64, f64)) {
        assert_eq!(
            desktop.touch_down(0, Position::new(from.0, from.1), 0),
            TouchRoute::Shell
        );
        desktop.touch_motion(0, Position::new(to.0, to.1), 50);
        desktop.touch_up(0, 100);
    }

    #[test]
    fn test_launch_then_top_swipe_returns_home_once() {
        let mut desktop = desktop();
        let toplevel = FakeToplevel::new("notes");
        let id = desktop.map_window(toplevel.clone());
        assert_eq!(desktop.view(), ShellView::App);
        assert_eq!(desktop.scene.focused(), Some(id));
        assert_eq!(desktop.render_list(), vec![RenderItem::Surface(id)]);

        swipe(&mut desktop, (360.0, 10.0), (360.0, 260.0));
        assert_eq!(desktop.view(), ShellView::Home);
        assert!(!desktop.scene.is_visible(id));
        assert_eq!(toplevel.calls.borrow().activated, Some(false));

        swipe(&mut desktop, (360.0, 10.0), (360.0, 260.0));
        assert_eq!(desktop.view(), ShellView::Home);
        assert_eq!(desktop.scene.get(id), Some(&toplevel));
    }

    #[test]
    fn test_center_touches_reach_focused_client() {
        let mut desktop = desktop();
        assert_eq!(
            desktop.touch_down(1, Position::new(360.0, 700.0), 0),
            TouchRoute::Shell
        );
        desktop.touch_up(1, 10);

        let id = desktop.map_window(FakeToplevel::new("a"));
        assert_eq!(
            desktop.touch_down(1, Position::new(360.0, 700.0), 20),
            TouchRoute::Client(id)
        );
        assert_eq!(
            desktop.touch_motion(1, Position::new(360.0, 720.0), 30),
            TouchRoute::Client(id)
        );
        assert_eq!(desktop.touch_up(1, 40), TouchRoute::Client(id));
    }

    #[test]
    fn test_right_swipe_then_tap_selects_card() {
        let mut desktop = desktop();
        let first = desktop.map_window(FakeToplevel::new("a"));
        let second = desktop.map_window(FakeToplevel::new("b"));

        desktop.touch_down(0, Position::new(715.0, 700.0), 0);
        desktop.touch_motion(0, Position::new(500.0, 700.0), 10);
        assert!(desktop.scene.reveal().is_some());
        desktop.touch_up(0, 20);
        assert_eq!(desktop.view(), ShellView::Switcher);
        assert_eq!(desktop.scene.reveal(), None);

        assert_eq!(desktop.switcher_hit(Position::new(360.0, 1000.0)), Some(second));
        desktop.touch_down(3, Position::new(360.0, 300.0), 30);
        desktop.touch_up(3, 40);
        assert_eq!(desktop.view(), ShellView::App);
        assert_eq!(desktop.scene.focused(), Some(first));
    }

    #[test]
    fn test_left_swipe_delivers_back_key() {
        let mut desktop = desktop();
        let id = desktop.map_window(FakeToplevel::new("a"));
        desktop.scene.take_requests();

        swipe(&mut desktop, (5.0, 700.0), (200.0, 700.0));
        assert_eq!(desktop.scene.take_requests(), vec![SeatRequest::BackKey(id)]);
    }

    #[test]
    fn test_cancel_mid_swipe_keeps_view() {
        let mut desktop = desktop();
        desktop.map_window(FakeToplevel::new("a"));
        desktop.touch_down(0, Position::new(360.0, 10.0), 0);
        desktop.touch_motion(0, Position::new(360.0, 600.0), 10);
        desktop.touch_cancel_all();
        assert_eq!(desktop.view(), ShellView::App);
        assert!(!desktop.gestures.has_active_touches());
    }

    #[test]
    fn test_lock_consumes_input() {
        let mut desktop = desktop();
        desktop.map_window(FakeToplevel::new("a"));
        assert!(desktop.key(KEY_POWER, true));
        assert_eq!(desktop.view(), ShellView::LockScreen);
        assert_eq!(
            desktop.touch_down(2, Position::new(360.0, 700.0), 0),
            TouchRoute::Shell
        );
        assert!(desktop.key(30, true));
        assert!(desktop.key(KEY_LEFTMETA, true));
        assert_eq!(desktop.view(), ShellView::LockScreen);

        desktop.action(ShellAction::Unlock);
        assert_eq!(desktop.view(), ShellView::Home);
        assert!(!desktop.key(30, true));
    }

    #[test]
    fn test_unmap_returns_home() {
        let mut desktop = desktop();
        let id = desktop.map_window(FakeToplevel::new("a"));
        assert!(desktop.unmap_window(id).is_some());
        assert_eq!(desktop.view(), ShellView::Home);
        assert!(desktop.unmap_window(id).is_none());
    }

    #[test]
    fn test_null_buffer_unmaps_and_next_buffer_maps_again() {
        let mut desktop = desktop();
        let toplevel = FakeToplevel::new("notes");
        desktop.add_toplevel(toplevel.clone());
        assert!(desktop.shell.windows().is_empty());

        // Initial commit carries no buffer
        assert_eq!(desktop.toplevel_committed(|t| *t == toplevel, false), None);
        assert_eq!(toplevel.calls.borrow().configures, vec![(720, 1440)]);
        assert_eq!(desktop.view(), ShellView::Home);

        let first = match desktop.toplevel_committed(|t| *t == toplevel, true) {
            Some(MapChange::Mapped(id)) => id,
            other => panic!("expected map, got {:?}", other),
        };
        assert_eq!(desktop.view(), ShellView::App);
        assert_eq!(desktop.toplevel_committed(|t| *t == toplevel, true), None);

        assert_eq!(
            desktop.toplevel_committed(|t| *t == toplevel, false),
            Some(MapChange::Unmapped(first))
        );
        assert_eq!(desktop.view(), ShellView::Home);
        assert!(!desktop.shell.windows().contains(first));
        assert_eq!(desktop.find_toplevel(|t| *t == toplevel), Some(&toplevel));

        let second = match desktop.toplevel_committed(|t| *t == toplevel, true) {
            Some(MapChange::Mapped(id)) => id,
            other => panic!("expected map, got {:?}", other),
        };
        assert_ne!(first, second);
        assert_eq!(desktop.view(), ShellView::App);
        assert_eq!(desktop.scene.focused(), Some(second));
    }

    #[test]
    fn test_destroying_unmapped_toplevel_leaves_shell_alone() {
        let mut desktop = desktop();
        let mapped = FakeToplevel::new("a");
        let id = desktop.map_window(mapped.clone());
        let pending = FakeToplevel::new("b");
        desktop.add_toplevel(pending.clone());

        assert_eq!(desktop.remove_toplevel(|t| *t == pending), Some(pending.clone()));
        assert_eq!(desktop.view(), ShellView::App);
        assert_eq!(desktop.find_toplevel(|t| *t == pending), None);

        assert_eq!(desktop.remove_toplevel(|t| *t == mapped), Some(mapped));
        assert!(!desktop.shell.windows().contains(id));
        assert_eq!(desktop.view(), ShellView::Home);
    }

    #[test]
    fn test_output_resize_moves_edge_zones() {
        let mut desktop = desktop();
        let toplevel = FakeToplevel::new("a");
        desktop.map_window(toplevel.clone());
        desktop.set_output_size(1440, 720);
        assert_eq!(desktop.gestures.screen_size(), (1440, 720));
        assert_eq!(
            toplevel.calls.borrow().configures.last(),
            Some(&(1440, 720))
        );
    }
}
