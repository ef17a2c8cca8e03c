//! Shell navigation - which view is on screen and what each gesture does
//!
//! [`ShellStateMachine`] is a total transition function over the current
//! [`ShellView`]. It consumes [`GestureEvent`]s from the recognizer and
//! discrete [`ShellAction`]s (window lifecycle, keyboard shortcuts, unlock)
//! and answers with [`ShellEffect`]s for the scene to carry out. It never
//! touches surfaces itself.

pub mod lock;
pub mod windows;

use crate::input::{Edge, GestureEvent};
use tracing::{debug, info};

pub use lock::{unlock_signal_path, LockConfig, LockMethod, UnlockSignal};
pub use windows::{WindowId, WindowInfo, WindowList};

/// Current shell view state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellView {
    /// Lock screen - must authenticate to proceed
    LockScreen,
    /// Home screen with app grid
    Home,
    /// Showing a running app (shell hidden)
    App,
    /// App switcher overlay
    Switcher,
    /// Quick settings / notifications panel
    QuickSettings,
    /// Settings panel
    Settings,
}

/// Discrete inputs besides gestures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellAction {
    WindowMapped(WindowInfo),
    /// Unmapped or destroyed
    WindowUnmapped(WindowId),
    /// Card tapped in the switcher
    SelectWindow(WindowId),
    CloseWindow(WindowId),
    Lock,
    /// The lock screen client authenticated the user
    Unlock,
    OpenSettings,
    OpenQuickSettings,
    Home,
    CycleWindows,
}

/// What the scene should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShellEffect {
    Show(WindowId),
    /// Make invisible; the surface stays alive
    Hide(WindowId),
    /// Keyboard focus plus raise
    Focus(WindowId),
    ClearFocus,
    /// Deliver a back key to the window
    SendBack(WindowId),
    ShowKeyboard,
    RevealProgress { edge: Edge, progress: f64 },
    RevealCancelled,
    SetInputBlocked(bool),
    /// Ask the client to close
    Close(WindowId),
    Redraw,
}

pub struct ShellStateMachine {
    view: ShellView,
    windows: WindowList,
    /// The window shown in App view, or the one to restore from Home.
    active: Option<WindowId>,
    /// Edge of the gesture navigation is following.
    gesture_edge: Option<Edge>,
    /// View a right-edge reveal started from.
    reveal_from: Option<ShellView>,
    /// View quick settings was opened from.
    qs_return: ShellView,
}

impl ShellStateMachine {
    pub fn new(start_locked: bool) -> Self {
        Self {
            view: if start_locked {
                ShellView::LockScreen
            } else {
                ShellView::Home
            },
            windows: WindowList::new(),
            active: None,
            gesture_edge: None,
            reveal_from: None,
            qs_return: ShellView::Home,
        }
    }

    /// Effects establishing the initial view.
    pub fn initial_effects(&self) -> Vec<ShellEffect> {
        if self.view == ShellView::LockScreen {
            vec![ShellEffect::SetInputBlocked(true), ShellEffect::Redraw]
        } else {
            vec![ShellEffect::Redraw]
        }
    }

    pub fn view(&self) -> ShellView {
        self.view
    }

    pub fn windows(&self) -> &WindowList {
        &self.windows
    }

    pub fn active_window(&self) -> Option<WindowId> {
        self.active
    }

    /// Window whose surface is on screen.
    pub fn visible_window(&self) -> Option<WindowId> {
        let shown = match self.view {
            ShellView::App => true,
            ShellView::QuickSettings => self.qs_return == ShellView::App,
            _ => false,
        };
        self.active.filter(|_| shown)
    }

    fn set_view(&mut self, new_view: ShellView) {
        if self.view != new_view {
            info!("Shell view: {:?} -> {:?}", self.view, new_view);
            self.view = new_view;
        }
    }

    /// Hide whatever app surface is showing and drop client focus.
    fn leave_app(&mut self, effects: &mut Vec<ShellEffect>) {
        if let Some(id) = self.visible_window() {
            effects.push(ShellEffect::Hide(id));
        }
        effects.push(ShellEffect::ClearFocus);
    }

    fn go_home(&mut self) -> Vec<ShellEffect> {
        if self.view == ShellView::Home {
            return Vec::new();
        }
        let mut effects = Vec::new();
        self.leave_app(&mut effects);
        self.set_view(ShellView::Home);
        effects.push(ShellEffect::Redraw);
        effects
    }

    fn enter_app(&mut self, id: WindowId) -> Vec<ShellEffect> {
        if !self.windows.contains(id) {
            return Vec::new();
        }
        if self.view == ShellView::App && self.active == Some(id) {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if let Some(old) = self.visible_window().filter(|old| *old != id) {
            effects.push(ShellEffect::Hide(old));
        }
        self.active = Some(id);
        self.set_view(ShellView::App);
        effects.extend([
            ShellEffect::Show(id),
            ShellEffect::Focus(id),
            ShellEffect::Redraw,
        ]);
        effects
    }

    fn open_switcher(&mut self) -> Vec<ShellEffect> {
        let mut effects = Vec::new();
        self.leave_app(&mut effects);
        self.set_view(ShellView::Switcher);
        effects.push(ShellEffect::Redraw);
        effects
    }

    fn close_quick_settings(&mut self) -> Vec<ShellEffect> {
        match self.active.filter(|_| self.qs_return == ShellView::App) {
            Some(id) => {
                self.set_view(ShellView::App);
                vec![ShellEffect::Focus(id), ShellEffect::Redraw]
            }
            None => {
                self.set_view(ShellView::Home);
                vec![ShellEffect::Redraw]
            }
        }
    }

    /// Feed one recognized gesture.
    pub fn handle_gesture(&mut self, event: &GestureEvent) -> Vec<ShellEffect> {
        if self.view == ShellView::LockScreen {
            return Vec::new();
        }

        match *event {
            GestureEvent::EdgeSwipeStart { edge } => {
                if let Some(owner) = self.gesture_edge {
                    debug!(?edge, ?owner, "Ignoring swipe start, another edge is active");
                    return Vec::new();
                }
                self.gesture_edge = Some(edge);
                if edge == Edge::Right && matches!(self.view, ShellView::App | ShellView::Home) {
                    self.reveal_from = Some(self.view);
                }
                Vec::new()
            }
            GestureEvent::EdgeSwipeUpdate { edge, progress } => {
                if self.gesture_edge != Some(edge) || self.reveal_from != Some(self.view) {
                    return Vec::new();
                }
                vec![
                    ShellEffect::RevealProgress { edge, progress },
                    ShellEffect::Redraw,
                ]
            }
            GestureEvent::EdgeSwipeEnd {
                edge,
                completed,
                long,
                ..
            } => {
                if self.gesture_edge != Some(edge) {
                    return Vec::new();
                }
                self.gesture_edge = None;
                let reveal_from = self.reveal_from.take();

                if edge == Edge::Right {
                    return match reveal_from {
                        Some(from) if from == self.view => {
                            if completed {
                                self.open_switcher()
                            } else {
                                vec![ShellEffect::RevealCancelled, ShellEffect::Redraw]
                            }
                        }
                        _ => Vec::new(),
                    };
                }
                if !completed {
                    return Vec::new();
                }
                self.swipe_completed(edge, long)
            }
        }
    }

    fn swipe_completed(&mut self, edge: Edge, long: bool) -> Vec<ShellEffect> {
        match (self.view, edge) {
            (ShellView::Home, Edge::Bottom) if long => {
                match self.active.or_else(|| self.windows.last()) {
                    Some(id) => self.enter_app(id),
                    None => Vec::new(),
                }
            }
            (ShellView::App, Edge::Bottom) if !long => vec![ShellEffect::ShowKeyboard],
            (ShellView::App, Edge::Bottom | Edge::Top) => self.go_home(),
            (ShellView::App, Edge::Left) => match self.active {
                Some(id) => vec![ShellEffect::SendBack(id)],
                None => Vec::new(),
            },
            (ShellView::Switcher, Edge::Top | Edge::Bottom | Edge::Left) => self.go_home(),
            (ShellView::QuickSettings, Edge::Top | Edge::Bottom) => self.close_quick_settings(),
            (ShellView::Settings, Edge::Top | Edge::Bottom) => self.go_home(),
            _ => Vec::new(),
        }
    }

    /// Feed one discrete action.
    pub fn handle_action(&mut self, action: ShellAction) -> Vec<ShellEffect> {
        match action {
            ShellAction::WindowMapped(info) => {
                let id = info.id;
                info!(%id, title = %info.title, app_id = %info.app_id, "Window mapped");
                self.windows.insert(info);
                match self.view {
                    ShellView::Home | ShellView::App => self.enter_app(id),
                    _ => Vec::new(),
                }
            }
            ShellAction::WindowUnmapped(id) => self.window_unmapped(id),
            ShellAction::SelectWindow(id) => {
                if self.view != ShellView::Switcher || !self.windows.contains(id) {
                    debug!(%id, view = ?self.view, "Ignoring window selection");
                    return Vec::new();
                }
                self.enter_app(id)
            }
            ShellAction::CloseWindow(id) => {
                if self.view == ShellView::LockScreen || !self.windows.contains(id) {
                    return Vec::new();
                }
                vec![ShellEffect::Close(id)]
            }
            ShellAction::Lock => {
                if self.view == ShellView::LockScreen {
                    return Vec::new();
                }
                let mut effects = Vec::new();
                self.leave_app(&mut effects);
                self.gesture_edge = None;
                self.reveal_from = None;
                self.set_view(ShellView::LockScreen);
                effects.extend([ShellEffect::SetInputBlocked(true), ShellEffect::Redraw]);
                effects
            }
            ShellAction::Unlock => {
                if self.view != ShellView::LockScreen {
                    return Vec::new();
                }
                self.set_view(ShellView::Home);
                vec![ShellEffect::SetInputBlocked(false), ShellEffect::Redraw]
            }
            ShellAction::OpenSettings => {
                if matches!(self.view, ShellView::LockScreen | ShellView::Settings) {
                    return Vec::new();
                }
                let mut effects = Vec::new();
                self.leave_app(&mut effects);
                self.set_view(ShellView::Settings);
                effects.push(ShellEffect::Redraw);
                effects
            }
            ShellAction::OpenQuickSettings => {
                if !matches!(self.view, ShellView::Home | ShellView::App) {
                    return Vec::new();
                }
                self.qs_return = self.view;
                self.set_view(ShellView::QuickSettings);
                vec![ShellEffect::ClearFocus, ShellEffect::Redraw]
            }
            ShellAction::Home => {
                if self.view == ShellView::LockScreen {
                    return Vec::new();
                }
                self.go_home()
            }
            ShellAction::CycleWindows => match self.view {
                ShellView::App => {
                    let next = self
                        .active
                        .and_then(|id| self.windows.next_after(id))
                        .filter(|next| Some(*next) != self.active);
                    match next {
                        Some(id) => self.enter_app(id),
                        None => Vec::new(),
                    }
                }
                ShellView::Home | ShellView::Switcher => {
                    match self.active.or_else(|| self.windows.last()) {
                        Some(id) => self.enter_app(id),
                        None => Vec::new(),
                    }
                }
                _ => Vec::new(),
            },
        }
    }

    fn window_unmapped(&mut self, id: WindowId) -> Vec<ShellEffect> {
        if self.windows.remove(id).is_none() {
            return Vec::new();
        }
        info!(%id, "Window unmapped");

        if self.active != Some(id) {
            return match self.view {
                ShellView::Switcher if self.windows.is_empty() => self.go_home(),
                ShellView::Switcher => vec![ShellEffect::Redraw],
                _ => Vec::new(),
            };
        }

        self.active = self.windows.last();
        match self.view {
            ShellView::App => match self.active {
                Some(next) => vec![
                    ShellEffect::Show(next),
                    ShellEffect::Focus(next),
                    ShellEffect::Redraw,
                ],
                None => {
                    self.set_view(ShellView::Home);
                    vec![ShellEffect::ClearFocus, ShellEffect::Redraw]
                }
            },
            ShellView::QuickSettings if self.qs_return == ShellView::App => match self.active {
                Some(next) => vec![ShellEffect::Show(next), ShellEffect::Redraw],
                None => {
                    self.qs_return = ShellView::Home;
                    vec![ShellEffect::Redraw]
                }
            },
            ShellView::Switcher if self.windows.is_empty() => self.go_home(),
            ShellView::Switcher => vec![ShellEffect::Redraw],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(edge: Edge) -> GestureEvent {
        GestureEvent::EdgeSwipeStart { edge }
    }

    fn end(edge: Edge, completed: bool, long: bool) -> GestureEvent {
        GestureEvent::EdgeSwipeEnd {
            edge,
            progress: 0.5,
            completed,
            long,
        }
    }

    fn swipe(shell: &mut ShellStateMachine, edge: Edge, long: bool) -> Vec<ShellEffect> {
        let mut effects = shell.handle_gesture(&start(edge));
        effects.extend(shell.handle_gesture(&end(edge, true, long)));
        effects
    }

    fn map(shell: &mut ShellStateMachine, id: u64) -> Vec<ShellEffect> {
        shell.handle_action(ShellAction::WindowMapped(WindowInfo::new(
            WindowId(id),
            format!("window {}", id),
            "org.flick.test",
        )))
    }

    #[test]
    fn test_map_focuses_new_window() {
        let mut shell = ShellStateMachine::new(false);
        assert_eq!(shell.view(), ShellView::Home);
        let effects = map(&mut shell, 1);
        assert_eq!(shell.view(), ShellView::App);
        assert!(effects.contains(&ShellEffect::Focus(WindowId(1))));
        assert!(effects.contains(&ShellEffect::Show(WindowId(1))));

        let effects = map(&mut shell, 2);
        assert!(effects.contains(&ShellEffect::Hide(WindowId(1))));
        assert_eq!(shell.active_window(), Some(WindowId(2)));
    }

    #[test]
    fn test_top_swipe_goes_home_once() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);

        let effects = swipe(&mut shell, Edge::Top, true);
        assert_eq!(shell.view(), ShellView::Home);
        assert!(effects.contains(&ShellEffect::Hide(WindowId(1))));

        assert!(swipe(&mut shell, Edge::Top, true).is_empty());
        assert_eq!(shell.view(), ShellView::Home);
        assert_eq!(shell.windows().len(), 1);
    }

    #[test]
    fn test_short_top_swipe_does_not_commit() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);
        shell.handle_gesture(&start(Edge::Top));
        assert!(shell.handle_gesture(&end(Edge::Top, false, false)).is_empty());
        assert_eq!(shell.view(), ShellView::App);
    }

    #[test]
    fn test_bottom_swipes_in_app() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);

        assert_eq!(
            swipe(&mut shell, Edge::Bottom, false),
            vec![ShellEffect::ShowKeyboard]
        );
        assert_eq!(shell.view(), ShellView::App);

        swipe(&mut shell, Edge::Bottom, true);
        assert_eq!(shell.view(), ShellView::Home);

        let effects = swipe(&mut shell, Edge::Bottom, true);
        assert_eq!(shell.view(), ShellView::App);
        assert!(effects.contains(&ShellEffect::Focus(WindowId(1))));
    }

    #[test]
    fn test_bottom_swipe_from_empty_home_stays() {
        let mut shell = ShellStateMachine::new(false);
        assert!(swipe(&mut shell, Edge::Bottom, true).is_empty());
        assert_eq!(shell.view(), ShellView::Home);
    }

    #[test]
    fn test_left_swipe_sends_back_in_app_only() {
        let mut shell = ShellStateMachine::new(false);
        assert!(swipe(&mut shell, Edge::Left, false).is_empty());
        map(&mut shell, 4);
        assert_eq!(
            swipe(&mut shell, Edge::Left, false),
            vec![ShellEffect::SendBack(WindowId(4))]
        );
        assert_eq!(shell.view(), ShellView::App);
    }

    #[test]
    fn test_right_reveal_commits_or_reverts() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);

        shell.handle_gesture(&start(Edge::Right));
        assert_eq!(
            shell.handle_gesture(&GestureEvent::EdgeSwipeUpdate {
                edge: Edge::Right,
                progress: 0.3
            }),
            vec![
                ShellEffect::RevealProgress {
                    edge: Edge::Right,
                    progress: 0.3
                },
                ShellEffect::Redraw
            ]
        );
        assert_eq!(
            shell.handle_gesture(&end(Edge::Right, false, false)),
            vec![ShellEffect::RevealCancelled, ShellEffect::Redraw]
        );
        assert_eq!(shell.view(), ShellView::App);

        let effects = swipe(&mut shell, Edge::Right, false);
        assert_eq!(shell.view(), ShellView::Switcher);
        assert!(effects.contains(&ShellEffect::Hide(WindowId(1))));
    }

    #[test]
    fn test_second_edge_ignored_until_first_ends() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);
        shell.handle_gesture(&start(Edge::Left));
        shell.handle_gesture(&start(Edge::Top));
        assert!(shell.handle_gesture(&end(Edge::Top, true, true)).is_empty());
        assert_eq!(shell.view(), ShellView::App);

        shell.handle_gesture(&end(Edge::Left, false, false));
        swipe(&mut shell, Edge::Top, true);
        assert_eq!(shell.view(), ShellView::Home);
    }

    #[test]
    fn test_switcher_selection() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);
        map(&mut shell, 2);
        swipe(&mut shell, Edge::Right, false);
        assert_eq!(shell.view(), ShellView::Switcher);

        assert!(shell
            .handle_action(ShellAction::SelectWindow(WindowId(9)))
            .is_empty());
        assert_eq!(shell.view(), ShellView::Switcher);

        let effects = shell.handle_action(ShellAction::SelectWindow(WindowId(1)));
        assert_eq!(shell.view(), ShellView::App);
        assert_eq!(
            effects,
            vec![
                ShellEffect::Show(WindowId(1)),
                ShellEffect::Focus(WindowId(1)),
                ShellEffect::Redraw
            ]
        );
    }

    #[test]
    fn test_switcher_close_last_window_goes_home() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);
        swipe(&mut shell, Edge::Right, false);

        assert_eq!(
            shell.handle_action(ShellAction::CloseWindow(WindowId(1))),
            vec![ShellEffect::Close(WindowId(1))]
        );
        assert_eq!(shell.view(), ShellView::Switcher);
        shell.handle_action(ShellAction::WindowUnmapped(WindowId(1)));
        assert_eq!(shell.view(), ShellView::Home);
    }

    #[test]
    fn test_switcher_edges_go_home() {
        for edge in [Edge::Top, Edge::Bottom, Edge::Left] {
            let mut shell = ShellStateMachine::new(false);
            map(&mut shell, 1);
            swipe(&mut shell, Edge::Right, false);
            swipe(&mut shell, edge, true);
            assert_eq!(shell.view(), ShellView::Home, "{:?}", edge);
        }
    }

    #[test]
    fn test_unmap_active_focuses_next() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);
        map(&mut shell, 2);
        let effects = shell.handle_action(ShellAction::WindowUnmapped(WindowId(2)));
        assert_eq!(shell.view(), ShellView::App);
        assert!(effects.contains(&ShellEffect::Focus(WindowId(1))));

        shell.handle_action(ShellAction::WindowUnmapped(WindowId(1)));
        assert_eq!(shell.view(), ShellView::Home);
        assert!(shell
            .handle_action(ShellAction::WindowUnmapped(WindowId(1)))
            .is_empty());
    }

    #[test]
    fn test_lock_blocks_everything_until_unlock() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);

        let effects = shell.handle_action(ShellAction::Lock);
        assert_eq!(shell.view(), ShellView::LockScreen);
        assert!(effects.contains(&ShellEffect::Hide(WindowId(1))));
        assert!(effects.contains(&ShellEffect::SetInputBlocked(true)));

        assert!(swipe(&mut shell, Edge::Top, true).is_empty());
        assert!(shell.handle_action(ShellAction::Home).is_empty());
        assert!(shell.handle_action(ShellAction::OpenSettings).is_empty());
        assert!(map(&mut shell, 2).is_empty());
        assert_eq!(shell.view(), ShellView::LockScreen);

        let effects = shell.handle_action(ShellAction::Unlock);
        assert_eq!(shell.view(), ShellView::Home);
        assert!(effects.contains(&ShellEffect::SetInputBlocked(false)));
        assert!(shell.handle_action(ShellAction::Unlock).is_empty());
    }

    #[test]
    fn test_start_locked() {
        let shell = ShellStateMachine::new(true);
        assert_eq!(shell.view(), ShellView::LockScreen);
        assert!(shell
            .initial_effects()
            .contains(&ShellEffect::SetInputBlocked(true)));
    }

    #[test]
    fn test_quick_settings_returns_to_origin() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);
        shell.handle_action(ShellAction::OpenQuickSettings);
        assert_eq!(shell.view(), ShellView::QuickSettings);
        assert_eq!(shell.visible_window(), Some(WindowId(1)));

        let effects = swipe(&mut shell, Edge::Top, true);
        assert_eq!(shell.view(), ShellView::App);
        assert!(effects.contains(&ShellEffect::Focus(WindowId(1))));

        shell.handle_action(ShellAction::Home);
        shell.handle_action(ShellAction::OpenQuickSettings);
        swipe(&mut shell, Edge::Bottom, false);
        assert_eq!(shell.view(), ShellView::Home);
    }

    #[test]
    fn test_settings_hides_app_and_swipes_home() {
        let mut shell = ShellStateMachine::new(false);
        map(&mut shell, 1);
        let effects = shell.handle_action(ShellAction::OpenSettings);
        assert_eq!(shell.view(), ShellView::Settings);
        assert!(effects.contains(&ShellEffect::Hide(WindowId(1))));
        assert!(shell.handle_action(ShellAction::OpenSettings).is_empty());

        swipe(&mut shell, Edge::Bottom, false);
        assert_eq!(shell.view(), ShellView::Home);
    }

    #[test]
    fn test_cycle_windows() {
        let mut shell = ShellStateMachine::new(false);
        assert!(shell.handle_action(ShellAction::CycleWindows).is_empty());
        map(&mut shell, 1);
        assert!(shell.handle_action(ShellAction::CycleWindows).is_empty());
        map(&mut shell, 2);

        let effects = shell.handle_action(ShellAction::CycleWindows);
        assert_eq!(shell.active_window(), Some(WindowId(1)));
        assert!(effects.contains(&ShellEffect::Hide(WindowId(2))));

        shell.handle_action(ShellAction::CycleWindows);
        assert_eq!(shell.active_window(), Some(WindowId(2)));

        shell.handle_action(ShellAction::Home);
        shell.handle_action(ShellAction::CycleWindows);
        assert_eq!(shell.view(), ShellView::App);
        assert_eq!(shell.active_window(), Some(WindowId(2)));
    }
}
