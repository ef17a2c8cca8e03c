//! Surface stacking, visibility and focus
//!
//! The scene owns every mapped toplevel and carries out the effects the
//! shell emits. Requests that need the Wayland seat (focus changes, the
//! synthetic back key) are queued for the compositor glue to drain.

use crate::input::Edge;
use crate::shell::{ShellEffect, ShellView, WindowId, WindowInfo, WindowList};
use tracing::{debug, trace};

/// What the scene needs from a client toplevel.
pub trait Toplevel {
    /// Configure fullscreen at `size` and send the configure.
    fn configure_fullscreen(&self, size: (i32, i32));
    fn set_activated(&self, activated: bool);
    fn send_close(&self);
    fn title(&self) -> Option<String>;
    fn app_id(&self) -> Option<String>;
}

/// Work for the seat, drained by the compositor glue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatRequest {
    /// Keyboard focus moves to this window, or nowhere.
    Focus(Option<WindowId>),
    /// Press and release the back key on this window.
    BackKey(WindowId),
    ShowKeyboard,
}

/// Shell-drawn layers.
#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    LockScreen,
    Home,
    Switcher { windows: Vec<WindowId> },
    QuickSettings,
    Settings,
    /// Panel sliding in with an edge swipe.
    Reveal { edge: Edge, progress: f64 },
    Keyboard,
}

/// One layer of a frame, bottom to top.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderItem {
    Surface(WindowId),
    Overlay(Overlay),
}

/// Solid rectangle in output pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub color: [f32; 4],
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32, color: [f32; 4]) -> Self {
        Self { x, y, w, h, color }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x as f64
            && y >= self.y as f64
            && x < (self.x + self.w) as f64
            && y < (self.y + self.h) as f64
    }
}

const SHELL_BG: [f32; 4] = [0.1, 0.1, 0.15, 1.0];
const LOCK_BG: [f32; 4] = [0.02, 0.02, 0.05, 1.0];
const SWITCHER_BG: [f32; 4] = [0.05, 0.05, 0.08, 1.0];
const CARD: [f32; 4] = [0.25, 0.25, 0.3, 1.0];
const PANEL: [f32; 4] = [0.15, 0.15, 0.2, 0.95];
const KEYBOARD: [f32; 4] = [0.2, 0.2, 0.22, 1.0];

/// Switcher card for each of `count` windows, stacked rows top to bottom.
pub fn switcher_cards(count: usize, size: (i32, i32)) -> Vec<Rect> {
    if count == 0 || size.1 <= 0 {
        return Vec::new();
    }
    let row = size.1 as f64 / count as f64;
    let margin = (row * 0.08).min(24.0) as i32;
    (0..count)
        .map(|i| {
            let top = (i as f64 * row) as i32;
            let bottom = ((i + 1) as f64 * row) as i32;
            Rect::new(
                margin,
                top + margin,
                (size.0 - 2 * margin).max(0),
                (bottom - top - 2 * margin).max(0),
                CARD,
            )
        })
        .collect()
}

/// Rectangles making up an overlay, bottom to top.
pub fn overlay_rects(overlay: &Overlay, size: (i32, i32)) -> Vec<Rect> {
    let (w, h) = size;
    match overlay {
        Overlay::LockScreen => vec![Rect::new(0, 0, w, h, LOCK_BG)],
        Overlay::Home | Overlay::Settings => vec![Rect::new(0, 0, w, h, SHELL_BG)],
        Overlay::Switcher { windows } => {
            let mut rects = vec![Rect::new(0, 0, w, h, SWITCHER_BG)];
            rects.extend(switcher_cards(windows.len(), size));
            rects
        }
        Overlay::QuickSettings => vec![Rect::new(0, 0, w, h / 2, PANEL)],
        Overlay::Reveal { edge, progress } => {
            let progress = progress.clamp(0.0, 1.0);
            let dw = (w as f64 * progress) as i32;
            let dh = (h as f64 * progress) as i32;
            let rect = match edge {
                Edge::Right => Rect::new(w - dw, 0, dw, h, PANEL),
                Edge::Left => Rect::new(0, 0, dw, h, PANEL),
                Edge::Top => Rect::new(0, 0, w, dh, PANEL),
                Edge::Bottom => Rect::new(0, h - dh, w, dh, PANEL),
            };
            vec![rect]
        }
        Overlay::Keyboard => {
            let kh = h * 2 / 5;
            vec![Rect::new(0, h - kh, w, kh, KEYBOARD)]
        }
    }
}

struct Surface<T> {
    id: WindowId,
    toplevel: T,
    visible: bool,
}

pub struct Scene<T> {
    output_size: (i32, i32),
    /// Stacking order, topmost last.
    surfaces: Vec<Surface<T>>,
    focus: Option<WindowId>,
    input_blocked: bool,
    keyboard_visible: bool,
    reveal: Option<(Edge, f64)>,
    needs_redraw: bool,
    requests: Vec<SeatRequest>,
    next_id: u64,
}

impl<T: Toplevel> Scene<T> {
    pub fn new(output_size: (i32, i32)) -> Self {
        Self {
            output_size,
            surfaces: Vec::new(),
            focus: None,
            input_blocked: false,
            keyboard_visible: false,
            reveal: None,
            needs_redraw: true,
            requests: Vec::new(),
            next_id: 1,
        }
    }

    pub fn output_size(&self) -> (i32, i32) {
        self.output_size
    }

    /// Take ownership of a new toplevel. It starts fullscreen and hidden;
    /// the shell decides whether to show it.
    pub fn map(&mut self, toplevel: T) -> WindowInfo {
        let id = WindowId(self.next_id);
        self.next_id += 1;
        toplevel.configure_fullscreen(self.output_size);
        let info = WindowInfo::new(
            id,
            toplevel.title().unwrap_or_default(),
            toplevel.app_id().unwrap_or_default(),
        );
        self.surfaces.push(Surface {
            id,
            toplevel,
            visible: false,
        });
        debug!(%id, "Surface mapped");
        info
    }

    /// Drop a toplevel. Focus moves nowhere until the shell says otherwise.
    pub fn unmap(&mut self, id: WindowId) -> Option<T> {
        let index = self.surfaces.iter().position(|s| s.id == id)?;
        let surface = self.surfaces.remove(index);
        if self.focus == Some(id) {
            self.focus = None;
            self.keyboard_visible = false;
            self.requests.push(SeatRequest::Focus(None));
        }
        self.needs_redraw = true;
        debug!(%id, "Surface unmapped");
        Some(surface.toplevel)
    }

    pub fn id_of(&self, toplevel: &T) -> Option<WindowId>
    where
        T: PartialEq,
    {
        self.surfaces
            .iter()
            .find(|s| s.toplevel == *toplevel)
            .map(|s| s.id)
    }

    /// First mapped toplevel matching `pred`.
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<WindowId> {
        self.surfaces
            .iter()
            .find(|s| pred(&s.toplevel))
            .map(|s| s.id)
    }

    pub fn get(&self, id: WindowId) -> Option<&T> {
        self.surface(id).map(|s| &s.toplevel)
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.focus
    }

    pub fn is_visible(&self, id: WindowId) -> bool {
        self.surface(id).is_some_and(|s| s.visible)
    }

    pub fn input_blocked(&self) -> bool {
        self.input_blocked
    }

    pub fn keyboard_visible(&self) -> bool {
        self.keyboard_visible
    }

    pub fn reveal(&self) -> Option<(Edge, f64)> {
        self.reveal
    }

    /// Drop the reveal overlay once its gesture is over.
    pub fn end_reveal(&mut self) {
        if self.reveal.take().is_some() {
            self.needs_redraw = true;
        }
    }

    fn surface(&self, id: WindowId) -> Option<&Surface<T>> {
        self.surfaces.iter().find(|s| s.id == id)
    }

    fn surface_mut(&mut self, id: WindowId) -> Option<&mut Surface<T>> {
        self.surfaces.iter_mut().find(|s| s.id == id)
    }

    fn clear_focus(&mut self) {
        if let Some(old) = self.focus.take() {
            if let Some(surface) = self.surface(old) {
                surface.toplevel.set_activated(false);
            }
            self.requests.push(SeatRequest::Focus(None));
        }
        self.keyboard_visible = false;
    }

    fn raise(&mut self, id: WindowId) {
        if let Some(index) = self.surfaces.iter().position(|s| s.id == id) {
            let surface = self.surfaces.remove(index);
            self.surfaces.push(surface);
        }
    }

    /// Carry out shell effects in order.
    pub fn apply(&mut self, effects: &[ShellEffect]) {
        for effect in effects {
            trace!(?effect, "Applying shell effect");
            match *effect {
                ShellEffect::Show(id) => {
                    if let Some(surface) = self.surface_mut(id) {
                        surface.visible = true;
                    }
                    self.needs_redraw = true;
                }
                ShellEffect::Hide(id) => {
                    if let Some(surface) = self.surface_mut(id) {
                        surface.visible = false;
                    }
                    if self.focus == Some(id) {
                        self.clear_focus();
                    }
                    self.needs_redraw = true;
                }
                ShellEffect::Focus(id) => {
                    if self.surface(id).is_none() {
                        continue;
                    }
                    if self.focus != Some(id) {
                        self.clear_focus();
                    }
                    self.raise(id);
                    if let Some(surface) = self.surface_mut(id) {
                        surface.visible = true;
                        surface.toplevel.set_activated(true);
                    }
                    if !self.input_blocked {
                        self.focus = Some(id);
                        self.requests.push(SeatRequest::Focus(Some(id)));
                    }
                    self.needs_redraw = true;
                }
                ShellEffect::ClearFocus => self.clear_focus(),
                ShellEffect::SendBack(id) => {
                    if self.surface(id).is_some() {
                        self.requests.push(SeatRequest::BackKey(id));
                    }
                }
                ShellEffect::ShowKeyboard => {
                    if self.focus.is_some() && !self.keyboard_visible {
                        self.keyboard_visible = true;
                        self.requests.push(SeatRequest::ShowKeyboard);
                        self.needs_redraw = true;
                    }
                }
                ShellEffect::RevealProgress { edge, progress } => {
                    self.reveal = Some((edge, progress));
                }
                ShellEffect::RevealCancelled => self.end_reveal(),
                ShellEffect::SetInputBlocked(blocked) => {
                    self.input_blocked = blocked;
                    if blocked {
                        self.clear_focus();
                    }
                }
                ShellEffect::Close(id) => {
                    if let Some(surface) = self.surface(id) {
                        surface.toplevel.send_close();
                    }
                }
                ShellEffect::Redraw => self.needs_redraw = true,
            }
        }
    }

    /// Output resized or rotated. Every surface is re-configured.
    pub fn set_output_size(&mut self, width: i32, height: i32) {
        self.output_size = (width, height);
        for surface in &self.surfaces {
            surface.toplevel.configure_fullscreen(self.output_size);
        }
        self.needs_redraw = true;
    }

    /// Client asked for fullscreen or maximize; both mean the whole output.
    pub fn fullscreen_request(&self, id: WindowId) {
        if let Some(surface) = self.surface(id) {
            surface.toplevel.configure_fullscreen(self.output_size);
        }
    }

    pub fn take_requests(&mut self) -> Vec<SeatRequest> {
        std::mem::take(&mut self.requests)
    }

    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.needs_redraw)
    }

    /// Layers of the next frame for `view`, bottom to top.
    pub fn render_list(&self, view: ShellView, windows: &WindowList) -> Vec<RenderItem> {
        let visible_surfaces = || {
            self.surfaces
                .iter()
                .filter(|s| s.visible)
                .map(|s| RenderItem::Surface(s.id))
        };

        let mut items = Vec::new();
        match view {
            ShellView::LockScreen => {
                items.push(RenderItem::Overlay(Overlay::LockScreen));
                return items;
            }
            ShellView::Home => items.push(RenderItem::Overlay(Overlay::Home)),
            ShellView::App => items.extend(visible_surfaces()),
            ShellView::Switcher => items.push(RenderItem::Overlay(Overlay::Switcher {
                windows: windows.ids().collect(),
            })),
            ShellView::QuickSettings => {
                items.extend(visible_surfaces());
                if items.is_empty() {
                    items.push(RenderItem::Overlay(Overlay::Home));
                }
                items.push(RenderItem::Overlay(Overlay::QuickSettings));
            }
            ShellView::Settings => items.push(RenderItem::Overlay(Overlay::Settings)),
        }

        if view == ShellView::App && self.keyboard_visible {
            items.push(RenderItem::Overlay(Overlay::Keyboard));
        }
        if let Some((edge, progress)) = self.reveal {
            if matches!(view, ShellView::App | ShellView::Home) {
                items.push(RenderItem::Overlay(Overlay::Reveal { edge, progress }));
            }
        }
        items
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    pub struct Calls {
        pub configures: Vec<(i32, i32)>,
        pub activated: Option<bool>,
        pub closed: bool,
    }

    /// Toplevel double recording what the scene did to it.
    #[derive(Debug, Clone, Default)]
    pub struct FakeToplevel {
        pub title: String,
        pub calls: Rc<RefCell<Calls>>,
    }

    impl FakeToplevel {
        pub fn new(title: &str) -> Self {
            Self {
                title: title.to_string(),
                calls: Rc::default(),
            }
        }
    }

    impl PartialEq for FakeToplevel {
        fn eq(&self, other: &Self) -> bool {
            Rc::ptr_eq(&self.calls, &other.calls)
        }
    }

    impl Toplevel for FakeToplevel {
        fn configure_fullscreen(&self, size: (i32, i32)) {
            self.calls.borrow_mut().configures.push(size);
        }
        fn set_activated(&self, activated: bool) {
            self.calls.borrow_mut().activated = Some(activated);
        }
        fn send_close(&self) {
            self.calls.borrow_mut().closed = true;
        }
        fn title(&self) -> Option<String> {
            Some(self.title.clone())
        }
        fn app_id(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_map_configures_fullscreen_hidden() {
        let mut scene = Scene::new((720, 1440));
        let toplevel = FakeToplevel::new("term");
        let info = scene.map(toplevel.clone());
        assert_eq!(info.title, "term");
        assert_eq!(info.app_id, "");
        assert_eq!(toplevel.calls.borrow().configures, vec![(720, 1440)]);
        assert!(!scene.is_visible(info.id));
        assert_eq!(scene.id_of(&toplevel), Some(info.id));
    }

    #[test]
    fn test_focus_raises_and_activates() {
        let mut scene = Scene::new((720, 1440));
        let a = FakeToplevel::new("a");
        let b = FakeToplevel::new("b");
        let a_id = scene.map(a.clone()).id;
        let b_id = scene.map(b.clone()).id;

        scene.apply(&[ShellEffect::Focus(a_id)]);
        assert_eq!(scene.focused(), Some(a_id));
        assert_eq!(a.calls.borrow().activated, Some(true));
        assert_eq!(
            scene.render_list(ShellView::App, &WindowList::new()),
            vec![RenderItem::Surface(a_id)]
        );

        scene.apply(&[ShellEffect::Show(b_id), ShellEffect::Focus(b_id)]);
        assert_eq!(a.calls.borrow().activated, Some(false));
        assert_eq!(
            scene.render_list(ShellView::App, &WindowList::new()),
            vec![RenderItem::Surface(a_id), RenderItem::Surface(b_id)]
        );
        scene.apply(&[ShellEffect::Focus(a_id)]);
        assert_eq!(
            scene.render_list(ShellView::App, &WindowList::new()),
            vec![RenderItem::Surface(b_id), RenderItem::Surface(a_id)]
        );
        assert_eq!(
            scene.take_requests(),
            vec![
                SeatRequest::Focus(Some(a_id)),
                SeatRequest::Focus(None),
                SeatRequest::Focus(Some(b_id)),
                SeatRequest::Focus(None),
                SeatRequest::Focus(Some(a_id)),
            ]
        );
    }

    #[test]
    fn test_blocked_input_gets_no_focus() {
        let mut scene = Scene::new((720, 1440));
        let id = scene.map(FakeToplevel::new("a")).id;
        scene.apply(&[ShellEffect::SetInputBlocked(true), ShellEffect::Focus(id)]);
        assert_eq!(scene.focused(), None);
        assert!(scene.take_requests().is_empty());
        assert_eq!(
            scene.render_list(ShellView::LockScreen, &WindowList::new()),
            vec![RenderItem::Overlay(Overlay::LockScreen)]
        );
    }

    #[test]
    fn test_unmap_drops_focus() {
        let mut scene = Scene::new((720, 1440));
        let id = scene.map(FakeToplevel::new("a")).id;
        scene.apply(&[ShellEffect::Focus(id), ShellEffect::ShowKeyboard]);
        assert!(scene.keyboard_visible());
        scene.take_requests();

        assert!(scene.unmap(id).is_some());
        assert!(scene.unmap(id).is_none());
        assert_eq!(scene.focused(), None);
        assert!(!scene.keyboard_visible());
        assert_eq!(scene.take_requests(), vec![SeatRequest::Focus(None)]);
    }

    #[test]
    fn test_back_close_and_resize() {
        let mut scene = Scene::new((720, 1440));
        let toplevel = FakeToplevel::new("a");
        let id = scene.map(toplevel.clone()).id;

        scene.apply(&[ShellEffect::SendBack(id), ShellEffect::Close(id)]);
        assert_eq!(scene.take_requests(), vec![SeatRequest::BackKey(id)]);
        assert!(toplevel.calls.borrow().closed);

        scene.set_output_size(1440, 720);
        scene.fullscreen_request(id);
        assert_eq!(
            toplevel.calls.borrow().configures,
            vec![(720, 1440), (1440, 720), (1440, 720)]
        );
    }

    #[test]
    fn test_switcher_cards_tile_the_output() {
        let cards = switcher_cards(3, (720, 1440));
        assert_eq!(cards.len(), 3);
        assert!(cards[0].contains(360.0, 240.0));
        assert!(cards[1].contains(360.0, 720.0));
        assert!(cards[2].contains(360.0, 1200.0));
        assert!(!cards[0].contains(360.0, 1.0));
        assert!(switcher_cards(0, (720, 1440)).is_empty());
    }

    #[test]
    fn test_reveal_rect_follows_progress() {
        let rects = overlay_rects(
            &Overlay::Reveal {
                edge: Edge::Right,
                progress: 0.25,
            },
            (800, 1600),
        );
        assert_eq!(rects.len(), 1);
        assert_eq!((rects[0].x, rects[0].w, rects[0].h), (600, 200, 1600));
    }

    #[test]
    fn test_overlays_per_view() {
        let mut scene: Scene<FakeToplevel> = Scene::new((720, 1440));
        let mut windows = WindowList::new();
        windows.insert(WindowInfo::new(WindowId(7), "", ""));

        assert_eq!(
            scene.render_list(ShellView::Switcher, &windows),
            vec![RenderItem::Overlay(Overlay::Switcher {
                windows: vec![WindowId(7)]
            })]
        );

        scene.apply(&[ShellEffect::RevealProgress {
            edge: Edge::Right,
            progress: 0.4,
        }]);
        assert_eq!(
            scene.render_list(ShellView::Home, &windows),
            vec![
                RenderItem::Overlay(Overlay::Home),
                RenderItem::Overlay(Overlay::Reveal {
                    edge: Edge::Right,
                    progress: 0.4
                })
            ]
        );
        scene.apply(&[ShellEffect::RevealCancelled]);
        assert_eq!(scene.reveal(), None);
        assert_eq!(
            scene.render_list(ShellView::QuickSettings, &windows),
            vec![
                RenderItem::Overlay(Overlay::Home),
                RenderItem::Overlay(Overlay::QuickSettings)
            ]
        );
    }
}
