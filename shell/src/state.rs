//! Compositor state - the heart of Flick
//!
//! Wayland globals and protocol handlers. Shell behaviour lives in
//! [`Desktop`]; the handlers here only translate protocol events into
//! desktop calls and carry the resulting seat requests back out.

use std::{cell::RefCell, ffi::OsString, rc::Rc, sync::Arc, time::Instant};

use anyhow::{Context, Result};
use smithay::{
    delegate_compositor, delegate_data_device, delegate_output, delegate_seat, delegate_shm,
    delegate_xdg_shell,
    backend::renderer::utils::with_renderer_surface_state,
    desktop::{PopupKind, PopupManager, Window},
    input::{
        dnd::DndGrabHandler,
        keyboard::{FilterResult, Keycode},
        Seat, SeatHandler, SeatState,
    },
    output::Output,
    reexports::{
        calloop::LoopHandle,
        wayland_protocols::xdg::shell::server::xdg_toplevel,
        wayland_server::{
            backend::{ClientData, ClientId, DisconnectReason},
            protocol::{wl_buffer, wl_output, wl_seat, wl_surface::WlSurface},
            Client, Display, DisplayHandle, Resource,
        },
    },
    utils::{Logical, Serial, Size, SERIAL_COUNTER},
    wayland::{
        buffer::BufferHandler,
        compositor::{
            get_parent, is_sync_subsurface, with_states, CompositorClientState, CompositorHandler,
            CompositorState,
        },
        output::{OutputHandler, OutputManagerState},
        selection::{
            data_device::{
                set_data_device_focus, DataDeviceHandler, DataDeviceState, WaylandDndGrabHandler,
            },
            SelectionHandler,
        },
        shell::xdg::{
            PopupSurface, PositionerState, ToplevelSurface, XdgShellHandler, XdgShellState,
            XdgToplevelSurfaceData,
        },
        shm::{ShmHandler, ShmState},
        socket::ListeningSocketSource,
    },
};
use tracing::{debug, info, warn};

use crate::config::FlickConfig;
use crate::desktop::{Desktop, MapChange};
use crate::input::keys::KEY_BACK;
use crate::scene::{SeatRequest, Toplevel};
use crate::shell::{ShellAction, ShellView, UnlockSignal, WindowId};

/// Client-specific state
#[derive(Default)]
pub struct ClientState {
    pub compositor_state: CompositorClientState,
}

impl ClientData for ClientState {
    fn initialized(&self, client_id: ClientId) {
        info!("Client {:?} initialized", client_id);
    }
    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        info!("Client {:?} disconnected: {:?}", client_id, reason);
    }
}

fn toplevel_attribute<T>(
    toplevel: &ToplevelSurface,
    f: impl FnOnce(&smithay::wayland::shell::xdg::XdgToplevelSurfaceRoleAttributes) -> T,
) -> Option<T> {
    with_states(toplevel.wl_surface(), |states| {
        states
            .data_map
            .get::<XdgToplevelSurfaceData>()
            .and_then(|data| data.lock().ok().map(|attrs| f(&attrs)))
    })
}

fn is_window_surface(window: &Window, surface: &WlSurface) -> bool {
    window
        .toplevel()
        .map(|t| t.wl_surface() == surface)
        .unwrap_or(false)
}

impl Toplevel for Window {
    fn configure_fullscreen(&self, size: (i32, i32)) {
        let Some(toplevel) = self.toplevel() else {
            return;
        };
        toplevel.with_pending_state(|state| {
            state.size = Some(size.into());
            // Fullscreen tells the client not to draw decorations
            state.states.set(xdg_toplevel::State::Fullscreen);
            state.states.unset(xdg_toplevel::State::Maximized);
        });
        if toplevel.is_initial_configure_sent() {
            toplevel.send_pending_configure();
        } else {
            toplevel.send_configure();
        }
    }

    fn set_activated(&self, activated: bool) {
        if Window::set_activated(self, activated) {
            if let Some(toplevel) = self.toplevel() {
                toplevel.send_pending_configure();
            }
        }
    }

    fn send_close(&self) {
        if let Some(toplevel) = self.toplevel() {
            toplevel.send_close();
        }
    }

    fn title(&self) -> Option<String> {
        self.toplevel()
            .and_then(|t| toplevel_attribute(t, |attrs| attrs.title.clone()))
            .flatten()
    }

    fn app_id(&self) -> Option<String> {
        self.toplevel()
            .and_then(|t| toplevel_attribute(t, |attrs| attrs.app_id.clone()))
            .flatten()
    }
}

/// The main compositor state
pub struct Flick {
    pub start_time: Instant,
    pub socket_name: OsString,
    pub display_handle: DisplayHandle,
    pub display: Rc<RefCell<Display<Self>>>,

    // Wayland state
    pub compositor_state: CompositorState,
    pub xdg_shell_state: XdgShellState,
    pub shm_state: ShmState,
    pub output_manager_state: OutputManagerState,
    pub data_device_state: DataDeviceState,
    pub seat_state: SeatState<Self>,
    pub seat: Seat<Self>,
    pub popup_manager: PopupManager,

    // Shell
    pub desktop: Desktop<Window>,
    pub unlock_signal: UnlockSignal,

    // Outputs
    pub outputs: Vec<Output>,
    pub screen_size: Size<i32, Logical>,

    pub running: bool,
}

impl Flick {
    pub fn new(
        display: Display<Self>,
        loop_handle: LoopHandle<'static, Self>,
        screen_size: Size<i32, Logical>,
        config: &FlickConfig,
        start_locked: bool,
    ) -> Result<Self> {
        let start_time = Instant::now();
        let display_handle = display.handle();
        let display = Rc::new(RefCell::new(display));

        // Initialize Wayland globals
        let compositor_state = CompositorState::new::<Self>(&display_handle);
        let xdg_shell_state = XdgShellState::new::<Self>(&display_handle);
        let shm_state = ShmState::new::<Self>(&display_handle, vec![]);
        let output_manager_state = OutputManagerState::new_with_xdg_output::<Self>(&display_handle);
        let data_device_state = DataDeviceState::new::<Self>(&display_handle);

        // Set up seat (input devices)
        let mut seat_state = SeatState::new();
        let mut seat = seat_state.new_wl_seat(&display_handle, "seat0");
        seat.add_keyboard(Default::default(), 200, 25)
            .context("Failed to add keyboard to seat")?;
        seat.add_pointer();
        seat.add_touch();

        // Create the Wayland socket
        let socket = ListeningSocketSource::new_auto().context("Failed to create socket")?;
        let socket_name = socket.socket_name().to_os_string();
        loop_handle
            .insert_source(socket, move |client, _, state| {
                debug!("New Wayland client connected");
                if let Err(err) = state
                    .display_handle
                    .insert_client(client, Arc::new(ClientState::default()))
                {
                    warn!("Error inserting client: {}", err);
                }
            })
            .map_err(|e| anyhow::anyhow!("Failed to insert socket source: {:?}", e))?;
        info!("Wayland socket: {:?}", socket_name);

        let unlock_signal = UnlockSignal::default();
        if let Err(e) = unlock_signal.clear() {
            warn!("Failed to clear stale unlock signal: {}", e);
        }

        let desktop = Desktop::new(config, (screen_size.w, screen_size.h), start_locked);

        Ok(Self {
            start_time,
            socket_name,
            display_handle,
            display,
            compositor_state,
            xdg_shell_state,
            shm_state,
            output_manager_state,
            data_device_state,
            seat_state,
            seat,
            popup_manager: PopupManager::default(),
            desktop,
            unlock_signal,
            outputs: Vec::new(),
            screen_size,
            running: true,
        })
    }

    pub fn window(&self, id: WindowId) -> Option<&Window> {
        self.desktop.scene.get(id)
    }

    fn window_id(&self, surface: &ToplevelSurface) -> Option<WindowId> {
        self.desktop
            .shell
            .windows()
            .ids()
            .find(|id| self.window(*id).and_then(|w| w.toplevel()) == Some(surface))
    }

    /// Apply a shell action and flush the resulting seat work.
    pub fn shell_action(&mut self, action: ShellAction) {
        self.desktop.action(action);
        self.process_seat_requests();
    }

    /// Carry out what the scene queued for the seat.
    pub fn process_seat_requests(&mut self) {
        for request in self.desktop.scene.take_requests() {
            match request {
                SeatRequest::Focus(id) => {
                    let surface = id
                        .and_then(|id| self.window(id))
                        .and_then(|w| w.toplevel())
                        .map(|t| t.wl_surface().clone());
                    debug!(?id, "Keyboard focus");
                    if let Some(keyboard) = self.seat.get_keyboard() {
                        keyboard.set_focus(self, surface, SERIAL_COUNTER.next_serial());
                    }
                }
                SeatRequest::BackKey(id) => {
                    debug!(%id, "Sending back key");
                    self.inject_keycode(KEY_BACK);
                }
                SeatRequest::ShowKeyboard => {
                    info!("On-screen keyboard requested");
                }
            }
        }
    }

    /// Inject a single keycode (evdev) as press+release
    fn inject_keycode(&mut self, evdev_keycode: u32) {
        let Some(keyboard) = self.seat.get_keyboard() else {
            return;
        };
        let time = self.start_time.elapsed().as_millis() as u32;
        let keycode = Keycode::new(evdev_keycode + 8);
        for key_state in [
            smithay::backend::input::KeyState::Pressed,
            smithay::backend::input::KeyState::Released,
        ] {
            keyboard.input::<(), _>(
                self,
                keycode,
                key_state,
                SERIAL_COUNTER.next_serial(),
                time,
                |_, _, _| FilterResult::Forward,
            );
        }
    }

    /// Unlock once the lock screen client wrote the signal file.
    pub fn poll_unlock(&mut self) {
        if self.desktop.view() == ShellView::LockScreen && self.unlock_signal.poll() {
            info!("Unlock signal found, unlocking");
            self.shell_action(ShellAction::Unlock);
        }
    }

    pub fn set_output_size(&mut self, size: Size<i32, Logical>) {
        self.screen_size = size;
        self.desktop.set_output_size(size.w, size.h);
    }
}

impl CompositorHandler for Flick {
    fn compositor_state(&mut self) -> &mut CompositorState {
        &mut self.compositor_state
    }

    fn client_compositor_state<'a>(&self, client: &'a Client) -> &'a CompositorClientState {
        // Internal clients may not carry ClientState
        static DEFAULT_CLIENT_STATE: std::sync::OnceLock<ClientState> = std::sync::OnceLock::new();

        match client.get_data::<ClientState>() {
            Some(state) => &state.compositor_state,
            None => {
                &DEFAULT_CLIENT_STATE
                    .get_or_init(ClientState::default)
                    .compositor_state
            }
        }
    }

    fn commit(&mut self, surface: &WlSurface) {
        smithay::backend::renderer::utils::on_commit_buffer_handler::<Self>(surface);
        self.popup_manager.commit(surface);

        if is_sync_subsurface(surface) {
            return;
        }
        let mut root = surface.clone();
        while let Some(parent) = get_parent(&root) {
            root = parent;
        }
        if let Some(window) = self.desktop.find_toplevel(|w| is_window_surface(w, &root)) {
            window.on_commit();
        }
        if surface != &root {
            return;
        }

        let has_buffer = with_renderer_surface_state(surface, |state| state.buffer().is_some())
            .unwrap_or(false);
        match self
            .desktop
            .toplevel_committed(|w| is_window_surface(w, surface), has_buffer)
        {
            Some(MapChange::Mapped(id)) => {
                // Touch sequences on the previous app must not continue into this one
                if let Some(touch) = self.seat.get_touch() {
                    touch.cancel(self);
                }
                info!(%id, view = ?self.desktop.view(), "Toplevel mapped");
                self.process_seat_requests();
            }
            Some(MapChange::Unmapped(id)) => {
                info!(%id, "Toplevel unmapped");
                self.process_seat_requests();
            }
            None => {}
        }
    }
}

impl BufferHandler for Flick {
    fn buffer_destroyed(&mut self, _buffer: &wl_buffer::WlBuffer) {}
}

impl ShmHandler for Flick {
    fn shm_state(&self) -> &ShmState {
        &self.shm_state
    }
}

impl SeatHandler for Flick {
    type KeyboardFocus = WlSurface;
    type PointerFocus = WlSurface;
    type TouchFocus = WlSurface;

    fn seat_state(&mut self) -> &mut SeatState<Self> {
        &mut self.seat_state
    }

    fn focus_changed(&mut self, seat: &Seat<Self>, focused: Option<&Self::KeyboardFocus>) {
        let dh = &self.display_handle;
        let client = focused.and_then(|s| dh.get_client(s.id()).ok());
        set_data_device_focus(dh, seat, client);
    }

    fn cursor_image(
        &mut self,
        _seat: &Seat<Self>,
        _image: smithay::input::pointer::CursorImageStatus,
    ) {
    }

    fn led_state_changed(
        &mut self,
        _seat: &Seat<Self>,
        _led_state: smithay::input::keyboard::LedState,
    ) {
    }
}

impl SelectionHandler for Flick {
    type SelectionUserData = ();
}

impl DataDeviceHandler for Flick {
    fn data_device_state(&mut self) -> &mut DataDeviceState {
        &mut self.data_device_state
    }
}

impl WaylandDndGrabHandler for Flick {}

impl DndGrabHandler for Flick {}

impl XdgShellHandler for Flick {
    fn xdg_shell_state(&mut self) -> &mut XdgShellState {
        &mut self.xdg_shell_state
    }

    fn new_toplevel(&mut self, surface: ToplevelSurface) {
        debug!("New toplevel: {:?}", surface.wl_surface().id());
        self.desktop.add_toplevel(Window::new_wayland_window(surface));
    }

    fn toplevel_destroyed(&mut self, surface: ToplevelSurface) {
        let id = self.window_id(&surface);
        if self
            .desktop
            .remove_toplevel(|w| w.toplevel() == Some(&surface))
            .is_some()
        {
            info!(?id, "Toplevel destroyed");
            self.process_seat_requests();
        }
    }

    fn new_popup(&mut self, surface: PopupSurface, _positioner: PositionerState) {
        if let Err(e) = self.popup_manager.track_popup(PopupKind::Xdg(surface.clone())) {
            warn!("Failed to track popup: {:?}", e);
        }
        if let Err(e) = surface.send_configure() {
            warn!("Failed to configure popup: {:?}", e);
        }
    }

    fn grab(&mut self, _surface: PopupSurface, _seat: wl_seat::WlSeat, _serial: Serial) {
        debug!("Popup grab requested, not supported");
    }

    fn reposition_request(
        &mut self,
        surface: PopupSurface,
        _positioner: PositionerState,
        token: u32,
    ) {
        surface.send_repositioned(token);
        if let Err(e) = surface.send_configure() {
            warn!("Failed to reconfigure popup: {:?}", e);
        }
    }

    fn fullscreen_request(&mut self, surface: ToplevelSurface, _output: Option<wl_output::WlOutput>) {
        if let Some(id) = self.window_id(&surface) {
            self.desktop.scene.fullscreen_request(id);
        }
    }

    fn unfullscreen_request(&mut self, surface: ToplevelSurface) {
        // Everything stays fullscreen
        self.fullscreen_request(surface, None);
    }

    fn maximize_request(&mut self, surface: ToplevelSurface) {
        self.fullscreen_request(surface, None);
    }

    fn unmaximize_request(&mut self, surface: ToplevelSurface) {
        self.fullscreen_request(surface, None);
    }

    fn move_request(&mut self, surface: ToplevelSurface, _seat: wl_seat::WlSeat, _serial: Serial) {
        debug!("Ignoring move request from {:?}", surface.wl_surface().id());
    }

    fn resize_request(
        &mut self,
        surface: ToplevelSurface,
        _seat: wl_seat::WlSeat,
        _serial: Serial,
        _edges: xdg_toplevel::ResizeEdge,
    ) {
        debug!("Ignoring resize request from {:?}", surface.wl_surface().id());
    }
}

impl OutputHandler for Flick {}

delegate_compositor!(Flick);
delegate_shm!(Flick);
delegate_seat!(Flick);
delegate_data_device!(Flick);
delegate_output!(Flick);
delegate_xdg_shell!(Flick);
