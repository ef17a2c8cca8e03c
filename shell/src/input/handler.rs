//! libinput events into the desktop and on to clients

use smithay::backend::input::{
    AbsolutePositionEvent, Event, InputBackend, InputEvent, KeyboardKeyEvent, KeyState,
    TouchEvent,
};
use smithay::input::keyboard::FilterResult;
use smithay::input::touch::{DownEvent, MotionEvent, UpEvent};
use smithay::utils::{Logical, Point, SERIAL_COUNTER};
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use tracing::debug;

use crate::desktop::TouchRoute;
use crate::input::{keys, Position};
use crate::shell::WindowId;
use crate::state::Flick;

fn client_surface(state: &Flick, id: WindowId) -> Option<(WlSurface, Point<f64, Logical>)> {
    state
        .window(id)
        .and_then(|w| w.toplevel())
        .map(|t| (t.wl_surface().clone(), (0.0, 0.0).into()))
}

/// Handle one input event from any backend.
pub fn handle_input_event<B: InputBackend>(state: &mut Flick, event: InputEvent<B>) {
    match event {
        InputEvent::Keyboard { event } => {
            let keycode = event.key_code();
            let key_state = event.state();
            let pressed = key_state == KeyState::Pressed;

            // Smithay Keycode.raw() returns XKB keycodes (evdev + 8)
            let evdev_keycode = keys::xkb_to_evdev(keycode.raw());
            debug!("Keyboard event: evdev_keycode={}, pressed={}", evdev_keycode, pressed);

            let consumed = state.desktop.key(evdev_keycode, pressed);
            state.process_seat_requests();

            if let Some(keyboard) = state.seat.get_keyboard() {
                // Always fed through so xkb modifier state stays right
                keyboard.input::<(), _>(
                    state,
                    keycode,
                    key_state,
                    SERIAL_COUNTER.next_serial(),
                    event.time_msec(),
                    |_, _, _| {
                        if consumed {
                            FilterResult::Intercept(())
                        } else {
                            FilterResult::Forward
                        }
                    },
                );
            }
        }

        InputEvent::TouchDown { event } => {
            let slot_id: i32 = event.slot().into();
            let position = event.position_transformed(state.screen_size);
            let route = state.desktop.touch_down(
                slot_id,
                Position::new(position.x, position.y),
                event.time_msec(),
            );
            state.process_seat_requests();

            if let TouchRoute::Client(id) = route {
                let focus = client_surface(state, id);
                if let Some(touch) = state.seat.get_touch() {
                    touch.down(
                        state,
                        focus,
                        &DownEvent {
                            slot: event.slot(),
                            location: position,
                            serial: SERIAL_COUNTER.next_serial(),
                            time: event.time_msec(),
                        },
                    );
                }
            }
        }

        InputEvent::TouchMotion { event } => {
            let slot_id: i32 = event.slot().into();
            let position = event.position_transformed(state.screen_size);
            let route = state.desktop.touch_motion(
                slot_id,
                Position::new(position.x, position.y),
                event.time_msec(),
            );
            state.process_seat_requests();

            if let TouchRoute::Client(id) = route {
                let focus = client_surface(state, id);
                if let Some(touch) = state.seat.get_touch() {
                    touch.motion(
                        state,
                        focus,
                        &MotionEvent {
                            slot: event.slot(),
                            location: position,
                            time: event.time_msec(),
                        },
                    );
                }
            }
        }

        InputEvent::TouchUp { event } => {
            let slot_id: i32 = event.slot().into();
            let route = state.desktop.touch_up(slot_id, event.time_msec());
            state.process_seat_requests();

            if let TouchRoute::Client(_) = route {
                if let Some(touch) = state.seat.get_touch() {
                    touch.up(
                        state,
                        &UpEvent {
                            slot: event.slot(),
                            serial: SERIAL_COUNTER.next_serial(),
                            time: event.time_msec(),
                        },
                    );
                }
            }
        }

        InputEvent::TouchFrame { .. } => {
            if let Some(touch) = state.seat.get_touch() {
                touch.frame(state);
            }
        }

        InputEvent::TouchCancel { .. } => {
            state.desktop.touch_cancel_all();
            state.process_seat_requests();
            if let Some(touch) = state.seat.get_touch() {
                touch.cancel(state);
            }
        }

        _ => {}
    }
}
