//! Display and input backend for Flick
//!
//! - `hwcomposer`: the flick-hwc display pipeline, with EGL on hybris
//!   devices and direct presentation on the virtual composer
//! - `render`: desktop render list to smithay render elements
//!
//! Input comes from libinput over a libseat session. Without a session
//! (virtual display under a desktop session) the compositor still runs,
//! it just gets no touch input.

pub mod hwcomposer;
pub mod render;

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use anyhow::{Context, Result};
use calloop::{
    channel,
    timer::{TimeoutAction, Timer},
    EventLoop, LoopHandle,
};
use flick_hwc::{Backend, HwcContext, InitOptions, VirtualHal};
use smithay::{
    backend::{
        input::InputEvent,
        libinput::{LibinputInputBackend, LibinputSessionInterface},
        session::{libseat::LibSeatSession, Event as SessionEvent, Session},
    },
    output::{Mode, Output, PhysicalProperties, Subpixel},
    reexports::{input::Libinput, wayland_server::Display},
    utils::Transform,
};
use tracing::{debug, error, info, trace, warn};

use crate::config::FlickConfig;
use crate::input::handle_input_event;
use crate::shell::lock::LockConfig;
use crate::state::Flick;
use hwcomposer::HwcOutput;

const UNLOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn select_backend(config: &FlickConfig, virtual_display: bool) -> Backend {
    if virtual_display {
        return Backend::Virtual(VirtualHal::new());
    }
    match config.display.backend.as_deref() {
        Some("virtual") => Backend::Virtual(VirtualHal::new()),
        #[cfg(feature = "hybris")]
        Some("hybris") => Backend::Hybris,
        Some(other) => {
            warn!("Unknown display backend {:?} in config, using environment", other);
            Backend::from_env()
        }
        None => Backend::from_env(),
    }
}

/// libseat + libinput. The returned session must outlive the event loop.
fn init_input(
    loop_handle: &LoopHandle<'static, Flick>,
    session_active: Rc<Cell<bool>>,
) -> Result<LibSeatSession> {
    let (session, notifier) = LibSeatSession::new()
        .map_err(|e| anyhow::anyhow!("Failed to create session: {:?}", e))?;
    let seat_name = session.seat();
    info!("Session created, seat: {}", seat_name);

    let mut libinput_context =
        Libinput::new_with_udev(LibinputSessionInterface::from(session.clone()));
    libinput_context
        .udev_assign_seat(&seat_name)
        .map_err(|()| anyhow::anyhow!("Failed to assign seat {} to libinput", seat_name))?;
    let libinput_backend = LibinputInputBackend::new(libinput_context.clone());

    loop_handle
        .insert_source(notifier, move |event, _, state| match event {
            SessionEvent::PauseSession => {
                info!("Session paused");
                libinput_context.suspend();
                session_active.set(false);
                state.desktop.touch_cancel_all();
            }
            SessionEvent::ActivateSession => {
                info!("Session activated");
                if libinput_context.resume().is_err() {
                    error!("Failed to resume libinput");
                }
                session_active.set(true);
            }
        })
        .map_err(|e| anyhow::anyhow!("Failed to insert session source: {:?}", e))?;

    loop_handle
        .insert_source(libinput_backend, move |event, _, state| {
            if let InputEvent::DeviceAdded { device } = &event {
                debug!("Input device added: {}", device.name());
            }
            handle_input_event(state, event);
        })
        .map_err(|e| anyhow::anyhow!("Failed to insert input source: {:?}", e))?;

    Ok(session)
}

fn create_output(state: &mut Flick, ctx: &HwcContext) -> Output {
    let info = ctx.display_info();
    let output = Output::new(
        "hwcomposer-0".to_string(),
        PhysicalProperties {
            size: (info.physical_width, info.physical_height).into(),
            subpixel: Subpixel::Unknown,
            make: "Flick".to_string(),
            model: ctx.backend_name().to_string(),
            serial_number: "Unknown".to_string(),
        },
    );
    let mode = Mode {
        size: (info.width, info.height).into(),
        refresh: info.refresh_mhz(),
    };
    output.change_current_state(
        Some(mode),
        Some(Transform::Normal),
        None,
        Some((0, 0).into()),
    );
    output.set_preferred(mode);
    output.create_global::<Flick>(&state.display_handle);
    state.outputs.push(output.clone());
    info!(
        "Output registered: {}x{} @ {:.1}Hz, {:.0}x{:.0} dpi",
        info.width, info.height, info.refresh_rate, info.dpi_x, info.dpi_y
    );
    output
}

/// Bring up display, Wayland and input, then run until stopped.
pub fn run(config: &FlickConfig, virtual_display: bool) -> Result<()> {
    let mut event_loop: EventLoop<Flick> =
        EventLoop::try_new().context("Failed to create event loop")?;
    let loop_handle = event_loop.handle();

    let backend = select_backend(config, virtual_display);
    info!("Starting {} display backend", backend.name());
    let mut ctx = HwcContext::init(
        backend,
        InitOptions {
            hotplug_settle: config.display.hotplug_settle(),
            size_override: config.display.size_override(),
            ..InitOptions::default()
        },
    )
    .map_err(|e| anyhow::anyhow!("Display init failed: {}", e))?;
    let info = ctx.display_info();

    // Frames are paced by vsync; the timer below covers missed vsyncs
    let frame_due = Rc::new(Cell::new(true));
    let vsync_due = frame_due.clone();
    let mut vsync_count: u64 = 0;
    ctx.set_vsync_callback(Some(Box::new(move |timestamp_ns| {
        vsync_count += 1;
        trace!(timestamp_ns, vsync_count, "Vsync");
        vsync_due.set(true);
    })));
    if let Err(e) = ctx.set_vsync_enabled(true) {
        warn!("Failed to enable vsync, using timer pacing: {}", e);
    }
    let hal_events = ctx.take_event_channel();

    let display: Display<Flick> = Display::new().context("Failed to create Wayland display")?;
    let start_locked = config.shell.start_locked || LockConfig::load().requires_lock();
    let mut state = Flick::new(
        display,
        loop_handle.clone(),
        (info.width, info.height).into(),
        config,
        start_locked,
    )?;
    std::env::set_var("WAYLAND_DISPLAY", &state.socket_name);

    let output = create_output(&mut state, &ctx);
    let hwc = Rc::new(RefCell::new(HwcOutput::new(ctx, &output)?));

    if let Some(events) = hal_events {
        let hwc_for_events = hwc.clone();
        loop_handle
            .insert_source(events, move |event, _, _| {
                if let channel::Event::Msg(event) = event {
                    hwc_for_events.borrow_mut().context().handle_event(event);
                }
            })
            .map_err(|e| anyhow::anyhow!("Failed to insert HAL event source: {:?}", e))?;
    }

    let session_active = Rc::new(Cell::new(true));
    let _session = match init_input(&loop_handle, session_active.clone()) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!("No input devices: {:#}", e);
            None
        }
    };

    let period = Duration::from_nanos(info.vsync_period_ns.max(1_000_000) as u64);
    let timer_due = frame_due.clone();
    loop_handle
        .insert_source(Timer::from_duration(period), move |_, _, _| {
            timer_due.set(true);
            TimeoutAction::ToDuration(period)
        })
        .map_err(|e| anyhow::anyhow!("Failed to insert render timer: {:?}", e))?;

    loop_handle
        .insert_source(Timer::from_duration(UNLOCK_POLL_INTERVAL), |_, _, state| {
            state.poll_unlock();
            TimeoutAction::ToDuration(UNLOCK_POLL_INTERVAL)
        })
        .map_err(|e| anyhow::anyhow!("Failed to insert unlock timer: {:?}", e))?;

    info!("Entering event loop");
    let display = state.display.clone();
    while state.running {
        display
            .borrow_mut()
            .dispatch_clients(&mut state)
            .context("Failed to dispatch clients")?;

        event_loop
            .dispatch(Some(period), &mut state)
            .context("Event loop error")?;

        if !session_active.get() {
            continue;
        }

        {
            let mut hwc = hwc.borrow_mut();
            let refresh = hwc.context().take_refresh_request();
            let redraw = state.desktop.scene.take_redraw();
            if frame_due.replace(false) || refresh || redraw {
                if let Err(e) = hwc.render(&state, &output) {
                    error!("Render error: {:#}", e);
                }
            }
        }

        state.display_handle.flush_clients().ok();
    }

    info!(frames = hwc.borrow().frames(), "Event loop finished");
    hwc.borrow_mut().shutdown();
    Ok(())
}
