//! Display backend context
//!
//! [`HwcContext`] brings the HAL up in a fixed order, owns everything it
//! acquired and releases it in reverse. It is the only entry point the
//! compositor uses to reach the display.

use crate::display::{process_env, DisplayInfo, FB_VIRTUAL_SIZE};
use crate::error::{set_last_error, InitStage};
use crate::events::{event_queue, EventSender, HalEvent, DEFAULT_QUEUE_CAPACITY};
use crate::fence::Fence;
use crate::gbm_device::GbmDevice;
use crate::hal::virtual_hal::VirtualHal;
use crate::hal::{PowerMode, PRIMARY_DISPLAY};
use crate::present::{FrameStats, Presenter};
use crate::unblank::{unblank_display, UnblankPaths};
use crate::window::{NativeWindow, VirtualWindow};
use crate::{Error, Result};
use calloop::channel::Channel;
use std::os::raw::c_void;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Which HAL to drive.
pub enum Backend {
    /// Software composer, no hardware access.
    Virtual(VirtualHal),
    /// Android hwcomposer2 through libhybris.
    #[cfg(feature = "hybris")]
    Hybris,
}

impl Backend {
    /// `FLICK_HWC_BACKEND=virtual|hybris`; hybris by default when built in.
    pub fn from_env() -> Self {
        match std::env::var("FLICK_HWC_BACKEND").as_deref() {
            Ok("virtual") => Backend::Virtual(VirtualHal::new()),
            #[cfg(feature = "hybris")]
            Ok("hybris") | Err(_) => Backend::Hybris,
            #[cfg(not(feature = "hybris"))]
            Ok("hybris") => {
                warn!("Built without libhybris support, using the virtual composer");
                Backend::Virtual(VirtualHal::new())
            }
            other => {
                debug!("FLICK_HWC_BACKEND={:?}, using default backend", other);
                Self::default_backend()
            }
        }
    }

    fn default_backend() -> Self {
        #[cfg(feature = "hybris")]
        {
            Backend::Hybris
        }
        #[cfg(not(feature = "hybris"))]
        {
            Backend::Virtual(VirtualHal::new())
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Virtual(_) => "virtual",
            #[cfg(feature = "hybris")]
            Backend::Hybris => "hybris",
        }
    }
}

/// Knobs for [`HwcContext::init`].
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Pause after the primary hotplug so the HAL can settle.
    pub hotplug_settle: Duration,
    /// Longest wait for a scanout slot's previous present fence.
    pub fence_timeout: Duration,
    pub event_queue_capacity: usize,
    /// `None` skips the unblank sequence.
    pub unblank: Option<UnblankPaths>,
    pub fb_virtual_size: PathBuf,
    /// Consult `FLICK_DISPLAY_WIDTH`/`HEIGHT` when the HAL has no size.
    pub use_env: bool,
    /// Forced panel size, overriding whatever the HAL reports.
    pub size_override: Option<(i32, i32)>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            hotplug_settle: Duration::from_millis(100),
            fence_timeout: Duration::from_millis(500),
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            unblank: Some(UnblankPaths::default()),
            fb_virtual_size: PathBuf::from(FB_VIRTUAL_SIZE),
            use_env: true,
            size_override: None,
        }
    }
}

#[derive(Debug, Default)]
struct Acquired {
    device: bool,
    display: bool,
    powered: bool,
    layer: bool,
}

type VsyncCallback = Box<dyn FnMut(i64)>;

pub struct HwcContext {
    presenter: Arc<Presenter>,
    gbm: Option<Arc<GbmDevice>>,
    window: Option<Box<dyn NativeWindow>>,
    acquired: Acquired,
    info: DisplayInfo,
    relay: Option<EventSender>,
    events: Option<Channel<HalEvent>>,
    vsync_callback: Option<VsyncCallback>,
    refresh_pending: bool,
    connected: bool,
    unblank: Option<UnblankPaths>,
    backend: &'static str,
}

impl HwcContext {
    /// Bring up the display pipeline.
    ///
    /// Order: allocator, hwc2 device, callback registration, primary
    /// hotplug (plus settle delay), display lookup and active config, power
    /// on, client layer, native window. On failure everything acquired so
    /// far is released in reverse and the error is also recorded as the
    /// thread's last error.
    pub fn init(backend: Backend, options: InitOptions) -> Result<Self> {
        info!("Initializing hwcomposer context ({} backend)", backend.name());
        let backend_name = backend.name();

        let (allocator, composer) = match &backend {
            Backend::Virtual(hal) => (hal.allocator(), hal.composer()),
            #[cfg(feature = "hybris")]
            Backend::Hybris => (
                Box::new(crate::hal::hybris::GrallocAllocator::new())
                    as Box<dyn crate::buffer::Allocator>,
                Box::new(crate::hal::hybris::HybrisComposer::new())
                    as Box<dyn crate::hal::Composer>,
            ),
        };

        let mut ctx = Self {
            presenter: Arc::new(Presenter::new(composer)),
            gbm: None,
            window: None,
            acquired: Acquired::default(),
            info: DisplayInfo::with_size(0, 0),
            relay: None,
            events: None,
            vsync_callback: None,
            refresh_pending: false,
            connected: false,
            unblank: options.unblank.clone(),
            backend: backend_name,
        };

        match ctx.bring_up(backend, allocator, &options) {
            Ok(()) => {
                info!(
                    "hwcomposer ready: {}x{} @ {:.1}Hz",
                    ctx.info.width, ctx.info.height, ctx.info.refresh_rate
                );
                Ok(ctx)
            }
            Err(err) => {
                error!("hwcomposer init failed: {}", err);
                set_last_error(&err);
                ctx.destroy();
                Err(err)
            }
        }
    }

    fn bring_up(
        &mut self,
        backend: Backend,
        mut allocator: Box<dyn crate::buffer::Allocator>,
        options: &InitOptions,
    ) -> Result<()> {
        self.unblank_display();

        allocator
            .initialize()
            .map_err(|e| at_stage(InitStage::Allocator, e))?;
        let gbm = Arc::new(GbmDevice::new(allocator));
        self.gbm = Some(Arc::clone(&gbm));

        let mut composer = self.presenter.composer();
        composer
            .create_device()
            .map_err(|e| at_stage(InitStage::Device, e))?;
        self.acquired.device = true;

        let (relay, channel) = event_queue(options.event_queue_capacity);
        composer
            .register_callbacks(relay.clone())
            .map_err(|e| at_stage(InitStage::Callbacks, e))?;
        self.relay = Some(relay);
        self.events = Some(channel);

        composer.on_hotplug(PRIMARY_DISPLAY, true);
        if !options.hotplug_settle.is_zero() {
            std::thread::sleep(options.hotplug_settle);
        }

        composer
            .open_display(PRIMARY_DISPLAY)
            .map_err(|e| at_stage(InitStage::Display, e))?;
        self.acquired.display = true;
        self.connected = true;

        let config = composer.active_config();
        let env = |key: &str| if options.use_env { process_env(key) } else { None };
        let mut info = DisplayInfo::resolve(config, env, &options.fb_virtual_size);
        if let Some((width, height)) = options.size_override {
            info!("Display size forced to {}x{}", width, height);
            info.width = width;
            info.height = height;
        }
        self.info = info;

        // Some panels are already on and reject the request; not fatal.
        match composer.set_power_mode(PowerMode::On) {
            Ok(()) => self.acquired.powered = true,
            Err(err) => warn!("set_power_mode(on) failed: {}", err),
        }

        let (width, height) = (info.width as u32, info.height as u32);
        composer
            .create_client_layer(width, height)
            .map_err(|e| at_stage(InitStage::Layer, e))?;
        self.acquired.layer = true;
        drop(composer);

        let window: Box<dyn NativeWindow> = match backend {
            Backend::Virtual(hal) => Box::new(
                VirtualWindow::new(
                    hal,
                    gbm,
                    Arc::clone(&self.presenter),
                    width,
                    height,
                    options.fence_timeout,
                )
                .map_err(|e| at_stage(InitStage::NativeWindow, e))?,
            ),
            #[cfg(feature = "hybris")]
            Backend::Hybris => Box::new(
                crate::hal::hybris::HybrisWindow::new(Arc::clone(&self.presenter), width, height)
                    .map_err(|e| at_stage(InitStage::NativeWindow, e))?,
            ),
        };
        debug!("Native window has {} buffers", window.buffer_count());
        self.window = Some(window);

        self.unblank_display();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.window.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    pub fn display_info(&self) -> DisplayInfo {
        self.info
    }

    /// `EGLNativeWindowType` for the renderer, null if there is none.
    pub fn native_window(&self) -> *mut c_void {
        self.window
            .as_ref()
            .map_or(std::ptr::null_mut(), |w| w.as_ptr())
    }

    /// Present a frame on windows that are not driven by EGL.
    pub fn queue_frame(&mut self, acquire: Fence) -> Result<()> {
        self.window
            .as_mut()
            .ok_or(Error::NotInitialized)?
            .queue_frame(acquire)
    }

    pub fn gbm(&self) -> Option<Arc<GbmDevice>> {
        self.gbm.clone()
    }

    pub fn set_power(&mut self, on: bool) -> Result<()> {
        if !self.acquired.display {
            return Err(Error::NotInitialized);
        }
        let mode = if on { PowerMode::On } else { PowerMode::Off };
        self.presenter.composer().set_power_mode(mode)?;
        self.acquired.powered = on;
        info!("Display power {}", if on { "on" } else { "off" });
        if on {
            self.unblank_display();
        }
        Ok(())
    }

    pub fn set_vsync_enabled(&mut self, enabled: bool) -> Result<()> {
        if !self.acquired.display {
            return Err(Error::NotInitialized);
        }
        self.presenter.composer().set_vsync_enabled(enabled)
    }

    /// Called from [`handle_event`](Self::handle_event) on the main loop
    /// with the vsync timestamp in nanoseconds.
    pub fn set_vsync_callback(&mut self, callback: Option<VsyncCallback>) {
        self.vsync_callback = callback;
    }

    pub fn stats(&self) -> FrameStats {
        self.presenter.stats()
    }

    /// HAL events lost to a full queue.
    pub fn dropped_events(&self) -> u64 {
        self.relay.as_ref().map_or(0, EventSender::dropped)
    }

    /// The receiving end of the HAL event relay, to be inserted into the
    /// main loop. Events must be fed back through `handle_event`.
    pub fn take_event_channel(&mut self) -> Option<Channel<HalEvent>> {
        self.events.take()
    }

    /// Process one relayed HAL event on the main loop.
    pub fn handle_event(&mut self, event: HalEvent) {
        match event {
            HalEvent::Vsync {
                display,
                timestamp_ns,
            } => {
                if display != PRIMARY_DISPLAY {
                    return;
                }
                if let Some(callback) = self.vsync_callback.as_mut() {
                    callback(timestamp_ns);
                }
            }
            HalEvent::Hotplug {
                display: display_id,
                connected,
                primary,
            } => {
                info!(display_id, connected, primary, "Hotplug");
                if self.acquired.device {
                    self.presenter.composer().on_hotplug(display_id, connected);
                }
                if display_id == PRIMARY_DISPLAY {
                    self.connected = connected;
                }
            }
            HalEvent::Refresh {
                display: display_id,
            } => {
                debug!(display_id, "HAL requested refresh");
                self.refresh_pending = true;
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the HAL asked for a redraw since the last call.
    pub fn take_refresh_request(&mut self) -> bool {
        std::mem::take(&mut self.refresh_pending)
    }

    pub fn unblank_display(&self) {
        if let Some(paths) = &self.unblank {
            unblank_display(paths);
        }
    }

    /// Release everything in reverse acquisition order. Safe to call more
    /// than once and on partially initialized contexts.
    pub fn destroy(&mut self) {
        if let Some(window) = self.window.take() {
            drop(window);
            debug!("Native window destroyed");
        }

        {
            let mut composer = self.presenter.composer();
            if std::mem::take(&mut self.acquired.powered) {
                if let Err(err) = composer.set_power_mode(PowerMode::Off) {
                    warn!("set_power_mode(off) failed: {}", err);
                }
            }
            if std::mem::take(&mut self.acquired.layer) {
                composer.destroy_layer();
            }
            if std::mem::take(&mut self.acquired.display) {
                composer.destroy_display();
            }
            if std::mem::take(&mut self.acquired.device) {
                composer.destroy_device();
                info!("hwcomposer context destroyed");
            }
        }

        self.relay = None;
        self.events = None;
        self.vsync_callback = None;
        self.gbm = None;
        self.connected = false;
    }
}

impl Drop for HwcContext {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn at_stage(stage: InitStage, err: Error) -> Error {
    match err {
        err @ Error::InitializationFailure { .. } => err,
        other => Error::init(stage, other),
    }
}
