//! Software composer
//!
//! Behaves like a cooperative hwc2 implementation without touching
//! hardware. Present fences come from a software [`Timeline`] whose
//! signaling can be immediate, delayed or driven by hand through
//! [`VirtualControl`], which also injects failures and records the calls
//! the pipeline made.

use super::{Composer, DisplayConfig, DisplayId, HalStatus, PowerMode, ValidateOutcome};
use crate::buffer::{Allocation, Allocator, BufferUsage, NativeHandle, PixelFormat};
use crate::error::InitStage;
use crate::events::{EventSender, HalEvent};
use crate::fence::{Fence, Timeline};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How present fences of the virtual display signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceMode {
    /// Present returns an already signaled fence.
    Immediate,
    /// Fences signal only through [`VirtualControl::signal_through`].
    Manual,
    /// Each fence signals on its own after the delay.
    Delayed(Duration),
}

/// Default panel: 1080x2340 at 60 Hz, 400 dpi.
pub const DEFAULT_CONFIG: DisplayConfig = DisplayConfig {
    width: 1080,
    height: 2340,
    vsync_period_ns: 16_666_667,
    dpi_x: 400.0,
    dpi_y: 400.0,
};

struct State {
    calls: Vec<&'static str>,
    fail_stage: Option<InitStage>,
    config: Option<DisplayConfig>,
    fence_mode: FenceMode,
    validate_failures: u32,
    present_failures: u32,
    validate_changes: u32,
    events: Option<EventSender>,
    device: bool,
    display: bool,
    layer: bool,
    power: PowerMode,
    vsync_enabled: bool,
    current_slot: Option<u32>,
    slot_points: HashMap<u32, u64>,
    next_point: u64,
    reuse_violations: u32,
    target_slots: Vec<u32>,
    presented: u32,
    accepted: u32,
    hotplugs: Vec<(DisplayId, bool)>,
    live_allocations: usize,
    next_handle: usize,
}

struct Shared {
    state: Mutex<State>,
    timeline: Timeline,
    epoch: Instant,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_stage(&self, stage: InitStage) -> Result<()> {
        if self.state().fail_stage == Some(stage) {
            return Err(Error::init(stage, "injected failure"));
        }
        Ok(())
    }

    fn timestamp_ns(&self) -> i64 {
        self.epoch.elapsed().as_nanos().min(i64::MAX as u128) as i64
    }
}

/// Entry point: hands out the composer, allocator and control handle, all
/// sharing one simulated device.
#[derive(Clone)]
pub struct VirtualHal {
    shared: Arc<Shared>,
}

impl Default for VirtualHal {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualHal {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    calls: Vec::new(),
                    fail_stage: None,
                    config: Some(DEFAULT_CONFIG),
                    fence_mode: FenceMode::Immediate,
                    validate_failures: 0,
                    present_failures: 0,
                    validate_changes: 0,
                    events: None,
                    device: false,
                    display: false,
                    layer: false,
                    power: PowerMode::Off,
                    vsync_enabled: false,
                    current_slot: None,
                    slot_points: HashMap::new(),
                    next_point: 0,
                    reuse_violations: 0,
                    target_slots: Vec::new(),
                    presented: 0,
                    accepted: 0,
                    hotplugs: Vec::new(),
                    live_allocations: 0,
                    next_handle: 0x1000,
                }),
                timeline: Timeline::new(),
                epoch: Instant::now(),
            }),
        }
    }

    pub fn control(&self) -> VirtualControl {
        VirtualControl {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn composer(&self) -> Box<dyn Composer> {
        Box::new(VirtualComposer {
            shared: Arc::clone(&self.shared),
            vsync: None,
        })
    }

    pub fn allocator(&self) -> Box<dyn Allocator> {
        Box::new(VirtualAllocator {
            shared: Arc::clone(&self.shared),
        })
    }

    pub(crate) fn window_created(&self) -> Result<()> {
        self.shared.check_stage(InitStage::NativeWindow)?;
        self.shared.state().calls.push("create_window");
        Ok(())
    }

    pub(crate) fn window_destroyed(&self) {
        self.shared.state().calls.push("destroy_window");
    }
}

/// Test/diagnostic handle onto a [`VirtualHal`].
#[derive(Clone)]
pub struct VirtualControl {
    shared: Arc<Shared>,
}

impl VirtualControl {
    /// Make the given init stage fail until cleared with `None`.
    pub fn fail_at(&self, stage: Option<InitStage>) {
        self.shared.state().fail_stage = stage;
    }

    pub fn set_config(&self, config: Option<DisplayConfig>) {
        self.shared.state().config = config;
    }

    pub fn set_fence_mode(&self, mode: FenceMode) {
        self.shared.state().fence_mode = mode;
    }

    pub fn fail_next_validates(&self, count: u32) {
        self.shared.state().validate_failures = count;
    }

    pub fn fail_next_presents(&self, count: u32) {
        self.shared.state().present_failures = count;
    }

    /// Next `count` validates report changed composition types.
    pub fn report_changes(&self, count: u32) {
        self.shared.state().validate_changes = count;
    }

    /// Signal every present fence up to and including the `n`-th.
    pub fn signal_through(&self, n: u64) {
        self.shared.timeline.signal(n);
    }

    pub fn signal_all(&self) {
        let last = self.shared.state().next_point;
        self.shared.timeline.signal(last);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.shared.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.shared.state().calls.clear();
    }

    pub fn presented(&self) -> u32 {
        self.shared.state().presented
    }

    pub fn accepted_changes(&self) -> u32 {
        self.shared.state().accepted
    }

    /// Slot of every client target submitted, in order.
    pub fn target_slots(&self) -> Vec<u32> {
        self.shared.state().target_slots.clone()
    }

    /// Client targets submitted for a slot whose previous present fence had
    /// not signaled yet.
    pub fn reuse_violations(&self) -> u32 {
        self.shared.state().reuse_violations
    }

    pub fn hotplugs(&self) -> Vec<(DisplayId, bool)> {
        self.shared.state().hotplugs.clone()
    }

    pub fn live_allocations(&self) -> usize {
        self.shared.state().live_allocations
    }

    pub fn power_mode(&self) -> PowerMode {
        self.shared.state().power
    }

    pub fn vsync_enabled(&self) -> bool {
        self.shared.state().vsync_enabled
    }

    /// Deliver a callback as the HAL would, on the calling thread.
    pub fn emit(&self, event: HalEvent) {
        let sender = self.shared.state().events.clone();
        if let Some(sender) = sender {
            sender.send(event);
        }
    }
}

struct VsyncThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VsyncThread {
    fn spawn(shared: Arc<Shared>, events: EventSender, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("virtual-vsync".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    std::thread::sleep(period);
                    events.send(HalEvent::Vsync {
                        display: super::PRIMARY_DISPLAY,
                        timestamp_ns: shared.timestamp_ns(),
                    });
                }
            })
            .ok();
        Self { stop, handle }
    }
}

impl Drop for VsyncThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct VirtualComposer {
    shared: Arc<Shared>,
    vsync: Option<VsyncThread>,
}

impl Composer for VirtualComposer {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn create_device(&mut self) -> Result<()> {
        self.shared.check_stage(InitStage::Device)?;
        let mut state = self.shared.state();
        state.device = true;
        state.calls.push("create_device");
        Ok(())
    }

    fn register_callbacks(&mut self, events: EventSender) -> Result<()> {
        self.shared.check_stage(InitStage::Callbacks)?;
        let mut state = self.shared.state();
        state.events = Some(events);
        state.calls.push("register_callbacks");
        Ok(())
    }

    fn on_hotplug(&mut self, display: DisplayId, connected: bool) {
        let mut state = self.shared.state();
        state.hotplugs.push((display, connected));
        state.calls.push("hotplug");
    }

    fn open_display(&mut self, display: DisplayId) -> Result<()> {
        self.shared.check_stage(InitStage::Display)?;
        let mut state = self.shared.state();
        if display != super::PRIMARY_DISPLAY {
            return Err(Error::Hal {
                call: "get_display_by_id",
                status: HalStatus::BAD_DISPLAY,
            });
        }
        state.display = true;
        state.calls.push("open_display");
        Ok(())
    }

    fn active_config(&mut self) -> Option<DisplayConfig> {
        let mut state = self.shared.state();
        state.calls.push("active_config");
        state.config
    }

    fn set_power_mode(&mut self, mode: PowerMode) -> Result<()> {
        let mut state = self.shared.state();
        if !state.display {
            return Err(Error::NotInitialized);
        }
        state.power = mode;
        state.calls.push(match mode {
            PowerMode::On => "power_on",
            PowerMode::Off => "power_off",
        });
        Ok(())
    }

    fn set_vsync_enabled(&mut self, enabled: bool) -> Result<()> {
        let (events, period) = {
            let mut state = self.shared.state();
            if !state.display {
                return Err(Error::NotInitialized);
            }
            state.vsync_enabled = enabled;
            state.calls.push(if enabled { "vsync_on" } else { "vsync_off" });
            let period = state
                .config
                .map_or(DEFAULT_CONFIG.vsync_period_ns, |c| c.vsync_period_ns)
                .max(1_000_000);
            (state.events.clone(), Duration::from_nanos(period as u64))
        };

        // Dropping the old thread joins it; the state lock must not be held.
        self.vsync = None;
        if enabled {
            if let Some(events) = events {
                self.vsync = Some(VsyncThread::spawn(Arc::clone(&self.shared), events, period));
            }
        }
        Ok(())
    }

    fn create_client_layer(&mut self, width: u32, height: u32) -> Result<()> {
        self.shared.check_stage(InitStage::Layer)?;
        let mut state = self.shared.state();
        if !state.display {
            return Err(Error::NotInitialized);
        }
        debug!("Virtual client layer {}x{}", width, height);
        state.layer = true;
        state.calls.push("create_layer");
        Ok(())
    }

    fn set_client_target(
        &mut self,
        slot: u32,
        _target: NativeHandle,
        acquire: Fence,
    ) -> Result<()> {
        // The virtual scanout engine reads the buffer right away.
        acquire.wait(Duration::from_millis(100))?;

        let reached = self.shared.timeline.current();
        let mut state = self.shared.state();
        if !state.layer {
            return Err(Error::Hal {
                call: "set_client_target",
                status: HalStatus::BAD_LAYER,
            });
        }
        if state.slot_points.get(&slot).is_some_and(|&p| p > reached) {
            state.reuse_violations += 1;
        }
        state.current_slot = Some(slot);
        state.target_slots.push(slot);
        Ok(())
    }

    fn validate(&mut self) -> Result<ValidateOutcome> {
        let mut state = self.shared.state();
        if state.validate_failures > 0 {
            state.validate_failures -= 1;
            return Err(Error::Hal {
                call: "validate",
                status: HalStatus::NO_RESOURCES,
            });
        }
        if state.validate_changes > 0 {
            state.validate_changes -= 1;
            return Ok(ValidateOutcome {
                num_types: 1,
                num_requests: 0,
            });
        }
        Ok(ValidateOutcome::default())
    }

    fn accept_changes(&mut self) -> Result<()> {
        self.shared.state().accepted += 1;
        Ok(())
    }

    fn present(&mut self) -> Result<Fence> {
        let (point, mode) = {
            let mut state = self.shared.state();
            if state.present_failures > 0 {
                state.present_failures -= 1;
                return Err(Error::Hal {
                    call: "present",
                    status: HalStatus::NOT_VALIDATED,
                });
            }
            state.presented += 1;
            let slot = state.current_slot.take();
            if state.fence_mode == FenceMode::Immediate {
                if let Some(slot) = slot {
                    state.slot_points.remove(&slot);
                }
                return Ok(Fence::signaled());
            }
            state.next_point += 1;
            let point = state.next_point;
            if let Some(slot) = slot {
                state.slot_points.insert(slot, point);
            }
            (point, state.fence_mode)
        };

        if let FenceMode::Delayed(delay) = mode {
            let timeline = self.shared.timeline.clone();
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                timeline.signal(point);
            });
        }
        Ok(self.shared.timeline.fence(point))
    }

    fn destroy_layer(&mut self) {
        let mut state = self.shared.state();
        if std::mem::take(&mut state.layer) {
            state.calls.push("destroy_layer");
        }
    }

    fn destroy_display(&mut self) {
        self.vsync = None;
        let mut state = self.shared.state();
        state.vsync_enabled = false;
        if std::mem::take(&mut state.display) {
            state.calls.push("destroy_display");
        }
    }

    fn destroy_device(&mut self) {
        let mut state = self.shared.state();
        state.events = None;
        if std::mem::take(&mut state.device) {
            state.calls.push("destroy_device");
        }
        info!("Virtual hwc2 device destroyed");
    }
}

pub struct VirtualAllocator {
    shared: Arc<Shared>,
}

impl Allocator for VirtualAllocator {
    fn initialize(&mut self) -> Result<()> {
        self.shared.check_stage(InitStage::Allocator)?;
        self.shared.state().calls.push("gralloc_init");
        Ok(())
    }

    fn allocate(
        &mut self,
        width: u32,
        _height: u32,
        _format: PixelFormat,
        _usage: BufferUsage,
    ) -> Result<Allocation> {
        let mut state = self.shared.state();
        state.next_handle += 1;
        state.live_allocations += 1;
        Ok(Allocation {
            handle: NativeHandle::from_raw(state.next_handle),
            // Row pitch aligned to 16 pixels, as most gralloc implementations do.
            stride_pixels: width.next_multiple_of(16),
        })
    }

    fn release(&mut self, handle: NativeHandle) {
        if handle.is_null() {
            return;
        }
        let mut state = self.shared.state();
        state.live_allocations = state.live_allocations.saturating_sub(1);
    }
}
