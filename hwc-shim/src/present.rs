//! Per-frame presentation
//!
//! Runs once for every frame the renderer finishes: submit the buffer as
//! client target with its acquire fence, validate (accepting changed
//! composition types once), present, and hand the present fence back to the
//! buffer's slot. A failing frame is counted and dropped; the next frame is
//! attempted regardless.

use crate::buffer::NativeHandle;
use crate::fence::Fence;
use crate::hal::Composer;
use crate::swapchain::SLOT_COUNT;
use crate::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

const ERROR_LOG_INTERVAL: u32 = 60;
const PROGRESS_LOG_INTERVAL: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Frames handed to the pipeline.
    pub frames: u32,
    /// Frames that failed somewhere between client target and present.
    pub errors: u32,
}

/// Owns the composer once initialization is done and serializes access to
/// it between the render thread and the control API.
pub struct Presenter {
    composer: Mutex<Box<dyn Composer>>,
    frames: AtomicU32,
    errors: AtomicU32,
    next_slot: AtomicU32,
}

impl Presenter {
    pub fn new(composer: Box<dyn Composer>) -> Self {
        Self {
            composer: Mutex::new(composer),
            frames: AtomicU32::new(0),
            errors: AtomicU32::new(0),
            next_slot: AtomicU32::new(0),
        }
    }

    pub(crate) fn composer(&self) -> MutexGuard<'_, Box<dyn Composer>> {
        self.composer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Round-robin slot for windows that do not track slots themselves.
    pub fn next_slot(&self) -> u32 {
        self.next_slot.fetch_add(1, Ordering::Relaxed) % SLOT_COUNT as u32
    }

    /// Present one frame. Returns the present fence, or `None` if the frame
    /// was dropped.
    pub fn present(&self, slot: u32, target: NativeHandle, acquire: Fence) -> Option<Fence> {
        let frame = self.frames.fetch_add(1, Ordering::Relaxed);
        let result = {
            let mut composer = self.composer();
            run_frame(&mut **composer, slot, target, acquire)
        };

        match result {
            Ok(fence) => {
                if frame > 0 && frame % PROGRESS_LOG_INTERVAL == 0 {
                    info!(
                        "frame {}, errors: {}",
                        frame,
                        self.errors.load(Ordering::Relaxed)
                    );
                }
                Some(fence)
            }
            Err(err) => {
                let errors = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
                if frame % ERROR_LOG_INTERVAL == 0 {
                    warn!(frame, errors, "Frame presentation failed: {}", err);
                }
                None
            }
        }
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            frames: self.frames.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

fn run_frame(
    composer: &mut dyn Composer,
    slot: u32,
    target: NativeHandle,
    acquire: Fence,
) -> Result<Fence> {
    composer.set_client_target(slot, target, acquire)?;
    let outcome = composer.validate()?;
    if outcome.has_changes() {
        composer.accept_changes()?;
    }
    composer.present()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_queue;
    use crate::hal::virtual_hal::{FenceMode, VirtualHal};
    use crate::hal::PRIMARY_DISPLAY;

    fn presenter() -> (Presenter, crate::hal::virtual_hal::VirtualControl) {
        let hal = VirtualHal::new();
        let control = hal.control();
        let mut composer = hal.composer();
        composer.create_device().unwrap();
        composer.register_callbacks(event_queue(4).0).unwrap();
        composer.open_display(PRIMARY_DISPLAY).unwrap();
        composer.create_client_layer(1080, 2340).unwrap();
        (Presenter::new(composer), control)
    }

    #[test]
    fn test_errors_are_counted_and_next_frame_proceeds() {
        let (presenter, control) = presenter();
        control.fail_next_validates(1);
        assert!(presenter
            .present(0, NativeHandle::from_raw(1), Fence::signaled())
            .is_none());

        control.fail_next_presents(1);
        assert!(presenter
            .present(1, NativeHandle::from_raw(2), Fence::signaled())
            .is_none());

        assert!(presenter
            .present(2, NativeHandle::from_raw(3), Fence::signaled())
            .is_some());
        assert_eq!(presenter.stats(), FrameStats { frames: 3, errors: 2 });
        assert_eq!(control.presented(), 1);
    }

    #[test]
    fn test_changes_accepted_once_per_frame() {
        let (presenter, control) = presenter();
        control.report_changes(1);
        presenter.present(0, NativeHandle::from_raw(1), Fence::signaled());
        presenter.present(1, NativeHandle::from_raw(1), Fence::signaled());
        assert_eq!(control.accepted_changes(), 1);
        assert_eq!(control.presented(), 2);
    }

    #[test]
    fn test_present_fence_follows_fence_mode() {
        let (presenter, control) = presenter();
        control.set_fence_mode(FenceMode::Manual);
        let fence = presenter
            .present(0, NativeHandle::from_raw(1), Fence::signaled())
            .unwrap();
        assert!(!fence.is_signaled());
        control.signal_all();
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_round_robin_slots() {
        let (presenter, _) = presenter();
        let slots: Vec<u32> = (0..4).map(|_| presenter.next_slot()).collect();
        assert_eq!(slots, vec![0, 1, 2, 0]);
    }
}
