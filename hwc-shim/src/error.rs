//! Error types for the hwcomposer shim

use crate::buffer::BufferId;
use crate::hal::HalStatus;
use std::cell::RefCell;
use std::ffi::CString;
use std::fmt;
use std::os::raw::c_char;
use thiserror::Error;

/// Step of [`HwcContext::init`](crate::HwcContext::init) that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Allocator,
    Device,
    Callbacks,
    Display,
    Layer,
    NativeWindow,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitStage::Allocator => "gralloc init",
            InitStage::Device => "hwc2 device creation",
            InitStage::Callbacks => "callback registration",
            InitStage::Display => "primary display lookup",
            InitStage::Layer => "client layer creation",
            InitStage::NativeWindow => "native window creation",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("hwcomposer initialization failed during {stage}: {reason}")]
    InitializationFailure { stage: InitStage, reason: String },

    #[error("buffer allocation failed: {0}")]
    AllocationFailure(String),

    #[error("unsupported pixel format 0x{0:08x}")]
    UnsupportedFormat(u32),

    #[error("buffer {0} is locked for scanout")]
    BufferLocked(BufferId),

    #[error("buffer {0} is not locked")]
    BufferNotLocked(BufferId),

    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferId),

    #[error("present fence for slot {0} did not signal in time")]
    FenceTimeout(usize),

    #[error("{call} failed: {status}")]
    Hal { call: &'static str, status: HalStatus },

    #[error("not supported: {0}")]
    Unsupported(&'static str),

    #[error("hwcomposer context is not initialized")]
    NotInitialized,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn init(stage: InitStage, reason: impl fmt::Display) -> Self {
        Error::InitializationFailure {
            stage,
            reason: reason.to_string(),
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Remember `err` as this thread's last error.
pub fn set_last_error(err: impl fmt::Display) {
    let msg = err.to_string().replace('\0', " ");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = CString::new(msg).ok());
}

pub fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// The last error recorded on this thread, if any.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|msg| msg.to_string_lossy().into_owned())
    })
}

/// Pointer to the last error message, valid until the next call that
/// records or clears an error on this thread.
pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |msg| msg.as_ptr())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_is_thread_local() {
        set_last_error("boom");
        assert_eq!(last_error().as_deref(), Some("boom"));

        let other = std::thread::spawn(last_error).join().unwrap();
        assert_eq!(other, None);

        clear_last_error();
        assert_eq!(last_error(), None);
        assert!(last_error_ptr().is_null());
    }

    #[test]
    fn test_init_error_names_stage() {
        let err = Error::init(InitStage::Layer, "no resources");
        assert_eq!(
            err.to_string(),
            "hwcomposer initialization failed during client layer creation: no resources"
        );
    }
}
