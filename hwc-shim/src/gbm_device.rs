//! GBM-style buffer device backed by the HAL allocator
//!
//! Tracks every buffer object handed out, together with its scanout lock.
//! A locked buffer belongs to the display until it is released; destroying
//! it in the meantime only marks it, and the allocation is returned to
//! gralloc on release.

use crate::buffer::{
    check_dimensions, Allocator, BufferId, BufferObject, BufferUsage, NativeHandle, PixelFormat,
    PlaneLayout,
};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Result of [`GbmDevice::destroy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    Destroyed,
    /// Locked for scanout; freed on release.
    Deferred,
}

struct Entry {
    bo: BufferObject,
    locked: bool,
    destroy_pending: bool,
    imported: bool,
}

struct Inner {
    allocator: Box<dyn Allocator>,
    buffers: HashMap<BufferId, Entry>,
    next_id: u32,
}

impl Inner {
    fn next_id(&mut self) -> BufferId {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        BufferId(self.next_id)
    }

    fn free(&mut self, entry: Entry) {
        if !entry.imported {
            self.allocator.release(entry.bo.handle());
        }
        debug!("Freed buffer {}", entry.bo.id());
    }
}

/// Buffer device handing out [`BufferObject`]s.
pub struct GbmDevice {
    inner: Mutex<Inner>,
}

impl GbmDevice {
    /// `allocator` must already be initialized.
    pub fn new(allocator: Box<dyn Allocator>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                allocator,
                buffers: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_format_supported(&self, fourcc: u32) -> bool {
        PixelFormat::from_fourcc(fourcc).is_some()
    }

    /// Allocate a buffer object
    pub fn create(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> Result<BufferObject> {
        check_dimensions(width, height)?;
        let mut inner = self.lock_inner();
        let alloc = inner.allocator.allocate(width, height, format, usage)?;
        if alloc.stride_pixels < width {
            inner.allocator.release(alloc.handle);
            return Err(Error::AllocationFailure(format!(
                "allocator returned stride {} for width {}",
                alloc.stride_pixels, width
            )));
        }

        let layout = match PlaneLayout::compute(format, height, alloc.stride_pixels) {
            Ok(layout) => layout,
            Err(err) => {
                inner.allocator.release(alloc.handle);
                return Err(err);
            }
        };
        let id = inner.next_id();
        let bo = BufferObject::new(id, width, height, format, usage, layout, alloc.handle, None);
        debug!(
            "Allocated buffer {} {}x{} {:?} stride {}",
            id,
            width,
            height,
            format,
            bo.stride()
        );
        inner.buffers.insert(
            id,
            Entry {
                bo: bo.clone(),
                locked: false,
                destroy_pending: false,
                imported: false,
            },
        );
        Ok(bo)
    }

    /// Modifier lists are accepted and ignored: gralloc picks the layout and
    /// every buffer reports `DRM_FORMAT_MOD_INVALID`.
    pub fn create_with_modifiers(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        modifiers: &[u64],
    ) -> Result<BufferObject> {
        debug!("Ignoring {} requested modifiers", modifiers.len());
        self.create(
            width,
            height,
            format,
            BufferUsage::SCANOUT | BufferUsage::RENDERING,
        )
    }

    /// Wrap an externally allocated dma-buf. The caller keeps `fd`.
    pub fn import(
        &self,
        fd: i32,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Result<BufferObject> {
        check_dimensions(width, height)?;
        if fd < 0 {
            return Err(Error::AllocationFailure(format!("invalid dma-buf fd {}", fd)));
        }
        let bpp = format.bytes_per_pixel();
        if stride < width * bpp || stride % bpp != 0 {
            return Err(Error::AllocationFailure(format!(
                "stride {} too small for {}x{} {:?}",
                stride, width, height, format
            )));
        }

        let layout = PlaneLayout::compute(format, height, stride / bpp)?;
        let mut inner = self.lock_inner();
        let id = inner.next_id();
        let bo = BufferObject::new(
            id,
            width,
            height,
            format,
            BufferUsage::RENDERING,
            layout,
            NativeHandle::NULL,
            Some(fd),
        );
        debug!("Imported dma-buf fd={} as buffer {}", fd, id);
        inner.buffers.insert(
            id,
            Entry {
                bo: bo.clone(),
                locked: false,
                destroy_pending: false,
                imported: true,
            },
        );
        Ok(bo)
    }

    pub fn get(&self, id: BufferId) -> Option<BufferObject> {
        self.lock_inner().buffers.get(&id).map(|e| e.bo.clone())
    }

    /// Hand the buffer to the display. Only one consumer may hold it.
    pub fn lock(&self, id: BufferId) -> Result<()> {
        let mut inner = self.lock_inner();
        let entry = inner.buffers.get_mut(&id).ok_or(Error::UnknownBuffer(id))?;
        if entry.locked {
            return Err(Error::BufferLocked(id));
        }
        if entry.destroy_pending {
            return Err(Error::UnknownBuffer(id));
        }
        entry.locked = true;
        Ok(())
    }

    /// Return the buffer from the display, completing a deferred destroy.
    pub fn release(&self, id: BufferId) -> Result<()> {
        let mut inner = self.lock_inner();
        let entry = inner.buffers.get_mut(&id).ok_or(Error::UnknownBuffer(id))?;
        if !entry.locked {
            return Err(Error::BufferNotLocked(id));
        }
        entry.locked = false;
        if entry.destroy_pending {
            if let Some(entry) = inner.buffers.remove(&id) {
                inner.free(entry);
            }
        }
        Ok(())
    }

    pub fn is_locked(&self, id: BufferId) -> bool {
        self.lock_inner()
            .buffers
            .get(&id)
            .is_some_and(|e| e.locked)
    }

    pub fn destroy(&self, id: BufferId) -> Result<DestroyOutcome> {
        let mut inner = self.lock_inner();
        let entry = inner.buffers.get_mut(&id).ok_or(Error::UnknownBuffer(id))?;
        if entry.locked {
            entry.destroy_pending = true;
            debug!("Buffer {} is locked, deferring destroy", id);
            return Ok(DestroyOutcome::Deferred);
        }
        if let Some(entry) = inner.buffers.remove(&id) {
            inner.free(entry);
        }
        Ok(DestroyOutcome::Destroyed)
    }

    /// Buffers still tracked, including ones waiting for release.
    pub fn live_buffers(&self) -> usize {
        self.lock_inner().buffers.len()
    }
}

impl Drop for GbmDevice {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        let leaked: Vec<Entry> = inner.buffers.drain().map(|(_, e)| e).collect();
        if !leaked.is_empty() {
            warn!("Releasing {} buffers still alive at device teardown", leaked.len());
        }
        for entry in leaked {
            inner.free(entry);
        }
        info!("GBM device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::virtual_hal::VirtualHal;

    fn device() -> (GbmDevice, crate::hal::virtual_hal::VirtualControl) {
        let hal = VirtualHal::new();
        let control = hal.control();
        let mut allocator = hal.allocator();
        allocator.initialize().unwrap();
        (GbmDevice::new(allocator), control)
    }

    #[test]
    fn test_metadata_matches_request_for_every_format() {
        let (gbm, _) = device();
        for format in PixelFormat::ALL {
            let bo = gbm.create(100, 50, format, BufferUsage::RENDERING).unwrap();
            assert_eq!(bo.width(), 100);
            assert_eq!(bo.height(), 50);
            assert_eq!(bo.format(), format);
            assert_eq!(bo.plane_count(), format.plane_count());
            assert!(bo.stride() >= 100 * format.bytes_per_pixel());
            assert_eq!(bo.offset(0), Some(0));
            assert_eq!(bo.modifier(), crate::DRM_FORMAT_MOD_INVALID);
            assert!(!bo.handle().is_null());
        }
    }

    #[test]
    fn test_modifiers_are_ignored() {
        let (gbm, _) = device();
        let bo = gbm
            .create_with_modifiers(64, 64, PixelFormat::Argb8888, &[0, 0x0100_0000_0000_0001])
            .unwrap();
        assert_eq!(bo.modifier(), crate::DRM_FORMAT_MOD_INVALID);
        assert!(bo.usage().contains(BufferUsage::SCANOUT));
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let (gbm, _) = device();
        assert!(matches!(
            gbm.create(0, 10, PixelFormat::Xrgb8888, BufferUsage::SCANOUT),
            Err(Error::AllocationFailure(_))
        ));
    }

    #[test]
    fn test_single_consumer_lock() {
        let (gbm, _) = device();
        let bo = gbm.create(16, 16, PixelFormat::Xrgb8888, BufferUsage::SCANOUT).unwrap();
        gbm.lock(bo.id()).unwrap();
        assert!(matches!(gbm.lock(bo.id()), Err(Error::BufferLocked(_))));
        gbm.release(bo.id()).unwrap();
        assert!(matches!(gbm.release(bo.id()), Err(Error::BufferNotLocked(_))));
    }

    #[test]
    fn test_destroy_of_locked_buffer_waits_for_release() {
        let (gbm, control) = device();
        let bo = gbm.create(16, 16, PixelFormat::Xrgb8888, BufferUsage::SCANOUT).unwrap();
        gbm.lock(bo.id()).unwrap();

        assert_eq!(gbm.destroy(bo.id()).unwrap(), DestroyOutcome::Deferred);
        assert_eq!(control.live_allocations(), 1);
        assert!(gbm.lock(bo.id()).is_err());

        gbm.release(bo.id()).unwrap();
        assert_eq!(control.live_allocations(), 0);
        assert!(gbm.get(bo.id()).is_none());
    }

    #[test]
    fn test_import_keeps_caller_fd() {
        let (gbm, control) = device();
        let bo = gbm.import(7, 32, 8, 128, PixelFormat::Xrgb8888).unwrap();
        assert_eq!(bo.fd(), Some(7));
        assert_eq!(bo.stride(), 128);
        assert_eq!(control.live_allocations(), 0);
        assert_eq!(gbm.destroy(bo.id()).unwrap(), DestroyOutcome::Destroyed);

        assert!(gbm.import(7, 32, 8, 64, PixelFormat::Xrgb8888).is_err());
    }

    #[test]
    fn test_import_with_oversized_stride_fails() {
        let (gbm, _) = device();
        assert!(matches!(
            gbm.import(9, 64, 16384, 1 << 20, PixelFormat::Nv12),
            Err(Error::AllocationFailure(_))
        ));
        let bo = gbm.import(9, 64, 64, 64, PixelFormat::Nv12).unwrap();
        assert_eq!(bo.offset(1), Some(64 * 64));
    }

    #[test]
    fn test_drop_releases_everything() {
        let (gbm, control) = device();
        gbm.create(8, 8, PixelFormat::Rgb565, BufferUsage::RENDERING).unwrap();
        gbm.create(8, 8, PixelFormat::Nv12, BufferUsage::RENDERING).unwrap();
        assert_eq!(control.live_allocations(), 2);
        drop(gbm);
        assert_eq!(control.live_allocations(), 0);
    }
}
