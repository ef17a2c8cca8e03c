//! Scanout buffer ring
//!
//! Frames rotate through [`SLOT_COUNT`] buffers. Each slot remembers the
//! present fence of the frame last shown from it, and the slot is handed
//! out again only after that fence signaled.

use crate::buffer::BufferObject;
use crate::fence::Fence;
use crate::{Error, Result};
use std::time::Duration;
use tracing::{trace, warn};

/// Triple buffering.
pub const SLOT_COUNT: usize = 3;

struct Slot {
    buffer: BufferObject,
    present_fence: Option<Fence>,
}

pub struct Swapchain {
    slots: Vec<Slot>,
    next: usize,
    fence_timeout: Duration,
}

impl Swapchain {
    pub fn new(buffers: Vec<BufferObject>, fence_timeout: Duration) -> Self {
        Self {
            slots: buffers
                .into_iter()
                .map(|buffer| Slot {
                    buffer,
                    present_fence: None,
                })
                .collect(),
            next: 0,
            fence_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn buffer(&self, slot: usize) -> Option<&BufferObject> {
        self.slots.get(slot).map(|s| &s.buffer)
    }

    pub fn buffers(&self) -> impl Iterator<Item = &BufferObject> {
        self.slots.iter().map(|s| &s.buffer)
    }

    /// Next slot to render into, waiting for its previous present fence.
    ///
    /// On timeout the ring does not advance, so the following call waits on
    /// the same slot again.
    pub fn dequeue(&mut self) -> Result<usize> {
        let index = self.next;
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(Error::Unsupported("swapchain without buffers"))?;

        if let Some(fence) = &slot.present_fence {
            if !fence.wait(self.fence_timeout)? {
                warn!(slot = index, ?fence, "Present fence still pending");
                return Err(Error::FenceTimeout(index));
            }
        }
        slot.present_fence = None;
        self.next = (index + 1) % self.slots.len();
        trace!(slot = index, "Dequeued");
        Ok(index)
    }

    /// Remember the fence guarding the next reuse of `slot`.
    pub fn attach_present_fence(&mut self, slot: usize, fence: Option<Fence>) {
        if let Some(s) = self.slots.get_mut(slot) {
            s.present_fence = fence;
        }
    }

    pub fn into_buffers(self) -> Vec<BufferObject> {
        self.slots.into_iter().map(|s| s.buffer).collect()
    }
}
