//! HAL callback relay
//!
//! hwcomposer delivers vsync, hotplug and refresh callbacks on its own
//! binder thread. The callbacks only push an [`HalEvent`] into a bounded
//! calloop channel; everything else happens when the main loop dispatches
//! the channel. A full queue drops the event and counts it.

use crate::hal::DisplayId;
use calloop::channel::{self, Channel, SyncSender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::TrySendError;
use std::sync::Arc;
use tracing::{debug, trace};

/// Default queue depth; a few frames worth of vsyncs plus hotplugs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalEvent {
    Vsync {
        display: DisplayId,
        timestamp_ns: i64,
    },
    Hotplug {
        display: DisplayId,
        connected: bool,
        primary: bool,
    },
    Refresh {
        display: DisplayId,
    },
}

/// Sending half, owned by the HAL callback context.
#[derive(Clone)]
pub struct EventSender {
    sender: SyncSender<HalEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Never blocks; safe to call from a HAL thread.
    pub fn send(&self, event: HalEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(?event, dropped, "HAL event queue full, dropping");
            }
            Err(TrySendError::Disconnected(event)) => {
                debug!(?event, "HAL event after main loop went away");
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create the relay. Insert the [`Channel`] into the main loop.
pub fn event_queue(capacity: usize) -> (EventSender, Channel<HalEvent>) {
    let (sender, channel) = channel::sync_channel(capacity.max(1));
    (
        EventSender {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        channel,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use calloop::EventLoop;
    use std::time::Duration;

    #[test]
    fn test_events_arrive_in_order_on_dispatch() {
        let mut event_loop: EventLoop<Vec<HalEvent>> = EventLoop::try_new().unwrap();
        let (sender, channel) = event_queue(8);
        event_loop
            .handle()
            .insert_source(channel, |event, _, seen: &mut Vec<HalEvent>| {
                if let channel::Event::Msg(event) = event {
                    seen.push(event);
                }
            })
            .unwrap();

        let remote = sender.clone();
        std::thread::spawn(move || {
            remote.send(HalEvent::Hotplug {
                display: 0,
                connected: true,
                primary: true,
            });
            remote.send(HalEvent::Vsync {
                display: 0,
                timestamp_ns: 42,
            });
        })
        .join()
        .unwrap();

        let mut seen = Vec::new();
        event_loop
            .dispatch(Some(Duration::from_millis(100)), &mut seen)
            .unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[1], HalEvent::Vsync { timestamp_ns: 42, .. }));
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let (sender, _channel) = event_queue(2);
        for i in 0..5 {
            sender.send(HalEvent::Vsync {
                display: 0,
                timestamp_ns: i,
            });
        }
        assert_eq!(sender.dropped(), 3);
    }
}
