//! # Work Queue
//!
//! The ordered, blocking queue of pending work of one controller
//! instance: port status updates for the backend to observe, new
//! transfers to process and cancellation requests.
//!
//! The queue has exactly one consumer, the backend. Fetching blocks on
//! a condition variable with a deadline, so the backend stays
//! responsive to shutdown signals without polling. Producers never
//! block.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use super::arena::UrbHandle;
use super::constants::timeout;
use super::error::VhciError;
use super::port::PortStat;
use super::transfer::Urb;

/// One unit of work for the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// A port's bits as the host side last wrote them back.
    PortStat(PortStat),
    /// A new transfer to emulate.
    ProcessUrb {
        /// Identity the backend uses for data fetch and giveback.
        handle: UrbHandle,
        /// The transfer descriptor.
        urb: Urb,
    },
    /// Abandon a transfer that was delivered earlier.
    CancelUrb {
        /// Identity of the transfer to abandon.
        handle: UrbHandle,
    },
}

/// Map a caller-supplied timeout to a bounded wait.
///
/// -1 waits without a deadline. 0 selects the default of 100
/// milliseconds. Everything else is clamped into the valid bounded
/// range of 0 to 1000 milliseconds, where the lower clamp again
/// selects the default.
fn effective_timeout(timeout_ms: i16) -> Option<Duration> {
    if timeout_ms == timeout::INFINITE {
        return None;
    }

    let clamped = timeout_ms.clamp(0, timeout::MAX_MS);
    let millis = if clamped == 0 {
        timeout::DEFAULT_MS
    } else {
        clamped
    };

    Some(Duration::from_millis(millis as u64))
}

/// Clears the single-consumer marker when a fetch ends.
struct FetchGuard<'a> {
    active: &'a AtomicBool,
}

impl<'a> FetchGuard<'a> {
    fn try_acquire(active: &'a AtomicBool) -> Result<Self, VhciError> {
        active
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| VhciError::Busy("a fetch is already outstanding"))?;

        Ok(Self { active })
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// FIFO of pending work with a single blocking consumer.
///
/// Ordering discipline: items are delivered in production order. A
/// cancellation for handle H is only ever enqueued after the
/// PROCESS_URB item for H has left the queue (a still-queued item is
/// withdrawn instead), so a cancel can never overtake the work it
/// cancels.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
    available: Condvar,
    fetch_active: AtomicBool,
}

impl WorkQueue {
    /// Append an item. Never blocks.
    pub fn enqueue(&self, item: WorkItem) {
        let mut items = self.items.lock().unwrap();
        items.push_back(item);
        drop(items);

        self.available.notify_one();
    }

    /// Remove a still-queued PROCESS_URB item for the given handle.
    ///
    /// Returns whether the item was found. If it was, the backend will
    /// never see the transfer.
    #[must_use]
    pub fn withdraw_process_urb(&self, handle: UrbHandle) -> bool {
        let mut items = self.items.lock().unwrap();
        let position = items.iter().position(
            |item| matches!(item, WorkItem::ProcessUrb { handle: h, .. } if *h == handle),
        );

        match position {
            Some(index) => {
                items.remove(index);
                trace!("withdrew queued transfer {:#x}", handle.raw());
                true
            }
            None => false,
        }
    }

    /// Wait for the next work item.
    ///
    /// Blocks the calling backend until an item is available or the
    /// timeout elapses. Only one fetch may be outstanding at a time; a
    /// concurrent fetch fails with `Busy` instead of queuing behind
    /// the first.
    ///
    /// # Parameters
    ///
    /// - `timeout_ms`: -1 blocks indefinitely, 0 applies the default
    ///   of 100 ms, other values are clamped to at most 1000 ms.
    pub fn fetch(&self, timeout_ms: i16) -> Result<WorkItem, VhciError> {
        let _guard = FetchGuard::try_acquire(&self.fetch_active)?;
        let deadline = effective_timeout(timeout_ms).map(|wait| Instant::now() + wait);

        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                return Ok(item);
            }

            match deadline {
                None => items = self.available.wait(items).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(VhciError::Timeout);
                    }
                    (items, _) = self.available.wait_timeout(items, deadline - now).unwrap();
                }
            }
        }
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Whether no work is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vhci::transfer::{UrbFlags, UrbType};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn process_item(raw_handle: u64) -> WorkItem {
        WorkItem::ProcessUrb {
            handle: UrbHandle::from_raw(raw_handle),
            urb: Urb {
                typ: UrbType::Int,
                address: 3,
                endpoint: 0x81,
                setup_packet: None,
                buffer_length: 8,
                interval: 10,
                packet_count: 0,
                flags: UrbFlags::empty(),
            },
        }
    }

    #[test]
    fn delivers_in_fifo_order() {
        let queue = WorkQueue::default();

        queue.enqueue(process_item(1 << 32));
        queue.enqueue(process_item(1 << 32 | 1));

        assert_eq!(queue.fetch(0).unwrap(), process_item(1 << 32));
        assert_eq!(queue.fetch(0).unwrap(), process_item(1 << 32 | 1));
    }

    #[test]
    fn empty_fetch_times_out_within_the_default_window() {
        let queue = WorkQueue::default();

        let start = Instant::now();
        assert_eq!(queue.fetch(0), Err(VhciError::Timeout));
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(5), "fetch must not hang");
    }

    #[test]
    fn out_of_range_timeouts_are_clamped() {
        let queue = WorkQueue::default();

        // Clamped to the 1000 ms maximum; returns Timeout, does not
        // wait for half a minute.
        let start = Instant::now();
        assert_eq!(queue.fetch(30_000), Err(VhciError::Timeout));
        assert!(start.elapsed() < Duration::from_secs(5));

        // Negative values besides -1 behave like the default.
        assert_eq!(queue.fetch(-5), Err(VhciError::Timeout));
    }

    #[test]
    fn withdrawn_items_are_never_delivered() {
        let queue = WorkQueue::default();
        let handle = UrbHandle::from_raw(1 << 32 | 2);

        queue.enqueue(process_item(1 << 32));
        queue.enqueue(process_item(1 << 32 | 2));

        assert!(queue.withdraw_process_urb(handle));
        assert!(!queue.withdraw_process_urb(handle));

        assert_eq!(queue.fetch(0).unwrap(), process_item(1 << 32));
        assert_eq!(queue.fetch(5), Err(VhciError::Timeout));
    }

    #[test]
    fn second_concurrent_fetch_is_rejected() {
        let queue = Arc::new(WorkQueue::default());

        let blocked = {
            let queue = queue.clone();
            thread::spawn(move || queue.fetch(timeout::INFINITE))
        };

        // Give the first fetch time to start waiting.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            queue.fetch(50),
            Err(VhciError::Busy("a fetch is already outstanding"))
        );

        queue.enqueue(process_item(1 << 32));
        assert_eq!(blocked.join().unwrap().unwrap(), process_item(1 << 32));

        // With the first fetch finished, fetching works again.
        assert_eq!(queue.fetch(5), Err(VhciError::Timeout));
    }
}
