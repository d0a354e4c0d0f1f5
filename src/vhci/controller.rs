//! # Controller Instance
//!
//! One virtual host controller: a root hub with a fixed number of
//! ports, the work queue feeding its backend and the set of transfers
//! currently in flight.
//!
//! The host-side stack talks to the left side of this API (submit,
//! cancel, port acknowledgement, completion draining); the backend
//! talks to the right side (work fetch, data fetch, giveback, port
//! posting). Each instance is an independent unit of mutual exclusion;
//! no lock is shared across controllers.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::{debug, trace};

use super::arena::{TransferArena, UrbHandle};
use super::error::VhciError;
use super::port::{Port, PortChange, PortStat, PortStatus};
use super::queue::{WorkItem, WorkQueue};
use super::transfer::{
    Completion, Giveback, IsoPacket, TransferOutcome, TransferRecord, TransferState, Urb, UrbData,
    UrbType,
};

#[derive(Debug)]
struct ControllerInner {
    ports: Vec<Port>,
    transfers: TransferArena,
    completions: VecDeque<Completion>,
}

/// One virtual host controller instance.
#[derive(Debug)]
pub struct Controller {
    id: i32,
    usb_busnum: i32,
    bus_id: String,
    queue: WorkQueue,
    inner: Mutex<ControllerInner>,
}

impl Controller {
    /// Create an instance. Identity is assigned by the registry, which
    /// also validates the port count.
    pub(crate) fn new(id: i32, usb_busnum: i32, bus_id: String, port_count: u8) -> Self {
        Self {
            id,
            usb_busnum,
            bus_id,
            queue: WorkQueue::default(),
            inner: Mutex::new(ControllerInner {
                ports: vec![Port::default(); port_count as usize],
                transfers: TransferArena::default(),
                completions: VecDeque::new(),
            }),
        }
    }

    /// The registry-assigned controller id.
    #[must_use]
    pub const fn id(&self) -> i32 {
        self.id
    }

    /// The assigned USB bus number.
    #[must_use]
    pub const fn usb_busnum(&self) -> i32 {
        self.usb_busnum
    }

    /// The synthesized bus-id string.
    #[must_use]
    pub fn bus_id(&self) -> &str {
        &self.bus_id
    }

    /// Number of root-hub ports.
    #[must_use]
    pub fn port_count(&self) -> u8 {
        self.inner.lock().unwrap().ports.len() as u8
    }

    /// Number of transfers currently in flight.
    #[must_use]
    pub fn live_transfers(&self) -> usize {
        self.inner.lock().unwrap().transfers.len()
    }

    /// Submit a transfer.
    ///
    /// Validates the descriptor, creates the transfer record and hands
    /// a PROCESS_URB item to the backend.
    ///
    /// # Parameters
    ///
    /// - `urb`: the transfer descriptor.
    /// - `data`: the OUT-direction payload. Its length has to equal
    ///   the descriptor's buffer length; IN transfers pass no payload.
    /// - `iso_packets`: the packet array. One entry per isochronous
    ///   packet, empty for other transfer types.
    pub fn submit(
        &self,
        urb: Urb,
        data: Vec<u8>,
        iso_packets: Vec<IsoPacket>,
    ) -> Result<UrbHandle, VhciError> {
        urb.validate()?;

        if iso_packets.len() != urb.packet_count as usize {
            return Err(VhciError::InvalidArgument(
                "iso packet array length disagrees with packet count",
            ));
        }
        for packet in &iso_packets {
            if u64::from(packet.offset) + u64::from(packet.length) > u64::from(urb.buffer_length) {
                return Err(VhciError::InvalidArgument(
                    "iso packet outside the transfer buffer",
                ));
            }
        }
        if urb.is_in() {
            if !data.is_empty() {
                return Err(VhciError::InvalidArgument("payload on an IN transfer"));
            }
        } else if data.len() != urb.buffer_length as usize {
            return Err(VhciError::InvalidArgument(
                "payload length disagrees with buffer length",
            ));
        }

        let mut inner = self.inner.lock().unwrap();
        let handle = inner.transfers.insert(TransferRecord {
            urb: urb.clone(),
            state: TransferState::Queued,
            data,
            iso_packets,
        });
        self.queue.enqueue(WorkItem::ProcessUrb { handle, urb });

        debug!("submitted transfer {:#x} on {}", handle.raw(), self.bus_id);
        Ok(handle)
    }

    /// Request cancellation of a transfer.
    ///
    /// A still-queued transfer is withdrawn before the backend ever
    /// sees it and resolves as cancelled immediately. A transfer the
    /// backend already observed is chased with a CANCEL_URB item;
    /// whether the cancel or the backend's own giveback resolves the
    /// transfer is then a race both outcomes of which are valid.
    ///
    /// Cancelling an already resolved transfer is a no-op; a handle
    /// that was never issued fails with `NotFound`.
    pub fn cancel(&self, handle: UrbHandle) -> Result<(), VhciError> {
        let mut inner = self.inner.lock().unwrap();

        let state = match inner.transfers.get(handle) {
            Some(record) => record.state,
            None => {
                return if inner.transfers.is_retired(handle) {
                    Ok(())
                } else {
                    Err(VhciError::NotFound)
                }
            }
        };

        match state {
            TransferState::Queued => {
                if self.queue.withdraw_process_urb(handle) {
                    inner.transfers.remove(handle);
                    inner.completions.push_back(Completion {
                        handle,
                        outcome: TransferOutcome::Cancelled,
                    });
                    debug!("cancelled queued transfer {:#x}", handle.raw());
                } else {
                    // The backend popped the item concurrently; chase
                    // it with a cancel request.
                    if let Some(record) = inner.transfers.get_mut(handle) {
                        record.state = TransferState::CancelRequested;
                    }
                    self.queue.enqueue(WorkItem::CancelUrb { handle });
                }
            }
            TransferState::Fetched | TransferState::DataPending | TransferState::Processing => {
                if let Some(record) = inner.transfers.get_mut(handle) {
                    record.state = TransferState::CancelRequested;
                }
                self.queue.enqueue(WorkItem::CancelUrb { handle });
                debug!("requested cancel of transfer {:#x}", handle.raw());
            }
            TransferState::CancelRequested => {}
        }

        Ok(())
    }

    /// Acknowledge port changes on behalf of the host-side stack.
    ///
    /// Clears exactly the acknowledged change bits, stores the written
    /// status view and delivers the resulting snapshot to the backend
    /// as a PORT_STAT work item.
    pub fn update_port_status(
        &self,
        index: u8,
        status: PortStatus,
        ack: PortChange,
    ) -> Result<(), VhciError> {
        let mut inner = self.inner.lock().unwrap();
        let port = inner
            .ports
            .get_mut(index as usize)
            .ok_or(VhciError::InvalidArgument("port index out of range"))?;

        port.acknowledge(status, ack);
        let snapshot = port.snapshot(index);
        self.queue.enqueue(WorkItem::PortStat(snapshot));

        trace!(
            "port {} of {} acknowledged, change now {:?}",
            index,
            self.bus_id,
            snapshot.change
        );
        Ok(())
    }

    /// Read the current state of one port.
    pub fn port_snapshot(&self, index: u8) -> Result<PortStat, VhciError> {
        let inner = self.inner.lock().unwrap();
        inner
            .ports
            .get(index as usize)
            .map(|port| port.snapshot(index))
            .ok_or(VhciError::InvalidArgument("port index out of range"))
    }

    /// Drain all transfers that resolved since the last call.
    #[must_use]
    pub fn take_completions(&self) -> Vec<Completion> {
        let mut inner = self.inner.lock().unwrap();
        inner.completions.drain(..).collect()
    }

    /// Wait for the next unit of work.
    ///
    /// See [`WorkQueue::fetch`] for the timeout contract. Receiving a
    /// PROCESS_URB item moves the transfer out of its queued state:
    /// transfers with a data stage become fetched, all others go
    /// straight to processing.
    pub fn fetch_work(&self, timeout_ms: i16) -> Result<WorkItem, VhciError> {
        let item = self.queue.fetch(timeout_ms)?;

        if let WorkItem::ProcessUrb { handle, .. } = &item {
            let mut inner = self.inner.lock().unwrap();
            if let Some(record) = inner.transfers.get_mut(*handle) {
                if record.state == TransferState::Queued {
                    record.state = if record.urb.needs_data_fetch() {
                        TransferState::Fetched
                    } else {
                        TransferState::Processing
                    };
                }
            }
        }

        Ok(item)
    }

    /// Fetch the data stage of a delivered transfer.
    ///
    /// Returns the OUT payload and the isochronous packet array.
    /// Transfers without a data stage (IN, except isochronous) skip
    /// this step and reject the call.
    pub fn fetch_data(&self, handle: UrbHandle) -> Result<UrbData, VhciError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner.transfers.get_mut(handle).ok_or(VhciError::NotFound)?;

        match record.state {
            TransferState::Fetched => {
                record.state = TransferState::DataPending;
                let data = UrbData {
                    buffer: record.data.clone(),
                    iso_packets: record.iso_packets.clone(),
                    buffer_length: record.urb.buffer_length,
                };
                record.state = TransferState::Processing;
                Ok(data)
            }
            // The cancel is advisory; the backend may still come for
            // the data before it notices.
            TransferState::CancelRequested => Ok(UrbData {
                buffer: record.data.clone(),
                iso_packets: record.iso_packets.clone(),
                buffer_length: record.urb.buffer_length,
            }),
            TransferState::Queued => {
                Err(VhciError::InvalidArgument("transfer not yet delivered"))
            }
            TransferState::DataPending | TransferState::Processing => Err(
                VhciError::InvalidArgument("transfer has no pending data stage"),
            ),
        }
    }

    /// Accept a giveback and resolve the transfer.
    ///
    /// Rejects size mismatches with `InvalidArgument` and leaves the
    /// transfer in place, so the backend can retry with corrected
    /// data. On success the record is retired, the handle becomes
    /// invalid and the result is surfaced to the host-side stack.
    pub fn giveback(&self, giveback: Giveback) -> Result<(), VhciError> {
        let mut inner = self.inner.lock().unwrap();

        {
            let record = inner
                .transfers
                .get(giveback.handle)
                .ok_or(VhciError::NotFound)?;
            if record.state == TransferState::Queued {
                return Err(VhciError::InvalidArgument(
                    "giveback for an undelivered transfer",
                ));
            }
            validate_giveback(&record.urb, &giveback)?;
        }

        inner.transfers.remove(giveback.handle);
        let handle = giveback.handle;
        inner.completions.push_back(Completion {
            handle,
            outcome: TransferOutcome::Completed {
                status: giveback.status,
                buffer: giveback.buffer,
                buffer_actual: giveback.buffer_actual,
                iso_packets: giveback.iso_packets,
                error_count: giveback.error_count,
            },
        });

        debug!(
            "transfer {:#x} on {} given back ({} bytes)",
            handle.raw(),
            self.bus_id,
            giveback.buffer_actual
        );
        Ok(())
    }

    /// Apply a backend-declared port update.
    ///
    /// This is how the backend simulates hardware changes such as
    /// device attach or reset completion. Change bits accumulate until
    /// the host side acknowledges them.
    pub fn post_port_stat(&self, stat: PortStat) -> Result<(), VhciError> {
        let mut inner = self.inner.lock().unwrap();
        let port = inner
            .ports
            .get_mut(stat.index as usize)
            .ok_or(VhciError::InvalidArgument("port index out of range"))?;

        port.update(stat.status, stat.change, stat.flags);

        trace!(
            "port {} of {} now {:?} (change {:?})",
            stat.index,
            self.bus_id,
            stat.status,
            port.snapshot(stat.index).change
        );
        Ok(())
    }
}

/// Check a giveback against the transfer it resolves.
fn validate_giveback(urb: &Urb, giveback: &Giveback) -> Result<(), VhciError> {
    if giveback.buffer_actual > urb.buffer_length {
        return Err(VhciError::InvalidArgument(
            "actual length exceeds the transfer buffer",
        ));
    }
    if matches!(urb.typ, UrbType::Iso)
        && urb.is_in()
        && giveback.buffer_actual != urb.buffer_length
    {
        return Err(VhciError::InvalidArgument(
            "isochronous IN giveback must fill the buffer",
        ));
    }
    if giveback.iso_packets.len() != urb.packet_count as usize {
        return Err(VhciError::InvalidArgument(
            "iso result count disagrees with the transfer",
        ));
    }
    match (&giveback.buffer, urb.is_in()) {
        (Some(buffer), true) => {
            if buffer.len() != giveback.buffer_actual as usize {
                return Err(VhciError::InvalidArgument(
                    "IN giveback data disagrees with actual length",
                ));
            }
        }
        (None, true) => {
            return Err(VhciError::InvalidArgument("IN giveback without data"));
        }
        (Some(_), false) => {
            return Err(VhciError::InvalidArgument("data on an OUT giveback"));
        }
        (None, false) => {}
    }

    Ok(())
}
