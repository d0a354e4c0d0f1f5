//! # Controller Registry
//!
//! Owns the controller instances and assigns their identity: the
//! controller id, the USB bus number and the bus-id string. This is
//! the entry point the host-side stack uses to create controllers and
//! to reach them afterwards.
//!
//! The instance table is copy-on-write: lookups on the submit/cancel
//! path read it without taking a lock, writers (register/unregister)
//! are serialized by a mutex.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use tracing::info;

use super::arena::UrbHandle;
use super::constants::handshake;
use super::controller::Controller;
use super::error::VhciError;
use super::port::{PortChange, PortStat, PortStatus};
use super::queue::WorkItem;
use super::transfer::{Completion, Giveback, IsoPacket, Urb, UrbData};

#[derive(Debug)]
struct IdAllocator {
    next_id: i32,
    next_busnum: i32,
}

/// The controller registry.
///
/// Unregistering a controller with transfers still in flight is
/// rejected with `Busy`; the host-side stack has to drain or cancel
/// them first.
#[derive(Debug)]
pub struct Registry {
    allocator: Mutex<IdAllocator>,
    table: ArcSwap<BTreeMap<i32, Arc<Controller>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            allocator: Mutex::new(IdAllocator {
                next_id: 0,
                // USB bus numbering starts at 1.
                next_busnum: 1,
            }),
            table: ArcSwap::from_pointee(BTreeMap::new()),
        }
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Register a new controller.
    ///
    /// Assigns a fresh id and bus number and synthesizes the bus-id
    /// string. Fails with `ResourceExhausted` when the port count is 0
    /// or above the root-hub limit, or when the id space is used up.
    ///
    /// # Parameters
    ///
    /// - `port_count`: number of root-hub ports the controller should
    ///   have, between 1 and 31.
    pub fn register(&self, port_count: u8) -> Result<Arc<Controller>, VhciError> {
        if port_count == 0 || port_count > handshake::MAX_PORTS {
            return Err(VhciError::ResourceExhausted("port count out of range"));
        }

        let mut allocator = self.allocator.lock().unwrap();
        if allocator.next_id > handshake::MAX_ID {
            return Err(VhciError::ResourceExhausted("controller id space"));
        }
        let id = allocator.next_id;
        let usb_busnum = allocator.next_busnum;
        allocator.next_id += 1;
        allocator.next_busnum += 1;

        let bus_id = format!("{}.{id}", handshake::BUS_ID_PREFIX);
        debug_assert!(bus_id.len() < handshake::BUS_ID_CAPACITY);

        let controller = Arc::new(Controller::new(id, usb_busnum, bus_id, port_count));

        let mut table = BTreeMap::clone(&self.table.load());
        table.insert(id, controller.clone());
        // It's okay to use store here, because we only have a single
        // writer (serialized by the mutex).
        self.table.store(Arc::new(table));

        info!(
            "registered controller {} (usb bus {}, {} ports)",
            controller.bus_id(),
            usb_busnum,
            port_count
        );
        Ok(controller)
    }

    /// Remove a controller.
    ///
    /// Fails with `NotFound` for an unknown id and with `Busy` while
    /// transfers are still in flight.
    pub fn unregister(&self, id: i32) -> Result<(), VhciError> {
        let allocator = self.allocator.lock().unwrap();

        let table = self.table.load();
        let controller = table.get(&id).ok_or(VhciError::NotFound)?;
        if controller.live_transfers() > 0 {
            return Err(VhciError::Busy("transfers still in flight"));
        }

        let mut table = BTreeMap::clone(&table);
        table.remove(&id);
        self.table.store(Arc::new(table));
        drop(allocator);

        info!("unregistered controller id {id}");
        Ok(())
    }

    /// Look up a controller by id.
    pub fn lookup(&self, id: i32) -> Result<Arc<Controller>, VhciError> {
        self.table.load().get(&id).cloned().ok_or(VhciError::NotFound)
    }

    /// Submit a transfer to a controller. See [`Controller::submit`].
    pub fn submit(
        &self,
        id: i32,
        urb: Urb,
        data: Vec<u8>,
        iso_packets: Vec<IsoPacket>,
    ) -> Result<UrbHandle, VhciError> {
        self.lookup(id)?.submit(urb, data, iso_packets)
    }

    /// Request cancellation of a transfer. See [`Controller::cancel`].
    pub fn cancel(&self, id: i32, handle: UrbHandle) -> Result<(), VhciError> {
        self.lookup(id)?.cancel(handle)
    }

    /// Acknowledge port changes. See
    /// [`Controller::update_port_status`].
    pub fn update_port_status(
        &self,
        id: i32,
        index: u8,
        status: PortStatus,
        ack: PortChange,
    ) -> Result<(), VhciError> {
        self.lookup(id)?.update_port_status(index, status, ack)
    }

    /// Read one port of a controller. See
    /// [`Controller::port_snapshot`].
    pub fn port_snapshot(&self, id: i32, index: u8) -> Result<PortStat, VhciError> {
        self.lookup(id)?.port_snapshot(index)
    }

    /// Drain the resolved transfers of a controller. See
    /// [`Controller::take_completions`].
    pub fn take_completions(&self, id: i32) -> Result<Vec<Completion>, VhciError> {
        Ok(self.lookup(id)?.take_completions())
    }

    /// Accept a giveback from the backend. See
    /// [`Controller::giveback`].
    pub fn giveback(&self, id: i32, giveback: Giveback) -> Result<(), VhciError> {
        self.lookup(id)?.giveback(giveback)
    }

    /// Wait for the next unit of work of a controller. See
    /// [`Controller::fetch_work`].
    pub fn fetch_work(&self, id: i32, timeout_ms: i16) -> Result<WorkItem, VhciError> {
        self.lookup(id)?.fetch_work(timeout_ms)
    }

    /// Fetch the data stage of a delivered transfer. See
    /// [`Controller::fetch_data`].
    pub fn fetch_data(&self, id: i32, handle: UrbHandle) -> Result<UrbData, VhciError> {
        self.lookup(id)?.fetch_data(handle)
    }

    /// Apply a backend-declared port update. See
    /// [`Controller::post_port_stat`].
    pub fn post_port_stat(&self, id: i32, stat: PortStat) -> Result<(), VhciError> {
        self.lookup(id)?.post_port_stat(stat)
    }
}
