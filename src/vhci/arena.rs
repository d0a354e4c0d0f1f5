//! # Transfer Arena
//!
//! Generational storage for the in-flight transfers of one controller.
//!
//! The backend refers to a transfer only through an opaque 64-bit
//! handle. The handle encodes a slot index and a generation counter;
//! retiring a transfer bumps the slot's generation, so a stale handle
//! can never resolve to a later transfer that happens to reuse the
//! slot.

use super::transfer::TransferRecord;

/// An opaque 64-bit transfer identity.
///
/// The value is never 0 and is unique for as long as the transfer it
/// refers to is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UrbHandle(u64);

impl UrbHandle {
    const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    const fn index(self) -> u32 {
        self.0 as u32
    }

    const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The raw wire value of the handle.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Reconstruct a handle from its raw wire value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug)]
struct Slot {
    /// Generation of the current or next occupant. Starts at 1, so a
    /// handle value of 0 never resolves.
    generation: u32,
    record: Option<TransferRecord>,
}

/// Owns every in-flight transfer of one controller.
#[derive(Debug, Default)]
pub struct TransferArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl TransferArena {
    /// Store a new transfer and mint its handle.
    pub fn insert(&mut self, record: TransferRecord) -> UrbHandle {
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            return UrbHandle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            record: Some(record),
        });
        UrbHandle::new(index, 1)
    }

    fn slot(&self, handle: UrbHandle) -> Option<&Slot> {
        self.slots.get(handle.index() as usize)
    }

    /// Resolve a handle to its live transfer.
    #[must_use]
    pub fn get(&self, handle: UrbHandle) -> Option<&TransferRecord> {
        self.slot(handle)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.record.as_ref())
    }

    /// Resolve a handle to its live transfer, mutably.
    pub fn get_mut(&mut self, handle: UrbHandle) -> Option<&mut TransferRecord> {
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.record.as_mut())
    }

    /// Retire a transfer.
    ///
    /// Bumps the slot's generation, so the handle will never resolve
    /// again.
    pub fn remove(&mut self, handle: UrbHandle) -> Option<TransferRecord> {
        let slot = self
            .slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())?;
        let record = slot.record.take()?;

        slot.generation += 1;
        self.free.push(handle.index());
        self.live -= 1;

        Some(record)
    }

    /// Whether the handle once referred to a transfer that has since
    /// been retired.
    ///
    /// This distinguishes a stale handle (retire already happened, a
    /// no-op for cancellation) from a handle that was never issued.
    #[must_use]
    pub fn is_retired(&self, handle: UrbHandle) -> bool {
        self.slot(handle).is_some_and(|slot| {
            handle.generation() >= 1 && handle.generation() < slot.generation
        })
    }

    /// Number of live transfers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no transfer is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
