//! # Transfer Descriptors and Lifecycle
//!
//! This module defines the in-flight representation of one USB
//! transfer (URB): the descriptor the backend receives, the buffers
//! that travel with it, the lifecycle state machine and the giveback
//! the backend produces to complete it.

use bitflags::bitflags;

use super::arena::UrbHandle;
use super::constants::{device, endpoint};
use super::error::VhciError;

/// The setup packet of a control transfer (USB 2.0 spec, Section 9.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    /// Characteristics of the request (direction, type, recipient).
    pub request_type: u8,
    /// The specific request.
    pub request: u8,
    /// Request-specific value.
    pub value: u16,
    /// Request-specific index or offset.
    pub index: u16,
    /// Number of bytes in the data stage.
    pub length: u16,
}

/// The four USB transfer types, with their single-byte wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrbType {
    /// Isochronous transfer.
    Iso = 0,
    /// Interrupt transfer.
    Int = 1,
    /// Control transfer.
    Control = 2,
    /// Bulk transfer.
    Bulk = 3,
}

impl UrbType {
    /// Decode the single-byte wire representation.
    pub fn from_wire(raw: u8) -> Result<Self, VhciError> {
        match raw {
            0 => Ok(Self::Iso),
            1 => Ok(Self::Int),
            2 => Ok(Self::Control),
            3 => Ok(Self::Bulk),
            _ => Err(VhciError::InvalidArgument("unknown transfer type")),
        }
    }
}

bitflags! {
    /// Per-transfer behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UrbFlags: u16 {
        /// IN: treat incoming short packets as an error.
        const SHORT_NOT_OK = 0x0001;
        /// ISO: schedule as soon as possible.
        const ISO_ASAP = 0x0002;
        /// BULK OUT: always terminate with a short packet, sending a
        /// zero-length packet if necessary.
        const ZERO_PACKET = 0x0040;
    }
}

/// One slot of an isochronous transfer's packet array.
///
/// The pair describes a flat byte range within the transfer buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoPacket {
    /// Offset of the packet's data within the transfer buffer.
    pub offset: u32,
    /// Length of the packet's data in bytes.
    pub length: u32,
}

/// The per-packet result of an isochronous transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoPacketStatus {
    /// Number of bytes actually transferred for this packet.
    pub actual: u32,
    /// Completion status of this packet.
    pub status: i32,
}

/// The descriptor of one USB transfer as handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urb {
    /// The transfer type.
    pub typ: UrbType,
    /// Address of the device this transfer is for.
    pub address: u8,
    /// Endpoint number including the direction bit.
    pub endpoint: u8,
    /// The setup packet. Present exactly for control transfers.
    pub setup_packet: Option<SetupPacket>,
    /// Number of bytes allocated for the data stage.
    pub buffer_length: u32,
    /// Polling interval for interrupt and isochronous transfers.
    pub interval: i32,
    /// Number of isochronous packets. Non-zero exactly for
    /// isochronous transfers.
    pub packet_count: u32,
    /// Behavior flags.
    pub flags: UrbFlags,
}

impl Urb {
    /// Whether this transfer moves data device to host.
    #[must_use]
    pub const fn is_in(&self) -> bool {
        self.endpoint & endpoint::DIR_IN != 0
    }

    /// Whether the backend has to fetch data before processing.
    ///
    /// OUT transfers with a payload need the buffer contents,
    /// isochronous transfers additionally need the packet array. IN
    /// transfers without packets have nothing to fetch and skip the
    /// data stage.
    #[must_use]
    pub const fn needs_data_fetch(&self) -> bool {
        matches!(self.typ, UrbType::Iso) || (!self.is_in() && self.buffer_length > 0)
    }

    /// Check the internal consistency of the descriptor.
    pub(crate) fn validate(&self) -> Result<(), VhciError> {
        if self.address > device::MAX_ADDRESS {
            return Err(VhciError::InvalidArgument("device address out of range"));
        }
        if self.endpoint & !endpoint::VALID_MASK != 0 {
            return Err(VhciError::InvalidArgument("malformed endpoint address"));
        }
        match self.typ {
            UrbType::Control => {
                if self.setup_packet.is_none() {
                    return Err(VhciError::InvalidArgument(
                        "control transfer without setup packet",
                    ));
                }
            }
            _ => {
                if self.setup_packet.is_some() {
                    return Err(VhciError::InvalidArgument(
                        "setup packet on non-control transfer",
                    ));
                }
            }
        }
        match self.typ {
            UrbType::Iso => {
                if self.packet_count == 0 {
                    return Err(VhciError::InvalidArgument(
                        "isochronous transfer without packets",
                    ));
                }
            }
            _ => {
                if self.packet_count != 0 {
                    return Err(VhciError::InvalidArgument(
                        "packet count on non-isochronous transfer",
                    ));
                }
            }
        }
        if self.buffer_length > i32::MAX as u32 {
            return Err(VhciError::InvalidArgument("buffer length out of range"));
        }

        Ok(())
    }
}

/// Lifecycle of one transfer record.
///
/// The terminal outcomes (completed, cancelled) are not listed here:
/// reaching one retires the record from the arena and surfaces a
/// [`Completion`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Created by submit, PROCESS_URB still queued.
    Queued,
    /// Delivered to the backend, data stage still pending.
    Fetched,
    /// The backend is currently fetching the transfer data.
    DataPending,
    /// The backend is emulating the transfer.
    Processing,
    /// A cancel was requested after delivery; a late giveback is still
    /// a valid outcome.
    CancelRequested,
}

/// One in-flight transfer, owned exclusively by its controller.
///
/// The backend never holds a reference to this record, only the opaque
/// handle.
#[derive(Debug)]
pub struct TransferRecord {
    /// The transfer descriptor.
    pub(crate) urb: Urb,
    /// Current lifecycle state.
    pub(crate) state: TransferState,
    /// The OUT-direction payload. Empty for IN transfers.
    pub(crate) data: Vec<u8>,
    /// The isochronous packet array. Empty for non-ISO transfers.
    pub(crate) iso_packets: Vec<IsoPacket>,
}

/// The transfer data handed to the backend on a data fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrbData {
    /// The OUT-direction payload bytes. Empty for IN transfers.
    pub buffer: Vec<u8>,
    /// The isochronous packet array.
    pub iso_packets: Vec<IsoPacket>,
    /// Number of bytes allocated for the data stage.
    pub buffer_length: u32,
}

/// The completion a backend submits for one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Giveback {
    /// Identity of the transfer being completed.
    pub handle: UrbHandle,
    /// Completion status. Ignored for isochronous transfers, which
    /// report per-packet status instead.
    pub status: i32,
    /// The received data. Present exactly for IN transfers.
    pub buffer: Option<Vec<u8>>,
    /// Number of bytes actually transferred.
    pub buffer_actual: u32,
    /// Per-packet results. One entry per isochronous packet.
    pub iso_packets: Vec<IsoPacketStatus>,
    /// Number of isochronous packets that completed with an error.
    pub error_count: i32,
}

/// How a transfer resolved, as observed by the host-side stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The backend produced a giveback.
    Completed {
        /// Completion status. Ignored for isochronous transfers.
        status: i32,
        /// The received data for IN transfers.
        buffer: Option<Vec<u8>>,
        /// Number of bytes actually transferred.
        buffer_actual: u32,
        /// Per-packet results for isochronous transfers.
        iso_packets: Vec<IsoPacketStatus>,
        /// Number of isochronous packets that completed with an error.
        error_count: i32,
    },
    /// The transfer was resolved by cancellation before any giveback.
    Cancelled,
}

/// A resolved transfer, ready to be returned to the host-side stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Identity of the resolved transfer. Invalid from this point on.
    pub handle: UrbHandle,
    /// The result.
    pub outcome: TransferOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk_out() -> Urb {
        Urb {
            typ: UrbType::Bulk,
            address: 5,
            endpoint: 0x02,
            setup_packet: None,
            buffer_length: 64,
            interval: 0,
            packet_count: 0,
            flags: UrbFlags::empty(),
        }
    }

    #[test]
    fn accepts_well_formed_descriptors() {
        assert_eq!(bulk_out().validate(), Ok(()));

        let control = Urb {
            typ: UrbType::Control,
            endpoint: 0x80,
            setup_packet: Some(SetupPacket {
                request_type: 0x80,
                request: 6,
                value: 0x0100,
                index: 0,
                length: 8,
            }),
            buffer_length: 8,
            ..bulk_out()
        };
        assert_eq!(control.validate(), Ok(()));
    }

    #[test]
    fn rejects_inconsistent_descriptors() {
        let no_setup = Urb {
            typ: UrbType::Control,
            ..bulk_out()
        };
        assert!(matches!(
            no_setup.validate(),
            Err(VhciError::InvalidArgument(_))
        ));

        let iso_without_packets = Urb {
            typ: UrbType::Iso,
            ..bulk_out()
        };
        assert!(matches!(
            iso_without_packets.validate(),
            Err(VhciError::InvalidArgument(_))
        ));

        let bad_address = Urb {
            address: 128,
            ..bulk_out()
        };
        assert!(matches!(
            bad_address.validate(),
            Err(VhciError::InvalidArgument(_))
        ));

        let bad_endpoint = Urb {
            endpoint: 0x42,
            ..bulk_out()
        };
        assert!(matches!(
            bad_endpoint.validate(),
            Err(VhciError::InvalidArgument(_))
        ));
    }

    #[test]
    fn data_fetch_requirement_follows_direction_and_type() {
        assert!(bulk_out().needs_data_fetch());

        let bulk_in = Urb {
            endpoint: 0x82,
            ..bulk_out()
        };
        assert!(!bulk_in.needs_data_fetch());

        let zero_length_out = Urb {
            buffer_length: 0,
            ..bulk_out()
        };
        assert!(!zero_length_out.needs_data_fetch());

        let iso_in = Urb {
            typ: UrbType::Iso,
            endpoint: 0x81,
            packet_count: 4,
            ..bulk_out()
        };
        assert!(iso_in.needs_data_fetch());
    }
}
