//! # Wire Marshalling
//!
//! Byte-exact encodings for carrying the controller protocol over a
//! byte-oriented channel.
//!
//! All multi-byte fields are little-endian with fixed widths and
//! explicit offsets; padding bytes are spelled out, never implied. The
//! data and giveback frames exist in two widths that differ only in
//! how buffer locations are represented: a 64-bit word natively, a
//! 32-bit word for a narrow peer. Everything else is width-stable, so
//! a single encoder parameterized by [`PtrWidth`] serves both.

use super::arena::UrbHandle;
use super::error::VhciError;
use super::port::{PortChange, PortFlags, PortStat, PortStatus};
use super::queue::WorkItem;
use super::transfer::{IsoPacket, IsoPacketStatus, SetupPacket, Urb, UrbFlags, UrbType};

/// Size of an encoded register frame.
pub const REGISTER_FRAME_LEN: usize = 32;
/// Size of an encoded port stat frame.
pub const PORT_STAT_FRAME_LEN: usize = 8;
/// Size of an encoded work frame.
pub const WORK_FRAME_LEN: usize = 40;
/// Size of one encoded iso packet descriptor or result.
pub const ISO_PACKET_LEN: usize = 8;

// Work frame layout.
const WORK_HANDLE: usize = 0;
const WORK_PAYLOAD: usize = 8;
const WORK_TIMEOUT: usize = 36;
const WORK_TYPE: usize = 38;

// Urb payload layout, relative to the start of the frame.
const URB_SETUP: usize = WORK_PAYLOAD;
const URB_BUFFER_LENGTH: usize = WORK_PAYLOAD + 8;
const URB_INTERVAL: usize = WORK_PAYLOAD + 12;
const URB_PACKET_COUNT: usize = WORK_PAYLOAD + 16;
const URB_FLAGS: usize = WORK_PAYLOAD + 20;
const URB_ADDRESS: usize = WORK_PAYLOAD + 22;
const URB_ENDPOINT: usize = WORK_PAYLOAD + 23;
const URB_TYPE: usize = WORK_PAYLOAD + 24;

// Work type discriminants.
const WORK_TYPE_PORT_STAT: u8 = 0;
const WORK_TYPE_PROCESS_URB: u8 = 1;
const WORK_TYPE_CANCEL_URB: u8 = 2;

/// Pointer width of the peer, selecting how the buffer location words
/// of data and giveback frames are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrWidth {
    /// 32-bit location words, for a narrow peer.
    U32,
    /// Native 64-bit location words.
    U64,
}

impl PtrWidth {
    const fn word_len(self) -> usize {
        match self {
            Self::U32 => 4,
            Self::U64 => 8,
        }
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

fn read_location(bytes: &[u8], offset: usize, width: PtrWidth) -> u64 {
    match width {
        PtrWidth::U32 => u64::from(read_u32(bytes, offset)),
        PtrWidth::U64 => read_u64(bytes, offset),
    }
}

fn push_location(out: &mut Vec<u8>, width: PtrWidth, value: u64) -> Result<(), VhciError> {
    match width {
        PtrWidth::U32 => {
            let narrow: u32 = value
                .try_into()
                .map_err(|_| VhciError::InvalidArgument("location beyond the 32-bit range"))?;
            out.extend_from_slice(&narrow.to_le_bytes());
        }
        PtrWidth::U64 => out.extend_from_slice(&value.to_le_bytes()),
    }
    Ok(())
}

/// Encode a port stat frame.
#[must_use]
pub fn encode_port_stat(stat: &PortStat) -> [u8; PORT_STAT_FRAME_LEN] {
    let mut bytes = [0; PORT_STAT_FRAME_LEN];

    bytes[0..2].copy_from_slice(&stat.status.bits().to_le_bytes());
    bytes[2..4].copy_from_slice(&stat.change.bits().to_le_bytes());
    bytes[4] = stat.index;
    bytes[5] = stat.flags.bits();
    // Bytes 6 and 7 are reserved, keeping the frame size a multiple
    // of four.

    bytes
}

/// Decode a port stat frame.
///
/// Rejects unknown status, change or flag bits.
pub fn parse_port_stat(bytes: &[u8]) -> Result<PortStat, VhciError> {
    if bytes.len() != PORT_STAT_FRAME_LEN {
        return Err(VhciError::InvalidArgument("port stat frame size mismatch"));
    }

    let status = PortStatus::from_bits(read_u16(bytes, 0))
        .ok_or(VhciError::InvalidArgument("unknown port status bits"))?;
    let change = PortChange::from_bits(read_u16(bytes, 2))
        .ok_or(VhciError::InvalidArgument("unknown port change bits"))?;
    let flags = PortFlags::from_bits(bytes[5])
        .ok_or(VhciError::InvalidArgument("unknown port flag bits"))?;

    Ok(PortStat {
        index: bytes[4],
        status,
        change,
        flags,
    })
}

/// The register handshake as it travels over the wire.
///
/// The caller provides only the port count; id, bus number and bus-id
/// are produced by the registry and filled in on the way back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFrame {
    /// The registry-assigned controller id.
    pub id: i32,
    /// The assigned USB bus number.
    pub usb_busnum: i32,
    /// The NUL-terminated bus-id string.
    pub bus_id: String,
    /// The requested number of root-hub ports.
    pub port_count: u8,
}

impl RegisterFrame {
    /// Encode the frame.
    ///
    /// Fails when the bus-id does not fit its 20-byte field including
    /// the terminating NUL.
    pub fn to_bytes(&self) -> Result<[u8; REGISTER_FRAME_LEN], VhciError> {
        if self.bus_id.len() >= 20 {
            return Err(VhciError::InvalidArgument("bus id too long"));
        }

        let mut bytes = [0; REGISTER_FRAME_LEN];
        bytes[0..4].copy_from_slice(&self.id.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.usb_busnum.to_le_bytes());
        bytes[8..8 + self.bus_id.len()].copy_from_slice(self.bus_id.as_bytes());
        bytes[28] = self.port_count;
        // Bytes 29 to 31 are padding.

        Ok(bytes)
    }

    /// Decode a frame.
    pub fn parse(bytes: &[u8]) -> Result<Self, VhciError> {
        if bytes.len() != REGISTER_FRAME_LEN {
            return Err(VhciError::InvalidArgument("register frame size mismatch"));
        }

        let field = &bytes[8..28];
        let nul = field
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(VhciError::InvalidArgument("bus id without terminator"))?;
        let bus_id = std::str::from_utf8(&field[..nul])
            .map_err(|_| VhciError::InvalidArgument("bus id is not valid UTF-8"))?
            .to_string();

        Ok(Self {
            id: read_i32(bytes, 0),
            usb_busnum: read_i32(bytes, 4),
            bus_id,
            port_count: bytes[28],
        })
    }
}

fn encode_urb_payload(urb: &Urb, bytes: &mut [u8; WORK_FRAME_LEN]) {
    if let Some(setup) = &urb.setup_packet {
        bytes[URB_SETUP] = setup.request_type;
        bytes[URB_SETUP + 1] = setup.request;
        bytes[URB_SETUP + 2..URB_SETUP + 4].copy_from_slice(&setup.value.to_le_bytes());
        bytes[URB_SETUP + 4..URB_SETUP + 6].copy_from_slice(&setup.index.to_le_bytes());
        bytes[URB_SETUP + 6..URB_SETUP + 8].copy_from_slice(&setup.length.to_le_bytes());
    }
    bytes[URB_BUFFER_LENGTH..URB_BUFFER_LENGTH + 4]
        .copy_from_slice(&(urb.buffer_length as i32).to_le_bytes());
    bytes[URB_INTERVAL..URB_INTERVAL + 4].copy_from_slice(&urb.interval.to_le_bytes());
    bytes[URB_PACKET_COUNT..URB_PACKET_COUNT + 4]
        .copy_from_slice(&(urb.packet_count as i32).to_le_bytes());
    bytes[URB_FLAGS..URB_FLAGS + 2].copy_from_slice(&urb.flags.bits().to_le_bytes());
    bytes[URB_ADDRESS] = urb.address;
    bytes[URB_ENDPOINT] = urb.endpoint;
    bytes[URB_TYPE] = urb.typ as u8;
}

fn parse_urb_payload(bytes: &[u8]) -> Result<Urb, VhciError> {
    let typ = UrbType::from_wire(bytes[URB_TYPE])?;

    let setup_packet = match typ {
        UrbType::Control => Some(SetupPacket {
            request_type: bytes[URB_SETUP],
            request: bytes[URB_SETUP + 1],
            value: read_u16(bytes, URB_SETUP + 2),
            index: read_u16(bytes, URB_SETUP + 4),
            length: read_u16(bytes, URB_SETUP + 6),
        }),
        _ => None,
    };

    let buffer_length = read_i32(bytes, URB_BUFFER_LENGTH);
    let packet_count = read_i32(bytes, URB_PACKET_COUNT);
    if buffer_length < 0 || packet_count < 0 {
        return Err(VhciError::InvalidArgument("negative length field"));
    }
    let flags = UrbFlags::from_bits(read_u16(bytes, URB_FLAGS))
        .ok_or(VhciError::InvalidArgument("unknown transfer flag bits"))?;

    Ok(Urb {
        typ,
        address: bytes[URB_ADDRESS],
        endpoint: bytes[URB_ENDPOINT],
        setup_packet,
        buffer_length: buffer_length as u32,
        interval: read_i32(bytes, URB_INTERVAL),
        packet_count: packet_count as u32,
        flags,
    })
}

/// Encode a work frame.
///
/// # Parameters
///
/// - `item`: the work item to encode.
/// - `timeout_ms`: the fetch timeout echoed in the frame.
#[must_use]
pub fn encode_work(item: &WorkItem, timeout_ms: i16) -> [u8; WORK_FRAME_LEN] {
    let mut bytes = [0; WORK_FRAME_LEN];

    match item {
        WorkItem::PortStat(stat) => {
            bytes[WORK_PAYLOAD..WORK_PAYLOAD + PORT_STAT_FRAME_LEN]
                .copy_from_slice(&encode_port_stat(stat));
            bytes[WORK_TYPE] = WORK_TYPE_PORT_STAT;
        }
        WorkItem::ProcessUrb { handle, urb } => {
            bytes[WORK_HANDLE..WORK_HANDLE + 8].copy_from_slice(&handle.raw().to_le_bytes());
            encode_urb_payload(urb, &mut bytes);
            bytes[WORK_TYPE] = WORK_TYPE_PROCESS_URB;
        }
        WorkItem::CancelUrb { handle } => {
            bytes[WORK_HANDLE..WORK_HANDLE + 8].copy_from_slice(&handle.raw().to_le_bytes());
            bytes[WORK_TYPE] = WORK_TYPE_CANCEL_URB;
        }
    }
    bytes[WORK_TIMEOUT..WORK_TIMEOUT + 2].copy_from_slice(&timeout_ms.to_le_bytes());
    // Byte 39 is padding.

    bytes
}

/// Decode a work frame into the item and the echoed timeout.
pub fn parse_work(bytes: &[u8]) -> Result<(WorkItem, i16), VhciError> {
    if bytes.len() != WORK_FRAME_LEN {
        return Err(VhciError::InvalidArgument("work frame size mismatch"));
    }

    let timeout_ms = read_i16(bytes, WORK_TIMEOUT);
    let handle = UrbHandle::from_raw(read_u64(bytes, WORK_HANDLE));

    let item = match bytes[WORK_TYPE] {
        WORK_TYPE_PORT_STAT => WorkItem::PortStat(parse_port_stat(
            &bytes[WORK_PAYLOAD..WORK_PAYLOAD + PORT_STAT_FRAME_LEN],
        )?),
        WORK_TYPE_PROCESS_URB => {
            if handle.raw() == 0 {
                return Err(VhciError::InvalidArgument("work item without handle"));
            }
            WorkItem::ProcessUrb {
                handle,
                urb: parse_urb_payload(bytes)?,
            }
        }
        WORK_TYPE_CANCEL_URB => {
            if handle.raw() == 0 {
                return Err(VhciError::InvalidArgument("work item without handle"));
            }
            WorkItem::CancelUrb { handle }
        }
        _ => return Err(VhciError::InvalidArgument("unknown work type")),
    };

    Ok((item, timeout_ms))
}

/// The data-fetch frame: where a transfer's buffer and iso packet
/// array live, as flat byte ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrbDataFrame {
    /// Identity of the transfer.
    pub handle: u64,
    /// Location of the data buffer.
    pub buffer: u64,
    /// Location of the iso packet array.
    pub iso_packets: u64,
    /// Number of bytes allocated for the buffer.
    pub buffer_length: i32,
    /// Number of iso packets.
    pub packet_count: i32,
}

impl UrbDataFrame {
    /// Encoded size for the given width.
    #[must_use]
    pub const fn frame_len(width: PtrWidth) -> usize {
        8 + 2 * width.word_len() + 8
    }

    /// Encode the frame for a peer of the given width.
    ///
    /// Fails when a location does not fit the narrow encoding.
    pub fn to_bytes(&self, width: PtrWidth) -> Result<Vec<u8>, VhciError> {
        let mut out = Vec::with_capacity(Self::frame_len(width));

        out.extend_from_slice(&self.handle.to_le_bytes());
        push_location(&mut out, width, self.buffer)?;
        push_location(&mut out, width, self.iso_packets)?;
        out.extend_from_slice(&self.buffer_length.to_le_bytes());
        out.extend_from_slice(&self.packet_count.to_le_bytes());

        Ok(out)
    }

    /// Decode a frame of the given width.
    pub fn parse(width: PtrWidth, bytes: &[u8]) -> Result<Self, VhciError> {
        if bytes.len() != Self::frame_len(width) {
            return Err(VhciError::InvalidArgument("data frame size mismatch"));
        }

        let word = width.word_len();
        Ok(Self {
            handle: read_u64(bytes, 0),
            buffer: read_location(bytes, 8, width),
            iso_packets: read_location(bytes, 8 + word, width),
            buffer_length: read_i32(bytes, 8 + 2 * word),
            packet_count: read_i32(bytes, 8 + 2 * word + 4),
        })
    }
}

/// The giveback frame the backend submits to complete a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GivebackFrame {
    /// Identity of the transfer.
    pub handle: u64,
    /// Location of the received data; 0 for OUT transfers.
    pub buffer: u64,
    /// Location of the iso result array; 0 for non-ISO transfers.
    pub iso_packets: u64,
    /// Completion status. Ignored for isochronous transfers.
    pub status: i32,
    /// Number of bytes actually transferred.
    pub buffer_actual: i32,
    /// Number of iso packets. Has to match the transfer.
    pub packet_count: i32,
    /// Number of iso packets that completed with an error.
    pub error_count: i32,
}

impl GivebackFrame {
    /// Encoded size for the given width.
    #[must_use]
    pub const fn frame_len(width: PtrWidth) -> usize {
        8 + 2 * width.word_len() + 16
    }

    /// Encode the frame for a peer of the given width.
    pub fn to_bytes(&self, width: PtrWidth) -> Result<Vec<u8>, VhciError> {
        let mut out = Vec::with_capacity(Self::frame_len(width));

        out.extend_from_slice(&self.handle.to_le_bytes());
        push_location(&mut out, width, self.buffer)?;
        push_location(&mut out, width, self.iso_packets)?;
        out.extend_from_slice(&self.status.to_le_bytes());
        out.extend_from_slice(&self.buffer_actual.to_le_bytes());
        out.extend_from_slice(&self.packet_count.to_le_bytes());
        out.extend_from_slice(&self.error_count.to_le_bytes());

        Ok(out)
    }

    /// Decode a frame of the given width.
    pub fn parse(width: PtrWidth, bytes: &[u8]) -> Result<Self, VhciError> {
        if bytes.len() != Self::frame_len(width) {
            return Err(VhciError::InvalidArgument("giveback frame size mismatch"));
        }

        let word = width.word_len();
        let fields = 8 + 2 * word;
        Ok(Self {
            handle: read_u64(bytes, 0),
            buffer: read_location(bytes, 8, width),
            iso_packets: read_location(bytes, 8 + word, width),
            status: read_i32(bytes, fields),
            buffer_actual: read_i32(bytes, fields + 4),
            packet_count: read_i32(bytes, fields + 8),
            error_count: read_i32(bytes, fields + 12),
        })
    }
}

/// Encode an iso packet descriptor array.
#[must_use]
pub fn encode_iso_packets(packets: &[IsoPacket]) -> Vec<u8> {
    let mut out = Vec::with_capacity(packets.len() * ISO_PACKET_LEN);
    for packet in packets {
        out.extend_from_slice(&packet.offset.to_le_bytes());
        out.extend_from_slice(&packet.length.to_le_bytes());
    }
    out
}

/// Decode an iso packet descriptor array.
///
/// Rejects an array whose length disagrees with the packet count
/// declared by the transfer.
pub fn parse_iso_packets(bytes: &[u8], expected: u32) -> Result<Vec<IsoPacket>, VhciError> {
    if bytes.len() != expected as usize * ISO_PACKET_LEN {
        return Err(VhciError::InvalidArgument(
            "iso packet array length disagrees with packet count",
        ));
    }

    Ok(bytes
        .chunks_exact(ISO_PACKET_LEN)
        .map(|chunk| IsoPacket {
            offset: read_u32(chunk, 0),
            length: read_u32(chunk, 4),
        })
        .collect())
}

/// Encode an iso result array.
#[must_use]
pub fn encode_iso_results(results: &[IsoPacketStatus]) -> Vec<u8> {
    let mut out = Vec::with_capacity(results.len() * ISO_PACKET_LEN);
    for result in results {
        out.extend_from_slice(&result.actual.to_le_bytes());
        out.extend_from_slice(&result.status.to_le_bytes());
    }
    out
}

/// Decode an iso result array.
///
/// Rejects an array whose length disagrees with the packet count
/// declared by the transfer.
pub fn parse_iso_results(bytes: &[u8], expected: u32) -> Result<Vec<IsoPacketStatus>, VhciError> {
    if bytes.len() != expected as usize * ISO_PACKET_LEN {
        return Err(VhciError::InvalidArgument(
            "iso result array length disagrees with packet count",
        ));
    }

    Ok(bytes
        .chunks_exact(ISO_PACKET_LEN)
        .map(|chunk| IsoPacketStatus {
            actual: read_u32(chunk, 0),
            status: read_i32(chunk, 4),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_stat_frame_layout() {
        let stat = PortStat {
            index: 1,
            status: PortStatus::CONNECTION | PortStatus::POWER,
            change: PortChange::CONNECTION,
            flags: PortFlags::RESUMING,
        };

        let bytes = encode_port_stat(&stat);
        assert_eq!(bytes, [0x01, 0x01, 0x01, 0x00, 0x01, 0x01, 0x00, 0x00]);

        assert_eq!(parse_port_stat(&bytes).unwrap(), stat);
    }

    #[test]
    fn port_stat_rejects_unknown_bits() {
        // Bit 11 is not a defined status bit.
        let bytes = [0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(parse_port_stat(&bytes).is_err());

        assert!(parse_port_stat(&[0; 4]).is_err());
    }

    #[test]
    fn register_frame_round_trip() {
        let frame = RegisterFrame {
            id: 3,
            usb_busnum: 4,
            bus_id: "usb_vhci_hcd.3".to_string(),
            port_count: 8,
        };

        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.len(), REGISTER_FRAME_LEN);
        assert_eq!(bytes[0], 3);
        assert_eq!(bytes[4], 4);
        assert_eq!(&bytes[8..22], b"usb_vhci_hcd.3");
        assert_eq!(bytes[22], 0);
        assert_eq!(bytes[28], 8);

        assert_eq!(RegisterFrame::parse(&bytes).unwrap(), frame);
    }

    #[test]
    fn register_frame_rejects_oversized_bus_id() {
        let frame = RegisterFrame {
            id: 0,
            usb_busnum: 1,
            bus_id: "x".repeat(20),
            port_count: 1,
        };
        assert_eq!(
            frame.to_bytes(),
            Err(VhciError::InvalidArgument("bus id too long"))
        );
    }

    #[test]
    fn work_frame_layout_for_a_control_transfer() {
        let urb = Urb {
            typ: UrbType::Control,
            address: 2,
            endpoint: 0x80,
            setup_packet: Some(SetupPacket {
                request_type: 0x80,
                request: 0x06,
                value: 0x0100,
                index: 0,
                length: 8,
            }),
            buffer_length: 8,
            interval: 0,
            packet_count: 0,
            flags: UrbFlags::empty(),
        };
        let handle = UrbHandle::from_raw(0x0000_0001_0000_0002);
        let item = WorkItem::ProcessUrb {
            handle,
            urb: urb.clone(),
        };

        let bytes = encode_work(&item, 100);

        // Handle, little-endian.
        assert_eq!(bytes[0..8], [2, 0, 0, 0, 1, 0, 0, 0]);
        // Setup packet.
        assert_eq!(bytes[8..16], [0x80, 0x06, 0x00, 0x01, 0, 0, 8, 0]);
        // Buffer length.
        assert_eq!(bytes[16..20], [8, 0, 0, 0]);
        // Address, endpoint, type.
        assert_eq!(bytes[30], 2);
        assert_eq!(bytes[31], 0x80);
        assert_eq!(bytes[32], 2);
        // Timeout and discriminant.
        assert_eq!(bytes[36..38], [100, 0]);
        assert_eq!(bytes[38], 1);

        let (parsed, timeout_ms) = parse_work(&bytes).unwrap();
        assert_eq!(parsed, item);
        assert_eq!(timeout_ms, 100);
    }

    #[test]
    fn work_frame_round_trips_the_infinite_timeout() {
        let item = WorkItem::CancelUrb {
            handle: UrbHandle::from_raw(1 << 32),
        };

        let bytes = encode_work(&item, -1);
        assert_eq!(bytes[36..38], [0xff, 0xff]);

        let (parsed, timeout_ms) = parse_work(&bytes).unwrap();
        assert_eq!(parsed, item);
        assert_eq!(timeout_ms, -1);
    }

    #[test]
    fn work_frame_rejects_malformed_input() {
        let mut bytes = encode_work(
            &WorkItem::CancelUrb {
                handle: UrbHandle::from_raw(1 << 32),
            },
            0,
        );

        bytes[38] = 9;
        assert_eq!(
            parse_work(&bytes),
            Err(VhciError::InvalidArgument("unknown work type"))
        );

        bytes[38] = 2;
        bytes[0..8].copy_from_slice(&[0; 8]);
        assert_eq!(
            parse_work(&bytes),
            Err(VhciError::InvalidArgument("work item without handle"))
        );

        assert!(parse_work(&bytes[..20]).is_err());
    }

    #[test]
    fn data_frame_widths_differ_only_in_the_location_words() {
        let frame = UrbDataFrame {
            handle: 0x1_0000_0003,
            buffer: 0x1000,
            iso_packets: 0x2000,
            buffer_length: 256,
            packet_count: 4,
        };

        let native = frame.to_bytes(PtrWidth::U64).unwrap();
        assert_eq!(native.len(), 32);
        let compat = frame.to_bytes(PtrWidth::U32).unwrap();
        assert_eq!(compat.len(), 24);

        // The width-stable fields agree.
        assert_eq!(native[0..8], compat[0..8]);
        assert_eq!(native[24..32], compat[16..24]);

        assert_eq!(UrbDataFrame::parse(PtrWidth::U64, &native).unwrap(), frame);
        assert_eq!(UrbDataFrame::parse(PtrWidth::U32, &compat).unwrap(), frame);
    }

    #[test]
    fn narrow_encoding_rejects_wide_locations() {
        let frame = GivebackFrame {
            handle: 1 << 32,
            buffer: u64::from(u32::MAX) + 1,
            iso_packets: 0,
            status: 0,
            buffer_actual: 0,
            packet_count: 0,
            error_count: 0,
        };

        assert!(frame.to_bytes(PtrWidth::U64).is_ok());
        assert_eq!(
            frame.to_bytes(PtrWidth::U32),
            Err(VhciError::InvalidArgument(
                "location beyond the 32-bit range"
            ))
        );
    }

    #[test]
    fn giveback_frame_round_trip() {
        let frame = GivebackFrame {
            handle: 0x2_0000_0001,
            buffer: 0x3000,
            iso_packets: 0x4000,
            status: -32,
            buffer_actual: 64,
            packet_count: 2,
            error_count: 1,
        };

        for width in [PtrWidth::U32, PtrWidth::U64] {
            let bytes = frame.to_bytes(width).unwrap();
            assert_eq!(bytes.len(), GivebackFrame::frame_len(width));
            assert_eq!(GivebackFrame::parse(width, &bytes).unwrap(), frame);
        }
    }

    #[test]
    fn iso_arrays_must_match_the_packet_count() {
        let packets = vec![
            IsoPacket {
                offset: 0,
                length: 32,
            },
            IsoPacket {
                offset: 32,
                length: 32,
            },
        ];

        let bytes = encode_iso_packets(&packets);
        assert_eq!(bytes.len(), 16);
        assert_eq!(parse_iso_packets(&bytes, 2).unwrap(), packets);

        assert_eq!(
            parse_iso_packets(&bytes, 3),
            Err(VhciError::InvalidArgument(
                "iso packet array length disagrees with packet count"
            ))
        );

        let results = vec![IsoPacketStatus {
            actual: 32,
            status: 0,
        }];
        let bytes = encode_iso_results(&results);
        assert_eq!(parse_iso_results(&bytes, 1).unwrap(), results);
        assert!(parse_iso_results(&bytes, 0).is_err());
    }
}
