//! # Protocol Constants
//!
//! This module collects the numeric constants of the controller protocol.
//! The port status and change bit values are defined in the USB 2.0
//! specification (Tables 11-21 and 11-22) and live with their typed
//! bitmasks in [`super::port`].

// Allow missing docs to avoid duplicating the protocol description for
// every constant.
#![allow(missing_docs)]

/// Constants for the register handshake.
pub mod handshake {
    /// The maximum number of ports a single controller can expose.
    ///
    /// This is the root-hub port limit of the hub descriptor.
    pub const MAX_PORTS: u8 = 31;

    /// Prefix of the synthesized bus-id string.
    pub const BUS_ID_PREFIX: &str = "usb_vhci_hcd";

    /// Capacity of the bus-id field on the wire, including the
    /// terminating NUL byte.
    pub const BUS_ID_CAPACITY: usize = 20;

    /// The largest controller id we hand out.
    ///
    /// Bounded so that "usb_vhci_hcd.<id>" always fits into
    /// [`BUS_ID_CAPACITY`] bytes.
    pub const MAX_ID: i32 = 999_999;
}

/// Constants for the bounded wait of a work fetch.
pub mod timeout {
    /// Wait until work arrives, without a deadline.
    pub const INFINITE: i16 = -1;

    /// The wait applied when the caller passes a timeout of 0.
    pub const DEFAULT_MS: i16 = 100;

    /// The longest bounded wait a caller can request.
    pub const MAX_MS: i16 = 1000;
}

/// Constants for endpoint addressing.
pub mod endpoint {
    /// The endpoint number part of an endpoint address.
    pub const NUMBER_MASK: u8 = 0x0f;

    /// The direction bit of an endpoint address. Set means IN
    /// (device to host).
    pub const DIR_IN: u8 = 0x80;

    /// All bits that may legally be set in an endpoint address.
    pub const VALID_MASK: u8 = NUMBER_MASK | DIR_IN;
}

/// Constants for device addressing.
pub mod device {
    /// The highest USB device address.
    pub const MAX_ADDRESS: u8 = 127;
}
