//! # Port Status Tracking
//!
//! This module tracks the status/change bits and flags of the ports of
//! one virtual root hub.
//!
//! A port does not validate USB-legal transitions. It is opaque storage
//! for the bits the backend declares, with a single invariant: `change`
//! accumulates across backend updates and is cleared only by an
//! explicit host-side acknowledgement, which clears exactly the
//! acknowledged subset.

use bitflags::bitflags;

bitflags! {
    /// The wPortStatus bit field (USB 2.0 spec, Table 11-21).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortStatus: u16 {
        /// A device is present on the port.
        const CONNECTION = 0x0001;
        /// The port is enabled.
        const ENABLE = 0x0002;
        /// The port is suspended.
        const SUSPEND = 0x0004;
        /// An over-current condition exists on the port.
        const OVERCURRENT = 0x0008;
        /// Reset signaling is asserted on the port.
        const RESET = 0x0010;
        /// The port is powered.
        const POWER = 0x0100;
        /// A low-speed device is attached.
        const LOW_SPEED = 0x0200;
        /// A high-speed device is attached.
        const HIGH_SPEED = 0x0400;
    }

    /// The wPortChange bit field (USB 2.0 spec, Table 11-22).
    ///
    /// A set bit means the corresponding status bit differs from what
    /// the host side last observed. This is a dirty-flag, not a
    /// history log.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortChange: u16 {
        /// Connection status changed.
        const CONNECTION = 0x0001;
        /// Enable status changed.
        const ENABLE = 0x0002;
        /// Suspend status changed.
        const SUSPEND = 0x0004;
        /// Over-current status changed.
        const OVERCURRENT = 0x0008;
        /// Reset signaling completed.
        const RESET = 0x0010;
    }

    /// Additional per-port information for the host side's polling
    /// logic.
    ///
    /// Resuming is transient information, not persisted port state,
    /// which is why it is a flag and not a status bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortFlags: u8 {
        /// The port is currently resuming from suspend.
        const RESUMING = 0x01;
    }
}

/// A snapshot of one port as delivered to either side of the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortStat {
    /// The index of the port within its controller.
    pub index: u8,
    /// The current status bits.
    pub status: PortStatus,
    /// The accumulated, unacknowledged change bits.
    pub change: PortChange,
    /// The current flags.
    pub flags: PortFlags,
}

/// The live state of one root-hub port.
#[derive(Debug, Clone, Copy, Default)]
pub struct Port {
    status: PortStatus,
    change: PortChange,
    flags: PortFlags,
}

impl Port {
    /// Apply a backend-declared port update.
    ///
    /// The declared status replaces the stored one, the declared change
    /// bits are OR-ed into the accumulated set and the flags are
    /// replaced.
    ///
    /// # Parameters
    ///
    /// - `status`: the new status bits as the backend declares them.
    /// - `change`: the status bits that changed with this update.
    /// - `flags`: the new flags.
    pub fn update(&mut self, status: PortStatus, change: PortChange, flags: PortFlags) {
        self.status = status;
        self.change |= change;
        self.flags = flags;
    }

    /// Apply a host-side status write-back.
    ///
    /// Clears exactly the acknowledged change bits and stores the
    /// status view the host side wrote. Change bits outside `ack` stay
    /// untouched.
    ///
    /// # Parameters
    ///
    /// - `status`: the status bits as the host side wrote them back.
    /// - `ack`: the change bits the host side acknowledges.
    pub fn acknowledge(&mut self, status: PortStatus, ack: PortChange) {
        self.status = status;
        self.change &= !ack;
    }

    /// Produce a snapshot of the port under the given index.
    #[must_use]
    pub const fn snapshot(&self, index: u8) -> PortStat {
        PortStat {
            index,
            status: self.status,
            change: self.change,
            flags: self.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_status() -> impl Strategy<Value = PortStatus> {
        any::<u16>().prop_map(PortStatus::from_bits_truncate)
    }

    fn arb_change() -> impl Strategy<Value = PortChange> {
        any::<u16>().prop_map(PortChange::from_bits_truncate)
    }

    #[test]
    fn change_bits_accumulate_until_acknowledged() {
        let mut port = Port::default();

        port.update(
            PortStatus::CONNECTION | PortStatus::POWER,
            PortChange::CONNECTION,
            PortFlags::empty(),
        );
        port.update(
            PortStatus::CONNECTION | PortStatus::ENABLE | PortStatus::POWER,
            PortChange::ENABLE,
            PortFlags::empty(),
        );

        let stat = port.snapshot(0);
        assert_eq!(stat.change, PortChange::CONNECTION | PortChange::ENABLE);

        // Acknowledging one bit leaves the other untouched.
        port.acknowledge(stat.status, PortChange::CONNECTION);
        assert_eq!(port.snapshot(0).change, PortChange::ENABLE);
        assert_eq!(
            port.snapshot(0).status,
            PortStatus::CONNECTION | PortStatus::ENABLE | PortStatus::POWER
        );
    }

    #[test]
    fn acknowledge_does_not_set_change_bits() {
        let mut port = Port::default();

        port.acknowledge(PortStatus::POWER, PortChange::all());
        assert_eq!(port.snapshot(0).change, PortChange::empty());
        assert_eq!(port.snapshot(0).status, PortStatus::POWER);
    }

    #[test]
    fn flags_are_replaced_not_accumulated() {
        let mut port = Port::default();

        port.update(PortStatus::empty(), PortChange::empty(), PortFlags::RESUMING);
        assert_eq!(port.snapshot(0).flags, PortFlags::RESUMING);

        port.update(PortStatus::empty(), PortChange::empty(), PortFlags::empty());
        assert_eq!(port.snapshot(0).flags, PortFlags::empty());
    }

    proptest! {
        #[test]
        fn update_never_clears_change(status in arb_status(),
                                      change1 in arb_change(),
                                      change2 in arb_change()) {
            let mut port = Port::default();

            port.update(status, change1, PortFlags::empty());
            port.update(status, change2, PortFlags::empty());

            prop_assert_eq!(port.snapshot(0).change, change1 | change2);
        }

        #[test]
        fn acknowledge_clears_exactly_the_acked_subset(status in arb_status(),
                                                       change in arb_change(),
                                                       ack in arb_change()) {
            let mut port = Port::default();

            port.update(status, change, PortFlags::empty());
            port.acknowledge(status, ack);

            prop_assert_eq!(port.snapshot(0).change, change & !ack);
        }
    }
}
