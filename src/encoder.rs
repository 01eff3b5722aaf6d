//! The bit-banged register write protocol.
//!
//! Every register write is two latch cycles on the same data lines:
//! the register index is strobed in first, then the value. Each cycle
//! is followed by a settle delay the chip needs before the data lines
//! may change again.

use crate::chip::ChipHandle;
use crate::opl::RegisterCommand;
use crate::registers::is_valid_opl3_address;
use crate::transport::{Control, Transport};

/// Minimum time after the address latch before the value may be placed
/// on the data lines, in microseconds
pub const ADDRESS_SETTLE_US: u32 = 10;

/// Minimum time after the value latch before the next write may start,
/// in microseconds
pub const WRITE_SETTLE_US: u32 = 33;

/// Control line states that latch the register index
pub const ADDRESS_STROBE: [Control; 3] = [
    Control::SELECT.union(Control::INIT).union(Control::STROBE),
    Control::SELECT.union(Control::STROBE),
    Control::SELECT.union(Control::INIT).union(Control::STROBE),
];

/// Control line states that latch the register value
pub const VALUE_STROBE: [Control; 3] = [
    Control::SELECT.union(Control::INIT),
    Control::SELECT,
    Control::SELECT.union(Control::INIT),
];

/// Perform one complete register write on the chip.
///
/// Holds the chip's register lock for the whole sequence, delays
/// included, so writes issued from several threads never interleave.
pub fn send<T: Transport>(chip: &ChipHandle<T>, command: RegisterCommand) {
    if !is_valid_opl3_address(command.address) {
        log::debug!("write to unmapped register {:#05x}", command.address);
    }
    let port = chip.ports().select(command.port());
    let mut bus = chip.lock();
    let Some(transport) = bus.transport() else {
        log::warn!(
            "dropping write {:#05x}={:#04x} to disconnected chip",
            command.address,
            command.value
        );
        return;
    };
    encode(transport, port, command);
}

/// Emit the bus transaction for `command` at the given port address.
///
/// The caller is responsible for serializing access to `transport`.
pub fn encode<T: Transport + ?Sized>(transport: &mut T, port: u64, command: RegisterCommand) {
    log::trace!(
        "opl write {:#05x}={:#04x} via {:#x}",
        command.address,
        command.value,
        port
    );

    transport.write_data(port, command.register());
    for lines in ADDRESS_STROBE {
        transport.write_control(port, lines);
    }
    transport.delay(ADDRESS_SETTLE_US);

    transport.write_data(port, command.value);
    for lines in VALUE_STROBE {
        transport.write_control(port, lines);
    }
    transport.delay(WRITE_SETTLE_US);
}
