#![deny(missing_docs)]
//! # onewire-emu
//! An emulated 1-Wire bus for host-side testing of the memory protocols.
//!
//! [EmulatedBus] implements the [OneWire](embedded_onewire::OneWire) trait for one attached
//! [Slave]. It tracks reset, ROM addressing, overdrive switching and strong pull-up
//! delivery the way the line behaves, and logs every ROM and function command so tests
//! can check what reached the device.
//!
//! Three EEPROM devices are emulated at the byte level: [Ds2430a], [Ds2431] and
//! [Ds1961s]. Each can be made to misbehave through its [Faults].

mod bus;
mod ds1961s;
mod ds2430a;
mod ds2431;
mod scratchpad;
mod slave;

pub use bus::{BusStatus, EmulatedBus};
pub use ds1961s::Ds1961s;
pub use ds2430a::Ds2430a;
pub use ds2431::Ds2431;
pub use slave::{Faults, Slave, rom_with_family};
