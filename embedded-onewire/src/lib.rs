#![no_std]
#![deny(missing_docs)]
//! # embedded-onewire
//! A no-std implementation of the 1-Wire protocol primitives.
//!
//! This crate provides a trait-based interface for 1-Wire communication, allowing you to implement the protocol on various platforms.
//! [OneWire] trait defines the basic operations required for 1-Wire communication, such as resetting the bus, addressing a device,
//! writing and reading bytes and bits, switching between standard and overdrive speed, and delivering power through a strong pull-up.
//!
//! The crate also provides the two checksums used on the bus: [OneWireCrc] (CRC-8, used in ROM codes and
//! some memory commands) and [OneWireCrc16] (CRC-16, used by memory devices and data packets).

mod error;
mod traits;
mod utils;
pub use error::OneWireError;
pub use traits::{BusSpeed, OneWire, OneWireStatus, PowerDuration, PowerTrigger};
pub use utils::{OneWireCrc, OneWireCrc16};

/// Error type for 1-Wire operations.
pub type OneWireResult<T, E> = Result<T, OneWireError<E>>;

/// Command to match a specific ROM address in 1-Wire communication (non-overdrive mode)
pub const ONEWIRE_MATCH_ROM_CMD: u8 = 0x55;

/// Command to skip ROM address in 1-Wire communication (non-overdrive mode)
pub const ONEWIRE_SKIP_ROM_CMD: u8 = 0xcc;

/// The Overdrive-Match ROM command followed by a 64-bit
/// ROM sequence transmitted at overdrive speed allows the
/// bus master to address a specific device on a multidrop
/// bus and to simultaneously set it in overdrive mode.
/// Only the device that exactly matches the 64-bit ROM
/// sequence responds to the subsequent function
/// command. Slaves already in overdrive mode from a previous
/// Overdrive-Skip ROM or successful Overdrive-Match
/// ROM command remain in overdrive mode. All overdrive-capable
/// slaves return to standard speed at the next reset
/// pulse of minimum 480μs duration.
pub const ONEWIRE_MATCH_ROM_CMD_OD: u8 = 0x69;

/// On a single-drop bus this command can save time by
/// allowing the bus master to access the function commands
/// without providing the 64-bit ROM code. Unlike the normal
/// Skip ROM command, the Overdrive-Skip ROM sets the
/// device in overdrive mode. All communication
/// following this command has to occur at overdrive
/// speed until a reset pulse of minimum 480μs duration
/// resets all devices on the bus to standard speed.
pub const ONEWIRE_SKIP_ROM_CMD_OD: u8 = 0x3c;
