#![no_std]
#![deny(missing_docs)]
//! # onewire-memory
//! A no-std memory-access engine for 1-Wire EEPROM devices.
//!
//! Devices are driven through a [DeviceSession], which owns (or borrows) a bus implementing
//! the [OneWire] trait from `embedded-onewire` and a timer implementing
//! [DelayNs](embedded_hal::delay::DelayNs). Each memory bank of the device is a [MemoryBank]
//! built from a constant [MemoryBankDescriptor]; descriptors of the supported parts live in
//! [family].
//!
//! The crate provides:
//! - The Universal Data Packet codec ([packet]): a length byte, the payload and a CRC-16
//!   seeded with the page number, so a packet only checks on the page it was written to.
//! - Verified scratchpad writes: each row is staged, read back and compared before it is
//!   copied to memory under a strong pull-up ([ScratchpadSession]).
//! - Page protection through control rows or copy-and-lock commands ([ControlRegisters]).
//! - SHA-1 secrets and authenticated page reads on secure parts ([sha], [AuthenticatedPage]).
//!
//! Any failure pointing at bus trouble makes the next operation re-check the bus speed
//! and device presence first, see [DeviceSession::force_verify].

mod bank;
mod descriptor;
mod error;
pub mod family;
pub mod packet;
mod registers;
mod scratchpad;
mod secure;
mod session;
pub mod sha;

pub use bank::MemoryBank;
pub use descriptor::{
    AddressEcho, AddressWidth, BankKind, Capabilities, ControlLayout, CopyAuthorization,
    LockScheme, MemoryBankDescriptor, ScratchpadSpec, SecureSpec, WriteMethod,
};
pub use embedded_onewire::{BusSpeed, OneWire, OneWireError, OneWireResult};
pub use error::{ErrorKind, MemoryError};
pub use packet::PacketError;
pub use registers::{CONTROL_PAGES, CONTROL_ROW_LEN, ControlRegisters, Protection};
pub use scratchpad::{EndingOffset, MAX_SCRATCHPAD, ScratchpadSession};
pub use secure::{AuthenticatedPage, PHRASE_LEN};
pub use session::{DeviceSession, Timing};

/// Results of memory operations.
pub type MemoryResult<T, E> = Result<T, MemoryError<E>>;
