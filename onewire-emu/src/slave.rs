use embedded_onewire::{OneWireCrc, OneWireCrc16};
use std::collections::VecDeque;

/// A device on the emulated bus.
///
/// The bus handles reset and ROM addressing. Once the device is selected, every
/// byte written by the master is handed to [`Slave::write`] and every byte read
/// comes from [`Slave::read`].
pub trait Slave {
    /// 64-bit ROM code.
    fn rom(&self) -> u64;

    /// A reset pulse ended the current command.
    fn reset(&mut self);

    /// The master wrote `byte`. `powered` is set if a strong pull-up followed the byte.
    fn write(&mut self, byte: u8, powered: bool);

    /// The master reads a byte. Idle devices leave the line high.
    fn read(&mut self) -> u8;

    /// Faults injected into the device.
    fn faults(&self) -> &Faults;

    /// Faults injected into the device, mutably.
    fn faults_mut(&mut self) -> &mut Faults;
}

/// Misbehaviour injected into an emulated device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// The device does not answer reset pulses.
    pub absent: bool,
    /// Read Scratchpad returns the first data byte inverted, with a matching CRC.
    pub corrupt_scratchpad: bool,
    /// Read Scratchpad returns a wrong target address, with a matching CRC.
    pub corrupt_echo: bool,
    /// Number of upcoming read memory commands answered with `0xFF` only.
    pub stale_reads: usize,
    /// Read Authenticated Page returns a damaged data byte.
    pub corrupt_authenticated_read: bool,
    /// Read Authenticated Page returns a damaged MAC byte.
    pub corrupt_mac: bool,
}

impl Faults {
    /// Consumes one stale read, returning whether the current read is stale.
    pub(crate) fn take_stale_read(&mut self) -> bool {
        if self.stale_reads > 0 {
            self.stale_reads -= 1;
            true
        } else {
            false
        }
    }
}

/// One function command in progress.
#[derive(Debug, Clone, Default)]
pub(crate) struct Transaction {
    pub(crate) command: u8,
    pub(crate) args: Vec<u8>,
    out: VecDeque<u8>,
}

impl Transaction {
    /// Adds `byte` to the command in `slot`, starting a new command if there is none.
    pub(crate) fn feed(slot: &mut Option<Transaction>, byte: u8) -> Transaction {
        match slot.take() {
            Some(mut tx) => {
                tx.args.push(byte);
                tx
            }
            None => Transaction {
                command: byte,
                ..Default::default()
            },
        }
    }

    /// Next byte of the response to the command in `slot`.
    pub(crate) fn next(slot: &mut Option<Transaction>) -> u8 {
        slot.as_mut()
            .and_then(|tx| tx.out.pop_front())
            .unwrap_or(0xff)
    }

    /// Queues `bytes` as response.
    pub(crate) fn respond(&mut self, bytes: &[u8]) {
        self.out.extend(bytes);
    }

    /// Queues the inverted CRC-16 of `bytes`.
    pub(crate) fn respond_crc16(&mut self, bytes: &[u8]) {
        self.respond(&OneWireCrc16::to_wire(OneWireCrc16::checksum(0, bytes)));
    }

    /// Command byte followed by the arguments received so far.
    pub(crate) fn frame(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.args.len() + 1);
        frame.push(self.command);
        frame.extend(&self.args);
        frame
    }

    /// Two-byte target address in the first arguments.
    pub(crate) fn target_address(&self) -> u16 {
        u16::from_le_bytes([self.args[0], self.args[1]])
    }
}

/// Builds the ROM code of a device of family `family` with serial number `serial`.
pub fn rom_with_family(family: u8, serial: [u8; 6]) -> u64 {
    let mut rom = [0; 8];
    rom[0] = family;
    rom[1..7].copy_from_slice(&serial);
    let mut crc = OneWireCrc::default();
    for &byte in &rom[..7] {
        crc.update(byte);
    }
    rom[7] = crc.value();
    u64::from_le_bytes(rom)
}
