use crate::slave::{Faults, Slave, Transaction, rom_with_family};
use log::debug;

const FAMILY_CODE: u8 = 0x14;
const MEMORY_LEN: usize = 32;
const REGISTER_LEN: usize = 8;
const VALIDATION_KEY: u8 = 0xa5;
const STATUS_UNLOCKED: u8 = 0xff;
const STATUS_LOCKED: u8 = 0xfc;

/// Emulated DS2430A: 32 bytes of EEPROM behind a 32-byte scratchpad, and an
/// 8-byte application register that can be locked once.
#[derive(Debug, Clone)]
pub struct Ds2430a {
    rom: u64,
    memory: [u8; MEMORY_LEN],
    scratchpad: [u8; MEMORY_LEN],
    register: [u8; REGISTER_LEN],
    locked: bool,
    faults: Faults,
    tx: Option<Transaction>,
}

impl Ds2430a {
    /// Creates a blank device with serial number `serial`.
    pub fn new(serial: [u8; 6]) -> Self {
        Self {
            rom: rom_with_family(FAMILY_CODE, serial),
            memory: [0; MEMORY_LEN],
            scratchpad: [0; MEMORY_LEN],
            register: [0xff; REGISTER_LEN],
            locked: false,
            faults: Faults::default(),
            tx: None,
        }
    }

    /// EEPROM contents.
    pub fn memory(&self) -> &[u8; MEMORY_LEN] {
        &self.memory
    }

    /// Application register contents.
    pub fn application_register(&self) -> &[u8; REGISTER_LEN] {
        &self.register
    }

    /// Whether the application register is locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn handle(&mut self, tx: &mut Transaction, powered: bool) {
        let args = tx.args.len();
        match (tx.command, args) {
            // write scratchpad
            (0x0f, 2..) => {
                let address = tx.args[0] as usize + args - 2;
                self.scratchpad[address % MEMORY_LEN] = tx.args[args - 1];
            }
            // read scratchpad
            (0xaa, 1) => {
                let start = tx.args[0] as usize;
                let mut data: Vec<u8> = (0..MEMORY_LEN)
                    .map(|i| self.scratchpad[(start + i) % MEMORY_LEN])
                    .collect();
                if self.faults.corrupt_scratchpad {
                    data[0] ^= 0xff;
                }
                tx.respond(&data);
            }
            // copy scratchpad
            (0x55, 1) if tx.args[0] == VALIDATION_KEY && powered => {
                debug!("DS2430A copy scratchpad");
                self.memory = self.scratchpad;
            }
            // read memory
            (0xf0, 1) => {
                if !self.faults.take_stale_read() {
                    let start = (tx.args[0] as usize).min(MEMORY_LEN);
                    tx.respond(&self.memory[start..]);
                }
            }
            // write application register
            (0x99, 2..) if !self.locked => {
                let address = tx.args[0] as usize + args - 2;
                self.register[address % REGISTER_LEN] = tx.args[args - 1];
            }
            // read application register
            (0xc3, 1) => {
                let start = (tx.args[0] as usize).min(REGISTER_LEN);
                tx.respond(&self.register[start..]);
            }
            // read status register
            (0x66, 1) if tx.args[0] == 0x00 => {
                tx.respond(&[if self.locked {
                    STATUS_LOCKED
                } else {
                    STATUS_UNLOCKED
                }]);
            }
            // copy and lock application register
            (0x5a, 1) if tx.args[0] == VALIDATION_KEY && powered => {
                debug!("DS2430A application register locked");
                self.locked = true;
            }
            _ => {}
        }
    }
}

impl Slave for Ds2430a {
    fn rom(&self) -> u64 {
        self.rom
    }

    fn reset(&mut self) {
        self.tx = None;
    }

    fn write(&mut self, byte: u8, powered: bool) {
        let mut tx = Transaction::feed(&mut self.tx, byte);
        self.handle(&mut tx, powered);
        self.tx = Some(tx);
    }

    fn read(&mut self) -> u8 {
        Transaction::next(&mut self.tx)
    }

    fn faults(&self) -> &Faults {
        &self.faults
    }

    fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(device: &mut Ds2430a, bytes: &[u8], powered_last: bool) {
        device.reset();
        for (i, &byte) in bytes.iter().enumerate() {
            device.write(byte, powered_last && i == bytes.len() - 1);
        }
    }

    fn receive(device: &mut Ds2430a, len: usize) -> Vec<u8> {
        (0..len).map(|_| device.read()).collect()
    }

    #[test]
    fn scratchpad_copy_needs_key_and_power() {
        let mut device = Ds2430a::new([1; 6]);
        send(&mut device, &[0x0f, 0x1e, 1, 2, 3], false);
        send(&mut device, &[0xaa, 0x1e], false);
        assert_eq!(&receive(&mut device, 3), &[1, 2, 3]);

        send(&mut device, &[0x55, 0xa5], false);
        assert_eq!(device.memory()[0x1e], 0);
        send(&mut device, &[0x55, 0x5a], true);
        assert_eq!(device.memory()[0x1e], 0);
        send(&mut device, &[0x55, 0xa5], true);
        assert_eq!(&device.memory()[0x1e..], &[1, 2]);
        assert_eq!(device.memory()[0], 3);

        send(&mut device, &[0xf0, 0x1e], false);
        assert_eq!(&receive(&mut device, 3), &[1, 2, 0xff]);
    }

    #[test]
    fn application_register_locks() {
        let mut device = Ds2430a::new([1; 6]);
        send(&mut device, &[0x99, 0x00, 0xde, 0xad], false);
        send(&mut device, &[0x66, 0x00], false);
        assert_eq!(device.read(), STATUS_UNLOCKED);
        send(&mut device, &[0x5a, 0xa5], true);
        assert!(device.is_locked());
        send(&mut device, &[0x99, 0x00, 0x00], false);
        send(&mut device, &[0xc3, 0x00], false);
        assert_eq!(&receive(&mut device, 3), &[0xde, 0xad, 0xff]);
        send(&mut device, &[0x66, 0x00], false);
        assert_eq!(device.read(), STATUS_LOCKED);
    }

    #[test]
    fn stale_reads_run_out() {
        let mut device = Ds2430a::new([1; 6]);
        device.faults_mut().stale_reads = 1;
        send(&mut device, &[0xf0, 0x00], false);
        assert_eq!(device.read(), 0xff);
        send(&mut device, &[0xf0, 0x00], false);
        assert_eq!(device.read(), 0x00);
    }
}
