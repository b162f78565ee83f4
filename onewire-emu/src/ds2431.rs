use crate::scratchpad::EchoScratchpad;
use crate::slave::{Faults, Slave, Transaction, rom_with_family};
use log::debug;

const FAMILY_CODE: u8 = 0x2d;
const MEMORY_LEN: usize = 0x88;
const DATA_LEN: usize = 0x80;
const PAGE_LEN: usize = 32;
const CONTROL_ROW: usize = 0x80;
const COPY_PROTECTION: usize = 0x84;
const FACTORY_BYTE: usize = 0x85;
const PROTECT: u8 = 0x55;
const EPROM: u8 = 0xaa;
const ROW: usize = 8;

fn active(byte: u8) -> bool {
    byte == PROTECT || byte == EPROM
}

/// Emulated DS2431: four 32-byte EEPROM pages with per-page protection bytes.
#[derive(Debug, Clone)]
pub struct Ds2431 {
    rom: u64,
    memory: [u8; MEMORY_LEN],
    scratchpad: EchoScratchpad,
    faults: Faults,
    tx: Option<Transaction>,
}

impl Ds2431 {
    /// Creates a blank device with serial number `serial`.
    pub fn new(serial: [u8; 6]) -> Self {
        let mut memory = [0; MEMORY_LEN];
        memory[FACTORY_BYTE] = 0x55;
        Self {
            rom: rom_with_family(FAMILY_CODE, serial),
            memory,
            scratchpad: EchoScratchpad::default(),
            faults: Faults::default(),
            tx: None,
        }
    }

    /// Memory contents, including the control row at `0x80`.
    pub fn memory(&self) -> &[u8; MEMORY_LEN] {
        &self.memory
    }

    /// Overwrites memory at `address`, bypassing protection.
    pub fn load(&mut self, address: usize, data: &[u8]) {
        self.memory[address..address + data.len()].copy_from_slice(data);
    }

    fn copy(&mut self) -> bool {
        let row = self.scratchpad.row();
        let data = self.scratchpad.data;
        if row < DATA_LEN {
            match self.memory[CONTROL_ROW + row / PAGE_LEN] {
                PROTECT => return false,
                EPROM => {
                    for (cell, byte) in self.memory[row..row + ROW].iter_mut().zip(data) {
                        *cell &= byte;
                    }
                }
                _ => self.memory[row..row + ROW].copy_from_slice(&data),
            }
        } else if row == CONTROL_ROW {
            if active(self.memory[COPY_PROTECTION]) {
                return false;
            }
            for (offset, byte) in data.into_iter().enumerate() {
                let address = CONTROL_ROW + offset;
                // programmed protection bytes and the factory byte stay
                let fixed = (address <= COPY_PROTECTION && active(self.memory[address]))
                    || address == FACTORY_BYTE;
                if !fixed {
                    self.memory[address] = byte;
                }
            }
        } else {
            return false;
        }
        true
    }

    fn handle(&mut self, tx: &mut Transaction, powered: bool) {
        match (tx.command, tx.args.len()) {
            (0x0f, _) => self.scratchpad.write(tx),
            (0xaa, 0) => self.scratchpad.read(tx, &self.faults),
            (0x55, 3) => {
                if powered && self.scratchpad.authorizes(&tx.args) && self.copy() {
                    debug!("DS2431 copied row {:#04x}", self.scratchpad.row());
                    self.scratchpad.accept();
                    tx.respond(&[0xaa]);
                }
            }
            (0xf0, 2) => {
                if !self.faults.take_stale_read() {
                    let start = (tx.target_address() as usize).min(MEMORY_LEN);
                    tx.respond(&self.memory[start..]);
                }
            }
            _ => {}
        }
    }
}

impl Slave for Ds2431 {
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
