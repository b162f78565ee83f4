use crate::scratchpad::EchoScratchpad;
use crate::slave::{Faults, Slave, Transaction, rom_with_family};
use embedded_onewire::OneWireCrc16;
use log::debug;
use sha1::{Digest, Sha1};

const FAMILY_CODE: u8 = 0x33;
const DATA_LEN: usize = 0x80;
const PAGE_LEN: usize = 32;
const SECRET: usize = 0x80;
const CONTROL_ROW: usize = 0x88;
const ROM_START: usize = 0x90;
const VISIBLE_END: usize = 0x98;
const ROW: usize = 8;
const MESSAGE_LEN: usize = 55;

const SECRET_PROTECT: usize = CONTROL_ROW;
const WRITE_PROTECT: usize = CONTROL_ROW + 1;
const EPROM_MODE: usize = CONTROL_ROW + 4;
const EPROM_PAGE: usize = 1;

fn active(byte: u8) -> bool {
    byte == 0xaa || byte == 0x55
}

fn control_byte(address: usize) -> u8 {
    0x40 | ((address << 3) & 0x08) as u8 | ((address >> 5) & 0x07) as u8
}

fn digest(message: &[u8; MESSAGE_LEN]) -> [u8; 20] {
    let mut mac = [0; 20];
    mac.copy_from_slice(&Sha1::digest(message));
    mac
}

/// Emulated DS1961S: 128 bytes of EEPROM written with MAC-authorized copies, an
/// 8-byte secret and a SHA-1 engine answering authenticated page reads.
#[derive(Debug, Clone)]
pub struct Ds1961s {
    rom: u64,
    data: [u8; DATA_LEN],
    secret: [u8; 8],
    control: [u8; ROW],
    scratchpad: EchoScratchpad,
    faults: Faults,
    tx: Option<Transaction>,
}

impl Ds1961s {
    /// Creates a device with serial number `serial`, blank memory and an all-zero secret.
    pub fn new(serial: [u8; 6]) -> Self {
        Self {
            rom: rom_with_family(FAMILY_CODE, serial),
            data: [0; DATA_LEN],
            secret: [0; 8],
            control: [0; ROW],
            scratchpad: EchoScratchpad::default(),
            faults: Faults::default(),
            tx: None,
        }
    }

    /// Data memory contents.
    pub fn data(&self) -> &[u8; DATA_LEN] {
        &self.data
    }

    /// The device secret.
    pub fn secret(&self) -> [u8; 8] {
        self.secret
    }

    /// Control row contents, starting at `0x88`.
    pub fn control(&self) -> &[u8; ROW] {
        &self.control
    }

    /// Byte at `address` as seen by Read Memory. The secret reads as `0xFF`.
    fn visible(&self, address: usize) -> u8 {
        match address {
            0..DATA_LEN => self.data[address],
            CONTROL_ROW..ROM_START => self.control[address - CONTROL_ROW],
            ROM_START..VISIBLE_END => self.rom.to_le_bytes()[address - ROM_START],
            _ => 0xff,
        }
    }

    fn page(&self, address: usize) -> [u8; PAGE_LEN] {
        let start = address & !(PAGE_LEN - 1);
        core::array::from_fn(|i| self.visible(start + i))
    }

    fn serial(&self) -> [u8; 7] {
        let mut serial = [0; 7];
        serial.copy_from_slice(&self.rom.to_le_bytes()[..7]);
        serial
    }

    fn message(&self) -> [u8; MESSAGE_LEN] {
        let mut message = [0xff; MESSAGE_LEN];
        message[..4].copy_from_slice(&self.secret[..4]);
        message[48..52].copy_from_slice(&self.secret[4..]);
        message
    }

    fn copy_mac(&self) -> [u8; 20] {
        let ta = self.scratchpad.ta as usize;
        let mut message = self.message();
        message[4..32].copy_from_slice(&self.page(ta)[..28]);
        message[32..40].copy_from_slice(&self.scratchpad.data);
        message[40] = control_byte(ta);
        message[41..48].copy_from_slice(&self.serial());
        digest(&message)
    }

    fn authentication_mac(&self, address: usize, page: &[u8; PAGE_LEN]) -> [u8; 20] {
        let mut message = self.message();
        message[4..36].copy_from_slice(page);
        message[40] = control_byte(address);
        message[41..48].copy_from_slice(&self.serial());
        message[52..].copy_from_slice(&self.scratchpad.data[..3]);
        digest(&message)
    }

    fn next_secret(&self, address: usize) -> [u8; 8] {
        let mut message = self.message();
        message[4..36].copy_from_slice(&self.page(address));
        message[40..48].copy_from_slice(&self.scratchpad.data);
        let mut secret = [0; 8];
        secret.copy_from_slice(&digest(&message)[..8]);
        secret
    }

    fn copy(&mut self) -> bool {
        let row = self.scratchpad.row();
        let data = self.scratchpad.data;
        if row < DATA_LEN {
            if active(self.control[WRITE_PROTECT - CONTROL_ROW]) {
                return false;
            }
            let cells = &mut self.data[row..row + ROW];
            if row / PAGE_LEN == EPROM_PAGE && active(self.control[EPROM_MODE - CONTROL_ROW]) {
                for (cell, byte) in cells.iter_mut().zip(data) {
                    *cell &= byte;
                }
            } else {
                cells.copy_from_slice(&data);
            }
            true
        } else if row == CONTROL_ROW {
            for (cell, byte) in self.control.iter_mut().zip(data) {
                if !active(*cell) {
                    *cell = byte;
                }
            }
            true
        } else {
            false
        }
    }

    fn secret_protected(&self) -> bool {
        active(self.control[SECRET_PROTECT - CONTROL_ROW])
    }

    fn handle(&mut self, tx: &mut Transaction, powered: bool) {
        match (tx.command, tx.args.len()) {
            (0x0f, _) => self.scratchpad.write(tx),
            (0xaa, 0) => self.scratchpad.read(tx, &self.faults),
            // load first secret
            (0x5a, 3) => {
                if powered
                    && self.scratchpad.authorizes(&tx.args)
                    && self.scratchpad.ta as usize == SECRET
                    && !self.secret_protected()
                {
                    debug!("DS1961S loaded first secret");
                    self.secret = self.scratchpad.data;
                    self.scratchpad.accept();
                    tx.respond(&[0xaa]);
                }
            }
            // compute next secret
            (0x33, 2) => {
                let address = tx.target_address() as usize;
                if powered && address < DATA_LEN && !self.secret_protected() {
                    debug!("DS1961S computed next secret from page {:#04x}", address);
                    self.secret = self.next_secret(address);
                    tx.respond(&[0xaa]);
                }
            }
            // copy scratchpad, authorized by a MAC
            (0x55, 23) => {
                let expected = self.copy_mac();
                if powered
                    && self.scratchpad.authorizes(&tx.args)
                    && tx.args[3..] == expected
                    && self.copy()
                {
                    debug!("DS1961S copied row {:#04x}", self.scratchpad.row());
                    self.scratchpad.accept();
                    tx.respond(&[0xaa]);
                }
            }
            // read authenticated page
            (0xa5, 2) => self.authenticated_read(tx),
            (0xf0, 2) => {
                if !self.faults.take_stale_read() {
                    let start = tx.target_address() as usize;
                    let bytes: Vec<u8> = (start..VISIBLE_END).map(|a| self.visible(a)).collect();
                    tx.respond(&bytes);
                }
            }
            _ => {}
        }
    }

    fn authenticated_read(&self, tx: &mut Transaction) {
        let address = tx.target_address() as usize;
        if address >= DATA_LEN {
            return;
        }
        let page = self.page(address);
        let mut response = tx.frame();
        response.extend(&page[address % PAGE_LEN..]);
        response.push(0xff);
        let mut first = response[3..].to_vec();
        first.extend(OneWireCrc16::to_wire(OneWireCrc16::checksum(0, &response)));
        if self.faults.corrupt_authenticated_read {
            first[0] ^= 0x01;
        }
        tx.respond(&first);
        let mac = self.authentication_mac(address & !(PAGE_LEN - 1), &page);
        let mut sent = mac;
        if self.faults.corrupt_mac {
            sent[0] ^= 0x01;
        }
        tx.respond(&sent);
        tx.respond_crc16(&mac);
        tx.respond(&[0xaa]);
    }
}

impl Slave for Ds1961s {
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

    fn send(device: &mut Ds1961s, bytes: &[u8], powered_last: bool) {
        device.reset();
        for (i, &byte) in bytes.iter().enumerate() {
            device.write(byte, powered_last && i == bytes.len() - 1);
        }
    }

    fn stage(device: &mut Ds1961s, address: u16, data: [u8; 8]) {
        let mut frame = vec![0x0f];
        frame.extend(address.to_le_bytes());
        frame.extend(data);
        send(device, &frame, false);
    }

    #[test]
    fn pinned_authentication_mac() {
        let mut device = Ds1961s::new([1, 2, 3, 4, 5, 6]);
        stage(&mut device, 0x00, [0xff; 8]);
        send(&mut device, &[0xa5, 0x00, 0x00], false);
        let first: Vec<u8> = (0..35).map(|_| device.read()).collect();
        let mut frame = vec![0xa5, 0x00, 0x00];
        frame.extend(&first);
        assert!(OneWireCrc16::validate(0, &frame));
        let second: Vec<u8> = (0..23).map(|_| device.read()).collect();
        assert_eq!(
            &second[..20],
            &[
                0xe0, 0x50, 0xbb, 0xe5, 0xa8, 0x82, 0xfc, 0x9e, 0x00, 0x60, 0x8d, 0xcf, 0x83,
                0x1a, 0xe3, 0xda, 0x44, 0x23, 0x41, 0x80
            ]
        );
        assert!(OneWireCrc16::validate(0, &second[..22]));
        assert_eq!(second[22], 0xaa);
    }

    #[test]
    fn first_secret_and_read_masking() {
        let mut device = Ds1961s::new([1; 6]);
        stage(&mut device, 0x80, [9; 8]);
        send(&mut device, &[0x5a, 0x80, 0x00, 0x07], true);
        assert_eq!(device.read(), 0xaa);
        assert_eq!(device.secret(), [9; 8]);

        send(&mut device, &[0xf0, 0x80, 0x00], false);
        let visible: Vec<u8> = (0..24).map(|_| device.read()).collect();
        assert_eq!(&visible[..8], &[0xff; 8]);
        assert_eq!(&visible[16..], &device.rom().to_le_bytes());

        // secret write protection
        device.control[0] = 0xaa;
        stage(&mut device, 0x80, [1; 8]);
        send(&mut device, &[0x5a, 0x80, 0x00, 0x07], true);
        assert_eq!(device.read(), 0xff);
        assert_eq!(device.secret(), [9; 8]);
    }

    #[test]
    fn copy_checks_the_mac() {
        let mut device = Ds1961s::new([1; 6]);
        stage(&mut device, 0x20, [7; 8]);
        let mac = device.copy_mac();
        let mut frame = vec![0x55, 0x20, 0x00, 0x07];
        frame.extend(&mac);
        frame[5] ^= 0x01;
        send(&mut device, &frame, true);
        assert_eq!(device.read(), 0xff);
        assert_eq!(&device.data()[0x20..0x28], &[0; 8]);

        frame[5] ^= 0x01;
        send(&mut device, &frame, true);
        assert_eq!(device.read(), 0xaa);
        assert_eq!(&device.data()[0x20..0x28], &[7; 8]);
    }
}
