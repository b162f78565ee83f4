use crate::slave::{Faults, Transaction};

const ROW: usize = 8;
const PARTIAL: u8 = 0x20;
const AUTHORIZATION_ACCEPTED: u8 = 0x80;

/// Eight-byte scratchpad echoing its target address, as found on DS2431 and DS1961S.
#[derive(Debug, Clone, Default)]
pub(crate) struct EchoScratchpad {
    pub(crate) ta: u16,
    pub(crate) es: u8,
    pub(crate) data: [u8; ROW],
    next: usize,
}

impl EchoScratchpad {
    /// Handles the Write Scratchpad command after each byte.
    ///
    /// The device answers a completed row with the CRC of the whole command.
    pub(crate) fn write(&mut self, tx: &mut Transaction) {
        match tx.args.len() {
            0 | 1 => {}
            2 => {
                self.ta = tx.target_address();
                self.next = self.ta as usize % ROW;
                self.es = PARTIAL | self.next as u8;
            }
            _ if self.next < ROW => {
                self.data[self.next] = tx.args[tx.args.len() - 1];
                self.es = self.next as u8;
                self.next += 1;
                if self.next == ROW {
                    tx.respond_crc16(&tx.frame());
                }
            }
            _ => {}
        }
    }

    /// Answers Read Scratchpad: target address, E/S, data and CRC.
    pub(crate) fn read(&self, tx: &mut Transaction, faults: &Faults) {
        let [mut ta1, ta2] = self.ta.to_le_bytes();
        if faults.corrupt_echo {
            ta1 ^= 0x08;
        }
        let start = self.ta as usize % ROW;
        let end = (self.es as usize % ROW).max(start);
        let mut response = vec![ta1, ta2, self.es];
        response.extend(&self.data[start..=end]);
        if faults.corrupt_scratchpad {
            response[3] ^= 0xff;
        }
        tx.respond(&response);
        let mut frame = vec![tx.command];
        frame.extend(&response);
        tx.respond_crc16(&frame);
    }

    /// Whether `args` start with the target address and E/S of the scratchpad.
    pub(crate) fn authorizes(&self, args: &[u8]) -> bool {
        let [ta1, ta2] = self.ta.to_le_bytes();
        args.len() >= 3 && args[..3] == [ta1, ta2, self.es] && self.es & PARTIAL == 0
    }

    /// Address of the row the scratchpad targets.
    pub(crate) fn row(&self) -> usize {
        self.ta as usize & !(ROW - 1)
    }

    /// Marks a copy or secret command as accepted.
    pub(crate) fn accept(&mut self) {
        self.es |= AUTHORIZATION_ACCEPTED;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_onewire::OneWireCrc16;

    fn feed(pad: &mut EchoScratchpad, bytes: &[u8]) -> Transaction {
        let mut slot = None;
        for &byte in bytes {
            let mut tx = Transaction::feed(&mut slot, byte);
            if tx.command == 0x0f {
                pad.write(&mut tx);
            }
            slot = Some(tx);
        }
        slot.unwrap_or_default()
    }

    #[test]
    fn full_row_is_acknowledged() {
        let mut pad = EchoScratchpad::default();
        let mut frame = vec![0x0f, 0x28, 0x00];
        frame.extend(1..=8u8);
        let mut slot = Some(feed(&mut pad, &frame));
        let crc = [Transaction::next(&mut slot), Transaction::next(&mut slot)];
        frame.extend(crc);
        assert!(OneWireCrc16::validate(0, &frame));
        assert_eq!(pad.ta, 0x28);
        assert_eq!(pad.es, 0x07);
        assert_eq!(pad.row(), 0x28);
        assert!(pad.authorizes(&[0x28, 0x00, 0x07]));
        assert!(!pad.authorizes(&[0x20, 0x00, 0x07]));
    }

    #[test]
    fn short_write_is_partial() {
        let mut pad = EchoScratchpad::default();
        feed(&mut pad, &[0x0f, 0x10, 0x00]);
        assert_eq!(pad.es, PARTIAL);
        assert!(!pad.authorizes(&[0x10, 0x00, PARTIAL]));
        feed(&mut pad, &[0x0f, 0x12, 0x00, 0xaa, 0xbb]);
        assert_eq!(pad.es, 0x03);
        assert_eq!(&pad.data[2..4], &[0xaa, 0xbb]);
    }

    #[test]
    fn read_applies_faults() {
        let mut pad = EchoScratchpad::default();
        let mut frame = vec![0x0f, 0x08, 0x00];
        frame.extend([0x11; 8]);
        feed(&mut pad, &frame);
        let faults = Faults {
            corrupt_echo: true,
            corrupt_scratchpad: true,
            ..Default::default()
        };
        let mut tx = Transaction::feed(&mut None, 0xaa);
        pad.read(&mut tx, &faults);
        let mut slot = Some(tx);
        let mut response = vec![0xaa];
        response.extend((0..13).map(|_| Transaction::next(&mut slot)));
        assert_eq!(&response[1..4], &[0x00, 0x00, 0x07]);
        assert_eq!(response[4], 0xee);
        assert!(OneWireCrc16::validate(0, &response));
    }
}
