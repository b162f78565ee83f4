use crc::{CRC_8_MAXIM_DOW, CRC_16_ARC, Crc};

static CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);
static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

#[derive(Debug, Default)]
/// Calculate CRC-8 used in 1-Wire communications.
pub struct OneWireCrc(u8);

impl OneWireCrc {
    /// Get the current CRC value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Update the CRC with the incoming byte.
    pub fn update(&mut self, byte: u8) {
        // the register is kept unreflected; `digest_with_initial` reflects its argument
        let mut digest = CRC8.digest_with_initial(self.0.reverse_bits());
        digest.update(&[byte]);
        self.0 = digest.finalize();
    }

    /// Validate a sequence of bytes where the last byte is the 1-Wire CRC of
    /// the previous bytes.
    pub fn validate(sequence: &[u8]) -> bool {
        let mut crc = OneWireCrc(0);
        for &byte in sequence.iter() {
            crc.update(byte);
        }
        crc.0 == 0x0 // If the last byte is the CRC of the preceding ones, the result is 0
    }
}

/// Calculate the CRC-16 used by 1-Wire memory devices.
///
/// The register starts at a caller supplied seed. Devices seed it with zero for
/// command/response framing; the Universal Data Packet seeds it with the page number.
/// CRC-16 values travel on the bus inverted, least significant byte first, so running
/// the CRC over a block followed by its transmitted CRC always leaves
/// [`OneWireCrc16::RESIDUE`] in the register.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneWireCrc16(u16);

impl OneWireCrc16 {
    /// Register value left after a block and its inverted CRC have been processed.
    pub const RESIDUE: u16 = 0xb001;

    /// Create a CRC register starting at `seed`.
    pub fn new(seed: u16) -> Self {
        Self(seed)
    }

    /// Get the current CRC value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Update the CRC with a block of bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        let mut digest = CRC16.digest_with_initial(self.0.reverse_bits());
        digest.update(bytes);
        self.0 = digest.finalize();
    }

    /// Whether the processed bytes ended with their own inverted CRC.
    pub fn is_valid(&self) -> bool {
        self.0 == Self::RESIDUE
    }

    /// CRC of `bytes` starting from `seed`.
    pub fn checksum(seed: u16, bytes: &[u8]) -> u16 {
        let mut crc = Self::new(seed);
        crc.update(bytes);
        crc.0
    }

    /// The two bytes a device transmits for the CRC `crc`.
    pub fn to_wire(crc: u16) -> [u8; 2] {
        (!crc).to_le_bytes()
    }

    /// Validate a sequence of bytes ending with the inverted CRC-16 of the
    /// preceding bytes, computed from `seed`.
    pub fn validate(seed: u16, sequence: &[u8]) -> bool {
        let mut crc = Self::new(seed);
        crc.update(sequence);
        crc.is_valid()
    }
}
