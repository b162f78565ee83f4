//! Universal Data Packet codec.
//!
//! A packet occupies the start of one memory page:
//! `[len][payload; len][!crc_lo][!crc_hi]`. The CRC-16 is seeded with the page
//! number, so a packet copied to, or read back from, the wrong page fails its
//! check even when every byte arrived intact.
use embedded_onewire::OneWireCrc16;
use heapless::Vec;

/// Largest page length of any supported memory bank.
pub const MAX_PAGE_LENGTH: usize = 32;

/// Bytes a packet adds around its payload.
pub const PACKET_OVERHEAD: usize = 3;

/// An encoded packet.
pub type PacketBuf = Vec<u8, MAX_PAGE_LENGTH>;

/// Packet codec errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// The payload does not fit the page, or the raw page is shorter than the
    /// length byte claims.
    InvalidLength,
    /// The CRC-16 residue check failed.
    InvalidCrc,
}

/// Longest payload a page of `page_length` bytes can carry.
pub const fn max_packet_length(page_length: usize) -> usize {
    page_length.saturating_sub(PACKET_OVERHEAD)
}

/// Encode `payload` as a packet for `page`.
///
/// # Errors
/// [`PacketError::InvalidLength`] if the payload exceeds [`max_packet_length`].
pub fn encode(page: u16, payload: &[u8], page_length: usize) -> Result<PacketBuf, PacketError> {
    if page_length > MAX_PAGE_LENGTH || payload.len() > max_packet_length(page_length) {
        return Err(PacketError::InvalidLength);
    }
    let mut packet = PacketBuf::new();
    packet
        .push(payload.len() as u8)
        .map_err(|_| PacketError::InvalidLength)?;
    packet
        .extend_from_slice(payload)
        .map_err(|_| PacketError::InvalidLength)?;
    let crc = OneWireCrc16::checksum(page, &packet);
    packet
        .extend_from_slice(&OneWireCrc16::to_wire(crc))
        .map_err(|_| PacketError::InvalidLength)?;
    Ok(packet)
}

/// Decode the packet stored in the raw contents of `page`.
///
/// The length byte is checked before the CRC is computed.
///
/// # Returns
/// The payload, borrowed from `raw`.
pub fn decode(page: u16, raw: &[u8], page_length: usize) -> Result<&[u8], PacketError> {
    let len = *raw.first().ok_or(PacketError::InvalidLength)? as usize;
    if len > max_packet_length(page_length) || raw.len() < len + PACKET_OVERHEAD {
        return Err(PacketError::InvalidLength);
    }
    if !OneWireCrc16::validate(page, &raw[..len + PACKET_OVERHEAD]) {
        return Err(PacketError::InvalidCrc);
    }
    Ok(&raw[1..len + 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore};

    #[test]
    fn hello_on_page_three() {
        let packet = encode(3, b"hello", 32).unwrap();
        assert_eq!(&packet[..], &[0x05, b'h', b'e', b'l', b'l', b'o', 0x2d, 0xad]);
        assert_eq!(decode(3, &packet, 32), Ok(&b"hello"[..]));
    }

    #[test]
    fn packet_is_bound_to_its_page() {
        let packet = encode(3, b"hello", 32).unwrap();
        assert_eq!(decode(4, &packet, 32), Err(PacketError::InvalidCrc));
    }

    #[test]
    fn full_page_payload() {
        let payload: [u8; 29] = core::array::from_fn(|i| i as u8);
        let packet = encode(0, &payload, 32).unwrap();
        assert_eq!(packet.len(), 32);
        assert_eq!(packet[0], 29);
        assert_eq!(&packet[30..], &[0x2c, 0xaa]);
        assert_eq!(decode(0, &packet, 32), Ok(&payload[..]));
    }

    #[test]
    fn round_trip() {
        let mut rng = rand::rng();
        for _ in 0..64 {
            let page = rng.random_range(0..16u16);
            let len = rng.random_range(0..=max_packet_length(32));
            let mut payload = [0u8; 29];
            rng.fill_bytes(&mut payload[..len]);
            let packet = encode(page, &payload[..len], 32).unwrap();
            // trailing page bytes are ignored
            let mut raw = [0xffu8; 32];
            raw[..packet.len()].copy_from_slice(&packet);
            assert_eq!(decode(page, &raw, 32), Ok(&payload[..len]));
        }
    }

    #[test]
    fn single_bit_flips_are_detected() {
        let packet = encode(7, b"1-Wire", 32).unwrap();
        for byte in 1..packet.len() {
            for bit in 0..8 {
                let mut raw = packet.clone();
                raw[byte] ^= 1 << bit;
                assert_eq!(decode(7, &raw, 32), Err(PacketError::InvalidCrc));
            }
        }
    }

    #[test]
    fn length_is_checked_first() {
        assert_eq!(encode(0, &[0; 30], 32), Err(PacketError::InvalidLength));
        assert_eq!(encode(0, &[0; 6], 8), Err(PacketError::InvalidLength));
        // length byte beyond the page, CRC never consulted
        assert_eq!(decode(0, &[30; 32], 32), Err(PacketError::InvalidLength));
        // raw buffer shorter than the declared packet
        assert_eq!(decode(0, &[5, 1, 2], 32), Err(PacketError::InvalidLength));
        assert_eq!(decode(0, &[], 32), Err(PacketError::InvalidLength));
        assert_eq!(max_packet_length(8), 5);
    }
}
