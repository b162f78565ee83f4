//! Host side of the SHA-1 authentication scheme.
//!
//! Every message hashed by a secure device is 55 bytes long and fits a single
//! SHA-1 block once padded. The builders below return the padded 64-byte block;
//! [`compute_mac`] hashes its message part.
use sha1::{Digest, Sha1};

/// Bytes of message in a SHA-1 block.
pub const MESSAGE_LEN: usize = 55;

/// A 20-byte SHA-1 message authentication code.
pub type Mac = [u8; 20];

/// A padded SHA-1 message block.
pub type Block = [u8; 64];

/// The device returned a MAC the host could not reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacMismatch;

/// Control byte binding a MAC to the page address it was computed for.
pub const fn control_byte(address: u16) -> u8 {
    0x40 | ((address << 3) & 0x08) as u8 | ((address >> 5) & 0x07) as u8
}

fn padded(message: [u8; MESSAGE_LEN]) -> Block {
    let mut block = [0; 64];
    block[..MESSAGE_LEN].copy_from_slice(&message);
    block[MESSAGE_LEN] = 0x80;
    block[56..].copy_from_slice(&((MESSAGE_LEN as u64) * 8).to_be_bytes());
    block
}

/// Block hashed by the device to answer a Read Authenticated Page command.
///
/// # Arguments
/// * `secret` - The device secret.
/// * `page` - The 32 bytes of the page read.
/// * `address` - Address of the page read.
/// * `serial` - Family code and serial number of the device.
/// * `challenge` - The challenge staged in the scratchpad.
pub fn authentication_block(
    secret: &[u8; 8],
    page: &[u8; 32],
    address: u16,
    serial: &[u8; 7],
    challenge: &[u8; 8],
) -> Block {
    let mut message = [0xff; MESSAGE_LEN];
    message[..4].copy_from_slice(&secret[..4]);
    message[4..36].copy_from_slice(page);
    message[40] = control_byte(address);
    message[41..48].copy_from_slice(serial);
    message[48..52].copy_from_slice(&secret[4..]);
    message[52..].copy_from_slice(&challenge[..3]);
    padded(message)
}

/// Block whose MAC authorizes copying `scratchpad` to memory at `address`.
///
/// `page` holds the current contents of the page containing `address`.
pub fn copy_block(
    secret: &[u8; 8],
    page: &[u8; 32],
    scratchpad: &[u8; 8],
    address: u16,
    serial: &[u8; 7],
) -> Block {
    let mut message = [0xff; MESSAGE_LEN];
    message[..4].copy_from_slice(&secret[..4]);
    message[4..32].copy_from_slice(&page[..28]);
    message[32..40].copy_from_slice(scratchpad);
    message[40] = control_byte(address);
    message[41..48].copy_from_slice(serial);
    message[48..52].copy_from_slice(&secret[4..]);
    padded(message)
}

/// Block hashed by the Compute Next Secret command.
pub fn next_secret_block(secret: &[u8; 8], page: &[u8; 32], scratchpad: &[u8; 8]) -> Block {
    let mut message = [0xff; MESSAGE_LEN];
    message[..4].copy_from_slice(&secret[..4]);
    message[4..36].copy_from_slice(page);
    message[40..48].copy_from_slice(scratchpad);
    message[48..52].copy_from_slice(&secret[4..]);
    padded(message)
}

/// SHA-1 digest of a block, in big-endian byte order.
pub fn compute_mac(block: &Block) -> Mac {
    let digest = Sha1::digest(&block[..MESSAGE_LEN]);
    let mut mac = [0; 20];
    mac.copy_from_slice(&digest);
    mac
}

/// The secret that replaces the current one after Compute Next Secret.
pub fn next_secret(block: &Block) -> [u8; 8] {
    let mac = compute_mac(block);
    let mut secret = [0; 8];
    secret.copy_from_slice(&mac[..8]);
    secret
}

/// Check a MAC returned by a device against the one computed from `block`.
///
/// The comparison runs over every byte regardless of where the first difference is.
pub fn verify_mac(block: &Block, mac: &Mac) -> Result<(), MacMismatch> {
    let expected = compute_mac(block);
    let diff = expected
        .iter()
        .zip(mac.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if diff == 0 { Ok(()) } else { Err(MacMismatch) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const SERIAL: [u8; 7] = [0x33, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

    #[test]
    fn control_bytes() {
        assert_eq!(control_byte(0x00), 0x40);
        assert_eq!(control_byte(0x20), 0x41);
        assert_eq!(control_byte(0x40), 0x42);
        assert_eq!(control_byte(0x60), 0x43);
        assert_eq!(control_byte(0x88), 0x44);
    }

    #[test]
    fn padding() {
        let block = authentication_block(&[0; 8], &[0; 32], 0, &SERIAL, &[0xff; 8]);
        assert_eq!(block[55], 0x80);
        assert_eq!(&block[56..], &[0, 0, 0, 0, 0, 0, 0x01, 0xb8]);
    }

    #[test]
    fn pinned_mac() {
        let block = authentication_block(&[0; 8], &[0; 32], 0, &SERIAL, &[0xff; 8]);
        let mac = compute_mac(&block);
        assert_eq!(mac, hex!("e050bbe5a882fc9e00608dcf831ae3da44234180"));
        assert_eq!(compute_mac(&block), mac);
        assert_eq!(verify_mac(&block, &mac), Ok(()));
    }

    #[test]
    fn every_input_changes_the_mac() {
        let pinned = hex!("e050bbe5a882fc9e00608dcf831ae3da44234180");
        let mut secret = [0; 8];
        secret[5] = 1;
        let mut page = [0; 32];
        page[31] = 1;
        let mut serial = SERIAL;
        serial[6] = 7;
        let mut challenge = [0xff; 8];
        challenge[2] = 0xfe;
        for block in [
            authentication_block(&secret, &[0; 32], 0, &SERIAL, &[0xff; 8]),
            authentication_block(&[0; 8], &page, 0, &SERIAL, &[0xff; 8]),
            authentication_block(&[0; 8], &[0; 32], 0x20, &SERIAL, &[0xff; 8]),
            authentication_block(&[0; 8], &[0; 32], 0, &serial, &[0xff; 8]),
            authentication_block(&[0; 8], &[0; 32], 0, &SERIAL, &challenge),
        ] {
            assert_ne!(compute_mac(&block), pinned);
            assert_eq!(verify_mac(&block, &pinned), Err(MacMismatch));
        }
    }

    #[test]
    fn block_layouts() {
        let secret = [1, 2, 3, 4, 5, 6, 7, 8];
        let page: [u8; 32] = core::array::from_fn(|i| 0x80 + i as u8);
        let pad = [0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7];

        let copy = copy_block(&secret, &page, &pad, 0x28, &SERIAL);
        assert_eq!(&copy[..4], &secret[..4]);
        assert_eq!(&copy[4..32], &page[..28]);
        assert_eq!(&copy[32..40], &pad);
        assert_eq!(copy[40], 0x41);
        assert_eq!(&copy[41..48], &SERIAL);
        assert_eq!(&copy[48..52], &secret[4..]);
        assert_eq!(&copy[52..55], &[0xff; 3]);

        let next = next_secret_block(&secret, &page, &pad);
        assert_eq!(&next[4..36], &page);
        assert_eq!(&next[36..40], &[0xff; 4]);
        assert_eq!(&next[40..48], &pad);
        assert_eq!(&next[52..55], &[0xff; 3]);
        assert_eq!(next_secret(&next), compute_mac(&next)[..8]);
    }
}
