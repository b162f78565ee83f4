//! Scratchpad write, verify and copy.
//!
//! Memory is written one scratchpad row at a time. Each row is staged in the
//! scratchpad, read back and compared, and only then copied to memory, so a
//! garbled transfer never reaches the EEPROM.
use crate::descriptor::{AddressEcho, CopyAuthorization, MemoryBankDescriptor, ScratchpadSpec};
use crate::session::DeviceSession;
use crate::sha;
use crate::{MemoryError, MemoryResult};
use bitfield_struct::bitfield;
use embedded_hal::delay::DelayNs;
use embedded_onewire::{OneWire, OneWireCrc16};
use heapless::Vec;
use log::{debug, trace};

/// Largest scratchpad of any supported device.
pub const MAX_SCRATCHPAD: usize = 32;

const COPY_SUCCESS: u8 = 0xaa;

/// Ending offset and status byte (E/S) reported by an address-echoing scratchpad.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct EndingOffset {
    /// Offset of the last byte written within the row.
    #[bits(3)]
    pub ending: u8,
    #[bits(2)]
    reserved: u8,
    /// The last byte was only partially written.
    pub partial: bool,
    #[bits(1)]
    reserved_hi: u8,
    /// The last copy or secret command was accepted.
    pub authorization_accepted: bool,
}

/// One row of data on its way through the scratchpad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchpadSession {
    /// Device address the row is written to.
    pub target_address: u16,
    /// Data staged in the scratchpad.
    pub buffer: Vec<u8, MAX_SCRATCHPAD>,
    /// `TA1`, `TA2` and `E/S` as echoed by the device.
    pub extra_info: [u8; 3],
    /// The row reached memory.
    pub committed: bool,
}

impl ScratchpadSession {
    /// Writes `data` to the scratchpad at `address` and checks what the device holds.
    ///
    /// `data` must be one full row starting at a row boundary.
    ///
    /// # Errors
    /// * [`MemoryError::InvalidCrc16`] if a CRC-16 returned by the device does not check.
    /// * [`MemoryError::ScratchpadVerifyFailed`] if the scratchpad data differs from `data`.
    /// * [`MemoryError::AddressMismatch`] if the echoed target address or ending offset
    ///   is not the one written.
    pub fn stage<O: OneWire, D: DelayNs>(
        session: &mut DeviceSession<O, D>,
        descriptor: &MemoryBankDescriptor,
        spec: &ScratchpadSpec,
        address: u16,
        data: &[u8],
    ) -> MemoryResult<Self, O::BusError> {
        let buffer = Vec::from_slice(data).map_err(|_| MemoryError::OutOfRange)?;
        let mut pad = Self {
            target_address: address,
            buffer,
            extra_info: [0; 3],
            committed: false,
        };
        pad.write(session, descriptor, spec)?;
        let mut readback = [0xff; MAX_SCRATCHPAD];
        let readback = &mut readback[..data.len()];
        pad.read(session, descriptor, spec, readback)?;
        trace!("Scratchpad {:02x?} {:02x?}", pad.extra_info, readback);
        if readback != data {
            return Err(MemoryError::ScratchpadVerifyFailed);
        }
        if spec.echo == AddressEcho::TargetAddress {
            let target = u16::from_le_bytes([pad.extra_info[0], pad.extra_info[1]]);
            let status = EndingOffset::from(pad.extra_info[2]);
            let ending = ((address as usize + data.len() - 1) & 0x07) as u8;
            if target != address || status.partial() || status.ending() != ending {
                return Err(MemoryError::AddressMismatch);
            }
        }
        Ok(pad)
    }

    fn write<O: OneWire, D: DelayNs>(
        &self,
        session: &mut DeviceSession<O, D>,
        descriptor: &MemoryBankDescriptor,
        spec: &ScratchpadSpec,
    ) -> MemoryResult<(), O::BusError> {
        session.select()?;
        session.send_command(
            spec.write_command,
            self.target_address,
            descriptor.address_width,
        )?;
        session.bus.write_bytes(&self.buffer)?;
        if spec.echo == AddressEcho::TargetAddress {
            // the device answers a full row with the CRC of the whole command
            let mut crc = OneWireCrc16::new(0);
            crc.update(&[spec.write_command]);
            crc.update(&self.target_address.to_le_bytes());
            crc.update(&self.buffer);
            let mut inverted = [0xff; 2];
            session.bus.transfer(&mut inverted)?;
            crc.update(&inverted);
            if !crc.is_valid() {
                return Err(MemoryError::InvalidCrc16);
            }
        }
        Ok(())
    }

    fn read<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        descriptor: &MemoryBankDescriptor,
        spec: &ScratchpadSpec,
        data: &mut [u8],
    ) -> MemoryResult<(), O::BusError> {
        session.select()?;
        match spec.echo {
            AddressEcho::None => {
                session.send_command(
                    spec.read_command,
                    self.target_address,
                    descriptor.address_width,
                )?;
                session.bus.transfer(data)?;
            }
            AddressEcho::TargetAddress => {
                session.bus.write_byte(spec.read_command)?;
                let mut header = [0xff; 3];
                let mut inverted = [0xff; 2];
                session.bus.transfer(&mut header)?;
                session.bus.transfer(data)?;
                session.bus.transfer(&mut inverted)?;
                let mut crc = OneWireCrc16::new(0);
                crc.update(&[spec.read_command]);
                crc.update(&header);
                crc.update(data);
                crc.update(&inverted);
                if !crc.is_valid() {
                    return Err(MemoryError::InvalidCrc16);
                }
                self.extra_info = header;
            }
        }
        Ok(())
    }

    /// Copies the staged row to memory.
    ///
    /// The last authorization byte starts the programming cycle under a strong
    /// pull-up that is held for [`Timing::program_ms`](crate::Timing::program_ms).
    ///
    /// # Errors
    /// * [`MemoryError::SecretUnknown`] if the copy needs a MAC and the session has no secret.
    /// * [`MemoryError::CopyFailed`] if the device does not confirm the copy.
    pub fn commit<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        descriptor: &MemoryBankDescriptor,
        spec: &ScratchpadSpec,
    ) -> MemoryResult<(), O::BusError> {
        let mac = match spec.copy {
            CopyAuthorization::Mac => Some(self.copy_mac(session, descriptor)?),
            _ => None,
        };
        let program_ms = session.timing.program_ms;
        session.select()?;
        session.bus.write_byte(spec.copy_command)?;
        match (spec.copy, mac) {
            (CopyAuthorization::ValidationKey(key), _) => session.program(key, program_ms)?,
            (CopyAuthorization::Mac, Some(mac)) => {
                session.bus.write_bytes(&self.extra_info)?;
                session.power_window(session.timing.sha_compute_ms)?;
                session.bus.write_bytes(&mac[..19])?;
                session.program(mac[19], program_ms)?;
            }
            _ => {
                session.bus.write_bytes(&self.extra_info[..2])?;
                session.program(self.extra_info[2], program_ms)?;
            }
        }
        if spec.copy_completion && session.bus.read_byte()? != COPY_SUCCESS {
            return Err(MemoryError::CopyFailed);
        }
        debug!("Committed row {:#06x}", self.target_address);
        self.committed = true;
        Ok(())
    }

    fn copy_mac<O: OneWire, D: DelayNs>(
        &self,
        session: &mut DeviceSession<O, D>,
        descriptor: &MemoryBankDescriptor,
    ) -> MemoryResult<sha::Mac, O::BusError> {
        let secret = session.secret().ok_or(MemoryError::SecretUnknown)?;
        let mut row = [0; 8];
        row.copy_from_slice(self.buffer.get(..8).ok_or(MemoryError::OutOfRange)?);
        let mut page = [0; 32];
        session.read_memory(
            descriptor.read_command,
            self.target_address & !0x1f,
            descriptor.address_width,
            &mut page,
            false,
            false,
        )?;
        let block = sha::copy_block(
            &secret,
            &page,
            &row,
            self.target_address,
            &session.serial(),
        );
        Ok(sha::compute_mac(&block))
    }
}

/// Writes `data` at device address `address` one scratchpad row at a time.
///
/// Rows only partly covered by `data` are read first so the bytes around the
/// write survive. The operation stops at the first failing row.
pub(crate) fn write<O: OneWire, D: DelayNs>(
    session: &mut DeviceSession<O, D>,
    descriptor: &MemoryBankDescriptor,
    spec: &ScratchpadSpec,
    address: u16,
    data: &[u8],
) -> MemoryResult<(), O::BusError> {
    let row = spec.size.min(MAX_SCRATCHPAD);
    let mut address = address as usize;
    let mut remaining = data;
    while !remaining.is_empty() {
        let row_start = address - address % row;
        let offset = address - row_start;
        let take = (row - offset).min(remaining.len());
        let mut block = [0; MAX_SCRATCHPAD];
        let block = &mut block[..row];
        if offset != 0 || take != row {
            session.read_memory(
                descriptor.read_command,
                row_start as u16,
                descriptor.address_width,
                block,
                false,
                descriptor.retry_stale_reads,
            )?;
        }
        block[offset..offset + take].copy_from_slice(&remaining[..take]);
        let mut pad = ScratchpadSession::stage(session, descriptor, spec, row_start as u16, block)?;
        pad.commit(session, descriptor, spec)?;
        address += take;
        remaining = &remaining[take..];
    }
    Ok(())
}
