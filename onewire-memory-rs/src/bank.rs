use crate::descriptor::{
    BankKind, ControlLayout, CopyAuthorization, LockScheme, MemoryBankDescriptor, ScratchpadSpec,
    WriteMethod,
};
use crate::packet::{self, MAX_PAGE_LENGTH};
use crate::registers::{CONTROL_ROW_LEN, ControlRegisters, Protection};
use crate::scratchpad;
use crate::session::DeviceSession;
use crate::{MemoryError, MemoryResult};
use embedded_hal::delay::DelayNs;
use embedded_onewire::OneWire;
use log::debug;

/// Page attributes read from the device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PageAttributes {
    pub(crate) locked: u32,
    pub(crate) write_once: u32,
    pub(crate) secret_protected: bool,
}

/// A memory bank of a device.
///
/// All operations go through the [`DeviceSession`] of the device the bank belongs
/// to. Addresses and pages are relative to the start of the bank.
#[derive(Debug, Clone)]
pub struct MemoryBank {
    descriptor: MemoryBankDescriptor,
    read_only: bool,
    pub(crate) checked: bool,
    pub(crate) attributes: PageAttributes,
}

impl MemoryBank {
    /// Creates a bank described by `descriptor`.
    pub fn new(descriptor: MemoryBankDescriptor) -> Self {
        Self {
            descriptor,
            read_only: false,
            checked: false,
            attributes: PageAttributes::default(),
        }
    }

    /// The bank descriptor.
    pub fn descriptor(&self) -> &MemoryBankDescriptor {
        &self.descriptor
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.descriptor.page_count()
    }

    /// Longest data packet payload a page can hold.
    pub fn max_packet_length(&self) -> usize {
        packet::max_packet_length(self.descriptor.page_length)
    }

    /// Whether the bank can be written. Turns `true` once every page was seen locked.
    pub fn is_read_only(&self) -> bool {
        self.read_only
            || self.descriptor.capabilities.read_only()
            || self.descriptor.write == WriteMethod::ReadOnly
    }

    fn is_paged(&self) -> bool {
        matches!(self.descriptor.kind, BankKind::Paged | BankKind::Otp)
    }

    fn fits(&self, address: usize, len: usize) -> bool {
        address
            .checked_add(len)
            .is_some_and(|end| end <= self.descriptor.size)
    }

    fn check_otp_page<E>(&self, page: usize) -> MemoryResult<(), E> {
        if self.descriptor.kind != BankKind::Otp {
            Err(MemoryError::UnsupportedOperation)
        } else if page >= self.page_count() {
            Err(MemoryError::OutOfRange)
        } else {
            Ok(())
        }
    }

    fn check_paged_page<E>(&self, page: usize) -> MemoryResult<(), E> {
        if !self.is_paged() {
            Err(MemoryError::UnsupportedOperation)
        } else if page >= self.page_count() {
            Err(MemoryError::OutOfRange)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_power<O: OneWire, D>(
        &self,
        session: &DeviceSession<O, D>,
    ) -> MemoryResult<(), O::BusError> {
        if self.descriptor.capabilities.needs_power_delivery() && !session.bus().can_deliver_power()
        {
            Err(MemoryError::PowerDeliveryUnavailable)
        } else {
            Ok(())
        }
    }

    /// Reads `buf.len()` bytes starting at `address`.
    ///
    /// # Arguments
    /// * `session` - Session of the device.
    /// * `address` - Bank relative address.
    /// * `read_continue` - Continue a read left off by the previous call instead
    ///   of selecting the device and sending a new read command. Ignored when
    ///   the session has to negotiate the bus speed first, since that ends the
    ///   pending read.
    /// * `buf` - Destination buffer.
    ///
    /// # Errors
    /// [`MemoryError::OutOfRange`] if the range does not fit in the bank, or a bus error.
    pub fn read<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        address: usize,
        read_continue: bool,
        buf: &mut [u8],
    ) -> MemoryResult<(), O::BusError> {
        if !self.fits(address, buf.len()) {
            return Err(MemoryError::OutOfRange);
        }
        let descriptor = self.descriptor;
        session.guarded(|s| {
            let negotiated = s.force_verify();
            s.check_speed()?;
            s.read_memory(
                descriptor.read_command,
                descriptor.start_address + address as u16,
                descriptor.address_width,
                buf,
                read_continue && !negotiated,
                descriptor.retry_stale_reads,
            )
        })
    }

    /// Writes `data` starting at `address`.
    ///
    /// Scratchpad banks stage, verify and copy each row in turn. Banks with write
    /// verification read the data back afterwards.
    ///
    /// # Errors
    /// * [`MemoryError::OutOfRange`] if the range does not fit in the bank.
    /// * [`MemoryError::UnsupportedOperation`] if the bank cannot be written.
    /// * [`MemoryError::WriteProtected`] if a page in the range is locked.
    /// * [`MemoryError::SecretUnknown`] if the bank needs the device secret and the
    ///   session does not know it.
    /// * [`MemoryError::PowerDeliveryUnavailable`] if the bus master cannot program the bank.
    /// * Commit errors, see [`ScratchpadSession`](crate::ScratchpadSession).
    /// * [`MemoryError::VerifyFailed`] if the data read back differs.
    pub fn write<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        address: usize,
        data: &[u8],
    ) -> MemoryResult<(), O::BusError> {
        if !self.fits(address, data.len()) {
            return Err(MemoryError::OutOfRange);
        }
        if self.descriptor.write == WriteMethod::ReadOnly || self.descriptor.capabilities.read_only()
        {
            return Err(MemoryError::UnsupportedOperation);
        }
        if data.is_empty() {
            return Ok(());
        }
        if self.secret_required() && session.secret().is_none() {
            return Err(MemoryError::SecretUnknown);
        }
        self.check_power(session)?;
        self.ensure_attributes(session)?;
        let page_length = self.descriptor.page_length;
        let last = (address + data.len() - 1) / page_length;
        let locked =
            (address / page_length..=last).any(|page| self.attributes.locked & page_bit(page) != 0);
        if self.read_only || locked {
            return Err(MemoryError::WriteProtected);
        }
        let descriptor = self.descriptor;
        session.guarded(|s| {
            s.check_speed()?;
            write_memory(s, &descriptor, descriptor.start_address + address as u16, data)
        })
    }

    fn secret_required(&self) -> bool {
        matches!(
            self.descriptor.write,
            WriteMethod::Scratchpad(ScratchpadSpec {
                copy: CopyAuthorization::Mac,
                ..
            })
        )
    }

    /// Reads `page` into the first [`page_length`](MemoryBankDescriptor::page_length)
    /// bytes of `buf`.
    pub fn read_page<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
        buf: &mut [u8],
    ) -> MemoryResult<(), O::BusError> {
        self.check_paged_page::<O::BusError>(page)?;
        let page_length = self.descriptor.page_length;
        let buf = buf.get_mut(..page_length).ok_or(MemoryError::OutOfRange)?;
        self.read(session, page * page_length, false, buf)
    }

    /// Reads `page` with a CRC-16 computed by the device.
    ///
    /// On secret protected banks this is an authenticated read using the session
    /// challenge, and `extra` receives the 20-byte MAC.
    ///
    /// # Errors
    /// [`MemoryError::UnsupportedOperation`] if the bank has no page CRC.
    pub fn read_page_crc<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
        buf: &mut [u8],
        extra: Option<&mut [u8]>,
    ) -> MemoryResult<(), O::BusError> {
        self.check_paged_page::<O::BusError>(page)?;
        if !self.descriptor.capabilities.page_auto_crc() || self.descriptor.secure.is_none() {
            return Err(MemoryError::UnsupportedOperation);
        }
        let page_length = self.descriptor.page_length;
        if buf.len() < page_length
            || extra
                .as_ref()
                .is_some_and(|extra| extra.len() < self.descriptor.extra_info_length)
        {
            return Err(MemoryError::OutOfRange);
        }
        let auth = self.read_authenticated_page(session, page)?;
        buf[..page_length].copy_from_slice(&auth.data);
        if let Some(extra) = extra {
            extra[..auth.mac.len()].copy_from_slice(&auth.mac);
        }
        Ok(())
    }

    /// Reads the data packet stored in `page` into `buf`.
    ///
    /// # Returns
    /// The payload length.
    ///
    /// # Errors
    /// * [`MemoryError::InvalidPacketLength`] if the length byte does not fit the page.
    /// * [`MemoryError::InvalidCrc16`] if the packet CRC does not check for this page.
    /// * [`MemoryError::OutOfRange`] if `buf` is too short for the payload.
    pub fn read_page_packet<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
        buf: &mut [u8],
    ) -> MemoryResult<usize, O::BusError> {
        let mut raw = [0xff; MAX_PAGE_LENGTH];
        let page_length = self.descriptor.page_length;
        let raw = raw.get_mut(..page_length).ok_or(MemoryError::OutOfRange)?;
        self.read_page(session, page, raw)?;
        let seed = self.descriptor.packet_seed(page);
        let payload = session.guarded(|_| Ok(packet::decode(seed, raw, page_length)?))?;
        let dest = buf.get_mut(..payload.len()).ok_or(MemoryError::OutOfRange)?;
        dest.copy_from_slice(payload);
        Ok(payload.len())
    }

    /// Writes `payload` to `page` as a data packet.
    ///
    /// # Errors
    /// [`MemoryError::InvalidPacketLength`] if the payload exceeds
    /// [`max_packet_length`](Self::max_packet_length), or any error of [`write`](Self::write).
    pub fn write_page_packet<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
        payload: &[u8],
    ) -> MemoryResult<(), O::BusError> {
        self.check_paged_page::<O::BusError>(page)?;
        let packet = packet::encode(
            self.descriptor.packet_seed(page),
            payload,
            self.descriptor.page_length,
        )?;
        self.write(session, page * self.descriptor.page_length, &packet)
    }

    /// Write protects `page`.
    ///
    /// Banks locked by a single command lock every page at once, as does the
    /// shared control row of secure parts.
    ///
    /// # Errors
    /// * [`MemoryError::UnsupportedOperation`] if the bank cannot be locked.
    /// * [`MemoryError::WriteProtected`] if the page is in a state that cannot be locked,
    ///   like write-once mode on parts with per-page protection.
    pub fn lock_page<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
    ) -> MemoryResult<(), O::BusError> {
        self.set_protection(session, page, Protection::WriteProtected)
    }

    /// Puts `page` in write-once (EPROM) mode, where written bits can only be cleared.
    pub fn set_page_write_once<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
    ) -> MemoryResult<(), O::BusError> {
        if matches!(self.descriptor.lock, LockScheme::CopyAndLock { .. }) {
            return Err(MemoryError::UnsupportedOperation);
        }
        self.set_protection(session, page, Protection::WriteOnce)
    }

    fn set_protection<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
        protection: Protection,
    ) -> MemoryResult<(), O::BusError> {
        self.check_otp_page::<O::BusError>(page)?;
        if !self.descriptor.capabilities.can_lock() {
            return Err(MemoryError::UnsupportedOperation);
        }
        if self.secret_required() && session.secret().is_none() {
            return Err(MemoryError::SecretUnknown);
        }
        self.check_power(session)?;
        let descriptor = self.descriptor;
        let result = match descriptor.lock {
            LockScheme::None => Err(MemoryError::UnsupportedOperation),
            LockScheme::ControlRow { address, layout } => {
                debug!("Setting page {page} to {protection:?} at {address:#06x}");
                update_control_row(session, &descriptor, address, layout, |registers| {
                    registers.set_page(page, protection)
                })
            }
            LockScheme::CopyAndLock { command, key, .. } => session.guarded(|s| {
                s.check_speed()?;
                s.select()?;
                s.bus.write_byte(command)?;
                let program_ms = s.timing.program_ms;
                s.program(key, program_ms)
            }),
        };
        self.checked = false;
        result?;
        self.ensure_attributes(session)
    }

    /// Whether `page` is write protected.
    pub fn is_page_locked<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
    ) -> MemoryResult<bool, O::BusError> {
        self.check_otp_page::<O::BusError>(page)?;
        self.ensure_attributes(session)?;
        Ok(self.attributes.locked & page_bit(page) != 0)
    }

    /// Whether `page` is in write-once mode.
    pub fn is_page_write_once<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
    ) -> MemoryResult<bool, O::BusError> {
        self.check_otp_page::<O::BusError>(page)?;
        self.ensure_attributes(session)?;
        Ok(self.attributes.write_once & page_bit(page) != 0)
    }

    /// Redirects `page` to another page.
    ///
    /// None of the supported devices can redirect pages.
    pub fn redirect_page<O: OneWire, D: DelayNs>(
        &mut self,
        _session: &mut DeviceSession<O, D>,
        _page: usize,
        _new_page: usize,
    ) -> MemoryResult<(), O::BusError> {
        Err(MemoryError::UnsupportedOperation)
    }

    /// Page `page` was redirected to, if any.
    ///
    /// None of the supported devices can redirect pages.
    pub fn is_page_redirected<O: OneWire, D: DelayNs>(
        &mut self,
        _session: &mut DeviceSession<O, D>,
        _page: usize,
    ) -> MemoryResult<Option<usize>, O::BusError> {
        Err(MemoryError::UnsupportedOperation)
    }

    /// Reads the page attributes from the device again.
    pub fn refresh_attributes<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
    ) -> MemoryResult<(), O::BusError> {
        self.checked = false;
        self.ensure_attributes(session)
    }

    /// Reads the page attributes from the device once.
    pub(crate) fn ensure_attributes<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
    ) -> MemoryResult<(), O::BusError> {
        if self.checked {
            return Ok(());
        }
        let descriptor = self.descriptor;
        let pages = self.page_count();
        let attributes = match descriptor.lock {
            LockScheme::None => PageAttributes::default(),
            LockScheme::ControlRow { address, layout } => session.guarded(|s| {
                s.check_speed()?;
                let mut raw = [0; CONTROL_ROW_LEN];
                s.read_memory(
                    descriptor.read_command,
                    address,
                    descriptor.address_width,
                    &mut raw,
                    false,
                    false,
                )?;
                let registers = ControlRegisters::decode(layout, raw);
                let mut attributes = PageAttributes {
                    secret_protected: registers.secret_protected(),
                    ..Default::default()
                };
                for page in 0..pages {
                    match registers.page(page) {
                        Protection::WriteProtected => attributes.locked |= page_bit(page),
                        Protection::WriteOnce => attributes.write_once |= page_bit(page),
                        Protection::Open => {}
                    }
                }
                Ok(attributes)
            })?,
            LockScheme::CopyAndLock { status_command, .. } => session.guarded(|s| {
                s.check_speed()?;
                s.select()?;
                s.bus.write_byte(status_command)?;
                s.bus.write_byte(0x00)?;
                let status = s.bus.read_byte()?;
                let locked = if status & 0x01 == 0 {
                    all_pages(pages)
                } else {
                    0
                };
                Ok(PageAttributes {
                    locked,
                    ..Default::default()
                })
            })?,
        };
        debug!("{} attributes {:?}", descriptor.name, attributes);
        self.read_only = pages > 0 && attributes.locked == all_pages(pages);
        self.attributes = attributes;
        self.checked = true;
        Ok(())
    }
}

/// Reads the control row at `address`, applies `edit` and writes back the bytes that changed.
///
/// `edit` returns `false` to refuse the change, reported as [`MemoryError::WriteProtected`].
pub(crate) fn update_control_row<O: OneWire, D: DelayNs>(
    session: &mut DeviceSession<O, D>,
    descriptor: &MemoryBankDescriptor,
    address: u16,
    layout: ControlLayout,
    edit: impl FnOnce(&mut ControlRegisters) -> bool,
) -> MemoryResult<(), O::BusError> {
    session.guarded(|s| {
        s.check_speed()?;
        let mut raw = [0; CONTROL_ROW_LEN];
        s.read_memory(
            descriptor.read_command,
            address,
            descriptor.address_width,
            &mut raw,
            false,
            false,
        )?;
        let mut registers = ControlRegisters::decode(layout, raw);
        if !edit(&mut registers) {
            return Err(MemoryError::WriteProtected);
        }
        let diff = registers.diff();
        let (Some(first), Some(last)) = (diff.first(), diff.last()) else {
            return Ok(());
        };
        let (first, last) = (first.0 as usize, last.0 as usize);
        let encoded = registers.encode();
        write_memory(
            s,
            descriptor,
            address + first as u16,
            &encoded[first..=last],
        )
    })
}

fn page_bit(page: usize) -> u32 {
    1u32.checked_shl(page as u32).unwrap_or(0)
}

fn all_pages(pages: usize) -> u32 {
    if pages >= 32 {
        u32::MAX
    } else {
        page_bit(pages) - 1
    }
}

/// Writes `data` at device address `address` with the method of `descriptor`.
pub(crate) fn write_memory<O: OneWire, D: DelayNs>(
    session: &mut DeviceSession<O, D>,
    descriptor: &MemoryBankDescriptor,
    address: u16,
    data: &[u8],
) -> MemoryResult<(), O::BusError> {
    match descriptor.write {
        WriteMethod::ReadOnly => return Err(MemoryError::UnsupportedOperation),
        WriteMethod::Scratchpad(spec) => {
            scratchpad::write(session, descriptor, &spec, address, data)?
        }
        WriteMethod::Direct { command } => {
            session.select()?;
            session.send_command(command, address, descriptor.address_width)?;
            session.bus.write_bytes(data)?;
        }
    }
    if descriptor.write_verification {
        let mut readback = [0xff; MAX_PAGE_LENGTH];
        for (offset, chunk) in data.chunks(MAX_PAGE_LENGTH).enumerate() {
            let readback = &mut readback[..chunk.len()];
            session.read_memory(
                descriptor.read_command,
                address + (offset * MAX_PAGE_LENGTH) as u16,
                descriptor.address_width,
                readback,
                false,
                descriptor.retry_stale_reads,
            )?;
            if readback != chunk {
                return Err(MemoryError::VerifyFailed);
            }
        }
    }
    Ok(())
}
