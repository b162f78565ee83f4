//! Secret installation and authenticated reads on SHA-1 protected banks.
use crate::bank::{MemoryBank, update_control_row};
use crate::descriptor::{
    ControlLayout, LockScheme, MemoryBankDescriptor, ScratchpadSpec, SecureSpec, WriteMethod,
};
use crate::scratchpad::ScratchpadSession;
use crate::session::DeviceSession;
use crate::sha::{self, Mac};
use crate::{MemoryError, MemoryResult};
use embedded_hal::delay::DelayNs;
use embedded_onewire::{OneWire, OneWireCrc16};
use log::{debug, trace, warn};

/// Secret material consumed per Compute Next Secret step.
pub const PHRASE_LEN: usize = 47;

const PAGE_LEN: usize = 32;
const PAGE_PART: usize = 32;
const SCRATCHPAD_PART: usize = 8;
const COMMAND_SUCCESS: u8 = 0xaa;

/// A page read with Read Authenticated Page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedPage {
    /// Bank relative page number.
    pub page: usize,
    /// Page contents.
    pub data: [u8; PAGE_LEN],
    /// MAC computed by the device.
    pub mac: Mac,
    /// Challenge the MAC was computed with.
    pub challenge: [u8; 8],
}

impl MemoryBank {
    fn secure_spec<E>(&self) -> MemoryResult<(SecureSpec, ScratchpadSpec), E> {
        let descriptor = self.descriptor();
        match (descriptor.secure, descriptor.write) {
            (Some(secure), WriteMethod::Scratchpad(spec))
                if descriptor.capabilities.secret_protected() =>
            {
                Ok((secure, spec))
            }
            _ => Err(MemoryError::UnsupportedOperation),
        }
    }

    fn check_secure_page<E>(&self, page: usize) -> MemoryResult<(SecureSpec, ScratchpadSpec), E> {
        let specs = self.secure_spec()?;
        if page >= self.page_count() || self.descriptor().page_length != PAGE_LEN {
            return Err(MemoryError::OutOfRange);
        }
        Ok(specs)
    }

    fn check_secret_writable<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
    ) -> MemoryResult<(), O::BusError> {
        self.ensure_attributes(session)?;
        if self.attributes.secret_protected {
            Err(MemoryError::WriteProtected)
        } else {
            Ok(())
        }
    }

    /// Installs `secret` as the device secret.
    ///
    /// The secret is staged in the scratchpad at the secret address and moved to
    /// the secret with Load First Secret. The session learns the new secret.
    ///
    /// # Errors
    /// * [`MemoryError::UnsupportedOperation`] if the bank is not secret protected.
    /// * [`MemoryError::WriteProtected`] if the device secret is write protected.
    /// * [`MemoryError::CopyFailed`] if the device refuses the secret.
    pub fn load_first_secret<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        secret: [u8; 8],
    ) -> MemoryResult<(), O::BusError> {
        let (secure, spec) = self.secure_spec::<O::BusError>()?;
        self.check_power(session)?;
        self.check_secret_writable(session)?;
        let descriptor = *self.descriptor();
        session.guarded(|s| {
            s.check_speed()?;
            let pad =
                ScratchpadSession::stage(s, &descriptor, &spec, secure.secret_address, &secret)?;
            s.select()?;
            s.bus.write_byte(secure.load_first_secret)?;
            s.bus.write_bytes(&pad.extra_info[..2])?;
            let program_ms = s.timing.program_ms;
            s.program(pad.extra_info[2], program_ms)?;
            if s.bus.read_byte()? != COMMAND_SUCCESS {
                return Err(MemoryError::CopyFailed);
            }
            s.set_secret(secret);
            debug!("Loaded first secret of {:016x}", s.rom());
            Ok(())
        })
    }

    /// Installs a master secret derived from `secret`.
    ///
    /// The device secret is zeroed, then every 47-byte phrase of `secret` (the last one
    /// padded with zeros) is folded in: 32 bytes are written to `page`, the next 8
    /// are staged in the scratchpad for Compute Next Secret, and the remaining 7 are
    /// not used. The host tracks the secret along.
    ///
    /// `page` is overwritten in the process.
    pub fn install_master_secret<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
        secret: &[u8],
    ) -> MemoryResult<(), O::BusError> {
        self.check_secure_page::<O::BusError>(page)?;
        self.load_first_secret(session, [0; 8])?;
        for (index, chunk) in secret.chunks(PHRASE_LEN).enumerate() {
            debug!("Installing secret phrase {index}");
            let mut phrase = [0; PHRASE_LEN];
            phrase[..chunk.len()].copy_from_slice(chunk);
            self.write(session, page * PAGE_LEN, &phrase[..PAGE_PART])?;
            let mut partial = [0; SCRATCHPAD_PART];
            partial.copy_from_slice(&phrase[PAGE_PART..PAGE_PART + SCRATCHPAD_PART]);
            self.compute_next_secret(session, page, partial)?;
        }
        Ok(())
    }

    /// Makes the secret unique to the device.
    ///
    /// `binding` is written to `page`, then the next secret is computed from it and
    /// from the page number and ROM code staged in the scratchpad.
    pub fn bind_secret_to_device<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
        binding: &[u8; PAGE_LEN],
    ) -> MemoryResult<(), O::BusError> {
        self.check_secure_page::<O::BusError>(page)?;
        self.check_secret_writable(session)?;
        self.write(session, page * PAGE_LEN, binding)?;
        let mut partial = [0; SCRATCHPAD_PART];
        partial[0] = page as u8;
        partial[1..].copy_from_slice(&session.serial());
        self.compute_next_secret(session, page, partial)
    }

    /// Write protects the device secret for good.
    ///
    /// Load First Secret and Compute Next Secret are refused afterwards. Page
    /// contents stay writable.
    ///
    /// # Errors
    /// * [`MemoryError::UnsupportedOperation`] if the bank has no secret protection byte.
    /// * [`MemoryError::SecretUnknown`] if the session does not know the device secret.
    /// * [`MemoryError::PowerDeliveryUnavailable`] if the bus master cannot program the bank.
    pub fn protect_secret<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
    ) -> MemoryResult<(), O::BusError> {
        self.secure_spec::<O::BusError>()?;
        let descriptor = *self.descriptor();
        let LockScheme::ControlRow {
            address,
            layout: ControlLayout::Shared,
        } = descriptor.lock
        else {
            return Err(MemoryError::UnsupportedOperation);
        };
        if session.secret().is_none() {
            return Err(MemoryError::SecretUnknown);
        }
        self.check_power(session)?;
        debug!("Write protecting the secret of {:016x}", session.rom());
        let result = update_control_row(
            session,
            &descriptor,
            address,
            ControlLayout::Shared,
            |registers| registers.protect_secret(),
        );
        self.checked = false;
        result?;
        self.ensure_attributes(session)
    }

    fn compute_next_secret<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
        partial: [u8; SCRATCHPAD_PART],
    ) -> MemoryResult<(), O::BusError> {
        let (secure, spec) = self.check_secure_page::<O::BusError>(page)?;
        let secret = session.secret().ok_or(MemoryError::SecretUnknown)?;
        self.check_power(session)?;
        self.check_secret_writable(session)?;
        let descriptor = *self.descriptor();
        let address = descriptor.page_address(page);
        session.guarded(|s| {
            s.check_speed()?;
            let mut data = [0; PAGE_LEN];
            s.read_memory(
                descriptor.read_command,
                address,
                descriptor.address_width,
                &mut data,
                false,
                false,
            )?;
            ScratchpadSession::stage(s, &descriptor, &spec, address, &partial)?;
            s.select()?;
            s.bus.write_byte(secure.compute_next_secret)?;
            let [ta1, ta2] = address.to_le_bytes();
            s.bus.write_byte(ta1)?;
            // the new secret is computed, then programmed into EEPROM
            let window = s.timing.sha_compute_ms.saturating_add(s.timing.program_ms);
            s.program(ta2, window)?;
            if s.bus.read_byte()? != COMMAND_SUCCESS {
                return Err(MemoryError::CopyFailed);
            }
            let block = sha::next_secret_block(&secret, &data, &partial);
            s.set_secret(sha::next_secret(&block));
            Ok(())
        })
    }

    /// Reads `page` together with a MAC over it, the device secret and the session challenge.
    ///
    /// Both parts of the answer are checked with their CRC-16. The MAC itself is
    /// not checked, see [`verify_authenticated_page`](Self::verify_authenticated_page).
    /// Any failure spends the challenge.
    ///
    /// # Errors
    /// * [`MemoryError::ChallengeReused`] if the challenge was spent. Install a fresh one
    ///   with [`DeviceSession::set_challenge`] or [`DeviceSession::generate_challenge`].
    /// * [`MemoryError::FirstCrcFailed`] if the page data does not check.
    /// * [`MemoryError::SecondCrcFailed`] if the MAC does not check.
    pub fn read_authenticated_page<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
    ) -> MemoryResult<AuthenticatedPage, O::BusError> {
        let (_, spec) = self.check_secure_page::<O::BusError>(page)?;
        let command = self
            .descriptor()
            .read_page_crc_command
            .ok_or(MemoryError::UnsupportedOperation)?;
        if session.challenge_spent() {
            return Err(MemoryError::ChallengeReused);
        }
        let descriptor = *self.descriptor();
        let result = session.guarded(|s| authenticated_read(s, &descriptor, command, &spec, page));
        if let Err(e) = &result {
            warn!(
                "Authenticated read of page {page} failed, challenge spent: {:?}",
                e.kind()
            );
            session.secret.challenge_spent = true;
        }
        result
    }

    /// Checks the MAC of `auth` against the session secret.
    ///
    /// A mismatch spends the challenge.
    ///
    /// # Errors
    /// * [`MemoryError::SecretUnknown`] if the session has no secret.
    /// * [`MemoryError::MacMismatch`] if the MAC does not match.
    pub fn verify_authenticated_page<O, D>(
        &self,
        session: &mut DeviceSession<O, D>,
        auth: &AuthenticatedPage,
    ) -> MemoryResult<(), O::BusError>
    where
        O: OneWire,
    {
        self.check_secure_page::<O::BusError>(auth.page)?;
        let secret = session.secret().ok_or(MemoryError::SecretUnknown)?;
        let block = sha::authentication_block(
            &secret,
            &auth.data,
            self.descriptor().page_address(auth.page),
            &session.serial(),
            &auth.challenge,
        );
        sha::verify_mac(&block, &auth.mac).map_err(|e| {
            warn!("MAC mismatch on page {}", auth.page);
            session.secret.challenge_spent = true;
            e.into()
        })
    }

    /// Reads `page` with [`read_authenticated_page`](Self::read_authenticated_page)
    /// and checks its MAC.
    pub fn read_verified_page<O: OneWire, D: DelayNs>(
        &mut self,
        session: &mut DeviceSession<O, D>,
        page: usize,
        buf: &mut [u8],
    ) -> MemoryResult<(), O::BusError> {
        let dest = buf.get_mut(..PAGE_LEN).ok_or(MemoryError::OutOfRange)?;
        let auth = self.read_authenticated_page(session, page)?;
        self.verify_authenticated_page(session, &auth)?;
        dest.copy_from_slice(&auth.data);
        Ok(())
    }
}

fn authenticated_read<O: OneWire, D: DelayNs>(
    session: &mut DeviceSession<O, D>,
    descriptor: &MemoryBankDescriptor,
    command: u8,
    spec: &ScratchpadSpec,
    page: usize,
) -> MemoryResult<AuthenticatedPage, O::BusError> {
    let address = descriptor.page_address(page);
    let challenge = session.challenge();
    session.check_speed()?;
    ScratchpadSession::stage(session, descriptor, spec, address, &challenge)?;
    session.select()?;
    session.send_command(command, address, descriptor.address_width)?;
    // page data, 0xFF, CRC-16
    let mut first = [0xff; PAGE_LEN + 3];
    session.bus.transfer(&mut first)?;
    let mut crc = OneWireCrc16::new(0);
    crc.update(&[command]);
    crc.update(&address.to_le_bytes());
    crc.update(&first);
    if !crc.is_valid() {
        return Err(MemoryError::FirstCrcFailed);
    }
    let sha_compute_ms = session.timing.sha_compute_ms;
    session.power_window(sha_compute_ms)?;
    // MAC, CRC-16
    let mut second = [0xff; 22];
    session.bus.transfer(&mut second)?;
    if !OneWireCrc16::validate(0, &second) {
        return Err(MemoryError::SecondCrcFailed);
    }
    let mut data = [0; PAGE_LEN];
    data.copy_from_slice(&first[..PAGE_LEN]);
    let mut mac = [0; 20];
    mac.copy_from_slice(&second[..20]);
    trace!("Authenticated page {page}: {data:02x?} MAC {mac:02x?}");
    Ok(AuthenticatedPage {
        page,
        data,
        mac,
        challenge,
    })
}
