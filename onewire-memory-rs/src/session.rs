use crate::descriptor::AddressWidth;
use crate::{MemoryError, MemoryResult};
use embedded_hal::delay::DelayNs;
use embedded_onewire::{
    BusSpeed, ONEWIRE_MATCH_ROM_CMD_OD, OneWire, OneWireCrc, OneWireError, OneWireResult,
    OneWireStatus, PowerDuration, PowerTrigger,
};
use log::{debug, warn};
use rand_core::RngCore;

/// Wait times and retry bounds of memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Total read attempts while a read returns only `0xFF`.
    pub read_attempts: u8,
    /// Pause between read attempts, in milliseconds.
    pub retry_delay_ms: u32,
    /// Strong pull-up duration for EEPROM programming, in milliseconds.
    pub program_ms: u32,
    /// Time the SHA-1 engine needs for one computation, in milliseconds.
    pub sha_compute_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            read_attempts: 6,
            retry_delay_ms: 10,
            program_ms: 10,
            sha_compute_ms: 2,
        }
    }
}

impl Timing {
    /// Set the number of read attempts.
    pub fn with_read_attempts(mut self, attempts: u8) -> Self {
        self.read_attempts = attempts;
        self
    }

    /// Set the pause between read attempts.
    pub fn with_retry_delay_ms(mut self, ms: u32) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    /// Set the programming time.
    pub fn with_program_ms(mut self, ms: u32) -> Self {
        self.program_ms = ms;
        self
    }

    /// Set the SHA-1 computation time.
    pub fn with_sha_compute_ms(mut self, ms: u32) -> Self {
        self.sha_compute_ms = ms;
        self
    }
}

/// Secret and challenge of a secure device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SecretState {
    pub(crate) secret: Option<[u8; 8]>,
    pub(crate) challenge: [u8; 8],
    pub(crate) challenge_spent: bool,
}

impl Default for SecretState {
    fn default() -> Self {
        Self {
            secret: None,
            challenge: [0; 8],
            // no challenge installed yet
            challenge_spent: true,
        }
    }
}

/// Exclusive access to one physical device.
///
/// Every memory bank of the device operates through the session, so commands
/// to the device are serialized and all banks share the state kept here:
/// the target bus speed, the `force_verify` flag, timing, and the secret and
/// challenge of secure parts.
///
/// Takes ownership of the bus (implementing [`OneWire`]; `&mut` references to a bus
/// work too) and a timer object implementing the [`DelayNs`] trait.
pub struct DeviceSession<O, D> {
    pub(crate) bus: O,
    pub(crate) delay: D,
    rom: u64,
    speed: BusSpeed,
    force_verify: bool,
    pub(crate) timing: Timing,
    pub(crate) secret: SecretState,
}

impl<O: OneWire, D: DelayNs> DeviceSession<O, D> {
    /// Creates a session for the device with ROM code `rom`.
    ///
    /// # Errors
    /// [`MemoryError::InvalidRom`] if the ROM code fails its CRC-8 check.
    pub fn new(bus: O, delay: D, rom: u64) -> MemoryResult<Self, O::BusError> {
        if !OneWireCrc::validate(&rom.to_le_bytes()) {
            return Err(MemoryError::InvalidRom);
        }
        Ok(Self {
            bus,
            delay,
            rom,
            speed: BusSpeed::Standard,
            force_verify: true,
            timing: Timing::default(),
            secret: SecretState::default(),
        })
    }

    /// Set the speed the device is operated at.
    pub fn with_speed(mut self, speed: BusSpeed) -> Self {
        self.set_speed(speed);
        self
    }

    /// Set the timing configuration.
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Change the speed the device is operated at. Takes effect with the next operation.
    pub fn set_speed(&mut self, speed: BusSpeed) {
        if speed != self.speed {
            self.speed = speed;
            self.force_verify = true;
        }
    }

    pub(crate) fn check_speed(&mut self) -> MemoryResult<(), O::BusError> {
        if !self.force_verify {
            return Ok(());
        }
        debug!("Checking {:?} speed for {:016x}", self.speed, self.rom);
        if self.negotiate()? {
            self.force_verify = false;
            Ok(())
        } else {
            Err(MemoryError::DeviceNotPresent)
        }
    }

    fn negotiate(&mut self) -> OneWireResult<bool, O::BusError> {
        if self.speed == BusSpeed::Overdrive {
            // a reset at standard speed returns every device to standard speed
            self.bus.set_speed(BusSpeed::Standard)?;
            if !self.presence()? {
                return Ok(false);
            }
            self.bus.write_byte(ONEWIRE_MATCH_ROM_CMD_OD)?;
            self.bus.set_speed(BusSpeed::Overdrive)?;
            self.bus.write_bytes(&self.rom.to_le_bytes())?;
        } else if self.bus.speed() != BusSpeed::Standard {
            self.bus.set_speed(BusSpeed::Standard)?;
        }
        self.bus.select(self.rom)
    }

    fn presence(&mut self) -> OneWireResult<bool, O::BusError> {
        match self.bus.reset() {
            Ok(status) if status.shortcircuit() => Err(OneWireError::ShortCircuit),
            Ok(status) => Ok(status.presence()),
            Err(OneWireError::NoDevicePresent) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Runs `op`, setting `force_verify` if it fails with bus trouble.
    pub(crate) fn guarded<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> MemoryResult<T, O::BusError>,
    ) -> MemoryResult<T, O::BusError> {
        let result = op(self);
        if let Err(e) = &result {
            if e.needs_recheck() {
                if !self.force_verify {
                    warn!("Device {:016x} needs a speed check: {:?}", self.rom, e.kind());
                }
                self.force_verify = true;
            }
        }
        result
    }

    pub(crate) fn select(&mut self) -> MemoryResult<(), O::BusError> {
        if self.bus.select(self.rom)? {
            Ok(())
        } else {
            Err(MemoryError::DeviceSelectFailed)
        }
    }

    pub(crate) fn send_command(
        &mut self,
        command: u8,
        address: u16,
        width: AddressWidth,
    ) -> MemoryResult<(), O::BusError> {
        let (bytes, len) = width.encode(address);
        self.bus.write_byte(command)?;
        self.bus.write_bytes(&bytes[..len])?;
        Ok(())
    }

    /// Sends the byte that starts an EEPROM programming cycle, then waits for it to finish.
    pub(crate) fn program(&mut self, byte: u8, ms: u32) -> MemoryResult<(), O::BusError> {
        if !self.bus.can_deliver_power() {
            self.bus.write_byte(byte)?;
            self.delay.delay_ms(ms);
            return Ok(());
        }
        self.bus.set_power_duration(PowerDuration::Infinite)?;
        self.bus.start_power_delivery(PowerTrigger::AfterNextByte)?;
        self.bus.write_byte(byte)?;
        self.delay.delay_ms(ms);
        self.bus.set_power_normal()?;
        Ok(())
    }

    /// Powers the device while it computes a SHA-1 digest.
    pub(crate) fn power_window(&mut self, ms: u32) -> MemoryResult<(), O::BusError> {
        if !self.bus.can_deliver_power() {
            self.delay.delay_ms(ms);
            return Ok(());
        }
        self.bus.set_power_duration(PowerDuration::Infinite)?;
        self.bus.start_power_delivery(PowerTrigger::Now)?;
        self.delay.delay_ms(ms);
        self.bus.set_power_normal()?;
        Ok(())
    }

    /// Reads memory into `buf`.
    ///
    /// Unless `read_continue` is set the device is selected and the command and
    /// address are sent first; otherwise the bytes continue a read already in progress.
    /// With `retry_stale` a result of only `0xFF` is read again, from a fresh
    /// selection, up to [`Timing::read_attempts`] times in total. The last result
    /// is returned as is.
    pub(crate) fn read_memory(
        &mut self,
        command: u8,
        address: u16,
        width: AddressWidth,
        buf: &mut [u8],
        read_continue: bool,
        retry_stale: bool,
    ) -> MemoryResult<(), O::BusError> {
        let attempts = if retry_stale {
            self.timing.read_attempts.max(1)
        } else {
            1
        };
        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(
                    "Stale read at {address:#06x}, attempt {}/{attempts}",
                    attempt + 1
                );
                self.delay.delay_ms(self.timing.retry_delay_ms);
            }
            if attempt > 0 || !read_continue {
                self.select()?;
                self.send_command(command, address, width)?;
            }
            buf.fill(0xff);
            self.bus.transfer(buf)?;
            if buf.iter().any(|&b| b != 0xff) {
                break;
            }
        }
        Ok(())
    }
}

impl<O, D> DeviceSession<O, D> {
    /// ROM code of the device.
    pub fn rom(&self) -> u64 {
        self.rom
    }

    /// Family code and serial number, as the first seven bytes of the ROM code.
    pub fn serial(&self) -> [u8; 7] {
        let mut serial = [0; 7];
        serial.copy_from_slice(&self.rom.to_le_bytes()[..7]);
        serial
    }

    /// Speed the device is operated at.
    pub fn speed(&self) -> BusSpeed {
        self.speed
    }

    /// Timing configuration.
    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Whether the next operation re-checks bus speed and device presence first.
    ///
    /// Set when the session is created and after any failure pointing at bus
    /// trouble, cleared by a successful check.
    pub fn force_verify(&self) -> bool {
        self.force_verify
    }

    /// The bus.
    pub fn bus(&self) -> &O {
        &self.bus
    }

    /// The bus, mutably. Anything done to the bus through this reference is
    /// invisible to the session, so the next operation re-checks the device.
    pub fn bus_mut(&mut self) -> &mut O {
        self.force_verify = true;
        &mut self.bus
    }

    /// Ends the session, returning the bus and the timer.
    pub fn release(self) -> (O, D) {
        (self.bus, self.delay)
    }

    /// Secret the host believes the device holds.
    pub fn secret(&self) -> Option<[u8; 8]> {
        self.secret.secret
    }

    /// Set the secret the host believes the device holds.
    ///
    /// The device secret cannot be read back; keeping this in step with the
    /// device is up to the caller.
    pub fn set_secret(&mut self, secret: [u8; 8]) {
        self.secret.secret = Some(secret);
    }

    /// Forget the device secret.
    pub fn clear_secret(&mut self) {
        self.secret.secret = None;
    }

    /// Challenge used by the next authenticated read.
    pub fn challenge(&self) -> [u8; 8] {
        self.secret.challenge
    }

    /// Whether the challenge was spent by a failed authentication.
    pub fn challenge_spent(&self) -> bool {
        self.secret.challenge_spent
    }

    /// Install a fresh challenge.
    pub fn set_challenge(&mut self, challenge: [u8; 8]) {
        self.secret.challenge = challenge;
        self.secret.challenge_spent = false;
    }

    /// Install a random challenge.
    pub fn generate_challenge<R: RngCore>(&mut self, rng: &mut R) -> [u8; 8] {
        let mut challenge = [0; 8];
        rng.fill_bytes(&mut challenge);
        self.set_challenge(challenge);
        challenge
    }
}
