use crate::{ONEWIRE_MATCH_ROM_CMD, OneWireError, OneWireResult};

/// Status of the bus as reported after a reset pulse.
pub trait OneWireStatus {
    /// Whether a presence pulse was detected.
    fn presence(&self) -> bool;

    /// Whether a short circuit was detected on the bus.
    fn shortcircuit(&self) -> bool;

    /// Logic level of the bus line, if the master can sample it.
    fn logic_level(&self) -> Option<bool> {
        None
    }
}

/// Communication speed of the 1-Wire bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusSpeed {
    /// Standard speed, supported by every device.
    #[default]
    Standard,
    /// Overdrive speed. Devices must be switched with an Overdrive-Skip or
    /// Overdrive-Match ROM command before they follow the master.
    Overdrive,
}

/// Event that starts a strong pull-up on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerTrigger {
    /// Start delivering power immediately.
    Now,
    /// Start delivering power after the next bit time slot.
    AfterNextBit,
    /// Start delivering power after the next byte.
    AfterNextByte,
}

/// How long a strong pull-up lasts once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDuration {
    /// Power is delivered until [`OneWire::set_power_normal`] is called.
    Infinite,
    /// Power is delivered for the given number of milliseconds.
    Millis(u32),
}

/// Trait for 1-Wire communication.
/// This trait defines the primitive operations the memory protocols are built from:
/// resetting the bus, addressing a device, reading and writing bytes and bits,
/// switching the bus speed, and delivering programming power through a strong pull-up.
///
/// The bus is half-duplex: every method takes `&mut self`, so at most one
/// transfer can be in flight on a bus at any time.
pub trait OneWire {
    /// The status type returned by the reset operation.
    /// This type must implement the [OneWireStatus] trait.
    type Status: OneWireStatus;
    /// The error type returned by the operations of this trait.
    /// This type is used to indicate errors in the underlying hardware or communication.
    type BusError;

    /// Resets the 1-Wire bus and returns the status of the bus.
    ///
    /// # Returns
    /// A result containing the status of the bus after the reset operation.
    ///
    /// # Errors
    /// This method returns an error if the reset operation fails, or
    /// [`OneWireError::NoDevicePresent`] if no presence pulse was seen.
    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError>;

    /// Writes a byte to the 1-Wire bus.
    /// # Arguments
    /// * `byte` - The byte to write to the bus.
    ///
    /// # Errors
    /// This method returns an error if the write operation fails.
    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError>;

    /// Reads a byte from the 1-Wire bus.
    /// # Returns
    /// Byte read from the bus.
    ///
    /// # Errors
    /// This method returns an error if the read operation fails.
    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError>;

    /// Writes a single bit to the 1-Wire bus.
    /// # Arguments
    ///
    /// * `bit` - The bit to write.
    ///
    /// # Errors
    /// This method returns an error if the write operation fails.
    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError>;

    /// Reads a single bit from the 1-Wire bus.
    /// # Returns
    /// The bit read from the bus.
    /// # Errors
    /// This method returns an error if the read operation fails.
    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError>;

    /// Writes a byte and returns the byte sampled on the bus during the same time slots.
    ///
    /// Sending `0xff` leaves the line free for the device to drive, so this is a read;
    /// any other value is a write that echoes back unchanged.
    fn touch_byte(&mut self, byte: u8) -> OneWireResult<u8, Self::BusError> {
        if byte == 0xff {
            self.read_byte()
        } else {
            self.write_byte(byte)?;
            Ok(byte)
        }
    }

    /// Exchanges a block of bytes with the bus.
    ///
    /// Every byte of `buf` is sent and overwritten with the byte sampled on the bus.
    /// Pre-fill positions to be read with `0xff`.
    ///
    /// # Errors
    /// This method returns an error if any of the byte operations fail.
    fn transfer(&mut self, buf: &mut [u8]) -> OneWireResult<(), Self::BusError> {
        for byte in buf.iter_mut() {
            *byte = self.touch_byte(*byte)?;
        }
        Ok(())
    }

    /// Writes a sequence of bytes to the bus.
    fn write_bytes(&mut self, bytes: &[u8]) -> OneWireResult<(), Self::BusError> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(())
    }

    /// Addresses a single device on the bus.
    ///
    /// Issues a reset followed by the Match ROM command and the 64-bit ROM code.
    /// Subsequent byte operations are directed at that device until the next reset.
    ///
    /// # Returns
    /// `Ok(false)` if no device answered the reset with a presence pulse.
    ///
    /// # Errors
    /// This method returns an error if the bus is shorted or a bus operation fails.
    fn select(&mut self, rom: u64) -> OneWireResult<bool, Self::BusError> {
        match self.reset() {
            Ok(status) if status.shortcircuit() => return Err(OneWireError::ShortCircuit),
            Ok(status) if !status.presence() => return Ok(false),
            Ok(_) => {}
            Err(OneWireError::NoDevicePresent) => return Ok(false),
            Err(e) => return Err(e),
        }
        self.write_byte(ONEWIRE_MATCH_ROM_CMD)?;
        self.write_bytes(&rom.to_le_bytes())?;
        Ok(true)
    }

    /// Current communication speed of the bus master.
    fn speed(&self) -> BusSpeed {
        BusSpeed::Standard
    }

    /// Changes the communication speed of the bus master.
    ///
    /// This only changes the master's timing. Devices have to be switched
    /// separately with an overdrive ROM command.
    ///
    /// # Errors
    /// Masters without overdrive support return [`OneWireError::Unimplemented`].
    fn set_speed(&mut self, speed: BusSpeed) -> OneWireResult<(), Self::BusError> {
        match speed {
            BusSpeed::Standard => Ok(()),
            BusSpeed::Overdrive => Err(OneWireError::Unimplemented),
        }
    }

    /// Whether this master can drive a strong pull-up.
    fn can_deliver_power(&self) -> bool {
        false
    }

    /// Sets how long the next strong pull-up lasts.
    fn set_power_duration(&mut self, _duration: PowerDuration) -> OneWireResult<(), Self::BusError> {
        Err(OneWireError::Unimplemented)
    }

    /// Arms a strong pull-up, started by `trigger`.
    ///
    /// Programming EEPROM cells and computing SHA-1 on parasitically powered parts
    /// both need the pull-up to stay on for a device-specific minimum time.
    /// Releasing it early corrupts the operation in progress.
    fn start_power_delivery(&mut self, _trigger: PowerTrigger) -> OneWireResult<(), Self::BusError> {
        Err(OneWireError::Unimplemented)
    }

    /// Ends any strong pull-up and returns the bus to its normal pull-up.
    fn set_power_normal(&mut self) -> OneWireResult<(), Self::BusError> {
        Ok(())
    }
}

impl<T: OneWire + ?Sized> OneWire for &mut T {
    type Status = T::Status;
    type BusError = T::BusError;

    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError> {
        T::reset(self)
    }

    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        T::write_byte(self, byte)
    }

    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        T::read_byte(self)
    }

    fn write_bit(&mut self, bit: bool) -> OneWireResult<(), Self::BusError> {
        T::write_bit(self, bit)
    }

    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        T::read_bit(self)
    }

    fn touch_byte(&mut self, byte: u8) -> OneWireResult<u8, Self::BusError> {
        T::touch_byte(self, byte)
    }

    fn transfer(&mut self, buf: &mut [u8]) -> OneWireResult<(), Self::BusError> {
        T::transfer(self, buf)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> OneWireResult<(), Self::BusError> {
        T::write_bytes(self, bytes)
    }

    fn select(&mut self, rom: u64) -> OneWireResult<bool, Self::BusError> {
        T::select(self, rom)
    }

    fn speed(&self) -> BusSpeed {
        T::speed(self)
    }

    fn set_speed(&mut self, speed: BusSpeed) -> OneWireResult<(), Self::BusError> {
        T::set_speed(self, speed)
    }

    fn can_deliver_power(&self) -> bool {
        T::can_deliver_power(self)
    }

    fn set_power_duration(&mut self, duration: PowerDuration) -> OneWireResult<(), Self::BusError> {
        T::set_power_duration(self, duration)
    }

    fn start_power_delivery(&mut self, trigger: PowerTrigger) -> OneWireResult<(), Self::BusError> {
        T::start_power_delivery(self, trigger)
    }

    fn set_power_normal(&mut self) -> OneWireResult<(), Self::BusError> {
        T::set_power_normal(self)
    }
}
