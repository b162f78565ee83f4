use crate::slave::Slave;
use bitfield_struct::bitfield;
use core::convert::Infallible;
use embedded_onewire::{
    BusSpeed, ONEWIRE_MATCH_ROM_CMD, ONEWIRE_MATCH_ROM_CMD_OD, ONEWIRE_SKIP_ROM_CMD,
    ONEWIRE_SKIP_ROM_CMD_OD, OneWire, OneWireError, OneWireResult, OneWireStatus, PowerDuration,
    PowerTrigger,
};
use log::trace;

#[bitfield(u8)]
/// Bus status after a reset pulse.
pub struct BusStatus {
    /// A device answered with a presence pulse.
    pub presence_detect: bool,
    /// The bus is shorted.
    pub short_detect: bool,
    #[bits(6)]
    reserved: u8,
}

impl OneWireStatus for BusStatus {
    fn presence(&self) -> bool {
        self.presence_detect()
    }

    fn shortcircuit(&self) -> bool {
        self.short_detect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    AwaitRom,
    MatchRom { index: usize, matched: bool },
    Selected { fresh: bool },
    Deselected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Power {
    Normal,
    Armed(PowerTrigger),
    Active,
}

/// A bus master with one emulated device attached.
///
/// Follows the device through reset, ROM addressing and speed changes, and
/// delivers power the way a master with a strong pull-up would: a device only
/// sees a programming byte as powered if the pull-up was armed for it. Any bus
/// traffic while the pull-up is on fails with [`OneWireError::BusInUse`].
pub struct EmulatedBus<S> {
    device: S,
    link: Link,
    speed: BusSpeed,
    device_speed: BusSpeed,
    power: Power,
    duration: PowerDuration,
    power_capable: bool,
    commands: Vec<u8>,
    rom_commands: Vec<u8>,
}

impl<S: Slave> EmulatedBus<S> {
    /// Attaches `device` to a new bus.
    pub fn new(device: S) -> Self {
        Self {
            device,
            link: Link::Deselected,
            speed: BusSpeed::Standard,
            device_speed: BusSpeed::Standard,
            power: Power::Normal,
            duration: PowerDuration::Infinite,
            power_capable: true,
            commands: Vec::new(),
            rom_commands: Vec::new(),
        }
    }

    /// Removes the strong pull-up from the master.
    pub fn without_power_delivery(mut self) -> Self {
        self.power_capable = false;
        self
    }

    /// The attached device.
    pub fn device(&self) -> &S {
        &self.device
    }

    /// The attached device, mutably.
    pub fn device_mut(&mut self) -> &mut S {
        &mut self.device
    }

    /// Function commands sent to the device, in order.
    pub fn commands(&self) -> &[u8] {
        &self.commands
    }

    /// ROM commands sent after each reset, in order.
    pub fn rom_commands(&self) -> &[u8] {
        &self.rom_commands
    }

    /// Forget the logged commands.
    pub fn clear_log(&mut self) {
        self.commands.clear();
        self.rom_commands.clear();
    }

    /// Speed the device currently communicates at.
    pub fn device_speed(&self) -> BusSpeed {
        self.device_speed
    }

    fn check_idle(&self) -> OneWireResult<(), Infallible> {
        if self.power == Power::Active {
            Err(OneWireError::BusInUse)
        } else {
            Ok(())
        }
    }

    fn after_slot(&mut self, trigger: PowerTrigger) -> bool {
        if self.power != Power::Armed(trigger) {
            return false;
        }
        self.power = match self.duration {
            PowerDuration::Infinite => Power::Active,
            // a timed pull-up has ended by the time the master looks again
            PowerDuration::Millis(_) => Power::Normal,
        };
        true
    }

    fn receive(&mut self, byte: u8, powered: bool) {
        if self.speed != self.device_speed {
            self.link = Link::Deselected;
            return;
        }
        self.link = match self.link {
            Link::AwaitRom => {
                self.rom_commands.push(byte);
                match byte {
                    ONEWIRE_MATCH_ROM_CMD => Link::MatchRom {
                        index: 0,
                        matched: true,
                    },
                    ONEWIRE_MATCH_ROM_CMD_OD => {
                        self.device_speed = BusSpeed::Overdrive;
                        Link::MatchRom {
                            index: 0,
                            matched: true,
                        }
                    }
                    ONEWIRE_SKIP_ROM_CMD => Link::Selected { fresh: true },
                    ONEWIRE_SKIP_ROM_CMD_OD => {
                        self.device_speed = BusSpeed::Overdrive;
                        Link::Selected { fresh: true }
                    }
                    _ => Link::Deselected,
                }
            }
            Link::MatchRom { index, matched } => {
                let matched = matched && self.device.rom().to_le_bytes()[index] == byte;
                match (index, matched) {
                    (7, true) => Link::Selected { fresh: true },
                    (7, false) => Link::Deselected,
                    _ => Link::MatchRom {
                        index: index + 1,
                        matched,
                    },
                }
            }
            Link::Selected { fresh } => {
                if fresh {
                    trace!("Function command {byte:#04x}");
                    self.commands.push(byte);
                }
                self.device.write(byte, powered);
                Link::Selected { fresh: false }
            }
            Link::Deselected => Link::Deselected,
        };
    }
}

impl<S: Slave> OneWire for EmulatedBus<S> {
    type Status = BusStatus;
    type BusError = Infallible;

    fn reset(&mut self) -> OneWireResult<Self::Status, Self::BusError> {
        self.check_idle()?;
        self.power = Power::Normal;
        if self.speed == BusSpeed::Standard {
            self.device_speed = BusSpeed::Standard;
        }
        self.device.reset();
        if self.device.faults().absent || self.speed != self.device_speed {
            self.link = Link::Deselected;
            return Err(OneWireError::NoDevicePresent);
        }
        self.link = Link::AwaitRom;
        Ok(BusStatus::new().with_presence_detect(true))
    }

    fn write_byte(&mut self, byte: u8) -> OneWireResult<(), Self::BusError> {
        self.check_idle()?;
        let powered = self.after_slot(PowerTrigger::AfterNextByte);
        self.receive(byte, powered);
        Ok(())
    }

    fn read_byte(&mut self) -> OneWireResult<u8, Self::BusError> {
        self.check_idle()?;
        self.after_slot(PowerTrigger::AfterNextByte);
        match self.link {
            Link::Selected { .. } if self.speed == self.device_speed => {
                self.link = Link::Selected { fresh: false };
                Ok(self.device.read())
            }
            _ => Ok(0xff),
        }
    }

    fn write_bit(&mut self, _bit: bool) -> OneWireResult<(), Self::BusError> {
        self.check_idle()?;
        self.after_slot(PowerTrigger::AfterNextBit);
        Ok(())
    }

    fn read_bit(&mut self) -> OneWireResult<bool, Self::BusError> {
        self.check_idle()?;
        self.after_slot(PowerTrigger::AfterNextBit);
        Ok(true)
    }

    fn speed(&self) -> BusSpeed {
        self.speed
    }

    fn set_speed(&mut self, speed: BusSpeed) -> OneWireResult<(), Self::BusError> {
        self.speed = speed;
        Ok(())
    }

    fn can_deliver_power(&self) -> bool {
        self.power_capable
    }

    fn set_power_duration(&mut self, duration: PowerDuration) -> OneWireResult<(), Self::BusError> {
        if !self.power_capable {
            return Err(OneWireError::Unimplemented);
        }
        self.duration = duration;
        Ok(())
    }

    fn start_power_delivery(&mut self, trigger: PowerTrigger) -> OneWireResult<(), Self::BusError> {
        if !self.power_capable {
            return Err(OneWireError::Unimplemented);
        }
        self.check_idle()?;
        self.power = match trigger {
            PowerTrigger::Now => Power::Active,
            trigger => Power::Armed(trigger),
        };
        Ok(())
    }

    fn set_power_normal(&mut self) -> OneWireResult<(), Self::BusError> {
        self.power = Power::Normal;
        Ok(())
    }
}
