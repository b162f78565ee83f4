#![allow(dead_code)]
use embedded_hal_mock::eh1::delay::NoopDelay;
use onewire_emu::{EmulatedBus, Slave};
use onewire_memory::DeviceSession;

pub const SERIAL: [u8; 6] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

pub type Session<S> = DeviceSession<EmulatedBus<S>, NoopDelay>;

pub fn session<S: Slave>(device: S) -> Session<S> {
    on_bus(EmulatedBus::new(device))
}

pub fn on_bus<S: Slave>(bus: EmulatedBus<S>) -> Session<S> {
    let rom = bus.device().rom();
    DeviceSession::new(bus, NoopDelay::new(), rom).expect("emulated ROM codes are valid")
}

pub fn count(commands: &[u8], command: u8) -> usize {
    commands.iter().filter(|&&c| c == command).count()
}
