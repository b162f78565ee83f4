/// One wire communication error type.
#[derive(Debug, PartialEq, Eq)]
pub enum OneWireError<E> {
    /// Encapsulates the error type from the underlying hardware.
    Other(E),
    /// Indicates that no device is present on the bus.
    NoDevicePresent,
    /// Indicates that the bus is busy, which may happen while a strong pull-up is still
    /// delivering power, or if a device is already communicating.
    BusInUse,
    /// Indicates that a short circuit was detected on the bus.
    ShortCircuit,
    /// Indicates that the operation is not implemented by the bus master,
    /// such as power delivery on a master without a strong pull-up.
    Unimplemented,
    /// Computed CRC of the ROM is invalid.
    InvalidRomCrc,
    /// Computed CRC of a data transfer is invalid.
    InvalidCrc,
    /// The bus is running at a speed the requested operation does not support.
    BusInvalidSpeed,
}

impl<E> From<E> for OneWireError<E> {
    fn from(other: E) -> Self {
        Self::Other(other)
    }
}
