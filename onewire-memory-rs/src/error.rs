use crate::packet::PacketError;
use crate::sha::MacMismatch;
use embedded_onewire::OneWireError;

/// How a caller may react to a [`MemoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bus, framing or commit fault. The operation may be retried, preferably with backoff.
    Transient,
    /// Authentication failure, capability misuse or configuration error. Retrying
    /// cannot succeed and, for authentication failures, must not be attempted with
    /// the same challenge.
    Fatal,
}

/// Memory access error type.
#[derive(Debug, PartialEq, Eq)]
pub enum MemoryError<E> {
    /// Error reported by the 1-Wire transport.
    Bus(OneWireError<E>),
    /// The device did not answer the Match ROM sequence.
    DeviceSelectFailed,
    /// No presence pulse was detected.
    DeviceNotPresent,
    /// The length byte of a data packet does not fit the page.
    InvalidPacketLength,
    /// A CRC-16 check over a packet or a device response failed.
    InvalidCrc16,
    /// The scratchpad did not hold the data that was written to it.
    ScratchpadVerifyFailed,
    /// The target address or ending offset echoed by the scratchpad was wrong.
    AddressMismatch,
    /// The device did not acknowledge a copy, lock or secret operation.
    CopyFailed,
    /// Memory read back after a write differs from the data written. The page may be locked.
    VerifyFailed,
    /// The MAC returned by the device does not match the one computed by the host.
    MacMismatch,
    /// CRC-16 over the page data of an authenticated read failed.
    FirstCrcFailed,
    /// CRC-16 over the MAC of an authenticated read failed.
    SecondCrcFailed,
    /// The session challenge was spent by an earlier authentication failure.
    ChallengeReused,
    /// The operation needs the device secret and the session does not know it.
    SecretUnknown,
    /// The memory bank does not support the operation.
    UnsupportedOperation,
    /// The address or page is outside the memory bank.
    OutOfRange,
    /// The target page is write protected.
    WriteProtected,
    /// The bank needs a strong pull-up and the bus master cannot deliver one.
    PowerDeliveryUnavailable,
    /// The ROM code failed its CRC-8 check.
    InvalidRom,
}

impl<E> MemoryError<E> {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        use MemoryError::*;
        match self {
            Bus(_)
            | DeviceSelectFailed
            | DeviceNotPresent
            | InvalidPacketLength
            | InvalidCrc16
            | ScratchpadVerifyFailed
            | AddressMismatch
            | CopyFailed
            | VerifyFailed => ErrorKind::Transient,
            MacMismatch | FirstCrcFailed | SecondCrcFailed | ChallengeReused | SecretUnknown
            | UnsupportedOperation | OutOfRange | WriteProtected | PowerDeliveryUnavailable
            | InvalidRom => ErrorKind::Fatal,
        }
    }

    /// Whether the error is [`ErrorKind::Transient`].
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Whether the error points at bus trouble, so the next operation has to
    /// re-check speed and presence before talking to the device.
    pub fn needs_recheck(&self) -> bool {
        self.is_transient()
            || matches!(
                self,
                MemoryError::FirstCrcFailed | MemoryError::SecondCrcFailed
            )
    }
}

impl<E> From<OneWireError<E>> for MemoryError<E> {
    fn from(value: OneWireError<E>) -> Self {
        match value {
            OneWireError::NoDevicePresent => Self::DeviceNotPresent,
            other => Self::Bus(other),
        }
    }
}

impl<E> From<PacketError> for MemoryError<E> {
    fn from(value: PacketError) -> Self {
        match value {
            PacketError::InvalidLength => Self::InvalidPacketLength,
            PacketError::InvalidCrc => Self::InvalidCrc16,
        }
    }
}

impl<E> From<MacMismatch> for MemoryError<E> {
    fn from(_: MacMismatch) -> Self {
        Self::MacMismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Error = MemoryError<()>;

    #[test]
    fn transport_and_commit_errors_are_transient() {
        for err in [
            Error::DeviceNotPresent,
            Error::InvalidCrc16,
            Error::ScratchpadVerifyFailed,
            Error::AddressMismatch,
            Error::Bus(OneWireError::Other(())),
        ] {
            assert!(err.is_transient(), "{err:?}");
            assert!(err.needs_recheck(), "{err:?}");
        }
    }

    #[test]
    fn authentication_errors_are_fatal() {
        for err in [
            Error::MacMismatch,
            Error::ChallengeReused,
            Error::FirstCrcFailed,
            Error::SecondCrcFailed,
            Error::UnsupportedOperation,
        ] {
            assert_eq!(err.kind(), ErrorKind::Fatal, "{err:?}");
        }
        assert!(Error::FirstCrcFailed.needs_recheck());
        assert!(!Error::MacMismatch.needs_recheck());
        assert!(!Error::OutOfRange.needs_recheck());
    }

    #[test]
    fn conversions() {
        assert!(matches!(
            Error::from(OneWireError::NoDevicePresent),
            MemoryError::DeviceNotPresent
        ));
        assert!(matches!(
            Error::from(OneWireError::ShortCircuit),
            MemoryError::Bus(OneWireError::ShortCircuit)
        ));
        assert!(matches!(
            Error::from(PacketError::InvalidCrc),
            MemoryError::InvalidCrc16
        ));
        assert!(matches!(Error::from(MacMismatch), MemoryError::MacMismatch));
    }
}
