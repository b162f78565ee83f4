//! Memory bank descriptors of the supported device families.
use crate::descriptor::{
    AddressEcho, AddressWidth, BankKind, Capabilities, ControlLayout, CopyAuthorization,
    LockScheme, MemoryBankDescriptor, ScratchpadSpec, SecureSpec, WriteMethod,
};

const READ_MEMORY: u8 = 0xf0;
const WRITE_SCRATCHPAD: u8 = 0x0f;
const READ_SCRATCHPAD: u8 = 0xaa;
const COPY_SCRATCHPAD: u8 = 0x55;

const EIGHT_BYTE_SCRATCHPAD: ScratchpadSpec = ScratchpadSpec {
    size: 8,
    write_command: WRITE_SCRATCHPAD,
    read_command: READ_SCRATCHPAD,
    copy_command: COPY_SCRATCHPAD,
    echo: AddressEcho::TargetAddress,
    copy: CopyAuthorization::EchoedAddress,
    copy_completion: true,
};

const EEPROM: Capabilities = Capabilities::new()
    .with_general_purpose(true)
    .with_read_write(true)
    .with_non_volatile(true)
    .with_needs_power_delivery(true);

/// 256-bit 1-Wire EEPROM.
pub mod ds2430a {
    use super::*;

    /// Family code.
    pub const FAMILY_CODE: u8 = 0x14;

    /// 32-byte EEPROM written through a 32-byte scratchpad.
    pub const DATA_MEMORY: MemoryBankDescriptor = MemoryBankDescriptor {
        name: "Main Memory",
        kind: BankKind::Paged,
        start_address: 0x00,
        size: 32,
        page_length: 32,
        capabilities: EEPROM,
        extra_info_length: 0,
        extra_info_description: "",
        address_width: AddressWidth::One,
        read_command: READ_MEMORY,
        read_page_crc_command: None,
        retry_stale_reads: true,
        write: WriteMethod::Scratchpad(ScratchpadSpec {
            size: 32,
            echo: AddressEcho::None,
            copy: CopyAuthorization::ValidationKey(VALIDATION_KEY),
            copy_completion: false,
            ..EIGHT_BYTE_SCRATCHPAD
        }),
        lock: LockScheme::None,
        secure: None,
        write_verification: false,
    };

    /// 8-byte one-time-programmable application register.
    pub const APPLICATION_REGISTER: MemoryBankDescriptor = MemoryBankDescriptor {
        name: "Application Register",
        kind: BankKind::Otp,
        start_address: 0x00,
        size: 8,
        page_length: 8,
        capabilities: EEPROM.with_general_purpose(false).with_can_lock(true),
        extra_info_length: 0,
        extra_info_description: "",
        address_width: AddressWidth::One,
        read_command: 0xc3,
        read_page_crc_command: None,
        retry_stale_reads: false,
        write: WriteMethod::Direct { command: 0x99 },
        lock: LockScheme::CopyAndLock {
            command: 0x5a,
            key: VALIDATION_KEY,
            status_command: 0x66,
        },
        secure: None,
        write_verification: true,
    };

    const VALIDATION_KEY: u8 = 0xa5;

    /// Memory banks of the device.
    pub const BANKS: [MemoryBankDescriptor; 2] = [DATA_MEMORY, APPLICATION_REGISTER];
}

/// 1024-bit 1-Wire EEPROM.
pub mod ds2431 {
    use super::*;

    /// Family code.
    pub const FAMILY_CODE: u8 = 0x2d;

    /// Device address of the page protection bytes.
    pub const CONTROL_ROW: u16 = 0x80;

    /// Four 32-byte pages, each lockable or switchable to write-once mode.
    pub const MAIN_MEMORY: MemoryBankDescriptor = MemoryBankDescriptor {
        name: "Main Memory",
        kind: BankKind::Otp,
        start_address: 0x0000,
        size: 128,
        page_length: 32,
        capabilities: EEPROM.with_can_lock(true),
        extra_info_length: 0,
        extra_info_description: "",
        address_width: AddressWidth::Two,
        read_command: READ_MEMORY,
        read_page_crc_command: None,
        retry_stale_reads: true,
        write: WriteMethod::Scratchpad(EIGHT_BYTE_SCRATCHPAD),
        lock: LockScheme::ControlRow {
            address: CONTROL_ROW,
            layout: ControlLayout::PerPage,
        },
        secure: None,
        write_verification: true,
    };

    /// Protection, copy protection, factory and user bytes.
    pub const REGISTERS: MemoryBankDescriptor = MemoryBankDescriptor {
        name: "Register control",
        kind: BankKind::Plain,
        start_address: CONTROL_ROW,
        size: 8,
        page_length: 8,
        capabilities: EEPROM.with_general_purpose(false),
        write_verification: false,
        retry_stale_reads: false,
        lock: LockScheme::None,
        ..MAIN_MEMORY
    };

    /// Memory banks of the device.
    pub const BANKS: [MemoryBankDescriptor; 2] = [MAIN_MEMORY, REGISTERS];
}

/// 1024-bit 1-Wire EEPROM with SHA-1 engine.
pub mod ds1961s {
    use super::*;

    /// Family code.
    pub const FAMILY_CODE: u8 = 0x33;

    /// Device address of the control row.
    pub const CONTROL_ROW: u16 = 0x88;

    /// Read Authenticated Page command.
    pub const READ_AUTHENTICATED_PAGE: u8 = 0xa5;

    /// SHA-1 command set.
    pub const SECURE: SecureSpec = SecureSpec {
        load_first_secret: 0x5a,
        compute_next_secret: 0x33,
        secret_address: 0x80,
    };

    /// Four 32-byte pages. Writes are authorized with a MAC, page reads return one.
    pub const MAIN_MEMORY: MemoryBankDescriptor = MemoryBankDescriptor {
        name: "Main Memory",
        kind: BankKind::Otp,
        start_address: 0x0000,
        size: 128,
        page_length: 32,
        capabilities: EEPROM
            .with_can_lock(true)
            .with_page_auto_crc(true)
            .with_extra_info(true)
            .with_secret_protected(true),
        extra_info_length: 20,
        extra_info_description: "The MAC for the SHA Engine",
        address_width: AddressWidth::Two,
        read_command: READ_MEMORY,
        read_page_crc_command: Some(READ_AUTHENTICATED_PAGE),
        retry_stale_reads: false,
        write: WriteMethod::Scratchpad(ScratchpadSpec {
            copy: CopyAuthorization::Mac,
            ..EIGHT_BYTE_SCRATCHPAD
        }),
        lock: LockScheme::ControlRow {
            address: CONTROL_ROW,
            layout: ControlLayout::Shared,
        },
        secure: Some(SECURE),
        write_verification: false,
    };

    /// Secret (reads back as `0xFF`), control bytes and registration number.
    pub const REGISTERS: MemoryBankDescriptor = MemoryBankDescriptor {
        name: "Secret, control and ROM",
        kind: BankKind::Plain,
        start_address: 0x80,
        size: 24,
        page_length: 8,
        capabilities: Capabilities::new()
            .with_read_only(true)
            .with_non_volatile(true),
        extra_info_length: 0,
        extra_info_description: "",
        read_page_crc_command: None,
        write: WriteMethod::ReadOnly,
        lock: LockScheme::None,
        secure: None,
        ..MAIN_MEMORY
    };

    /// Memory banks of the device.
    pub const BANKS: [MemoryBankDescriptor; 2] = [MAIN_MEMORY, REGISTERS];
}

/// Memory banks of the device family `family_code`, if supported.
pub fn banks(family_code: u8) -> Option<&'static [MemoryBankDescriptor]> {
    match family_code {
        ds2430a::FAMILY_CODE => Some(&ds2430a::BANKS),
        ds2431::FAMILY_CODE => Some(&ds2431::BANKS),
        ds1961s::FAMILY_CODE => Some(&ds1961s::BANKS),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry() {
        assert_eq!(ds2431::MAIN_MEMORY.page_count(), 4);
        assert_eq!(ds2431::MAIN_MEMORY.page_address(3), 0x60);
        assert_eq!(ds2431::REGISTERS.page_count(), 1);
        assert_eq!(ds1961s::REGISTERS.page_count(), 3);
        assert_eq!(ds2430a::APPLICATION_REGISTER.page_count(), 1);
        assert_eq!(ds1961s::REGISTERS.packet_seed(1), 0x11);
    }

    #[test]
    fn lookup() {
        assert_eq!(banks(0x2d).map(|b| b.len()), Some(2));
        assert_eq!(banks(0x33).map(|b| b[0].name), Some("Main Memory"));
        assert!(banks(0x28).is_none());
    }

    #[test]
    fn secure_bank() {
        let caps = ds1961s::MAIN_MEMORY.capabilities;
        assert!(caps.secret_protected() && caps.page_auto_crc());
        assert!(!ds2431::MAIN_MEMORY.capabilities.secret_protected());
        assert!(ds1961s::REGISTERS.capabilities.read_only());
    }
}
