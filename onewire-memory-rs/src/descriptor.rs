use bitfield_struct::bitfield;

/// Capability profile of a memory bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankKind {
    /// Byte-addressed reads and writes.
    Plain,
    /// Plain, plus page reads and data packets.
    Paged,
    /// Paged, plus page locking.
    Otp,
}

/// Static capabilities of a memory bank.
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct Capabilities {
    /// Free for application data.
    pub general_purpose: bool,
    /// Can be read and written.
    pub read_write: bool,
    /// Bits can only be cleared once written.
    pub write_once: bool,
    /// Can only be read.
    pub read_only: bool,
    /// Keeps its contents without power.
    pub non_volatile: bool,
    /// Writes need a strong pull-up.
    pub needs_power_delivery: bool,
    /// The device can append a CRC-16 to page reads.
    pub page_auto_crc: bool,
    /// Page reads carry extra information.
    pub extra_info: bool,
    /// Pages can be locked.
    pub can_lock: bool,
    /// Pages can be redirected.
    pub can_redirect: bool,
    /// Writes and page reads are authenticated with the device secret.
    pub secret_protected: bool,
    #[bits(5)]
    reserved: u8,
}

/// Number of address bytes following a memory command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidth {
    /// One byte address.
    One,
    /// Two byte address, least significant byte first.
    Two,
}

impl AddressWidth {
    pub(crate) fn encode(self, address: u16) -> ([u8; 2], usize) {
        match self {
            AddressWidth::One => ([address as u8, 0], 1),
            AddressWidth::Two => (address.to_le_bytes(), 2),
        }
    }
}

/// What the device returns after the data of a Read Scratchpad command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressEcho {
    /// Data only. Read Scratchpad takes a starting address like a memory read.
    None,
    /// Target address, ending offset/status byte and data, followed by a CRC-16.
    TargetAddress,
}

/// Authorization sent after the Copy Scratchpad command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyAuthorization {
    /// A fixed validation key.
    ValidationKey(u8),
    /// The target address and E/S byte echoed by the scratchpad.
    EchoedAddress,
    /// The echoed address followed by a MAC computed with the device secret.
    Mac,
}

/// Scratchpad geometry and commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchpadSpec {
    /// Scratchpad length. Writes are committed one row of this size at a time.
    pub size: usize,
    /// Write Scratchpad command.
    pub write_command: u8,
    /// Read Scratchpad command.
    pub read_command: u8,
    /// Copy Scratchpad command.
    pub copy_command: u8,
    /// Response format of Read Scratchpad.
    pub echo: AddressEcho,
    /// Authorization of Copy Scratchpad.
    pub copy: CopyAuthorization,
    /// The device answers a successful copy with `0xAA`.
    pub copy_completion: bool,
}

/// How data reaches the memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    /// Memory cannot be written.
    ReadOnly,
    /// Staged in the scratchpad, verified, then copied.
    Scratchpad(ScratchpadSpec),
    /// Written directly following the command and address.
    Direct {
        /// Write command.
        command: u8,
    },
}

/// Arrangement of protection bytes in a control row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLayout {
    /// One protection byte per page at the start of the row: `0x55` write
    /// protects the page, `0xAA` puts it in write-once mode.
    PerPage,
    /// Byte 0 protects the secret, byte 1 write protects every page and byte 4 puts
    /// page 1 in write-once mode. `0x55` and `0xAA` both activate a byte.
    Shared,
}

/// Where page protection lives and how it is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScheme {
    /// Pages cannot be locked.
    None,
    /// Protection bytes in a control row, written through the scratchpad.
    ControlRow {
        /// Device address of the control row.
        address: u16,
        /// Layout of the protection bytes.
        layout: ControlLayout,
    },
    /// A dedicated command locking the whole bank.
    CopyAndLock {
        /// Lock command.
        command: u8,
        /// Validation key following the command.
        key: u8,
        /// Read Status command. Bit 0 of the status byte is cleared once locked.
        status_command: u8,
    },
}

/// SHA-1 command set of a secure device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureSpec {
    /// Load First Secret command.
    pub load_first_secret: u8,
    /// Compute Next Secret command.
    pub compute_next_secret: u8,
    /// Scratchpad target address that Load First Secret copies to the secret.
    pub secret_address: u16,
}

/// Static description of a memory bank of a device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBankDescriptor {
    /// Human readable bank name.
    pub name: &'static str,
    /// Capability profile.
    pub kind: BankKind,
    /// Device address of the first byte.
    pub start_address: u16,
    /// Bank size in bytes.
    pub size: usize,
    /// Page length in bytes.
    pub page_length: usize,
    /// Capability flags.
    pub capabilities: Capabilities,
    /// Length of the extra information returned with page reads.
    pub extra_info_length: usize,
    /// What the extra information is.
    pub extra_info_description: &'static str,
    /// Address bytes after memory commands.
    pub address_width: AddressWidth,
    /// Read Memory command.
    pub read_command: u8,
    /// Command returning a page followed by a device computed CRC-16.
    pub read_page_crc_command: Option<u8>,
    /// Retry reads returning only `0xFF`, which EEPROM parts may produce right after a write.
    pub retry_stale_reads: bool,
    /// Write method.
    pub write: WriteMethod,
    /// Page protection.
    pub lock: LockScheme,
    /// SHA-1 command set, for secret protected banks.
    pub secure: Option<SecureSpec>,
    /// Read memory back after every write.
    pub write_verification: bool,
}

impl MemoryBankDescriptor {
    /// Number of pages in the bank.
    pub const fn page_count(&self) -> usize {
        self.size / self.page_length
    }

    /// Device address of the first byte of `page`.
    pub const fn page_address(&self, page: usize) -> u16 {
        self.start_address + (page * self.page_length) as u16
    }

    /// Page number seeding the CRC-16 of data packets stored in `page`.
    pub const fn packet_seed(&self, page: usize) -> u16 {
        (self.start_address as usize / self.page_length + page) as u16
    }
}
