use crate::descriptor::ControlLayout;
use heapless::Vec;

/// Length of a control row.
pub const CONTROL_ROW_LEN: usize = 8;

/// Pages covered by a control row.
pub const CONTROL_PAGES: usize = 4;

/// Programming state of a memory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protection {
    /// Freely writable.
    #[default]
    Open,
    /// Writes are refused.
    WriteProtected,
    /// Written bits can only be cleared (EPROM mode).
    WriteOnce,
}

const PROTECT: u8 = 0x55;
const EPROM: u8 = 0xaa;

const fn active(byte: u8) -> bool {
    byte == PROTECT || byte == EPROM
}

const SECRET_PROTECT: usize = 0;
const SHARED_WRITE_PROTECT: usize = 1;
const SHARED_EPROM: usize = 4;
const SHARED_EPROM_PAGE: usize = 1;

/// Typed view of a control row.
///
/// Protection bytes are programmed once: a protected page never goes back to
/// [`Protection::Open`], so only tightening transitions are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRegisters {
    layout: ControlLayout,
    raw: [u8; CONTROL_ROW_LEN],
    bytes: [u8; CONTROL_ROW_LEN],
}

impl ControlRegisters {
    /// Decode a control row as read from the device.
    pub fn decode(layout: ControlLayout, raw: [u8; CONTROL_ROW_LEN]) -> Self {
        Self {
            layout,
            raw,
            bytes: raw,
        }
    }

    /// Protection of `page`. Pages past the control row are reported open.
    pub fn page(&self, page: usize) -> Protection {
        if page >= CONTROL_PAGES {
            return Protection::Open;
        }
        match self.layout {
            ControlLayout::PerPage => match self.bytes[page] {
                PROTECT => Protection::WriteProtected,
                EPROM => Protection::WriteOnce,
                _ => Protection::Open,
            },
            ControlLayout::Shared => {
                if active(self.bytes[SHARED_WRITE_PROTECT]) {
                    Protection::WriteProtected
                } else if page == SHARED_EPROM_PAGE && active(self.bytes[SHARED_EPROM]) {
                    Protection::WriteOnce
                } else {
                    Protection::Open
                }
            }
        }
    }

    /// Whether the device secret is write protected.
    pub fn secret_protected(&self) -> bool {
        match self.layout {
            ControlLayout::PerPage => false,
            ControlLayout::Shared => active(self.bytes[SECRET_PROTECT]),
        }
    }

    /// Request `protection` for `page`.
    ///
    /// With the shared layout write protection applies to every page, and only
    /// page 1 has a write-once mode.
    ///
    /// # Returns
    /// `false` if the device cannot represent the transition, e.g. unprotecting a page
    /// or turning a write-once page of the per-page layout into a protected one.
    pub fn set_page(&mut self, page: usize, protection: Protection) -> bool {
        if page >= CONTROL_PAGES {
            return false;
        }
        let current = self.page(page);
        if current == protection {
            return true;
        }
        match (self.layout, protection) {
            (_, Protection::Open) => false,
            // a programmed byte cannot be reprogrammed
            (ControlLayout::PerPage, _) if current != Protection::Open => false,
            (ControlLayout::PerPage, Protection::WriteProtected) => {
                self.bytes[page] = PROTECT;
                true
            }
            (ControlLayout::PerPage, Protection::WriteOnce) => {
                self.bytes[page] = EPROM;
                true
            }
            (ControlLayout::Shared, Protection::WriteProtected) => {
                self.bytes[SHARED_WRITE_PROTECT] = EPROM;
                true
            }
            (ControlLayout::Shared, Protection::WriteOnce)
                if page == SHARED_EPROM_PAGE && current == Protection::Open =>
            {
                self.bytes[SHARED_EPROM] = EPROM;
                true
            }
            (ControlLayout::Shared, Protection::WriteOnce) => false,
        }
    }

    /// Write protect the device secret.
    ///
    /// # Returns
    /// `false` if the layout has no secret protection byte.
    pub fn protect_secret(&mut self) -> bool {
        match self.layout {
            ControlLayout::PerPage => false,
            ControlLayout::Shared => {
                if !active(self.bytes[SECRET_PROTECT]) {
                    self.bytes[SECRET_PROTECT] = EPROM;
                }
                true
            }
        }
    }

    /// The control row with all requested changes applied.
    pub fn encode(&self) -> [u8; CONTROL_ROW_LEN] {
        self.bytes
    }

    /// Minimal write set turning the row read from the device into [`Self::encode`].
    ///
    /// # Returns
    /// `(offset, value)` pairs in ascending offset order.
    pub fn diff(&self) -> Vec<(u8, u8), CONTROL_ROW_LEN> {
        self.raw
            .iter()
            .zip(self.bytes.iter())
            .enumerate()
            .filter(|(_, (old, new))| old != new)
            .map(|(offset, (_, &new))| (offset as u8, new))
            .collect()
    }
}
