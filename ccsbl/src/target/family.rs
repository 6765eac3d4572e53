//! Device families and their flash geometry.
//!
//! The family tag fixes the flash page size and page count, which in turn
//! constrain every address and length the protocol engine will accept.

use crate::error::{Error, Result};
use std::fmt;

/// Supported CC13xx/CC26xx device families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// CC13x0 sub-GHz wireless MCUs.
    Cc13x0,
    /// CC13x2 sub-GHz wireless MCUs.
    Cc13x2,
    /// CC26x0 2.4 GHz wireless MCUs.
    Cc26x0,
    /// CC26x2 2.4 GHz wireless MCUs.
    Cc26x2,
}

impl DeviceFamily {
    /// Flash page size in bytes; this is the erase granularity.
    pub fn page_size(self) -> u32 {
        match self {
            Self::Cc13x0 | Self::Cc26x0 => 4096,
            Self::Cc13x2 | Self::Cc26x2 => 8192,
        }
    }

    /// Number of flash pages on the device.
    pub fn page_count(self) -> u32 {
        match self {
            Self::Cc13x0 | Self::Cc26x0 => 32,
            Self::Cc13x2 | Self::Cc26x2 => 44,
        }
    }

    /// First flash address.
    pub fn flash_base(self) -> u32 {
        0x0000_0000
    }

    /// One past the last flash address.
    pub fn flash_end(self) -> u32 {
        self.flash_base() + self.page_size() * self.page_count()
    }

    /// Whether `[start, start + count)` lies entirely within device flash.
    pub fn address_in_flash(self, start: u32, count: u32) -> bool {
        start >= self.flash_base()
            && start
                .checked_add(count)
                .is_some_and(|end| end <= self.flash_end())
    }

    /// Flash page containing `address`.
    pub fn address_to_page(self, address: u32) -> u32 {
        (address - self.flash_base()) / self.page_size()
    }

    /// Look up a family by its tag (`cc13x0`, `cc13x2`, `cc26x0`, `cc26x2`).
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "cc13x0" => Ok(Self::Cc13x0),
            "cc13x2" => Ok(Self::Cc13x2),
            "cc26x0" => Ok(Self::Cc26x0),
            "cc26x2" => Ok(Self::Cc26x2),
            _ => Err(Error::BadFamily(name.to_string())),
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cc13x0 => write!(f, "cc13x0"),
            Self::Cc13x2 => write!(f, "cc13x2"),
            Self::Cc26x0 => write!(f, "cc26x0"),
            Self::Cc26x2 => write!(f, "cc26x2"),
        }
    }
}
