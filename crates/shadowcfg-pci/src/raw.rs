use std::fmt;

use crate::error::{ConfigSpaceError, Result};

/// Size of the conventional (legacy) PCI configuration space.
pub const PCI_CONFIG_SPACE_SIZE: usize = 256;
/// Size of the PCI Express extended configuration space.
pub const PCIE_CONFIG_SPACE_SIZE: usize = 4096;
/// Size of the type 0 header; capabilities may not live below this offset.
pub const PCI_HEADER_SIZE: usize = 0x40;

/// One captured configuration space, exactly as read from the donor.
///
/// The bytes are never mutated after construction. Reads are bounds-checked and return `None`
/// past the end of the capture rather than panicking, since captures may be truncated.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RawConfigSpace {
    bytes: Box<[u8]>,
}

impl RawConfigSpace {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > PCIE_CONFIG_SPACE_SIZE {
            return Err(ConfigSpaceError::BufferTooLong {
                len: bytes.len(),
                max: PCIE_CONFIG_SPACE_SIZE,
            });
        }
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    /// Parses a plain hex dump (`"86800c0a..."`), ignoring any ASCII whitespace.
    ///
    /// This is the format produced by the host-side collection step when it serializes the
    /// capture for transport.
    pub fn from_hex(text: &str) -> Result<Self> {
        let digits: Vec<u8> = text
            .bytes()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        if digits.len() % 2 != 0 {
            return Err(ConfigSpaceError::InvalidHex("odd number of hex digits"));
        }

        let mut bytes = Vec::with_capacity(digits.len() / 2);
        for pair in digits.chunks_exact(2) {
            let hi = hex_nibble(pair[0]).ok_or(ConfigSpaceError::InvalidHex("non-hex digit"))?;
            let lo = hex_nibble(pair[1]).ok_or(ConfigSpaceError::InvalidHex("non-hex digit"))?;
            bytes.push((hi << 4) | lo);
        }
        Self::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the capture extends into PCI Express extended configuration space.
    pub fn is_extended(&self) -> bool {
        self.bytes.len() > PCI_CONFIG_SPACE_SIZE
    }

    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let end = offset.checked_add(2)?;
        let b = self.bytes.get(offset..end)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let end = offset.checked_add(4)?;
        let b = self.bytes.get(offset..end)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl fmt::Debug for RawConfigSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConfigSpace")
            .field("len", &self.bytes.len())
            .field("vendor_id", &self.read_u16(0x00))
            .field("device_id", &self.read_u16(0x02))
            .finish()
    }
}

impl AsRef<[u8]> for RawConfigSpace {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
