use std::str::FromStr;

use shadowcfg_pci::header::PCI_BAR_COUNT;
use shadowcfg_pci::BarLayout;

use crate::error::{Result, WriteMaskError};

const MIN_IO_BAR_SIZE: u64 = 4;
const MIN_MEMORY_BAR_SIZE: u64 = 16;

/// Readbacks from the donor's BAR sizing probe, one slot per BAR register.
///
/// Each value is what the register returned after all-ones was written to it. When a slot is
/// empty the region size is inferred from the captured base address instead.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BarProbes([Option<u32>; PCI_BAR_COUNT]);

impl BarProbes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, index: usize, readback: u32) -> Result<()> {
        let slot = self
            .0
            .get_mut(index)
            .ok_or(WriteMaskError::BarIndexOutOfRange { index })?;
        *slot = Some(readback);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.0.get(index).copied().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Collects parsed `INDEX=READBACK` assignments; a later assignment to the same slot wins.
    pub fn from_assignments(assignments: impl IntoIterator<Item = BarProbe>) -> Result<Self> {
        let mut probes = Self::new();
        for probe in assignments {
            probes.set(probe.index, probe.readback)?;
        }
        Ok(probes)
    }
}

/// One `INDEX=READBACK` assignment, e.g. `0=0xfffff000`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BarProbe {
    pub index: usize,
    pub readback: u32,
}

impl FromStr for BarProbe {
    type Err = WriteMaskError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason| WriteMaskError::InvalidBarProbe {
            input: s.to_string(),
            reason,
        };
        let (index, value) = s.split_once('=').ok_or_else(|| invalid("expected INDEX=VALUE"))?;
        let index: usize = index
            .trim()
            .parse()
            .map_err(|_| invalid("BAR index is not a number"))?;
        if index >= PCI_BAR_COUNT {
            return Err(WriteMaskError::BarIndexOutOfRange { index });
        }
        let value = value.trim();
        let readback = match value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
        {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => value.parse(),
        }
        .map_err(|_| invalid("readback is not a 32-bit number"))?;
        Ok(Self { index, readback })
    }
}

/// Writable bits for one logical BAR: the low dword and, for 64-bit BARs, the upper dword.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BarMask {
    pub index: u8,
    pub low: u32,
    pub high: Option<u32>,
    /// Decoded region size, or `None` for an unimplemented or invalid BAR.
    pub size: Option<u64>,
}

impl BarMask {
    fn fixed(layout: &BarLayout) -> Self {
        Self {
            index: layout.index(),
            low: 0,
            high: matches!(layout, BarLayout::Memory64 { .. }).then_some(0),
            size: None,
        }
    }
}

/// Applies the sizing rule to one logical BAR.
///
/// With region size `S`, address bits below `log2(S)` are hard-wired and fixed; every bit at or
/// above `log2(S)` is writable. The type/prefetch flag bits are always below `log2(S)`.
pub fn bar_mask(layout: &BarLayout, probes: &BarProbes) -> BarMask {
    let index = usize::from(layout.index());
    let (address, min_size) = match *layout {
        BarLayout::Invalid { .. } => return BarMask::fixed(layout),
        BarLayout::Io { base, .. } => {
            let address = match probes.get(index) {
                Some(readback) => u64::from(readback & !0x3),
                None => u64::from(base),
            };
            (address, MIN_IO_BAR_SIZE)
        }
        BarLayout::Memory32 { base, .. } => {
            let address = match probes.get(index) {
                Some(readback) => u64::from(readback & !0xF),
                None => u64::from(base),
            };
            (address, MIN_MEMORY_BAR_SIZE)
        }
        BarLayout::Memory64 { base, .. } => {
            let address = match probes.get(index) {
                Some(low) => {
                    // Regions below 4 GiB read back all-ones in the upper half.
                    let high = probes.get(index + 1).unwrap_or(u32::MAX);
                    (u64::from(high) << 32) | u64::from(low & !0xF)
                }
                None => base,
            };
            (address, MIN_MEMORY_BAR_SIZE)
        }
    };

    if address == 0 {
        tracing::debug!(bar = index, "BAR unimplemented; keeping it fixed");
        return BarMask::fixed(layout);
    }

    let size = (1u64 << address.trailing_zeros()).max(min_size);
    let writable = !(size - 1);
    tracing::debug!(bar = index, size, probed = probes.get(index).is_some(), "sized BAR");

    match layout {
        BarLayout::Memory64 { .. } => BarMask {
            index: layout.index(),
            low: writable as u32,
            high: Some((writable >> 32) as u32),
            size: Some(size),
        },
        _ => BarMask {
            index: layout.index(),
            low: writable as u32,
            high: None,
            size: Some(size),
        },
    }
}
