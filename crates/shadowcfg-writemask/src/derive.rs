use shadowcfg_pci::header::{PCI_BAR0_OFFSET, PCI_BAR_COUNT, PCI_COMMAND_OFFSET, PCI_STATUS_OFFSET};
use shadowcfg_pci::{CapabilityChain, ConfigSpaceHeader, ConfigSpaceModel};

use crate::bar::{bar_mask, BarProbes};
use crate::mask::WriteMask;
use crate::policy::{capability_fields, COMMAND_WRITABLE, IDENTITY_FIELDS, STATUS_WRITABLE};

/// Mask under construction. Each byte is decided by the first rule that claims it.
struct MaskBuilder {
    bits: Vec<u8>,
    claimed: Vec<bool>,
}

impl MaskBuilder {
    fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len],
            claimed: vec![false; len],
        }
    }

    /// Claims `width` bytes at `offset` with the little-endian `writable` pattern. Bytes already
    /// claimed, or past the end of the capture, are left alone.
    fn apply(&mut self, offset: usize, width: usize, writable: u32) {
        for i in 0..width.min(4) {
            let at = offset + i;
            let Some(claimed) = self.claimed.get_mut(at) else {
                break;
            };
            if *claimed {
                continue;
            }
            *claimed = true;
            self.bits[at] = (writable >> (8 * i)) as u8;
        }
    }

    fn fix(&mut self, offset: usize, len: usize) {
        let end = offset.saturating_add(len).min(self.claimed.len());
        for at in offset.min(end)..end {
            self.claimed[at] = true;
        }
    }

    fn finish(self) -> WriteMask {
        WriteMask::from_bytes(self.bits)
    }
}

/// Derives a [`WriteMask`] from a parsed header and its capability chain.
///
/// Rules run in priority order: identity registers, command, status, BARs, capability registers.
/// Everything no rule makes writable stays fixed, including unknown capabilities and reserved
/// header bytes. The result depends only on the inputs.
#[derive(Debug, Clone, Default)]
pub struct WriteMaskDeriver {
    probes: BarProbes,
}

impl WriteMaskDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bar_probes(probes: BarProbes) -> Self {
        Self { probes }
    }

    pub fn bar_probes(&self) -> &BarProbes {
        &self.probes
    }

    /// Derives a mask of `len` bytes, where `len` is the length of the capture `header` and
    /// `chain` were parsed from.
    pub fn derive(
        &self,
        len: usize,
        header: &ConfigSpaceHeader,
        chain: &CapabilityChain,
    ) -> WriteMask {
        let mut mask = MaskBuilder::new(len);

        for &(offset, width, _) in IDENTITY_FIELDS {
            mask.fix(offset, width);
        }

        mask.apply(PCI_COMMAND_OFFSET, 2, u32::from(COMMAND_WRITABLE));
        mask.apply(PCI_STATUS_OFFSET, 2, u32::from(STATUS_WRITABLE));

        for layout in header.bar_layout() {
            let bar = bar_mask(&layout, &self.probes);
            let offset = layout.config_offset();
            mask.apply(offset, 4, bar.low);
            if let Some(high) = bar.high {
                mask.apply(offset + 4, 4, high);
            }
        }
        mask.fix(PCI_BAR0_OFFSET, PCI_BAR_COUNT * 4);

        for cap in chain {
            let base = usize::from(cap.offset);
            mask.fix(base, usize::from(cap.header_len()));
            for field in capability_fields(cap) {
                mask.apply(
                    base + usize::from(field.offset),
                    usize::from(field.width),
                    field.writable,
                );
            }
            mask.fix(base, usize::from(cap.len));
        }

        let mask = mask.finish();
        tracing::debug!(
            len = mask.len(),
            writable_bits = mask.writable_bits(),
            capabilities = chain.len(),
            "derived write mask"
        );
        mask
    }

    pub fn derive_model(&self, model: &ConfigSpaceModel) -> WriteMask {
        self.derive(model.raw().len(), model.header(), model.capabilities())
    }
}

/// Derives the write mask for a parsed capture without BAR probe data.
pub fn derive_write_mask(model: &ConfigSpaceModel) -> WriteMask {
    WriteMaskDeriver::new().derive_model(model)
}
