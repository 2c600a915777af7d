use crate::capabilities::{
    decode_extended, decode_legacy, Capability, CapabilityKind, CapabilitySpace,
    PCI_EXT_CAP_OFFSET,
};
use crate::error::CapabilityError;
use crate::header::{BarLayout, ConfigSpaceHeader, PCI_CAP_PTR_OFFSET};
use crate::raw::{RawConfigSpace, PCI_CONFIG_SPACE_SIZE, PCI_HEADER_SIZE};

/// Capabilities in discovery order: the legacy list first, then the extended list.
///
/// Order is significant. When two records cover the same bytes, the one discovered first
/// decides the write-mask policy for them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityChain {
    caps: Vec<Capability>,
}

impl CapabilityChain {
    pub fn iter(&self) -> std::slice::Iter<'_, Capability> {
        self.caps.iter()
    }

    pub fn as_slice(&self) -> &[Capability] {
        &self.caps
    }

    pub fn len(&self) -> usize {
        self.caps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    pub fn find_id(&self, space: CapabilitySpace, id: u16) -> Option<&Capability> {
        self.caps.iter().find(|cap| cap.space == space && cap.id == id)
    }

    pub fn find(&self, pred: impl Fn(&CapabilityKind) -> bool) -> Option<&Capability> {
        self.caps.iter().find(|cap| pred(&cap.kind))
    }
}

impl<'a> IntoIterator for &'a CapabilityChain {
    type Item = &'a Capability;
    type IntoIter = std::slice::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.caps.iter()
    }
}

/// Result of walking both capability lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityWalk {
    pub chain: CapabilityChain,
    /// At most one anomaly per list, in the order the lists were walked.
    pub anomalies: Vec<CapabilityError>,
}

impl CapabilityWalk {
    pub fn is_truncated(&self) -> bool {
        !self.anomalies.is_empty()
    }

    pub fn cycle_detected(&self) -> bool {
        self.anomalies
            .iter()
            .any(|err| matches!(err, CapabilityError::CycleDetected { .. }))
    }
}

/// Walks the legacy and (when captured) extended capability lists.
///
/// Nothing is walked unless the status register advertises a capability list. Each list is
/// traversed with its own visited set; every step visits a fresh offset, so traversal of either
/// list takes at most one step per captured byte regardless of what the pointers contain.
pub fn walk_capabilities(raw: &RawConfigSpace, header: &ConfigSpaceHeader) -> CapabilityWalk {
    let mut walk = CapabilityWalk::default();
    if !header.capabilities_supported() {
        tracing::debug!("status register does not advertise a capability list");
        return walk;
    }

    if let Err(err) = walk_legacy(raw, header, &mut walk.chain.caps) {
        tracing::warn!(offset = err.offset(), "legacy capability walk stopped: {err}");
        walk.anomalies.push(err);
    }
    if let Err(err) = walk_extended(raw, &mut walk.chain.caps) {
        tracing::warn!(offset = err.offset(), "extended capability walk stopped: {err}");
        walk.anomalies.push(err);
    }

    tracing::debug!(
        capabilities = walk.chain.len(),
        truncated = walk.is_truncated(),
        "capability walk finished"
    );
    walk
}

fn walk_legacy(
    raw: &RawConfigSpace,
    header: &ConfigSpaceHeader,
    out: &mut Vec<Capability>,
) -> Result<(), CapabilityError> {
    let region_end = raw.len().min(PCI_CONFIG_SPACE_SIZE);
    let bars = header.bar_layout();
    let mut visited = [false; PCI_CONFIG_SPACE_SIZE];
    // The capability pointer register is the list head.
    visited[PCI_CAP_PTR_OFFSET] = true;

    let mut ptr = usize::from(header.capabilities_pointer() & !0x3);
    while ptr != 0 {
        if visited[ptr] {
            return Err(CapabilityError::CycleDetected { offset: ptr as u16 });
        }
        if ptr < PCI_HEADER_SIZE || ptr + 2 > region_end {
            return Err(CapabilityError::PointerOutOfRange { offset: ptr as u16 });
        }
        visited[ptr] = true;

        let cap = decode_legacy(raw, ptr)?;
        check_msix_bars(&cap, &bars)?;
        tracing::debug!(
            offset = ptr,
            id = cap.id,
            name = cap.name(),
            "found capability"
        );
        out.push(cap);

        ptr = usize::from(raw.read_u8(ptr + 1).unwrap_or(0) & !0x3);
    }
    Ok(())
}

/// The MSI-X table and PBA must live in implemented memory BARs. A BIR naming the upper half
/// of a 64-bit BAR has no layout entry of its own and counts as unimplemented.
fn check_msix_bars(cap: &Capability, bars: &[BarLayout]) -> Result<(), CapabilityError> {
    let CapabilityKind::MsiX(msix) = &cap.kind else {
        return Ok(());
    };
    let regions = [
        (
            msix.table.bir,
            "MSI-X table BIR names an I/O BAR",
            "MSI-X table BIR names an unimplemented BAR",
        ),
        (
            msix.pba.bir,
            "MSI-X PBA BIR names an I/O BAR",
            "MSI-X PBA BIR names an unimplemented BAR",
        ),
    ];
    for (bir, io, unimplemented) in regions {
        let reason = match bars.iter().find(|bar| bar.index() == bir) {
            Some(bar @ (BarLayout::Memory32 { .. } | BarLayout::Memory64 { .. }))
                if bar.base() != 0 =>
            {
                continue
            }
            Some(BarLayout::Io { .. }) => io,
            _ => unimplemented,
        };
        tracing::debug!(offset = cap.offset, bir, reason, "MSI-X BAR check failed");
        return Err(CapabilityError::Malformed {
            offset: cap.offset,
            reason,
        });
    }
    Ok(())
}

fn walk_extended(raw: &RawConfigSpace, out: &mut Vec<Capability>) -> Result<(), CapabilityError> {
    if !raw.is_extended() {
        return Ok(());
    }

    match raw.read_u32(PCI_EXT_CAP_OFFSET) {
        None | Some(0) | Some(0xFFFF_FFFF) => return Ok(()),
        Some(_) => {}
    }

    let mut visited = vec![false; raw.len()];
    let mut offset = PCI_EXT_CAP_OFFSET;
    loop {
        if visited.get(offset).copied().unwrap_or(false) {
            return Err(CapabilityError::CycleDetected {
                offset: offset as u16,
            });
        }
        if offset < PCI_EXT_CAP_OFFSET || offset + 4 > raw.len() {
            return Err(CapabilityError::PointerOutOfRange {
                offset: offset as u16,
            });
        }
        visited[offset] = true;

        let header = raw.read_u32(offset).unwrap_or(0);
        if header == 0 || header == 0xFFFF_FFFF {
            return Err(CapabilityError::Malformed {
                offset: offset as u16,
                reason: "empty extended capability header",
            });
        }

        let cap = decode_extended(raw, offset, header)?;
        tracing::debug!(
            offset,
            id = cap.id,
            version = cap.version,
            name = cap.name(),
            "found extended capability"
        );
        out.push(cap);

        let next = ((header >> 20) & 0xFFC) as usize;
        if next == 0 {
            return Ok(());
        }
        offset = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{PCI_CAP_ID_EXP, PCI_CAP_ID_MSIX, PCI_CAP_ID_PM};
    use crate::header::PCI_STATUS_OFFSET;

    fn capture(len: usize, f: impl FnOnce(&mut [u8])) -> (RawConfigSpace, ConfigSpaceHeader) {
        let mut bytes = vec![0u8; len];
        bytes[PCI_STATUS_OFFSET] = 0x10;
        f(&mut bytes);
        let raw = RawConfigSpace::new(bytes).unwrap();
        let header = ConfigSpaceHeader::parse(&raw).unwrap();
        (raw, header)
    }

    #[test]
    fn no_walk_without_capability_list_bit() {
        let (raw, header) = capture(256, |b| {
            b[PCI_STATUS_OFFSET] = 0;
            b[0x34] = 0x40;
            b[0x40] = PCI_CAP_ID_PM;
        });
        let walk = walk_capabilities(&raw, &header);
        assert!(walk.chain.is_empty());
        assert!(!walk.is_truncated());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let (raw, header) = capture(256, |b| {
            b[0x34] = 0x40;
            b[0x40] = PCI_CAP_ID_PM;
            b[0x41] = 0x40;
        });
        let walk = walk_capabilities(&raw, &header);
        assert_eq!(walk.chain.len(), 1);
        assert_eq!(
            walk.anomalies,
            vec![CapabilityError::CycleDetected { offset: 0x40 }]
        );
    }

    #[test]
    fn pointer_into_header_is_out_of_range() {
        let (raw, header) = capture(256, |b| {
            b[0x34] = 0x40;
            b[0x40] = PCI_CAP_ID_PM;
            b[0x41] = 0x10;
        });
        let walk = walk_capabilities(&raw, &header);
        assert_eq!(walk.chain.len(), 1);
        assert_eq!(
            walk.anomalies,
            vec![CapabilityError::PointerOutOfRange { offset: 0x10 }]
        );
        assert!(!walk.cycle_detected());
    }

    #[test]
    fn low_pointer_bits_are_ignored() {
        let (raw, header) = capture(256, |b| {
            b[0x34] = 0x43;
            b[0x40] = PCI_CAP_ID_PM;
            b[0x41] = 0x52;
            b[0x50] = PCI_CAP_ID_EXP;
            b[0x52] = 0x02;
        });
        let walk = walk_capabilities(&raw, &header);
        let offsets: Vec<u16> = walk.chain.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, vec![0x40, 0x50]);
        assert!(!walk.is_truncated());
    }

    #[test]
    fn legacy_pointer_past_short_capture_is_out_of_range() {
        let (raw, header) = capture(0x48, |b| {
            b[0x34] = 0x80;
        });
        let walk = walk_capabilities(&raw, &header);
        assert!(walk.chain.is_empty());
        assert_eq!(
            walk.anomalies,
            vec![CapabilityError::PointerOutOfRange { offset: 0x80 }]
        );
    }

    fn msix_capture(bars: [u32; 3], table: u32, pba: u32) -> (RawConfigSpace, ConfigSpaceHeader) {
        capture(256, |b| {
            for (i, bar) in bars.iter().enumerate() {
                b[0x10 + i * 4..0x14 + i * 4].copy_from_slice(&bar.to_le_bytes());
            }
            b[0x34] = 0x40;
            b[0x40] = PCI_CAP_ID_MSIX;
            b[0x41] = 0x60;
            b[0x44..0x48].copy_from_slice(&table.to_le_bytes());
            b[0x48..0x4C].copy_from_slice(&pba.to_le_bytes());
            b[0x60] = PCI_CAP_ID_PM;
        })
    }

    #[test]
    fn msix_in_implemented_memory_bars_is_kept() {
        // BAR0/1: 64-bit memory. BAR2: 32-bit memory.
        let (raw, header) = msix_capture([0xFEB0_0004, 0x0000_0001, 0xFEA0_0000], 0x0, 0x2);
        let walk = walk_capabilities(&raw, &header);
        assert_eq!(walk.chain.len(), 2);
        assert!(walk.anomalies.is_empty());
    }

    #[test]
    fn msix_bar_faults_stop_the_legacy_walk() {
        let cases = [
            // Upper half of the 64-bit BAR0.
            (
                [0xFEB0_0004, 0x0000_0001, 0xFEA0_0000],
                0x1,
                0x2,
                "MSI-X table BIR names an unimplemented BAR",
            ),
            ([0xFEB0_0000, 0x0000_E001, 0], 0x0, 0x1, "MSI-X PBA BIR names an I/O BAR"),
            ([0xFEB0_0000, 0, 0], 0x2, 0x1000, "MSI-X table BIR names an unimplemented BAR"),
            ([0xFEB0_0000, 0, 0], 0x1000, 0x5, "MSI-X PBA BIR names an unimplemented BAR"),
        ];
        for (bars, table, pba, reason) in cases {
            let (raw, header) = msix_capture(bars, table, pba);
            let walk = walk_capabilities(&raw, &header);
            assert!(walk.chain.is_empty(), "{reason}");
            assert_eq!(
                walk.anomalies,
                vec![CapabilityError::Malformed {
                    offset: 0x40,
                    reason
                }]
            );
        }
    }

    #[test]
    fn extended_list_is_walked_after_legacy_list() {
        let (raw, header) = capture(4096, |b| {
            b[0x34] = 0x40;
            b[0x40] = PCI_CAP_ID_PM;
            // AER v2 at 0x100 -> unknown (0x0018, LTR) at 0x150 -> end.
            b[0x100..0x104].copy_from_slice(&(0x0001u32 | (2 << 16) | (0x150 << 20)).to_le_bytes());
            b[0x150..0x154].copy_from_slice(&(0x0018u32 | (1 << 16)).to_le_bytes());
        });
        let walk = walk_capabilities(&raw, &header);
        let found: Vec<(CapabilitySpace, u16, u16)> = walk
            .chain
            .iter()
            .map(|c| (c.space, c.id, c.offset))
            .collect();
        assert_eq!(
            found,
            vec![
                (CapabilitySpace::Legacy, 0x01, 0x40),
                (CapabilitySpace::Extended, 0x0001, 0x100),
                (CapabilitySpace::Extended, 0x0018, 0x150),
            ]
        );
        assert_eq!(walk.chain.as_slice()[1].version, 2);
        assert_eq!(walk.chain.as_slice()[1].kind, CapabilityKind::AdvancedErrorReporting);
    }

    #[test]
    fn extended_cycle_back_to_first_node() {
        let (raw, header) = capture(4096, |b| {
            b[0x100..0x104].copy_from_slice(&(0x0003u32 | (1 << 16) | (0x140 << 20)).to_le_bytes());
            b[0x140..0x144].copy_from_slice(&(0x0018u32 | (1 << 16) | (0x100 << 20)).to_le_bytes());
        });
        let walk = walk_capabilities(&raw, &header);
        assert_eq!(walk.chain.len(), 2);
        assert_eq!(
            walk.anomalies,
            vec![CapabilityError::CycleDetected { offset: 0x100 }]
        );
    }

    #[test]
    fn extended_pointer_into_legacy_space_is_out_of_range() {
        let (raw, header) = capture(4096, |b| {
            b[0x100..0x104].copy_from_slice(&(0x0003u32 | (1 << 16) | (0x040 << 20)).to_le_bytes());
        });
        let walk = walk_capabilities(&raw, &header);
        assert_eq!(walk.chain.len(), 1);
        assert_eq!(
            walk.anomalies,
            vec![CapabilityError::PointerOutOfRange { offset: 0x40 }]
        );
    }

    #[test]
    fn empty_extended_space_is_not_an_anomaly() {
        let (raw, header) = capture(4096, |b| {
            b[0x100..0x104].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        });
        let walk = walk_capabilities(&raw, &header);
        assert!(walk.chain.is_empty());
        assert!(walk.anomalies.is_empty());
    }
}
