use std::ops::Range;

use crate::error::CapabilityError;
use crate::raw::{RawConfigSpace, PCI_CONFIG_SPACE_SIZE};

pub const PCI_CAP_ID_PM: u8 = 0x01;
pub const PCI_CAP_ID_MSI: u8 = 0x05;
pub const PCI_CAP_ID_VENDOR_SPECIFIC: u8 = 0x09;
pub const PCI_CAP_ID_EXP: u8 = 0x10;
pub const PCI_CAP_ID_MSIX: u8 = 0x11;

pub const PCI_EXT_CAP_ID_AER: u16 = 0x0001;
pub const PCI_EXT_CAP_ID_DSN: u16 = 0x0003;
pub const PCI_EXT_CAP_ID_VENDOR_SPECIFIC: u16 = 0x000B;

/// Offset of the first extended capability header.
pub const PCI_EXT_CAP_OFFSET: usize = 0x100;

const PM_CAP_LEN: u16 = 0x08;
const MSIX_CAP_LEN: u16 = 0x0C;
const PCIE_CAP_LEN_V1: u16 = 0x24;
const PCIE_CAP_LEN_V2: u16 = 0x3C;
const VENDOR_CAP_MIN_LEN: u16 = 0x03;
const LEGACY_CAP_HEADER_LEN: u16 = 0x02;

// BIR encodings 6 and 7 are reserved.
const MSIX_MAX_BIR: u8 = 5;

// Endpoint layout; the root-port and TLP-prefix registers past 0x2C are optional.
const AER_CAP_LEN: u16 = 0x2C;
const EXT_VENDOR_CAP_MIN_LEN: u16 = 0x08;
const EXT_CAP_HEADER_LEN: u16 = 0x04;

/// Which linked list a capability was discovered on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CapabilitySpace {
    /// Conventional list: 8-bit id, 8-bit next pointer, rooted at 0x34.
    Legacy,
    /// PCI Express list: 16-bit id, 4-bit version, 12-bit next pointer, rooted at 0x100.
    Extended,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PowerManagement {
    pub capabilities: u16,
    pub control_status: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Msi {
    pub control: u16,
}

impl Msi {
    pub fn is_64bit(&self) -> bool {
        self.control & (1 << 7) != 0
    }

    pub fn per_vector_masking(&self) -> bool {
        self.control & (1 << 8) != 0
    }

    /// Number of vectors the function requests (Multiple Message Capable, decoded).
    pub fn vector_count(&self) -> u32 {
        // Encodings above 0b101 are reserved; clamp to the 32-vector maximum.
        let log2 = ((self.control >> 1) & 0x7).min(5);
        1 << log2
    }

    /// Offset of the Message Data register relative to the capability start.
    pub fn data_offset(&self) -> u16 {
        if self.is_64bit() {
            0x0C
        } else {
            0x08
        }
    }

    /// Offset of the Mask Bits register, present only with per-vector masking.
    pub fn mask_offset(&self) -> Option<u16> {
        self.per_vector_masking()
            .then(|| if self.is_64bit() { 0x10 } else { 0x0C })
    }

    pub fn len(&self) -> u16 {
        match (self.is_64bit(), self.per_vector_masking()) {
            (false, false) => 0x0A,
            (true, false) => 0x0E,
            (false, true) => 0x14,
            (true, true) => 0x18,
        }
    }
}

/// BAR indicator plus offset, as found in the MSI-X Table and PBA registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MsixRegion {
    pub bir: u8,
    pub offset: u32,
}

impl MsixRegion {
    /// Bits 2:0 hold the BIR, so the decoded offset is always qword aligned.
    fn from_register(value: u32) -> Self {
        Self {
            bir: (value & 0x7) as u8,
            offset: value & !0x7,
        }
    }

    /// Byte range covered inside the BAR by a structure of `len` bytes at this location.
    pub fn span(&self, len: u32) -> Range<u64> {
        let start = u64::from(self.offset);
        start..start + u64::from(len)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MsiX {
    pub control: u16,
    pub table: MsixRegion,
    pub pba: MsixRegion,
}

impl MsiX {
    pub const TABLE_REGISTER_OFFSET: u16 = 0x04;
    pub const PBA_REGISTER_OFFSET: u16 = 0x08;

    pub fn table_size(&self) -> u16 {
        (self.control & 0x07FF) + 1
    }

    /// Size of the vector table: 16 bytes per entry.
    pub fn table_len(&self) -> u32 {
        u32::from(self.table_size()) * 16
    }

    /// Size of the pending bit array: one bit per vector, rounded up to whole dwords.
    pub fn pba_len(&self) -> u32 {
        u32::from(self.table_size()).div_ceil(32) * 4
    }

    /// Checks the table and PBA locations against each other.
    ///
    /// Whether a BIR names a usable BAR depends on the header, so the walker checks that
    /// separately.
    pub fn check_layout(&self) -> Result<(), &'static str> {
        if self.table.bir > MSIX_MAX_BIR {
            return Err("MSI-X table BIR is reserved");
        }
        if self.pba.bir > MSIX_MAX_BIR {
            return Err("MSI-X PBA BIR is reserved");
        }
        if self.table.bir == self.pba.bir {
            let table = self.table.span(self.table_len());
            let pba = self.pba.span(self.pba_len());
            if table.start < pba.end && pba.start < table.end {
                return Err("MSI-X table overlaps the PBA");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PciExpress {
    pub capabilities: u16,
}

impl PciExpress {
    pub fn version(&self) -> u8 {
        (self.capabilities & 0xF) as u8
    }

    pub fn device_port_type(&self) -> u8 {
        ((self.capabilities >> 4) & 0xF) as u8
    }
}

/// Closed set of capability kinds the write-mask policy knows about.
///
/// Anything not recognised lands in [`CapabilityKind::Unknown`] and is treated as fixed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CapabilityKind {
    PowerManagement(PowerManagement),
    Msi(Msi),
    MsiX(MsiX),
    PciExpress(PciExpress),
    VendorSpecific,
    AdvancedErrorReporting,
    Unknown,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Capability {
    pub space: CapabilitySpace,
    pub id: u16,
    /// Extended capability version; always 0 on the legacy list.
    pub version: u8,
    pub offset: u16,
    pub len: u16,
    pub kind: CapabilityKind,
}

impl Capability {
    pub fn end(&self) -> usize {
        usize::from(self.offset) + usize::from(self.len)
    }

    pub fn name(&self) -> &'static str {
        let name = match self.space {
            CapabilitySpace::Legacy => standard_capability_name(self.id as u8),
            CapabilitySpace::Extended => extended_capability_name(self.id),
        };
        name.unwrap_or("Unknown")
    }

    /// Length of the id/next header that links this node into its list.
    pub fn header_len(&self) -> u16 {
        match self.space {
            CapabilitySpace::Legacy => LEGACY_CAP_HEADER_LEN,
            CapabilitySpace::Extended => EXT_CAP_HEADER_LEN,
        }
    }
}

pub fn standard_capability_name(id: u8) -> Option<&'static str> {
    Some(match id {
        0x01 => "Power Management",
        0x02 => "AGP",
        0x03 => "VPD",
        0x04 => "Slot ID",
        0x05 => "MSI",
        0x06 => "CompactPCI Hot Swap",
        0x07 => "PCI-X",
        0x08 => "HyperTransport",
        0x09 => "Vendor-Specific",
        0x0A => "Debug Port",
        0x0B => "CompactPCI CRC",
        0x0C => "PCI Hot Plug",
        0x0D => "PCI Bridge Subsystem VID",
        0x0E => "AGP 8x",
        0x0F => "Secure Device",
        0x10 => "PCI Express",
        0x11 => "MSI-X",
        0x12 => "SATA Data Index Conf",
        0x13 => "Advanced Features",
        0x14 => "Enhanced Allocation",
        0x15 => "Flattening Portal Bridge",
        _ => return None,
    })
}

pub fn extended_capability_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0x0001 => "Advanced Error Reporting",
        0x0002 => "Virtual Channel",
        0x0003 => "Device Serial Number",
        0x0004 => "Power Budgeting",
        0x0005 => "Root Complex Link Declaration",
        0x0006 => "Root Complex Internal Link Control",
        0x0007 => "Root Complex Event Collector Endpoint Association",
        0x0008 => "Multi-Function Virtual Channel",
        0x0009 => "Virtual Channel (MFVC)",
        0x000A => "Root Complex Register Block",
        0x000B => "Vendor-Specific Extended",
        0x000C => "Config Access Correlation",
        0x000D => "Access Control Services",
        0x000E => "Alternative Routing-ID Interpretation",
        0x000F => "Address Translation Services",
        0x0010 => "Single Root I/O Virtualization",
        0x0011 => "Multi-Root I/O Virtualization",
        0x0012 => "Multicast",
        0x0013 => "Page Request",
        0x0014 => "Reserved for AMD",
        0x0015 => "Resizable BAR",
        0x0016 => "Dynamic Power Allocation",
        0x0017 => "TPH Requester",
        0x0018 => "Latency Tolerance Reporting",
        0x0019 => "Secondary PCI Express",
        0x001A => "Protocol Multiplexing",
        0x001B => "Process Address Space ID",
        0x001C => "LN Requester",
        0x001D => "Downstream Port Containment",
        0x001E => "L1 PM Substates",
        0x001F => "Precision Time Measurement",
        0x0020 => "PCI Express over M-PHY",
        0x0021 => "FRS Queueing",
        0x0022 => "Readiness Time Reporting",
        0x0023 => "Designated Vendor-Specific",
        0x0024 => "VF Resizable BAR",
        0x0025 => "Data Link Feature",
        0x0026 => "Physical Layer 16.0 GT/s",
        0x0027 => "Lane Margining at Receiver",
        0x0028 => "Hierarchy ID",
        0x0029 => "Native PCIe Enclosure Management",
        0x002A => "Physical Layer 32.0 GT/s",
        _ => return None,
    })
}

fn malformed(offset: usize, reason: &'static str) -> CapabilityError {
    CapabilityError::Malformed {
        offset: offset as u16,
        reason,
    }
}

/// Decodes the legacy-list node at `offset`. The caller has already checked that the id/next
/// pair lies inside the legacy region.
pub(crate) fn decode_legacy(
    raw: &RawConfigSpace,
    offset: usize,
) -> Result<Capability, CapabilityError> {
    let region_end = raw.len().min(PCI_CONFIG_SPACE_SIZE);
    let id = raw
        .read_u8(offset)
        .ok_or_else(|| malformed(offset, "capability header truncated"))?;

    // Reads below go through `body` so anything past the legacy region is reported as malformed
    // instead of silently reading extended space.
    let body_u16 = |rel: usize, what: &'static str| {
        let at = offset + rel;
        if at + 2 > region_end {
            return Err(malformed(offset, what));
        }
        raw.read_u16(at).ok_or_else(|| malformed(offset, what))
    };
    let body_u32 = |rel: usize, what: &'static str| {
        let at = offset + rel;
        if at + 4 > region_end {
            return Err(malformed(offset, what));
        }
        raw.read_u32(at).ok_or_else(|| malformed(offset, what))
    };

    let (len, kind) = match id {
        PCI_CAP_ID_PM => {
            let pm = PowerManagement {
                capabilities: body_u16(2, "power management capability truncated")?,
                control_status: body_u16(4, "power management capability truncated")?,
            };
            (PM_CAP_LEN, CapabilityKind::PowerManagement(pm))
        }
        PCI_CAP_ID_MSI => {
            let msi = Msi {
                control: body_u16(2, "MSI capability truncated")?,
            };
            (msi.len(), CapabilityKind::Msi(msi))
        }
        PCI_CAP_ID_MSIX => {
            let msix = MsiX {
                control: body_u16(2, "MSI-X capability truncated")?,
                table: MsixRegion::from_register(body_u32(4, "MSI-X capability truncated")?),
                pba: MsixRegion::from_register(body_u32(8, "MSI-X capability truncated")?),
            };
            msix.check_layout().map_err(|reason| malformed(offset, reason))?;
            (MSIX_CAP_LEN, CapabilityKind::MsiX(msix))
        }
        PCI_CAP_ID_EXP => {
            let exp = PciExpress {
                capabilities: body_u16(2, "PCI Express capability truncated")?,
            };
            let len = if exp.version() >= 2 {
                PCIE_CAP_LEN_V2
            } else {
                PCIE_CAP_LEN_V1
            };
            (len, CapabilityKind::PciExpress(exp))
        }
        PCI_CAP_ID_VENDOR_SPECIFIC => {
            if offset + 3 > region_end {
                return Err(malformed(offset, "vendor capability truncated"));
            }
            let len = u16::from(raw.read_u8(offset + 2).unwrap_or(0));
            if len < VENDOR_CAP_MIN_LEN {
                return Err(malformed(offset, "vendor capability length below header size"));
            }
            (len, CapabilityKind::VendorSpecific)
        }
        _ => (LEGACY_CAP_HEADER_LEN, CapabilityKind::Unknown),
    };

    if offset + usize::from(len) > region_end {
        return Err(malformed(offset, "capability body exceeds legacy config space"));
    }

    Ok(Capability {
        space: CapabilitySpace::Legacy,
        id: u16::from(id),
        version: 0,
        offset: offset as u16,
        len,
        kind,
    })
}

/// Decodes the extended-list node at `offset` whose header dword is `header`.
pub(crate) fn decode_extended(
    raw: &RawConfigSpace,
    offset: usize,
    header: u32,
) -> Result<Capability, CapabilityError> {
    let id = (header & 0xFFFF) as u16;
    let version = ((header >> 16) & 0xF) as u8;

    let (len, kind) = match id {
        PCI_EXT_CAP_ID_AER => (AER_CAP_LEN, CapabilityKind::AdvancedErrorReporting),
        PCI_EXT_CAP_ID_VENDOR_SPECIFIC => {
            let vsec = raw
                .read_u32(offset + 4)
                .ok_or_else(|| malformed(offset, "vendor extended capability truncated"))?;
            let len = (vsec >> 20) as u16;
            if len < EXT_VENDOR_CAP_MIN_LEN {
                return Err(malformed(
                    offset,
                    "vendor extended capability length below header size",
                ));
            }
            (len, CapabilityKind::VendorSpecific)
        }
        _ => (EXT_CAP_HEADER_LEN, CapabilityKind::Unknown),
    };

    if offset + usize::from(len) > raw.len() {
        return Err(malformed(offset, "capability body exceeds captured config space"));
    }

    Ok(Capability {
        space: CapabilitySpace::Extended,
        id,
        version,
        offset: offset as u16,
        len,
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msi_layout_follows_control_flags() {
        let msi = Msi { control: 0 };
        assert_eq!((msi.len(), msi.data_offset(), msi.mask_offset()), (0x0A, 0x08, None));

        let msi = Msi { control: 1 << 7 };
        assert_eq!((msi.len(), msi.data_offset(), msi.mask_offset()), (0x0E, 0x0C, None));

        let msi = Msi {
            control: (1 << 7) | (1 << 8) | (0b011 << 1),
        };
        assert_eq!(msi.len(), 0x18);
        assert_eq!(msi.mask_offset(), Some(0x10));
        assert_eq!(msi.vector_count(), 8);
    }

    #[test]
    fn msix_registers_split_bir_and_offset() {
        let region = MsixRegion::from_register(0x0000_2003);
        assert_eq!(region, MsixRegion { bir: 3, offset: 0x2000 });
        let msix = MsiX {
            control: 0x0007,
            table: region,
            pba: region,
        };
        assert_eq!(msix.table_size(), 8);
        assert_eq!((msix.table_len(), msix.pba_len()), (0x80, 4));
    }

    #[test]
    fn pba_rounds_up_to_whole_dwords() {
        let msix = |control| MsiX {
            control,
            table: MsixRegion { bir: 0, offset: 0 },
            pba: MsixRegion { bir: 0, offset: 0x1000 },
        };
        assert_eq!(msix(31).pba_len(), 4);
        assert_eq!(msix(32).pba_len(), 8);
        assert_eq!(msix(0x7FF).pba_len(), 256);
        assert_eq!(msix(0x7FF).table_len(), 0x8000);
    }

    #[test]
    fn msix_layout_checks_reserved_bir_and_overlap() {
        let msix = |table, pba| MsiX {
            control: 0x000F,
            table: MsixRegion::from_register(table),
            pba: MsixRegion::from_register(pba),
        };
        assert_eq!(msix(0x2000, 0x3000).check_layout(), Ok(()));
        assert_eq!(msix(0x2006, 0x3000).check_layout(), Err("MSI-X table BIR is reserved"));
        assert_eq!(msix(0x2000, 0x3007).check_layout(), Err("MSI-X PBA BIR is reserved"));
        // 16 entries end the table at 0x2100.
        assert_eq!(msix(0x2000, 0x2100).check_layout(), Ok(()));
        assert_eq!(msix(0x2000, 0x20F8).check_layout(), Err("MSI-X table overlaps the PBA"));
        // PBA just below the table.
        assert_eq!(msix(0x2000, 0x1FF8).check_layout(), Ok(()));
        // Same offset, different BARs.
        assert_eq!(msix(0x2000, 0x2002).check_layout(), Ok(()));
    }

    #[test]
    fn decoded_msix_offsets_are_qword_aligned() {
        for value in [0x0000_0001u32, 0x0000_100Du32, 0xFFFF_FFFF] {
            let region = MsixRegion::from_register(value);
            assert_eq!(region.offset % 8, 0);
            assert_eq!(u32::from(region.bir) | region.offset, value);
        }
    }

    #[test]
    fn msix_with_reserved_bir_is_malformed() {
        let mut bytes = vec![0u8; 256];
        bytes[0x50] = PCI_CAP_ID_MSIX;
        bytes[0x54..0x58].copy_from_slice(&0x0000_1007u32.to_le_bytes());
        bytes[0x58..0x5C].copy_from_slice(&0x0000_1006u32.to_le_bytes());
        let raw = RawConfigSpace::new(bytes).unwrap();
        assert_eq!(
            decode_legacy(&raw, 0x50).unwrap_err(),
            CapabilityError::Malformed {
                offset: 0x50,
                reason: "MSI-X table BIR is reserved"
            }
        );
    }

    #[test]
    fn vendor_capability_with_tiny_length_is_malformed() {
        let mut bytes = vec![0u8; 256];
        bytes[0x40] = PCI_CAP_ID_VENDOR_SPECIFIC;
        bytes[0x42] = 0x02;
        let raw = RawConfigSpace::new(bytes).unwrap();
        assert_eq!(
            decode_legacy(&raw, 0x40).unwrap_err(),
            CapabilityError::Malformed {
                offset: 0x40,
                reason: "vendor capability length below header size"
            }
        );
    }

    #[test]
    fn pcie_capability_crossing_legacy_boundary_is_malformed() {
        let mut bytes = vec![0u8; 4096];
        bytes[0xF0] = PCI_CAP_ID_EXP;
        bytes[0xF2] = 0x02;
        let raw = RawConfigSpace::new(bytes).unwrap();
        let err = decode_legacy(&raw, 0xF0).unwrap_err();
        assert_eq!(err.offset(), 0xF0);
    }

    #[test]
    fn names_cover_both_spaces() {
        assert_eq!(standard_capability_name(PCI_CAP_ID_MSIX), Some("MSI-X"));
        assert_eq!(extended_capability_name(PCI_EXT_CAP_ID_DSN), Some("Device Serial Number"));
        assert_eq!(standard_capability_name(0xEE), None);
    }
}
