//! Per-field write policy.
//!
//! Header rules are fixed tables; capability rules are an exhaustive match over
//! [`CapabilityKind`], so a new kind cannot be added without deciding its policy here.

use shadowcfg_pci::header::{
    PCI_BASE_CLASS_OFFSET, PCI_DEVICE_ID_OFFSET, PCI_PROG_IF_OFFSET, PCI_REVISION_ID_OFFSET,
    PCI_SUBCLASS_OFFSET, PCI_SUBSYSTEM_ID_OFFSET, PCI_SUBSYSTEM_VENDOR_ID_OFFSET,
    PCI_VENDOR_ID_OFFSET,
};
use shadowcfg_pci::{Capability, CapabilityKind, Msi, MsiX, PciCommand, PciStatus};

/// A register inside a capability, relative to the capability's first byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FieldRule {
    pub offset: u16,
    pub width: u8,
    /// Writable bits of the register; zero pins the whole register.
    pub writable: u32,
}

impl FieldRule {
    const fn new(offset: u16, width: u8, writable: u32) -> Self {
        Self {
            offset,
            width,
            writable,
        }
    }

    const fn fixed(offset: u16, width: u8) -> Self {
        Self::new(offset, width, 0)
    }
}

/// Identity registers that always carry the donor's captured value: `(offset, width, name)`.
pub const IDENTITY_FIELDS: &[(usize, usize, &str)] = &[
    (PCI_VENDOR_ID_OFFSET, 2, "vendor_id"),
    (PCI_DEVICE_ID_OFFSET, 2, "device_id"),
    (PCI_REVISION_ID_OFFSET, 1, "revision_id"),
    (PCI_PROG_IF_OFFSET, 1, "class_code"),
    (PCI_SUBCLASS_OFFSET, 1, "class_code"),
    (PCI_BASE_CLASS_OFFSET, 1, "class_code"),
    (PCI_SUBSYSTEM_VENDOR_ID_OFFSET, 2, "subsystem_vendor_id"),
    (PCI_SUBSYSTEM_ID_OFFSET, 2, "subsystem_device_id"),
];

/// Memory-space enable, bus-master enable and interrupt disable.
pub const COMMAND_WRITABLE: u16 = PciCommand::MEMORY_SPACE
    .union(PciCommand::BUS_MASTER)
    .union(PciCommand::INTERRUPT_DISABLE)
    .bits();

pub const STATUS_WRITABLE: u16 = PciStatus::WRITE_ONE_TO_CLEAR.bits();

const PM_PMCSR: u16 = 0x04;
// Power state (1:0), PME enable (8), PME status (15, RW1C).
const PM_PMCSR_WRITABLE: u32 = 0x8103;

const MSI_CONTROL: u16 = 0x02;
// MSI enable (0) and multiple message enable (6:4).
const MSI_CONTROL_WRITABLE: u32 = 0x0071;
const MSI_ADDRESS: u16 = 0x04;
const MSI_UPPER_ADDRESS: u16 = 0x08;

const MSIX_CONTROL: u16 = 0x02;
// Function mask (14) and MSI-X enable (15).
const MSIX_CONTROL_WRITABLE: u32 = 0xC000;

const PCIE_DEVICE_CONTROL: u16 = 0x08;
const PCIE_DEVICE_STATUS: u16 = 0x0A;
const PCIE_LINK_CONTROL: u16 = 0x10;
const PCIE_DEVICE_CONTROL2: u16 = 0x28;

const AER_UNCOR_STATUS: u16 = 0x04;
const AER_UNCOR_MASK: u16 = 0x08;
const AER_UNCOR_SEVERITY: u16 = 0x0C;
const AER_COR_STATUS: u16 = 0x10;
const AER_COR_MASK: u16 = 0x14;
const AER_CAP_CONTROL: u16 = 0x18;
const AER_UNCOR_WRITABLE: u32 = 0x03FF_F030;
const AER_COR_WRITABLE: u32 = 0x0000_F1C1;
// ECRC generation enable (6) and ECRC check enable (8).
const AER_CAP_CONTROL_WRITABLE: u32 = 0x0000_0140;

/// Register rules for one capability, in the order they are applied.
///
/// Bytes of the capability not named here stay fixed, as does the id/next header.
pub fn capability_fields(cap: &Capability) -> Vec<FieldRule> {
    match cap.kind {
        CapabilityKind::PowerManagement(_) => {
            vec![FieldRule::new(PM_PMCSR, 2, PM_PMCSR_WRITABLE)]
        }
        CapabilityKind::Msi(msi) => msi_fields(&msi),
        CapabilityKind::MsiX(_) => vec![
            FieldRule::new(MSIX_CONTROL, 2, MSIX_CONTROL_WRITABLE),
            // Table and PBA location registers relocate hardware resources.
            FieldRule::fixed(MsiX::TABLE_REGISTER_OFFSET, 4),
            FieldRule::fixed(MsiX::PBA_REGISTER_OFFSET, 4),
        ],
        CapabilityKind::PciExpress(exp) => {
            let mut fields = vec![
                FieldRule::new(PCIE_DEVICE_CONTROL, 2, 0x7FFF),
                FieldRule::new(PCIE_DEVICE_STATUS, 2, 0x000F),
                FieldRule::new(PCIE_LINK_CONTROL, 2, 0x03C3),
            ];
            if exp.version() >= 2 {
                fields.push(FieldRule::new(PCIE_DEVICE_CONTROL2, 2, 0x675F));
            }
            fields
        }
        CapabilityKind::AdvancedErrorReporting => vec![
            FieldRule::new(AER_UNCOR_STATUS, 4, AER_UNCOR_WRITABLE),
            FieldRule::new(AER_UNCOR_MASK, 4, AER_UNCOR_WRITABLE),
            FieldRule::new(AER_UNCOR_SEVERITY, 4, AER_UNCOR_WRITABLE),
            FieldRule::new(AER_COR_STATUS, 4, AER_COR_WRITABLE),
            FieldRule::new(AER_COR_MASK, 4, AER_COR_WRITABLE),
            FieldRule::new(AER_CAP_CONTROL, 4, AER_CAP_CONTROL_WRITABLE),
        ],
        CapabilityKind::VendorSpecific | CapabilityKind::Unknown => Vec::new(),
    }
}

fn msi_fields(msi: &Msi) -> Vec<FieldRule> {
    let mut fields = vec![
        FieldRule::new(MSI_CONTROL, 2, MSI_CONTROL_WRITABLE),
        FieldRule::new(MSI_ADDRESS, 4, 0xFFFF_FFFC),
    ];
    if msi.is_64bit() {
        fields.push(FieldRule::new(MSI_UPPER_ADDRESS, 4, 0xFFFF_FFFF));
    }
    fields.push(FieldRule::new(msi.data_offset(), 2, 0xFFFF));
    if let Some(mask_offset) = msi.mask_offset() {
        let vectors = msi.vector_count();
        let mask_bits = u32::MAX >> (32 - vectors);
        fields.push(FieldRule::new(mask_offset, 4, mask_bits));
        // Pending bits are device-managed.
        fields.push(FieldRule::fixed(mask_offset + 4, 4));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadowcfg_pci::{CapabilitySpace, PciExpress};

    fn cap(kind: CapabilityKind, len: u16) -> Capability {
        Capability {
            space: CapabilitySpace::Legacy,
            id: 0,
            version: 0,
            offset: 0x40,
            len,
            kind,
        }
    }

    #[test]
    fn header_constants() {
        assert_eq!(COMMAND_WRITABLE, 0x0406);
        assert_eq!(STATUS_WRITABLE, 0xF900);
    }

    #[test]
    fn msi_with_masking_exposes_only_capable_vectors() {
        let msi = Msi {
            control: (1 << 8) | (0b010 << 1),
        };
        let fields = capability_fields(&cap(CapabilityKind::Msi(msi), msi.len()));
        assert_eq!(
            fields,
            vec![
                FieldRule::new(0x02, 2, 0x0071),
                FieldRule::new(0x04, 4, 0xFFFF_FFFC),
                FieldRule::new(0x08, 2, 0xFFFF),
                FieldRule::new(0x0C, 4, 0x0000_000F),
                FieldRule::fixed(0x10, 4),
            ]
        );
    }

    #[test]
    fn msi_thirty_two_vectors_does_not_overflow() {
        let msi = Msi {
            control: (1 << 7) | (1 << 8) | (0b101 << 1),
        };
        let fields = capability_fields(&cap(CapabilityKind::Msi(msi), msi.len()));
        assert!(fields.contains(&FieldRule::new(0x10, 4, u32::MAX)));
        assert!(fields.contains(&FieldRule::new(0x08, 4, u32::MAX)));
    }

    #[test]
    fn pcie_v1_has_no_device_control2() {
        let v1 = PciExpress { capabilities: 0x0001 };
        let fields = capability_fields(&cap(CapabilityKind::PciExpress(v1), 0x24));
        assert!(fields.iter().all(|f| f.offset != PCIE_DEVICE_CONTROL2));
    }

    #[test]
    fn unknown_and_vendor_capabilities_are_fixed() {
        assert!(capability_fields(&cap(CapabilityKind::Unknown, 2)).is_empty());
        assert!(capability_fields(&cap(CapabilityKind::VendorSpecific, 16)).is_empty());
    }
}
