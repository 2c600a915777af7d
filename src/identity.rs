use shadowcfg_pci::ConfigSpaceHeader;

use crate::error::{CloneError, Result};

/// Identity registers collected separately from the capture, e.g. from sysfs attributes.
///
/// Every field is optional. Fields that are present must agree with the capture; they are a
/// cross-check and never override the captured bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DonorIdentity {
    pub vendor_id: Option<u16>,
    pub device_id: Option<u16>,
    pub revision_id: Option<u8>,
    /// 24-bit base class, subclass, programming interface.
    pub class_code: Option<u32>,
    pub subsystem_vendor_id: Option<u16>,
    pub subsystem_device_id: Option<u16>,
}

impl DonorIdentity {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fails with the first supplied field that disagrees with `header`.
    pub fn verify(&self, header: &ConfigSpaceHeader) -> Result<()> {
        let checks = [
            ("vendor_id", self.vendor_id.map(u32::from), u32::from(header.vendor_id())),
            ("device_id", self.device_id.map(u32::from), u32::from(header.device_id())),
            ("revision_id", self.revision_id.map(u32::from), u32::from(header.revision_id())),
            ("class_code", self.class_code, header.class_code()),
            (
                "subsystem_vendor_id",
                self.subsystem_vendor_id.map(u32::from),
                u32::from(header.subsystem_vendor_id()),
            ),
            (
                "subsystem_device_id",
                self.subsystem_device_id.map(u32::from),
                u32::from(header.subsystem_device_id()),
            ),
        ];

        for (field, expected, captured) in checks {
            match expected {
                Some(expected) if expected != captured => {
                    return Err(CloneError::IdentityMismatch {
                        field,
                        captured,
                        expected,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }
}
