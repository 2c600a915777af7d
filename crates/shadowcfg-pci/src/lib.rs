//! Structured model of a PCI/PCIe configuration-space capture taken from a donor device.
//!
//! Parsing is split the same way the data is: [`ConfigSpaceHeader::parse`] decodes the fixed
//! type 0 header and [`walk_capabilities`] follows the capability lists that hang off it.
//! [`ConfigSpaceModel::parse`] runs both.

pub mod capabilities;
mod error;
pub mod header;
mod raw;
mod walker;

pub use crate::capabilities::{
    Capability, CapabilityKind, CapabilitySpace, Msi, MsiX, MsixRegion, PciExpress,
    PowerManagement,
};
pub use crate::error::{CapabilityError, ConfigSpaceError, Result};
pub use crate::header::{BarLayout, ConfigSpaceHeader, PciCommand, PciStatus};
pub use crate::raw::{
    RawConfigSpace, PCIE_CONFIG_SPACE_SIZE, PCI_CONFIG_SPACE_SIZE, PCI_HEADER_SIZE,
};
pub use crate::walker::{walk_capabilities, CapabilityChain, CapabilityWalk};

/// A capture together with everything derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSpaceModel {
    raw: RawConfigSpace,
    header: ConfigSpaceHeader,
    walk: CapabilityWalk,
}

impl ConfigSpaceModel {
    /// Decodes the header and walks the capability lists.
    ///
    /// Header problems are hard errors. Capability-list problems are not: the walk is truncated
    /// at the bad node and reported through [`ConfigSpaceModel::anomalies`].
    pub fn parse(raw: RawConfigSpace) -> Result<Self> {
        let header = ConfigSpaceHeader::parse(&raw)?;
        let walk = walk_capabilities(&raw, &header);
        Ok(Self { raw, header, walk })
    }

    pub fn raw(&self) -> &RawConfigSpace {
        &self.raw
    }

    pub fn header(&self) -> &ConfigSpaceHeader {
        &self.header
    }

    pub fn capabilities(&self) -> &CapabilityChain {
        &self.walk.chain
    }

    pub fn anomalies(&self) -> &[CapabilityError] {
        &self.walk.anomalies
    }

    pub fn walk(&self) -> &CapabilityWalk {
        &self.walk
    }

    /// Fails with the first capability anomaly, for callers that refuse partial chains.
    pub fn require_complete_chain(&self) -> Result<()> {
        match self.walk.anomalies.first() {
            Some(err) => Err(ConfigSpaceError::Capability(err.clone())),
            None => Ok(()),
        }
    }
}
