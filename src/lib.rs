//! Donor configuration-space cloning.
//!
//! [`clone_overlay`] takes a raw capture of a PCI/PCIe device's configuration space and produces
//! the two COE artifacts an emulated copy of the device is built from: the captured bytes and a
//! write mask saying which bits the emulation may drive. The component crates are re-exported
//! for callers that need individual stages.

mod error;
mod identity;
mod pipeline;

pub use shadowcfg_coe as coe;
pub use shadowcfg_pci as pci;
pub use shadowcfg_writemask as writemask;

pub use crate::error::{CloneError, Result};
pub use crate::identity::DonorIdentity;
pub use crate::pipeline::{clone_overlay, CloneArtifacts, CloneOptions};
