use std::path::Path;

use shadowcfg_coe::{CoeArtifacts, EncodeOptions};
use shadowcfg_pci::{
    CapabilityChain, CapabilityError, ConfigSpaceHeader, ConfigSpaceModel, RawConfigSpace,
};
use shadowcfg_writemask::{BarProbes, WriteMask, WriteMaskDeriver};

use crate::error::Result;
use crate::identity::DonorIdentity;

#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    pub bar_probes: BarProbes,
    pub encode: EncodeOptions,
    /// Treat a truncated capability walk as a hard error instead of a warning.
    pub require_complete_chain: bool,
}

/// Everything derived from one donor capture.
#[derive(Debug, Clone)]
pub struct CloneArtifacts {
    pub model: ConfigSpaceModel,
    pub mask: WriteMask,
    pub coe: CoeArtifacts,
}

impl CloneArtifacts {
    pub fn header(&self) -> &ConfigSpaceHeader {
        self.model.header()
    }

    pub fn capabilities(&self) -> &CapabilityChain {
        self.model.capabilities()
    }

    /// The anomaly that truncated the capability walk, if any.
    pub fn chain_anomaly(&self) -> Option<&CapabilityError> {
        self.model.anomalies().first()
    }

    /// Writes the configuration-space and write-mask artifacts under `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        self.coe.write_to(dir)?;
        Ok(())
    }
}

/// Runs a capture through the whole pipeline: parse, walk, identity cross-check, write-mask
/// derivation and COE encoding.
pub fn clone_overlay(
    raw: RawConfigSpace,
    identity: &DonorIdentity,
    options: &CloneOptions,
) -> Result<CloneArtifacts> {
    let model = ConfigSpaceModel::parse(raw)?;
    let header = model.header();
    tracing::info!(
        vendor_id = format_args!("{:04x}", header.vendor_id()),
        device_id = format_args!("{:04x}", header.device_id()),
        class_code = format_args!("{:06x}", header.class_code()),
        len = model.raw().len(),
        capabilities = model.capabilities().len(),
        "parsed donor configuration space"
    );

    for anomaly in model.anomalies() {
        tracing::warn!(offset = anomaly.offset(), %anomaly, "capability walk truncated");
    }
    if options.require_complete_chain {
        model.require_complete_chain()?;
    }

    identity.verify(header)?;

    let mask = WriteMaskDeriver::with_bar_probes(options.bar_probes).derive_model(&model);
    let coe = shadowcfg_coe::encode_with(model.raw(), &mask, &options.encode)?;
    Ok(CloneArtifacts { model, mask, coe })
}
