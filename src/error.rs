use shadowcfg_coe::CoeError;
use shadowcfg_pci::ConfigSpaceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CloneError>;

/// Hard failures of the capture-to-artifacts pipeline.
#[derive(Debug, Error)]
pub enum CloneError {
    #[error(transparent)]
    ConfigSpace(#[from] ConfigSpaceError),

    #[error(transparent)]
    Coe(#[from] CoeError),

    /// A separately collected identity field disagrees with the capture.
    #[error("{field} mismatch: capture has {captured:#x}, expected {expected:#x}")]
    IdentityMismatch {
        field: &'static str,
        captured: u32,
        expected: u32,
    },
}
