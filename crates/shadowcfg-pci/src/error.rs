use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigSpaceError>;

/// Hard failures while turning a donor capture into a header model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigSpaceError {
    #[error("config space too short: {len} bytes (need at least {min})")]
    BufferTooShort { len: usize, min: usize },

    #[error("config space too long: {len} bytes (at most {max})")]
    BufferTooLong { len: usize, max: usize },

    #[error("unsupported header type {header_type:#04x} (only type 0 endpoints are decoded)")]
    UnsupportedHeaderType { header_type: u8 },

    #[error("invalid hex dump: {0}")]
    InvalidHex(&'static str),

    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// Capability-chain anomalies.
///
/// The walker never returns these as `Err`: it stops at the offending node, keeps everything
/// discovered so far and reports the anomaly alongside the chain. Callers that want to treat an
/// anomaly as fatal can lift it into [`ConfigSpaceError::Capability`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("capability cycle detected at offset {offset:#05x}")]
    CycleDetected { offset: u16 },

    #[error("capability pointer {offset:#05x} is outside the capability region")]
    PointerOutOfRange { offset: u16 },

    #[error("malformed capability at offset {offset:#05x}: {reason}")]
    Malformed { offset: u16, reason: &'static str },
}

impl CapabilityError {
    pub fn offset(&self) -> u16 {
        match self {
            Self::CycleDetected { offset }
            | Self::PointerOutOfRange { offset }
            | Self::Malformed { offset, .. } => *offset,
        }
    }
}
