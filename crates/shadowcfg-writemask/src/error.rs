use thiserror::Error;

pub type Result<T> = std::result::Result<T, WriteMaskError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteMaskError {
    #[error("BAR index {index} out of range (type 0 headers have 6 BARs)")]
    BarIndexOutOfRange { index: usize },

    #[error("invalid BAR probe assignment {input:?}: {reason}")]
    InvalidBarProbe { input: String, reason: &'static str },
}
