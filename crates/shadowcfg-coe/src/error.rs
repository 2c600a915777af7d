use shadowcfg_pci::ConfigSpaceError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoeError>;

/// Failures while producing or reading back COE artifacts.
///
/// Line numbers are 1-based and refer to the artifact text being decoded.
#[derive(Debug, Error)]
pub enum CoeError {
    #[error("write mask is {mask} bytes but the configuration space is {config} bytes")]
    MaskLengthMismatch { config: usize, mask: usize },

    #[error("missing memory_initialization_radix declaration")]
    MissingRadix,

    #[error("unsupported radix {radix:?} on line {line} (only 16 is supported)")]
    UnsupportedRadix { line: usize, radix: String },

    #[error("missing memory_initialization_vector section")]
    MissingVector,

    #[error("invalid word {token:?} on line {line}")]
    InvalidToken { line: usize, token: String },

    #[error("word {token:?} on line {line} is wider than 32 bits")]
    WordTooWide { line: usize, token: String },

    #[error("initialization vector is not terminated with ';'")]
    MissingTerminator,

    #[error("data after the terminated initialization vector on line {line}")]
    TrailingData { line: usize },

    #[error("invalid byte_length header on line {line}")]
    InvalidLengthHeader { line: usize },

    #[error("vector holds {words} words, more than the {max} of a full configuration space")]
    TooManyWords { words: usize, max: usize },

    #[error("byte_length={byte_length} needs {expected} words but the vector holds {words}")]
    LengthMismatch {
        byte_length: usize,
        expected: usize,
        words: usize,
    },

    #[error("bytes past byte_length={byte_length} in the final word are not zero")]
    NonZeroPadding { byte_length: usize },

    #[error("configuration space has {config} words but the write mask has {mask}")]
    WordCountMismatch { config: usize, mask: usize },

    #[error(transparent)]
    ConfigSpace(#[from] ConfigSpaceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
