//! COE (Xilinx memory-initialization) artifacts for a cloned configuration space.
//!
//! Two parallel files are produced: the captured configuration space and its write mask, each as
//! one little-endian 32-bit word per dword of the capture. [`decode`] is the exact inverse of
//! [`encode`], including captures whose length is not a multiple of four.

use std::fs;
use std::path::Path;

use shadowcfg_pci::RawConfigSpace;
use shadowcfg_writemask::WriteMask;

mod decode;
mod encode;
mod error;

pub use crate::decode::{decode_words, DecodedCoe};
pub use crate::encode::EncodeOptions;
pub use crate::error::{CoeError, Result};

/// File name the downstream overlay expects for the configuration-space image.
pub const CONFIG_SPACE_FILE_NAME: &str = "pcileech_cfgspace.coe";
/// File name the downstream overlay expects for the write mask.
pub const WRITE_MASK_FILE_NAME: &str = "pcileech_cfgspace_writemask.coe";

const CONFIG_SPACE_TITLE: &[&str] = &["Configuration space captured from the donor device"];
const WRITE_MASK_TITLE: &[&str] = &[
    "Configuration space write mask",
    "0 = fixed to the captured value, 1 = writable",
];

/// The two artifact texts, in the order the overlay loads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoeArtifacts {
    pub config_space: String,
    pub write_mask: String,
}

impl CoeArtifacts {
    /// Writes both artifacts under `dir` with their standard names, creating `dir` if needed.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(CONFIG_SPACE_FILE_NAME), &self.config_space)?;
        fs::write(dir.join(WRITE_MASK_FILE_NAME), &self.write_mask)?;
        tracing::info!(dir = %dir.display(), "wrote COE artifacts");
        Ok(())
    }

    pub fn read_from(dir: &Path) -> Result<Self> {
        Ok(Self {
            config_space: fs::read_to_string(dir.join(CONFIG_SPACE_FILE_NAME))?,
            write_mask: fs::read_to_string(dir.join(WRITE_MASK_FILE_NAME))?,
        })
    }

    pub fn decode(&self) -> Result<(RawConfigSpace, WriteMask)> {
        decode(&self.config_space, &self.write_mask)
    }
}

pub fn encode(raw: &RawConfigSpace, mask: &WriteMask) -> Result<CoeArtifacts> {
    encode_with(raw, mask, &EncodeOptions::default())
}

pub fn encode_with(
    raw: &RawConfigSpace,
    mask: &WriteMask,
    options: &EncodeOptions,
) -> Result<CoeArtifacts> {
    if raw.len() != mask.len() {
        return Err(CoeError::MaskLengthMismatch {
            config: raw.len(),
            mask: mask.len(),
        });
    }
    Ok(CoeArtifacts {
        config_space: encode::encode_words(CONFIG_SPACE_TITLE, raw.as_bytes(), options),
        write_mask: encode::encode_words(WRITE_MASK_TITLE, mask.as_bytes(), options),
    })
}

/// Decodes a configuration-space artifact and its write-mask artifact.
///
/// The two must describe the same number of words and, after applying any `byte_length`
/// headers, the same number of bytes.
pub fn decode(config_text: &str, mask_text: &str) -> Result<(RawConfigSpace, WriteMask)> {
    let config = decode_words(config_text)?;
    let mask = decode_words(mask_text)?;
    if config.words.len() != mask.words.len() {
        return Err(CoeError::WordCountMismatch {
            config: config.words.len(),
            mask: mask.words.len(),
        });
    }

    let config = config.into_bytes()?;
    let mask = mask.into_bytes()?;
    if config.len() != mask.len() {
        return Err(CoeError::MaskLengthMismatch {
            config: config.len(),
            mask: mask.len(),
        });
    }
    Ok((RawConfigSpace::new(config)?, WriteMask::from_bytes(mask)))
}
