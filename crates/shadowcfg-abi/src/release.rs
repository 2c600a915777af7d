use std::fmt;
use std::fs;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AbiResolutionError, Result};

const OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";
// `struct utsname::release` is 65 bytes including the terminator.
const MAX_RELEASE_LEN: usize = 64;

/// A kernel release string such as `6.8.0-45-generic`, the cache key for resolved constants.
///
/// Releases are also used as file names by [`crate::JsonFileAbiStore`], so anything that could
/// escape a directory is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KernelRelease(String);

impl KernelRelease {
    pub fn new(release: impl Into<String>) -> Result<Self> {
        let release = release.into();
        let valid = !release.is_empty()
            && release.len() <= MAX_RELEASE_LEN
            && !release.starts_with('.')
            && release
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b'+' | b'~'));
        if !valid {
            return Err(AbiResolutionError::InvalidKernelRelease(release));
        }
        Ok(Self(release))
    }

    /// Release of the running kernel.
    pub fn current() -> Result<Self> {
        let text = fs::read_to_string(OSRELEASE_PATH)?;
        Self::new(text.trim())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KernelRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for KernelRelease {
    type Err = AbiResolutionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for KernelRelease {
    type Error = AbiResolutionError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<KernelRelease> for String {
    fn from(value: KernelRelease) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_distribution_releases() {
        for release in ["6.8.0-45-generic", "5.15.0-1051-azure", "6.1.0+rpt-rpi-v8", "4.18.0_el8"] {
            assert_eq!(KernelRelease::new(release).unwrap().as_str(), release);
        }
    }

    #[test]
    fn rejects_path_like_releases() {
        for release in ["", "..", "../etc", "6.8/evil", "with space", ".hidden"] {
            assert!(
                matches!(
                    KernelRelease::new(release),
                    Err(AbiResolutionError::InvalidKernelRelease(_))
                ),
                "{release:?} accepted"
            );
        }
        assert!(KernelRelease::new("x".repeat(65)).is_err());
    }

    #[test]
    fn serde_validates() {
        let ok: KernelRelease = serde_json::from_str("\"6.8.0\"").unwrap();
        assert_eq!(ok.as_str(), "6.8.0");
        assert!(serde_json::from_str::<KernelRelease>("\"../x\"").is_err());
    }

    #[test]
    fn current_release_when_procfs_is_available() {
        if std::path::Path::new(OSRELEASE_PATH).exists() {
            let release = KernelRelease::current().unwrap();
            assert!(!release.as_str().is_empty());
        }
    }
}
