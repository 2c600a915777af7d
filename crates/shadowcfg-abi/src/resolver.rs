use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::cc::{is_c_identifier, is_header_name};
use crate::error::{AbiResolutionError, Result};
use crate::ioctl::IoctlFields;
use crate::probe::{AbiProbe, ProbeRequest};
use crate::release::KernelRelease;
use crate::store::AbiStore;
use crate::table::AbiConstants;

/// The VFIO container, group and device commands the device-access layer issues.
pub const DEFAULT_VFIO_CONSTANTS: &[&str] = &[
    "VFIO_GET_API_VERSION",
    "VFIO_CHECK_EXTENSION",
    "VFIO_SET_IOMMU",
    "VFIO_GROUP_GET_STATUS",
    "VFIO_GROUP_SET_CONTAINER",
    "VFIO_GROUP_UNSET_CONTAINER",
    "VFIO_GROUP_GET_DEVICE_FD",
    "VFIO_DEVICE_GET_INFO",
    "VFIO_DEVICE_GET_REGION_INFO",
    "VFIO_DEVICE_GET_IRQ_INFO",
    "VFIO_DEVICE_SET_IRQS",
    "VFIO_DEVICE_RESET",
];

pub const DEFAULT_HEADERS: &[&str] = &["sys/ioctl.h", "linux/vfio.h"];

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Extra header search directories, passed to the compiler as `-I`.
    pub include_dirs: Vec<PathBuf>,
    pub headers: Vec<String>,
    pub constants: Vec<String>,
    /// Budget for one compile-and-run cycle. Running out is a resolution failure.
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            include_dirs: Vec::new(),
            headers: DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect(),
            constants: DEFAULT_VFIO_CONSTANTS.iter().map(|c| c.to_string()).collect(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl ResolverConfig {
    fn validate(&self) -> Result<()> {
        if self.constants.is_empty() {
            return Err(AbiResolutionError::NoConstants);
        }
        if let Some(bad) = self.constants.iter().find(|c| !is_c_identifier(c)) {
            return Err(AbiResolutionError::InvalidConstantName(bad.clone()));
        }
        if let Some(bad) = self.headers.iter().find(|h| !is_header_name(h)) {
            return Err(AbiResolutionError::InvalidHeader(bad.clone()));
        }
        Ok(())
    }
}

/// Resolves ABI constants for a kernel release, probing at most once per release.
///
/// Resolutions are serialised through a single worker lock: a caller that arrives while another
/// resolution is in flight waits for it and then reads the freshly stored entry. Entries for any
/// other release are removed before probing, so a table is never served for a kernel it was not
/// computed against.
pub struct AbiResolver<P, S> {
    probe: P,
    store: S,
    config: ResolverConfig,
    worker: Mutex<()>,
}

impl<P: AbiProbe, S: AbiStore> AbiResolver<P, S> {
    pub fn new(probe: P, store: S, config: ResolverConfig) -> Self {
        Self {
            probe,
            store,
            config,
            worker: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn resolve(&self, release: &KernelRelease) -> Result<AbiConstants> {
        self.config.validate()?;
        let _worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(cached) = self.store.get(release)? {
            if cached.constants.covers(&self.config.constants) {
                tracing::info!(%release, "ABI constants cache hit");
                return Ok(AbiConstants {
                    release: cached.release,
                    constants: cached.constants.subset(&self.config.constants),
                });
            }
            tracing::info!(%release, "cached ABI constants incomplete; probing again");
            self.store.remove(release)?;
        }

        for stale in self.store.releases()? {
            if stale != *release {
                self.store.remove(&stale)?;
                tracing::info!(
                    %stale,
                    current = %release,
                    "dropped ABI constants for another kernel"
                );
            }
        }

        tracing::info!(%release, constants = self.config.constants.len(), "probing ABI constants");
        let constants = self.probe.run(&ProbeRequest {
            headers: &self.config.headers,
            include_dirs: &self.config.include_dirs,
            constants: &self.config.constants,
            timeout: self.config.timeout,
        })?;

        for (name, value) in constants.iter() {
            match IoctlFields::decode(value) {
                Some(fields) => {
                    tracing::debug!(name, value = format_args!("{value:#x}"), %fields, "resolved")
                }
                None => tracing::debug!(name, value = format_args!("{value:#x}"), "resolved"),
            }
        }

        let entry = AbiConstants {
            release: release.clone(),
            constants,
        };
        self.store.put(&entry)?;
        Ok(entry)
    }

    /// Resolves against the running kernel.
    pub fn resolve_current(&self) -> Result<AbiConstants> {
        self.resolve(&KernelRelease::current()?)
    }

    /// Drops any stored entry for `release`, forcing the next resolution to probe.
    pub fn invalidate(&self, release: &KernelRelease) -> Result<bool> {
        let _worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.remove(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FixedProbe;
    use crate::store::MemoryAbiStore;
    use crate::table::AbiTable;

    fn release(s: &str) -> KernelRelease {
        KernelRelease::new(s).unwrap()
    }

    #[test]
    fn incomplete_cache_entry_is_a_miss() {
        let store = MemoryAbiStore::new();
        let mut partial = AbiTable::new();
        partial.insert("VFIO_GET_API_VERSION", 0x3B64);
        store
            .put(&AbiConstants {
                release: release("6.8.0"),
                constants: partial,
            })
            .unwrap();

        let resolver =
            AbiResolver::new(FixedProbe::vfio_defaults(), store, ResolverConfig::default());
        let resolved = resolver.resolve(&release("6.8.0")).unwrap();
        assert_eq!(resolved.constants.len(), DEFAULT_VFIO_CONSTANTS.len());
        assert_eq!(resolver.probe().invocations(), 1);
    }

    #[test]
    fn invalid_config_fails_before_probing() {
        let config = ResolverConfig {
            constants: vec!["not a name".into()],
            ..ResolverConfig::default()
        };
        let resolver =
            AbiResolver::new(FixedProbe::vfio_defaults(), MemoryAbiStore::new(), config);
        assert!(matches!(
            resolver.resolve(&release("6.8.0")),
            Err(AbiResolutionError::InvalidConstantName(_))
        ));
        assert_eq!(resolver.probe().invocations(), 0);
    }

    #[test]
    fn invalidate_forces_a_new_probe() {
        let resolver = AbiResolver::new(
            FixedProbe::vfio_defaults(),
            MemoryAbiStore::new(),
            ResolverConfig::default(),
        );
        let r = release("6.8.0");
        resolver.resolve(&r).unwrap();
        assert!(resolver.invalidate(&r).unwrap());
        resolver.resolve(&r).unwrap();
        assert_eq!(resolver.probe().invocations(), 2);
    }
}
