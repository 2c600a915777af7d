use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::NamedTempFile;

use crate::error::{AbiResolutionError, Result};
use crate::release::KernelRelease;
use crate::table::AbiConstants;

/// Persistent ABI tables keyed by kernel release.
pub trait AbiStore: Send + Sync {
    fn get(&self, release: &KernelRelease) -> Result<Option<AbiConstants>>;

    fn put(&self, entry: &AbiConstants) -> Result<()>;

    /// Removes the entry for `release`, returning whether one existed.
    fn remove(&self, release: &KernelRelease) -> Result<bool>;

    /// Releases with a stored entry, sorted.
    fn releases(&self) -> Result<Vec<KernelRelease>>;
}

impl<S: AbiStore + ?Sized> AbiStore for Arc<S> {
    fn get(&self, release: &KernelRelease) -> Result<Option<AbiConstants>> {
        (**self).get(release)
    }

    fn put(&self, entry: &AbiConstants) -> Result<()> {
        (**self).put(entry)
    }

    fn remove(&self, release: &KernelRelease) -> Result<bool> {
        (**self).remove(release)
    }

    fn releases(&self) -> Result<Vec<KernelRelease>> {
        (**self).releases()
    }
}

impl<S: AbiStore + ?Sized> AbiStore for &S {
    fn get(&self, release: &KernelRelease) -> Result<Option<AbiConstants>> {
        (**self).get(release)
    }

    fn put(&self, entry: &AbiConstants) -> Result<()> {
        (**self).put(entry)
    }

    fn remove(&self, release: &KernelRelease) -> Result<bool> {
        (**self).remove(release)
    }

    fn releases(&self) -> Result<Vec<KernelRelease>> {
        (**self).releases()
    }
}

#[derive(Debug, Default)]
pub struct MemoryAbiStore {
    entries: Mutex<BTreeMap<KernelRelease, AbiConstants>>,
}

impl MemoryAbiStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<KernelRelease, AbiConstants>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AbiStore for MemoryAbiStore {
    fn get(&self, release: &KernelRelease) -> Result<Option<AbiConstants>> {
        Ok(self.entries().get(release).cloned())
    }

    fn put(&self, entry: &AbiConstants) -> Result<()> {
        self.entries().insert(entry.release.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, release: &KernelRelease) -> Result<bool> {
        Ok(self.entries().remove(release).is_some())
    }

    fn releases(&self) -> Result<Vec<KernelRelease>> {
        Ok(self.entries().keys().cloned().collect())
    }
}

/// One `<release>.json` file per kernel release under a cache directory.
///
/// Entries are written to a temporary file in the same directory and renamed into place, so a
/// reader never observes a partially written table.
#[derive(Debug, Clone)]
pub struct JsonFileAbiStore {
    dir: PathBuf,
}

const ENTRY_EXTENSION: &str = "json";

impl JsonFileAbiStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, release: &KernelRelease) -> PathBuf {
        self.dir.join(format!("{release}.{ENTRY_EXTENSION}"))
    }
}

impl AbiStore for JsonFileAbiStore {
    fn get(&self, release: &KernelRelease) -> Result<Option<AbiConstants>> {
        let text = match fs::read_to_string(self.entry_path(release)) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: AbiConstants = serde_json::from_str(&text)?;
        if entry.release != *release {
            return Err(AbiResolutionError::ReleaseMismatch {
                requested: release.to_string(),
                stored: entry.release.to_string(),
            });
        }
        Ok(Some(entry))
    }

    fn put(&self, entry: &AbiConstants) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, entry)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        let path = self.entry_path(&entry.release);
        tmp.persist(&path).map_err(|err| err.error)?;
        tracing::debug!(path = %path.display(), "stored ABI constants");
        Ok(())
    }

    fn remove(&self, release: &KernelRelease) -> Result<bool> {
        match fs::remove_file(self.entry_path(release)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn releases(&self) -> Result<Vec<KernelRelease>> {
        let mut releases = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            // Anything that is not a valid release name was not written by this store.
            if let Some(release) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| KernelRelease::new(stem).ok())
            {
                releases.push(release);
            }
        }
        releases.sort();
        Ok(releases)
    }
}
