use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AbiResolutionError, Result};
use crate::ioctl::io;
use crate::resolver::DEFAULT_VFIO_CONSTANTS;
use crate::table::AbiTable;

/// What a probe is asked to compute.
#[derive(Debug, Clone, Copy)]
pub struct ProbeRequest<'a> {
    /// Headers to include, in order, e.g. `linux/vfio.h`.
    pub headers: &'a [String],
    pub include_dirs: &'a [PathBuf],
    pub constants: &'a [String],
    /// Budget for the whole compile-and-run cycle.
    pub timeout: Duration,
}

/// Computes constant values for the build environment.
///
/// Implementations return exactly the requested constants or an error; they never fill in a
/// value they did not compute.
pub trait AbiProbe: Send + Sync {
    fn run(&self, request: &ProbeRequest<'_>) -> Result<AbiTable>;
}

impl<P: AbiProbe + ?Sized> AbiProbe for Arc<P> {
    fn run(&self, request: &ProbeRequest<'_>) -> Result<AbiTable> {
        (**self).run(request)
    }
}

impl<P: AbiProbe + ?Sized> AbiProbe for &P {
    fn run(&self, request: &ProbeRequest<'_>) -> Result<AbiTable> {
        (**self).run(request)
    }
}

/// A probe that answers from a fixed table and counts how often it was asked.
#[derive(Debug, Default)]
pub struct FixedProbe {
    table: AbiTable,
    invocations: AtomicUsize,
}

const VFIO_TYPE: u8 = b';';
const VFIO_BASE: u8 = 100;

impl FixedProbe {
    pub fn new(table: AbiTable) -> Self {
        Self {
            table,
            invocations: AtomicUsize::new(0),
        }
    }

    /// The VFIO commands as encoded by the asm-generic ioctl layout.
    pub fn vfio_defaults() -> Self {
        let table = DEFAULT_VFIO_CONSTANTS
            .iter()
            .zip(VFIO_BASE..)
            .map(|(name, nr)| (name.to_string(), u64::from(io(VFIO_TYPE, nr))))
            .collect();
        Self::new(table)
    }

    pub fn table(&self) -> &AbiTable {
        &self.table
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl AbiProbe for FixedProbe {
    fn run(&self, request: &ProbeRequest<'_>) -> Result<AbiTable> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(missing) = request.constants.iter().find(|n| !self.table.contains(n)) {
            return Err(AbiResolutionError::MissingConstant {
                name: missing.clone(),
            });
        }
        Ok(self.table.subset(request.constants))
    }
}
