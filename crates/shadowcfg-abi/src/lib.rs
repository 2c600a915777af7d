//! Resolution of kernel ioctl command numbers for the build environment.
//!
//! Command numbers encode structure sizes, so they are computed by compiling a probe against the
//! local kernel headers ([`CcProbe`]) rather than hardcoded. Results are cached per kernel
//! release in an [`AbiStore`]. Any failure is an [`AbiResolutionError`]; there is no fallback
//! table.

mod cc;
mod error;
pub mod ioctl;
mod probe;
mod release;
mod resolver;
mod store;
mod table;

pub use crate::cc::CcProbe;
pub use crate::error::{AbiResolutionError, Result};
pub use crate::probe::{AbiProbe, FixedProbe, ProbeRequest};
pub use crate::release::KernelRelease;
pub use crate::resolver::{
    AbiResolver, ResolverConfig, DEFAULT_HEADERS, DEFAULT_PROBE_TIMEOUT, DEFAULT_VFIO_CONSTANTS,
};
pub use crate::store::{AbiStore, JsonFileAbiStore, MemoryAbiStore};
pub use crate::table::{AbiConstants, AbiTable};
