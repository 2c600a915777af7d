//! Write-mask derivation: decides, bit by bit, which parts of a cloned configuration space the
//! emulated device may drive and which stay pinned to the donor capture.

mod bar;
mod derive;
mod error;
mod mask;
pub mod policy;

pub use crate::bar::{bar_mask, BarMask, BarProbe, BarProbes};
pub use crate::derive::{derive_write_mask, WriteMaskDeriver};
pub use crate::error::{Result, WriteMaskError};
pub use crate::mask::WriteMask;
