//! asm-generic ioctl command layout (`_IO`, `_IOR`, `_IOW`, `_IOWR`).
//!
//! Layout, low to high: 8-bit number, 8-bit type, 14-bit argument size, 2-bit direction.
//! [`IoctlFields`] describes resolved values in logs; the values themselves always come from a
//! probe.

use std::fmt;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

pub const IOC_NONE: u32 = 0;
pub const IOC_WRITE: u32 = 1;
pub const IOC_READ: u32 = 2;

/// Largest argument size the size field can carry.
pub const IOC_SIZE_MAX: u32 = (1 << IOC_SIZEBITS) - 1;

/// `_IO(ty, nr)`: no direction, no argument.
pub const fn io(ty: u8, nr: u8) -> u32 {
    ((ty as u32) << IOC_TYPESHIFT) | ((nr as u32) << IOC_NRSHIFT)
}

/// The fields of an encoded command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IoctlFields {
    pub dir: u32,
    pub ty: u8,
    pub nr: u8,
    pub size: u32,
}

impl IoctlFields {
    /// Splits `code` into its fields; `None` if it does not fit in 32 bits.
    pub fn decode(code: u64) -> Option<Self> {
        let code = u32::try_from(code).ok()?;
        Some(Self {
            dir: code >> IOC_DIRSHIFT,
            ty: (code >> IOC_TYPESHIFT) as u8,
            nr: (code >> IOC_NRSHIFT) as u8,
            size: (code >> IOC_SIZESHIFT) & IOC_SIZE_MAX,
        })
    }
}

impl fmt::Display for IoctlFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ty = if self.ty.is_ascii_graphic() {
            format!("'{}'", self.ty as char)
        } else {
            format!("{:#04x}", self.ty)
        };
        match self.dir {
            IOC_NONE if self.size == 0 => write!(f, "_IO({ty}, {})", self.nr),
            IOC_READ => write!(f, "_IOR({ty}, {}, {})", self.nr, self.size),
            IOC_WRITE => write!(f, "_IOW({ty}, {}, {})", self.nr, self.size),
            IOC_NONE => write!(f, "_IOC(0, {ty}, {}, {})", self.nr, self.size),
            _ => write!(f, "_IOWR({ty}, {}, {})", self.nr, self.size),
        }
    }
}
