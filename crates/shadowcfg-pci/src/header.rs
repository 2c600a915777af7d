use bitflags::bitflags;

use crate::error::{ConfigSpaceError, Result};
use crate::raw::{RawConfigSpace, PCI_HEADER_SIZE};

pub const PCI_VENDOR_ID_OFFSET: usize = 0x00;
pub const PCI_DEVICE_ID_OFFSET: usize = 0x02;
pub const PCI_COMMAND_OFFSET: usize = 0x04;
pub const PCI_STATUS_OFFSET: usize = 0x06;
pub const PCI_REVISION_ID_OFFSET: usize = 0x08;
pub const PCI_PROG_IF_OFFSET: usize = 0x09;
pub const PCI_SUBCLASS_OFFSET: usize = 0x0A;
pub const PCI_BASE_CLASS_OFFSET: usize = 0x0B;
pub const PCI_CACHE_LINE_SIZE_OFFSET: usize = 0x0C;
pub const PCI_LATENCY_TIMER_OFFSET: usize = 0x0D;
pub const PCI_HEADER_TYPE_OFFSET: usize = 0x0E;
pub const PCI_BIST_OFFSET: usize = 0x0F;
pub const PCI_BAR0_OFFSET: usize = 0x10;
pub const PCI_CARDBUS_CIS_OFFSET: usize = 0x28;
pub const PCI_SUBSYSTEM_VENDOR_ID_OFFSET: usize = 0x2C;
pub const PCI_SUBSYSTEM_ID_OFFSET: usize = 0x2E;
pub const PCI_EXPANSION_ROM_OFFSET: usize = 0x30;
pub const PCI_CAP_PTR_OFFSET: usize = 0x34;
pub const PCI_INTERRUPT_LINE_OFFSET: usize = 0x3C;
pub const PCI_INTERRUPT_PIN_OFFSET: usize = 0x3D;
pub const PCI_MIN_GNT_OFFSET: usize = 0x3E;
pub const PCI_MAX_LAT_OFFSET: usize = 0x3F;

pub const PCI_BAR_COUNT: usize = 6;

pub const PCI_HEADER_TYPE_ENDPOINT: u8 = 0x00;
pub const PCI_HEADER_TYPE_BRIDGE: u8 = 0x01;
pub const PCI_HEADER_TYPE_CARDBUS: u8 = 0x02;
pub const PCI_HEADER_TYPE_MULTI_FUNCTION: u8 = 0x80;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PciCommand: u16 {
        const IO_SPACE = 1 << 0;
        const MEMORY_SPACE = 1 << 1;
        const BUS_MASTER = 1 << 2;
        const SPECIAL_CYCLES = 1 << 3;
        const MEMORY_WRITE_INVALIDATE = 1 << 4;
        const VGA_PALETTE_SNOOP = 1 << 5;
        const PARITY_ERROR_RESPONSE = 1 << 6;
        const SERR_ENABLE = 1 << 8;
        const FAST_BACK_TO_BACK = 1 << 9;
        const INTERRUPT_DISABLE = 1 << 10;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PciStatus: u16 {
        const INTERRUPT_STATUS = 1 << 3;
        const CAPABILITIES_LIST = 1 << 4;
        const CAPABLE_66MHZ = 1 << 5;
        const FAST_BACK_TO_BACK = 1 << 7;
        const MASTER_DATA_PARITY_ERROR = 1 << 8;
        const DEVSEL_MEDIUM = 1 << 9;
        const DEVSEL_SLOW = 1 << 10;
        const SIGNALED_TARGET_ABORT = 1 << 11;
        const RECEIVED_TARGET_ABORT = 1 << 12;
        const RECEIVED_MASTER_ABORT = 1 << 13;
        const SIGNALED_SYSTEM_ERROR = 1 << 14;
        const DETECTED_PARITY_ERROR = 1 << 15;
    }
}

impl PciStatus {
    /// Event bits that software clears by writing one.
    pub const WRITE_ONE_TO_CLEAR: Self = Self::from_bits_retain(
        Self::MASTER_DATA_PARITY_ERROR.bits()
            | Self::SIGNALED_TARGET_ABORT.bits()
            | Self::RECEIVED_TARGET_ABORT.bits()
            | Self::RECEIVED_MASTER_ABORT.bits()
            | Self::SIGNALED_SYSTEM_ERROR.bits()
            | Self::DETECTED_PARITY_ERROR.bits(),
    );
}

/// Decoded layout of one base address register slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BarLayout {
    Io {
        index: u8,
        base: u32,
    },
    Memory32 {
        index: u8,
        base: u32,
        prefetchable: bool,
    },
    /// Occupies `index` and `index + 1`; the second slot holds the upper dword.
    Memory64 {
        index: u8,
        base: u64,
        prefetchable: bool,
    },
    /// A 64-bit BAR in the last slot, or the reserved memory type `0b11`.
    Invalid {
        index: u8,
    },
}

impl BarLayout {
    pub fn index(&self) -> u8 {
        match self {
            Self::Io { index, .. }
            | Self::Memory32 { index, .. }
            | Self::Memory64 { index, .. }
            | Self::Invalid { index } => *index,
        }
    }

    /// Config-space offset of the (low) BAR dword.
    pub fn config_offset(&self) -> usize {
        PCI_BAR0_OFFSET + usize::from(self.index()) * 4
    }

    /// Number of BAR slots this BAR consumes.
    pub fn slots(&self) -> usize {
        match self {
            Self::Memory64 { .. } => 2,
            _ => 1,
        }
    }

    /// Decoded base address with the flag bits stripped.
    pub fn base(&self) -> u64 {
        match self {
            Self::Io { base, .. } | Self::Memory32 { base, .. } => u64::from(*base),
            Self::Memory64 { base, .. } => *base,
            Self::Invalid { .. } => 0,
        }
    }
}

/// Type 0 configuration header decoded from a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSpaceHeader {
    vendor_id: u16,
    device_id: u16,
    command: PciCommand,
    status: PciStatus,
    revision_id: u8,
    class_code: u32,
    cache_line_size: u8,
    latency_timer: u8,
    header_type: u8,
    bist: u8,
    bars: [u32; PCI_BAR_COUNT],
    cardbus_cis: u32,
    subsystem_vendor_id: u16,
    subsystem_device_id: u16,
    expansion_rom: u32,
    capabilities_pointer: u8,
    interrupt_line: u8,
    interrupt_pin: u8,
    min_grant: u8,
    max_latency: u8,
}

impl ConfigSpaceHeader {
    pub fn parse(raw: &RawConfigSpace) -> Result<Self> {
        let bytes = raw.as_bytes();
        if bytes.len() < PCI_HEADER_SIZE {
            return Err(ConfigSpaceError::BufferTooShort {
                len: bytes.len(),
                min: PCI_HEADER_SIZE,
            });
        }

        let header_type = bytes[PCI_HEADER_TYPE_OFFSET];
        let layout = header_type & !PCI_HEADER_TYPE_MULTI_FUNCTION;
        if layout != PCI_HEADER_TYPE_ENDPOINT {
            tracing::error!(header_type, "refusing to decode non-endpoint header layout");
            return Err(ConfigSpaceError::UnsupportedHeaderType { header_type });
        }

        let u16_at = |off: usize| u16::from_le_bytes([bytes[off], bytes[off + 1]]);
        let u32_at = |off: usize| {
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };

        let class_code = (u32::from(bytes[PCI_BASE_CLASS_OFFSET]) << 16)
            | (u32::from(bytes[PCI_SUBCLASS_OFFSET]) << 8)
            | u32::from(bytes[PCI_PROG_IF_OFFSET]);

        let header = Self {
            vendor_id: u16_at(PCI_VENDOR_ID_OFFSET),
            device_id: u16_at(PCI_DEVICE_ID_OFFSET),
            command: PciCommand::from_bits_retain(u16_at(PCI_COMMAND_OFFSET)),
            status: PciStatus::from_bits_retain(u16_at(PCI_STATUS_OFFSET)),
            revision_id: bytes[PCI_REVISION_ID_OFFSET],
            class_code,
            cache_line_size: bytes[PCI_CACHE_LINE_SIZE_OFFSET],
            latency_timer: bytes[PCI_LATENCY_TIMER_OFFSET],
            header_type,
            bist: bytes[PCI_BIST_OFFSET],
            bars: core::array::from_fn(|i| u32_at(PCI_BAR0_OFFSET + i * 4)),
            cardbus_cis: u32_at(PCI_CARDBUS_CIS_OFFSET),
            subsystem_vendor_id: u16_at(PCI_SUBSYSTEM_VENDOR_ID_OFFSET),
            subsystem_device_id: u16_at(PCI_SUBSYSTEM_ID_OFFSET),
            expansion_rom: u32_at(PCI_EXPANSION_ROM_OFFSET),
            capabilities_pointer: bytes[PCI_CAP_PTR_OFFSET],
            interrupt_line: bytes[PCI_INTERRUPT_LINE_OFFSET],
            interrupt_pin: bytes[PCI_INTERRUPT_PIN_OFFSET],
            min_grant: bytes[PCI_MIN_GNT_OFFSET],
            max_latency: bytes[PCI_MAX_LAT_OFFSET],
        };

        tracing::debug!(
            vendor_id = format_args!("{:#06x}", header.vendor_id),
            device_id = format_args!("{:#06x}", header.device_id),
            class_code = format_args!("{:#08x}", header.class_code),
            "parsed config space header"
        );

        Ok(header)
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    pub fn command(&self) -> PciCommand {
        self.command
    }

    pub fn status(&self) -> PciStatus {
        self.status
    }

    pub fn revision_id(&self) -> u8 {
        self.revision_id
    }

    /// 24-bit class code: base class, subclass, programming interface (MSB to LSB).
    pub fn class_code(&self) -> u32 {
        self.class_code
    }

    pub fn base_class(&self) -> u8 {
        (self.class_code >> 16) as u8
    }

    pub fn subclass(&self) -> u8 {
        (self.class_code >> 8) as u8
    }

    pub fn prog_if(&self) -> u8 {
        self.class_code as u8
    }

    pub fn cache_line_size(&self) -> u8 {
        self.cache_line_size
    }

    pub fn latency_timer(&self) -> u8 {
        self.latency_timer
    }

    /// Raw header type byte, including the multi-function bit.
    pub fn header_type(&self) -> u8 {
        self.header_type
    }

    pub fn is_multi_function(&self) -> bool {
        self.header_type & PCI_HEADER_TYPE_MULTI_FUNCTION != 0
    }

    pub fn bist(&self) -> u8 {
        self.bist
    }

    /// Raw BAR dwords exactly as captured.
    pub fn bars(&self) -> &[u32; PCI_BAR_COUNT] {
        &self.bars
    }

    pub fn cardbus_cis(&self) -> u32 {
        self.cardbus_cis
    }

    pub fn subsystem_vendor_id(&self) -> u16 {
        self.subsystem_vendor_id
    }

    pub fn subsystem_device_id(&self) -> u16 {
        self.subsystem_device_id
    }

    pub fn expansion_rom(&self) -> u32 {
        self.expansion_rom
    }

    pub fn capabilities_pointer(&self) -> u8 {
        self.capabilities_pointer
    }

    pub fn capabilities_supported(&self) -> bool {
        self.status.contains(PciStatus::CAPABILITIES_LIST)
    }

    pub fn interrupt_line(&self) -> u8 {
        self.interrupt_line
    }

    pub fn interrupt_pin(&self) -> u8 {
        self.interrupt_pin
    }

    pub fn min_grant(&self) -> u8 {
        self.min_grant
    }

    pub fn max_latency(&self) -> u8 {
        self.max_latency
    }

    /// Decodes the six BAR slots into logical BARs.
    ///
    /// A 64-bit memory BAR swallows the following slot, so the result can hold fewer than six
    /// entries.
    pub fn bar_layout(&self) -> Vec<BarLayout> {
        let mut out = Vec::with_capacity(PCI_BAR_COUNT);
        let mut i = 0;
        while i < PCI_BAR_COUNT {
            let raw = self.bars[i];
            let index = i as u8;
            if raw & 0x1 != 0 {
                out.push(BarLayout::Io {
                    index,
                    base: raw & !0x3,
                });
                i += 1;
                continue;
            }

            let prefetchable = raw & (1 << 3) != 0;
            match (raw >> 1) & 0x3 {
                // 0b01 is the legacy "below 1 MiB" type; it decodes like a 32-bit BAR.
                0b00 | 0b01 => {
                    out.push(BarLayout::Memory32 {
                        index,
                        base: raw & !0xF,
                        prefetchable,
                    });
                    i += 1;
                }
                0b10 if i + 1 < PCI_BAR_COUNT => {
                    let high = self.bars[i + 1];
                    out.push(BarLayout::Memory64 {
                        index,
                        base: (u64::from(high) << 32) | u64::from(raw & !0xF),
                        prefetchable,
                    });
                    i += 2;
                }
                _ => {
                    tracing::warn!(bar = index, raw, "invalid BAR type encoding");
                    out.push(BarLayout::Invalid { index });
                    i += 1;
                }
            }
        }
        out
    }
}
