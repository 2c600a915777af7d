use std::fmt;

/// Per-bit write permission over a configuration-space capture.
///
/// A set bit means the emulated register logic may drive that bit; a clear bit is pinned to the
/// captured donor value. The mask is always exactly as long as the capture it was derived from.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct WriteMask {
    bits: Box<[u8]>,
}

impl WriteMask {
    /// An all-fixed mask of `len` bytes.
    pub fn fixed(len: usize) -> Self {
        Self {
            bits: vec![0u8; len].into_boxed_slice(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bits: bytes.into().into_boxed_slice(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Whether config-space bit `bit` (byte offset * 8 + bit index) is writable.
    pub fn is_writable(&self, bit: usize) -> bool {
        self.bits
            .get(bit / 8)
            .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
    }

    /// Little-endian dword `index`, zero-padded past the end of the mask.
    pub fn dword(&self, index: usize) -> u32 {
        let mut word = [0u8; 4];
        let start = index * 4;
        for (i, slot) in word.iter_mut().enumerate() {
            *slot = self.bits.get(start + i).copied().unwrap_or(0);
        }
        u32::from_le_bytes(word)
    }

    pub fn dword_count(&self) -> usize {
        self.bits.len().div_ceil(4)
    }

    /// Number of writable bits in the whole mask.
    pub fn writable_bits(&self) -> u32 {
        self.bits.iter().map(|b| b.count_ones()).sum()
    }

    /// Number of writable bits inside `[offset, offset + len)`, clipped to the mask.
    pub fn writable_bits_in(&self, offset: usize, len: usize) -> u32 {
        let end = offset.saturating_add(len).min(self.bits.len());
        self.bits
            .get(offset.min(end)..end)
            .map_or(0, |range| range.iter().map(|b| b.count_ones()).sum())
    }
}

impl AsRef<[u8]> for WriteMask {
    fn as_ref(&self) -> &[u8] {
        &self.bits
    }
}

impl fmt::Debug for WriteMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteMask")
            .field("len", &self.bits.len())
            .field("writable_bits", &self.writable_bits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dword_is_little_endian_and_padded() {
        let mask = WriteMask::from_bytes(vec![0x06, 0x04, 0x00, 0xF9, 0xAA]);
        assert_eq!(mask.dword(0), 0xF900_0406);
        assert_eq!(mask.dword(1), 0x0000_00AA);
        assert_eq!(mask.dword(7), 0);
        assert_eq!(mask.dword_count(), 2);
    }

    #[test]
    fn bit_queries() {
        let mask = WriteMask::from_bytes(vec![0x06, 0x04]);
        assert!(!mask.is_writable(0));
        assert!(mask.is_writable(1));
        assert!(mask.is_writable(2));
        assert!(mask.is_writable(10));
        assert!(!mask.is_writable(99));
        assert_eq!(mask.writable_bits(), 3);
        assert_eq!(mask.writable_bits_in(1, 10), 1);
        assert_eq!(mask.writable_bits_in(5, 1), 0);
    }
}
