//! LSB-first bit buffer

/// Fixed-size bit buffer; bit `k` lives in byte `k >> 3` at mask
/// `1 << (k & 7)`, the final byte is zero padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBuffer {
    bytes: Vec<u8>,
    len_bits: u64,
}

impl BitBuffer {
    pub fn zeroed(len_bits: u64) -> Self {
        Self {
            bytes: vec![0; byte_len(len_bits)],
            len_bits,
        }
    }

    pub fn len_bits(&self) -> u64 {
        self.len_bits
    }

    #[inline]
    pub fn set(&mut self, offset: u64) {
        debug_assert!(offset < self.len_bits);
        self.bytes[(offset >> 3) as usize] |= 1 << (offset & 7);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Bytes needed to hold `bits` bits
pub fn byte_len(bits: u64) -> usize {
    bits.div_ceil(8) as usize
}

/// Test bit `offset` of an LSB-first byte buffer.
#[inline]
pub fn test_bit(bytes: &[u8], offset: u64) -> bool {
    bytes[(offset >> 3) as usize] & (1 << (offset & 7)) != 0
}
