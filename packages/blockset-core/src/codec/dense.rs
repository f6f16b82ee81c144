//! Dense reference layout
//!
//! One byte-aligned `N`-bit vector for every target in `[min, max]`,
//! resolved or not. Used as the baseline the range-indexed artifact is
//! measured against and as an independent decoder in tests.

use super::bitmap::{byte_len, test_bit, BitBuffer};
use crate::alphabet::{Alphabet, Target};
use crate::decomposition::{BestKnownMap, Decomposition};
use crate::errors::{CoreError, Result};

/// Bytes the dense layout needs for targets `min..=max`
pub fn dense_size(min: Target, max: Target, num_bits: usize) -> u64 {
    if max < min {
        return 0;
    }
    (max - min + 1) * byte_len(num_bits as u64) as u64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseBitmap {
    pub min: Target,
    pub max: Target,
    pub stride: usize,
    pub bytes: Vec<u8>,
    weights: Vec<u32>,
}

impl DenseBitmap {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn query(&self, target: Target) -> Option<Decomposition> {
        if self.bytes.is_empty() || target < self.min || target > self.max {
            return None;
        }
        let base = (target - self.min) * self.stride as u64 * 8;
        let weights: Vec<u32> = self
            .weights
            .iter()
            .enumerate()
            .filter(|(k, _)| test_bit(&self.bytes, base + *k as u64))
            .map(|(_, &w)| w)
            .collect();
        // all-zero vector: target in the span but unresolved
        (!weights.is_empty()).then(|| Decomposition::new(weights))
    }
}

pub fn encode_dense(map: &BestKnownMap, alphabet: &Alphabet) -> Result<DenseBitmap> {
    let stride = byte_len(alphabet.len() as u64);
    let (min, max) = match (map.keys().next(), map.keys().next_back()) {
        (Some(&min), Some(&max)) => (min, max),
        _ => {
            return Ok(DenseBitmap {
                min: 0,
                max: 0,
                stride,
                bytes: Vec::new(),
                weights: alphabet.weights().to_vec(),
            })
        }
    };
    let mut buf = BitBuffer::zeroed(dense_size(min, max, alphabet.len()) * 8);
    for (&target, dec) in map {
        let base = (target - min) * stride as u64 * 8;
        for &w in dec.weights() {
            let k = alphabet
                .index_of(w)
                .ok_or(CoreError::UnknownWeight { target, weight: w })?;
            buf.set(base + k as u64);
        }
    }
    Ok(DenseBitmap {
        min,
        max,
        stride,
        bytes: buf.into_bytes(),
        weights: alphabet.weights().to_vec(),
    })
}
