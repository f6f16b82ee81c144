//! Range-indexed bitmap codec
//!
//! Compiles a best-known map into three parts:
//!
//! - `labels`: one label per alphabet weight, in ascending weight order
//! - `ranges`: maximal runs of consecutive resolved targets, each with the
//!   bit offset of its first target
//! - `bits`: one `N`-bit membership vector per resolved target, concatenated
//!   across ranges in ascending order
//!
//! For a target `T` in range `(S, E, B)`, bit `k` (set when the k-th smallest
//! weight is part of the decomposition) is at `B + (T - S) * N + k`, and is
//! tested as `bits[off >> 3] & (1 << (off & 7))`.
//!
//! Compression applies to `bits` only. Offsets always refer to the
//! uncompressed layout, so a compressed buffer is inflated before lookup.

pub mod bitmap;
pub mod dense;

use crate::alphabet::{Alphabet, Target, Weight};
use crate::decomposition::{BestKnownMap, Decomposition};
use crate::errors::{CoreError, Result};
use crate::persist;
use bitmap::{byte_len, test_bit, BitBuffer};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

/// Bytes per range entry in the external runtime's table (three `u32`)
pub const RANGE_ENTRY_BYTES: usize = 12;

const MIB: f64 = 1024.0 * 1024.0;

/// A maximal run of consecutive resolved targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Target,
    /// Inclusive
    pub end: Target,
    /// Bit offset of `start`'s vector in the uncompressed buffer
    pub bit_offset: u64,
}

impl Range {
    /// Targets covered, both ends included
    pub fn target_count(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn contains(&self, target: Target) -> bool {
        self.start <= target && target <= self.end
    }

    /// Offset of bit 0 of `target`'s vector
    pub fn vector_offset(&self, target: Target, num_bits: usize) -> u64 {
        self.bit_offset + (target - self.start) * num_bits as u64
    }
}

/// Maximal ranges over ascending, distinct `targets`, with cumulative bit
/// offsets for `num_bits`-wide vectors.
pub fn compute_ranges(targets: impl IntoIterator<Item = Target>, num_bits: usize) -> Vec<Range> {
    let mut ranges: Vec<Range> = Vec::new();
    let mut next_offset = 0u64;
    for t in targets {
        match ranges.last_mut() {
            Some(last) if last.end + 1 == t => last.end = t,
            _ => {
                if let Some(last) = ranges.last() {
                    debug_assert!(t > last.end + 1, "targets must be ascending and distinct");
                    next_offset = last.bit_offset + last.target_count() * num_bits as u64;
                }
                ranges.push(Range {
                    start: t,
                    end: t,
                    bit_offset: next_offset,
                });
            }
        }
    }
    ranges
}

/// Optional lossless compression of the bit buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    /// zlib stream, level 0..=9
    Zlib { level: u32 },
}

/// Compact lookup artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Diagnostic labels, index `k` ↔ `alphabet[k]`
    pub labels: Vec<String>,
    /// Ascending weights (codec index order)
    pub alphabet: Vec<Weight>,
    /// Bits per target vector (`N`)
    pub num_bits: usize,
    pub ranges: Vec<Range>,
    /// Bit buffer, compressed per `compression`
    pub bits: Vec<u8>,
    pub compression: Compression,
    /// Length of the uncompressed bit buffer in bytes
    pub raw_len: usize,
}

/// Storage accounting for an encode run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeReport {
    pub targets: usize,
    pub ranges: usize,
    pub raw_bytes: usize,
    pub compressed_bytes: Option<usize>,
    pub range_table_bytes: usize,
    /// Size of one byte-aligned vector per target over `[min, max]`
    pub dense_bytes: u64,
}

impl EncodeReport {
    /// Bit buffer as stored (compressed if applied) plus the range table
    pub fn storage_bytes(&self) -> u64 {
        (self.compressed_bytes.unwrap_or(self.raw_bytes) + self.range_table_bytes) as u64
    }

    pub fn saved_bytes(&self) -> i64 {
        self.dense_bytes as i64 - self.storage_bytes() as i64
    }
}

impl fmt::Display for EncodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bitmap = self.compressed_bytes.unwrap_or(self.raw_bytes);
        writeln!(
            f,
            "Targets: {}, ranges: {}",
            self.targets, self.ranges
        )?;
        if let Some(z) = self.compressed_bytes {
            writeln!(
                f,
                "Bitmaps: {:.3} -> {:.3} MiB after compression",
                self.raw_bytes as f64 / MIB,
                z as f64 / MIB
            )?;
        }
        writeln!(
            f,
            "Storage: {:.3} (bitmaps) + {:.3} (ranges) = {:.3} MiB",
            bitmap as f64 / MIB,
            self.range_table_bytes as f64 / MIB,
            self.storage_bytes() as f64 / MIB
        )?;
        writeln!(f, "Dense storage: {:.3} MiB", self.dense_bytes as f64 / MIB)?;
        write!(f, "Saved: {:.3} MiB", self.saved_bytes() as f64 / MIB)
    }
}

/// Encode `map` into a range-indexed artifact.
///
/// Fails when a decomposition uses a weight outside `alphabet`.
pub fn encode(
    map: &BestKnownMap,
    alphabet: &Alphabet,
    compression: Compression,
) -> Result<(Artifact, EncodeReport)> {
    let num_bits = alphabet.len();
    let ranges = compute_ranges(map.keys().copied(), num_bits);
    let total_bits = ranges
        .last()
        .map_or(0, |r| r.bit_offset + r.target_count() * num_bits as u64);

    let mut buf = BitBuffer::zeroed(total_bits);
    for range in &ranges {
        for target in range.start..=range.end {
            let base = range.vector_offset(target, num_bits);
            // ranges are built from the map keys, so every target is present
            let Some(dec) = map.get(&target) else {
                return Err(CoreError::corrupt_artifact(format!(
                    "range {}..={} covers unresolved target {}",
                    range.start, range.end, target
                )));
            };
            for &w in dec.weights() {
                let k = alphabet
                    .index_of(w)
                    .ok_or(CoreError::UnknownWeight { target, weight: w })?;
                buf.set(base + k as u64);
            }
        }
    }
    let raw = buf.into_bytes();
    let raw_len = raw.len();

    let (bits, compressed_bytes) = match compression {
        Compression::None => (raw, None),
        Compression::Zlib { level } => {
            let z = deflate(&raw, level)?;
            let len = z.len();
            (z, Some(len))
        }
    };

    let dense_bytes = match (map.keys().next(), map.keys().next_back()) {
        (Some(&min), Some(&max)) => dense::dense_size(min, max, num_bits),
        _ => 0,
    };
    let report = EncodeReport {
        targets: map.len(),
        ranges: ranges.len(),
        raw_bytes: raw_len,
        compressed_bytes,
        range_table_bytes: ranges.len() * RANGE_ENTRY_BYTES,
        dense_bytes,
    };
    info!(
        "Encoded {} targets into {} ranges, {} bitmap bytes ({} stored)",
        report.targets,
        report.ranges,
        report.raw_bytes,
        compressed_bytes.unwrap_or(raw_len)
    );

    let artifact = Artifact {
        labels: alphabet.labels(),
        alphabet: alphabet.weights().to_vec(),
        num_bits,
        ranges,
        bits,
        compression,
        raw_len,
    };
    Ok((artifact, report))
}

fn deflate(raw: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder.write_all(raw)?;
    Ok(encoder.finish()?)
}

fn inflate(z: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_len);
    ZlibDecoder::new(z).read_to_end(&mut out)?;
    Ok(out)
}

impl Artifact {
    pub fn min_target(&self) -> Option<Target> {
        self.ranges.first().map(|r| r.start)
    }

    pub fn max_target(&self) -> Option<Target> {
        self.ranges.last().map(|r| r.end)
    }

    /// Uncompressed bit buffer
    pub fn raw_bits(&self) -> Result<Cow<'_, [u8]>> {
        match self.compression {
            Compression::None => Ok(Cow::Borrowed(&self.bits)),
            Compression::Zlib { .. } => Ok(Cow::Owned(inflate(&self.bits, self.raw_len)?)),
        }
    }

    /// Reader over the uncompressed layout; inflates once.
    pub fn reader(&self) -> Result<ArtifactReader<'_>> {
        if self.alphabet.len() != self.num_bits || self.labels.len() != self.num_bits {
            return Err(CoreError::corrupt_artifact(format!(
                "{} alphabet weights and {} labels for {}-bit vectors",
                self.alphabet.len(),
                self.labels.len(),
                self.num_bits
            )));
        }
        let needed = self.checked_bit_len()?;
        let bits = self.raw_bits()?;
        if bits.len() != byte_len(needed) {
            return Err(CoreError::corrupt_artifact(format!(
                "range table needs {} bytes, buffer holds {}",
                byte_len(needed),
                bits.len()
            )));
        }
        Ok(ArtifactReader {
            artifact: self,
            bits,
        })
    }

    /// Bits covered by the range table. Ranges must be ascending, disjoint
    /// and packed back to back from offset 0.
    fn checked_bit_len(&self) -> Result<u64> {
        let width = self.num_bits as u64;
        let mut next_offset = 0u64;
        let mut prev_end: Option<Target> = None;
        for (i, r) in self.ranges.iter().enumerate() {
            if r.end < r.start || prev_end.is_some_and(|end| r.start <= end) {
                return Err(CoreError::corrupt_artifact(format!(
                    "range {} ({}..={}) is out of order",
                    i, r.start, r.end
                )));
            }
            if r.bit_offset != next_offset {
                return Err(CoreError::corrupt_artifact(format!(
                    "range {} starts at bit {}, expected {}",
                    i, r.bit_offset, next_offset
                )));
            }
            next_offset = r
                .target_count()
                .checked_mul(width)
                .and_then(|bits| bits.checked_add(next_offset))
                .ok_or_else(|| CoreError::corrupt_artifact(format!("range {} overflows", i)))?;
            prev_end = Some(r.end);
        }
        Ok(next_offset)
    }

    /// One-off lookup. Use [`Artifact::reader`] for repeated queries.
    pub fn query(&self, target: Target) -> Result<Option<Decomposition>> {
        Ok(self.reader()?.query(target))
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        persist::atomic_write_bincode(path, self)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        persist::read_bincode(path)
    }
}

/// Random-access lookups over an artifact's uncompressed bit buffer
pub struct ArtifactReader<'a> {
    artifact: &'a Artifact,
    bits: Cow<'a, [u8]>,
}

impl<'a> ArtifactReader<'a> {
    /// Range holding `target`, by binary search
    pub fn range_of(&self, target: Target) -> Option<&'a Range> {
        let ranges = &self.artifact.ranges;
        let idx = ranges.partition_point(|r| r.end < target);
        ranges.get(idx).filter(|r| r.contains(target))
    }

    /// Decomposition of `target`, or `None` when it is not resolved
    pub fn query(&self, target: Target) -> Option<Decomposition> {
        let range = self.range_of(target)?;
        let n = self.artifact.num_bits;
        let base = range.vector_offset(target, n);
        let weights = (0..n)
            .filter(|&k| test_bit(&self.bits, base + k as u64))
            .map(|k| self.artifact.alphabet[k])
            .collect();
        Some(Decomposition::new(weights))
    }

    /// Labels of the weights in `target`'s decomposition, ascending weight
    pub fn query_labels(&self, target: Target) -> Option<Vec<&'a str>> {
        let range = self.range_of(target)?;
        let n = self.artifact.num_bits;
        let base = range.vector_offset(target, n);
        Some(
            (0..n)
                .filter(|&k| test_bit(&self.bits, base + k as u64))
                .map(|k| self.artifact.labels[k].as_str())
                .collect(),
        )
    }
}
