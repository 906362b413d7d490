#![forbid(unsafe_code)]
//! Core identifier types and primitives for the random-block manager.
//!
//! Everything here is pure data: block/byte newtypes with checked
//! arithmetic, little-endian read helpers for on-disk records, and the
//! `IntervalSet` used to carry extent reservations through a transaction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Dense index of a device block, counted from the start of the managed
/// region. Id 0 is the superblock block; data blocks begin at
/// `start_data_area / block_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u64);

/// Byte address within the managed region `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockAddr(pub u64);

/// Validated block size (power of two in 512..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [512, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(512..=65536).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 512..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Whether `value` is a whole number of blocks.
    #[must_use]
    pub fn divides(self, value: u64) -> bool {
        value % u64::from(self.0) == 0
    }

    /// Convert a byte address to the block id containing it (truncating).
    #[must_use]
    pub fn addr_to_block(self, addr: BlockAddr) -> BlockId {
        BlockId(addr.0 / u64::from(self.0))
    }

    /// Convert a block id to its byte address, `None` on overflow.
    #[must_use]
    pub fn block_to_addr(self, block: BlockId) -> Option<BlockAddr> {
        block.0.checked_mul(u64::from(self.0)).map(BlockAddr)
    }
}

impl BlockId {
    /// Add a block count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }

    /// Subtract a block count, returning `None` on underflow.
    #[must_use]
    pub fn checked_sub(self, count: u64) -> Option<Self> {
        self.0.checked_sub(count).map(Self)
    }
}

impl BlockAddr {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Parse errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

// ── Little-endian read helpers ──────────────────────────────────────────────

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

// ── Alignment helpers ───────────────────────────────────────────────────────

/// Round `value` down to the nearest multiple of `alignment`.
///
/// `alignment` must be a non-zero power of two; returns `None` otherwise.
#[must_use]
pub fn align_down(value: u64, alignment: u64) -> Option<u64> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return None;
    }
    Some(value & !(alignment - 1))
}

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be a non-zero power of two; returns `None` on overflow
/// or if `alignment` is invalid.
#[must_use]
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    if alignment == 0 || !alignment.is_power_of_two() {
        return None;
    }
    let mask = alignment - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

// ── IntervalSet ─────────────────────────────────────────────────────────────

/// Ordered set of disjoint half-open block-id ranges.
///
/// Ranges are kept maximal: `insert` merges overlapping and adjacent ranges,
/// so iteration always yields the minimal number of `(start, len)` pairs in
/// ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    // start -> len; invariant: disjoint and non-adjacent.
    ranges: BTreeMap<u64, u64>,
}

impl IntervalSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `[start, start + len)`, merging with neighbors.
    ///
    /// A zero-length insert is a no-op.
    pub fn insert(&mut self, start: BlockId, len: u64) {
        if len == 0 {
            return;
        }
        let mut new_start = start.0;
        let mut new_end = start.0.saturating_add(len);

        if let Some((&s, &l)) = self.ranges.range(..=new_start).next_back() {
            if s.saturating_add(l) >= new_start {
                new_start = s;
                new_end = new_end.max(s.saturating_add(l));
                self.ranges.remove(&s);
            }
        }

        while let Some((&s, &l)) = self.ranges.range(new_start..).next() {
            if s > new_end {
                break;
            }
            new_end = new_end.max(s.saturating_add(l));
            self.ranges.remove(&s);
        }

        self.ranges.insert(new_start, new_end - new_start);
    }

    /// Insert a single block id.
    pub fn insert_one(&mut self, id: BlockId) {
        self.insert(id, 1);
    }

    /// Whether `[start, start + len)` overlaps any stored range.
    #[must_use]
    pub fn intersects(&self, start: BlockId, len: u64) -> bool {
        if len == 0 {
            return false;
        }
        let end = start.0.saturating_add(len);
        match self.ranges.range(..end).next_back() {
            Some((&s, &l)) => s.saturating_add(l) > start.0,
            None => false,
        }
    }

    /// Whether a single block id is in the set.
    #[must_use]
    pub fn contains(&self, id: BlockId) -> bool {
        self.intersects(id, 1)
    }

    /// Exclusive end of the highest stored range, `None` when empty.
    #[must_use]
    pub fn range_end(&self) -> Option<BlockId> {
        self.ranges
            .iter()
            .next_back()
            .map(|(&s, &l)| BlockId(s.saturating_add(l)))
    }

    /// Total number of block ids covered.
    #[must_use]
    pub fn num_blocks(&self) -> u64 {
        self.ranges.values().sum()
    }

    /// Number of disjoint ranges.
    #[must_use]
    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Iterate `(start, len)` pairs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, u64)> + '_ {
        self.ranges.iter().map(|(&s, &l)| (BlockId(s), l))
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (start, len)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "[{}~{len}]", start.0)?;
        }
        write!(f, "}}")
    }
}
