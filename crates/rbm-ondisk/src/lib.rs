#![forbid(unsafe_code)]
//! On-disk format for the random-block manager.
//!
//! Pure codec crate, no I/O. Two records exist on disk:
//! the superblock describing the device geometry and allocator state, and
//! the bitmap block (small header + packed bit array) tracking per-block
//! allocation. Both carry CRC32C checksums computed with the checksum field
//! zeroed.
//!
//! Byte order is little-endian throughout.

use rbm_types::{
    read_fixed, read_le_u32, read_le_u64, BlockSize, ParseError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of the superblock region: one aligned 4 KiB block.
pub const RBM_SUPERBLOCK_SIZE: u64 = 4096;

/// Sentinel identifying a formatted device.
pub const RBM_MAGIC: u64 = 0xFF;

/// Feature bit: bitmap blocks carry a CRC32C over their bit array.
pub const RBM_BITMAP_BLOCK_CRC: u32 = 0x1;

/// Bytes of the bitmap-block header preceding the bit array.
pub const BITMAP_BLOCK_HEADER_SIZE: usize = 8;

/// Encoded byte length of the superblock record (before page padding).
pub const SUPERBLOCK_ENCODED_LEN: usize = 96;

/// Number of block-allocation bits a single bitmap block holds.
///
/// The largest whole-byte bit count that fits after the header.
#[must_use]
pub fn max_block_by_bitmap_block(block_size: BlockSize) -> u64 {
    (u64::from(block_size.get()) - BITMAP_BLOCK_HEADER_SIZE as u64) * 8
}

/// Size in bytes of the bitmap area needed to cover every device block.
#[must_use]
pub fn alloc_area_size(total_size: u64, block_size: BlockSize) -> u64 {
    let total_blocks = total_size / u64::from(block_size.get());
    let per_block = max_block_by_bitmap_block(block_size);
    total_blocks.div_ceil(per_block) * u64::from(block_size.get())
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// On-disk superblock: device geometry and allocator state.
///
/// Encoded field order (all little-endian):
/// `uuid[16] | magic u64 | start u64 | end u64 | block_size u32 | size u64 |
/// free_block_count u64 | alloc_area_size u64 | start_alloc_area u64 |
/// start_data_area u64 | flag u32 | feature u32 | crc u32`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbmSuperblock {
    pub uuid: [u8; 16],
    pub magic: u64,
    pub start: u64,
    pub end: u64,
    pub block_size: u32,
    pub size: u64,
    pub free_block_count: u64,
    pub alloc_area_size: u64,
    pub start_alloc_area: u64,
    pub start_data_area: u64,
    pub flag: u32,
    pub feature: u32,
    pub crc: u32,
}

impl RbmSuperblock {
    /// Whether bitmap blocks on this device carry per-block CRCs.
    #[must_use]
    pub fn bitmap_crc_enabled(&self) -> bool {
        self.feature & RBM_BITMAP_BLOCK_CRC != 0
    }

    /// Validated block size of this device.
    pub fn block_size(&self) -> Result<BlockSize, ParseError> {
        BlockSize::new(self.block_size)
    }

    fn encode_fields(&self, out: &mut [u8], crc: u32) {
        out[0..16].copy_from_slice(&self.uuid);
        out[16..24].copy_from_slice(&self.magic.to_le_bytes());
        out[24..32].copy_from_slice(&self.start.to_le_bytes());
        out[32..40].copy_from_slice(&self.end.to_le_bytes());
        out[40..44].copy_from_slice(&self.block_size.to_le_bytes());
        out[44..52].copy_from_slice(&self.size.to_le_bytes());
        out[52..60].copy_from_slice(&self.free_block_count.to_le_bytes());
        out[60..68].copy_from_slice(&self.alloc_area_size.to_le_bytes());
        out[68..76].copy_from_slice(&self.start_alloc_area.to_le_bytes());
        out[76..84].copy_from_slice(&self.start_data_area.to_le_bytes());
        out[84..88].copy_from_slice(&self.flag.to_le_bytes());
        out[88..92].copy_from_slice(&self.feature.to_le_bytes());
        out[92..96].copy_from_slice(&crc.to_le_bytes());
    }

    /// Encode into a zero-padded page of `page_len` bytes with a fresh CRC.
    ///
    /// The CRC is CRC32C over the 96 encoded bytes with the crc field zeroed.
    pub fn encode_to_page(&self, page_len: usize) -> Result<Vec<u8>, ParseError> {
        if page_len < SUPERBLOCK_ENCODED_LEN {
            return Err(ParseError::InvalidField {
                field: "page_len",
                reason: "smaller than encoded superblock",
            });
        }
        let mut page = vec![0_u8; page_len];
        self.encode_fields(&mut page, 0);
        let crc = crc32c::crc32c(&page[..SUPERBLOCK_ENCODED_LEN]);
        page[92..96].copy_from_slice(&crc.to_le_bytes());
        Ok(page)
    }

    /// CRC the current field values would produce on encode.
    #[must_use]
    pub fn compute_crc(&self) -> u32 {
        let mut raw = [0_u8; SUPERBLOCK_ENCODED_LEN];
        self.encode_fields(&mut raw, 0);
        crc32c::crc32c(&raw)
    }

    /// Decode a superblock from the start of `data`.
    ///
    /// The magic sentinel is checked first (`InvalidMagic` means "not
    /// formatted"), then the stored CRC is verified against a recomputation
    /// with the crc field zeroed (`ChecksumMismatch` means corruption).
    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        let decoded = Self {
            uuid: read_fixed::<16>(data, 0)?,
            magic: read_le_u64(data, 16)?,
            start: read_le_u64(data, 24)?,
            end: read_le_u64(data, 32)?,
            block_size: read_le_u32(data, 40)?,
            size: read_le_u64(data, 44)?,
            free_block_count: read_le_u64(data, 52)?,
            alloc_area_size: read_le_u64(data, 60)?,
            start_alloc_area: read_le_u64(data, 68)?,
            start_data_area: read_le_u64(data, 76)?,
            flag: read_le_u32(data, 84)?,
            feature: read_le_u32(data, 88)?,
            crc: read_le_u32(data, 92)?,
        };

        if decoded.magic != RBM_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: RBM_MAGIC,
                actual: decoded.magic,
            });
        }

        let computed = decoded.compute_crc();
        if computed != decoded.crc {
            return Err(ParseError::ChecksumMismatch {
                expected: decoded.crc,
                actual: computed,
            });
        }

        Ok(decoded)
    }
}

impl fmt::Display for RbmSuperblock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "superblock(size={}, block_size={}, start={}, end={}, magic={:#x}, \
             free_block_count={}, alloc_area_size={}, start_alloc_area={}, \
             start_data_area={}, flag={:#x}, feature={:#x}, crc={:#010x})",
            self.size,
            self.block_size,
            self.start,
            self.end,
            self.magic,
            self.free_block_count,
            self.alloc_area_size,
            self.start_alloc_area,
            self.start_data_area,
            self.flag,
            self.feature,
            self.crc
        )
    }
}

// ── Bitmap block ────────────────────────────────────────────────────────────

/// Fill operation applied to a bit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmapOp {
    AllSet,
    AllClear,
}

/// One device block of allocation bits.
///
/// Bit `i` of bitmap block `B` tracks device block `B * M + i`, where `M` is
/// `max_block_by_bitmap_block`. Bits are LSB-first within each byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapBlock {
    block_size: u32,
    checksum: u32,
    bits: Vec<u8>,
}

impl BitmapBlock {
    /// A fresh all-clear bitmap block for the given device block size.
    #[must_use]
    pub fn new(block_size: BlockSize) -> Self {
        let payload = block_size.get() as usize - BITMAP_BLOCK_HEADER_SIZE;
        Self {
            block_size: block_size.get(),
            checksum: 0,
            bits: vec![0_u8; payload],
        }
    }

    /// A bitmap block with every bit set to `op`.
    #[must_use]
    pub fn filled(block_size: BlockSize, op: BitmapOp) -> Self {
        let mut block = Self::new(block_size);
        block.fill(op);
        block
    }

    /// Number of bits this block holds.
    #[must_use]
    pub fn bit_count(&self) -> u64 {
        self.bits.len() as u64 * 8
    }

    /// Set bit `idx` (mark allocated). Out-of-range indices are ignored.
    pub fn set_bit(&mut self, idx: u64) {
        let byte = (idx / 8) as usize;
        if byte < self.bits.len() {
            self.bits[byte] |= 1 << (idx % 8);
        }
    }

    /// Clear bit `idx` (mark free). Out-of-range indices are ignored.
    pub fn clear_bit(&mut self, idx: u64) {
        let byte = (idx / 8) as usize;
        if byte < self.bits.len() {
            self.bits[byte] &= !(1 << (idx % 8));
        }
    }

    /// Whether bit `idx` is set.
    #[must_use]
    pub fn is_allocated(&self, idx: u64) -> bool {
        let byte = (idx / 8) as usize;
        if byte >= self.bits.len() {
            return true;
        }
        (self.bits[byte] >> (idx % 8)) & 1 == 1
    }

    /// Overwrite every bit with `op`.
    pub fn fill(&mut self, op: BitmapOp) {
        let value = match op {
            BitmapOp::AllSet => 0xFF,
            BitmapOp::AllClear => 0x00,
        };
        self.bits.fill(value);
    }

    /// Number of set (allocated) bits.
    #[must_use]
    pub fn count_ones(&self) -> u64 {
        self.bits.iter().map(|b| u64::from(b.count_ones())).sum()
    }

    /// Encode into one full device block.
    ///
    /// When `feature` carries `RBM_BITMAP_BLOCK_CRC`, the checksum field is
    /// recomputed over the bit array; otherwise it is written as zero.
    #[must_use]
    pub fn encode(&self, feature: u32) -> Vec<u8> {
        let mut out = vec![0_u8; self.block_size as usize];
        let payload_len = self.bits.len() as u32;
        let checksum = if feature & RBM_BITMAP_BLOCK_CRC != 0 {
            crc32c::crc32c(&self.bits)
        } else {
            0
        };
        out[0..4].copy_from_slice(&payload_len.to_le_bytes());
        out[4..8].copy_from_slice(&checksum.to_le_bytes());
        out[8..].copy_from_slice(&self.bits);
        out
    }

    /// Decode one device block, verifying the checksum when the CRC feature
    /// is on.
    pub fn decode(data: &[u8], feature: u32) -> Result<Self, ParseError> {
        if data.len() <= BITMAP_BLOCK_HEADER_SIZE {
            return Err(ParseError::InsufficientData {
                needed: BITMAP_BLOCK_HEADER_SIZE + 1,
                offset: 0,
                actual: data.len(),
            });
        }
        let payload_len = read_le_u32(data, 0)? as usize;
        let checksum = read_le_u32(data, 4)?;
        if payload_len != data.len() - BITMAP_BLOCK_HEADER_SIZE {
            return Err(ParseError::InvalidField {
                field: "payload_len",
                reason: "does not match block size",
            });
        }
        let bits = data[BITMAP_BLOCK_HEADER_SIZE..].to_vec();

        if feature & RBM_BITMAP_BLOCK_CRC != 0 {
            let computed = crc32c::crc32c(&bits);
            if computed != checksum {
                return Err(ParseError::ChecksumMismatch {
                    expected: checksum,
                    actual: computed,
                });
            }
        }

        Ok(Self {
            block_size: u32::try_from(data.len()).map_err(|_| {
                ParseError::IntegerConversion {
                    field: "bitmap_block_size",
                }
            })?,
            checksum,
            bits,
        })
    }
}
