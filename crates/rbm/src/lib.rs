#![forbid(unsafe_code)]
//! Random-block manager: persistent block allocation over a raw device.
//!
//! The manager owns a byte-addressed device laid out as superblock |
//! bitmap area | data area, and hands out runs of fixed-size blocks to the
//! layers above it. Allocations and frees are staged as deltas on a
//! caller-owned [`Transaction`] and folded into the on-disk bitmap by
//! [`RandomBlockManager::complete_allocation`]; until then nothing is
//! persisted, so aborting a transaction is free.
//!
//! ## Design
//!
//! - **One owner, serial I/O.** A manager instance is driven through
//!   `&mut self` / `&self` method chains by a single caller; every device
//!   touch is a `&Cx` checkpoint so long scans cancel cooperatively.
//! - **Bitmap read-modify-write.** Range updates read at most the two
//!   boundary bitmap blocks; interior blocks are synthesized, and the run
//!   is written back with a single device write.
//! - **First-fit finder.** The allocator scans the on-disk bitmap directly
//!   in block-id order, skipping blocks reserved by pending deltas of the
//!   same transaction.

mod transaction;

pub use rbm_ondisk::{BitmapOp, RbmSuperblock, RBM_BITMAP_BLOCK_CRC, RBM_SUPERBLOCK_SIZE};
pub use transaction::{AllocDelta, AllocOp, Transaction};

use asupersync::Cx;
use rbm_device::{AlignedVec, ByteDevice, OpenMode};
use rbm_error::{RbmError, Result};
use rbm_ondisk::{alloc_area_size, max_block_by_bitmap_block, BitmapBlock, RBM_MAGIC};
use rbm_types::{BlockAddr, BlockId, BlockSize, IntervalSet, ParseError};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use uuid::Uuid;

#[inline]
fn cx_checkpoint(cx: &Cx) -> Result<()> {
    cx.checkpoint().map_err(|_| RbmError::Cancelled)
}

/// Geometry for formatting a fresh device.
#[derive(Debug, Clone)]
pub struct MkfsConfig {
    /// Byte offset of the managed region on the device.
    pub start: u64,
    /// Byte offset one past the managed region.
    pub end: u64,
    /// Allocation unit in bytes.
    pub block_size: u32,
    /// Total managed bytes; must equal `end - start`.
    pub total_size: u64,
}

impl MkfsConfig {
    fn validate(&self) -> Result<BlockSize> {
        let block_size = BlockSize::new(self.block_size)
            .map_err(|err| RbmError::InvalidConfig(err.to_string()))?;
        let bs = u64::from(self.block_size);

        if self.end <= self.start || self.end - self.start != self.total_size {
            return Err(RbmError::InvalidConfig(format!(
                "total_size {} does not match [start, end) = [{}, {})",
                self.total_size, self.start, self.end
            )));
        }
        if !block_size.divides(self.total_size) || !block_size.divides(self.start) {
            return Err(RbmError::InvalidConfig(format!(
                "start {} and total_size {} must be multiples of block_size {}",
                self.start, self.total_size, self.block_size
            )));
        }
        if RBM_SUPERBLOCK_SIZE % bs != 0 {
            return Err(RbmError::InvalidConfig(format!(
                "block_size {} must divide the superblock region ({RBM_SUPERBLOCK_SIZE})",
                self.block_size
            )));
        }
        if self.total_size < 2 * bs {
            return Err(RbmError::InvalidConfig(format!(
                "total_size {} leaves no room for metadata",
                self.total_size
            )));
        }
        let metadata = RBM_SUPERBLOCK_SIZE + alloc_area_size(self.total_size, block_size);
        if metadata > self.total_size {
            return Err(RbmError::InvalidConfig(format!(
                "total_size {} cannot hold {metadata} bytes of metadata",
                self.total_size
            )));
        }
        Ok(block_size)
    }
}

/// Persistent block allocator over a byte-addressed device.
#[derive(Debug)]
pub struct RandomBlockManager<D: ByteDevice> {
    device: D,
    path: PathBuf,
    sb: Option<RbmSuperblock>,
}

impl<D: ByteDevice> RandomBlockManager<D> {
    /// Wrap `device`, to be opened from `path`. No I/O happens here.
    pub fn new(device: D, path: impl Into<PathBuf>) -> Self {
        Self {
            device,
            path: path.into(),
            sb: None,
        }
    }

    /// Decoded superblock, once `mkfs` or `open` has installed one.
    #[must_use]
    pub fn superblock(&self) -> Option<&RbmSuperblock> {
        self.sb.as_ref()
    }

    /// Current in-memory free-block count.
    ///
    /// Updated by `complete_allocation`; persisted only by
    /// [`Self::write_superblock`].
    #[must_use]
    pub fn free_block_count(&self) -> u64 {
        self.sb.as_ref().map_or(0, |sb| sb.free_block_count)
    }

    fn require_superblock(&self) -> Result<&RbmSuperblock> {
        self.sb
            .as_ref()
            .ok_or_else(|| RbmError::NotFound("no superblock loaded".to_owned()))
    }

    fn open_device(&mut self, cx: &Cx) -> Result<()> {
        let path = self.path.clone();
        self.device.open(cx, &path, OpenMode::ReadWrite)
    }

    // ── Format / attach ─────────────────────────────────────────────────

    /// Format the device described by `config`, or do nothing if a valid
    /// superblock is already present.
    ///
    /// The device is opened for the duration of the call and closed again
    /// on every path, success or error.
    pub fn mkfs(&mut self, cx: &Cx, config: MkfsConfig) -> Result<()> {
        let block_size = config.validate()?;
        debug!(
            target: "rbm::mkfs",
            path = %self.path.display(),
            start = config.start,
            total_size = config.total_size,
            block_size = config.block_size
        );
        self.open_device(cx)?;
        let result = self.mkfs_inner(cx, &config, block_size);
        let closed = self.device.close();
        result.and(closed)
    }

    fn mkfs_inner(&mut self, cx: &Cx, config: &MkfsConfig, block_size: BlockSize) -> Result<()> {
        match self.read_rbm_header(cx, BlockAddr(config.start)) {
            Ok(existing) => {
                debug!(target: "rbm::mkfs", "device already formatted, keeping superblock");
                self.sb = Some(existing);
                return Ok(());
            }
            Err(RbmError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let bs = u64::from(config.block_size);
        let area = alloc_area_size(config.total_size, block_size);
        let sb = RbmSuperblock {
            uuid: *Uuid::new_v4().as_bytes(),
            magic: RBM_MAGIC,
            start: config.start,
            end: config.end,
            block_size: config.block_size,
            size: config.total_size,
            free_block_count: config.total_size / bs - 2,
            alloc_area_size: area,
            start_alloc_area: config.start + RBM_SUPERBLOCK_SIZE,
            start_data_area: config.start + RBM_SUPERBLOCK_SIZE + area,
            flag: 0,
            feature: RBM_BITMAP_BLOCK_CRC,
            crc: 0,
        };
        debug!(target: "rbm::mkfs", superblock = %sb);
        self.sb = Some(sb);
        self.write_superblock(cx)?;
        self.initialize_alloc_area(cx)?;
        self.device.sync(cx)
    }

    /// Populate the bitmap area of a freshly formatted device: metadata
    /// blocks allocated, data blocks free, tail slack permanently allocated.
    fn initialize_alloc_area(&mut self, cx: &Cx) -> Result<()> {
        let sb = self.require_superblock()?.clone();
        let block_size = self.block_size()?;
        let bs = u64::from(sb.block_size);
        let m = max_block_by_bitmap_block(block_size);

        // Superblock and bitmap area must never be handed out.
        let data_start_id = (sb.start_data_area - sb.start) / bs;
        let mut first = BitmapBlock::new(block_size);
        for i in 0..data_start_id.min(m) {
            first.set_bit(i);
        }
        let alloc_area_id = BlockId((sb.start_alloc_area - sb.start) / bs);
        self.sync_block_bitmap(cx, &first, alloc_area_id)?;

        // Mark the data region free, rounded up to whole bitmap blocks.
        let total_blocks = sb.size / bs;
        let end_id = total_blocks.div_ceil(m) * m - 1;
        debug!(
            target: "rbm::mkfs",
            data_start_id = data_start_id,
            end_id = end_id,
            "initialize bitmap area"
        );
        self.sync_block_bitmap_by_range(
            cx,
            BlockId(data_start_id),
            BlockId(end_id),
            BitmapOp::AllClear,
        )?;

        // Bit positions past the last real block never correspond to
        // storage; pin them allocated.
        let remain = total_blocks % m;
        if remain != 0 {
            let mut tail = if total_blocks > m {
                BitmapBlock::new(block_size)
            } else {
                first
            };
            for i in remain..m {
                tail.set_bit(i);
            }
            self.sync_block_bitmap(cx, &tail, BlockId(total_blocks))?;
        }
        Ok(())
    }

    /// Attach to an already formatted device.
    ///
    /// Reads the superblock at `addr` and installs it; a missing or
    /// unformatted superblock reports `NotFound`, a corrupt one reports
    /// `Corruption`.
    pub fn open(&mut self, cx: &Cx, path: impl AsRef<Path>, addr: BlockAddr) -> Result<()> {
        self.path = path.as_ref().to_path_buf();
        self.open_device(cx)?;
        match self.read_rbm_header(cx, addr) {
            Ok(sb) => {
                debug!(target: "rbm::open", superblock = %sb);
                self.sb = Some(sb);
                Ok(())
            }
            Err(err) => {
                let _ = self.device.close();
                Err(err)
            }
        }
    }

    /// Close the underlying device.
    pub fn close(&mut self) -> Result<()> {
        self.device.close()
    }

    // ── Superblock I/O ──────────────────────────────────────────────────

    fn read_rbm_header(&self, cx: &Cx, addr: BlockAddr) -> Result<RbmSuperblock> {
        let mut page = AlignedVec::zeroed(RBM_SUPERBLOCK_SIZE as usize);
        self.device.read_exact_at(cx, addr, page.as_mut_slice())?;
        match RbmSuperblock::decode(page.as_slice()) {
            Ok(sb) => Ok(sb),
            Err(ParseError::InvalidMagic { .. } | ParseError::InsufficientData { .. }) => {
                Err(RbmError::NotFound(format!(
                    "no valid superblock at offset {addr}"
                )))
            }
            Err(ParseError::ChecksumMismatch { expected, actual }) => Err(RbmError::Corruption {
                offset: addr.0,
                detail: format!(
                    "superblock CRC mismatch: expected {expected:#010x}, got {actual:#010x}"
                ),
            }),
            Err(err) => Err(RbmError::Format(err.to_string())),
        }
    }

    /// Re-encode and rewrite the superblock.
    ///
    /// `complete_allocation` only updates `free_block_count` in memory;
    /// callers persist it here at a safe point of their own choosing.
    pub fn write_superblock(&mut self, cx: &Cx) -> Result<()> {
        let sb = self
            .sb
            .as_mut()
            .ok_or_else(|| RbmError::NotFound("no superblock loaded".to_owned()))?;
        sb.crc = sb.compute_crc();
        let page = sb
            .encode_to_page(RBM_SUPERBLOCK_SIZE as usize)
            .map_err(|err| RbmError::Format(err.to_string()))?;
        let start = BlockAddr(sb.start);
        let mut buf = AlignedVec::zeroed(page.len());
        buf.as_mut_slice().copy_from_slice(&page);
        self.device.write_all_at(cx, start, buf.as_slice())
    }

    // ── Data-region I/O ─────────────────────────────────────────────────

    /// Read `buf.len()` bytes at `addr`.
    ///
    /// Bounds are checked against the managed region only; staying inside
    /// the data area is the caller's contract.
    pub fn read(&self, cx: &Cx, addr: BlockAddr, buf: &mut [u8]) -> Result<()> {
        let sb = self.require_superblock()?;
        let limit = sb.end - sb.start;
        if addr.0 > limit || buf.len() as u64 > limit {
            return Err(RbmError::OutOfRange { addr: addr.0, limit });
        }
        self.device.read_exact_at(cx, addr, buf)
    }

    /// Write `buf` at `addr`. Same bounds contract as [`Self::read`].
    pub fn write(&self, cx: &Cx, addr: BlockAddr, buf: &[u8]) -> Result<()> {
        let sb = self.require_superblock()?;
        let limit = sb.end - sb.start;
        if addr.0 > limit {
            return Err(RbmError::OutOfRange { addr: addr.0, limit });
        }
        self.device.write_all_at(cx, addr, buf)
    }

    // ── Bitmap engine ───────────────────────────────────────────────────

    fn block_size(&self) -> Result<BlockSize> {
        self.require_superblock()?
            .block_size()
            .map_err(|err| RbmError::Format(err.to_string()))
    }

    fn bitmap_block_addr(&self, sb: &RbmSuperblock, id: BlockId, m: u64) -> BlockAddr {
        BlockAddr(sb.start_alloc_area + (id.0 / m) * u64::from(sb.block_size))
    }

    fn read_bitmap_block(&self, cx: &Cx, addr: BlockAddr) -> Result<BitmapBlock> {
        let sb = self.require_superblock()?;
        let mut page = AlignedVec::zeroed(sb.block_size as usize);
        self.device.read_exact_at(cx, addr, page.as_mut_slice())?;
        BitmapBlock::decode(page.as_slice(), sb.feature).map_err(|err| match err {
            ParseError::ChecksumMismatch { expected, actual } => RbmError::Corruption {
                offset: addr.0,
                detail: format!(
                    "bitmap block CRC mismatch: expected {expected:#010x}, got {actual:#010x}"
                ),
            },
            other => RbmError::Format(other.to_string()),
        })
    }

    fn write_aligned(&self, cx: &Cx, addr: BlockAddr, bytes: &[u8]) -> Result<()> {
        let mut buf = AlignedVec::zeroed(bytes.len());
        buf.as_mut_slice().copy_from_slice(bytes);
        self.device.write_all_at(cx, addr, buf.as_slice())
    }

    /// Write one already-populated bitmap block; `id` may be any block id
    /// covered by that bitmap block.
    fn sync_block_bitmap(&self, cx: &Cx, block: &BitmapBlock, id: BlockId) -> Result<()> {
        let sb = self.require_superblock()?;
        let m = max_block_by_bitmap_block(self.block_size()?);
        let addr = self.bitmap_block_addr(sb, id, m);
        trace!(target: "rbm::bitmap", event = "sync_block", id = id.0, addr = addr.0);
        self.write_aligned(cx, addr, &block.encode(sb.feature))
    }

    /// Apply `op` to every allocation bit in the inclusive id range
    /// `[start, end]`.
    ///
    /// Reads at most the two boundary bitmap blocks; interior blocks are
    /// synthesized fully set or fully clear, and the whole run is written
    /// back with one device write at the first bitmap block's address.
    pub fn sync_block_bitmap_by_range(
        &self,
        cx: &Cx,
        start: BlockId,
        end: BlockId,
        op: BitmapOp,
    ) -> Result<()> {
        debug_assert!(start <= end);
        let sb = self.require_superblock()?;
        let feature = sb.feature;
        let block_size = self.block_size()?;
        let bs = u64::from(sb.block_size);
        let m = max_block_by_bitmap_block(block_size);

        let first_no = start.0 / m;
        let last_no = end.0 / m;
        let num_blocks = last_no - first_no + 1;
        let addr = self.bitmap_block_addr(sb, start, m);
        trace!(
            target: "rbm::bitmap",
            event = "sync_range",
            start = start.0,
            end = end.0,
            num_blocks = num_blocks,
            op = ?op
        );

        // Fully aligned: no read needed, synthesize the whole run.
        if start.0 % m == 0 && (end.0 + 1) % m == 0 {
            let full = BitmapBlock::filled(block_size, op).encode(feature);
            let mut run = Vec::with_capacity((num_blocks * bs) as usize);
            for _ in 0..num_blocks {
                run.extend_from_slice(&full);
            }
            return self.write_aligned(cx, addr, &run);
        }

        // Read-modify the front block's tail.
        let mut front = self.read_bitmap_block(cx, addr)?;
        let front_end = if end.0 < (first_no + 1) * m {
            end.0 % m
        } else {
            m - 1
        };
        for i in (start.0 % m)..=front_end {
            match op {
                BitmapOp::AllSet => front.set_bit(i),
                BitmapOp::AllClear => front.clear_bit(i),
            }
        }
        let mut run = front.encode(feature);

        if num_blocks == 1 {
            // | front (unaligned) |
            return self.write_aligned(cx, addr, &run);
        }

        let full = BitmapBlock::filled(block_size, op).encode(feature);
        if (end.0 + 1) % m == 0 {
            // | front (unaligned) | middle (aligned) |
            for _ in 0..num_blocks - 1 {
                run.extend_from_slice(&full);
            }
            debug_assert_eq!(run.len() as u64, num_blocks * bs);
            return self.write_aligned(cx, addr, &run);
        }

        // | front (unaligned) | middle | back (unaligned) |
        for _ in 0..num_blocks.saturating_sub(2) {
            run.extend_from_slice(&full);
        }

        let next_addr = self.bitmap_block_addr(sb, end, m);
        let mut back = self.read_bitmap_block(cx, next_addr)?;
        for i in 0..=(end.0 % m) {
            match op {
                BitmapOp::AllSet => back.set_bit(i),
                BitmapOp::AllClear => back.clear_bit(i),
            }
        }
        run.extend_from_slice(&back.encode(feature));

        // The single write must cover [addr, next_addr + block_size)
        // exactly; a hole here would clobber unrelated bitmap blocks.
        debug_assert_eq!(run.len() as u64, next_addr.0 + bs - addr.0);
        self.write_aligned(cx, addr, &run)
    }

    // ── Allocator ───────────────────────────────────────────────────────

    /// First-fit scan for `ceil(size / block_size)` contiguous free blocks.
    ///
    /// Returns the empty set when no contiguous run of that length exists.
    /// Blocks reserved by pending `Set` deltas of `txn` are treated as
    /// allocated.
    pub fn find_free_block(&self, cx: &Cx, txn: &Transaction, size: u64) -> Result<IntervalSet> {
        let sb = self.require_superblock()?;
        let bs = u64::from(sb.block_size);
        let m = max_block_by_bitmap_block(self.block_size()?);
        let needed = size.div_ceil(bs);

        let mut found = IntervalSet::new();
        let mut allocated = 0_u64;
        let mut addr = sb.start_alloc_area;

        while allocated < needed && addr < sb.start_data_area {
            cx_checkpoint(cx)?;
            let block = self.read_bitmap_block(cx, BlockAddr(addr))?;
            let base = (addr - sb.start_alloc_area) / bs * m;

            for i in 0..m {
                if allocated >= needed {
                    break;
                }
                let id = BlockId(base + i);
                if txn.reserves(id) {
                    continue;
                }
                if block.is_allocated(i) {
                    continue;
                }
                if allocated != 0 && found.range_end() != Some(id) {
                    // Discontiguous: restart the run at this id.
                    trace!(
                        target: "rbm::alloc",
                        event = "run_restart",
                        at = id.0,
                        had = allocated
                    );
                    allocated = 0;
                    found.clear();
                }
                allocated += 1;
                found.insert_one(id);
            }
            addr += bs;
        }

        if allocated < needed {
            found.clear();
        }
        trace!(
            target: "rbm::alloc",
            event = "find_free",
            requested = needed,
            found = %found
        );
        Ok(found)
    }

    /// Reserve `size` bytes worth of blocks on `txn`.
    ///
    /// On success a `Set` delta holding the chosen block ids is appended to
    /// the transaction; the on-disk bitmap is untouched until
    /// [`Self::complete_allocation`].
    pub fn alloc_extent(&self, cx: &Cx, txn: &mut Transaction, size: u64) -> Result<()> {
        let found = self.find_free_block(cx, txn, size)?;
        if found.is_empty() {
            return Err(RbmError::NoSpace);
        }
        debug!(target: "rbm::alloc", event = "alloc_extent", size = size, blocks = %found);
        txn.push(AllocDelta {
            op: AllocOp::Set,
            blk_ids: found,
        });
        Ok(())
    }

    /// Stage the blocks covering the inclusive byte range `[from, to]` for
    /// release.
    ///
    /// `to` is the last byte to free, not one past the end; the block
    /// containing it is included. No device I/O happens here.
    pub fn free_extent(&self, txn: &mut Transaction, from: BlockAddr, to: BlockAddr) -> Result<()> {
        debug_assert!(from <= to);
        let block_size = self.block_size()?;
        let start_id = block_size.addr_to_block(from);
        let end_id = block_size.addr_to_block(to);

        let mut blk_ids = IntervalSet::new();
        blk_ids.insert(start_id, end_id.0 - start_id.0 + 1);
        debug!(target: "rbm::alloc", event = "free_extent", blocks = %blk_ids);
        txn.push(AllocDelta {
            op: AllocOp::Clear,
            blk_ids,
        });
        Ok(())
    }

    /// Discard every pending delta on `txn`. No device I/O.
    pub fn abort_allocation(&self, txn: &mut Transaction) {
        debug!(target: "rbm::alloc", event = "abort", deltas = txn.deltas().len());
        txn.clear();
    }

    /// Fold the transaction's deltas into the on-disk bitmap.
    ///
    /// Deltas are persisted in insertion order, intervals within a delta in
    /// ascending order. After every range is durable, `free_block_count` is
    /// adjusted in memory (persist via [`Self::write_superblock`]) and the
    /// transaction is drained.
    pub fn complete_allocation(&mut self, cx: &Cx, txn: &mut Transaction) -> Result<()> {
        if txn.is_empty() {
            return Ok(());
        }

        let mut set_total = 0_u64;
        let mut clear_total = 0_u64;
        for delta in txn.deltas() {
            let op = match delta.op {
                AllocOp::Set => BitmapOp::AllSet,
                AllocOp::Clear => BitmapOp::AllClear,
            };
            for (start, len) in delta.blk_ids.iter() {
                debug!(
                    target: "rbm::alloc",
                    event = "commit_range",
                    start = start.0,
                    len = len,
                    op = ?op
                );
                self.sync_block_bitmap_by_range(cx, start, BlockId(start.0 + len - 1), op)?;
                match delta.op {
                    AllocOp::Set => set_total += len,
                    AllocOp::Clear => clear_total += len,
                }
            }
        }

        let sb = self
            .sb
            .as_mut()
            .ok_or_else(|| RbmError::NotFound("no superblock loaded".to_owned()))?;
        sb.free_block_count = sb
            .free_block_count
            .saturating_sub(set_total)
            .saturating_add(clear_total);
        debug!(
            target: "rbm::alloc",
            event = "commit",
            set = set_total,
            cleared = clear_total,
            free_block_count = sb.free_block_count
        );
        txn.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbm_device::FileByteDevice;

    fn test_cx() -> Cx {
        Cx::for_testing()
    }

    fn config(total_size: u64, block_size: u32) -> MkfsConfig {
        MkfsConfig {
            start: 0,
            end: total_size,
            block_size,
            total_size,
        }
    }

    #[test]
    fn config_validation_rejects_bad_geometry() {
        // Too small for metadata.
        assert!(matches!(
            config(4096, 4096).validate(),
            Err(RbmError::InvalidConfig(_))
        ));
        // Not power of two.
        assert!(matches!(
            config(1_048_576, 3000).validate(),
            Err(RbmError::InvalidConfig(_))
        ));
        // total_size disagrees with [start, end).
        let cfg = MkfsConfig {
            start: 0,
            end: 8192,
            block_size: 4096,
            total_size: 16384,
        };
        assert!(matches!(cfg.validate(), Err(RbmError::InvalidConfig(_))));
        // Unaligned total.
        assert!(matches!(
            config(10_000, 4096).validate(),
            Err(RbmError::InvalidConfig(_))
        ));
        // Block size larger than the superblock region.
        assert!(matches!(
            config(1_048_576, 65536).validate(),
            Err(RbmError::InvalidConfig(_))
        ));
        // Sane geometry passes.
        assert!(config(1_048_576, 4096).validate().is_ok());
    }

    #[test]
    fn operations_require_a_superblock() {
        let cx = test_cx();
        let mgr = RandomBlockManager::new(FileByteDevice::new(), "/tmp/none");
        let mut txn = Transaction::new();

        assert!(matches!(
            mgr.find_free_block(&cx, &txn, 4096),
            Err(RbmError::NotFound(_))
        ));
        assert!(matches!(
            mgr.free_extent(&mut txn, BlockAddr(0), BlockAddr(4095)),
            Err(RbmError::NotFound(_))
        ));
        let mut buf = [0_u8; 16];
        assert!(matches!(
            mgr.read(&cx, BlockAddr(0), &mut buf),
            Err(RbmError::NotFound(_))
        ));
    }

    #[test]
    fn abort_drains_the_transaction() {
        let mgr = RandomBlockManager::new(FileByteDevice::new(), "/tmp/none");
        let mut txn = Transaction::new();
        let mut blk_ids = IntervalSet::new();
        blk_ids.insert(BlockId(5), 3);
        txn.push(AllocDelta {
            op: AllocOp::Set,
            blk_ids,
        });

        mgr.abort_allocation(&mut txn);
        assert!(txn.is_empty());
    }
}
