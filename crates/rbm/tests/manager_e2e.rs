#![forbid(unsafe_code)]
//! End-to-end scenarios against file-backed images: format, attach,
//! allocate, free, commit, abort, and the bitmap range engine.

use asupersync::Cx;
use rbm::{AllocOp, BitmapOp, MkfsConfig, RandomBlockManager, Transaction};
use rbm_device::FileByteDevice;
use rbm_error::RbmError;
use rbm_ondisk::{max_block_by_bitmap_block, BitmapBlock, RBM_MAGIC};
use rbm_types::{BlockAddr, BlockId, BlockSize};
use std::io::{Read, Seek, SeekFrom, Write};
use tempfile::NamedTempFile;

fn test_cx() -> Cx {
    Cx::for_testing()
}

fn image(len: u64) -> NamedTempFile {
    let file = NamedTempFile::new().expect("create image");
    file.as_file().set_len(len).expect("size image");
    file
}

fn config(total_size: u64, block_size: u32) -> MkfsConfig {
    MkfsConfig {
        start: 0,
        end: total_size,
        block_size,
        total_size,
    }
}

/// mkfs a fresh image and attach to it.
fn format_and_open(
    image: &NamedTempFile,
    total_size: u64,
    block_size: u32,
) -> RandomBlockManager<FileByteDevice> {
    let cx = test_cx();
    let device = FileByteDevice::with_logical_block_size(block_size);
    let mut mgr = RandomBlockManager::new(device, image.path());
    mgr.mkfs(&cx, config(total_size, block_size)).expect("mkfs");
    mgr.open(&cx, image.path(), BlockAddr(0)).expect("open");
    mgr
}

/// Read bitmap block `index` back through the manager's data path.
fn read_bitmap_block(
    mgr: &RandomBlockManager<FileByteDevice>,
    cx: &Cx,
    index: u64,
) -> BitmapBlock {
    let sb = mgr.superblock().expect("superblock");
    let bs = sb.block_size as usize;
    let mut buf = vec![0_u8; bs];
    mgr.read(
        cx,
        BlockAddr(sb.start_alloc_area + index * bs as u64),
        &mut buf,
    )
    .expect("read bitmap block");
    BitmapBlock::decode(&buf, sb.feature).expect("decode bitmap block")
}

fn corrupt_byte(image: &NamedTempFile, offset: u64) {
    let mut file = image.reopen().expect("reopen image");
    file.seek(SeekFrom::Start(offset)).expect("seek");
    let mut byte = [0_u8; 1];
    file.read_exact(&mut byte).expect("read byte");
    file.seek(SeekFrom::Start(offset)).expect("seek back");
    file.write_all(&[byte[0] ^ 0xFF]).expect("write byte");
    file.flush().expect("flush");
}

// ── Format / attach ─────────────────────────────────────────────────────────

#[test]
fn mkfs_then_open_round_trips_superblock() {
    let image = image(1_048_576);
    let mgr = format_and_open(&image, 1_048_576, 4096);

    let sb = mgr.superblock().expect("superblock");
    assert_eq!(sb.magic, RBM_MAGIC);
    assert_eq!(sb.size, 1_048_576);
    assert_eq!(sb.block_size, 4096);
    assert_eq!(sb.free_block_count, 254);
    assert_eq!(sb.start_alloc_area, 4096);
    assert_eq!(sb.start_data_area, 8192);
    assert_eq!(sb.alloc_area_size, 4096);
    assert_eq!(sb.crc, sb.compute_crc());
}

#[test]
fn mkfs_is_idempotent() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mgr = format_and_open(&image, 1_048_576, 4096);
    let uuid = mgr.superblock().expect("superblock").uuid;

    // A second mkfs finds the existing superblock and keeps it.
    let mut again = RandomBlockManager::new(FileByteDevice::new(), image.path());
    again.mkfs(&cx, config(1_048_576, 4096)).expect("re-mkfs");
    assert_eq!(again.superblock().expect("superblock").uuid, uuid);
}

#[test]
fn open_unformatted_image_is_not_found() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mut mgr = RandomBlockManager::new(FileByteDevice::new(), image.path());
    let err = mgr.open(&cx, image.path(), BlockAddr(0)).unwrap_err();
    assert!(matches!(err, RbmError::NotFound(_)));
}

#[test]
fn corrupted_superblock_fails_open() {
    let cx = test_cx();
    let image = image(1_048_576);
    {
        let _mgr = format_and_open(&image, 1_048_576, 4096);
    }

    // Flip a bit inside the encoded geometry: CRC verification must fail.
    corrupt_byte(&image, 44);
    let mut mgr = RandomBlockManager::new(FileByteDevice::new(), image.path());
    let err = mgr.open(&cx, image.path(), BlockAddr(0)).unwrap_err();
    assert!(matches!(err, RbmError::Corruption { .. }));
}

#[test]
fn corrupted_magic_reads_as_unformatted() {
    let cx = test_cx();
    let image = image(1_048_576);
    {
        let _mgr = format_and_open(&image, 1_048_576, 4096);
    }

    corrupt_byte(&image, 16);
    let mut mgr = RandomBlockManager::new(FileByteDevice::new(), image.path());
    let err = mgr.open(&cx, image.path(), BlockAddr(0)).unwrap_err();
    assert!(matches!(err, RbmError::NotFound(_)));
}

#[test]
fn fresh_bitmap_reserves_metadata_blocks() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mgr = format_and_open(&image, 1_048_576, 4096);

    let block = read_bitmap_block(&mgr, &cx, 0);
    // Superblock (id 0) and the bitmap block (id 1) are allocated.
    assert!(block.is_allocated(0));
    assert!(block.is_allocated(1));
    // All 254 data blocks are free.
    for id in 2..256 {
        assert!(!block.is_allocated(id), "data block {id} not free");
    }
    // Tail slack past the last real block is pinned allocated.
    let m = max_block_by_bitmap_block(BlockSize::new(4096).unwrap());
    assert!(block.is_allocated(256));
    assert!(block.is_allocated(m - 1));
}

// ── Allocate / commit ───────────────────────────────────────────────────────

#[test]
fn alloc_two_blocks_and_commit() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mut mgr = format_and_open(&image, 1_048_576, 4096);

    let mut txn = Transaction::new();
    mgr.alloc_extent(&cx, &mut txn, 8192).expect("alloc");

    // First free data block is id 2, immediately after the bitmap area.
    let delta = &txn.deltas()[0];
    assert_eq!(delta.op, AllocOp::Set);
    let ranges: Vec<_> = delta.blk_ids.iter().collect();
    assert_eq!(ranges, vec![(BlockId(2), 2)]);

    mgr.complete_allocation(&cx, &mut txn).expect("commit");
    assert!(txn.is_empty());
    assert_eq!(mgr.free_block_count(), 252);

    let block = read_bitmap_block(&mgr, &cx, 0);
    assert!(block.is_allocated(2));
    assert!(block.is_allocated(3));
    assert!(!block.is_allocated(4));
}

#[test]
fn alloc_prefers_lowest_contiguous_run() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mgr = format_and_open(&image, 1_048_576, 4096);

    let txn = Transaction::new();
    let found = mgr.find_free_block(&cx, &txn, 5 * 4096).expect("find");
    let ranges: Vec<_> = found.iter().collect();
    assert_eq!(ranges, vec![(BlockId(2), 5)]);
}

#[test]
fn alloc_restarts_after_gap() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mgr = format_and_open(&image, 1_048_576, 4096);

    // Occupy ids 2 and 4, leaving a one-block hole at 3.
    mgr.sync_block_bitmap_by_range(&cx, BlockId(2), BlockId(2), BitmapOp::AllSet)
        .expect("pin 2");
    mgr.sync_block_bitmap_by_range(&cx, BlockId(4), BlockId(4), BitmapOp::AllSet)
        .expect("pin 4");

    // A two-block request cannot use the hole; the run restarts past it.
    let txn = Transaction::new();
    let found = mgr.find_free_block(&cx, &txn, 8192).expect("find");
    let ranges: Vec<_> = found.iter().collect();
    assert_eq!(ranges, vec![(BlockId(5), 2)]);
}

#[test]
fn allocations_within_one_transaction_are_disjoint() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mgr = format_and_open(&image, 1_048_576, 4096);

    let mut txn = Transaction::new();
    mgr.alloc_extent(&cx, &mut txn, 8192).expect("first alloc");
    mgr.alloc_extent(&cx, &mut txn, 8192).expect("second alloc");

    let first: Vec<_> = txn.deltas()[0].blk_ids.iter().collect();
    let second: Vec<_> = txn.deltas()[1].blk_ids.iter().collect();
    assert_eq!(first, vec![(BlockId(2), 2)]);
    assert_eq!(second, vec![(BlockId(4), 2)]);
}

#[test]
fn abort_leaves_image_byte_identical() {
    let cx = test_cx();
    let image = image(1_048_576);
    {
        let mut mgr = RandomBlockManager::new(FileByteDevice::new(), image.path());
        mgr.mkfs(&cx, config(1_048_576, 4096)).expect("mkfs");
    }
    let before = std::fs::read(image.path()).expect("snapshot before");

    let mut mgr = RandomBlockManager::new(FileByteDevice::new(), image.path());
    mgr.open(&cx, image.path(), BlockAddr(0)).expect("open");
    let mut txn = Transaction::new();
    mgr.alloc_extent(&cx, &mut txn, 4096).expect("alloc");
    mgr.abort_allocation(&mut txn);
    mgr.close().expect("close");

    let after = std::fs::read(image.path()).expect("snapshot after");
    assert_eq!(before, after);
}

#[test]
fn free_extent_round_trip() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mut mgr = format_and_open(&image, 1_048_576, 4096);

    let mut txn = Transaction::new();
    mgr.alloc_extent(&cx, &mut txn, 8192).expect("alloc");
    mgr.complete_allocation(&cx, &mut txn).expect("commit");
    assert_eq!(mgr.free_block_count(), 252);

    // Free ids 2..=3: `to` is the last byte of the last block.
    let mut txn2 = Transaction::new();
    mgr.free_extent(&mut txn2, BlockAddr(2 * 4096), BlockAddr(3 * 4096 + 4095))
        .expect("free");
    mgr.complete_allocation(&cx, &mut txn2).expect("commit free");

    assert_eq!(mgr.free_block_count(), 254);
    let block = read_bitmap_block(&mgr, &cx, 0);
    assert!(!block.is_allocated(2));
    assert!(!block.is_allocated(3));
}

#[test]
fn enospc_when_no_contiguous_run_remains() {
    let cx = test_cx();
    // 16 KiB: superblock, one bitmap block, two data blocks.
    let image = image(16384);
    let mgr = format_and_open(&image, 16384, 4096);
    assert_eq!(mgr.free_block_count(), 2);

    let mut txn = Transaction::new();
    mgr.alloc_extent(&cx, &mut txn, 8192).expect("alloc both blocks");

    let err = mgr.alloc_extent(&cx, &mut txn, 4096).unwrap_err();
    assert!(matches!(err, RbmError::NoSpace));
    // The failed allocation left the transaction untouched.
    assert_eq!(txn.deltas().len(), 1);
}

#[test]
fn exact_fill_then_enospc_after_commit() {
    let cx = test_cx();
    let image = image(16384);
    let mut mgr = format_and_open(&image, 16384, 4096);

    let mut txn = Transaction::new();
    mgr.alloc_extent(&cx, &mut txn, 8192).expect("fill device");
    mgr.complete_allocation(&cx, &mut txn).expect("commit");
    assert_eq!(mgr.free_block_count(), 0);

    let mut txn2 = Transaction::new();
    let err = mgr.alloc_extent(&cx, &mut txn2, 4096).unwrap_err();
    assert!(matches!(err, RbmError::NoSpace));
    assert!(txn2.is_empty());
    assert_eq!(mgr.free_block_count(), 0);
}

#[test]
fn corrupt_bitmap_block_surfaces_as_corruption() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mgr = format_and_open(&image, 1_048_576, 4096);

    // Damage the bit array of the first bitmap block behind the
    // manager's back.
    corrupt_byte(&image, 4096 + 100);

    let mut txn = Transaction::new();
    let err = mgr.alloc_extent(&cx, &mut txn, 4096).unwrap_err();
    assert!(matches!(err, RbmError::Corruption { .. }));
    assert!(txn.is_empty());
}

// ── Data-region I/O ─────────────────────────────────────────────────────────

#[test]
fn data_read_write_round_trip() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mgr = format_and_open(&image, 1_048_576, 4096);

    let payload = vec![0xA7_u8; 4096];
    mgr.write(&cx, BlockAddr(2 * 4096), &payload).expect("write");

    let mut back = vec![0_u8; 4096];
    mgr.read(&cx, BlockAddr(2 * 4096), &mut back).expect("read");
    assert_eq!(back, payload);
}

#[test]
fn out_of_range_io_is_rejected() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mgr = format_and_open(&image, 1_048_576, 4096);

    let mut buf = vec![0_u8; 4096];
    let err = mgr
        .read(&cx, BlockAddr(1_048_576 + 4096), &mut buf)
        .unwrap_err();
    assert!(matches!(err, RbmError::OutOfRange { .. }));

    let err = mgr
        .write(&cx, BlockAddr(1_048_576 + 4096), &buf)
        .unwrap_err();
    assert!(matches!(err, RbmError::OutOfRange { .. }));

    // Oversized read buffers are rejected up front as well.
    let mut huge = vec![0_u8; 2 * 1_048_576];
    let err = mgr.read(&cx, BlockAddr(0), &mut huge).unwrap_err();
    assert!(matches!(err, RbmError::OutOfRange { .. }));
}

// ── Bitmap range engine ─────────────────────────────────────────────────────

#[test]
fn unaligned_range_spanning_three_bitmap_blocks() {
    let cx = test_cx();
    // 512-byte blocks keep the geometry small: m = 4032 bits per bitmap
    // block, 9000 total blocks, three bitmap blocks, 936 bits of tail
    // slack in the last one.
    let block_size = BlockSize::new(512).unwrap();
    let m = max_block_by_bitmap_block(block_size);
    assert_eq!(m, 4032);
    let total_blocks = 9000_u64;
    let total_size = total_blocks * 512;
    let image = image(total_size);
    let mgr = format_and_open(&image, total_size, 512);

    let sb = mgr.superblock().expect("superblock");
    assert_eq!(sb.alloc_area_size, 3 * 512);
    assert_eq!(sb.start_data_area, 4096 + 3 * 512);
    // The 4 KiB superblock region spans eight 512-byte blocks, then the
    // three bitmap blocks; data starts at id 11.
    let data_start = 11_u64;

    // Front and back both land mid-bitmap-block.
    let (lo, hi) = (100_u64, 8200_u64);
    mgr.sync_block_bitmap_by_range(&cx, BlockId(lo), BlockId(hi), BitmapOp::AllSet)
        .expect("set range");

    let b0 = read_bitmap_block(&mgr, &cx, 0);
    for i in 0..data_start {
        assert!(b0.is_allocated(i), "metadata bit {i}");
    }
    for i in data_start..lo {
        assert!(!b0.is_allocated(i), "bit {i} below the range must stay clear");
    }
    for i in lo..m {
        assert!(b0.is_allocated(i), "front-block bit {i}");
    }

    let b1 = read_bitmap_block(&mgr, &cx, 1);
    for i in 0..m {
        assert!(b1.is_allocated(i), "middle-block bit {i}");
    }

    let b2 = read_bitmap_block(&mgr, &cx, 2);
    let hi_in_block = hi - 2 * m;
    for i in 0..=hi_in_block {
        assert!(b2.is_allocated(i), "back-block bit {i}");
    }
    let slack_start = total_blocks % m;
    for i in (hi_in_block + 1)..slack_start {
        assert!(!b2.is_allocated(i), "bit {i} above the range must stay clear");
    }
    for i in slack_start..m {
        assert!(b2.is_allocated(i), "slack bit {i}");
    }

    // Clearing the same range restores the freshly formatted picture.
    mgr.sync_block_bitmap_by_range(&cx, BlockId(lo), BlockId(hi), BitmapOp::AllClear)
        .expect("clear range");

    let b0 = read_bitmap_block(&mgr, &cx, 0);
    for i in 0..data_start {
        assert!(b0.is_allocated(i));
    }
    for i in data_start..m {
        assert!(!b0.is_allocated(i));
    }
    let b1 = read_bitmap_block(&mgr, &cx, 1);
    for i in 0..m {
        assert!(!b1.is_allocated(i));
    }
    let b2 = read_bitmap_block(&mgr, &cx, 2);
    for i in 0..slack_start {
        assert!(!b2.is_allocated(i));
    }
    for i in slack_start..m {
        assert!(b2.is_allocated(i));
    }
}

#[test]
fn fully_aligned_range_update() {
    let cx = test_cx();
    let block_size = BlockSize::new(512).unwrap();
    let m = max_block_by_bitmap_block(block_size);
    let total_blocks = 9000_u64;
    let image = image(total_blocks * 512);
    let mgr = format_and_open(&image, total_blocks * 512, 512);

    // Exactly the middle bitmap block: [m, 2m).
    mgr.sync_block_bitmap_by_range(&cx, BlockId(m), BlockId(2 * m - 1), BitmapOp::AllSet)
        .expect("set aligned");

    let b0 = read_bitmap_block(&mgr, &cx, 0);
    assert!(!b0.is_allocated(m - 1));
    let b1 = read_bitmap_block(&mgr, &cx, 1);
    assert_eq!(b1.count_ones(), m);
    let b2 = read_bitmap_block(&mgr, &cx, 2);
    assert!(!b2.is_allocated(0));
}

#[test]
fn front_unaligned_back_aligned_range() {
    let cx = test_cx();
    let block_size = BlockSize::new(512).unwrap();
    let m = max_block_by_bitmap_block(block_size);
    let total_blocks = 9000_u64;
    let image = image(total_blocks * 512);
    let mgr = format_and_open(&image, total_blocks * 512, 512);

    // Starts mid-block, ends exactly on a bitmap-block boundary.
    mgr.sync_block_bitmap_by_range(&cx, BlockId(20), BlockId(2 * m - 1), BitmapOp::AllSet)
        .expect("set range");

    let b0 = read_bitmap_block(&mgr, &cx, 0);
    assert!(!b0.is_allocated(19));
    for i in 20..m {
        assert!(b0.is_allocated(i));
    }
    let b1 = read_bitmap_block(&mgr, &cx, 1);
    assert_eq!(b1.count_ones(), m);
    let b2 = read_bitmap_block(&mgr, &cx, 2);
    assert!(!b2.is_allocated(0));
}

// ── Superblock persistence ──────────────────────────────────────────────────

#[test]
fn write_superblock_persists_free_count() {
    let cx = test_cx();
    let image = image(1_048_576);
    let mut mgr = format_and_open(&image, 1_048_576, 4096);

    let mut txn = Transaction::new();
    mgr.alloc_extent(&cx, &mut txn, 3 * 4096).expect("alloc");
    mgr.complete_allocation(&cx, &mut txn).expect("commit");
    assert_eq!(mgr.free_block_count(), 251);

    mgr.write_superblock(&cx).expect("persist superblock");
    mgr.close().expect("close");

    let mut reopened = RandomBlockManager::new(FileByteDevice::new(), image.path());
    reopened
        .open(&cx, image.path(), BlockAddr(0))
        .expect("reopen");
    assert_eq!(reopened.free_block_count(), 251);
}
