//! Benchmark: bitmap-block bit operations and codec throughput.
//!
//! The allocator's hot path is a linear bit scan plus an
//! encode-with-checksum per dirtied bitmap block; this tracks both.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rbm_ondisk::{max_block_by_bitmap_block, BitmapBlock, BitmapOp, RBM_BITMAP_BLOCK_CRC};
use rbm_types::BlockSize;

fn block_size() -> BlockSize {
    BlockSize::new(4096).unwrap()
}

/// A realistic bitmap block: ~5% free bits scattered in clusters.
fn make_block() -> BitmapBlock {
    let bs = block_size();
    let mut block = BitmapBlock::filled(bs, BitmapOp::AllSet);
    let m = max_block_by_bitmap_block(bs);
    let mut pos = 100_u64;
    while pos + 32 < m {
        for i in pos..pos + 32 {
            block.clear_bit(i);
        }
        pos += 650;
    }
    block
}

fn bench_scan(c: &mut Criterion) {
    let block = make_block();
    let m = max_block_by_bitmap_block(block_size());

    c.bench_function("scan_free_bits", |b| {
        b.iter(|| {
            let mut free = 0_u64;
            for i in 0..m {
                if !block.is_allocated(black_box(i)) {
                    free += 1;
                }
            }
            black_box(free)
        });
    });
}

fn bench_encode(c: &mut Criterion) {
    let block = make_block();

    let mut group = c.benchmark_group("encode");

    group.bench_function("with_crc", |b| {
        b.iter(|| black_box(block.encode(black_box(RBM_BITMAP_BLOCK_CRC))));
    });

    group.bench_function("without_crc", |b| {
        b.iter(|| black_box(block.encode(black_box(0))));
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let encoded = make_block().encode(RBM_BITMAP_BLOCK_CRC);

    c.bench_function("decode_with_crc", |b| {
        b.iter(|| black_box(BitmapBlock::decode(black_box(&encoded), RBM_BITMAP_BLOCK_CRC)));
    });
}

fn bench_fill(c: &mut Criterion) {
    c.bench_function("fill_all_set", |b| {
        b.iter(|| black_box(BitmapBlock::filled(block_size(), BitmapOp::AllSet)));
    });
}

criterion_group!(benches, bench_scan, bench_encode, bench_decode, bench_fill);
criterion_main!(benches);
