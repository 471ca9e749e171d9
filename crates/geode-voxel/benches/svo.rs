use criterion::{Criterion, black_box, criterion_group, criterion_main};
use geode_voxel::*;

fn stone() -> Voxel {
    Voxel::new(MaterialId::STONE, 255)
}

/// A chunk with its lower half solid stone and a scatter of ore above.
fn terrain_chunk(pos: ChunkPos) -> WorldChunk {
    let mut chunk = WorldChunk::new(pos);
    for x in 0..CHUNK_SIZE {
        for z in 0..CHUNK_SIZE {
            for y in 0..CHUNK_SIZE / 2 {
                chunk.set_voxel(VoxelPos::new(x, y, z), stone());
            }
        }
    }
    for i in 0..64 {
        let p = VoxelPos::new((i * 7) % CHUNK_SIZE, 40 + i % 8, (i * 13) % CHUNK_SIZE);
        chunk.set_voxel(p, Voxel::new(MaterialId::COAL, 200));
    }
    chunk.optimize_storage();
    chunk
}

fn bench_svo_set_voxel(c: &mut Criterion) {
    c.bench_function("svo_set_voxel", |bencher| {
        bencher.iter(|| {
            let mut tree = SparseVoxelOctree::new(20);
            for i in 0..256 {
                tree.set_voxel(black_box(VoxelPos::new(i, i * 3, i * 5)), stone());
            }
            black_box(tree.node_count())
        })
    });
}

fn bench_svo_get_voxel(c: &mut Criterion) {
    let mut tree = SparseVoxelOctree::new(20);
    tree.store_chunk_data(ChunkPos::new(0, 0, 0), &terrain_chunk(ChunkPos::new(0, 0, 0)));
    c.bench_function("svo_get_voxel", |bencher| {
        bencher.iter(|| black_box(tree.get_voxel(black_box(VoxelPos::new(17, 12, 40)))))
    });
}

fn bench_store_chunk(c: &mut Criterion) {
    let chunk = terrain_chunk(ChunkPos::new(1, 0, 1));
    c.bench_function("svo_store_chunk", |bencher| {
        bencher.iter(|| {
            let mut tree = SparseVoxelOctree::new(20);
            tree.store_chunk_data(ChunkPos::new(1, 0, 1), black_box(&chunk));
            black_box(tree.node_count())
        })
    });
}

fn bench_load_chunk(c: &mut Criterion) {
    let mut tree = SparseVoxelOctree::new(20);
    tree.store_chunk_data(ChunkPos::new(1, 0, 1), &terrain_chunk(ChunkPos::new(1, 0, 1)));
    c.bench_function("svo_load_chunk", |bencher| {
        bencher.iter(|| {
            let mut chunk = WorldChunk::new(ChunkPos::new(1, 0, 1));
            black_box(tree.load_chunk_data(ChunkPos::new(1, 0, 1), &mut chunk))
        })
    });
}

fn bench_serialize(c: &mut Criterion) {
    let mut tree = SparseVoxelOctree::new(20);
    for x in 0..4 {
        let pos = ChunkPos::new(x, 0, 0);
        tree.store_chunk_data(pos, &terrain_chunk(pos));
    }
    tree.optimize();
    let bytes = tree.to_bytes();
    c.bench_function("svo_to_bytes", |bencher| {
        bencher.iter(|| black_box(tree.to_bytes()))
    });
    c.bench_function("svo_from_bytes", |bencher| {
        bencher.iter(|| black_box(SparseVoxelOctree::from_bytes(black_box(&bytes))))
    });
}

fn bench_chunk_compress(c: &mut Criterion) {
    let chunk = terrain_chunk(ChunkPos::new(0, 0, 0));
    c.bench_function("chunk_compress_decompress", |bencher| {
        bencher.iter(|| {
            let mut chunk = chunk.clone();
            chunk.compress();
            chunk.decompress();
            black_box(chunk.non_air_count())
        })
    });
}

criterion_group!(
    benches,
    bench_svo_set_voxel,
    bench_svo_get_voxel,
    bench_store_chunk,
    bench_load_chunk,
    bench_serialize,
    bench_chunk_compress
);
criterion_main!(benches);
