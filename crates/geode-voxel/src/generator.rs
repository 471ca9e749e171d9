//! Seam to the external terrain generator.

use crate::chunk::WorldChunk;
use crate::coords::ChunkPos;

/// Fills chunks that have never been stored.
///
/// Runs on loader threads, so implementations must be `Send + Sync`. The chunk
/// passed in is empty and not yet visible to readers.
pub trait ChunkGenerator: Send + Sync {
    fn generate(&self, pos: ChunkPos, chunk: &mut WorldChunk);
}

impl<F> ChunkGenerator for F
where
    F: Fn(ChunkPos, &mut WorldChunk) + Send + Sync,
{
    fn generate(&self, pos: ChunkPos, chunk: &mut WorldChunk) {
        self(pos, chunk)
    }
}

/// Leaves every chunk empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyGenerator;

impl ChunkGenerator for EmptyGenerator {
    fn generate(&self, _pos: ChunkPos, _chunk: &mut WorldChunk) {}
}
