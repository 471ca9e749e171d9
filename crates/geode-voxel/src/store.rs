//! Persistent chunk storage behind the world manager.
//!
//! [`ChunkStore`] is the seam between the manager and whatever keeps evicted
//! chunks. [`SvoStore`] is the production implementation, backed by one
//! [`SparseVoxelOctree`] guarded by a reader/writer lock: loads from many
//! loader threads share the read side, flushes take the write side.

use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::chunk::WorldChunk;
use crate::coords::ChunkPos;
use crate::svo::SparseVoxelOctree;
use crate::svo_serial::SvoError;

/// Backing store for chunk contents.
pub trait ChunkStore: Send + Sync {
    /// Populates `chunk` from storage. Returns `false` if the chunk was never stored.
    fn load_chunk(&self, pos: ChunkPos, chunk: &mut WorldChunk) -> bool;

    /// Replaces the stored contents of `pos` with `chunk`.
    fn store_chunk(&self, pos: ChunkPos, chunk: &WorldChunk);

    /// Persists the whole store to `path`.
    fn save(&self, path: &Path) -> Result<(), SvoError>;

    /// Replaces the whole store with the contents of `path`.
    fn load(&self, path: &Path) -> Result<(), SvoError>;

    /// Reclaims memory from redundant structure.
    fn compress(&self) {}

    /// Approximate size in bytes.
    fn memory_usage(&self) -> usize {
        0
    }
}

/// [`ChunkStore`] backed by a sparse voxel octree.
#[derive(Debug)]
pub struct SvoStore {
    tree: RwLock<SparseVoxelOctree>,
}

impl SvoStore {
    /// Creates an empty store spanning `2^max_depth` voxels per axis.
    ///
    /// # Panics
    ///
    /// Panics if `max_depth` is outside the range accepted by
    /// [`SparseVoxelOctree::new`].
    pub fn new(max_depth: u8) -> Self {
        Self::from_tree(SparseVoxelOctree::new(max_depth))
    }

    pub fn from_tree(tree: SparseVoxelOctree) -> Self {
        Self {
            tree: RwLock::new(tree),
        }
    }

    /// Shared access to the octree.
    pub fn tree(&self) -> RwLockReadGuard<'_, SparseVoxelOctree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn tree_mut(&self) -> RwLockWriteGuard<'_, SparseVoxelOctree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChunkStore for SvoStore {
    fn load_chunk(&self, pos: ChunkPos, chunk: &mut WorldChunk) -> bool {
        self.tree().load_chunk_data(pos, chunk)
    }

    fn store_chunk(&self, pos: ChunkPos, chunk: &WorldChunk) {
        self.tree_mut().store_chunk_data(pos, chunk);
    }

    fn save(&self, path: &Path) -> Result<(), SvoError> {
        self.tree().save_to_file(path)
    }

    fn load(&self, path: &Path) -> Result<(), SvoError> {
        // Decode outside the lock so readers keep going until the swap.
        let mut file = std::io::BufReader::new(std::fs::File::open(path)?);
        let loaded = SparseVoxelOctree::read_from(&mut file)?;
        *self.tree_mut() = loaded;
        tracing::info!(path = %path.display(), "replaced octree store");
        Ok(())
    }

    fn compress(&self) {
        self.tree_mut().optimize();
    }

    fn memory_usage(&self) -> usize {
        self.tree().memory_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::VoxelPos;
    use crate::material::MaterialId;
    use crate::voxel::Voxel;

    #[test]
    fn test_store_then_load() {
        let store = SvoStore::new(8);
        let pos = ChunkPos::new(1, 1, 1);
        let mut chunk = WorldChunk::new(pos);
        chunk.set_voxel(VoxelPos::new(4, 4, 4), Voxel::new(MaterialId::WOOD, 50));

        let mut fresh = WorldChunk::new(pos);
        assert!(!store.load_chunk(pos, &mut fresh));

        store.store_chunk(pos, &chunk);
        assert!(store.load_chunk(pos, &mut fresh));
        assert_eq!(
            fresh.get_voxel(VoxelPos::new(4, 4, 4)),
            Voxel::new(MaterialId::WOOD, 255)
        );
        assert!(store.tree().contains_region(pos));
    }

    #[test]
    fn test_save_and_load_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.svo");
        let store = SvoStore::new(8);
        let pos = ChunkPos::new(0, 2, 0);
        let mut chunk = WorldChunk::new(pos);
        chunk.set_voxel(VoxelPos::new(0, 0, 0), Voxel::new(MaterialId::ICE, 1));
        store.store_chunk(pos, &chunk);
        store.save(&path).unwrap();

        let other = SvoStore::new(6);
        other.load(&path).unwrap();
        assert_eq!(other.tree().max_depth(), 8);
        let mut loaded = WorldChunk::new(pos);
        assert!(other.load_chunk(pos, &mut loaded));
        assert_eq!(loaded.get_voxel(VoxelPos::new(0, 0, 0)).material, MaterialId::ICE);
    }

    #[test]
    fn test_failed_load_keeps_contents() {
        let store = SvoStore::new(7);
        store.tree_mut().set_voxel(VoxelPos::new(1, 1, 1), Voxel::new(MaterialId::DIRT, 1));
        assert!(store.load(Path::new("/nonexistent/geode/world.svo")).is_err());
        assert_eq!(
            store.tree().get_voxel(VoxelPos::new(1, 1, 1)).material,
            MaterialId::DIRT
        );
    }

    #[test]
    fn test_compress_and_memory_usage() {
        let store = SvoStore::new(7);
        assert!(store.memory_usage() > 0);
        {
            let mut tree = store.tree_mut();
            for x in 0..2 {
                for y in 0..2 {
                    for z in 0..2 {
                        tree.set_voxel(VoxelPos::new(x, y, z), Voxel::new(MaterialId::SAND, 1));
                    }
                }
            }
        }
        store.compress();
        assert_eq!(store.tree().leaf_count(), 1);
    }

    #[test]
    fn test_store_is_object_safe() {
        let store: std::sync::Arc<dyn ChunkStore> = std::sync::Arc::new(SvoStore::new(6));
        assert!(!store.load_chunk(ChunkPos::new(0, 0, 0), &mut WorldChunk::new(ChunkPos::new(0, 0, 0))));
    }
}
