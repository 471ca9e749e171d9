//! Hybrid dense/sparse chunk storage for 64×64×64 voxel volumes.
//!
//! A [`WorldChunk`] starts sparse (a hash map holding only non-air cells) and
//! can switch to a flat dense array when enough of it is solid. Both layouts
//! read and write identically; the switch is explicit and lossless.

use rustc_hash::FxHashMap;

use crate::coords::{CHUNK_SIZE, CHUNK_VOLUME, ChunkPos, VoxelPos};
use crate::voxel::Voxel;

/// Non-air count above which dense storage is cheaper than a hash map.
const DENSE_THRESHOLD: usize = CHUNK_VOLUME / 4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle and dirtiness of a chunk.
///
/// Variants are ordered: every dirty level compares greater than `Active`, and
/// higher dirty levels imply the work of the lower ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChunkState {
    /// Not resident; either never loaded or already evicted.
    Unloaded,
    /// Queued or being populated by a loader.
    Loading,
    /// Resident and clean.
    Active,
    /// Mesh is stale.
    DirtyMesh,
    /// Collision data is stale.
    DirtyPhysics,
    /// Structural support needs recomputation.
    DirtyStructure,
}

/// Voxel storage layout, keyed by linear index `x + y*64 + z*64*64`.
#[derive(Clone, Debug)]
pub enum ChunkStorage {
    /// One entry per voxel.
    Dense(Box<[Voxel]>),
    /// Only non-air voxels; an absent key is air.
    Sparse(FxHashMap<u32, Voxel>),
}

/// A cube of `CHUNK_SIZE³` voxels with lifecycle state and a version counter.
#[derive(Clone, Debug)]
pub struct WorldChunk {
    position: ChunkPos,
    state: ChunkState,
    storage: ChunkStorage,
    /// Incremented on every accepted write.
    version: u64,
}

// ---------------------------------------------------------------------------
// WorldChunk
// ---------------------------------------------------------------------------

impl WorldChunk {
    /// Creates an empty, sparse, unloaded chunk.
    pub fn new(position: ChunkPos) -> Self {
        Self {
            position,
            state: ChunkState::Unloaded,
            storage: ChunkStorage::Sparse(FxHashMap::default()),
            version: 0,
        }
    }

    pub fn position(&self) -> ChunkPos {
        self.position
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ChunkState) {
        self.state = state;
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn storage(&self) -> &ChunkStorage {
        &self.storage
    }

    pub fn is_dense(&self) -> bool {
        matches!(self.storage, ChunkStorage::Dense(_))
    }

    /// Returns the voxel at a chunk-local position.
    ///
    /// Returns [`Voxel::AIR`] for unset cells and for positions outside `0..64`.
    pub fn get_voxel(&self, local: VoxelPos) -> Voxel {
        let Some(index) = linear_index(local) else {
            return Voxel::AIR;
        };
        match &self.storage {
            ChunkStorage::Dense(cells) => cells[index as usize],
            ChunkStorage::Sparse(map) => map.get(&index).copied().unwrap_or(Voxel::AIR),
        }
    }

    /// Writes the voxel at a chunk-local position.
    ///
    /// Out-of-bounds positions are ignored. A write to an `Active` chunk
    /// escalates it to `DirtyMesh`; higher dirty levels are kept.
    pub fn set_voxel(&mut self, local: VoxelPos, voxel: Voxel) {
        let Some(index) = linear_index(local) else {
            tracing::trace!(?local, chunk = ?self.position, "ignored out-of-bounds chunk write");
            return;
        };
        let voxel = voxel.normalized();
        match &mut self.storage {
            ChunkStorage::Dense(cells) => cells[index as usize] = voxel,
            ChunkStorage::Sparse(map) => {
                if voxel.is_air() {
                    map.remove(&index);
                } else {
                    map.insert(index, voxel);
                }
            }
        }
        self.version += 1;
        if self.state == ChunkState::Active {
            self.state = ChunkState::DirtyMesh;
        }
    }

    /// Returns `true` if the cell holds a non-air voxel.
    pub fn has_voxel(&self, local: VoxelPos) -> bool {
        !self.get_voxel(local).is_air()
    }

    // -- State ---------------------------------------------------------------

    /// Raises the dirty level to at least `level`.
    ///
    /// Ignored for chunks that are not resident yet and for non-dirty levels.
    pub fn mark_dirty(&mut self, level: ChunkState) {
        if self.state < ChunkState::Active || level < ChunkState::DirtyMesh {
            return;
        }
        self.state = self.state.max(level);
    }

    /// Resets any dirty level back to `Active`.
    pub fn clear_dirty(&mut self) {
        self.state = ChunkState::Active;
    }

    /// Resident and readable (clean or dirty).
    pub fn is_active(&self) -> bool {
        self.state >= ChunkState::Active
    }

    pub fn is_dirty(&self) -> bool {
        self.state >= ChunkState::DirtyMesh
    }

    pub fn needs_mesh_update(&self) -> bool {
        matches!(self.state, ChunkState::DirtyMesh | ChunkState::DirtyPhysics)
    }

    pub fn needs_physics_update(&self) -> bool {
        matches!(
            self.state,
            ChunkState::DirtyPhysics | ChunkState::DirtyStructure
        )
    }

    pub fn needs_structural_analysis(&self) -> bool {
        self.state == ChunkState::DirtyStructure
    }

    // -- Storage mode --------------------------------------------------------

    /// Switches to sparse storage, keeping only non-air cells. No-op when already sparse.
    pub fn compress(&mut self) {
        let ChunkStorage::Dense(cells) = &self.storage else {
            return;
        };
        let map: FxHashMap<u32, Voxel> = cells
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_air())
            .map(|(i, v)| (i as u32, *v))
            .collect();
        self.storage = ChunkStorage::Sparse(map);
    }

    /// Switches to dense storage pre-filled with air. No-op when already dense.
    pub fn decompress(&mut self) {
        let ChunkStorage::Sparse(map) = &self.storage else {
            return;
        };
        let mut cells = vec![Voxel::AIR; CHUNK_VOLUME].into_boxed_slice();
        for (&index, &voxel) in map {
            cells[index as usize] = voxel;
        }
        self.storage = ChunkStorage::Dense(cells);
    }

    /// Picks whichever layout is smaller for the current contents.
    pub fn optimize_storage(&mut self) {
        if self.non_air_count() > DENSE_THRESHOLD {
            self.decompress();
        } else {
            self.compress();
        }
    }

    /// Replaces the contents with a full dense buffer. State and version are untouched.
    ///
    /// Buffers whose length is not [`CHUNK_VOLUME`] are rejected.
    pub(crate) fn fill_dense(&mut self, cells: Box<[Voxel]>) {
        if cells.len() != CHUNK_VOLUME {
            tracing::warn!(
                len = cells.len(),
                chunk = ?self.position,
                "rejected dense fill with wrong length"
            );
            return;
        }
        self.storage = ChunkStorage::Dense(cells);
    }

    // -- Introspection -------------------------------------------------------

    pub fn non_air_count(&self) -> usize {
        match &self.storage {
            ChunkStorage::Dense(cells) => cells.iter().filter(|v| !v.is_air()).count(),
            ChunkStorage::Sparse(map) => map.len(),
        }
    }

    /// Iterates `(local position, voxel)` for every non-air cell.
    pub fn iter_non_air(&self) -> Box<dyn Iterator<Item = (VoxelPos, Voxel)> + '_> {
        match &self.storage {
            ChunkStorage::Dense(cells) => Box::new(
                cells
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| !v.is_air())
                    .map(|(i, v)| (local_from_index(i as u32), *v)),
            ),
            ChunkStorage::Sparse(map) => {
                Box::new(map.iter().map(|(&i, &v)| (local_from_index(i), v)))
            }
        }
    }

    /// Approximate heap plus inline footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        let heap = match &self.storage {
            ChunkStorage::Dense(cells) => std::mem::size_of_val(&**cells),
            // key + value + one control byte per bucket
            ChunkStorage::Sparse(map) => {
                map.capacity() * (std::mem::size_of::<(u32, Voxel)>() + 1)
            }
        };
        std::mem::size_of::<Self>() + heap
    }
}

// ---------------------------------------------------------------------------
// Indexing & neighbours
// ---------------------------------------------------------------------------

fn linear_index(local: VoxelPos) -> Option<u32> {
    if !local.is_valid_local() {
        return None;
    }
    Some((local.x + local.y * CHUNK_SIZE + local.z * CHUNK_SIZE * CHUNK_SIZE) as u32)
}

fn local_from_index(index: u32) -> VoxelPos {
    let cs = CHUNK_SIZE as u32;
    VoxelPos::new(
        (index % cs) as i32,
        ((index / cs) % cs) as i32,
        (index / (cs * cs)) as i32,
    )
}

/// The six face-adjacent positions, in `-x, +x, -y, +y, -z, +z` order. No bounds checks.
pub fn face_neighbors(pos: VoxelPos) -> [VoxelPos; 6] {
    [
        pos.offset(-1, 0, 0),
        pos.offset(1, 0, 0),
        pos.offset(0, -1, 0),
        pos.offset(0, 1, 0),
        pos.offset(0, 0, -1),
        pos.offset(0, 0, 1),
    ]
}

/// All 26 positions of the surrounding 3×3×3 block, excluding `pos` itself.
pub fn extended_neighbors(pos: VoxelPos) -> [VoxelPos; 26] {
    let mut out = [pos; 26];
    let mut i = 0;
    for dz in -1..=1 {
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 && dz == 0 {
                    continue;
                }
                out[i] = pos.offset(dx, dy, dz);
                i += 1;
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialId;
    use crate::voxel::VoxelFlags;

    fn lp(x: i32, y: i32, z: i32) -> VoxelPos {
        VoxelPos::new(x, y, z)
    }

    fn active_chunk() -> WorldChunk {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        chunk.set_state(ChunkState::Active);
        chunk
    }

    #[test]
    fn test_new_chunk_is_sparse_unloaded_and_empty() {
        let chunk = WorldChunk::new(ChunkPos::new(3, -1, 7));
        assert_eq!(chunk.position(), ChunkPos::new(3, -1, 7));
        assert_eq!(chunk.state(), ChunkState::Unloaded);
        assert!(!chunk.is_dense());
        assert_eq!(chunk.non_air_count(), 0);
        assert_eq!(chunk.get_voxel(lp(10, 20, 30)), Voxel::AIR);
        assert_eq!(chunk.get_voxel(lp(10, 20, 30)).health, 0);
    }

    #[test]
    fn test_set_get_sparse_and_dense() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        let mut v = Voxel::new(MaterialId::METAL, 180);
        v.set_flag(VoxelFlags::CONDUCTIVE);
        chunk.set_voxel(lp(1, 2, 3), v);
        assert_eq!(chunk.get_voxel(lp(1, 2, 3)), v);

        chunk.decompress();
        assert!(chunk.is_dense());
        chunk.set_voxel(lp(63, 63, 63), Voxel::new(MaterialId::ICE, 4));
        assert_eq!(chunk.get_voxel(lp(1, 2, 3)), v);
        assert_eq!(chunk.get_voxel(lp(63, 63, 63)), Voxel::new(MaterialId::ICE, 4));
        assert_eq!(chunk.get_voxel(lp(0, 0, 0)), Voxel::AIR);
    }

    #[test]
    fn test_out_of_bounds_is_ignored() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        chunk.set_voxel(lp(64, 0, 0), Voxel::new(MaterialId::STONE, 1));
        chunk.set_voxel(lp(0, -1, 0), Voxel::new(MaterialId::STONE, 1));
        assert_eq!(chunk.non_air_count(), 0);
        assert_eq!(chunk.version(), 0);
        assert_eq!(chunk.get_voxel(lp(64, 0, 0)), Voxel::AIR);
    }

    #[test]
    fn test_writing_air_removes_sparse_entry() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        chunk.set_voxel(lp(5, 5, 5), Voxel::new(MaterialId::DIRT, 10));
        assert_eq!(chunk.non_air_count(), 1);
        chunk.set_voxel(lp(5, 5, 5), Voxel::new(MaterialId::AIR, 99));
        assert_eq!(chunk.non_air_count(), 0);
        let ChunkStorage::Sparse(map) = chunk.storage() else {
            panic!("expected sparse storage");
        };
        assert!(map.is_empty());
        assert_eq!(chunk.get_voxel(lp(5, 5, 5)), Voxel::AIR);
    }

    #[test]
    fn test_compress_decompress_preserve_contents() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        for i in 0..200 {
            let mut v = Voxel::new(MaterialId((i % 12 + 1) as u8), (i % 256) as u8);
            v.structural_support = (i * 3 % 256) as u8;
            chunk.set_voxel(lp(i % 64, (i * 7) % 64, (i * 13) % 64), v);
        }
        let before: Vec<Voxel> = (0..CHUNK_VOLUME as u32)
            .map(|i| chunk.get_voxel(local_from_index(i)))
            .collect();

        chunk.decompress();
        chunk.decompress(); // no-op
        assert!(chunk.is_dense());
        chunk.compress();
        chunk.compress(); // no-op
        assert!(!chunk.is_dense());

        let after: Vec<Voxel> = (0..CHUNK_VOLUME as u32)
            .map(|i| chunk.get_voxel(local_from_index(i)))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_write_escalates_only_active() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        chunk.set_voxel(lp(0, 0, 0), Voxel::new(MaterialId::STONE, 1));
        assert_eq!(chunk.state(), ChunkState::Unloaded);

        let mut chunk = active_chunk();
        chunk.set_voxel(lp(0, 0, 0), Voxel::new(MaterialId::STONE, 1));
        assert_eq!(chunk.state(), ChunkState::DirtyMesh);

        chunk.mark_dirty(ChunkState::DirtyStructure);
        chunk.set_voxel(lp(1, 0, 0), Voxel::new(MaterialId::STONE, 1));
        assert_eq!(chunk.state(), ChunkState::DirtyStructure);
    }

    #[test]
    fn test_mark_dirty_never_downgrades() {
        let mut chunk = active_chunk();
        chunk.mark_dirty(ChunkState::DirtyPhysics);
        chunk.mark_dirty(ChunkState::DirtyMesh);
        assert_eq!(chunk.state(), ChunkState::DirtyPhysics);
        chunk.mark_dirty(ChunkState::Active);
        assert_eq!(chunk.state(), ChunkState::DirtyPhysics);

        chunk.clear_dirty();
        assert_eq!(chunk.state(), ChunkState::Active);
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn test_mark_dirty_ignored_before_active() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        chunk.set_state(ChunkState::Loading);
        chunk.mark_dirty(ChunkState::DirtyMesh);
        assert_eq!(chunk.state(), ChunkState::Loading);
    }

    #[test]
    fn test_dirty_queries() {
        let mut chunk = active_chunk();
        assert!(chunk.is_active());
        assert!(!chunk.needs_mesh_update());

        chunk.mark_dirty(ChunkState::DirtyMesh);
        assert!(chunk.needs_mesh_update());
        assert!(!chunk.needs_physics_update());

        chunk.mark_dirty(ChunkState::DirtyPhysics);
        assert!(chunk.needs_mesh_update());
        assert!(chunk.needs_physics_update());
        assert!(!chunk.needs_structural_analysis());

        chunk.mark_dirty(ChunkState::DirtyStructure);
        assert!(!chunk.needs_mesh_update());
        assert!(chunk.needs_physics_update());
        assert!(chunk.needs_structural_analysis());
        assert!(chunk.is_active());
    }

    #[test]
    fn test_version_increments_on_write() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        chunk.set_voxel(lp(0, 0, 0), Voxel::new(MaterialId::SAND, 1));
        chunk.set_voxel(lp(0, 0, 0), Voxel::AIR);
        assert_eq!(chunk.version(), 2);
    }

    #[test]
    fn test_optimize_storage_picks_layout() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        chunk.set_voxel(lp(0, 0, 0), Voxel::new(MaterialId::STONE, 1));
        chunk.optimize_storage();
        assert!(!chunk.is_dense());

        let stone = Voxel::new(MaterialId::STONE, 255);
        let cells = vec![stone; CHUNK_VOLUME].into_boxed_slice();
        chunk.fill_dense(cells);
        chunk.compress();
        chunk.optimize_storage();
        assert!(chunk.is_dense());
        assert_eq!(chunk.non_air_count(), CHUNK_VOLUME);
    }

    #[test]
    fn test_fill_dense_rejects_wrong_length() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        chunk.fill_dense(vec![Voxel::AIR; 10].into_boxed_slice());
        assert!(!chunk.is_dense());
    }

    #[test]
    fn test_iter_non_air_reports_local_positions() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        chunk.set_voxel(lp(3, 4, 5), Voxel::new(MaterialId::COAL, 2));
        chunk.set_voxel(lp(63, 0, 1), Voxel::new(MaterialId::OIL, 2));
        for dense in [false, true] {
            if dense {
                chunk.decompress();
            }
            let mut cells: Vec<_> = chunk.iter_non_air().collect();
            cells.sort_by_key(|(p, _)| *p);
            assert_eq!(
                cells,
                vec![
                    (lp(3, 4, 5), Voxel::new(MaterialId::COAL, 2)),
                    (lp(63, 0, 1), Voxel::new(MaterialId::OIL, 2)),
                ]
            );
        }
    }

    #[test]
    fn test_memory_usage_reflects_layout() {
        let mut chunk = WorldChunk::new(ChunkPos::new(0, 0, 0));
        let sparse = chunk.memory_usage();
        chunk.decompress();
        let dense = chunk.memory_usage();
        assert!(dense >= CHUNK_VOLUME * 4);
        assert!(sparse < dense);
    }

    #[test]
    fn test_neighbors() {
        let p = lp(0, 0, 0);
        let faces = face_neighbors(p);
        assert_eq!(faces[0], lp(-1, 0, 0));
        assert_eq!(faces[5], lp(0, 0, 1));

        let ext = extended_neighbors(p);
        assert!(!ext.contains(&p));
        let unique: std::collections::HashSet<_> = ext.iter().collect();
        assert_eq!(unique.len(), 26);
        assert!(faces.iter().all(|f| ext.contains(f)));
    }

    #[test]
    fn test_state_ordering() {
        assert!(ChunkState::Unloaded < ChunkState::Loading);
        assert!(ChunkState::Loading < ChunkState::Active);
        assert!(ChunkState::Active < ChunkState::DirtyMesh);
        assert!(ChunkState::DirtyPhysics < ChunkState::DirtyStructure);
    }
}
