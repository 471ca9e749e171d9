//! Integer voxel and chunk coordinates, and their mapping to world space.
//!
//! Voxel → chunk resolution uses floor division so that `(-1, 0, 0)` lives in
//! chunk `(-1, 0, 0)` at local `(63, 0, 0)` rather than wrapping into chunk 0.

use std::ops::{Add, Sub};

use glam::Vec3;

/// Side length of a chunk in voxels.
pub const CHUNK_SIZE: i32 = 64;

/// Total number of voxels in a chunk (64³).
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Global voxel coordinate. Also used for chunk-local offsets in `0..CHUNK_SIZE`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoxelPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Chunk coordinate: a voxel coordinate floor-divided by [`CHUNK_SIZE`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the chunk containing this voxel.
    pub fn chunk(self) -> ChunkPos {
        ChunkPos::new(
            self.x.div_euclid(CHUNK_SIZE),
            self.y.div_euclid(CHUNK_SIZE),
            self.z.div_euclid(CHUNK_SIZE),
        )
    }

    /// Returns this voxel's offset inside its chunk; every axis is in `0..CHUNK_SIZE`.
    pub fn local(self) -> VoxelPos {
        VoxelPos::new(
            self.x.rem_euclid(CHUNK_SIZE),
            self.y.rem_euclid(CHUNK_SIZE),
            self.z.rem_euclid(CHUNK_SIZE),
        )
    }

    /// Returns `true` if every axis lies in `0..CHUNK_SIZE`.
    pub fn is_valid_local(self) -> bool {
        let range = 0..CHUNK_SIZE;
        range.contains(&self.x) && range.contains(&self.y) && range.contains(&self.z)
    }

    /// Voxel containing a world-space point (floor of `world / voxel_size`).
    pub fn from_world(world: Vec3, voxel_size: f32) -> Self {
        let v = (world / voxel_size).floor();
        Self::new(v.x as i32, v.y as i32, v.z as i32)
    }

    /// World-space position of this voxel's minimum corner.
    pub fn to_world(self, voxel_size: f32) -> Vec3 {
        Vec3::new(self.x as f32, self.y as f32, self.z as f32) * voxel_size
    }

    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

impl Add for VoxelPos {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.offset(rhs.x, rhs.y, rhs.z)
    }
}

impl Sub for VoxelPos {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.offset(-rhs.x, -rhs.y, -rhs.z)
    }
}

impl ChunkPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Global coordinate of the chunk's minimum voxel.
    pub fn origin(self) -> VoxelPos {
        VoxelPos::new(
            self.x * CHUNK_SIZE,
            self.y * CHUNK_SIZE,
            self.z * CHUNK_SIZE,
        )
    }

    /// Global coordinate of a chunk-local offset.
    pub fn to_global(self, local: VoxelPos) -> VoxelPos {
        self.origin() + local
    }

    /// World-space position of the chunk's minimum corner.
    pub fn to_world(self, voxel_size: f32) -> Vec3 {
        self.origin().to_world(voxel_size)
    }

    /// World-space position of the chunk's centre.
    pub fn center(self, voxel_size: f32) -> Vec3 {
        let half = CHUNK_SIZE as f32 * voxel_size * 0.5;
        self.to_world(voxel_size) + Vec3::splat(half)
    }

    /// Chunk containing a world-space point.
    pub fn from_world(world: Vec3, voxel_size: f32) -> Self {
        VoxelPos::from_world(world, voxel_size).chunk()
    }

    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

/// World-space edge length of one chunk.
pub fn chunk_extent(voxel_size: f32) -> f32 {
    CHUNK_SIZE as f32 * voxel_size
}
