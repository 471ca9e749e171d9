//! Planet-scale voxel storage and streaming.
//!
//! Voxels are packed into 4-byte cells and grouped into 64³ [`WorldChunk`]s,
//! each stored densely or sparsely. A [`SparseVoxelOctree`] holds the whole
//! world persistently, and the [`VoxelWorldManager`] keeps the chunks around a
//! point of interest resident, loading them on a worker pool and flushing them
//! back to the octree before eviction.

pub mod chunk;
pub mod coords;
pub mod generator;
pub mod load_queue;
mod loader;
pub mod material;
pub mod store;
pub mod svo;
pub mod svo_serial;
pub mod voxel;
pub mod world;

pub use chunk::{ChunkState, ChunkStorage, WorldChunk, extended_neighbors, face_neighbors};
pub use coords::{CHUNK_SIZE, CHUNK_VOLUME, ChunkPos, VoxelPos, chunk_extent};
pub use generator::{ChunkGenerator, EmptyGenerator};
pub use load_queue::{LoadPriority, LoadTicket};
pub use material::{MAX_MATERIALS, Material, MaterialId, MaterialPalette, PaletteError};
pub use store::{ChunkStore, SvoStore};
pub use svo::{CHUNK_LEVEL, MAX_SVO_DEPTH, NodeId, NodeKind, SparseVoxelOctree, SvoNode};
pub use svo_serial::SvoError;
pub use voxel::{Voxel, VoxelFlags};
pub use world::{ChunkHandle, RegionUpdate, VoxelWorldManager, WorldError, WorldStatistics};
