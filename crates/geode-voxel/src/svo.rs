//! Sparse voxel octree: the planet-scale persistent store behind loaded chunks.
//!
//! Nodes live in a flat arena and reference their children by [`NodeId`]. A node
//! at level `L` covers a cube of `2^L` voxels per axis; the root sits at
//! `max_depth` and single voxels at level 0. Uniform regions collapse into a
//! single [`NodeKind::Leaf`], and absent children read as air, so empty space
//! costs nothing.
//!
//! Only materials are persisted. A voxel read back from the octree carries
//! full health, no flags, and full structural support.
//!
//! Once a chunk has been flushed through [`SparseVoxelOctree::store_chunk_data`]
//! its footprint node (level [`CHUNK_LEVEL`]) stays in the tree even when the
//! chunk is entirely air. That node is what distinguishes "stored as empty"
//! from "never generated".

use std::num::NonZeroU32;

use crate::chunk::WorldChunk;
use crate::coords::{CHUNK_SIZE, CHUNK_VOLUME, ChunkPos, VoxelPos};
use crate::material::MaterialId;
use crate::voxel::Voxel;

/// Level whose nodes cover exactly one chunk (`2^6 = 64`).
pub const CHUNK_LEVEL: u8 = 6;

/// Deepest supported tree; `2^30` still fits in an `i32` coordinate.
pub const MAX_SVO_DEPTH: u8 = 30;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Index of a node in the octree arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(NonZeroU32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add(index as u32))
    }

    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Payload of an octree node: a uniform cube or eight optional children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Every voxel in the cube has this (non-air) material.
    Leaf(MaterialId),
    /// Children in index order `x | y << 1 | z << 2`; `None` is air.
    Branch([Option<NodeId>; 8]),
}

/// One octree node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SvoNode {
    /// Cube side is `2^level` voxels.
    pub level: u8,
    pub kind: NodeKind,
}

impl SvoNode {
    fn empty_branch(level: u8) -> Self {
        Self {
            level,
            kind: NodeKind::Branch([None; 8]),
        }
    }

    /// Bit `i` is set when child `i` is present. Leaves report 0.
    pub fn child_mask(&self) -> u8 {
        match &self.kind {
            NodeKind::Leaf(_) => 0,
            NodeKind::Branch(children) => children
                .iter()
                .enumerate()
                .filter(|(_, c)| c.is_some())
                .fold(0, |mask, (i, _)| mask | (1 << i)),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }
}

/// Where a chunk footprint sits in the tree.
enum Region {
    /// The path ends before reaching chunk level.
    Absent,
    /// The footprint lies inside a uniform leaf.
    Uniform(MaterialId),
    /// The footprint node itself.
    Node(NodeId),
}

/// A node reached by a walk, plus the parent slot that points at it.
type Reached = (NodeId, Option<(NodeId, usize)>);

/// Arena-backed sparse voxel octree.
#[derive(Clone, Debug)]
pub struct SparseVoxelOctree {
    nodes: Vec<SvoNode>,
    free: Vec<NodeId>,
    root: NodeId,
    max_depth: u8,
}

// ---------------------------------------------------------------------------
// Construction & queries
// ---------------------------------------------------------------------------

impl SparseVoxelOctree {
    /// Creates an empty tree spanning `2^max_depth` voxels per axis.
    ///
    /// # Panics
    ///
    /// Panics if `max_depth` is outside `CHUNK_LEVEL..=MAX_SVO_DEPTH`. Callers
    /// validate the configured depth first.
    pub fn new(max_depth: u8) -> Self {
        assert!(
            (CHUNK_LEVEL..=MAX_SVO_DEPTH).contains(&max_depth),
            "svo depth {max_depth} outside {CHUNK_LEVEL}..={MAX_SVO_DEPTH}"
        );
        Self {
            nodes: vec![SvoNode::empty_branch(max_depth)],
            free: Vec::new(),
            root: NodeId::from_index(0),
            max_depth,
        }
    }

    /// Builds a tree from a decoded arena. Used by deserialization.
    pub(crate) fn from_raw_parts(nodes: Vec<SvoNode>, root: NodeId, max_depth: u8) -> Self {
        Self {
            nodes,
            free: Vec::new(),
            root,
            max_depth,
        }
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// Voxels per axis.
    pub fn world_size(&self) -> i32 {
        1 << self.max_depth
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&SvoNode> {
        self.nodes.get(id.index())
    }

    /// Live nodes (arena slots minus the free list).
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    /// Uniform leaves reachable from the root.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            match &self.nodes[id.index()].kind {
                NodeKind::Leaf(_) => count += 1,
                NodeKind::Branch(children) => stack.extend(children.iter().flatten()),
            }
        }
        count
    }

    /// Approximate footprint of the arena in bytes.
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.nodes.capacity() * std::mem::size_of::<SvoNode>()
            + self.free.capacity() * std::mem::size_of::<NodeId>()
    }

    pub fn in_bounds(&self, pos: VoxelPos) -> bool {
        let range = 0..self.world_size();
        range.contains(&pos.x) && range.contains(&pos.y) && range.contains(&pos.z)
    }

    /// Returns the voxel at a global position.
    ///
    /// Absent regions and positions outside the world read as [`Voxel::AIR`];
    /// nothing is allocated.
    pub fn get_voxel(&self, pos: VoxelPos) -> Voxel {
        if !self.in_bounds(pos) {
            return Voxel::AIR;
        }
        let mut id = self.root;
        loop {
            let node = &self.nodes[id.index()];
            match &node.kind {
                NodeKind::Leaf(material) => return Voxel::new(*material, 255),
                NodeKind::Branch(children) => {
                    if node.level == 0 {
                        return Voxel::AIR;
                    }
                    match children[child_index(pos, node.level)] {
                        Some(child) => id = child,
                        None => return Voxel::AIR,
                    }
                }
            }
        }
    }

    /// Writes the material of `voxel` at a global position.
    ///
    /// Positions outside the world are ignored.
    pub fn set_voxel(&mut self, pos: VoxelPos, voxel: Voxel) {
        self.set_block(pos, 0, voxel.material);
    }

    /// Sets the whole aligned cube of side `2^level` containing `pos` to `material`.
    ///
    /// Writing air removes the cube's content; above level 0 the emptied node
    /// stays in the tree.
    pub fn set_block(&mut self, pos: VoxelPos, level: u8, material: MaterialId) {
        if !self.in_bounds(pos) || level > self.max_depth {
            tracing::trace!(?pos, level, "ignored out-of-world octree write");
            return;
        }
        let create = material != MaterialId::AIR;
        if let Some((id, parent)) = self.walk_to(self.root, None, pos, level, create, Some(material))
        {
            self.assign(id, parent, material);
        }
    }

    /// Walks from `start` toward `pos` until a node at `target_level` is reached.
    ///
    /// Uniform leaves on the way are subdivided, unless their material equals
    /// `keep`, in which case the walk stops (`None`). Missing children are
    /// created as empty branches when `create` is set, otherwise the walk stops.
    fn walk_to(
        &mut self,
        start: NodeId,
        start_parent: Option<(NodeId, usize)>,
        pos: VoxelPos,
        target_level: u8,
        create: bool,
        keep: Option<MaterialId>,
    ) -> Option<Reached> {
        let mut id = start;
        let mut parent = start_parent;
        loop {
            let level = self.nodes[id.index()].level;
            if level <= target_level {
                return Some((id, parent));
            }
            if let NodeKind::Leaf(material) = self.nodes[id.index()].kind {
                if Some(material) == keep {
                    return None;
                }
                self.subdivide(id, material);
            }
            let slot = child_index(pos, level);
            let existing = match &self.nodes[id.index()].kind {
                NodeKind::Branch(children) => children[slot],
                NodeKind::Leaf(_) => return None,
            };
            let child = match existing {
                Some(child) => child,
                None if create => {
                    let child = self.alloc(SvoNode::empty_branch(level - 1));
                    self.set_child(id, slot, Some(child));
                    child
                }
                None => return None,
            };
            parent = Some((id, slot));
            id = child;
        }
    }

    /// Makes `id` uniform `material`, or empties it for air.
    fn assign(&mut self, id: NodeId, parent: Option<(NodeId, usize)>, material: MaterialId) {
        self.free_children(id);
        let node = &mut self.nodes[id.index()];
        if material != MaterialId::AIR {
            node.kind = NodeKind::Leaf(material);
            return;
        }
        node.kind = NodeKind::Branch([None; 8]);
        if node.level == 0 {
            if let Some((parent, slot)) = parent {
                self.set_child(parent, slot, None);
                self.free.push(id);
            }
        }
    }

    /// Replaces a uniform leaf with a branch of eight uniform children.
    fn subdivide(&mut self, id: NodeId, material: MaterialId) {
        let child_level = self.nodes[id.index()].level - 1;
        let mut children = [None; 8];
        for slot in &mut children {
            *slot = Some(self.alloc(SvoNode {
                level: child_level,
                kind: NodeKind::Leaf(material),
            }));
        }
        self.nodes[id.index()].kind = NodeKind::Branch(children);
    }

    fn set_child(&mut self, parent: NodeId, slot: usize, child: Option<NodeId>) {
        if let NodeKind::Branch(children) = &mut self.nodes[parent.index()].kind {
            children[slot] = child;
        }
    }

    fn alloc(&mut self, node: SvoNode) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.index()] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId::from_index(self.nodes.len() - 1)
            }
        }
    }

    /// Releases every descendant of `id`, leaving `id` itself in place.
    fn free_children(&mut self, id: NodeId) {
        let NodeKind::Branch(children) = self.nodes[id.index()].kind else {
            return;
        };
        for child in children.into_iter().flatten() {
            self.free_children(child);
            self.free.push(child);
        }
        self.nodes[id.index()].kind = NodeKind::Branch([None; 8]);
    }
}

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

impl SparseVoxelOctree {
    /// Returns `true` if all eight children of `id` are uniform leaves of one material.
    pub fn can_merge_node(&self, id: NodeId) -> bool {
        self.mergeable_material(id).is_some()
    }

    fn mergeable_material(&self, id: NodeId) -> Option<MaterialId> {
        let NodeKind::Branch(children) = &self.nodes[id.index()].kind else {
            return None;
        };
        let mut shared = None;
        for child in children {
            let NodeKind::Leaf(material) = self.nodes[(*child)?.index()].kind else {
                return None;
            };
            match shared {
                None => shared = Some(material),
                Some(m) if m == material => {}
                Some(_) => return None,
            }
        }
        shared
    }

    /// Collapses uniform subtrees bottom-up. Returns the number of merges.
    pub fn compress(&mut self) -> usize {
        let merged = self.merge_subtree(self.root);
        tracing::debug!(merged, nodes = self.node_count(), "compressed octree");
        merged
    }

    fn merge_subtree(&mut self, id: NodeId) -> usize {
        let NodeKind::Branch(children) = self.nodes[id.index()].kind else {
            return 0;
        };
        let mut merged: usize = children
            .into_iter()
            .flatten()
            .map(|child| self.merge_subtree(child))
            .sum();
        if let Some(material) = self.mergeable_material(id) {
            self.free_children(id);
            self.nodes[id.index()].kind = NodeKind::Leaf(material);
            merged += 1;
        }
        merged
    }

    /// Compresses, drops empty branches that are not chunk footprints, and
    /// compacts the arena.
    pub fn optimize(&mut self) {
        self.compress();
        self.prune_empty(self.root);
        self.defragment();
        tracing::debug!(
            nodes = self.node_count(),
            leaves = self.leaf_count(),
            "optimized octree"
        );
    }

    fn prune_empty(&mut self, id: NodeId) {
        let NodeKind::Branch(children) = self.nodes[id.index()].kind else {
            return;
        };
        for (slot, child) in children.into_iter().enumerate() {
            let Some(child) = child else { continue };
            self.prune_empty(child);
            let node = &self.nodes[child.index()];
            if node.level != CHUNK_LEVEL && node.kind == NodeKind::Branch([None; 8]) {
                self.set_child(id, slot, None);
                self.free.push(child);
            }
        }
    }

    /// Rebuilds the arena in pre-order with no free slots.
    fn defragment(&mut self) {
        let mut nodes = Vec::with_capacity(self.node_count());
        let root = self.copy_compact(self.root, &mut nodes);
        self.nodes = nodes;
        self.free.clear();
        self.root = root;
    }

    fn copy_compact(&self, id: NodeId, out: &mut Vec<SvoNode>) -> NodeId {
        let node = &self.nodes[id.index()];
        let new_id = NodeId::from_index(out.len());
        out.push(node.clone());
        if let NodeKind::Branch(children) = node.kind {
            let mut remapped = [None; 8];
            for (slot, child) in children.into_iter().enumerate() {
                remapped[slot] = child.map(|c| self.copy_compact(c, out));
            }
            out[new_id.index()].kind = NodeKind::Branch(remapped);
        }
        new_id
    }
}

// ---------------------------------------------------------------------------
// Chunk bridge
// ---------------------------------------------------------------------------

impl SparseVoxelOctree {
    fn find_region(&self, chunk: ChunkPos) -> Region {
        let origin = chunk.origin();
        if !self.in_bounds(origin) {
            return Region::Absent;
        }
        let mut id = self.root;
        loop {
            let node = &self.nodes[id.index()];
            match &node.kind {
                NodeKind::Leaf(material) => return Region::Uniform(*material),
                NodeKind::Branch(_) if node.level == CHUNK_LEVEL => return Region::Node(id),
                NodeKind::Branch(children) => match children[child_index(origin, node.level)] {
                    Some(child) => id = child,
                    None => return Region::Absent,
                },
            }
        }
    }

    /// Returns `true` once the chunk's footprint has been written.
    ///
    /// Any write that reaches the footprint counts, including direct
    /// [`set_voxel`](Self::set_voxel) and [`set_block`](Self::set_block) calls.
    /// A footprint emptied again by air writes still reports `true` and loads
    /// as an all-air chunk, so a region cleared on purpose is not handed to a
    /// generator. Only [`store_chunk_data`](Self::store_chunk_data) is meant to
    /// create footprints in a tree backing a world manager.
    pub fn contains_region(&self, chunk: ChunkPos) -> bool {
        !matches!(self.find_region(chunk), Region::Absent)
    }

    /// Copies a stored chunk into `chunk` as dense storage.
    ///
    /// Returns `false`, leaving `chunk` untouched, when the footprint was never
    /// written or lies outside the world.
    pub fn load_chunk_data(&self, pos: ChunkPos, chunk: &mut WorldChunk) -> bool {
        let cells = match self.find_region(pos) {
            Region::Absent => return false,
            Region::Uniform(material) => vec![Voxel::new(material, 255); CHUNK_VOLUME],
            Region::Node(id) => {
                let mut cells = vec![Voxel::AIR; CHUNK_VOLUME];
                self.fill_cells(id, VoxelPos::default(), &mut cells);
                cells
            }
        };
        chunk.fill_dense(cells.into_boxed_slice());
        true
    }

    fn fill_cells(&self, id: NodeId, offset: VoxelPos, cells: &mut [Voxel]) {
        let node = &self.nodes[id.index()];
        match &node.kind {
            NodeKind::Leaf(material) => {
                let side = 1i32 << node.level;
                let voxel = Voxel::new(*material, 255);
                for z in offset.z..offset.z + side {
                    for y in offset.y..offset.y + side {
                        let row = (y * CHUNK_SIZE + z * CHUNK_SIZE * CHUNK_SIZE) as usize;
                        let start = row + offset.x as usize;
                        cells[start..start + side as usize].fill(voxel);
                    }
                }
            }
            NodeKind::Branch(children) => {
                if node.level == 0 {
                    return;
                }
                let half = 1i32 << (node.level - 1);
                for (slot, child) in children.iter().enumerate() {
                    let Some(child) = child else { continue };
                    let child_offset = offset.offset(
                        (slot as i32 & 1) * half,
                        ((slot as i32 >> 1) & 1) * half,
                        ((slot as i32 >> 2) & 1) * half,
                    );
                    self.fill_cells(*child, child_offset, cells);
                }
            }
        }
    }

    /// Replaces the chunk's footprint with the chunk's current contents.
    ///
    /// Voxels destroyed since the last store are removed. The footprint node
    /// stays present afterwards, even for an all-air chunk.
    pub fn store_chunk_data(&mut self, pos: ChunkPos, chunk: &WorldChunk) {
        let origin = pos.origin();
        if !self.in_bounds(origin) {
            tracing::warn!(chunk = ?pos, "chunk outside octree bounds, not stored");
            return;
        }
        let Some((region, parent)) =
            self.walk_to(self.root, None, origin, CHUNK_LEVEL, true, None)
        else {
            return;
        };
        if let Some(material) = uniform_material(chunk) {
            self.assign(region, parent, material);
            return;
        }
        self.assign(region, parent, MaterialId::AIR);

        for (local, voxel) in chunk.iter_non_air() {
            let global = pos.to_global(local);
            if let Some((id, parent)) =
                self.walk_to(region, None, global, 0, true, Some(voxel.material))
            {
                self.assign(id, parent, voxel.material);
            }
        }
        self.merge_subtree(region);
    }
}

/// The single material of a completely solid, homogeneous chunk.
fn uniform_material(chunk: &WorldChunk) -> Option<MaterialId> {
    if chunk.non_air_count() != CHUNK_VOLUME {
        return None;
    }
    let mut voxels = chunk.iter_non_air().map(|(_, v)| v.material);
    let first = voxels.next()?;
    voxels.all(|m| m == first).then_some(first)
}

/// Child slot of `pos` inside a node at `level` (> 0).
fn child_index(pos: VoxelPos, level: u8) -> usize {
    let shift = level - 1;
    let bit = |v: i32| ((v >> shift) & 1) as usize;
    bit(pos.x) | bit(pos.y) << 1 | bit(pos.z) << 2
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
