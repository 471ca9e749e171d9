//! Binary serialization for [`SparseVoxelOctree`].
//!
//! ## Binary Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Max depth (`i32`, little-endian) |
//! | 4 | 4 | World size (`i32`, little-endian, always `1 << max_depth`) |
//! | 8 | … | Root node, pre-order |
//!
//! Each node is either a branch, `0x00` followed by a child-presence mask and
//! then the present children in slot order, or a uniform leaf, `0x01`
//! followed by one material byte. Only materials are stored.

use std::io::{Read, Write};
use std::path::Path;

use crate::material::MaterialId;
use crate::svo::{CHUNK_LEVEL, MAX_SVO_DEPTH, NodeId, NodeKind, SparseVoxelOctree, SvoNode};

const TAG_BRANCH: u8 = 0x00;
const TAG_LEAF: u8 = 0x01;
const HEADER_LEN: usize = 8;

/// Errors that can occur while saving or loading an octree.
#[derive(Debug, thiserror::Error)]
pub enum SvoError {
    /// Reading or writing the underlying stream failed.
    #[error("octree i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// Depth out of range, or world size inconsistent with it.
    #[error("invalid octree header: max_depth {max_depth}, world_size {world_size}")]
    InvalidHeader {
        /// Depth read from the header.
        max_depth: i32,
        /// World size read from the header.
        world_size: i32,
    },
    /// A node starts with a byte that is neither `0x00` nor `0x01`.
    #[error("invalid node tag {tag:#04x} at byte {offset}")]
    InvalidNodeTag {
        /// The rejected tag.
        tag: u8,
        /// Offset of the tag in the stream.
        offset: usize,
    },
    /// A branch appears where only single voxels can exist.
    #[error("branch node at leaf level (byte {0})")]
    BranchAtLeafLevel(usize),
    /// The stream ends in the middle of the tree.
    #[error("octree data truncated at byte {0}")]
    Truncated(usize),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

impl SparseVoxelOctree {
    /// Encodes the tree into a byte vector.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.node_count() * 2);
        buf.extend_from_slice(&i32::from(self.max_depth()).to_le_bytes());
        buf.extend_from_slice(&self.world_size().to_le_bytes());
        self.encode_node(self.root(), &mut buf);
        buf
    }

    fn encode_node(&self, id: NodeId, buf: &mut Vec<u8>) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Leaf(material) => {
                buf.push(TAG_LEAF);
                buf.push(material.0);
            }
            NodeKind::Branch(children) => {
                buf.push(TAG_BRANCH);
                buf.push(node.child_mask());
                for child in children.iter().flatten() {
                    self.encode_node(*child, buf);
                }
            }
        }
    }

    /// Writes the encoded tree to `writer`.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), SvoError> {
        writer.write_all(&self.to_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Writes the encoded tree to a file, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<(), SvoError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        self.write_to(&mut file)?;
        tracing::info!(
            path = %path.display(),
            nodes = self.node_count(),
            "saved octree"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
    nodes: Vec<SvoNode>,
}

impl Decoder<'_> {
    fn byte(&mut self) -> Result<u8, SvoError> {
        let b = *self
            .data
            .get(self.offset)
            .ok_or(SvoError::Truncated(self.offset))?;
        self.offset += 1;
        Ok(b)
    }

    /// Decodes one subtree. Air leaves decode to an absent child.
    fn node(&mut self, level: u8) -> Result<Option<NodeId>, SvoError> {
        let tag_offset = self.offset;
        match self.byte()? {
            TAG_LEAF => {
                let material = MaterialId(self.byte()?);
                if material == MaterialId::AIR {
                    return Ok(None);
                }
                Ok(Some(self.push(SvoNode {
                    level,
                    kind: NodeKind::Leaf(material),
                })))
            }
            TAG_BRANCH => {
                if level == 0 {
                    return Err(SvoError::BranchAtLeafLevel(tag_offset));
                }
                let mask = self.byte()?;
                let mut children = [None; 8];
                for (slot, child) in children.iter_mut().enumerate() {
                    if mask & (1 << slot) != 0 {
                        *child = self.node(level - 1)?;
                    }
                }
                Ok(Some(self.push(SvoNode {
                    level,
                    kind: NodeKind::Branch(children),
                })))
            }
            tag => Err(SvoError::InvalidNodeTag {
                tag,
                offset: tag_offset,
            }),
        }
    }

    fn push(&mut self, node: SvoNode) -> NodeId {
        self.nodes.push(node);
        NodeId::from_index(self.nodes.len() - 1)
    }
}

impl SparseVoxelOctree {
    /// Decodes a tree previously produced by [`to_bytes`](Self::to_bytes).
    ///
    /// Trailing bytes after the root subtree are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SvoError> {
        if data.len() < HEADER_LEN {
            return Err(SvoError::Truncated(data.len()));
        }
        let max_depth = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let world_size = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let depth_ok = (i32::from(CHUNK_LEVEL)..=i32::from(MAX_SVO_DEPTH)).contains(&max_depth);
        if !depth_ok || world_size != 1 << max_depth {
            return Err(SvoError::InvalidHeader {
                max_depth,
                world_size,
            });
        }
        let max_depth = max_depth as u8;

        let mut decoder = Decoder {
            data,
            offset: HEADER_LEN,
            nodes: Vec::new(),
        };
        let root = match decoder.node(max_depth)? {
            Some(root) => root,
            None => decoder.push(SvoNode {
                level: max_depth,
                kind: NodeKind::Branch([None; 8]),
            }),
        };
        Ok(Self::from_raw_parts(decoder.nodes, root, max_depth))
    }

    /// Reads and decodes a whole tree from `reader`.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, SvoError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(&data)
    }

    /// Replaces this tree with the one stored in `path`.
    ///
    /// On any error the current tree is left unchanged.
    pub fn load_from_file(&mut self, path: &Path) -> Result<(), SvoError> {
        let mut file = std::io::BufReader::new(std::fs::File::open(path)?);
        let loaded = Self::read_from(&mut file)?;
        tracing::info!(
            path = %path.display(),
            nodes = loaded.node_count(),
            "loaded octree"
        );
        *self = loaded;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::VoxelPos;
    use crate::voxel::Voxel;

    fn sample_tree() -> SparseVoxelOctree {
        let mut svo = SparseVoxelOctree::new(8);
        svo.set_block(VoxelPos::new(128, 0, 0), 6, MaterialId::STONE);
        svo.set_voxel(VoxelPos::new(1, 2, 3), Voxel::new(MaterialId::GRASS, 1));
        svo.set_voxel(VoxelPos::new(255, 255, 255), Voxel::new(MaterialId::OIL, 1));
        svo.set_voxel(VoxelPos::new(130, 1, 1), Voxel::new(MaterialId::WATER, 1));
        svo
    }

    fn assert_same_reads(a: &SparseVoxelOctree, b: &SparseVoxelOctree) {
        // Every voxel of a 256³ world is too slow; sample a dense lattice
        // plus every written position.
        let mut probes = vec![
            VoxelPos::new(1, 2, 3),
            VoxelPos::new(255, 255, 255),
            VoxelPos::new(130, 1, 1),
            VoxelPos::new(131, 1, 1),
        ];
        for z in (0..256).step_by(7) {
            for y in (0..256).step_by(11) {
                for x in (0..256).step_by(5) {
                    probes.push(VoxelPos::new(x, y, z));
                }
            }
        }
        for p in probes {
            assert_eq!(a.get_voxel(p), b.get_voxel(p), "mismatch at {p:?}");
        }
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let svo = sample_tree();
        let bytes = svo.to_bytes();
        let restored = SparseVoxelOctree::from_bytes(&bytes).unwrap();
        assert_eq!(restored.max_depth(), 8);
        assert_eq!(restored.node_count(), svo.node_count());
        assert_eq!(restored.leaf_count(), svo.leaf_count());
        assert_same_reads(&svo, &restored);
        assert_eq!(restored.to_bytes(), bytes);
    }

    #[test]
    fn test_header_layout() {
        let bytes = SparseVoxelOctree::new(20).to_bytes();
        assert_eq!(&bytes[0..4], &20i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(1i32 << 20).to_le_bytes());
        // Empty root: branch tag + empty mask.
        assert_eq!(&bytes[8..], &[TAG_BRANCH, 0]);
    }

    #[test]
    fn test_leaf_encoding() {
        let mut svo = SparseVoxelOctree::new(6);
        svo.set_block(VoxelPos::new(0, 0, 0), 6, MaterialId::METAL);
        assert_eq!(&svo.to_bytes()[8..], &[TAG_LEAF, MaterialId::METAL.0]);
    }

    #[test]
    fn test_write_read_stream() {
        let svo = sample_tree();
        let mut buf = Vec::new();
        svo.write_to(&mut buf).unwrap();
        let restored = SparseVoxelOctree::read_from(&mut buf.as_slice()).unwrap();
        assert_same_reads(&svo, &restored);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worlds").join("test.svo");
        let svo = sample_tree();
        svo.save_to_file(&path).unwrap();

        let mut loaded = SparseVoxelOctree::new(6);
        loaded.load_from_file(&path).unwrap();
        assert_eq!(loaded.max_depth(), 8);
        assert_same_reads(&svo, &loaded);
    }

    #[test]
    fn test_failed_load_keeps_existing_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.svo");
        let mut bytes = sample_tree().to_bytes();
        bytes.truncate(bytes.len() - 3);
        std::fs::write(&path, &bytes).unwrap();

        let mut svo = SparseVoxelOctree::new(7);
        svo.set_voxel(VoxelPos::new(9, 9, 9), Voxel::new(MaterialId::SNOW, 1));
        assert!(svo.load_from_file(&path).is_err());
        assert!(svo.load_from_file(&dir.path().join("missing.svo")).is_err());
        assert_eq!(svo.max_depth(), 7);
        assert_eq!(svo.get_voxel(VoxelPos::new(9, 9, 9)).material, MaterialId::SNOW);
    }

    #[test]
    fn test_truncated_data_returns_error() {
        let bytes = sample_tree().to_bytes();
        for len in [0, 4, 7, 8, 9, bytes.len() - 1] {
            let result = SparseVoxelOctree::from_bytes(&bytes[..len]);
            assert!(
                matches!(result, Err(SvoError::Truncated(_))),
                "len {len}: {result:?}"
            );
        }
    }

    #[test]
    fn test_invalid_header_returns_error() {
        let mut bytes = SparseVoxelOctree::new(8).to_bytes();
        bytes[4..8].copy_from_slice(&255i32.to_le_bytes());
        assert!(matches!(
            SparseVoxelOctree::from_bytes(&bytes),
            Err(SvoError::InvalidHeader { .. })
        ));

        let mut bytes = SparseVoxelOctree::new(8).to_bytes();
        bytes[0..4].copy_from_slice(&3i32.to_le_bytes());
        bytes[4..8].copy_from_slice(&8i32.to_le_bytes());
        assert!(matches!(
            SparseVoxelOctree::from_bytes(&bytes),
            Err(SvoError::InvalidHeader { max_depth: 3, .. })
        ));
    }

    #[test]
    fn test_invalid_tag_returns_error() {
        let mut bytes = SparseVoxelOctree::new(8).to_bytes();
        bytes[8] = 0x07;
        assert!(matches!(
            SparseVoxelOctree::from_bytes(&bytes),
            Err(SvoError::InvalidNodeTag { tag: 0x07, offset: 8 })
        ));
    }

    #[test]
    fn test_branch_at_leaf_level_returns_error() {
        // Depth 6 root, then a chain of single-child branches one level too deep.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&6i32.to_le_bytes());
        bytes.extend_from_slice(&64i32.to_le_bytes());
        for _ in 0..=6 {
            bytes.extend_from_slice(&[TAG_BRANCH, 0b0000_0001]);
        }
        assert!(matches!(
            SparseVoxelOctree::from_bytes(&bytes),
            Err(SvoError::BranchAtLeafLevel(_))
        ));
    }

    #[test]
    fn test_air_leaf_decodes_as_absent() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&6i32.to_le_bytes());
        bytes.extend_from_slice(&64i32.to_le_bytes());
        bytes.extend_from_slice(&[TAG_BRANCH, 0b0000_0011, TAG_LEAF, 0, TAG_LEAF, 4]);
        let svo = SparseVoxelOctree::from_bytes(&bytes).unwrap();
        assert_eq!(svo.get_voxel(VoxelPos::new(0, 0, 0)), Voxel::AIR);
        assert_eq!(svo.get_voxel(VoxelPos::new(40, 0, 0)).material, MaterialId::SAND);
    }
}
