//! The 4-byte [`Voxel`] cell and its state flags.

use serde::{Deserialize, Serialize};

use crate::material::MaterialId;

/// Per-voxel state bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoxelFlags(pub u8);

impl VoxelFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Currently burning.
    pub const ON_FIRE: Self = Self(1 << 0);
    /// Saturated with liquid.
    pub const WET: Self = Self(1 << 1);
    /// Under structural load beyond its comfort range.
    pub const STRESSED: Self = Self(1 << 2);
    /// Expected to fail on the next structural pass.
    pub const UNSTABLE: Self = Self(1 << 3);
    /// Carries heat or current to neighbours.
    pub const CONDUCTIVE: Self = Self(1 << 4);
    /// Can ignite.
    pub const FLAMMABLE: Self = Self(1 << 5);
    /// Behaves as a fluid cell.
    pub const FLUID: Self = Self(1 << 6);
    /// Connected to bedrock through a support path.
    pub const GROUNDED: Self = Self(1 << 7);

    /// Returns `true` if every bit of `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for VoxelFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The smallest addressable unit of the world.
///
/// Compared and copied by value. Only the material survives a round trip
/// through the octree; health, flags and support are runtime state of loaded
/// chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Voxel {
    /// Index into the [`MaterialPalette`](crate::MaterialPalette).
    pub material: MaterialId,
    /// Remaining integrity; 0 means destroyed.
    pub health: u8,
    /// State bits.
    pub flags: VoxelFlags,
    /// Load this voxel can still carry.
    pub structural_support: u8,
}

impl Voxel {
    /// Canonical empty voxel.
    pub const AIR: Self = Self {
        material: MaterialId::AIR,
        health: 0,
        flags: VoxelFlags::NONE,
        structural_support: 255,
    };

    /// Creates a voxel with no flags and full structural support.
    pub const fn new(material: MaterialId, health: u8) -> Self {
        Self {
            material,
            health,
            flags: VoxelFlags::NONE,
            structural_support: 255,
        }
    }

    /// Returns `true` if the material is air.
    pub fn is_air(&self) -> bool {
        self.material == MaterialId::AIR
    }

    /// Returns `true` if health has reached zero.
    pub fn is_destroyed(&self) -> bool {
        self.health == 0
    }

    /// Returns `true` if all bits of `flag` are set.
    pub fn has_flag(&self, flag: VoxelFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Sets the bits of `flag`.
    pub fn set_flag(&mut self, flag: VoxelFlags) {
        self.flags.0 |= flag.0;
    }

    /// Clears the bits of `flag`.
    pub fn clear_flag(&mut self, flag: VoxelFlags) {
        self.flags.0 &= !flag.0;
    }

    /// Collapses every air voxel to [`Voxel::AIR`].
    pub(crate) fn normalized(self) -> Self {
        if self.is_air() { Self::AIR } else { self }
    }
}

impl Default for Voxel {
    fn default() -> Self {
        Self::AIR
    }
}

static_assertions::assert_eq_size!(Voxel, u32);
