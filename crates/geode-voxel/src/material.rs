//! Material palette: maps single-byte [`MaterialId`] values to [`Material`] properties.
//!
//! The palette is built once during engine startup with the thirteen standard
//! materials. Air is always ID 0 so that an absent octree child and an unset
//! sparse cell both read as empty space.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Compact identifier stored inside every voxel (1 byte).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u8);

impl MaterialId {
    pub const AIR: Self = Self(0);
    pub const STONE: Self = Self(1);
    pub const DIRT: Self = Self(2);
    pub const GRASS: Self = Self(3);
    pub const SAND: Self = Self(4);
    pub const WATER: Self = Self(5);
    pub const WOOD: Self = Self(6);
    pub const METAL: Self = Self(7);
    pub const LAVA: Self = Self(8);
    pub const ICE: Self = Self(9);
    pub const SNOW: Self = Self(10);
    pub const COAL: Self = Self(11);
    pub const OIL: Self = Self(12);
}

/// Maximum number of palette entries, including air.
pub const MAX_MATERIALS: usize = 255;

/// Physical and visual properties of a material.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// Human-readable name (e.g. "Stone").
    pub name: String,
    /// Base albedo, linear RGB.
    pub color: [f32; 3],
    /// Surface roughness (0-1).
    pub roughness: f32,
    /// Metallic factor (0-1).
    pub metallic: f32,
    /// Emissive strength.
    pub emissive: f32,
    /// Density in kg/m³.
    pub density: f32,
    /// Resistance to damage (0-1).
    pub hardness: f32,
    /// Load-bearing capacity.
    pub compression_strength: f32,
    /// Resistance to pulling forces.
    pub tensile_strength: f32,
    /// Heat/electrical conductivity.
    pub conductivity: f32,
    /// Ignition temperature.
    pub flash_point: f32,
    /// Melting temperature.
    pub melting_point: f32,
    pub is_flammable: bool,
    pub is_liquid: bool,
    pub is_gas: bool,
    pub is_transparent: bool,
    pub is_conductive: bool,
}

impl Material {
    /// Creates a material with the given name, colour and hardness.
    ///
    /// Strengths derive from hardness (`compression = hardness`,
    /// `tensile = hardness / 2`); every other property takes a neutral default.
    pub fn new(name: impl Into<String>, color: [f32; 3], hardness: f32) -> Self {
        Self {
            name: name.into(),
            color,
            roughness: 0.5,
            metallic: 0.0,
            emissive: 0.0,
            density: 1000.0,
            hardness,
            compression_strength: hardness,
            tensile_strength: hardness * 0.5,
            conductivity: 0.1,
            flash_point: 500.0,
            melting_point: 1000.0,
            is_flammable: false,
            is_liquid: false,
            is_gas: false,
            is_transparent: false,
            is_conductive: false,
        }
    }
}

/// Errors raised by the palette.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaletteError {
    /// All 255 slots are in use.
    #[error("material palette is full (max {MAX_MATERIALS} materials)")]
    Full,
    /// The ID was never assigned by this palette.
    #[error("material id {0:?} is out of range")]
    OutOfRange(MaterialId),
}

// ---------------------------------------------------------------------------
// Palette
// ---------------------------------------------------------------------------

/// Append-only table of materials indexed by [`MaterialId`].
#[derive(Clone, Debug)]
pub struct MaterialPalette {
    /// Dense array where `index == MaterialId.0`.
    materials: Vec<Material>,
}

impl MaterialPalette {
    /// Creates a palette holding the standard materials at IDs 0..=12.
    pub fn new() -> Self {
        let mut materials = Vec::with_capacity(MAX_MATERIALS);
        materials.extend(standard_materials());
        Self { materials }
    }

    /// Appends a material and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns [`PaletteError::Full`] once 255 materials are registered.
    pub fn add_material(&mut self, material: Material) -> Result<MaterialId, PaletteError> {
        if self.materials.len() >= MAX_MATERIALS {
            return Err(PaletteError::Full);
        }
        let id = MaterialId(self.materials.len() as u8);
        tracing::debug!(id = id.0, name = %material.name, "registered material");
        self.materials.push(material);
        Ok(id)
    }

    /// Returns the material for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PaletteError::OutOfRange`] for IDs this palette never assigned.
    pub fn get(&self, id: MaterialId) -> Result<&Material, PaletteError> {
        self.materials
            .get(id.0 as usize)
            .ok_or(PaletteError::OutOfRange(id))
    }

    /// Returns the first ID registered under `name`.
    pub fn lookup_by_name(&self, name: &str) -> Option<MaterialId> {
        self.materials
            .iter()
            .position(|m| m.name == name)
            .map(|i| MaterialId(i as u8))
    }

    /// Number of registered materials, including air.
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Always `false`: air is registered at construction.
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Iterates `(id, material)` pairs in ID order.
    pub fn iter(&self) -> impl Iterator<Item = (MaterialId, &Material)> {
        self.materials
            .iter()
            .enumerate()
            .map(|(i, m)| (MaterialId(i as u8), m))
    }
}

impl Default for MaterialPalette {
    fn default() -> Self {
        Self::new()
    }
}

fn standard_materials() -> [Material; 13] {
    let mut air = Material::new("Air", [0.0, 0.0, 0.0], 0.0);
    air.density = 1.225;
    air.is_gas = true;
    air.is_transparent = true;

    let mut stone = Material::new("Stone", [0.5, 0.5, 0.5], 0.8);
    stone.density = 2700.0;
    stone.compression_strength = 0.8;
    stone.tensile_strength = 0.4;

    let mut dirt = Material::new("Dirt", [0.4, 0.3, 0.2], 0.3);
    dirt.density = 1500.0;
    dirt.compression_strength = 0.3;
    dirt.tensile_strength = 0.1;

    let mut grass = Material::new("Grass", [0.2, 0.7, 0.2], 0.2);
    grass.density = 800.0;
    grass.is_flammable = true;
    grass.flash_point = 250.0;

    let mut sand = Material::new("Sand", [0.8, 0.7, 0.5], 0.4);
    sand.density = 1600.0;
    sand.compression_strength = 0.2;
    sand.tensile_strength = 0.05;

    let mut water = Material::new("Water", [0.2, 0.4, 0.8], 0.0);
    water.density = 1000.0;
    water.is_liquid = true;
    water.is_transparent = true;
    water.conductivity = 0.6;

    let mut wood = Material::new("Wood", [0.6, 0.4, 0.2], 0.5);
    wood.density = 600.0;
    wood.is_flammable = true;
    wood.flash_point = 300.0;
    wood.compression_strength = 0.5;
    wood.tensile_strength = 0.3;

    let mut metal = Material::new("Metal", [0.7, 0.7, 0.7], 0.9);
    metal.density = 7850.0;
    metal.metallic = 1.0;
    metal.is_conductive = true;
    metal.conductivity = 80.0;
    metal.compression_strength = 0.9;
    metal.tensile_strength = 0.8;
    metal.melting_point = 1538.0;

    let mut lava = Material::new("Lava", [1.0, 0.3, 0.0], 0.7);
    lava.density = 2800.0;
    lava.emissive = 1.0;
    lava.is_liquid = true;
    lava.flash_point = 0.0;

    let mut ice = Material::new("Ice", [0.8, 0.9, 1.0], 0.6);
    ice.density = 917.0;
    ice.is_transparent = true;
    ice.melting_point = 0.0;
    ice.compression_strength = 0.4;
    ice.tensile_strength = 0.2;

    let mut snow = Material::new("Snow", [0.95, 0.95, 0.95], 0.1);
    snow.density = 300.0;
    snow.melting_point = 0.0;
    snow.compression_strength = 0.1;
    snow.tensile_strength = 0.05;

    let mut coal = Material::new("Coal", [0.1, 0.1, 0.1], 0.7);
    coal.density = 1300.0;
    coal.is_flammable = true;
    coal.flash_point = 200.0;
    coal.compression_strength = 0.6;

    let mut oil = Material::new("Oil", [0.2, 0.2, 0.1], 0.3);
    oil.density = 850.0;
    oil.is_liquid = true;
    oil.is_flammable = true;
    oil.flash_point = 150.0;

    [
        air, stone, dirt, grass, sand, water, wood, metal, lava, ice, snow, coal, oil,
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
