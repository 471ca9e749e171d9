//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Smallest octree depth that still holds one whole 64³ chunk.
const MIN_SVO_DEPTH: u8 = 6;

/// Largest octree depth whose world size fits in an `i32` coordinate.
const MAX_SVO_DEPTH: u8 = 30;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// World geometry and persistence settings.
    pub world: WorldConfig,
    /// Chunk streaming settings.
    pub streaming: StreamingConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// World geometry and persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// Edge length of one voxel in world units.
    pub voxel_size: f32,
    /// Depth of the sparse voxel octree. The world spans `2^svo_max_depth` voxels per axis.
    pub svo_max_depth: u8,
    /// File the world is saved to and loaded from.
    pub save_file: PathBuf,
}

/// Chunk streaming configuration.
///
/// `load_distance` must be strictly smaller than `unload_distance`; the gap
/// between them is the hysteresis band that keeps boundary chunks from being
/// loaded and evicted on alternate updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Chunks whose centre lies within this world-space distance are loaded.
    pub load_distance: f32,
    /// Chunks whose centre lies beyond this world-space distance are evicted.
    pub unload_distance: f32,
    /// Soft cap on resident chunks, enforced by the periodic update.
    pub max_active_chunks: usize,
    /// Worker threads populating chunks (0 = derive from the CPU count).
    pub loading_threads: usize,
    /// Drop queued (not yet started) loads that drift beyond the unload distance.
    pub cancel_stale_loads: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "geode_voxel=trace").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            voxel_size: 1.0,
            svo_max_depth: 20,
            save_file: PathBuf::from("world.svo"),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            load_distance: 300.0,
            unload_distance: 500.0,
            max_active_chunks: 1000,
            loading_threads: 4,
            cancel_stale_loads: false,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl StreamingConfig {
    /// Checks the hysteresis band and that both distances are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("load_distance", self.load_distance)?;
        check_positive("unload_distance", self.unload_distance)?;
        if self.load_distance >= self.unload_distance {
            return Err(ConfigError::HysteresisViolation {
                load: self.load_distance,
                unload: self.unload_distance,
            });
        }
        Ok(())
    }

    /// Number of loader threads to start.
    ///
    /// `loading_threads == 0` leaves two cores for the game and render
    /// threads, with a floor of one worker.
    pub fn resolved_threads(&self) -> usize {
        if self.loading_threads > 0 {
            return self.loading_threads;
        }
        let cpus = num_cpus::get().max(2);
        (cpus - 2).max(1)
    }
}

impl WorldConfig {
    /// Checks the voxel scale and octree depth.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive("voxel_size", self.voxel_size)?;
        if !(MIN_SVO_DEPTH..=MAX_SVO_DEPTH).contains(&self.svo_max_depth) {
            return Err(ConfigError::InvalidSvoDepth(self.svo_max_depth));
        }
        Ok(())
    }
}

fn check_positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}

/// Platform config directory for geode (e.g. `~/.config/geode` on Linux).
///
/// Falls back to the working directory when the platform exposes none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("geode"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// --- Load / Save / Reload ---

impl Config {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.world.validate()?;
        self.streaming.validate()
    }

    /// Load config from the given directory, or create a default config file.
    ///
    /// A loaded config is validated before it is returned.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    ///
    /// A changed file that fails validation is reported as an error and the
    /// caller keeps running with its current settings.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            new_config.validate()?;
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(!ron_str.is_empty());
        assert!(ron_str.contains("load_distance: 300.0"));
        assert!(ron_str.contains("svo_max_depth: 20"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_missing_field_uses_default() {
        // Config missing the `streaming` section entirely
        let ron_str = "(world: (), debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.streaming, StreamingConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let ron_str = "(future_setting: true)";
        let result: Result<Config, _> = ron::from_str(ron_str);
        assert!(result.is_ok());
    }

    #[test]
    fn test_equal_distances_rejected() {
        let streaming = StreamingConfig {
            load_distance: 400.0,
            unload_distance: 400.0,
            ..Default::default()
        };
        let result = streaming.validate();
        assert!(
            matches!(result, Err(ConfigError::HysteresisViolation { .. })),
            "expected HysteresisViolation, got {result:?}"
        );
    }

    #[test]
    fn test_inverted_distances_rejected() {
        let streaming = StreamingConfig {
            load_distance: 600.0,
            unload_distance: 500.0,
            ..Default::default()
        };
        assert!(streaming.validate().is_err());
    }

    #[test]
    fn test_non_positive_values_rejected() {
        let streaming = StreamingConfig {
            load_distance: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            streaming.validate(),
            Err(ConfigError::NonPositive {
                field: "load_distance",
                ..
            })
        ));

        let world = WorldConfig {
            voxel_size: f32::NAN,
            ..Default::default()
        };
        assert!(world.validate().is_err());
    }

    #[test]
    fn test_svo_depth_bounds() {
        for depth in [0u8, 5, 31, 64] {
            let world = WorldConfig {
                svo_max_depth: depth,
                ..Default::default()
            };
            assert!(
                matches!(world.validate(), Err(ConfigError::InvalidSvoDepth(d)) if d == depth),
                "depth {depth} should be rejected"
            );
        }
        for depth in [6u8, 20, 30] {
            let world = WorldConfig {
                svo_max_depth: depth,
                ..Default::default()
            };
            assert!(world.validate().is_ok(), "depth {depth} should be accepted");
        }
    }

    #[test]
    fn test_resolved_threads() {
        let explicit = StreamingConfig {
            loading_threads: 3,
            ..Default::default()
        };
        assert_eq!(explicit.resolved_threads(), 3);

        let auto = StreamingConfig {
            loading_threads: 0,
            ..Default::default()
        };
        assert!(auto.resolved_threads() >= 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.streaming.load_distance = 128.0;
        config.streaming.unload_distance = 192.0;
        config.world.save_file = PathBuf::from("saves/terra.svo");

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_load_rejects_invalid_hysteresis() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.ron"),
            "(streaming: (load_distance: 500.0, unload_distance: 500.0))",
        )
        .unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(
            result,
            Err(ConfigError::HysteresisViolation { .. })
        ));
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.streaming.max_active_chunks = 64;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert!(result.is_some());
        assert_eq!(result.unwrap().streaming.max_active_chunks, 64);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }

    #[test]
    fn test_default_config_dir_ends_with_geode_or_is_cwd() {
        let dir = default_config_dir();
        assert!(dir.ends_with("geode") || dir == PathBuf::from("."));
    }
}
