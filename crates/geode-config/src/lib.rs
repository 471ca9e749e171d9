//! Configuration system for the geode voxel engine.
//!
//! Provides runtime-configurable world and streaming settings that persist to
//! disk as RON files. Supports validation of the load/unload hysteresis band,
//! hot-reload detection, and forward/backward compatible serialization.

mod config;
mod error;

pub use config::{Config, DebugConfig, StreamingConfig, WorldConfig, default_config_dir};
pub use error::ConfigError;
