//! Configuration error types.

/// Errors that can occur when loading, saving, parsing, or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config: {0}")]
    ReadError(#[source] std::io::Error),

    /// Failed to write the config file to disk.
    #[error("failed to write config: {0}")]
    WriteError(#[source] std::io::Error),

    /// Failed to parse RON content.
    #[error("failed to parse config: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    /// Failed to serialize config to RON.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] ron::Error),

    /// The load distance does not sit strictly inside the unload distance.
    #[error(
        "load distance ({load}) must be less than unload distance ({unload}) to keep a hysteresis band"
    )]
    HysteresisViolation {
        /// Configured load distance.
        load: f32,
        /// Configured unload distance.
        unload: f32,
    },

    /// A distance or scale that must be strictly positive was not.
    #[error("{field} must be a positive finite number, got {value}")]
    NonPositive {
        /// Name of the offending setting.
        field: &'static str,
        /// The rejected value.
        value: f32,
    },

    /// The octree depth cannot address whole chunks or overflows `i32` coordinates.
    #[error("svo depth {0} is outside the supported range 6..=30")]
    InvalidSvoDepth(u8),
}
