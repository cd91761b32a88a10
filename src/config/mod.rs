//! Configuration for the stage controller.
//!
//! Three sources feed a run:
//! 1. [`StageSettings`]: axis geometry, motion timing and serial options,
//!    loaded with Figment from `config/stage.toml` and `LINSTAGE_` environment
//!    variables on top of built-in defaults.
//! 2. [`MotorConfig`]: the platform-specific JSON descriptor file listing every
//!    motor by type tag, serial number and index.
//! 3. [`RunParameters`]: the sinusoid parameters (`port`, `frequency`,
//!    `amplitude`, `duration`) from the command line or `prms.json`.

mod motors;
mod params;
mod settings;

use std::path::PathBuf;

use thiserror::Error;

pub use motors::{validate_dense_indices, DriverKind, MotorConfig, MotorDescriptor, MotorProperties, MotorTypeEntry};
pub use params::{PortSpec, RunParameters};
pub use settings::{
    ApplicationSettings, AxisSettings, MotionSettings, SerialSettings, StageSettings,
    DEFAULT_AXIS_LENGTH_MM, DEFAULT_CALIBRATION_TOLERANCE_MM, DEFAULT_REFERENCE_THRESHOLD_MM,
    DEFAULT_STOPPER_POSITION_MM, DEFAULT_TIME_STEP_MS,
};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment could not merge or extract the layers
    #[error("Configuration load error: {0}")]
    Load(#[from] Box<figment::Error>),

    /// File could not be read
    #[error("Failed to read '{path}': {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// File is not valid JSON for the expected shape
    #[error("Failed to parse '{path}': {source}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Underlying parse error
        source: serde_json::Error,
    },

    /// Values parsed but are not acceptable
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
