//! Stage settings loaded with Figment.
//!
//! Precedence (highest to lowest):
//! 1. Environment variables prefixed `LINSTAGE_`, nested keys split on `__`
//!    (e.g. `LINSTAGE_MOTION__TIME_STEP_MS=20`)
//! 2. The TOML file (`config/stage.toml` by default, optional)
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```no_run
//! use linear_stage::config::StageSettings;
//!
//! let settings = StageSettings::load()?;
//! println!("Control period: {:?}", settings.motion.time_step());
//! # Ok::<(), linear_stage::config::ConfigError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Full travel of the stage.
pub const DEFAULT_AXIS_LENGTH_MM: f64 = 151.5;
/// Coordinate asserted after colliding with the mechanical stopper.
pub const DEFAULT_STOPPER_POSITION_MM: f64 = 40.0;
/// Positions below this are trusted as already referenced (a powered-off
/// controller reports the far end of travel).
pub const DEFAULT_REFERENCE_THRESHOLD_MM: f64 = 150.0;
/// Allowed readback error after the stopper reference is written.
pub const DEFAULT_CALIBRATION_TOLERANCE_MM: f64 = 1.0;
/// Nominal sinusoid control period.
pub const DEFAULT_TIME_STEP_MS: u64 = 48;

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StageSettings {
    /// Logging and file locations
    pub application: ApplicationSettings,
    /// Rail geometry and calibration
    pub axis: AxisSettings,
    /// Sinusoid loop and centering
    pub motion: MotionSettings,
    /// Zaber serial transport
    pub serial: SerialSettings,
}

/// Application-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
    /// Motor descriptor file; the platform default is used when unset
    pub motor_config: Option<PathBuf>,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            motor_config: None,
        }
    }
}

/// Axis geometry and calibration constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisSettings {
    /// Full travel, mm
    pub length_mm: f64,
    /// Coordinate of the mechanical stopper, mm
    pub stopper_position_mm: f64,
    /// Readings below this skip homing
    pub reference_threshold_mm: f64,
    /// Allowed readback error after calibration
    pub calibration_tolerance_mm: f64,
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            length_mm: DEFAULT_AXIS_LENGTH_MM,
            stopper_position_mm: DEFAULT_STOPPER_POSITION_MM,
            reference_threshold_mm: DEFAULT_REFERENCE_THRESHOLD_MM,
            calibration_tolerance_mm: DEFAULT_CALIBRATION_TOLERANCE_MM,
        }
    }
}

/// Sinusoid loop and centering settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Nominal control period in milliseconds
    pub time_step_ms: u64,
    /// Speed used to drive to the rail center, mm/s
    pub center_speed_mm_s: f64,
    /// Centering is done once within this distance of the target
    pub center_tolerance_mm: f64,
    /// Give up centering after this many seconds
    pub center_timeout_secs: u64,
    /// Pause between position polls while centering
    pub center_poll_interval_ms: u64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            time_step_ms: DEFAULT_TIME_STEP_MS,
            center_speed_mm_s: 25.0,
            center_tolerance_mm: 0.1,
            center_timeout_secs: 30,
            center_poll_interval_ms: 1,
        }
    }
}

impl MotionSettings {
    /// Control period as a `Duration`.
    pub fn time_step(&self) -> Duration {
        Duration::from_millis(self.time_step_ms)
    }

    /// Centering limit as a `Duration`.
    pub fn center_timeout(&self) -> Duration {
        Duration::from_secs(self.center_timeout_secs)
    }

    /// Centering poll pause as a `Duration`.
    pub fn center_poll_interval(&self) -> Duration {
        Duration::from_millis(self.center_poll_interval_ms)
    }
}

/// Serial transport settings (Zaber ASCII)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Line speed
    pub baud_rate: u32,
    /// Reply timeout per command
    pub timeout_ms: u64,
    /// Pause between idle polls while waiting for motion to finish
    pub idle_poll_interval_ms: u64,
    /// Longest a single move or homing run may take
    pub motion_timeout_secs: u64,
    /// Linear distance of one microstep, micrometres
    pub microstep_size_um: f64,
    /// Device address on the daisy chain
    pub device_address: u8,
    /// Axis number on the device
    pub axis_number: u8,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout_ms: 1000,
            idle_poll_interval_ms: 20,
            motion_timeout_secs: 60,
            microstep_size_um: 0.047625,
            device_address: 1,
            axis_number: 1,
        }
    }
}

impl SerialSettings {
    /// Reply timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Idle poll pause as a `Duration`.
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    /// Motion limit as a `Duration`.
    pub fn motion_timeout(&self) -> Duration {
        Duration::from_secs(self.motion_timeout_secs)
    }
}

impl StageSettings {
    /// Load from `config/stage.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/stage.toml")
    }

    /// Load from a specific TOML file and the environment, then validate.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(StageSettings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LINSTAGE_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check values that parse but make no physical sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let axis = &self.axis;
        if !(axis.length_mm > 0.0) {
            return Err(ConfigError::Validation(format!(
                "axis.length_mm must be > 0, got {}",
                axis.length_mm
            )));
        }
        if !(axis.stopper_position_mm > 0.0 && axis.stopper_position_mm < axis.length_mm) {
            return Err(ConfigError::Validation(format!(
                "axis.stopper_position_mm {} must lie inside (0, {})",
                axis.stopper_position_mm, axis.length_mm
            )));
        }
        if axis.reference_threshold_mm > axis.length_mm {
            return Err(ConfigError::Validation(format!(
                "axis.reference_threshold_mm {} exceeds axis length {}",
                axis.reference_threshold_mm, axis.length_mm
            )));
        }
        if !(axis.calibration_tolerance_mm > 0.0) {
            return Err(ConfigError::Validation(
                "axis.calibration_tolerance_mm must be > 0".to_string(),
            ));
        }

        let motion = &self.motion;
        if motion.time_step_ms == 0 {
            return Err(ConfigError::Validation(
                "motion.time_step_ms must be > 0".to_string(),
            ));
        }
        if !(motion.center_speed_mm_s > 0.0) {
            return Err(ConfigError::Validation(
                "motion.center_speed_mm_s must be > 0".to_string(),
            ));
        }
        if !(motion.center_tolerance_mm > 0.0) {
            return Err(ConfigError::Validation(
                "motion.center_tolerance_mm must be > 0".to_string(),
            ));
        }

        if !(self.serial.microstep_size_um > 0.0) {
            return Err(ConfigError::Validation(
                "serial.microstep_size_um must be > 0".to_string(),
            ));
        }
        if self.serial.device_address == 0 || self.serial.axis_number == 0 {
            return Err(ConfigError::Validation(
                "serial.device_address and serial.axis_number start at 1".to_string(),
            ));
        }

        Ok(())
    }
}
