//! Motor descriptor file.
//!
//! The file is a JSON array, one entry per motor type, in declaration order:
//!
//! ```json
//! [
//!   {
//!     "type": "X_LSQ",
//!     "properties": [
//!       {"serial_number": 123456, "device_manager_name": "USB Serial Port", "index": 0},
//!       {"serial_number": 123457, "device_manager_name": "USB Serial Port", "index": 1}
//!     ]
//!   },
//!   {"type": "DUMMY", "properties": [{"serial_number": 0, "device_manager_name": "", "index": 0}]}
//! ]
//! ```
//!
//! The type tag is resolved to a [`DriverKind`] while loading, so an unknown
//! tag fails at startup rather than on first use.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Which driver implementation backs a motor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Zaber X-LSQ linear stage over serial.
    ZaberLinear,
    /// Simulated stand-in, no hardware.
    Simulated,
}

impl DriverKind {
    /// Resolve a type tag. `simulated` forces the stand-in for any known tag.
    pub fn resolve(type_tag: &str, simulated: bool) -> Result<Self, ConfigError> {
        let kind = match type_tag {
            "X_LSQ" | "X-LSQ" => DriverKind::ZaberLinear,
            "DUMMY" | "SIMULATED" => DriverKind::Simulated,
            other => {
                return Err(ConfigError::Validation(format!(
                    "Unknown motor type '{}'. Must be one of: X_LSQ, DUMMY, SIMULATED",
                    other
                )))
            }
        };

        Ok(if simulated { DriverKind::Simulated } else { kind })
    }

    /// Real hardware loses its reference across power cycles and must be
    /// calibrated after connecting.
    pub fn requires_calibration(&self) -> bool {
        matches!(self, DriverKind::ZaberLinear)
    }

    /// Name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::ZaberLinear => "zaber_linear",
            DriverKind::Simulated => "simulated",
        }
    }
}

/// One motor instance within a type entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorProperties {
    /// Controller serial number used to find the port
    #[serde(default)]
    pub serial_number: u64,
    /// Substring of the endpoint name (OS device-manager / USB product string)
    #[serde(default)]
    pub device_manager_name: String,
    /// Position within the type, dense from 0
    pub index: usize,
}

/// All motors of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorTypeEntry {
    /// Type tag, e.g. `X_LSQ`
    #[serde(rename = "type")]
    pub motor_type: String,
    /// Force the simulated driver for this type (bench work without hardware)
    #[serde(default)]
    pub simulated: bool,
    /// Motors of this type
    pub properties: Vec<MotorProperties>,
}

/// Immutable identity of one motor, resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorDescriptor {
    /// Type tag this motor is registered under
    pub motor_type: String,
    /// Backend that drives it
    pub kind: DriverKind,
    /// Controller serial number
    pub serial_number: u64,
    /// Endpoint name filter
    pub device_manager_name: String,
    /// Index within the type
    pub index: usize,
}

impl MotorDescriptor {
    /// Build a descriptor for a simulated motor.
    pub fn simulated(motor_type: impl Into<String>, index: usize) -> Self {
        Self {
            motor_type: motor_type.into(),
            kind: DriverKind::Simulated,
            serial_number: 0,
            device_manager_name: String::new(),
            index,
        }
    }

    /// Log label, e.g. `X_LSQ[1]`.
    pub fn label(&self) -> String {
        format!("{}[{}]", self.motor_type, self.index)
    }
}

/// Parsed descriptor file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct MotorConfig {
    /// Type entries in declaration order
    pub entries: Vec<MotorTypeEntry>,
}

impl MotorConfig {
    /// Platform-specific default location of the descriptor file.
    pub fn default_path() -> PathBuf {
        let platform = match std::env::consts::OS {
            "windows" => "win32",
            other => other,
        };
        PathBuf::from("config").join(format!("linear_motor_config_{}.json", platform))
    }

    /// Read and validate a descriptor file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate descriptor JSON held in memory.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks:
    /// - at least one type is declared
    /// - type tags are unique and known
    /// - indices within a type are dense from 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::Validation(
                "Motor configuration declares no motor types".to_string(),
            ));
        }

        let mut tags = HashSet::new();
        for entry in &self.entries {
            if !tags.insert(entry.motor_type.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate motor type: '{}'",
                    entry.motor_type
                )));
            }

            DriverKind::resolve(&entry.motor_type, entry.simulated)?;

            let indices: Vec<usize> = entry.properties.iter().map(|p| p.index).collect();
            validate_dense_indices(&entry.motor_type, &indices)?;
        }

        Ok(())
    }

    /// Flatten into descriptors, types in declaration order and motors
    /// ordered by index within each type.
    pub fn descriptors(&self) -> Result<Vec<MotorDescriptor>, ConfigError> {
        self.validate()?;

        let mut descriptors = Vec::new();
        for entry in &self.entries {
            let kind = DriverKind::resolve(&entry.motor_type, entry.simulated)?;
            let mut properties: Vec<&MotorProperties> = entry.properties.iter().collect();
            properties.sort_by_key(|p| p.index);

            descriptors.extend(properties.into_iter().map(|p| MotorDescriptor {
                motor_type: entry.motor_type.clone(),
                kind,
                serial_number: p.serial_number,
                device_manager_name: p.device_manager_name.clone(),
                index: p.index,
            }));
        }
        Ok(descriptors)
    }
}

/// Indices of one type must be exactly `0..n` (any declaration order).
pub fn validate_dense_indices(motor_type: &str, indices: &[usize]) -> Result<(), ConfigError> {
    if indices.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Motor type '{}' declares no motors",
            motor_type
        )));
    }

    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    for (expected, actual) in sorted.iter().enumerate() {
        if *actual != expected {
            return Err(ConfigError::Validation(format!(
                "Motor type '{}' indices must be dense from 0, got {:?}",
                motor_type, indices
            )));
        }
    }
    Ok(())
}
