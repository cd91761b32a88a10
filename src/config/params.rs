//! Sinusoid run parameters.
//!
//! Supplied positionally on the command line (`port frequency amplitude
//! [duration]`) or, with no arguments, from a JSON file of the same shape:
//!
//! ```json
//! {"port": 3, "frequency": 0.5, "amplitude": 10.0, "duration": 60}
//! ```
//!
//! A negative duration means "run until stopped", matching the `-1` sentinel
//! used by older parameter files.

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Format, Json},
    Figment,
};
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Serial port as given by the operator: a bare number or a full name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    /// Port number, resolved per platform
    Number(u32),
    /// Full OS port name
    Name(String),
}

impl PortSpec {
    /// Digits become a number, anything else a name.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<u32>() {
            Ok(n) => PortSpec::Number(n),
            Err(_) => PortSpec::Name(raw.trim().to_string()),
        }
    }

    /// Resolve to an OS port name. Numbers become `COM<n>` on Windows and
    /// `/dev/ttyUSB<n>` elsewhere.
    pub fn port_name(&self) -> String {
        match self {
            PortSpec::Number(n) if cfg!(windows) => format!("COM{}", n),
            PortSpec::Number(n) => format!("/dev/ttyUSB{}", n),
            PortSpec::Name(name) => name.clone(),
        }
    }
}

/// Parameters for one sinusoid run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Serial port the controller is expected on
    pub port: PortSpec,
    /// Oscillation frequency, Hz
    pub frequency: f64,
    /// Oscillation amplitude, mm
    pub amplitude: f64,
    /// Run length in seconds; absent or negative runs until stopped
    #[serde(default)]
    pub duration: Option<f64>,
}

impl RunParameters {
    /// Build from positional arguments `[port, frequency, amplitude, duration?]`.
    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        if !(3..=4).contains(&args.len()) {
            return Err(ConfigError::Validation(format!(
                "Expecting 3-4 arguments but got {} instead",
                args.len()
            )));
        }

        let parse = |name: &str, raw: &str| -> Result<f64, ConfigError> {
            raw.trim().parse::<f64>().map_err(|_| {
                ConfigError::Validation(format!("{} must be a number, got '{}'", name, raw))
            })
        };

        let params = Self {
            port: PortSpec::parse(&args[0]),
            frequency: parse("frequency", &args[1])?,
            amplitude: parse("amplitude", &args[2])?,
            duration: args.get(3).map(|d| parse("duration", d)).transpose()?,
        };
        params.validate()?;
        Ok(params)
    }

    /// Load from a JSON parameter file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Validation(format!(
                "Parameter file '{}' not found",
                path.display()
            )));
        }

        let params: Self = Figment::from(Json::file(path)).extract()?;
        params.validate()?;
        Ok(params)
    }

    /// Reject values the motion loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(ConfigError::Validation(format!(
                "frequency must be > 0 Hz, got {}",
                self.frequency
            )));
        }
        if !(self.amplitude.is_finite() && self.amplitude >= 0.0) {
            return Err(ConfigError::Validation(format!(
                "amplitude must be >= 0 mm, got {}",
                self.amplitude
            )));
        }
        if let Some(d) = self.duration {
            if d == 0.0 || !d.is_finite() {
                return Err(ConfigError::Validation(format!(
                    "duration must be positive (or negative for unbounded), got {}",
                    d
                )));
            }
            if d > 0.0 && Duration::try_from_secs_f64(d).is_err() {
                return Err(ConfigError::Validation(format!(
                    "duration {} s is too long to represent",
                    d
                )));
            }
        }
        Ok(())
    }

    /// Run length, `None` when unbounded.
    ///
    /// A positive duration too large for [`Duration`] never passes
    /// [`validate`](Self::validate); if one is set directly it reads as unbounded.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
            .filter(|d| *d > 0.0)
            .and_then(|d| Duration::try_from_secs_f64(d).ok())
    }
}
