//! Custom error types for the stage controller.
//!
//! `StageError` is the single error type surfaced by the library. Using the
//! `thiserror` crate it gives every failure a readable message and lets lower
//! layers convert into it with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: the transport could not be opened or no device answered
//!   with the declared serial number. Fatal for that driver.
//! - **`Transport`**: a communication failure reported by an open transport.
//! - **`Calibration`**: the stopper homing sequence ended in `Failed`.
//! - **`Config`**: a descriptor or settings file is missing, malformed or
//!   semantically invalid.
//! - **`UnknownMotorType`** / **`MotorIndexOutOfRange`**: registry lookups.
//! - **`Timeout`**: a bounded wait (e.g. centering) expired.
//!
//! Movement failures are deliberately absent: they are recovered inside the
//! real driver or consumed by calibration as the clash signal.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::hardware::transport::TransportError;

/// Convenience alias for results using the stage error type.
pub type StageResult<T> = std::result::Result<T, StageError>;

/// Errors surfaced by the stage controller.
#[derive(Error, Debug)]
pub enum StageError {
    /// Transport could not be opened or the controller was not found
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failure reported by an open transport
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Calibration ended in `Failed`
    #[error("Calibration failed: {0}")]
    Calibration(#[from] CalibrationFailure),

    /// Settings, descriptor or parameter problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No motors registered under this type tag
    #[error("Unknown motor type '{0}'")]
    UnknownMotorType(String),

    /// Index past the end of a type's motors
    #[error("Motor index {index} out of range for type '{motor_type}' ({count} configured)")]
    MotorIndexOutOfRange {
        /// Type that was addressed
        motor_type: String,
        /// Requested index
        index: usize,
        /// Motors registered for the type
        count: usize,
    },

    /// Nothing was configured
    #[error("Registry has no motors configured")]
    EmptyRegistry,

    /// A bounded wait expired
    #[error("Timed out after {after:?} while {operation}")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// Limit that was exceeded
        after: Duration,
    },

    /// The named cargo feature is needed for this operation
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

/// Why a calibration run ended in the `Failed` state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationFailure {
    /// Homing finished cleanly, so the stopper position is unknown
    #[error("homing completed without hitting the stopper")]
    NoClash,

    /// Readback after the register write is too far from the stopper
    #[error("stopper readback {readback:.3} mm differs from {expected:.3} mm by more than {tolerance} mm")]
    OutOfTolerance {
        /// Position read back, mm
        readback: f64,
        /// Stopper coordinate, mm
        expected: f64,
        /// Allowed error, mm
        tolerance: f64,
    },

    /// The axis could not be read or commanded
    #[error("transport fault during calibration: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StageError::UnknownMotorType("Y_LSQ".to_string());
        assert_eq!(err.to_string(), "Unknown motor type 'Y_LSQ'");
    }

    #[test]
    fn test_index_out_of_range_display() {
        let err = StageError::MotorIndexOutOfRange {
            motor_type: "X_LSQ".into(),
            index: 3,
            count: 2,
        };
        assert!(err.to_string().contains("index 3"));
        assert!(err.to_string().contains("2 configured"));
    }

    #[test]
    fn test_calibration_failure_converts() {
        let err: StageError = CalibrationFailure::NoClash.into();
        assert!(err.to_string().starts_with("Calibration failed"));
    }
}
