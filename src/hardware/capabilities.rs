//! Capability trait shared by every motor backend.
//!
//! `MotorDriver` is the one seam between the control logic (calibration,
//! sinusoid generation, registry routing) and a concrete axis. Real hardware
//! and the simulated stand-in implement the same set of operations.

use async_trait::async_trait;

use crate::error::StageResult;

/// Length unit accepted by positional driver calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthUnit {
    /// mm
    #[default]
    Millimetres,
    /// µm
    Micrometres,
}

impl LengthUnit {
    /// Convert a value expressed in this unit to millimetres.
    pub fn to_mm(self, value: f64) -> f64 {
        match self {
            LengthUnit::Millimetres => value,
            LengthUnit::Micrometres => value / 1000.0,
        }
    }

    /// Convert a millimetre value into this unit.
    pub fn from_mm(self, value_mm: f64) -> f64 {
        match self {
            LengthUnit::Millimetres => value_mm,
            LengthUnit::Micrometres => value_mm * 1000.0,
        }
    }

    /// Unit suffix for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            LengthUnit::Millimetres => "mm",
            LengthUnit::Micrometres => "um",
        }
    }
}

/// Result of a homing attempt.
///
/// Homing on this stage drives into a mechanical stopper, so a movement
/// failure is the expected outcome and completing cleanly is the anomaly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomeOutcome {
    /// Motion stopped on a fault (the stopper was hit).
    Clashed,
    /// Homing finished with no fault.
    CompletedWithoutClash,
    /// The command never reached the axis or its reply was unusable.
    TransportError(String),
}

/// Movement, position and homing control over one linear axis.
///
/// All methods take `&self`; implementations use interior mutability so a
/// driver can be shared as `Arc<dyn MotorDriver>` between the registry and
/// the motion loop. Calls are awaited one at a time per axis.
#[async_trait]
pub trait MotorDriver: Send + Sync {
    /// Move to an absolute position. With `wait` the call returns once the
    /// axis is idle again.
    async fn move_absolute(&self, position: f64, unit: LengthUnit, wait: bool) -> StageResult<()>;

    /// Move by `delta` from the current position.
    async fn move_relative(&self, delta: f64, unit: LengthUnit, wait: bool) -> StageResult<()>;

    /// Command a constant velocity in mm/s. Zero halts the axis.
    async fn move_velocity(&self, velocity_mm_s: f64) -> StageResult<()>;

    /// Read the current position.
    async fn get_position(&self, unit: LengthUnit) -> StageResult<f64>;

    /// Home the axis and report how it ended. Used by calibration, which needs
    /// to see the stopper clash.
    async fn try_home(&self, wait: bool) -> HomeOutcome;

    /// Home the axis for normal use, ignoring the outcome.
    async fn home(&self, wait: bool) {
        let outcome = self.try_home(wait).await;
        tracing::debug!(?outcome, "home finished");
    }

    /// Overwrite the axis position register without moving.
    async fn set_position_register(&self, position: f64, unit: LengthUnit) -> StageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(LengthUnit::Micrometres.to_mm(1500.0), 1.5);
        assert_eq!(LengthUnit::Micrometres.from_mm(0.25), 250.0);
        assert_eq!(LengthUnit::Millimetres.to_mm(42.0), 42.0);
        assert_eq!(LengthUnit::default(), LengthUnit::Millimetres);
    }
}
