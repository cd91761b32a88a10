//! Stopper-based position calibration.
//!
//! The stage controller forgets its reference on power loss and reports the
//! far end of travel. Calibration recovers it by homing into the mechanical
//! stopper and asserting the stopper's known coordinate:
//!
//! ```text
//! Uninitialized ──(pos < threshold)──────────────────────────► Calibrated
//!       │
//!       └─► ProbingHome ──Clashed──► ClashDetected ──(readback ok)──► Calibrated
//!                │                        │
//!                │                        └──(readback off / write failed)──► Failed
//!                └──CompletedWithoutClash / TransportError──────────────────► Failed
//! ```
//!
//! A run never retries; the caller decides what to do with `Failed`.

use tracing::{debug, error, info, warn};

use crate::config::StageSettings;
use crate::error::{CalibrationFailure, StageError, StageResult};
use crate::hardware::{HomeOutcome, LengthUnit, MotorDriver};

/// Where a calibration run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationState {
    /// No run yet, or a new run is starting
    #[default]
    Uninitialized,
    /// Homing toward the stopper
    ProbingHome,
    /// Stopper hit; the register write is next
    ClashDetected,
    /// Reference established
    Calibrated,
    /// Run ended without a trusted reference
    Failed,
}

/// Geometry used by a calibration run.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSettings {
    /// Positions strictly below this are trusted as referenced
    pub reference_threshold_mm: f64,
    /// Coordinate written to the position register after a clash
    pub stopper_position_mm: f64,
    /// Allowed |readback - stopper| after the register write
    pub tolerance_mm: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self::from(&StageSettings::default())
    }
}

impl From<&StageSettings> for CalibrationSettings {
    fn from(settings: &StageSettings) -> Self {
        Self {
            reference_threshold_mm: settings.axis.reference_threshold_mm,
            stopper_position_mm: settings.axis.stopper_position_mm,
            tolerance_mm: settings.axis.calibration_tolerance_mm,
        }
    }
}

/// Outcome of a successful calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationRecord {
    /// The axis was already referenced and homing was not attempted
    pub skipped_homing: bool,
    /// Position read before anything was commanded
    pub initial_position_mm: f64,
    /// Position read after calibration finished
    pub readback_mm: f64,
    /// `readback - stopper`; zero when homing was skipped
    pub error_mm: f64,
}

/// Runs the homing sequence for one axis and tracks its state.
#[derive(Debug, Default)]
pub struct CalibrationController {
    settings: CalibrationSettings,
    state: CalibrationState,
}

impl CalibrationController {
    /// Controller in the `Uninitialized` state.
    pub fn new(settings: CalibrationSettings) -> Self {
        Self {
            settings,
            state: CalibrationState::Uninitialized,
        }
    }

    /// State reached by the most recent run.
    pub fn state(&self) -> CalibrationState {
        self.state
    }

    fn transition(&mut self, next: CalibrationState) {
        debug!(from = ?self.state, to = ?next, "calibration state change");
        self.state = next;
    }

    fn fail(&mut self, failure: CalibrationFailure) -> StageError {
        error!(reason = %failure, "calibration failed");
        self.transition(CalibrationState::Failed);
        StageError::Calibration(failure)
    }

    /// Run the calibration sequence against `driver`.
    ///
    /// # Errors
    /// `StageError::Calibration` when the run ends in `Failed`.
    pub async fn calibrate(&mut self, driver: &dyn MotorDriver) -> StageResult<CalibrationRecord> {
        self.state = CalibrationState::Uninitialized;

        let initial_position_mm = match driver.get_position(LengthUnit::Millimetres).await {
            Ok(pos) => pos,
            Err(err) => return Err(self.fail(CalibrationFailure::Transport(err.to_string()))),
        };
        info!(position_mm = initial_position_mm, "calibration started");

        if initial_position_mm < self.settings.reference_threshold_mm {
            info!(
                position_mm = initial_position_mm,
                threshold_mm = self.settings.reference_threshold_mm,
                "axis already referenced, skipping homing"
            );
            self.transition(CalibrationState::Calibrated);
            return Ok(CalibrationRecord {
                skipped_homing: true,
                initial_position_mm,
                readback_mm: initial_position_mm,
                error_mm: 0.0,
            });
        }

        self.transition(CalibrationState::ProbingHome);
        match driver.try_home(true).await {
            HomeOutcome::Clashed => {
                info!("stopper clash detected");
                self.transition(CalibrationState::ClashDetected);
            }
            HomeOutcome::CompletedWithoutClash => {
                warn!("homing completed without hitting the stopper");
                return Err(self.fail(CalibrationFailure::NoClash));
            }
            HomeOutcome::TransportError(reason) => {
                return Err(self.fail(CalibrationFailure::Transport(reason)));
            }
        }

        let stopper = self.settings.stopper_position_mm;
        if let Err(err) = driver
            .set_position_register(stopper, LengthUnit::Millimetres)
            .await
        {
            return Err(self.fail(CalibrationFailure::Transport(err.to_string())));
        }

        let readback_mm = match driver.get_position(LengthUnit::Millimetres).await {
            Ok(pos) => pos,
            Err(err) => return Err(self.fail(CalibrationFailure::Transport(err.to_string()))),
        };
        let error_mm = readback_mm - stopper;

        if error_mm.abs() >= self.settings.tolerance_mm {
            return Err(self.fail(CalibrationFailure::OutOfTolerance {
                readback: readback_mm,
                expected: stopper,
                tolerance: self.settings.tolerance_mm,
            }));
        }

        info!(readback_mm, error_mm, "calibration complete");
        self.transition(CalibrationState::Calibrated);
        Ok(CalibrationRecord {
            skipped_homing: false,
            initial_position_mm,
            readback_mm,
            error_mm,
        })
    }
}
