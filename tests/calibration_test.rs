//! Calibration through the real driver's failure policy and on simulated axes.

use std::sync::Mutex;

use async_trait::async_trait;
use linear_stage::hardware::{AxisTransport, SimulatedHoming, TransportError, TransportResult};
use linear_stage::{
    CalibrationController, CalibrationFailure, CalibrationSettings, CalibrationState, LengthUnit,
    MotorDriver, RealMotorDriver, SimulatedMotorDriver, StageError,
};

/// Transport modelling a stage that stalls on the stopper when homed.
struct StopperTransport {
    position_mm: Mutex<f64>,
    clash: bool,
}

impl StopperTransport {
    fn powered_off(clash: bool) -> Self {
        Self {
            position_mm: Mutex::new(151.5),
            clash,
        }
    }
}

#[async_trait]
impl AxisTransport for StopperTransport {
    fn endpoint(&self) -> &str {
        "/dev/null"
    }

    async fn move_absolute(&self, position_mm: f64, _wait: bool) -> TransportResult<()> {
        *self.position_mm.lock().unwrap() = position_mm;
        Ok(())
    }

    async fn move_relative(&self, delta_mm: f64, _wait: bool) -> TransportResult<()> {
        *self.position_mm.lock().unwrap() += delta_mm;
        Ok(())
    }

    async fn move_velocity(&self, _velocity_mm_s: f64) -> TransportResult<()> {
        Ok(())
    }

    async fn get_position(&self) -> TransportResult<f64> {
        Ok(*self.position_mm.lock().unwrap())
    }

    async fn home(&self, _wait: bool) -> TransportResult<()> {
        if self.clash {
            // Stalled somewhere on the stopper; register content is arbitrary
            *self.position_mm.lock().unwrap() = 0.37;
            Err(TransportError::MovementFailed("FS".to_string()))
        } else {
            *self.position_mm.lock().unwrap() = 0.0;
            Ok(())
        }
    }

    async fn set_position(&self, position_mm: f64) -> TransportResult<()> {
        *self.position_mm.lock().unwrap() = position_mm;
        Ok(())
    }
}

#[tokio::test]
async fn test_real_driver_clash_calibrates_to_stopper() {
    let driver = RealMotorDriver::new("X_LSQ[0]", Box::new(StopperTransport::powered_off(true)));
    let mut controller = CalibrationController::new(CalibrationSettings::default());

    let record = controller.calibrate(&driver).await.unwrap();

    assert_eq!(controller.state(), CalibrationState::Calibrated);
    assert!(!record.skipped_homing);
    assert!((record.readback_mm - 40.0).abs() < 1.0);
    assert!(
        (driver.get_position(LengthUnit::Millimetres).await.unwrap() - 40.0).abs() < 1.0
    );
}

#[tokio::test]
async fn test_real_driver_without_clash_fails() {
    let driver = RealMotorDriver::new("X_LSQ[0]", Box::new(StopperTransport::powered_off(false)));
    let mut controller = CalibrationController::new(CalibrationSettings::default());

    let err = controller.calibrate(&driver).await.unwrap_err();

    assert!(matches!(
        err,
        StageError::Calibration(CalibrationFailure::NoClash)
    ));
    assert_eq!(controller.state(), CalibrationState::Failed);
}

#[tokio::test]
async fn test_simulated_clash_lands_within_tolerance() {
    for register_mm in [0.0, 12.3, 151.5] {
        let driver = SimulatedMotorDriver::new()
            .at_position(151.5)
            .with_homing(SimulatedHoming::Clash { register_mm });
        let mut controller = CalibrationController::new(CalibrationSettings::default());

        controller.calibrate(&driver).await.unwrap();

        let pos = driver.get_position(LengthUnit::Millimetres).await.unwrap();
        assert!((pos - 40.0).abs() < 1.0, "register {register_mm}: {pos}");
    }
}

#[tokio::test]
async fn test_referenced_axis_is_untouched() {
    let driver = SimulatedMotorDriver::new()
        .at_position(12.0)
        .with_homing(SimulatedHoming::Clash { register_mm: 0.0 });
    let mut controller = CalibrationController::new(CalibrationSettings::default());

    let record = controller.calibrate(&driver).await.unwrap();

    assert!(record.skipped_homing);
    assert_eq!(driver.home_calls().await, 0);
    assert_eq!(driver.get_position(LengthUnit::Millimetres).await.unwrap(), 12.0);
}

#[tokio::test]
async fn test_controller_can_rerun_after_failure() {
    let mut controller = CalibrationController::new(CalibrationSettings::default());

    let broken = SimulatedMotorDriver::new()
        .at_position(151.5)
        .with_homing(SimulatedHoming::Complete);
    assert!(controller.calibrate(&broken).await.is_err());
    assert_eq!(controller.state(), CalibrationState::Failed);

    let good = SimulatedMotorDriver::new()
        .at_position(151.5)
        .with_homing(SimulatedHoming::Clash { register_mm: 0.0 });
    controller.calibrate(&good).await.unwrap();
    assert_eq!(controller.state(), CalibrationState::Calibrated);
}
