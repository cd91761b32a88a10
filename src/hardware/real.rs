//! Hardware-backed motor driver.
//!
//! Wraps an [`AxisTransport`] and applies the stage's failure policy:
//! movement failures and command rejections are logged and swallowed so a
//! running control loop survives a single bad command, while communication
//! failures propagate. Homing is the exception: there the movement failure is
//! the stopper clash and is reported as [`HomeOutcome::Clashed`].

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::error::StageResult;
use crate::hardware::capabilities::{HomeOutcome, LengthUnit, MotorDriver};
use crate::hardware::transport::{AxisTransport, TransportError, TransportResult};

/// Motor driver over a hardware transport.
pub struct RealMotorDriver {
    label: String,
    transport: Box<dyn AxisTransport>,
}

impl RealMotorDriver {
    /// Wrap an already-connected transport.
    ///
    /// # Arguments
    /// * `label` - Identifier used in log lines (usually `TYPE[index]`)
    /// * `transport` - Exclusive handle to the axis
    pub fn new(label: impl Into<String>, transport: Box<dyn AxisTransport>) -> Self {
        Self {
            label: label.into(),
            transport,
        }
    }

    /// Identifier used in log lines
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Where the transport is attached, e.g. the serial port name
    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Apply the soft-failure policy to a movement result.
    fn recover(&self, operation: &str, result: TransportResult<()>) -> StageResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_movement_failure() => {
                error!(motor = %self.label, %operation, error = %err, "movement failed, continuing");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl MotorDriver for RealMotorDriver {
    async fn move_absolute(&self, position: f64, unit: LengthUnit, wait: bool) -> StageResult<()> {
        let target_mm = unit.to_mm(position);
        info!(motor = %self.label, target_mm, "starting move to absolute position");
        let result = self.transport.move_absolute(target_mm, wait).await;
        self.recover("move_absolute", result)?;
        debug!(motor = %self.label, target_mm, "move_absolute issued");
        Ok(())
    }

    async fn move_relative(&self, delta: f64, unit: LengthUnit, wait: bool) -> StageResult<()> {
        let delta_mm = unit.to_mm(delta);
        info!(motor = %self.label, delta_mm, "starting relative move");
        let result = self.transport.move_relative(delta_mm, wait).await;
        self.recover("move_relative", result)?;
        debug!(motor = %self.label, delta_mm, "move_relative issued");
        Ok(())
    }

    async fn move_velocity(&self, velocity_mm_s: f64) -> StageResult<()> {
        let result = self.transport.move_velocity(velocity_mm_s).await;
        self.recover("move_velocity", result)
    }

    async fn get_position(&self, unit: LengthUnit) -> StageResult<f64> {
        let position_mm = self.transport.get_position().await?;
        debug!(motor = %self.label, position_mm, "current position");
        Ok(unit.from_mm(position_mm))
    }

    async fn try_home(&self, wait: bool) -> HomeOutcome {
        info!(motor = %self.label, "starting home");
        match self.transport.home(wait).await {
            Ok(()) => {
                debug!(motor = %self.label, "axis returned to home position");
                HomeOutcome::CompletedWithoutClash
            }
            Err(err) if err.is_movement_failure() => {
                error!(motor = %self.label, error = %err, "homing stopped on fault");
                HomeOutcome::Clashed
            }
            Err(err) => {
                error!(motor = %self.label, error = %err, "homing transport failure");
                HomeOutcome::TransportError(err.to_string())
            }
        }
    }

    async fn set_position_register(&self, position: f64, unit: LengthUnit) -> StageResult<()> {
        let position_mm = unit.to_mm(position);
        info!(motor = %self.label, position_mm, "setting position register explicitly");
        self.transport
            .set_position(position_mm)
            .await
            .map_err(|err: TransportError| {
                error!(motor = %self.label, error = %err, "position register write failed");
                err.into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Transport whose next result for every call is scripted.
    struct ScriptedTransport {
        position: Mutex<f64>,
        fail_with: Option<TransportError>,
    }

    impl ScriptedTransport {
        fn ok() -> Self {
            Self {
                position: Mutex::new(0.0),
                fail_with: None,
            }
        }

        fn failing(err: TransportError) -> Self {
            Self {
                position: Mutex::new(0.0),
                fail_with: Some(err),
            }
        }

        fn outcome(&self) -> TransportResult<()> {
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl AxisTransport for ScriptedTransport {
        fn endpoint(&self) -> &str {
            "scripted"
        }

        async fn move_absolute(&self, position_mm: f64, _wait: bool) -> TransportResult<()> {
            self.outcome()?;
            *self.position.lock().unwrap() = position_mm;
            Ok(())
        }

        async fn move_relative(&self, delta_mm: f64, _wait: bool) -> TransportResult<()> {
            self.outcome()?;
            *self.position.lock().unwrap() += delta_mm;
            Ok(())
        }

        async fn move_velocity(&self, _velocity_mm_s: f64) -> TransportResult<()> {
            self.outcome()
        }

        async fn get_position(&self) -> TransportResult<f64> {
            Ok(*self.position.lock().unwrap())
        }

        async fn home(&self, _wait: bool) -> TransportResult<()> {
            self.outcome()
        }

        async fn set_position(&self, position_mm: f64) -> TransportResult<()> {
            self.outcome()?;
            *self.position.lock().unwrap() = position_mm;
            Ok(())
        }
    }

    #[test]
    fn test_identity() {
        let driver = RealMotorDriver::new("X_LSQ[1]", Box::new(ScriptedTransport::ok()));
        assert_eq!(driver.label(), "X_LSQ[1]");
        assert_eq!(driver.endpoint(), "scripted");
    }

    #[tokio::test]
    async fn test_moves_are_forwarded_in_mm() {
        let driver = RealMotorDriver::new("X_LSQ[0]", Box::new(ScriptedTransport::ok()));

        driver
            .move_absolute(12_500.0, LengthUnit::Micrometres, true)
            .await
            .unwrap();
        assert_eq!(driver.get_position(LengthUnit::Millimetres).await.unwrap(), 12.5);

        driver
            .move_relative(2.5, LengthUnit::Millimetres, true)
            .await
            .unwrap();
        assert_eq!(driver.get_position(LengthUnit::Millimetres).await.unwrap(), 15.0);
    }

    #[tokio::test]
    async fn test_movement_failure_is_swallowed() {
        let driver = RealMotorDriver::new(
            "X_LSQ[0]",
            Box::new(ScriptedTransport::failing(TransportError::MovementFailed(
                "FS".into(),
            ))),
        );

        assert!(driver
            .move_absolute(100.0, LengthUnit::Millimetres, true)
            .await
            .is_ok());
        assert!(driver.move_velocity(5.0).await.is_ok());
        // Position did not change
        assert_eq!(driver.get_position(LengthUnit::Millimetres).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_rejection_is_swallowed() {
        let driver = RealMotorDriver::new(
            "X_LSQ[0]",
            Box::new(ScriptedTransport::failing(TransportError::Rejected(
                "BADDATA".into(),
            ))),
        );

        assert!(driver
            .move_relative(500.0, LengthUnit::Millimetres, true)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_communication_failure_propagates() {
        let driver = RealMotorDriver::new(
            "X_LSQ[0]",
            Box::new(ScriptedTransport::failing(TransportError::Communication(
                "port closed".into(),
            ))),
        );

        let result = driver.move_absolute(10.0, LengthUnit::Millimetres, true).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("port closed"));
    }

    #[tokio::test]
    async fn test_home_outcomes() {
        let clash = RealMotorDriver::new(
            "a",
            Box::new(ScriptedTransport::failing(TransportError::MovementFailed(
                "FS".into(),
            ))),
        );
        assert_eq!(clash.try_home(true).await, HomeOutcome::Clashed);

        let clean = RealMotorDriver::new("b", Box::new(ScriptedTransport::ok()));
        assert_eq!(clean.try_home(true).await, HomeOutcome::CompletedWithoutClash);

        let broken = RealMotorDriver::new(
            "c",
            Box::new(ScriptedTransport::failing(TransportError::Timeout(
                "idle".into(),
            ))),
        );
        assert!(matches!(
            broken.try_home(true).await,
            HomeOutcome::TransportError(_)
        ));

        // Non-raising wrapper never fails
        clash.home(true).await;
    }

    #[tokio::test]
    async fn test_set_position_register_propagates_errors() {
        let driver = RealMotorDriver::new(
            "X_LSQ[0]",
            Box::new(ScriptedTransport::failing(TransportError::Rejected(
                "BADCOMMAND".into(),
            ))),
        );
        assert!(driver
            .set_position_register(40.0, LengthUnit::Millimetres)
            .await
            .is_err());
    }
}
