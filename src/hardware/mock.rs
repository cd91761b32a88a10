//! Simulated Motor Driver
//!
//! Stand-in axis for motor types without physical backing and for tests.
//! Time is read from `tokio::time::Instant`, so a paused test clock drives
//! the simulation deterministically.
//!
//! # Behaviour
//!
//! - Absolute and relative moves complete instantly. An absolute target is
//!   echoed back by `get_position()` exactly when read in the unit it was
//!   commanded in.
//! - Velocity commands are integrated over elapsed time, clamped to the
//!   travel range `[0, axis_length]`.
//! - Targets outside the travel range are rejected with a warning and the
//!   position is left unchanged, like a hardware rejection that the real
//!   driver swallows.
//! - Homing behaviour is configurable (stopper clash, clean completion, fault).

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::DEFAULT_AXIS_LENGTH_MM;
use crate::error::StageResult;
use crate::hardware::capabilities::{HomeOutcome, LengthUnit, MotorDriver};
use crate::hardware::transport::TransportError;

/// What a simulated homing run does.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedHoming {
    /// Stall against the stopper; the position register reads `register_mm`
    /// afterwards (arbitrary until re-asserted).
    Clash {
        /// Register value after the clash, mm
        register_mm: f64,
    },
    /// Reach the home switch cleanly; position becomes 0.
    Complete,
    /// Fail at the transport level.
    Fault(String),
}

#[derive(Debug)]
struct SimState {
    position_mm: f64,
    velocity_mm_s: f64,
    since: Instant,
    /// Last absolute target in the caller's unit, while the axis rests on it
    commanded: Option<(f64, LengthUnit)>,
    home_calls: usize,
}

/// Simulated linear axis.
///
/// # Example
///
/// ```rust,ignore
/// let motor = SimulatedMotorDriver::new().at_position(151.5);
/// motor.move_absolute(90.0, LengthUnit::Millimetres, true).await?;
/// assert_eq!(motor.get_position(LengthUnit::Millimetres).await?, 90.0);
/// ```
pub struct SimulatedMotorDriver {
    label: String,
    axis_length_mm: f64,
    homing: SimulatedHoming,
    reject_register_writes: bool,
    state: Mutex<SimState>,
}

impl SimulatedMotorDriver {
    /// Create a simulated axis at position 0.0 mm on a default-length rail.
    pub fn new() -> Self {
        Self {
            label: "simulated".to_string(),
            axis_length_mm: DEFAULT_AXIS_LENGTH_MM,
            homing: SimulatedHoming::Complete,
            reject_register_writes: false,
            state: Mutex::new(SimState {
                position_mm: 0.0,
                velocity_mm_s: 0.0,
                since: Instant::now(),
                commanded: None,
                home_calls: 0,
            }),
        }
    }

    /// Name used in log lines.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Start from `position_mm` instead of 0.
    pub fn at_position(mut self, position_mm: f64) -> Self {
        self.state.get_mut().position_mm = position_mm;
        self
    }

    /// Travel range upper bound, mm.
    pub fn with_axis_length(mut self, axis_length_mm: f64) -> Self {
        self.axis_length_mm = axis_length_mm;
        self
    }

    /// What `try_home` does.
    pub fn with_homing(mut self, homing: SimulatedHoming) -> Self {
        self.homing = homing;
        self
    }

    /// Make `set_position_register` fail, as a controller with a locked
    /// setting would.
    pub fn rejecting_register_writes(mut self) -> Self {
        self.reject_register_writes = true;
        self
    }

    /// Number of homing attempts seen so far.
    pub async fn home_calls(&self) -> usize {
        self.state.lock().await.home_calls
    }

    /// Velocity currently commanded, in mm/s.
    pub async fn velocity(&self) -> f64 {
        self.state.lock().await.velocity_mm_s
    }

    fn position_at(&self, state: &SimState, now: Instant) -> f64 {
        if state.velocity_mm_s == 0.0 {
            return state.position_mm;
        }
        let elapsed = now.saturating_duration_since(state.since).as_secs_f64();
        (state.position_mm + state.velocity_mm_s * elapsed).clamp(0.0, self.axis_length_mm)
    }

    /// Fold elapsed motion into the stored position.
    fn settle(&self, state: &mut SimState) {
        let now = Instant::now();
        state.position_mm = self.position_at(state, now);
        state.since = now;
    }

    fn in_travel(&self, target_mm: f64) -> bool {
        (0.0..=self.axis_length_mm).contains(&target_mm)
    }
}

impl Default for SimulatedMotorDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MotorDriver for SimulatedMotorDriver {
    async fn move_absolute(&self, position: f64, unit: LengthUnit, _wait: bool) -> StageResult<()> {
        let target_mm = unit.to_mm(position);
        let mut state = self.state.lock().await;
        self.settle(&mut state);
        state.velocity_mm_s = 0.0;

        if !self.in_travel(target_mm) {
            warn!(motor = %self.label, target_mm, "simulated move rejected: outside travel range");
            return Ok(());
        }

        debug!(motor = %self.label, from = state.position_mm, to = target_mm, "simulated absolute move");
        state.position_mm = target_mm;
        state.commanded = Some((position, unit));
        Ok(())
    }

    async fn move_relative(&self, delta: f64, unit: LengthUnit, _wait: bool) -> StageResult<()> {
        let delta_mm = unit.to_mm(delta);
        let mut state = self.state.lock().await;
        self.settle(&mut state);
        state.velocity_mm_s = 0.0;

        let target_mm = state.position_mm + delta_mm;
        if !self.in_travel(target_mm) {
            warn!(motor = %self.label, target_mm, "simulated move rejected: outside travel range");
            return Ok(());
        }

        debug!(motor = %self.label, from = state.position_mm, to = target_mm, "simulated relative move");
        state.position_mm = target_mm;
        state.commanded = None;
        Ok(())
    }

    async fn move_velocity(&self, velocity_mm_s: f64) -> StageResult<()> {
        let mut state = self.state.lock().await;
        self.settle(&mut state);
        state.velocity_mm_s = velocity_mm_s;
        if velocity_mm_s != 0.0 {
            state.commanded = None;
        }
        Ok(())
    }

    async fn get_position(&self, unit: LengthUnit) -> StageResult<f64> {
        let state = self.state.lock().await;
        if state.velocity_mm_s == 0.0 {
            if let Some((value, commanded_unit)) = state.commanded {
                if commanded_unit == unit {
                    return Ok(value);
                }
            }
        }
        Ok(unit.from_mm(self.position_at(&state, Instant::now())))
    }

    async fn try_home(&self, _wait: bool) -> HomeOutcome {
        let mut state = self.state.lock().await;
        self.settle(&mut state);
        state.velocity_mm_s = 0.0;
        state.commanded = None;
        state.home_calls += 1;

        match &self.homing {
            SimulatedHoming::Clash { register_mm } => {
                debug!(motor = %self.label, "simulated homing hit the stopper");
                state.position_mm = *register_mm;
                HomeOutcome::Clashed
            }
            SimulatedHoming::Complete => {
                state.position_mm = 0.0;
                HomeOutcome::CompletedWithoutClash
            }
            SimulatedHoming::Fault(reason) => HomeOutcome::TransportError(reason.clone()),
        }
    }

    async fn set_position_register(&self, position: f64, unit: LengthUnit) -> StageResult<()> {
        if self.reject_register_writes {
            return Err(TransportError::Rejected("simulated register write refused".into()).into());
        }
        let mut state = self.state.lock().await;
        self.settle(&mut state);
        state.position_mm = unit.to_mm(position);
        state.commanded = Some((position, unit));
        debug!(motor = %self.label, position_mm = state.position_mm, "simulated position register set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_absolute_move_round_trip() {
        let motor = SimulatedMotorDriver::new();

        assert_eq!(motor.get_position(LengthUnit::Millimetres).await.unwrap(), 0.0);

        for target in [10.0, 75.75, 151.5, 0.0, 33.333] {
            motor
                .move_absolute(target, LengthUnit::Millimetres, true)
                .await
                .unwrap();
            assert_eq!(
                motor.get_position(LengthUnit::Millimetres).await.unwrap(),
                target
            );
        }
    }

    #[tokio::test]
    async fn test_micrometre_targets_echo_exactly() {
        let motor = SimulatedMotorDriver::new();

        for i in 0..2000 {
            let target = i as f64 * 0.0785;
            motor
                .move_absolute(target, LengthUnit::Micrometres, true)
                .await
                .unwrap();
            assert_eq!(
                motor.get_position(LengthUnit::Micrometres).await.unwrap(),
                target
            );
        }

        motor
            .move_absolute(15.700000000000001, LengthUnit::Micrometres, true)
            .await
            .unwrap();
        assert_eq!(
            motor.get_position(LengthUnit::Micrometres).await.unwrap(),
            15.700000000000001
        );
        let mm = motor.get_position(LengthUnit::Millimetres).await.unwrap();
        assert!((mm - 0.0157).abs() < 1e-12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_velocity_after_absolute_move_reads_live_position() {
        let motor = SimulatedMotorDriver::new();
        motor
            .move_absolute(10_000.0, LengthUnit::Micrometres, true)
            .await
            .unwrap();

        motor.move_velocity(1.0).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let um = motor.get_position(LengthUnit::Micrometres).await.unwrap();
        assert!((um - 11_000.0).abs() < 1e-6, "position was {um}");
    }

    #[tokio::test]
    async fn test_relative_move() {
        let motor = SimulatedMotorDriver::new().at_position(50.0);

        motor
            .move_relative(5.0, LengthUnit::Millimetres, true)
            .await
            .unwrap();
        assert_eq!(motor.get_position(LengthUnit::Millimetres).await.unwrap(), 55.0);

        motor
            .move_relative(-3000.0, LengthUnit::Micrometres, true)
            .await
            .unwrap();
        assert_eq!(motor.get_position(LengthUnit::Millimetres).await.unwrap(), 52.0);
    }

    #[tokio::test]
    async fn test_out_of_range_move_is_ignored() {
        let motor = SimulatedMotorDriver::new().at_position(20.0);

        motor
            .move_absolute(200.0, LengthUnit::Millimetres, true)
            .await
            .unwrap();
        motor
            .move_relative(-25.0, LengthUnit::Millimetres, true)
            .await
            .unwrap();

        assert_eq!(motor.get_position(LengthUnit::Millimetres).await.unwrap(), 20.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_velocity_integrates_over_time() {
        let motor = SimulatedMotorDriver::new().at_position(10.0);

        motor.move_velocity(5.0).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        let pos = motor.get_position(LengthUnit::Millimetres).await.unwrap();
        assert!((pos - 20.0).abs() < 1e-9, "position was {pos}");

        motor.move_velocity(0.0).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        let held = motor.get_position(LengthUnit::Millimetres).await.unwrap();
        assert!((held - 20.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_velocity_clamps_at_travel_limits() {
        let motor = SimulatedMotorDriver::new().at_position(1.0);

        motor.move_velocity(-10.0).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(motor.get_position(LengthUnit::Millimetres).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_homing_behaviours() {
        let clash = SimulatedMotorDriver::new()
            .at_position(151.5)
            .with_homing(SimulatedHoming::Clash { register_mm: 37.2 });
        assert_eq!(clash.try_home(true).await, HomeOutcome::Clashed);
        assert_eq!(clash.get_position(LengthUnit::Millimetres).await.unwrap(), 37.2);
        assert_eq!(clash.home_calls().await, 1);

        let clean = SimulatedMotorDriver::new().at_position(80.0);
        assert_eq!(clean.try_home(true).await, HomeOutcome::CompletedWithoutClash);
        assert_eq!(clean.get_position(LengthUnit::Millimetres).await.unwrap(), 0.0);

        let fault = SimulatedMotorDriver::new().with_homing(SimulatedHoming::Fault("no reply".into()));
        assert_eq!(
            fault.try_home(true).await,
            HomeOutcome::TransportError("no reply".into())
        );
    }

    #[tokio::test]
    async fn test_register_write() {
        let motor = SimulatedMotorDriver::new().at_position(151.5);
        motor
            .set_position_register(40.0, LengthUnit::Millimetres)
            .await
            .unwrap();
        assert_eq!(motor.get_position(LengthUnit::Millimetres).await.unwrap(), 40.0);

        let locked = SimulatedMotorDriver::new().rejecting_register_writes();
        assert!(locked
            .set_position_register(40.0, LengthUnit::Millimetres)
            .await
            .is_err());
    }
}
