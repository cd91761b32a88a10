//! Sinusoidal motion profile generation.
//!
//! The generator drives a [`MotorDriver`] with a stream of velocity commands so
//! the measured position follows `amplitude · sin(2πft)` around the rail
//! center. Commands are issued at a fixed nominal period; the loop measures
//! each iteration and either sleeps the remainder or, on overrun, advances its
//! nominal clock by the time actually spent so the phase does not fall behind.
//!
//! # Example
//!
//! ```rust,ignore
//! let generator = MotionProfileGenerator::new(driver, ProfileSettings::default());
//! let stop = StopFlag::new();
//! let report = generator
//!     .run(0.5, 10.0, Some(Duration::from_secs(60)), &stop)
//!     .await?;
//! println!("drift: {:.4} mm", report.drift_mm);
//! ```

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, StageSettings};
use crate::error::{StageError, StageResult};
use crate::hardware::{LengthUnit, MotorDriver};

/// Carrier frequency of the radar target the step cycle is tuned for.
pub const CARRIER_FREQUENCY_HZ: f64 = 76.5e9;

/// Quarter of the carrier wavelength, in millimetres.
pub const QUARTER_WAVELENGTH_MM: f64 = 3.0e8 / CARRIER_FREQUENCY_HZ / 4.0 * 1000.0;

/// Cooperative cancellation for long-running motion.
///
/// Clones share the same flag; raising any clone stops every loop watching it.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every watching loop to stop.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once any clone has been raised.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Timing and centering parameters for the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSettings {
    /// Rail length; the center target is half of it
    pub axis_length_mm: f64,
    /// Nominal control period
    pub time_step: Duration,
    /// Speed while driving to the center
    pub center_speed_mm_s: f64,
    /// Centering succeeds within this distance
    pub center_tolerance_mm: f64,
    /// Upper bound on centering
    pub center_timeout: Duration,
    /// Pause between centering polls
    pub center_poll_interval: Duration,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self::from(&StageSettings::default())
    }
}

impl From<&StageSettings> for ProfileSettings {
    fn from(settings: &StageSettings) -> Self {
        Self {
            axis_length_mm: settings.axis.length_mm,
            time_step: settings.motion.time_step(),
            center_speed_mm_s: settings.motion.center_speed_mm_s,
            center_tolerance_mm: settings.motion.center_tolerance_mm,
            center_timeout: settings.motion.center_timeout(),
            center_poll_interval: settings.motion.center_poll_interval(),
        }
    }
}

/// Position recorded at the start of one control iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// Time since the run started
    pub timestamp: Duration,
    /// Position read, mm
    pub position_mm: f64,
}

/// Result of one sinusoid run.
#[derive(Debug, Clone, PartialEq)]
pub struct SinusoidReport {
    /// Position read after centering
    pub center_mm: f64,
    /// One sample per control iteration
    pub samples: Vec<MotionSample>,
    /// Mean recorded position minus the center
    pub drift_mm: f64,
    /// Iterations that took longer than the nominal period
    pub overruns: usize,
}

impl SinusoidReport {
    fn new(center_mm: f64, samples: Vec<MotionSample>, overruns: usize) -> Self {
        let drift_mm = if samples.is_empty() {
            0.0
        } else {
            let sum: f64 = samples.iter().map(|s| s.position_mm).sum();
            sum / samples.len() as f64 - center_mm
        };
        Self {
            center_mm,
            samples,
            drift_mm,
            overruns,
        }
    }
}

/// Drives one axis through a sinusoidal velocity profile.
pub struct MotionProfileGenerator {
    driver: Arc<dyn MotorDriver>,
    settings: ProfileSettings,
}

impl MotionProfileGenerator {
    /// Generator for `driver`.
    pub fn new(driver: Arc<dyn MotorDriver>, settings: ProfileSettings) -> Self {
        Self { driver, settings }
    }

    async fn position(&self) -> StageResult<f64> {
        self.driver.get_position(LengthUnit::Millimetres).await
    }

    /// Command zero velocity, logging rather than returning a failure. Used on
    /// exit paths that already carry a more relevant result.
    async fn halt(&self) {
        if let Err(err) = self.driver.move_velocity(0.0).await {
            error!(error = %err, "failed to halt axis");
        }
    }

    /// Drive to the middle of the rail and stop there.
    ///
    /// Returns the position read after halting.
    ///
    /// # Errors
    /// `StageError::Timeout` if the target is not reached within the
    /// configured timeout; the axis is halted first.
    pub async fn center(&self) -> StageResult<f64> {
        let target = self.settings.axis_length_mm / 2.0;
        let tolerance = self.settings.center_tolerance_mm;
        let start_mm = self.position().await?;

        if (start_mm - target).abs() <= tolerance {
            debug!(position_mm = start_mm, "already centered");
            return Ok(start_mm);
        }

        let direction = (target - start_mm).signum();
        info!(from = start_mm, to = target, "centering axis");
        self.driver
            .move_velocity(direction * self.settings.center_speed_mm_s)
            .await?;

        let began = Instant::now();
        loop {
            let pos = match self.position().await {
                Ok(pos) => pos,
                Err(err) => {
                    self.halt().await;
                    return Err(err);
                }
            };

            if (pos - target).abs() <= tolerance {
                break;
            }
            if (pos - target) * direction > 0.0 {
                warn!(position_mm = pos, target_mm = target, "center target crossed between polls");
                break;
            }
            if began.elapsed() >= self.settings.center_timeout {
                self.halt().await;
                return Err(StageError::Timeout {
                    operation: "centering axis".to_string(),
                    after: self.settings.center_timeout,
                });
            }

            tokio::time::sleep(self.settings.center_poll_interval).await;
        }

        self.driver.move_velocity(0.0).await?;
        let centered = self.position().await?;
        info!(position_mm = centered, "axis centered");
        Ok(centered)
    }

    /// Center the axis, then oscillate at `frequency` Hz with `amplitude` mm
    /// until `duration` elapses or `stop` is raised. `None` runs until stopped.
    ///
    /// The axis is commanded to zero velocity when the loop ends.
    pub async fn run(
        &self,
        frequency: f64,
        amplitude: f64,
        duration: Option<Duration>,
        stop: &StopFlag,
    ) -> StageResult<SinusoidReport> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(ConfigError::Validation(format!("frequency must be > 0 Hz, got {}", frequency)).into());
        }
        if !(amplitude.is_finite() && amplitude >= 0.0) {
            return Err(ConfigError::Validation(format!("amplitude must be >= 0 mm, got {}", amplitude)).into());
        }

        let center_mm = self.center().await?;
        info!(frequency, amplitude, ?duration, center_mm, "starting sinusoid");

        let result = self.oscillate(frequency, amplitude, duration, stop).await;
        self.halt().await;

        let (samples, overruns) = result?;
        let report = SinusoidReport::new(center_mm, samples, overruns);
        info!(
            samples = report.samples.len(),
            overruns = report.overruns,
            drift_mm = report.drift_mm,
            "sinusoid finished"
        );
        Ok(report)
    }

    async fn oscillate(
        &self,
        frequency: f64,
        amplitude: f64,
        duration: Option<Duration>,
        stop: &StopFlag,
    ) -> StageResult<(Vec<MotionSample>, usize)> {
        let period = self.settings.time_step;
        let omega = 2.0 * PI * frequency;
        let start = Instant::now();
        let mut t_nominal = Duration::ZERO;
        let mut samples = Vec::new();
        let mut overruns = 0;

        loop {
            if stop.is_raised() {
                info!("stop requested");
                break;
            }
            if duration.is_some_and(|d| start.elapsed() >= d) {
                break;
            }

            let iteration_start = Instant::now();
            let position_mm = self.position().await?;
            samples.push(MotionSample {
                timestamp: iteration_start.duration_since(start),
                position_mm,
            });

            let velocity = amplitude * omega * (omega * t_nominal.as_secs_f64()).cos();
            self.driver.move_velocity(velocity).await?;

            let spent = iteration_start.elapsed();
            if spent < period {
                tokio::time::sleep(period - spent).await;
                t_nominal += period;
            } else {
                debug!(?spent, ?period, "control iteration overran");
                overruns += 1;
                t_nominal += spent;
            }
        }

        Ok((samples, overruns))
    }
}

/// Step between `base_mm` and `base_mm + λ/4`, `reps` times.
pub async fn quarter_wave_cycle(driver: &dyn MotorDriver, base_mm: f64, reps: usize) -> StageResult<()> {
    info!(base_mm, step_mm = QUARTER_WAVELENGTH_MM, reps, "starting quarter-wave cycle");
    for rep in 0..reps {
        driver
            .move_absolute(base_mm, LengthUnit::Millimetres, true)
            .await?;
        driver
            .move_relative(QUARTER_WAVELENGTH_MM, LengthUnit::Millimetres, true)
            .await?;
        driver
            .move_absolute(base_mm, LengthUnit::Millimetres, true)
            .await?;
        debug!(rep, "quarter-wave step done");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedMotorDriver;
    use tracing_test::traced_test;

    fn generator(driver: Arc<SimulatedMotorDriver>) -> MotionProfileGenerator {
        MotionProfileGenerator::new(driver, ProfileSettings::default())
    }

    #[test]
    fn test_quarter_wavelength() {
        assert!((QUARTER_WAVELENGTH_MM - 0.980_392).abs() < 1e-5);
    }

    #[test]
    fn test_stop_flag_is_shared() {
        let flag = StopFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_raised());
        clone.raise();
        assert!(flag.is_raised());
    }

    #[test]
    fn test_empty_report_has_zero_drift() {
        let report = SinusoidReport::new(75.75, Vec::new(), 0);
        assert_eq!(report.drift_mm, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_center_from_either_side() {
        for start in [0.0, 151.5, 30.0] {
            let driver = Arc::new(SimulatedMotorDriver::new().at_position(start));
            let centered = generator(driver.clone()).center().await.unwrap();

            assert!((centered - 75.75).abs() <= 0.1, "start {start} ended at {centered}");
            assert_eq!(driver.velocity().await, 0.0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_center_already_there_commands_nothing() {
        let driver = Arc::new(SimulatedMotorDriver::new().at_position(75.7));
        let centered = generator(driver.clone()).center().await.unwrap();
        assert_eq!(centered, 75.7);
    }

    fn coarse_poll_settings() -> ProfileSettings {
        ProfileSettings {
            center_speed_mm_s: 25.0,
            center_tolerance_mm: 0.1,
            center_poll_interval: Duration::from_millis(20),
            center_timeout: Duration::from_secs(30),
            ..ProfileSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_center_stops_when_target_crossed_between_polls() {
        // 0.5 mm per poll: 75.5 mm is short of the band, 76.0 mm is past it
        let driver = Arc::new(SimulatedMotorDriver::new().at_position(0.0));
        let generator = MotionProfileGenerator::new(driver.clone(), coarse_poll_settings());

        let centered = generator.center().await.unwrap();

        assert!(logs_contain("center target crossed between polls"));
        assert!((centered - 76.0).abs() < 1e-6, "ended at {centered}");
        assert_eq!(driver.velocity().await, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_crossed_center() {
        let driver = Arc::new(SimulatedMotorDriver::new().at_position(0.0));
        let generator = MotionProfileGenerator::new(driver.clone(), coarse_poll_settings());

        let report = generator
            .run(1.0, 0.0, Some(Duration::from_millis(200)), &StopFlag::new())
            .await
            .unwrap();

        assert!((report.center_mm - 76.0).abs() < 1e-6);
        assert!(report.center_mm - 75.75 > 0.1);
        assert!(!report.samples.is_empty());
        assert!((report.samples[0].position_mm - report.center_mm).abs() < 1e-9);
        assert_eq!(driver.velocity().await, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_center_times_out_and_halts() {
        let driver = Arc::new(SimulatedMotorDriver::new().at_position(0.0));
        let settings = ProfileSettings {
            center_speed_mm_s: 1.0,
            center_timeout: Duration::from_secs(5),
            ..ProfileSettings::default()
        };
        let generator = MotionProfileGenerator::new(driver.clone(), settings);

        let err = generator.center().await.unwrap_err();
        assert!(matches!(err, StageError::Timeout { .. }));
        assert_eq!(driver.velocity().await, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sample_count_and_halt() {
        let driver = Arc::new(SimulatedMotorDriver::new().at_position(75.75));
        let report = generator(driver.clone())
            .run(1.0, 5.0, Some(Duration::from_secs(1)), &StopFlag::new())
            .await
            .unwrap();

        // 1000 ms / 48 ms
        assert!((20..=22).contains(&report.samples.len()));
        assert_eq!(report.overruns, 0);
        assert_eq!(report.samples[0].timestamp, Duration::ZERO);
        let step = report.samples[1].timestamp - report.samples[0].timestamp;
        assert!(step >= Duration::from_millis(48) && step < Duration::from_millis(50));
        assert_eq!(driver.velocity().await, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raised_stop_flag_ends_run() {
        let driver = Arc::new(SimulatedMotorDriver::new().at_position(75.75));
        let stop = StopFlag::new();
        stop.raise();

        let report = generator(driver).run(1.0, 5.0, None, &stop).await.unwrap();
        assert!(report.samples.is_empty());
        assert_eq!(report.drift_mm, 0.0);
    }

    #[tokio::test]
    async fn test_invalid_parameters_rejected() {
        let driver = Arc::new(SimulatedMotorDriver::new());
        let generator = generator(driver);
        let stop = StopFlag::new();
        assert!(generator.run(0.0, 1.0, None, &stop).await.is_err());
        assert!(generator.run(1.0, -1.0, None, &stop).await.is_err());
    }

    #[tokio::test]
    async fn test_quarter_wave_cycle_returns_to_base() {
        let driver = SimulatedMotorDriver::new();
        quarter_wave_cycle(&driver, 50.0, 3).await.unwrap();
        assert_eq!(driver.get_position(LengthUnit::Millimetres).await.unwrap(), 50.0);
    }
}
