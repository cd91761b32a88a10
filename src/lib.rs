//! Single-axis linear stage control.
//!
//! - [`hardware`]: the `MotorDriver` trait, the Zaber-backed real driver and a
//!   simulated stand-in
//! - [`calibration`]: stopper-based homing that establishes an absolute reference
//! - [`motion`]: sinusoidal velocity profile generation and the quarter-wave
//!   step cycle
//! - [`registry`]: named collection of drivers built from the descriptor file
//! - [`config`]: stage settings, descriptors and run parameters
//! - [`logging`]: `tracing-subscriber` setup for binaries

pub mod adapters;
pub mod calibration;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod motion;
pub mod registry;

pub use calibration::{CalibrationController, CalibrationRecord, CalibrationSettings, CalibrationState};
pub use error::{CalibrationFailure, StageError, StageResult};
pub use hardware::{HomeOutcome, LengthUnit, MotorDriver, RealMotorDriver, SimulatedMotorDriver};
pub use motion::{quarter_wave_cycle, MotionProfileGenerator, MotionSample, ProfileSettings, SinusoidReport, StopFlag};
pub use registry::{DriverFactory, HardwareFactory, MotorRegistry};
