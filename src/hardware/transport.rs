//! Hardware transport seam under `RealMotorDriver`.
//!
//! A transport speaks to exactly one axis and works in millimetres; unit
//! conversion to controller-native steps is its own business. Failures are
//! classified so the driver can decide which ones are recoverable.

use async_trait::async_trait;
use thiserror::Error;

/// Transport-level failure, classified by how the driver must react.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Motion ended on a fault flag (stall, stopper clash, limit).
    #[error("movement failed: {0}")]
    MovementFailed(String),

    /// The controller refused the command (bad data, busy, out of range).
    #[error("command rejected: {0}")]
    Rejected(String),

    /// Write/read failure or an unparseable reply.
    #[error("communication failure: {0}")]
    Communication(String),

    /// No reply, or the axis never went idle, within the deadline.
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl TransportError {
    /// Movement failures and rejections are transient command failures that
    /// the driver recovers from locally.
    pub fn is_movement_failure(&self) -> bool {
        matches!(
            self,
            TransportError::MovementFailed(_) | TransportError::Rejected(_)
        )
    }
}

/// Result alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Low-level axis I/O.
#[async_trait]
pub trait AxisTransport: Send + Sync {
    /// Human-readable endpoint name (port path) for diagnostics.
    fn endpoint(&self) -> &str;

    /// Move to `position_mm`; with `wait`, return once idle.
    async fn move_absolute(&self, position_mm: f64, wait: bool) -> TransportResult<()>;

    /// Move by `delta_mm`; with `wait`, return once idle.
    async fn move_relative(&self, delta_mm: f64, wait: bool) -> TransportResult<()>;

    /// Constant velocity; zero stops the axis.
    async fn move_velocity(&self, velocity_mm_s: f64) -> TransportResult<()>;

    /// Current position in mm.
    async fn get_position(&self) -> TransportResult<f64>;

    /// Run the controller's homing routine.
    async fn home(&self, wait: bool) -> TransportResult<()>;

    /// Overwrite the position register without moving.
    async fn set_position(&self, position_mm: f64) -> TransportResult<()>;
}
