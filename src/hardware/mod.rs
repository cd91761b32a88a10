//! Motor drivers and the transports beneath them.
//!
//! - [`capabilities`]: the `MotorDriver` trait and shared value types
//! - [`real`]: hardware-backed driver applying the soft-failure policy
//! - [`mock`]: simulated driver used for bench work and tests
//! - [`transport`] / [`zaber`]: axis I/O, Zaber ASCII over serial
//! - [`discovery`]: locating a controller by serial number

pub mod capabilities;
pub mod discovery;
pub mod mock;
pub mod real;
pub mod transport;
pub mod zaber;

pub use capabilities::{HomeOutcome, LengthUnit, MotorDriver};
pub use mock::{SimulatedHoming, SimulatedMotorDriver};
pub use real::RealMotorDriver;
pub use transport::{AxisTransport, TransportError, TransportResult};
pub use zaber::ZaberAsciiTransport;
