//! Hardware adapters
//!
//! Low-level I/O used by the protocol transports in [`crate::hardware`].

pub mod serial_adapter;

pub use serial_adapter::SerialAdapter;
