//! Serial endpoint discovery.
//!
//! Controllers are identified by the serial number declared in the motor
//! descriptor, not by port name, because USB-serial port names are not stable
//! across reboots. Discovery enumerates serial endpoints, keeps those whose
//! name or USB product string contains the descriptor's `device_manager_name`,
//! then opens each candidate and asks the controller for its serial number.

use tracing::{debug, info, warn};

use crate::config::{MotorDescriptor, SerialSettings};
use crate::error::{StageError, StageResult};
use crate::hardware::zaber::ZaberAsciiTransport;

/// One enumerated serial endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SerialEndpoint {
    /// OS port name
    pub port_name: String,
    /// USB product string, if any
    pub product: Option<String>,
    /// USB manufacturer string, if any
    pub manufacturer: Option<String>,
}

impl SerialEndpoint {
    /// Endpoint with no USB metadata.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// True when `name` occurs in the port name, product or manufacturer.
    /// An empty filter matches every endpoint.
    pub fn matches_name(&self, name: &str) -> bool {
        if name.is_empty() {
            return true;
        }
        let name = name.to_lowercase();
        std::iter::once(Some(&self.port_name))
            .chain([self.product.as_ref(), self.manufacturer.as_ref()])
            .flatten()
            .any(|field| field.to_lowercase().contains(&name))
    }
}

/// List serial endpoints visible to the OS.
#[cfg(feature = "instrument_serial")]
pub fn enumerate_endpoints() -> StageResult<Vec<SerialEndpoint>> {
    use serialport::SerialPortType;

    let ports = serialport::available_ports()
        .map_err(|e| StageError::Connection(format!("Could not enumerate serial ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(info) => SerialEndpoint {
                port_name: port.port_name,
                product: info.product,
                manufacturer: info.manufacturer,
            },
            _ => SerialEndpoint::new(port.port_name),
        })
        .collect())
}

/// Without serial support there is nothing to enumerate.
#[cfg(not(feature = "instrument_serial"))]
pub fn enumerate_endpoints() -> StageResult<Vec<SerialEndpoint>> {
    Err(StageError::FeatureNotEnabled("instrument_serial".to_string()))
}

/// Order candidates for probing: `preferred` first (if given), then every
/// endpoint matching the descriptor's name filter.
pub fn candidate_ports(
    endpoints: &[SerialEndpoint],
    device_manager_name: &str,
    preferred: Option<&str>,
) -> Vec<String> {
    let mut ports: Vec<String> = preferred.map(str::to_string).into_iter().collect();
    ports.extend(
        endpoints
            .iter()
            .filter(|ep| ep.matches_name(device_manager_name))
            .map(|ep| ep.port_name.clone())
            .filter(|name| Some(name.as_str()) != preferred),
    );
    ports
}

/// Find and open the controller whose serial number matches `descriptor`.
///
/// # Errors
/// `StageError::Connection` when no candidate answers with the declared
/// serial number.
pub async fn locate_transport(
    descriptor: &MotorDescriptor,
    settings: &SerialSettings,
    preferred: Option<&str>,
) -> StageResult<ZaberAsciiTransport> {
    let endpoints = enumerate_endpoints()?;
    let candidates = candidate_ports(&endpoints, &descriptor.device_manager_name, preferred);
    debug!(motor = %descriptor.label(), ?candidates, "probing serial endpoints");

    for port_name in &candidates {
        let transport = match ZaberAsciiTransport::open(port_name, settings).await {
            Ok(transport) => transport,
            Err(err) => {
                debug!(port = %port_name, error = %err, "endpoint not usable");
                continue;
            }
        };

        match transport.serial_number().await {
            Ok(serial) if serial == descriptor.serial_number => {
                info!(motor = %descriptor.label(), port = %port_name, serial, "controller located");
                return Ok(transport);
            }
            Ok(serial) => {
                debug!(port = %port_name, serial, expected = descriptor.serial_number, "serial number mismatch");
            }
            Err(err) => {
                warn!(port = %port_name, error = %err, "no serial number reply");
            }
        }
    }

    Err(StageError::Connection(format!(
        "No controller with serial number {} found for {} (probed {} endpoint(s))",
        descriptor.serial_number,
        descriptor.label(),
        candidates.len()
    )))
}
