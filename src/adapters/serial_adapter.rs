//! Line-oriented serial adapter.
//!
//! Wraps the `serialport` crate and provides async request/response I/O by
//! running the blocking port operations on Tokio's blocking task executor.
//! All access to a port goes through one `Mutex`, so a command and its reply
//! are never interleaved with another command.

#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

use crate::hardware::transport::{TransportError, TransportResult};

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

const DEFAULT_SERIAL_TIMEOUT_MS: u64 = 1000;

/// Serial adapter for RS-232 / USB-serial controllers
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// Reply timeout
    timeout: Duration,

    /// Line terminator appended to commands
    line_terminator: String,

    /// Character ending a reply line
    response_delimiter: char,

    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Create a new, unconnected adapter
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 9600, 115200)
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(DEFAULT_SERIAL_TIMEOUT_MS),
            line_terminator: "\n".to_string(),
            response_delimiter: '\n',
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Set reply timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Set response delimiter character
    pub fn with_response_delimiter(mut self, delimiter: char) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    /// Port this adapter was created for
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Open the port.
    pub async fn connect(&mut self) -> TransportResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port_name = self.port_name.clone();
            let baud_rate = self.baud_rate;
            let port = tokio::task::spawn_blocking(move || {
                serialport::new(&port_name, baud_rate)
                    .timeout(Duration::from_millis(100)) // Internal read timeout
                    .open()
            })
            .await
            .map_err(|e| TransportError::Communication(format!("Serial open task panicked: {}", e)))?
            .map_err(|e| {
                TransportError::Communication(format!(
                    "Failed to open serial port '{}' at {} baud: {}",
                    self.port_name, self.baud_rate, e
                ))
            })?;

            self.port = Some(Arc::new(Mutex::new(port)));
            debug!(port = %self.port_name, baud = self.baud_rate, "serial port opened");
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(TransportError::Communication(
                "Serial feature disabled".to_string(),
            ))
        }
    }

    /// Send a command and return the first reply line accepted by `accept`.
    ///
    /// Lines rejected by `accept` (unsolicited messages, echoes) are skipped.
    /// Empty lines are always skipped.
    pub async fn query_matching(
        &self,
        command: &str,
        accept: fn(&str) -> bool,
    ) -> TransportResult<String> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self
                .port
                .as_ref()
                .ok_or_else(|| TransportError::Communication("Serial port not connected".into()))?
                .clone();

            let command_str = format!("{}{}", command, self.line_terminator);
            let command_for_log = command.to_string();
            let delimiter = self.response_delimiter;
            let timeout = self.timeout;

            // Execute blocking serial I/O on dedicated thread
            tokio::task::spawn_blocking(move || -> TransportResult<String> {
                use std::io::{Read, Write};

                let mut port_guard = port.blocking_lock();

                port_guard
                    .write_all(command_str.as_bytes())
                    .and_then(|_| port_guard.flush())
                    .map_err(|e| {
                        TransportError::Communication(format!("Failed to write to serial port: {}", e))
                    })?;

                debug!(command = %command_for_log, "sent serial command");

                let start = std::time::Instant::now();
                let mut line = String::new();
                let mut buffer = [0u8; 1];

                loop {
                    if start.elapsed() > timeout {
                        return Err(TransportError::Timeout(format!(
                            "reply to '{}' after {:?}",
                            command_for_log, timeout
                        )));
                    }

                    match port_guard.read(&mut buffer) {
                        Ok(1) => {
                            let ch = buffer[0] as char;
                            if ch != delimiter {
                                line.push(ch);
                                continue;
                            }
                            let candidate = line.trim().to_string();
                            line.clear();
                            if !candidate.is_empty() && accept(&candidate) {
                                debug!(reply = %candidate, "received serial reply");
                                return Ok(candidate);
                            }
                        }
                        Ok(_) => {
                            return Err(TransportError::Communication(
                                "Unexpected EOF from serial port".to_string(),
                            ));
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                            // Port timeout is shorter than our overall timeout
                            continue;
                        }
                        Err(e) => {
                            return Err(TransportError::Communication(format!(
                                "Serial read error: {}",
                                e
                            )));
                        }
                    }
                }
            })
            .await
            .map_err(|e| TransportError::Communication(format!("Serial I/O task panicked: {}", e)))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = (command, accept);
            Err(TransportError::Communication(
                "Serial feature disabled".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_adapter_creation() {
        let adapter = SerialAdapter::new("/dev/ttyUSB0", 115_200);
        assert_eq!(adapter.port_name(), "/dev/ttyUSB0");
        assert_eq!(adapter.baud_rate, 115_200);
    }

    #[test]
    fn test_builder_settings() {
        let adapter = SerialAdapter::new("COM3", 9600)
            .with_timeout(Duration::from_millis(250))
            .with_line_terminator("\r\n")
            .with_response_delimiter('\r');
        assert_eq!(adapter.timeout, Duration::from_millis(250));
        assert_eq!(adapter.line_terminator, "\r\n");
        assert_eq!(adapter.response_delimiter, '\r');
    }

    #[tokio::test]
    async fn test_query_without_connection_fails() {
        let adapter = SerialAdapter::new("/dev/ttyUSB0", 115_200);
        let result = adapter.query_matching("/1 1 get pos", |_| true).await;
        assert!(matches!(result, Err(TransportError::Communication(_))));
    }
}
