//! Zaber ASCII protocol transport (X-LSQ linear stages)
//!
//! Protocol Overview:
//! - Command: `/[device] [axis] [command] [data]\n`
//! - Reply:   `@[device] [axis] [OK|RJ] [IDLE|BUSY] [warning flag] [data]`
//! - Lines starting with `#` (info) or `!` (alert) are unsolicited and skipped
//! - Positions are in microsteps; velocity data is microsteps/s × 1.6384
//! - A warning flag starting with `F` (e.g. `FS`, stalled) after motion means
//!   the move was stopped by a fault, which is how a stopper clash shows up
//!
//! # Example Usage
//!
//! ```no_run
//! use linear_stage::config::SerialSettings;
//! use linear_stage::hardware::zaber::ZaberAsciiTransport;
//! use linear_stage::hardware::transport::AxisTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = ZaberAsciiTransport::open("/dev/ttyUSB0", &SerialSettings::default()).await?;
//!     println!("Serial number: {}", transport.serial_number().await?);
//!     transport.move_absolute(75.75, true).await?;
//!     println!("Position: {:.3} mm", transport.get_position().await?);
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::adapters::SerialAdapter;
use crate::config::SerialSettings;
use crate::hardware::transport::{AxisTransport, TransportError, TransportResult};

/// Velocity data units per microstep/s.
const VELOCITY_SCALE: f64 = 1.6384;

/// One parsed reply line.
#[derive(Debug, Clone, PartialEq)]
pub struct ZaberReply {
    /// Replying device address
    pub device: u8,
    /// Replying axis, 0 for device scope
    pub axis: u8,
    /// `OK` rather than `RJ`
    pub accepted: bool,
    /// `BUSY` rather than `IDLE`
    pub busy: bool,
    /// Highest-priority warning flag, `None` for `--`
    pub warning: Option<String>,
    /// Remaining fields, space-joined
    pub data: String,
}

impl ZaberReply {
    /// Fault flags (`F*`) mean the last motion was stopped abnormally.
    pub fn has_fault(&self) -> bool {
        self.warning.as_deref().is_some_and(|w| w.starts_with('F'))
    }
}

/// Parse a reply line such as `@01 1 OK IDLE -- 12345`.
pub fn parse_reply(line: &str) -> TransportResult<ZaberReply> {
    // Strip an optional `:XX` checksum suffix
    let body = match line.rfind(':') {
        Some(idx) if line.len() - idx == 3 => &line[..idx],
        _ => line,
    };

    let mut fields = body.split_whitespace();
    let malformed = || TransportError::Communication(format!("Malformed Zaber reply: '{}'", line));

    let device = fields
        .next()
        .and_then(|f| f.strip_prefix('@'))
        .and_then(|f| f.parse::<u8>().ok())
        .ok_or_else(malformed)?;
    let axis = fields
        .next()
        .and_then(|f| f.parse::<u8>().ok())
        .ok_or_else(malformed)?;
    let accepted = match fields.next() {
        Some("OK") => true,
        Some("RJ") => false,
        _ => return Err(malformed()),
    };
    let busy = match fields.next() {
        Some("BUSY") => true,
        Some("IDLE") => false,
        _ => return Err(malformed()),
    };
    let warning = match fields.next() {
        Some("--") => None,
        Some(flag) => Some(flag.to_string()),
        None => return Err(malformed()),
    };
    let data = fields.collect::<Vec<_>>().join(" ");

    Ok(ZaberReply {
        device,
        axis,
        accepted,
        busy,
        warning,
        data,
    })
}

/// Millimetres to whole microsteps.
pub fn mm_to_steps(mm: f64, microstep_mm: f64) -> i64 {
    (mm / microstep_mm).round() as i64
}

/// Velocity in mm/s to the controller's velocity data units.
pub fn velocity_to_data(velocity_mm_s: f64, microstep_mm: f64) -> i64 {
    (velocity_mm_s / microstep_mm * VELOCITY_SCALE).round() as i64
}

fn is_reply_line(line: &str) -> bool {
    line.starts_with('@')
}

/// Transport for one axis of a Zaber controller on a serial port.
pub struct ZaberAsciiTransport {
    adapter: SerialAdapter,
    device: u8,
    axis: u8,
    microstep_mm: f64,
    idle_poll_interval: Duration,
    motion_timeout: Duration,
}

impl ZaberAsciiTransport {
    /// Open `port_name` and address the device/axis from `settings`.
    ///
    /// # Errors
    /// Returns `TransportError::Communication` if the port cannot be opened.
    pub async fn open(port_name: &str, settings: &SerialSettings) -> TransportResult<Self> {
        let mut adapter = SerialAdapter::new(port_name, settings.baud_rate)
            .with_timeout(settings.timeout())
            .with_line_terminator("\n")
            .with_response_delimiter('\n');
        adapter.connect().await?;

        Ok(Self {
            adapter,
            device: settings.device_address,
            axis: settings.axis_number,
            microstep_mm: settings.microstep_size_um / 1000.0,
            idle_poll_interval: settings.idle_poll_interval(),
            motion_timeout: settings.motion_timeout(),
        })
    }

    fn mm_to_steps(&self, mm: f64) -> i64 {
        mm_to_steps(mm, self.microstep_mm)
    }

    fn steps_to_mm(&self, steps: f64) -> f64 {
        steps * self.microstep_mm
    }

    fn velocity_data(&self, velocity_mm_s: f64) -> i64 {
        velocity_to_data(velocity_mm_s, self.microstep_mm)
    }

    /// Send `body` to `axis` (0 = device scope) and parse the reply.
    async fn command_on(&self, axis: u8, body: &str) -> TransportResult<ZaberReply> {
        let line = if body.is_empty() {
            format!("/{} {}", self.device, axis)
        } else {
            format!("/{} {} {}", self.device, axis, body)
        };
        let raw = self.adapter.query_matching(&line, is_reply_line).await?;
        let reply = parse_reply(&raw)?;

        if !reply.accepted {
            return Err(TransportError::Rejected(format!("'{}': {}", body, reply.data)));
        }
        Ok(reply)
    }

    async fn command(&self, body: &str) -> TransportResult<ZaberReply> {
        self.command_on(self.axis, body).await
    }

    /// Device serial number (`get system.serial`).
    pub async fn serial_number(&self) -> TransportResult<u64> {
        let reply = self.command_on(0, "get system.serial").await?;
        reply
            .data
            .trim()
            .parse::<u64>()
            .map_err(|_| TransportError::Communication(format!("Bad serial number reply: '{}'", reply.data)))
    }

    /// Poll until the axis reports IDLE, then check for a fault flag.
    async fn wait_until_idle(&self) -> TransportResult<()> {
        let start = tokio::time::Instant::now();
        loop {
            let reply = self.command("").await?;
            if !reply.busy {
                if reply.has_fault() {
                    let flag = reply.warning.unwrap_or_default();
                    warn!(port = %self.adapter.port_name(), %flag, "motion stopped on fault");
                    self.command("warnings clear").await?;
                    return Err(TransportError::MovementFailed(flag));
                }
                return Ok(());
            }
            if start.elapsed() > self.motion_timeout {
                return Err(TransportError::Timeout(format!(
                    "axis idle after {:?}",
                    self.motion_timeout
                )));
            }
            tokio::time::sleep(self.idle_poll_interval).await;
        }
    }

    /// Issue a motion command, clearing stale warnings first so a fault seen
    /// afterwards belongs to this move.
    async fn motion(&self, body: &str, wait: bool) -> TransportResult<()> {
        if wait {
            self.command("warnings clear").await?;
        }
        self.command(body).await?;
        if wait {
            self.wait_until_idle().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AxisTransport for ZaberAsciiTransport {
    fn endpoint(&self) -> &str {
        self.adapter.port_name()
    }

    async fn move_absolute(&self, position_mm: f64, wait: bool) -> TransportResult<()> {
        let body = format!("move abs {}", self.mm_to_steps(position_mm));
        self.motion(&body, wait).await
    }

    async fn move_relative(&self, delta_mm: f64, wait: bool) -> TransportResult<()> {
        let body = format!("move rel {}", self.mm_to_steps(delta_mm));
        self.motion(&body, wait).await
    }

    async fn move_velocity(&self, velocity_mm_s: f64) -> TransportResult<()> {
        let data = self.velocity_data(velocity_mm_s);
        if data == 0 {
            self.command("stop").await?;
        } else {
            self.command(&format!("move vel {}", data)).await?;
        }
        Ok(())
    }

    async fn get_position(&self) -> TransportResult<f64> {
        let reply = self.command("get pos").await?;
        let steps = reply
            .data
            .trim()
            .parse::<f64>()
            .map_err(|_| TransportError::Communication(format!("Bad position reply: '{}'", reply.data)))?;
        Ok(self.steps_to_mm(steps))
    }

    async fn home(&self, wait: bool) -> TransportResult<()> {
        debug!(port = %self.adapter.port_name(), "homing");
        self.motion("home", wait).await
    }

    async fn set_position(&self, position_mm: f64) -> TransportResult<()> {
        self.command(&format!("set pos {}", self.mm_to_steps(position_mm)))
            .await
            .map(|_| ())
    }
}
