//! Motor registry.
//!
//! Builds one [`MotorDriver`] per configured descriptor and routes addressed
//! commands to it. Motors are addressed by `(type tag, index)`; an omitted type
//! tag means the first type declared in the configuration.
//!
//! ```text
//! MotorRegistry
//!   ├── "X_LSQ" ─► [RealMotorDriver #0, RealMotorDriver #1]
//!   └── "DUMMY" ─► [SimulatedMotorDriver #0]
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let config = MotorConfig::load_from(MotorConfig::default_path())?;
//! let registry = MotorRegistry::connect(&config, &settings, None).await?;
//! registry.calibrate_all(&CalibrationSettings::from(&settings)).await?;
//! registry.move_absolute(75.0, None, 0).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::calibration::{CalibrationController, CalibrationRecord, CalibrationSettings};
use crate::config::{validate_dense_indices, DriverKind, MotorConfig, MotorDescriptor, StageSettings};
use crate::error::{StageError, StageResult};
use crate::hardware::{LengthUnit, MotorDriver, SimulatedMotorDriver};

/// Builds the driver for one descriptor.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Construct and connect the driver described by `descriptor`.
    async fn build(&self, descriptor: &MotorDescriptor) -> StageResult<Arc<dyn MotorDriver>>;
}

/// Default factory: Zaber hardware located by serial number, or the
/// simulated stand-in.
#[derive(Debug, Clone, Default)]
pub struct HardwareFactory {
    settings: StageSettings,
    preferred_port: Option<String>,
}

impl HardwareFactory {
    /// Factory using `settings` for every motor.
    pub fn new(settings: StageSettings) -> Self {
        Self {
            settings,
            preferred_port: None,
        }
    }

    /// Probe `port` before enumerated endpoints.
    pub fn with_preferred_port(mut self, port: impl Into<String>) -> Self {
        self.preferred_port = Some(port.into());
        self
    }

    #[cfg(feature = "instrument_serial")]
    async fn build_zaber(&self, descriptor: &MotorDescriptor) -> StageResult<Arc<dyn MotorDriver>> {
        use crate::hardware::discovery::locate_transport;
        use crate::hardware::RealMotorDriver;

        let transport = locate_transport(
            descriptor,
            &self.settings.serial,
            self.preferred_port.as_deref(),
        )
        .await?;
        let driver = RealMotorDriver::new(descriptor.label(), Box::new(transport));
        info!(motor = %driver.label(), endpoint = %driver.endpoint(), "motor connected");
        Ok(Arc::new(driver))
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn build_zaber(&self, _descriptor: &MotorDescriptor) -> StageResult<Arc<dyn MotorDriver>> {
        Err(StageError::FeatureNotEnabled("instrument_serial".to_string()))
    }
}

#[async_trait]
impl DriverFactory for HardwareFactory {
    async fn build(&self, descriptor: &MotorDescriptor) -> StageResult<Arc<dyn MotorDriver>> {
        match descriptor.kind {
            DriverKind::ZaberLinear => self.build_zaber(descriptor).await,
            DriverKind::Simulated => Ok(Arc::new(
                SimulatedMotorDriver::new()
                    .with_label(descriptor.label())
                    .with_axis_length(self.settings.axis.length_mm),
            )),
        }
    }
}

struct RegisteredMotor {
    descriptor: MotorDescriptor,
    driver: Arc<dyn MotorDriver>,
}

struct MotorGroup {
    motor_type: String,
    motors: Vec<RegisteredMotor>,
}

/// Owns every configured driver for the registry's lifetime.
pub struct MotorRegistry {
    groups: Vec<MotorGroup>,
}

impl std::fmt::Debug for MotorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for group in &self.groups {
            map.entry(&group.motor_type, &group.motors.len());
        }
        map.finish()
    }
}

impl MotorRegistry {
    /// Build drivers for `descriptors` with `factory`.
    ///
    /// Types keep their first-appearance order; motors within a type are
    /// ordered by index, which must be dense from 0. Any construction failure
    /// aborts the whole build.
    pub async fn build(descriptors: &[MotorDescriptor], factory: &dyn DriverFactory) -> StageResult<Self> {
        if descriptors.is_empty() {
            return Err(StageError::EmptyRegistry);
        }

        let mut grouped: Vec<(String, Vec<&MotorDescriptor>)> = Vec::new();
        for descriptor in descriptors {
            match grouped.iter_mut().find(|(tag, _)| *tag == descriptor.motor_type) {
                Some((_, members)) => members.push(descriptor),
                None => grouped.push((descriptor.motor_type.clone(), vec![descriptor])),
            }
        }

        let mut groups = Vec::with_capacity(grouped.len());
        for (motor_type, mut members) in grouped {
            let indices: Vec<usize> = members.iter().map(|d| d.index).collect();
            validate_dense_indices(&motor_type, &indices)?;
            members.sort_by_key(|d| d.index);

            let mut motors = Vec::with_capacity(members.len());
            for descriptor in members {
                debug!(motor = %descriptor.label(), kind = descriptor.kind.as_str(), "building driver");
                let driver = factory.build(descriptor).await?;
                motors.push(RegisteredMotor {
                    descriptor: descriptor.clone(),
                    driver,
                });
            }
            info!(%motor_type, count = motors.len(), "motor type registered");
            groups.push(MotorGroup { motor_type, motors });
        }

        Ok(Self { groups })
    }

    /// Build every motor in `config` with the hardware factory.
    pub async fn connect(
        config: &MotorConfig,
        settings: &StageSettings,
        preferred_port: Option<&str>,
    ) -> StageResult<Self> {
        let mut factory = HardwareFactory::new(settings.clone());
        if let Some(port) = preferred_port {
            factory = factory.with_preferred_port(port);
        }
        Self::build(&config.descriptors()?, &factory).await
    }

    fn group(&self, motor_type: Option<&str>) -> StageResult<&MotorGroup> {
        match motor_type {
            None => self.groups.first().ok_or(StageError::EmptyRegistry),
            Some(tag) => self
                .groups
                .iter()
                .find(|g| g.motor_type == tag)
                .ok_or_else(|| StageError::UnknownMotorType(tag.to_string())),
        }
    }

    fn motor(&self, motor_type: Option<&str>, index: usize) -> StageResult<&RegisteredMotor> {
        let group = self.group(motor_type)?;
        group
            .motors
            .get(index)
            .ok_or_else(|| StageError::MotorIndexOutOfRange {
                motor_type: group.motor_type.clone(),
                index,
                count: group.motors.len(),
            })
    }

    /// Driver at `(motor_type, index)`.
    pub fn driver(&self, motor_type: Option<&str>, index: usize) -> StageResult<Arc<dyn MotorDriver>> {
        Ok(self.motor(motor_type, index)?.driver.clone())
    }

    /// Declared type tags, in declaration order.
    pub fn motor_types(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.motor_type.as_str()).collect()
    }

    /// Number of motors of `motor_type`.
    pub fn len(&self, motor_type: &str) -> StageResult<usize> {
        Ok(self.group(Some(motor_type))?.motors.len())
    }

    /// Move to `position` mm and wait for completion.
    pub async fn move_absolute(&self, position: f64, motor_type: Option<&str>, index: usize) -> StageResult<()> {
        self.motor(motor_type, index)?
            .driver
            .move_absolute(position, LengthUnit::Millimetres, true)
            .await
    }

    /// Move by `delta` mm and wait for completion.
    pub async fn move_relative(&self, delta: f64, motor_type: Option<&str>, index: usize) -> StageResult<()> {
        self.motor(motor_type, index)?
            .driver
            .move_relative(delta, LengthUnit::Millimetres, true)
            .await
    }

    /// Position in mm.
    pub async fn get_position(&self, motor_type: Option<&str>, index: usize) -> StageResult<f64> {
        self.motor(motor_type, index)?
            .driver
            .get_position(LengthUnit::Millimetres)
            .await
    }

    /// Non-raising home; the outcome is only logged.
    pub async fn home(&self, motor_type: Option<&str>, index: usize) -> StageResult<()> {
        self.motor(motor_type, index)?.driver.home(true).await;
        Ok(())
    }

    /// Calibrate every motor whose kind needs a reference after connecting.
    ///
    /// Stops at the first failure.
    pub async fn calibrate_all(&self, settings: &CalibrationSettings) -> StageResult<Vec<(String, CalibrationRecord)>> {
        let mut records = Vec::new();
        for motor in self.groups.iter().flat_map(|g| g.motors.iter()) {
            if !motor.descriptor.kind.requires_calibration() {
                continue;
            }
            let label = motor.descriptor.label();
            info!(motor = %label, "calibrating");
            let mut controller = CalibrationController::new(settings.clone());
            let record = controller.calibrate(motor.driver.as_ref()).await?;
            records.push((label, record));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> HardwareFactory {
        HardwareFactory::new(StageSettings::default())
    }

    #[tokio::test]
    async fn test_groups_follow_declaration_order() {
        let descriptors = vec![
            MotorDescriptor::simulated("B", 1),
            MotorDescriptor::simulated("A", 0),
            MotorDescriptor::simulated("B", 0),
        ];
        let registry = MotorRegistry::build(&descriptors, &factory()).await.unwrap();

        assert_eq!(registry.motor_types(), vec!["B", "A"]);
        assert_eq!(registry.len("B").unwrap(), 2);
        assert_eq!(registry.len("A").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_registry_rejected() {
        let err = MotorRegistry::build(&[], &factory()).await.unwrap_err();
        assert!(matches!(err, StageError::EmptyRegistry));
    }

    #[tokio::test]
    async fn test_index_gap_rejected() {
        let descriptors = vec![
            MotorDescriptor::simulated("A", 0),
            MotorDescriptor::simulated("A", 2),
        ];
        let err = MotorRegistry::build(&descriptors, &factory()).await.unwrap_err();
        assert!(matches!(err, StageError::Config(_)));
    }

    #[tokio::test]
    async fn test_lookup_errors() {
        let registry = MotorRegistry::build(&[MotorDescriptor::simulated("A", 0)], &factory())
            .await
            .unwrap();

        assert!(matches!(
            registry.move_absolute(1.0, Some("Z"), 0).await,
            Err(StageError::UnknownMotorType(tag)) if tag == "Z"
        ));
        assert!(matches!(
            registry.get_position(None, 1).await,
            Err(StageError::MotorIndexOutOfRange { index: 1, count: 1, .. })
        ));
    }

    #[cfg(not(feature = "instrument_serial"))]
    #[tokio::test]
    async fn test_hardware_requires_serial_feature() {
        let mut descriptor = MotorDescriptor::simulated("X_LSQ", 0);
        descriptor.kind = DriverKind::ZaberLinear;
        let err = factory().build(&descriptor).await.unwrap_err();
        assert!(matches!(err, StageError::FeatureNotEnabled(_)));
    }
}
