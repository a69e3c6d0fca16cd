//! Port model: a handler owns the 1-based port instances of one family
//! (motor or sensor) and swaps their drivers when they are configured.

pub mod motor;
pub mod sensor;

use log::{debug, info, warn};
use rrrc_protocol::records::{Record, SLOT_MOTOR_BASE, SLOT_SENSOR_BASE, port_slot};
use serde::{Deserialize, Serialize};

use crate::control::{Control, PortTypes};
use crate::error::{CommandError, PortError};
use crate::status::SlotData;
use crate::subscription::{SubscriptionId, Subscribers};

pub use motor::{DcMotorConfig, DcMotorController, MotorDriver, StopAction};
pub use sensor::{BumperSwitch, ColorSensor, Hcsr04, SensorDriver};

pub const NOT_CONFIGURED: &str = "NotConfigured";

/// Driver selection for one port: a registered driver name plus its
/// driver-specific settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub driver: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl DriverConfig {
    pub fn new(driver: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            driver: driver.into(),
            config,
        }
    }

    pub fn not_configured() -> Self {
        Self::new(NOT_CONFIGURED, serde_json::Value::Null)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortFamily {
    Motor,
    Sensor,
}

impl PortFamily {
    pub fn slot_base(self) -> u8 {
        match self {
            PortFamily::Motor => SLOT_MOTOR_BASE,
            PortFamily::Sensor => SLOT_SENSOR_BASE,
        }
    }

    fn amount(self, control: &Control) -> Result<u8, CommandError> {
        match self {
            PortFamily::Motor => control.motor_port_amount(),
            PortFamily::Sensor => control.sensor_port_amount(),
        }
    }

    fn types(self, control: &Control) -> Result<PortTypes, CommandError> {
        match self {
            PortFamily::Motor => control.motor_port_types(),
            PortFamily::Sensor => control.sensor_port_types(),
        }
    }

    fn set_type(self, control: &Control, port: u8, type_id: u8) -> Result<(), CommandError> {
        match self {
            PortFamily::Motor => control.set_motor_port_type(port, type_id),
            PortFamily::Sensor => control.set_sensor_port_type(port, type_id),
        }
    }
}

/// What a driver needs to talk to its own port.
#[derive(Clone, Debug)]
pub struct PortRef {
    pub id: u8,
    pub control: Control,
}

pub trait PortDriver: Sized + Send {
    const FAMILY: PortFamily;

    fn not_configured(port: PortRef) -> Self;

    /// Build the driver named by `config.driver`. Must not touch the bus.
    fn create(port: PortRef, config: &DriverConfig) -> Result<Self, PortError>;

    fn driver_name(&self) -> &'static str;

    /// Runs after the MCU has accepted the port type.
    fn on_configured(&mut self) -> Result<(), PortError> {
        Ok(())
    }

    /// Runs before the driver is replaced.
    fn uninitialize(&mut self) {}

    fn update_status(&mut self, raw: &[u8]);
}

pub struct PortInstance<D> {
    id: u8,
    driver: D,
    config: DriverConfig,
    config_changed: Subscribers<Option<DriverConfig>>,
}

impl<D: PortDriver> PortInstance<D> {
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Called with `None` when the port goes unconfigured and with the new
    /// configuration once it is in effect.
    pub fn on_config_changed(
        &mut self,
        listener: impl FnMut(&Option<DriverConfig>) + Send + 'static,
    ) -> SubscriptionId {
        self.config_changed.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.config_changed.unsubscribe(id)
    }
}

pub struct PortHandler<D> {
    control: Control,
    types: PortTypes,
    ports: Vec<PortInstance<D>>,
}

impl<D: PortDriver> PortHandler<D> {
    /// Query the MCU for port count and supported types, then reset every
    /// port to "NotConfigured".
    pub fn discover(control: Control) -> Result<Self, PortError> {
        let amount = D::FAMILY.amount(&control)?;
        let types = D::FAMILY.types(&control)?;
        info!(
            "{:?} ports: {amount}, types: {:?}",
            D::FAMILY,
            types.keys().collect::<Vec<_>>()
        );
        Self::new(control, types, amount)
    }

    pub fn new(control: Control, types: PortTypes, amount: u8) -> Result<Self, PortError> {
        let ports = (1..=amount)
            .map(|id| PortInstance {
                id,
                driver: D::not_configured(PortRef {
                    id,
                    control: control.clone(),
                }),
                config: DriverConfig::not_configured(),
                config_changed: Subscribers::default(),
            })
            .collect();
        let handler = Self {
            control,
            types,
            ports,
        };
        for id in 1..=amount {
            handler.send_type(id, NOT_CONFIGURED)?;
        }
        Ok(handler)
    }

    pub fn port_count(&self) -> u8 {
        self.ports.len() as u8
    }

    pub fn supported_types(&self) -> &PortTypes {
        &self.types
    }

    pub fn ports(&self) -> impl Iterator<Item = &PortInstance<D>> {
        self.ports.iter()
    }

    pub fn port(&self, id: u8) -> Result<&PortInstance<D>, PortError> {
        id.checked_sub(1)
            .and_then(|i| self.ports.get(i as usize))
            .ok_or(PortError::NoSuchPort(id))
    }

    pub fn port_mut(&mut self, id: u8) -> Result<&mut PortInstance<D>, PortError> {
        id.checked_sub(1)
            .and_then(|i| self.ports.get_mut(i as usize))
            .ok_or(PortError::NoSuchPort(id))
    }

    fn type_id(&self, driver: &str) -> Result<u8, PortError> {
        self.types
            .get(driver)
            .copied()
            .ok_or_else(|| PortError::UnknownDriver(driver.to_string()))
    }

    fn send_type(&self, id: u8, driver: &str) -> Result<(), PortError> {
        // MCUs that do not list "NotConfigured" use type 0 for it.
        let type_id = match self.type_id(driver) {
            Err(_) if driver == NOT_CONFIGURED => 0,
            other => other?,
        };
        debug!("{:?} port {id}: type {driver} ({type_id})", D::FAMILY);
        D::FAMILY.set_type(&self.control, id, type_id)?;
        Ok(())
    }

    /// Swap the driver on port `id`. Unknown drivers and invalid settings
    /// are rejected before any bus traffic. If the MCU refuses the new type
    /// the port falls back to "NotConfigured".
    pub fn configure(&mut self, id: u8, config: &DriverConfig) -> Result<(), PortError> {
        if config.driver != NOT_CONFIGURED {
            self.type_id(&config.driver)?;
        }
        let control = self.control.clone();
        let driver = D::create(
            PortRef {
                id,
                control: control.clone(),
            },
            config,
        )?;

        let port = self.port_mut(id)?;
        port.config_changed.emit(&None);
        port.driver.uninitialize();
        port.driver = driver;
        port.config = DriverConfig::not_configured();

        let result = self.send_type(id, &config.driver).and_then(|()| {
            let port = self.port_mut(id)?;
            port.driver.on_configured()
        });
        let port = self.port_mut(id)?;
        match result {
            Ok(()) => {
                info!("{:?} port {id}: {}", D::FAMILY, config.driver);
                port.config = config.clone();
                port.config_changed.emit(&Some(config.clone()));
                Ok(())
            }
            Err(e) => {
                warn!("{:?} port {id}: configuring {} failed: {e}", D::FAMILY, config.driver);
                port.driver.uninitialize();
                port.driver = D::not_configured(PortRef { id, control });
                Err(e)
            }
        }
    }

    pub fn uninitialize(&mut self, id: u8) -> Result<(), PortError> {
        self.configure(id, &DriverConfig::not_configured())
    }

    /// Return every port to "NotConfigured".
    pub fn reset(&mut self) -> Result<(), PortError> {
        for id in 1..=self.port_count() {
            self.uninitialize(id)?;
        }
        Ok(())
    }

    /// Whether `slot` is the status slot of one of this handler's ports.
    pub fn owns(&self, slot: u8) -> bool {
        slot.checked_sub(D::FAMILY.slot_base())
            .is_some_and(|offset| usize::from(offset) < self.ports.len())
    }

    /// Route a status slot record to the driver of the port it belongs to.
    /// Returns `false` for slots outside this family.
    pub fn dispatch(&mut self, record: Record<'_>) -> bool {
        if !self.owns(record.id) {
            return false;
        }
        let offset = usize::from(record.id - D::FAMILY.slot_base());
        self.ports[offset].driver.update_status(record.data);
        true
    }

    /// Dispatch a batch of status slots; returns how many reached a driver.
    pub fn dispatch_slots(&mut self, slots: &[SlotData]) -> usize {
        slots
            .iter()
            .filter(|slot| self.dispatch(slot.record()))
            .count()
    }

    pub fn slot_of(&self, id: u8) -> Result<u8, PortError> {
        self.port(id)?;
        Ok(port_slot(D::FAMILY.slot_base(), id))
    }
}
