//! Slot monitoring session: configure ports, enable their status slots and
//! decode what the MCU reports. [`SlotMonitor::teardown`] undoes whatever
//! part of the setup went through, so callers run it on every exit path.

use log::{debug, warn};
use rrrc_protocol::records::{SLOT_MOTOR_BASE, SLOT_SENSOR_BASE};
use serde_json::{Value, json};

use crate::control::Control;
use crate::error::{CommandError, PortError};
use crate::ports::{DriverConfig, MotorDriver, PortHandler, SensorDriver};
use crate::status::{SlotData, StatusUpdater};

/// One slot record with the value its port driver decoded from it.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotEvent {
    pub slot: u8,
    pub data: Vec<u8>,
    /// `null` for slots no configured driver owns.
    pub value: Value,
}

pub struct SlotMonitor {
    control: Control,
    status: StatusUpdater,
    motors: Option<PortHandler<MotorDriver>>,
    sensors: Option<PortHandler<SensorDriver>>,
}

impl SlotMonitor {
    pub fn new(control: Control) -> Self {
        Self {
            status: StatusUpdater::new(control.clone()),
            control,
            motors: None,
            sensors: None,
        }
    }

    /// Ports are 1-based; `extra_slots` are enabled as-is.
    pub fn setup(
        &mut self,
        motor_ports: &[(u8, DriverConfig)],
        sensor_ports: &[(u8, DriverConfig)],
        extra_slots: &[u8],
    ) -> Result<(), PortError> {
        self.status.reset()?;

        if !motor_ports.is_empty() {
            let handler = self.motors.insert(PortHandler::discover(self.control.clone())?);
            for (port, config) in motor_ports {
                handler.configure(*port, config)?;
                self.status.enable(handler.slot_of(*port)?)?;
            }
        }
        if !sensor_ports.is_empty() {
            let handler = self.sensors.insert(PortHandler::discover(self.control.clone())?);
            for (port, config) in sensor_ports {
                handler.configure(*port, config)?;
                self.status.enable(handler.slot_of(*port)?)?;
            }
        }
        for slot in extra_slots {
            self.status.enable(*slot)?;
        }
        Ok(())
    }

    /// Read pending slots once and route each record to its driver.
    pub fn poll(&mut self) -> Result<Vec<SlotEvent>, CommandError> {
        let slots = self.status.read()?;
        let mut events = Vec::with_capacity(slots.len());
        for slot in slots {
            let value = self.decode(&slot);
            events.push(SlotEvent {
                slot: slot.slot,
                data: slot.data,
                value,
            });
        }
        Ok(events)
    }

    fn decode(&mut self, slot: &SlotData) -> Value {
        if let Some(handler) = self.motors.as_mut().filter(|h| h.owns(slot.slot)) {
            handler.dispatch(slot.record());
            let port = slot.slot - SLOT_MOTOR_BASE + 1;
            return match handler.port(port).ok().and_then(|p| p.driver().status()) {
                Some(s) => json!({
                    "port": port,
                    "state": format!("{:?}", s.state),
                    "power": s.power,
                    "position": s.position,
                    "speed": s.speed,
                }),
                None => Value::Null,
            };
        }
        if let Some(handler) = self.sensors.as_mut().filter(|h| h.owns(slot.slot)) {
            handler.dispatch(slot.record());
            let port = slot.slot - SLOT_SENSOR_BASE + 1;
            return match handler.port(port) {
                Ok(p) => json!({ "port": port, "value": p.driver().value_json() }),
                Err(_) => Value::Null,
            };
        }
        Value::Null
    }

    /// Disable every slot and return discovered ports to "NotConfigured".
    /// Failures are logged; teardown always tries every step.
    pub fn teardown(&mut self) {
        if let Err(e) = self.status.reset() {
            warn!("disabling slots: {e}");
        }
        if let Some(Err(e)) = self.motors.as_mut().map(PortHandler::reset) {
            warn!("releasing motor ports: {e}");
        }
        if let Some(Err(e)) = self.sensors.as_mut().map(PortHandler::reset) {
            warn!("releasing sensor ports: {e}");
        }
        debug!("monitor torn down");
    }
}
