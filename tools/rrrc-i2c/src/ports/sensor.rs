use log::warn;
use rrrc_protocol::sensor::{self, ColorReading};

use super::{DriverConfig, NOT_CONFIGURED, PortDriver, PortFamily, PortRef};
use crate::error::PortError;
use crate::subscription::{SubscriptionId, Subscribers};

/// Last decoded reading of a sensor plus its change listeners.
///
/// An empty status record clears the reading; a record identical to the
/// previous one is ignored. Listeners only hear about actual changes.
pub struct SensorValue<T> {
    raw: Option<Vec<u8>>,
    value: Option<T>,
    changed: Subscribers<Option<T>>,
}

impl<T> Default for SensorValue<T> {
    fn default() -> Self {
        Self {
            raw: None,
            value: None,
            changed: Subscribers::default(),
        }
    }
}

impl<T: Clone + PartialEq> SensorValue<T> {
    pub fn get(&self) -> Option<T> {
        self.value.clone()
    }

    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&Option<T>) + Send + 'static,
    ) -> SubscriptionId {
        self.changed.subscribe(listener)
    }

    fn update(&mut self, raw: &[u8], convert: impl FnOnce(&[u8]) -> Option<T>) {
        if raw.is_empty() {
            self.raw = None;
            if self.value.take().is_some() {
                self.changed.emit(&None);
            }
            return;
        }
        if self.raw.as_deref() == Some(raw) {
            return;
        }
        self.raw = Some(raw.to_vec());
        let value = convert(raw);
        if value != self.value {
            self.value = value;
            self.changed.emit(&self.value);
        }
    }
}

pub struct NullSensor {
    port: u8,
}

pub struct BumperSwitch {
    port: u8,
    state: SensorValue<bool>,
}

impl BumperSwitch {
    pub const NAME: &'static str = "BumperSwitch";

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn value(&self) -> Option<bool> {
        self.state.get()
    }

    pub fn state_mut(&mut self) -> &mut SensorValue<bool> {
        &mut self.state
    }

    fn update(&mut self, raw: &[u8]) {
        let port = self.port;
        self.state.update(raw, |raw| {
            sensor::decode_bumper(raw)
                .map_err(|e| warn!("sensor port {port}: bad bumper record {raw:02x?}: {e:?}"))
                .ok()
        });
    }
}

/// HC-SR04 ultrasonic distance sensor. Readings are in centimetres; no
/// echo reads as no value.
pub struct Hcsr04 {
    port: u8,
    state: SensorValue<i32>,
}

impl Hcsr04 {
    pub const NAME: &'static str = "HC_SR04";

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn value(&self) -> Option<i32> {
        self.state.get()
    }

    /// Distance limited to the sensor's usable range.
    pub fn distance_cm(&self) -> Option<i32> {
        self.value().map(sensor::clamp_distance)
    }

    pub fn state_mut(&mut self) -> &mut SensorValue<i32> {
        &mut self.state
    }

    fn update(&mut self, raw: &[u8]) {
        let port = self.port;
        self.state.update(raw, |raw| {
            sensor::decode_distance(raw)
                .map_err(|e| warn!("sensor port {port}: bad distance record {raw:02x?}: {e:?}"))
                .ok()
                .flatten()
        });
    }
}

pub struct ColorSensor {
    port: u8,
    state: SensorValue<ColorReading>,
}

impl ColorSensor {
    pub const NAME: &'static str = "RGB";

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn value(&self) -> Option<ColorReading> {
        self.state.get()
    }

    pub fn state_mut(&mut self) -> &mut SensorValue<ColorReading> {
        &mut self.state
    }

    fn update(&mut self, raw: &[u8]) {
        self.state.update(raw, |raw| Some(sensor::decode_color(raw)));
    }
}

pub enum SensorDriver {
    NotConfigured(NullSensor),
    Bumper(BumperSwitch),
    Hcsr04(Hcsr04),
    Color(ColorSensor),
}

impl SensorDriver {
    pub fn port(&self) -> u8 {
        match self {
            SensorDriver::NotConfigured(s) => s.port,
            SensorDriver::Bumper(s) => s.port,
            SensorDriver::Hcsr04(s) => s.port,
            SensorDriver::Color(s) => s.port,
        }
    }

    /// Current reading as JSON, for reporting.
    pub fn value_json(&self) -> serde_json::Value {
        match self {
            SensorDriver::NotConfigured(_) => serde_json::Value::Null,
            SensorDriver::Bumper(s) => serde_json::json!(s.value()),
            SensorDriver::Hcsr04(s) => serde_json::json!(s.distance_cm()),
            SensorDriver::Color(s) => match s.value() {
                Some(c) => serde_json::json!({
                    "top": [c.top.r, c.top.g, c.top.b],
                    "right": [c.right.r, c.right.g, c.right.b],
                    "left": [c.left.r, c.left.g, c.left.b],
                    "middle": [c.middle.r, c.middle.g, c.middle.b],
                }),
                None => serde_json::Value::Null,
            },
        }
    }
}

impl PortDriver for SensorDriver {
    const FAMILY: PortFamily = PortFamily::Sensor;

    fn not_configured(port: PortRef) -> Self {
        SensorDriver::NotConfigured(NullSensor { port: port.id })
    }

    fn create(port: PortRef, config: &DriverConfig) -> Result<Self, PortError> {
        let id = port.id;
        Ok(match config.driver.as_str() {
            NOT_CONFIGURED => Self::not_configured(port),
            BumperSwitch::NAME => SensorDriver::Bumper(BumperSwitch {
                port: id,
                state: SensorValue::default(),
            }),
            Hcsr04::NAME => SensorDriver::Hcsr04(Hcsr04 {
                port: id,
                state: SensorValue::default(),
            }),
            ColorSensor::NAME => SensorDriver::Color(ColorSensor {
                port: id,
                state: SensorValue::default(),
            }),
            other => return Err(PortError::UnknownDriver(other.to_string())),
        })
    }

    fn driver_name(&self) -> &'static str {
        match self {
            SensorDriver::NotConfigured(_) => NOT_CONFIGURED,
            SensorDriver::Bumper(_) => BumperSwitch::NAME,
            SensorDriver::Hcsr04(_) => Hcsr04::NAME,
            SensorDriver::Color(_) => ColorSensor::NAME,
        }
    }

    fn update_status(&mut self, raw: &[u8]) {
        match self {
            SensorDriver::NotConfigured(_) => {}
            SensorDriver::Bumper(s) => s.update(raw),
            SensorDriver::Hcsr04(s) => s.update(raw),
            SensorDriver::Color(s) => s.update(raw),
        }
    }
}
