use log::{debug, warn};
use rrrc_protocol::commands;
use rrrc_protocol::motor::{
    MotorConfig, MotorControl, MotorState, MotorStatus, PidConfig, PositionLimit,
};
use serde::{Deserialize, Serialize};

use super::{DriverConfig, NOT_CONFIGURED, PortDriver, PortFamily, PortRef};
use crate::awaiter::{Awaiter, CancelReason};
use crate::error::{CommandError, PortError};
use crate::subscription::{SubscriptionId, Subscribers};

/// Settings of a `DcMotor` port, as carried in [`DriverConfig::config`].
/// Controller arrays are `[P, I, D, lower limit, upper limit]`; acceleration
/// limits are `[max deceleration, max acceleration]`. Missing fields take
/// the stock motor's values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DcMotorConfig {
    pub encoder_resolution: i16,
    pub position_controller: [f32; 5],
    pub speed_controller: [f32; 5],
    pub acceleration_limits: [f32; 2],
}

impl Default for DcMotorConfig {
    fn default() -> Self {
        Self {
            encoder_resolution: 3072,
            position_controller: [0.125, 0.0001, 0.0, -150.0, 150.0],
            speed_controller: [0.5, 0.3935, 0.0, -150.0, 150.0],
            acceleration_limits: [500.0, 500.0],
        }
    }
}

impl DcMotorConfig {
    /// Same motor mounted the other way round.
    pub fn reversed(mut self) -> Self {
        self.encoder_resolution = self.encoder_resolution.saturating_neg();
        self
    }

    pub fn to_wire(&self) -> MotorConfig {
        MotorConfig {
            encoder_resolution: self.encoder_resolution,
            position: PidConfig::from_array(self.position_controller),
            speed: PidConfig::from_array(self.speed_controller),
            deceleration_max: self.acceleration_limits[0],
            acceleration_max: self.acceleration_limits[1],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopAction {
    /// Actively hold the current position.
    Hold,
    /// Cut power and let the motor coast.
    Release,
}

fn send_control(port: &PortRef, control: MotorControl) -> Result<(), CommandError> {
    let body = control.encode().map_err(|error| CommandError::Protocol {
        cmd: commands::name(commands::SET_MOTOR_PORT_CONTROL),
        error,
    })?;
    port.control.set_motor_port_control(port.id, &body)
}

pub struct DcMotorController {
    port: PortRef,
    config: DcMotorConfig,
    status: MotorStatus,
    goal: Option<Awaiter>,
    changed: Subscribers<MotorStatus>,
}

impl DcMotorController {
    pub const NAME: &'static str = "DcMotor";

    pub fn new(port: PortRef, config: DcMotorConfig) -> Self {
        Self {
            port,
            config,
            status: MotorStatus::default(),
            goal: None,
            changed: Subscribers::default(),
        }
    }

    pub fn port(&self) -> u8 {
        self.port.id
    }

    pub fn config(&self) -> &DcMotorConfig {
        &self.config
    }

    pub fn status(&self) -> MotorStatus {
        self.status
    }

    pub fn power(&self) -> i8 {
        self.status.power
    }

    pub fn position(&self) -> i32 {
        self.status.position
    }

    pub fn speed(&self) -> f32 {
        self.status.speed
    }

    pub fn on_status(
        &mut self,
        listener: impl FnMut(&MotorStatus) + Send + 'static,
    ) -> SubscriptionId {
        self.changed.subscribe(listener)
    }

    fn cancel_goal(&mut self, reason: CancelReason) {
        if let Some(goal) = self.goal.take() {
            goal.cancel(reason);
        }
    }

    /// Drive with a raw duty cycle in percent, clamped to ±100.
    pub fn set_power(&mut self, power: i32) -> Result<(), CommandError> {
        self.cancel_goal(CancelReason::Superseded);
        send_control(&self.port, MotorControl::Power(power))
    }

    pub fn set_speed(&mut self, speed: f32, power_limit: Option<f32>) -> Result<(), CommandError> {
        self.cancel_goal(CancelReason::Superseded);
        send_control(&self.port, MotorControl::Speed { speed, power_limit })
    }

    /// Start a position goal. The returned handle finishes when the motor
    /// reports the goal reached and is cancelled if the motor blocks or a
    /// newer request replaces it; cancellation cuts the motor's power.
    pub fn set_position(
        &mut self,
        position: i32,
        relative: bool,
        speed_limit: Option<f32>,
        power_limit: Option<f32>,
    ) -> Result<Awaiter, CommandError> {
        self.cancel_goal(CancelReason::Superseded);

        let goal = Awaiter::new();
        let port = self.port.clone();
        goal.on_cancelled(move |reason| {
            debug!("motor port {}: goal cancelled ({reason:?})", port.id);
            if let Err(e) = send_control(&port, MotorControl::Power(0)) {
                warn!("motor port {}: failed to release after cancel: {e}", port.id);
            }
        });

        send_control(
            &self.port,
            MotorControl::Position {
                position,
                relative,
                limit: PositionLimit::new(speed_limit, power_limit),
            },
        )?;
        self.goal = Some(goal.clone());
        Ok(goal)
    }

    pub fn stop(&mut self, action: StopAction) -> Result<(), CommandError> {
        match action {
            StopAction::Hold => {
                self.cancel_goal(CancelReason::Superseded);
                send_control(&self.port, MotorControl::StopAndHold)
            }
            StopAction::Release => self.set_power(0),
        }
    }

    fn apply_status(&mut self, raw: &[u8]) {
        let status = match MotorStatus::decode(raw) {
            Ok(status) => status,
            Err(_) => {
                warn!("motor port {}: invalid status length {}", self.port.id, raw.len());
                return;
            }
        };
        self.status = status;
        match status.state {
            MotorState::GoalReached => {
                if let Some(goal) = self.goal.take() {
                    goal.finish();
                }
            }
            MotorState::Blocked => self.cancel_goal(CancelReason::Blocked),
            MotorState::Normal | MotorState::Unknown(_) => {}
        }
        self.changed.emit(&status);
    }
}

pub struct NullMotor {
    port: u8,
}

pub enum MotorDriver {
    NotConfigured(NullMotor),
    DcMotor(DcMotorController),
}

impl MotorDriver {
    pub fn port(&self) -> u8 {
        match self {
            MotorDriver::NotConfigured(m) => m.port,
            MotorDriver::DcMotor(m) => m.port(),
        }
    }

    pub fn as_dc_motor_mut(&mut self) -> Option<&mut DcMotorController> {
        match self {
            MotorDriver::DcMotor(m) => Some(m),
            MotorDriver::NotConfigured(_) => None,
        }
    }

    pub fn status(&self) -> Option<MotorStatus> {
        match self {
            MotorDriver::DcMotor(m) => Some(m.status()),
            MotorDriver::NotConfigured(_) => None,
        }
    }
}

impl PortDriver for MotorDriver {
    const FAMILY: PortFamily = PortFamily::Motor;

    fn not_configured(port: PortRef) -> Self {
        MotorDriver::NotConfigured(NullMotor { port: port.id })
    }

    fn create(port: PortRef, config: &DriverConfig) -> Result<Self, PortError> {
        match config.driver.as_str() {
            NOT_CONFIGURED => Ok(Self::not_configured(port)),
            DcMotorController::NAME => {
                let settings = if config.config.is_null() {
                    DcMotorConfig::default()
                } else {
                    serde_json::from_value(config.config.clone()).map_err(|source| {
                        PortError::InvalidConfig {
                            driver: config.driver.clone(),
                            source,
                        }
                    })?
                };
                Ok(MotorDriver::DcMotor(DcMotorController::new(port, settings)))
            }
            other => Err(PortError::UnknownDriver(other.to_string())),
        }
    }

    fn driver_name(&self) -> &'static str {
        match self {
            MotorDriver::NotConfigured(_) => NOT_CONFIGURED,
            MotorDriver::DcMotor(_) => DcMotorController::NAME,
        }
    }

    fn on_configured(&mut self) -> Result<(), PortError> {
        if let MotorDriver::DcMotor(m) = self {
            let raw = m.config.to_wire().encode();
            m.port.control.set_motor_port_config(m.port.id, &raw)?;
        }
        Ok(())
    }

    fn uninitialize(&mut self) {
        if let MotorDriver::DcMotor(m) = self {
            m.cancel_goal(CancelReason::Requested);
        }
    }

    fn update_status(&mut self, raw: &[u8]) {
        if let MotorDriver::DcMotor(m) = self {
            m.apply_status(raw);
        }
    }
}
