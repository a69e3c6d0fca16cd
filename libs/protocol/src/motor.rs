//! Motor port payloads: control requests, controller configuration and the
//! periodic status record.

use heapless::Vec;

use crate::Error;

pub const TAG_POWER: u8 = 0;
pub const TAG_SPEED: u8 = 1;
pub const TAG_POSITION_ABSOLUTE: u8 = 2;
pub const TAG_POSITION_RELATIVE: u8 = 3;
pub const TAG_STOP_AND_HOLD: u8 = 18;

pub const MAX_CONTROL_LEN: usize = 13;
pub const CONFIG_LEN: usize = 50;
pub const STATUS_LEN: usize = 10;
pub const POWER_LIMIT: i32 = 100;

const LIMIT_KIND_POWER: u8 = 0;
const LIMIT_KIND_SPEED: u8 = 1;

/// Optional limits applied while driving towards a position goal.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum PositionLimit {
    #[default]
    None,
    Speed(f32),
    Power(f32),
    Both { speed: f32, power: f32 },
}

impl PositionLimit {
    pub fn new(speed: Option<f32>, power: Option<f32>) -> Self {
        match (speed, power) {
            (None, None) => PositionLimit::None,
            (Some(speed), None) => PositionLimit::Speed(speed),
            (None, Some(power)) => PositionLimit::Power(power),
            (Some(speed), Some(power)) => PositionLimit::Both { speed, power },
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MotorControl {
    Power(i32),
    Speed {
        speed: f32,
        power_limit: Option<f32>,
    },
    Position {
        position: i32,
        relative: bool,
        limit: PositionLimit,
    },
    StopAndHold,
}

impl MotorControl {
    /// Control body as sent after the port byte of SET_MOTOR_PORT_CONTROL.
    pub fn encode(&self) -> Result<Vec<u8, MAX_CONTROL_LEN>, Error> {
        let mut body = Vec::new();
        match *self {
            MotorControl::Power(power) => {
                let power = power.clamp(-POWER_LIMIT, POWER_LIMIT) as i8;
                put(&mut body, &[TAG_POWER, power as u8])?;
            }
            MotorControl::Speed { speed, power_limit } => {
                put(&mut body, &[TAG_SPEED])?;
                put(&mut body, &speed.to_le_bytes())?;
                if let Some(limit) = power_limit {
                    put(&mut body, &limit.to_le_bytes())?;
                }
            }
            MotorControl::Position {
                position,
                relative,
                limit,
            } => {
                let tag = if relative {
                    TAG_POSITION_RELATIVE
                } else {
                    TAG_POSITION_ABSOLUTE
                };
                put(&mut body, &[tag])?;
                put(&mut body, &position.to_le_bytes())?;
                match limit {
                    PositionLimit::None => {}
                    PositionLimit::Speed(speed) => {
                        put(&mut body, &[LIMIT_KIND_SPEED])?;
                        put(&mut body, &speed.to_le_bytes())?;
                    }
                    PositionLimit::Power(power) => {
                        put(&mut body, &[LIMIT_KIND_POWER])?;
                        put(&mut body, &power.to_le_bytes())?;
                    }
                    PositionLimit::Both { speed, power } => {
                        put(&mut body, &speed.to_le_bytes())?;
                        put(&mut body, &power.to_le_bytes())?;
                    }
                }
            }
            MotorControl::StopAndHold => put(&mut body, &[TAG_STOP_AND_HOLD, 0, 0])?,
        }
        Ok(body)
    }
}

fn put(body: &mut Vec<u8, MAX_CONTROL_LEN>, bytes: &[u8]) -> Result<(), Error> {
    body.extend_from_slice(bytes).map_err(|_| Error::BufferTooSmall)
}

/// PID gains and output limits of one cascaded controller stage.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct PidConfig {
    pub p: f32,
    pub i: f32,
    pub d: f32,
    pub lower: f32,
    pub upper: f32,
}

impl PidConfig {
    pub const fn from_array(v: [f32; 5]) -> Self {
        Self {
            p: v[0],
            i: v[1],
            d: v[2],
            lower: v[3],
            upper: v[4],
        }
    }

    fn values(&self) -> [f32; 5] {
        [self.p, self.i, self.d, self.lower, self.upper]
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct MotorConfig {
    pub encoder_resolution: i16,
    pub position: PidConfig,
    pub speed: PidConfig,
    pub deceleration_max: f32,
    pub acceleration_max: f32,
}

impl MotorConfig {
    /// Config bytes as sent after the port byte of SET_MOTOR_PORT_CONFIG.
    pub fn encode(&self) -> [u8; CONFIG_LEN] {
        let mut out = [0u8; CONFIG_LEN];
        out[..2].copy_from_slice(&self.encoder_resolution.to_le_bytes());
        let floats = self
            .position
            .values()
            .into_iter()
            .chain(self.speed.values())
            .chain([self.deceleration_max, self.acceleration_max]);
        for (slot, value) in out[2..].chunks_exact_mut(4).zip(floats) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MotorState {
    #[default]
    Normal,
    Blocked,
    GoalReached,
    Unknown(u8),
}

impl From<u8> for MotorState {
    fn from(value: u8) -> Self {
        match value {
            0 => MotorState::Normal,
            1 => MotorState::Blocked,
            2 => MotorState::GoalReached,
            other => MotorState::Unknown(other),
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct MotorStatus {
    pub state: MotorState,
    pub power: i8,
    pub position: i32,
    pub speed: f32,
}

impl MotorStatus {
    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        let raw: &[u8; STATUS_LEN] = raw.try_into().map_err(|_| Error::LengthMismatch)?;
        Ok(Self {
            state: MotorState::from(raw[0]),
            power: raw[1] as i8,
            position: i32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]),
            speed: f32::from_le_bytes([raw[6], raw[7], raw[8], raw[9]]),
        })
    }
}
