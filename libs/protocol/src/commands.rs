//! Command opcodes understood by the application and bootloader firmwares,
//! plus the fixed-shape payloads that go with them.

use crate::Error;

pub const PING: u8 = 0x00;
pub const READ_HW_VERSION: u8 = 0x01;
pub const READ_FW_VERSION: u8 = 0x02;
pub const SET_MASTER_STATUS: u8 = 0x04;
pub const SET_BLUETOOTH_STATUS: u8 = 0x05;
pub const GET_OPERATION_MODE: u8 = 0x06;
pub const READ_APP_CRC: u8 = 0x07;
pub const UPDATE_INIT: u8 = 0x08;
pub const UPDATE_WRITE_CHUNK: u8 = 0x09;
/// Starts the application. The MCU resets before answering.
pub const RUN_APP: u8 = 0x0A;
/// Reboots into the bootloader. The MCU resets before answering.
pub const RUN_BOOTLOADER: u8 = 0x0B;

pub const GET_MOTOR_PORT_AMOUNT: u8 = 0x10;
pub const GET_MOTOR_PORT_TYPES: u8 = 0x11;
pub const SET_MOTOR_PORT_TYPE: u8 = 0x12;
pub const SET_MOTOR_PORT_CONFIG: u8 = 0x13;
pub const SET_MOTOR_PORT_CONTROL: u8 = 0x14;

pub const GET_SENSOR_PORT_AMOUNT: u8 = 0x20;
pub const GET_SENSOR_PORT_TYPES: u8 = 0x21;
pub const SET_SENSOR_PORT_TYPE: u8 = 0x22;

pub const SLOT_RESET: u8 = 0x3A;
pub const SLOT_CTRL: u8 = 0x3B;
pub const READ_SLOTS: u8 = 0x3C;

/// Largest image slice carried by one UPDATE_WRITE_CHUNK.
pub const UPDATE_CHUNK_LEN: usize = 255;

/// I2C slave address of the application firmware.
pub const APPLICATION_ADDRESS: u8 = 0x2D;
/// I2C slave address of the bootloader firmware.
pub const BOOTLOADER_ADDRESS: u8 = 0x2B;

pub const fn name(cmd: u8) -> &'static str {
    match cmd {
        PING => "PING",
        READ_HW_VERSION => "READ_HW_VERSION",
        READ_FW_VERSION => "READ_FW_VERSION",
        SET_MASTER_STATUS => "SET_MASTER_STATUS",
        SET_BLUETOOTH_STATUS => "SET_BLUETOOTH_STATUS",
        GET_OPERATION_MODE => "GET_OPERATION_MODE",
        READ_APP_CRC => "READ_APP_CRC",
        UPDATE_INIT => "UPDATE_INIT",
        UPDATE_WRITE_CHUNK => "UPDATE_WRITE_CHUNK",
        RUN_APP => "RUN_APP",
        RUN_BOOTLOADER => "RUN_BOOTLOADER",
        GET_MOTOR_PORT_AMOUNT => "GET_MOTOR_PORT_AMOUNT",
        GET_MOTOR_PORT_TYPES => "GET_MOTOR_PORT_TYPES",
        SET_MOTOR_PORT_TYPE => "SET_MOTOR_PORT_TYPE",
        SET_MOTOR_PORT_CONFIG => "SET_MOTOR_PORT_CONFIG",
        SET_MOTOR_PORT_CONTROL => "SET_MOTOR_PORT_CONTROL",
        GET_SENSOR_PORT_AMOUNT => "GET_SENSOR_PORT_AMOUNT",
        GET_SENSOR_PORT_TYPES => "GET_SENSOR_PORT_TYPES",
        SET_SENSOR_PORT_TYPE => "SET_SENSOR_PORT_TYPE",
        SLOT_RESET => "SLOT_RESET",
        SLOT_CTRL => "SLOT_CTRL",
        READ_SLOTS => "READ_SLOTS",
        _ => "UNKNOWN",
    }
}

/// Which firmware currently answers on the bus.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationMode {
    Application,
    Bootloader,
}

impl OperationMode {
    pub const fn to_byte(self) -> u8 {
        match self {
            OperationMode::Application => 0xAA,
            OperationMode::Bootloader => 0xBB,
        }
    }

    pub const fn address(self) -> u8 {
        match self {
            OperationMode::Application => APPLICATION_ADDRESS,
            OperationMode::Bootloader => BOOTLOADER_ADDRESS,
        }
    }

    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0xAA => Some(OperationMode::Application),
            0xBB => Some(OperationMode::Bootloader),
            _ => None,
        }
    }
}

/// Payload of UPDATE_INIT: image size followed by its CRC-32.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateInit {
    pub size: u32,
    pub crc: u32,
}

impl UpdateInit {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..4].copy_from_slice(&self.size.to_le_bytes());
        out[4..].copy_from_slice(&self.crc.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let raw: [u8; Self::LEN] = buf.try_into().map_err(|_| Error::LengthMismatch)?;
        Ok(Self {
            size: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            crc: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
    }
}

pub fn decode_u8(payload: &[u8]) -> Result<u8, Error> {
    match payload {
        [value] => Ok(*value),
        _ => Err(Error::LengthMismatch),
    }
}

pub fn decode_u32(payload: &[u8]) -> Result<u32, Error> {
    let raw: [u8; 4] = payload.try_into().map_err(|_| Error::LengthMismatch)?;
    Ok(u32::from_le_bytes(raw))
}

pub fn decode_str(payload: &[u8]) -> Result<&str, Error> {
    core::str::from_utf8(payload).map_err(|_| Error::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_init_layout() {
        let init = UpdateInit {
            size: 300,
            crc: 0xDEAD_BEEF,
        };
        assert_eq!(
            init.encode(),
            [0x2C, 0x01, 0x00, 0x00, 0xEF, 0xBE, 0xAD, 0xDE]
        );
        assert_eq!(UpdateInit::decode(&init.encode()), Ok(init));
        assert_eq!(UpdateInit::decode(&[0; 7]), Err(Error::LengthMismatch));
    }

    #[test]
    fn operation_mode_bytes() {
        assert_eq!(OperationMode::from_byte(0xBB), Some(OperationMode::Bootloader));
        assert_eq!(OperationMode::from_byte(0xAA), Some(OperationMode::Application));
        assert_eq!(OperationMode::from_byte(0x00), None);
        assert_eq!(OperationMode::Bootloader.address(), 0x2B);
    }

    #[test]
    fn scalar_payloads() {
        assert_eq!(decode_u32(&[0x78, 0x56, 0x34, 0x12]), Ok(0x1234_5678));
        assert_eq!(decode_u32(&[0x78, 0x56]), Err(Error::LengthMismatch));
        assert_eq!(decode_u8(&[6]), Ok(6));
        assert_eq!(decode_u8(&[]), Err(Error::LengthMismatch));
        assert_eq!(decode_str(&[0xFF]), Err(Error::InvalidUtf8));
    }

    #[test]
    fn names_cover_catalog() {
        assert_eq!(name(READ_SLOTS), "READ_SLOTS");
        assert_eq!(name(0xEE), "UNKNOWN");
    }
}
