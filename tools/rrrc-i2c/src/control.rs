//! Typed command layer. One method per catalog entry; every call is a single
//! transaction run while holding the transport lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rrrc_protocol::commands::{self, OperationMode, UpdateInit};
use rrrc_protocol::records::Records;

use crate::error::CommandError;
use crate::transport::Transport;

/// Driver name to MCU type id, as reported by the port type queries.
pub type PortTypes = BTreeMap<String, u8>;

#[derive(Clone, Debug)]
pub struct Control {
    transport: Arc<Mutex<Transport>>,
}

impl Control {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
        }
    }

    fn transport(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn address(&self) -> u8 {
        self.transport().address()
    }

    pub fn set_address(&self, address: u8) {
        self.transport().set_address(address);
    }

    /// Wait on the transport's delay source, e.g. while the MCU resets.
    pub fn pause(&self, duration: Duration) {
        self.transport().sleep(duration);
    }

    /// Send a command and return its response payload.
    pub fn send(&self, cmd: u8, payload: &[u8]) -> Result<Vec<u8>, CommandError> {
        match self.transport().send(cmd, payload, true)? {
            Some(response) => Ok(response.payload),
            None => Err(CommandError::NoResponse {
                cmd: commands::name(cmd),
            }),
        }
    }

    /// Send a command the MCU answers by resetting.
    pub fn send_no_reply(&self, cmd: u8, payload: &[u8]) -> Result<(), CommandError> {
        self.transport().send(cmd, payload, false)?;
        Ok(())
    }

    fn send_u8(&self, cmd: u8) -> Result<u8, CommandError> {
        let payload = self.send(cmd, &[])?;
        commands::decode_u8(&payload).map_err(|_| unexpected(cmd, &payload))
    }

    fn send_string(&self, cmd: u8) -> Result<String, CommandError> {
        let payload = self.send(cmd, &[])?;
        String::from_utf8(payload).map_err(|_| CommandError::InvalidString {
            cmd: commands::name(cmd),
        })
    }

    fn send_port_types(&self, cmd: u8) -> Result<PortTypes, CommandError> {
        let payload = self.send(cmd, &[])?;
        let mut types = PortTypes::new();
        for record in Records::new(&payload) {
            let record = record.map_err(|error| CommandError::Protocol {
                cmd: commands::name(cmd),
                error,
            })?;
            let name = commands::decode_str(record.data).map_err(|_| {
                CommandError::InvalidString {
                    cmd: commands::name(cmd),
                }
            })?;
            types.insert(name.to_string(), record.id);
        }
        Ok(types)
    }

    pub fn ping(&self) -> Result<(), CommandError> {
        self.send(commands::PING, &[]).map(drop)
    }

    pub fn read_hardware_version(&self) -> Result<String, CommandError> {
        self.send_string(commands::READ_HW_VERSION)
    }

    pub fn read_firmware_version(&self) -> Result<String, CommandError> {
        self.send_string(commands::READ_FW_VERSION)
    }

    pub fn set_master_status(&self, status: u8) -> Result<(), CommandError> {
        self.send(commands::SET_MASTER_STATUS, &[status]).map(drop)
    }

    pub fn set_bluetooth_status(&self, status: u8) -> Result<(), CommandError> {
        self.send(commands::SET_BLUETOOTH_STATUS, &[status]).map(drop)
    }

    pub fn operation_mode(&self) -> Result<OperationMode, CommandError> {
        let raw = self.send_u8(commands::GET_OPERATION_MODE)?;
        OperationMode::from_byte(raw).ok_or(CommandError::UnknownOperationMode(raw))
    }

    pub fn read_application_crc(&self) -> Result<u32, CommandError> {
        let payload = self.send(commands::READ_APP_CRC, &[])?;
        commands::decode_u32(&payload).map_err(|_| unexpected(commands::READ_APP_CRC, &payload))
    }

    pub fn update_init(&self, size: u32, crc: u32) -> Result<(), CommandError> {
        let init = UpdateInit { size, crc };
        self.send(commands::UPDATE_INIT, &init.encode()).map(drop)
    }

    pub fn update_write_chunk(&self, chunk: &[u8]) -> Result<(), CommandError> {
        self.send(commands::UPDATE_WRITE_CHUNK, chunk).map(drop)
    }

    pub fn run_application(&self) -> Result<(), CommandError> {
        self.send_no_reply(commands::RUN_APP, &[])
    }

    pub fn run_bootloader(&self) -> Result<(), CommandError> {
        self.send_no_reply(commands::RUN_BOOTLOADER, &[])
    }

    pub fn motor_port_amount(&self) -> Result<u8, CommandError> {
        self.send_u8(commands::GET_MOTOR_PORT_AMOUNT)
    }

    pub fn motor_port_types(&self) -> Result<PortTypes, CommandError> {
        self.send_port_types(commands::GET_MOTOR_PORT_TYPES)
    }

    pub fn set_motor_port_type(&self, port: u8, type_id: u8) -> Result<(), CommandError> {
        self.send(commands::SET_MOTOR_PORT_TYPE, &[port, type_id]).map(drop)
    }

    pub fn set_motor_port_config(&self, port: u8, config: &[u8]) -> Result<(), CommandError> {
        self.send(commands::SET_MOTOR_PORT_CONFIG, &prefixed(port, config)).map(drop)
    }

    pub fn set_motor_port_control(&self, port: u8, body: &[u8]) -> Result<(), CommandError> {
        self.send(commands::SET_MOTOR_PORT_CONTROL, &prefixed(port, body)).map(drop)
    }

    pub fn sensor_port_amount(&self) -> Result<u8, CommandError> {
        self.send_u8(commands::GET_SENSOR_PORT_AMOUNT)
    }

    pub fn sensor_port_types(&self) -> Result<PortTypes, CommandError> {
        self.send_port_types(commands::GET_SENSOR_PORT_TYPES)
    }

    pub fn set_sensor_port_type(&self, port: u8, type_id: u8) -> Result<(), CommandError> {
        self.send(commands::SET_SENSOR_PORT_TYPE, &[port, type_id]).map(drop)
    }

    pub fn reset_slots(&self) -> Result<(), CommandError> {
        self.send(commands::SLOT_RESET, &[]).map(drop)
    }

    pub fn control_slot(&self, slot: u8, enabled: bool) -> Result<(), CommandError> {
        self.send(commands::SLOT_CTRL, &[slot, enabled as u8]).map(drop)
    }

    /// Raw READ_SLOTS payload; see [`rrrc_protocol::records::Records`].
    pub fn read_slots(&self) -> Result<Vec<u8>, CommandError> {
        self.send(commands::READ_SLOTS, &[])
    }
}

fn prefixed(port: u8, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 1);
    payload.push(port);
    payload.extend_from_slice(body);
    payload
}

fn unexpected(cmd: u8, payload: &[u8]) -> CommandError {
    CommandError::UnexpectedPayload {
        cmd: commands::name(cmd),
        len: payload.len(),
    }
}
