use std::path::PathBuf;

use embedded_hal::i2c::ErrorKind;
use rrrc_protocol::{Error as FrameError, ResponseStatus};
use thiserror::Error;

use crate::awaiter::CancelReason;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i2c bus error: {0}")]
    Bus(ErrorKind),
    #[error("response failed integrity checks after {attempts} reads: {last:?}")]
    Integrity { attempts: u32, last: FrameError },
    #[error("command {cmd:#04x} rejected by MCU: {status}")]
    Status { cmd: u8, status: ResponseStatus },
    #[error("request cannot be framed: {0:?}")]
    Encode(FrameError),
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("{} is held by another process", .path.display())]
    Locked { path: PathBuf },
}

impl TransportError {
    /// Protocol status the MCU answered with, if the failure was a status.
    pub fn status(&self) -> Option<ResponseStatus> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{cmd} completed without a response")]
    NoResponse { cmd: &'static str },
    #[error("{cmd} returned an unexpected {len}-byte payload")]
    UnexpectedPayload { cmd: &'static str, len: usize },
    #[error("{cmd} returned a string that is not valid UTF-8")]
    InvalidString { cmd: &'static str },
    #[error("unknown operation mode {0:#04x}")]
    UnknownOperationMode(u8),
    #[error("malformed {cmd} payload: {error:?}")]
    Protocol {
        cmd: &'static str,
        error: FrameError,
    },
}

impl CommandError {
    pub fn status(&self) -> Option<ResponseStatus> {
        match self {
            CommandError::Transport(e) => e.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PortError {
    #[error("driver {0:?} is not supported on this port")]
    UnknownDriver(String),
    #[error("port {0} does not exist")]
    NoSuchPort(u8),
    #[error("invalid {driver} configuration: {source}")]
    InvalidConfig {
        driver: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("cannot determine operation mode")]
    Mode(#[source] CommandError),
    #[error("MCU did not enter the bootloader")]
    NotInBootloader,
    #[error("image of {0} bytes does not fit the update protocol")]
    ImageTooLarge(usize),
    #[error("update init rejected")]
    Init(#[source] CommandError),
    #[error("chunk at offset {offset} rejected")]
    Chunk {
        offset: usize,
        #[source]
        source: CommandError,
    },
    #[error("failed to start the application")]
    Run(#[source] CommandError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GoalError {
    #[error("goal cancelled ({0:?})")]
    Cancelled(CancelReason),
    #[error("motor blocked before reaching the goal")]
    Blocked,
    #[error("goal not reached in time")]
    TimedOut,
}
