//! Host side of the RRRC I2C link: framed transport, typed command layer,
//! port drivers, status slots and firmware update.

pub mod awaiter;
pub mod bus;
pub mod control;
pub mod error;
pub mod monitor;
pub mod ports;
pub mod status;
pub mod subscription;
pub mod transport;
pub mod updater;

#[cfg(test)]
mod mock;

pub use control::Control;
pub use error::{CommandError, PortError, TransportError, UpdateError};
pub use transport::{RetryPolicy, Transport};
pub use updater::{UpdateReport, Updater};
