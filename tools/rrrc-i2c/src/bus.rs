//! Object-safe view of an I2C master, so the transport can own any
//! `embedded_hal::i2c::I2c` implementation behind one concrete type.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};

pub trait Bus: Send {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), ErrorKind>;
    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), ErrorKind>;
}

impl<T: I2c + Send> Bus for T {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), ErrorKind> {
        I2c::write(self, address, bytes).map_err(|e| e.kind())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), ErrorKind> {
        I2c::read(self, address, buf).map_err(|e| e.kind())
    }
}

#[cfg(target_os = "linux")]
pub mod linux {
    use std::fs::{File, OpenOptions};
    use std::path::{Path, PathBuf};

    use fs2::FileExt;
    use linux_embedded_hal::I2cdev;
    use log::debug;

    use crate::error::TransportError;

    /// Advisory per-bus lock. Held for as long as the device is open so two
    /// processes never interleave transactions on the same bus.
    #[derive(Debug)]
    pub struct BusLock {
        _file: File,
        path: PathBuf,
    }

    impl BusLock {
        pub fn acquire(lock_dir: &Path, bus: u8) -> Result<Self, TransportError> {
            let path = lock_dir.join(format!("rrrc-i2c-{bus}.lock"));
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|e| TransportError::Open {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            file.try_lock_exclusive().map_err(|_| TransportError::Locked { path: path.clone() })?;
            debug!("locked {}", path.display());
            Ok(Self { _file: file, path })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    pub fn open(bus: u8, lock_dir: &Path) -> Result<(I2cdev, BusLock), TransportError> {
        let lock = BusLock::acquire(lock_dir, bus)?;
        let path = format!("/dev/i2c-{bus}");
        let dev = I2cdev::new(&path).map_err(|e| TransportError::Open {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        debug!("opened {path}");
        Ok((dev, lock))
    }
}
