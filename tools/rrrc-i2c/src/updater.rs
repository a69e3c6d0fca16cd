//! Firmware update over the bootloader's UPDATE_INIT / UPDATE_WRITE_CHUNK /
//! RUN_APP sequence.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rrrc_protocol::Crc32;
use rrrc_protocol::commands::{
    APPLICATION_ADDRESS, BOOTLOADER_ADDRESS, OperationMode, UPDATE_CHUNK_LEN,
};
use serde::Serialize;

use crate::control::Control;
use crate::error::UpdateError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub size: u32,
    pub crc: u32,
    pub chunks: usize,
    #[serde(serialize_with = "serialize_elapsed")]
    pub elapsed: Duration,
}

fn serialize_elapsed<S: serde::Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    let millis = Duration::from_millis(elapsed.as_millis() as u64);
    s.collect_str(&humantime::format_duration(millis))
}

/// Size and CRC-32 of an image as announced in UPDATE_INIT.
pub fn image_checksum(image: &[u8]) -> Result<(u32, u32), UpdateError> {
    let size = u32::try_from(image.len()).map_err(|_| UpdateError::ImageTooLarge(image.len()))?;
    let mut crc = Crc32::new();
    crc.update(image);
    Ok((size, crc.finish()))
}

#[derive(Clone, Debug)]
pub struct Updater {
    control: Control,
    reset_wait: Duration,
    application_address: u8,
    bootloader_address: u8,
}

impl Updater {
    pub fn new(control: Control) -> Self {
        Self {
            control,
            reset_wait: Duration::from_millis(500),
            application_address: APPLICATION_ADDRESS,
            bootloader_address: BOOTLOADER_ADDRESS,
        }
    }

    /// Time the MCU gets to come back up after a firmware switch.
    pub fn with_reset_wait(mut self, wait: Duration) -> Self {
        self.reset_wait = wait;
        self
    }

    pub fn with_addresses(mut self, application: u8, bootloader: u8) -> Self {
        self.application_address = application;
        self.bootloader_address = bootloader;
        self
    }

    fn address_of(&self, mode: OperationMode) -> u8 {
        match mode {
            OperationMode::Application => self.application_address,
            OperationMode::Bootloader => self.bootloader_address,
        }
    }

    /// Ask the application address first, then the bootloader address. The
    /// transport is left pointing at whichever firmware answered.
    pub fn current_mode(&self) -> Result<OperationMode, UpdateError> {
        self.control.set_address(self.application_address);
        match self.control.operation_mode() {
            Ok(mode) => Ok(mode),
            Err(e) => {
                debug!("application address silent ({e}), trying bootloader");
                self.control.set_address(self.bootloader_address);
                self.control.operation_mode().map_err(UpdateError::Mode)
            }
        }
    }

    pub fn enter_bootloader(&self) -> Result<(), UpdateError> {
        match self.current_mode()? {
            OperationMode::Bootloader => {
                self.control.set_address(self.bootloader_address);
                Ok(())
            }
            OperationMode::Application => {
                info!("rebooting into bootloader");
                self.control.run_bootloader().map_err(UpdateError::Mode)?;
                self.control.pause(self.reset_wait);
                self.control.set_address(self.bootloader_address);
                match self.control.operation_mode().map_err(UpdateError::Mode)? {
                    OperationMode::Bootloader => Ok(()),
                    OperationMode::Application => Err(UpdateError::NotInBootloader),
                }
            }
        }
    }

    /// An application reporting a different firmware version needs an
    /// update; a bootloader without an application always does.
    pub fn is_update_needed(&self, expected_version: &str) -> Result<bool, UpdateError> {
        match self.current_mode()? {
            OperationMode::Bootloader => Ok(true),
            OperationMode::Application => {
                let version = self.control.read_firmware_version().map_err(UpdateError::Mode)?;
                debug!("firmware {version}, expected {expected_version}");
                Ok(version != expected_version)
            }
        }
    }

    /// Stream `image` as UPDATE_WRITE_CHUNK commands, stopping at the
    /// first rejected chunk.
    pub fn write_chunks(&self, image: &[u8]) -> Result<usize, UpdateError> {
        let mut chunks = 0;
        for (index, chunk) in image.chunks(UPDATE_CHUNK_LEN).enumerate() {
            let offset = index * UPDATE_CHUNK_LEN;
            self.control
                .update_write_chunk(chunk)
                .map_err(|source| UpdateError::Chunk { offset, source })?;
            chunks += 1;
        }
        Ok(chunks)
    }

    /// Program an image into a MCU that is already in bootloader mode and
    /// start it.
    pub fn program(&self, image: &[u8]) -> Result<UpdateReport, UpdateError> {
        let started = Instant::now();
        let (size, crc) = image_checksum(image)?;
        info!("update: {size} bytes, crc {crc:#010x}");

        self.control.update_init(size, crc).map_err(UpdateError::Init)?;
        let chunks = self.write_chunks(image).inspect_err(|e| warn!("update aborted: {e}"))?;
        self.control.run_application().map_err(UpdateError::Run)?;
        self.control.pause(self.reset_wait);
        self.control.set_address(self.address_of(OperationMode::Application));

        Ok(UpdateReport {
            size,
            crc,
            chunks,
            elapsed: started.elapsed(),
        })
    }

    /// Full update: switch to the bootloader if needed, program, run.
    pub fn update(&self, image: &[u8]) -> Result<UpdateReport, UpdateError> {
        self.enter_bootloader()?;
        self.program(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{McuReply, MockI2c, RecordingDelay, transport};
    use rrrc_protocol::ResponseStatus;
    use rrrc_protocol::commands::{
        GET_OPERATION_MODE, READ_FW_VERSION, RUN_APP, RUN_BOOTLOADER, UPDATE_INIT,
        UPDATE_WRITE_CHUNK,
    };
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn updater(bus: &MockI2c, delay: &RecordingDelay) -> Updater {
        Updater::new(Control::new(transport(bus, delay)))
    }

    fn image() -> Vec<u8> {
        (0..300u32).map(|i| (i * 7) as u8).collect()
    }

    #[test]
    fn checksum_of_check_string() {
        assert_eq!(image_checksum(b"123456789").unwrap(), (9, 0xCBF4_3926));
    }

    #[test]
    fn program_sends_init_chunks_then_run() {
        let bus = MockI2c::with_mcu(|cmd, _| match cmd {
            RUN_APP => McuReply::Silent,
            _ => McuReply::Ok(Vec::new()),
        });
        let delay = RecordingDelay::default();
        let image = image();
        let report = updater(&bus, &delay).program(&image).unwrap();

        let crc = rrrc_protocol::crc32_ieee(&image);
        let mut init = vec![0x2C, 0x01, 0x00, 0x00];
        init.extend_from_slice(&crc.to_le_bytes());

        let state = bus.state();
        assert_eq!(state.payloads(UPDATE_INIT), vec![init]);
        let chunks = state.payloads(UPDATE_WRITE_CHUNK);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![255, 45]);
        assert_eq!(chunks.concat(), image);
        assert_eq!(
            state.started(),
            vec![UPDATE_INIT, UPDATE_WRITE_CHUNK, UPDATE_WRITE_CHUNK, RUN_APP]
        );
        assert_eq!(report.chunks, 2);
        assert_eq!(report.size, 300);
        assert_eq!(delay.waits(), vec![500]);
    }

    #[test]
    fn rejected_chunk_aborts_before_run() {
        let writes = Arc::new(AtomicUsize::new(0));
        let w = writes.clone();
        let bus = MockI2c::with_mcu(move |cmd, _| match cmd {
            UPDATE_WRITE_CHUNK if w.fetch_add(1, Ordering::SeqCst) == 1 => {
                McuReply::Status(ResponseStatus::ErrCommand)
            }
            _ => McuReply::Ok(Vec::new()),
        });
        let delay = RecordingDelay::default();

        let err = updater(&bus, &delay).program(&image()).unwrap_err();
        match err {
            UpdateError::Chunk { offset, source } => {
                assert_eq!(offset, 255);
                assert_eq!(source.status(), Some(ResponseStatus::ErrCommand));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(!bus.state().started().contains(&RUN_APP));
    }

    #[test]
    fn rejected_init_aborts() {
        let bus = MockI2c::with_mcu(|cmd, _| match cmd {
            UPDATE_INIT => McuReply::Status(ResponseStatus::ErrCommand),
            _ => McuReply::Ok(Vec::new()),
        });
        let err = updater(&bus, &RecordingDelay::default())
            .program(&image())
            .unwrap_err();
        assert!(matches!(err, UpdateError::Init(_)));
        assert_eq!(bus.state().started(), vec![UPDATE_INIT]);
    }

    #[test]
    fn application_is_rebooted_into_bootloader() {
        let in_bootloader = Arc::new(AtomicBool::new(false));
        let flag = in_bootloader.clone();
        let bus = MockI2c::with_mcu(move |cmd, _| match cmd {
            GET_OPERATION_MODE if flag.load(Ordering::SeqCst) => McuReply::Ok(vec![0xBB]),
            GET_OPERATION_MODE => McuReply::Ok(vec![0xAA]),
            RUN_BOOTLOADER => {
                flag.store(true, Ordering::SeqCst);
                McuReply::Silent
            }
            _ => McuReply::Ok(Vec::new()),
        });
        let delay = RecordingDelay::default();

        updater(&bus, &delay).enter_bootloader().unwrap();

        let state = bus.state();
        assert_eq!(
            state.started(),
            vec![GET_OPERATION_MODE, RUN_BOOTLOADER, GET_OPERATION_MODE]
        );
        assert_eq!(state.writes.first().map(|w| w.0), Some(APPLICATION_ADDRESS));
        assert_eq!(state.writes.last().map(|w| w.0), Some(BOOTLOADER_ADDRESS));
        assert_eq!(delay.waits(), vec![500]);
    }

    #[test]
    fn bootloader_found_on_fallback_address() {
        let bus = MockI2c::with_mcu(|cmd, _| match cmd {
            GET_OPERATION_MODE => McuReply::Ok(vec![0xBB]),
            _ => McuReply::Ok(Vec::new()),
        });
        bus.state().fail_writes = 1;
        let updater = updater(&bus, &RecordingDelay::default());

        assert_eq!(updater.current_mode().unwrap(), OperationMode::Bootloader);
        assert!(updater.is_update_needed("1.0.0").unwrap());
        assert_eq!(bus.state().writes[1].0, BOOTLOADER_ADDRESS);
    }

    #[test]
    fn matching_firmware_needs_no_update() {
        let bus = MockI2c::with_mcu(|cmd, _| match cmd {
            GET_OPERATION_MODE => McuReply::Ok(vec![0xAA]),
            READ_FW_VERSION => McuReply::Ok(b"0.2.100".to_vec()),
            _ => McuReply::Ok(Vec::new()),
        });
        let updater = updater(&bus, &RecordingDelay::default());
        assert!(!updater.is_update_needed("0.2.100").unwrap());
        assert!(updater.is_update_needed("0.2.101").unwrap());
    }
}
