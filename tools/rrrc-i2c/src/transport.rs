//! Request/response state machine on top of a [`Bus`].
//!
//! Every command is one START write followed by header reads. The MCU
//! answers BUSY while it has not yet looked at the request and PENDING
//! while the command is still executing; PENDING is cleared by writing
//! GET_RESULT and reading again. Payloads are fetched with a second read
//! that repeats the header.

use std::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{debug, trace, warn};
use rrrc_protocol::{
    Error as FrameError, MAX_REQUEST_LEN, MAX_RESPONSE_LEN, Op, RESPONSE_HEADER_LEN,
    ResponseHeader, ResponseStatus, commands, decode_response, decode_response_header,
    encode_request,
};

use crate::bus::Bus;
use crate::error::TransportError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reads attempted before a corrupted response is given up on.
    pub attempts: u32,
    /// Wait between two reads of a corrupted response.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(100),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub header: ResponseHeader,
    pub payload: Vec<u8>,
}

pub struct Transport {
    bus: Box<dyn Bus>,
    delay: Box<dyn DelayNs + Send>,
    address: u8,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("address", &format_args!("{:#04x}", self.address))
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(
        bus: impl Bus + 'static,
        delay: impl DelayNs + Send + 'static,
        address: u8,
    ) -> Self {
        Self {
            bus: Box::new(bus),
            delay: Box::new(delay),
            address,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = RetryPolicy {
            attempts: retry.attempts.max(1),
            delay: retry.delay,
        };
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn set_address(&mut self, address: u8) {
        debug!("slave address {:#04x} -> {:#04x}", self.address, address);
        self.address = address;
    }

    pub fn sleep(&mut self, duration: Duration) {
        self.delay.delay_ms(u32::try_from(duration.as_millis()).unwrap_or(u32::MAX));
    }

    /// Run one command to completion.
    ///
    /// With `expect_response == false` the frame is written and nothing is
    /// read back; a failed write is tolerated because commands sent this way
    /// reset the MCU. Exhausted integrity retries surface as
    /// [`TransportError::Integrity`] and any error status as
    /// [`TransportError::Status`].
    pub fn send(
        &mut self,
        cmd: u8,
        payload: &[u8],
        expect_response: bool,
    ) -> Result<Option<Response>, TransportError> {
        if let Err(err) = self.write(Op::Start, cmd, payload) {
            if expect_response {
                return Err(err);
            }
            debug!("{}: write failed, no reply expected: {err}", commands::name(cmd));
            return Ok(None);
        }
        if !expect_response {
            return Ok(None);
        }

        let header = loop {
            let header = self.read_header()?;
            match header.status {
                ResponseStatus::Ok => break header,
                ResponseStatus::Busy => trace!("{}: busy", commands::name(cmd)),
                ResponseStatus::Pending => {
                    trace!("{}: pending", commands::name(cmd));
                    self.write(Op::GetResult, cmd, &[])?;
                }
                status => return Err(TransportError::Status { cmd, status }),
            }
        };

        let payload = if header.payload_len == 0 {
            Vec::new()
        } else {
            self.read_payload(&header)?
        };
        Ok(Some(Response { header, payload }))
    }

    fn write(&mut self, op: Op, cmd: u8, payload: &[u8]) -> Result<(), TransportError> {
        let mut frame = [0u8; MAX_REQUEST_LEN];
        let len = encode_request(op, cmd, payload, &mut frame).map_err(TransportError::Encode)?;
        debug!("-> {:#04x} {:02x?}", self.address, &frame[..len]);
        self.bus
            .write(self.address, &frame[..len])
            .map_err(TransportError::Bus)
    }

    fn read_header(&mut self) -> Result<ResponseHeader, TransportError> {
        let mut buf = [0u8; RESPONSE_HEADER_LEN];
        self.read_with_retry(&mut buf, decode_response_header)
    }

    fn read_payload(&mut self, first: &ResponseHeader) -> Result<Vec<u8>, TransportError> {
        let mut buf = [0u8; MAX_RESPONSE_LEN];
        let len = RESPONSE_HEADER_LEN + first.payload_len as usize;
        self.read_with_retry(&mut buf[..len], |raw| {
            let (header, payload) = decode_response(raw)?;
            if header != *first {
                return Err(FrameError::PayloadLength);
            }
            Ok(payload.to_vec())
        })
    }

    fn read_with_retry<T>(
        &mut self,
        buf: &mut [u8],
        decode: impl Fn(&[u8]) -> Result<T, FrameError>,
    ) -> Result<T, TransportError> {
        let mut attempt = 1;
        loop {
            self.bus
                .read(self.address, buf)
                .map_err(TransportError::Bus)?;
            debug!("<- {:#04x} {:02x?}", self.address, buf);

            let error = match decode(&buf[..]) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if attempt >= self.retry.attempts {
                warn!("giving up after {attempt} corrupted reads: {error:?}");
                return Err(TransportError::Integrity {
                    attempts: attempt,
                    last: error,
                });
            }
            debug!("corrupted response ({error:?}), retry {attempt}");
            attempt += 1;
            let delay = self.retry.delay;
            self.sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{McuReply, MockI2c, RecordingDelay, frame, transport};
    use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
    use rrrc_protocol::commands::{PING, READ_HW_VERSION, RUN_APP, SET_MOTOR_PORT_CONTROL};

    const PING_FRAME: [u8; 6] = [0x00, 0x00, 0x00, 0xFF, 0xFF, 0x57];
    const OK_EMPTY: [u8; 5] = [0x00, 0x00, 0xFF, 0xFF, 0x75];
    const PENDING_EMPTY: [u8; 5] = [0x02, 0x00, 0xFF, 0xFF, 0x73];
    const BUSY_EMPTY: [u8; 5] = [0x01, 0x00, 0xFF, 0xFF, 0x76];
    const ERR_COMMAND: [u8; 5] = [0x09, 0x00, 0xFF, 0xFF, 0x6E];

    #[test]
    fn ping_writes_frame_and_reads_header() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        bus.push_read(&OK_EMPTY);

        let resp = transport(&bus, &delay).send(PING, &[], true).unwrap().unwrap();
        assert_eq!(resp.header.status, ResponseStatus::Ok);
        assert!(resp.payload.is_empty());

        let state = bus.state();
        assert_eq!(state.writes, vec![(0x2D, PING_FRAME.to_vec())]);
        assert_eq!(state.reads, vec![(0x2D, 5)]);
    }

    #[test]
    fn hardware_version_is_fetched_with_second_read() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        let full = [0x00, 0x05, 0x6A, 0x1A, 0x18, b'2', b'.', b'0', b'.', b'0'];
        bus.push_read(&full[..5]);
        bus.push_read(&full);

        let resp = transport(&bus, &delay)
            .send(READ_HW_VERSION, &[], true)
            .unwrap()
            .unwrap();
        assert_eq!(resp.payload, b"2.0.0");
        assert_eq!(bus.state().reads, vec![(0x2D, 5), (0x2D, 10)]);
    }

    #[test]
    fn pending_is_polled_with_get_result() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        bus.push_read(&PENDING_EMPTY);
        bus.push_read(&OK_EMPTY);

        transport(&bus, &delay).send(0x02, &[], true).unwrap();
        let state = bus.state();
        assert_eq!(state.writes.len(), 2);
        assert_eq!(state.writes[0].1, vec![0x00, 0x02, 0x00, 0xFF, 0xFF, 0x51]);
        assert_eq!(state.writes[1].1, vec![0x02, 0x02, 0x00, 0xFF, 0xFF, 0x3D]);
        assert!(delay.waits().is_empty());
    }

    #[test]
    fn busy_is_read_again_without_new_write() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        bus.push_read(&BUSY_EMPTY);
        bus.push_read(&BUSY_EMPTY);
        bus.push_read(&OK_EMPTY);

        transport(&bus, &delay).send(PING, &[], true).unwrap();
        let state = bus.state();
        assert_eq!(state.writes.len(), 1);
        assert_eq!(state.reads.len(), 3);
    }

    #[test]
    fn corrupted_headers_are_retried() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        let mut bad = OK_EMPTY;
        bad[4] ^= 0x01;
        for _ in 0..3 {
            bus.push_read(&bad);
        }
        bus.push_read(&OK_EMPTY);

        let resp = transport(&bus, &delay).send(PING, &[], true).unwrap();
        assert!(resp.is_some());
        assert_eq!(bus.state().reads.len(), 4);
        assert_eq!(delay.waits(), vec![100, 100, 100]);
    }

    #[test]
    fn integrity_failure_after_retries_exhausted() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        for _ in 0..5 {
            bus.push_read(&[0x00, 0x00, 0xFF, 0xFF, 0x00]);
        }

        let err = transport(&bus, &delay).send(PING, &[], true).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Integrity {
                attempts: 5,
                last: FrameError::HeaderCrc
            }
        ));
        assert_eq!(bus.state().reads.len(), 5);
    }

    #[test]
    fn undefined_status_is_treated_as_corruption() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        let mut undefined = [0x80, 0x00, 0xFF, 0xFF, 0x00];
        undefined[4] = rrrc_protocol::crc7(&undefined[..4]);
        bus.push_read(&undefined);
        bus.push_read(&OK_EMPTY);

        assert!(transport(&bus, &delay).send(PING, &[], true).is_ok());
        assert_eq!(delay.waits(), vec![100]);
    }

    #[test]
    fn corrupted_payload_is_read_again() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        let good = frame(ResponseStatus::Ok, &[0x78, 0x56, 0x34, 0x12]);
        let mut bad = good.clone();
        bad[7] ^= 0x40;
        bus.push_read(&good[..5]);
        bus.push_read(&bad);
        bus.push_read(&good);

        let resp = transport(&bus, &delay).send(0x07, &[], true).unwrap().unwrap();
        assert_eq!(resp.payload, vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(bus.state().reads, vec![(0x2D, 5), (0x2D, 9), (0x2D, 9)]);
    }

    #[test]
    fn error_status_is_surfaced() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        bus.push_read(&ERR_COMMAND);

        let err = transport(&bus, &delay).send(PING, &[], true).unwrap_err();
        assert_eq!(err.status(), Some(ResponseStatus::ErrCommand));
        assert_eq!(bus.state().reads.len(), 1);
    }

    #[test]
    fn fire_and_forget_never_reads() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();

        let resp = transport(&bus, &delay).send(RUN_APP, &[], false).unwrap();
        assert!(resp.is_none());
        let state = bus.state();
        assert_eq!(state.writes.len(), 1);
        assert!(state.reads.is_empty());
    }

    #[test]
    fn write_failure_only_tolerated_without_reply() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        bus.state().fail_writes = 2;
        let mut t = transport(&bus, &delay);

        assert!(t.send(RUN_APP, &[], false).unwrap().is_none());
        assert!(matches!(
            t.send(PING, &[], true),
            Err(TransportError::Bus(ErrorKind::NoAcknowledge(_)))
        ));
    }

    #[test]
    fn read_error_is_bus_error() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        bus.push_read_error(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data));

        let err = transport(&bus, &delay).send(PING, &[], true).unwrap_err();
        assert!(matches!(err, TransportError::Bus(_)));
    }

    #[test]
    fn oversized_payload_never_reaches_bus() {
        let bus = MockI2c::new();
        let delay = RecordingDelay::default();
        let err = transport(&bus, &delay)
            .send(SET_MOTOR_PORT_CONTROL, &[0u8; 300], true)
            .unwrap_err();
        assert!(matches!(err, TransportError::Encode(FrameError::PayloadTooLarge)));
        assert!(bus.state().writes.is_empty());
    }

    #[test]
    fn simulated_mcu_pending_then_payload() {
        let bus = MockI2c::with_mcu(|cmd, _| match cmd {
            READ_HW_VERSION => McuReply::Pending {
                polls: 2,
                then: Box::new(McuReply::Ok(b"1.0.0".to_vec())),
            },
            _ => McuReply::Ok(Vec::new()),
        });
        let delay = RecordingDelay::default();

        let resp = transport(&bus, &delay)
            .send(READ_HW_VERSION, &[], true)
            .unwrap()
            .unwrap();
        assert_eq!(resp.payload, b"1.0.0");
        let state = bus.state();
        let ops: Vec<u8> = state.writes.iter().map(|(_, w)| w[0]).collect();
        assert_eq!(ops, vec![0, 2, 2]);
    }
}
