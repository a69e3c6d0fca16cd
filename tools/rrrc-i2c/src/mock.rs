//! In-memory I2C slave and delay used by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use rrrc_protocol::{MAX_RESPONSE_LEN, Op, ResponseStatus, decode_request, encode_response};

use crate::transport::{RetryPolicy, Transport};

/// What the simulated MCU answers to a START.
#[derive(Clone, Debug)]
pub enum McuReply {
    Ok(Vec<u8>),
    Status(ResponseStatus),
    /// Answer PENDING `polls` times before settling on `then`.
    Pending { polls: usize, then: Box<McuReply> },
    /// Reset without answering, like RUN_APP.
    Silent,
}

type Handler = Box<dyn FnMut(u8, &[u8]) -> McuReply + Send>;

#[derive(Default)]
pub struct MockState {
    pub writes: Vec<(u8, Vec<u8>)>,
    pub reads: Vec<(u8, usize)>,
    /// Raw read results served before the simulated MCU is consulted.
    pub script: VecDeque<Result<Vec<u8>, ErrorKind>>,
    pub fail_writes: usize,
    handler: Option<Handler>,
    current: Option<Vec<u8>>,
    pending: Option<(usize, McuReply)>,
}

impl MockState {
    /// Commands of START frames written so far, in order.
    pub fn started(&self) -> Vec<u8> {
        self.writes
            .iter()
            .filter(|(_, w)| w.first() == Some(&(Op::Start as u8)))
            .map(|(_, w)| w[1])
            .collect()
    }

    /// Payloads of START frames carrying `cmd`.
    pub fn payloads(&self, cmd: u8) -> Vec<Vec<u8>> {
        self.writes
            .iter()
            .filter(|(_, w)| w[0] == Op::Start as u8 && w[1] == cmd)
            .map(|(_, w)| w[6..].to_vec())
            .collect()
    }

    fn respond(&mut self, reply: McuReply) {
        self.current = match reply {
            McuReply::Ok(payload) => Some(frame(ResponseStatus::Ok, &payload)),
            McuReply::Status(status) => Some(frame(status, &[])),
            McuReply::Pending { polls: 0, then } => return self.respond(*then),
            McuReply::Pending { polls, then } => {
                self.pending = Some((polls - 1, *then));
                Some(frame(ResponseStatus::Pending, &[]))
            }
            McuReply::Silent => None,
        };
    }
}

pub fn frame(status: ResponseStatus, payload: &[u8]) -> Vec<u8> {
    let mut out = [0u8; MAX_RESPONSE_LEN];
    let len = encode_response(status, payload, &mut out).unwrap();
    out[..len].to_vec()
}

#[derive(Clone, Default)]
pub struct MockI2c {
    state: Arc<Mutex<MockState>>,
}

impl MockI2c {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mcu(handler: impl FnMut(u8, &[u8]) -> McuReply + Send + 'static) -> Self {
        let mock = Self::default();
        mock.state().handler = Some(Box::new(handler));
        mock
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn push_read(&self, bytes: &[u8]) {
        self.state().script.push_back(Ok(bytes.to_vec()));
    }

    pub fn push_read_error(&self, kind: ErrorKind) {
        self.state().script.push_back(Err(kind));
    }

    fn on_write(&self, address: u8, bytes: &[u8]) -> Result<(), ErrorKind> {
        let mut state = self.state();
        state.writes.push((address, bytes.to_vec()));
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        if state.handler.is_none() {
            return Ok(());
        }
        let (header, payload) = decode_request(bytes).unwrap();
        match header.op {
            Op::Start => {
                state.pending = None;
                let reply = (state.handler.as_mut().unwrap())(header.cmd, payload);
                state.respond(reply);
            }
            Op::GetResult => match state.pending.take() {
                Some((0, then)) => state.respond(then),
                Some((polls, then)) => {
                    state.pending = Some((polls - 1, then));
                    state.current = Some(frame(ResponseStatus::Pending, &[]));
                }
                None => {}
            },
            Op::Restart | Op::Cancel => {}
        }
        Ok(())
    }

    fn on_read(&self, address: u8, buf: &mut [u8]) -> Result<(), ErrorKind> {
        let mut state = self.state();
        state.reads.push((address, buf.len()));
        let bytes = match state.script.pop_front() {
            Some(scripted) => scripted?,
            None => state
                .current
                .clone()
                .ok_or(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))?,
        };
        buf.fill(0);
        let n = buf.len().min(bytes.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(())
    }
}

impl ErrorType for MockI2c {
    type Error = ErrorKind;
}

impl I2c for MockI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        for op in operations {
            match op {
                Operation::Write(bytes) => self.on_write(address, bytes)?,
                Operation::Read(buf) => self.on_read(address, buf)?,
            }
        }
        Ok(())
    }
}

/// Delay that records requested waits in milliseconds instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingDelay {
    pub log: Arc<Mutex<Vec<u32>>>,
}

impl RecordingDelay {
    pub fn waits(&self) -> Vec<u32> {
        self.log.lock().unwrap().clone()
    }
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.log.lock().unwrap().push(ns / 1_000_000);
    }

    fn delay_us(&mut self, us: u32) {
        self.log.lock().unwrap().push(us / 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.log.lock().unwrap().push(ms);
    }
}

pub fn transport(bus: &MockI2c, delay: &RecordingDelay) -> Transport {
    Transport::new(bus.clone(), delay.clone(), rrrc_protocol::commands::APPLICATION_ADDRESS)
        .with_retry(RetryPolicy::default())
}
