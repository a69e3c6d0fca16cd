//! `{id: u8, len: u8, data: [u8; len]}` record lists, as returned by
//! READ_SLOTS and by the port type queries.

use crate::Error;

pub const SLOT_MOTOR_BASE: u8 = 0;
pub const SLOT_SENSOR_BASE: u8 = 6;
pub const SLOT_BATTERY: u8 = 10;
pub const SLOT_ACCELEROMETER: u8 = 11;
pub const SLOT_GYRO: u8 = 12;
pub const SLOT_RESET: u8 = 13;
pub const SLOT_ORIENTATION: u8 = 14;
pub const SLOT_COUNT: u8 = 15;

/// Status slot of a 1-based port whose slots start at `base`.
pub const fn port_slot(base: u8, port: u8) -> u8 {
    base + port - 1
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record<'a> {
    pub id: u8,
    pub data: &'a [u8],
}

/// Iterator over a record list. A record that claims more bytes than remain
/// yields `Error::LengthMismatch` once, after which iteration stops.
#[derive(Clone, Debug)]
pub struct Records<'a> {
    rest: &'a [u8],
}

impl<'a> Records<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { rest: buf }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest;
        match rest {
            [] => None,
            [id, len, tail @ ..] if tail.len() >= *len as usize => {
                let (data, rest) = tail.split_at(*len as usize);
                self.rest = rest;
                Some(Ok(Record { id: *id, data }))
            }
            _ => {
                self.rest = &[];
                Some(Err(Error::LengthMismatch))
            }
        }
    }
}

/// Append one record to `out`, returning the bytes written.
pub fn encode_record(id: u8, data: &[u8], out: &mut [u8]) -> Result<usize, Error> {
    if data.len() > u8::MAX as usize {
        return Err(Error::PayloadTooLarge);
    }
    let total = 2 + data.len();
    if out.len() < total {
        return Err(Error::BufferTooSmall);
    }
    out[0] = id;
    out[1] = data.len() as u8;
    out[2..total].copy_from_slice(data);
    Ok(total)
}
