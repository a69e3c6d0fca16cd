#![no_std]

pub mod commands;
mod crc;
pub mod motor;
pub mod records;
pub mod sensor;

pub use crc::{Crc32, crc7, crc16_ccitt_false, crc32_ieee};

pub const REQUEST_HEADER_LEN: usize = 6;
pub const RESPONSE_HEADER_LEN: usize = 5;
pub const MAX_PAYLOAD_LEN: usize = 255;
pub const MAX_REQUEST_LEN: usize = REQUEST_HEADER_LEN + MAX_PAYLOAD_LEN;
pub const MAX_RESPONSE_LEN: usize = RESPONSE_HEADER_LEN + MAX_PAYLOAD_LEN;

/// CRC bytes carried in the header when the payload is empty.
pub const EMPTY_PAYLOAD_CRC: u16 = 0xFFFF;

/// Transaction phase selector carried in byte 0 of every request.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    Start = 0,
    Restart = 1,
    GetResult = 2,
    Cancel = 3,
}

impl TryFrom<u8> for Op {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Op::Start),
            1 => Ok(Op::Restart),
            2 => Ok(Op::GetResult),
            3 => Ok(Op::Cancel),
            other => Err(Error::UnknownOp(other)),
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseStatus {
    Ok = 0,
    Busy = 1,
    Pending = 2,
    ErrUnknownOp = 3,
    ErrInvalidOp = 4,
    ErrCommandIntegrity = 5,
    ErrPayloadIntegrity = 6,
    ErrPayloadLength = 7,
    ErrUnknownCommand = 8,
    ErrCommand = 9,
    ErrInternal = 10,
}

impl ResponseStatus {
    pub const fn name(self) -> &'static str {
        match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::Busy => "BUSY",
            ResponseStatus::Pending => "PENDING",
            ResponseStatus::ErrUnknownOp => "ERR_UNKNOWN_OP",
            ResponseStatus::ErrInvalidOp => "ERR_INVALID_OP",
            ResponseStatus::ErrCommandIntegrity => "ERR_CMD_INTEGRITY",
            ResponseStatus::ErrPayloadIntegrity => "ERR_PAYLOAD_INTEGRITY",
            ResponseStatus::ErrPayloadLength => "ERR_PAYLOAD_LENGTH",
            ResponseStatus::ErrUnknownCommand => "ERR_UNKNOWN_CMD",
            ResponseStatus::ErrCommand => "ERR_COMMAND",
            ResponseStatus::ErrInternal => "ERR_INTERNAL",
        }
    }

    /// Whether the status terminates the transaction with a protocol error.
    pub const fn is_error(self) -> bool {
        (self as u8) >= ResponseStatus::ErrUnknownOp as u8
    }
}

impl core::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for ResponseStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => ResponseStatus::Ok,
            1 => ResponseStatus::Busy,
            2 => ResponseStatus::Pending,
            3 => ResponseStatus::ErrUnknownOp,
            4 => ResponseStatus::ErrInvalidOp,
            5 => ResponseStatus::ErrCommandIntegrity,
            6 => ResponseStatus::ErrPayloadIntegrity,
            7 => ResponseStatus::ErrPayloadLength,
            8 => ResponseStatus::ErrUnknownCommand,
            9 => ResponseStatus::ErrCommand,
            10 => ResponseStatus::ErrInternal,
            other => return Err(Error::UnknownStatus(other)),
        })
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    pub op: Op,
    pub cmd: u8,
    pub payload_len: u8,
    pub payload_crc: u16,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status: ResponseStatus,
    pub payload_len: u8,
    pub payload_crc: u16,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    BufferTooSmall,
    PayloadTooLarge,
    LengthMismatch,
    HeaderCrc,
    PayloadLength,
    PayloadCrc,
    UnknownStatus(u8),
    UnknownOp(u8),
    InvalidUtf8,
}

impl Error {
    /// Framing faults that a re-read of the same response may clear.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Error::HeaderCrc
                | Error::PayloadLength
                | Error::PayloadCrc
                | Error::UnknownStatus(_)
                | Error::LengthMismatch
        )
    }
}

pub fn payload_crc(payload: &[u8]) -> u16 {
    if payload.is_empty() {
        EMPTY_PAYLOAD_CRC
    } else {
        crc16_ccitt_false(payload)
    }
}

/// Encode a request frame: five header bytes, the header CRC-7 and the
/// payload. Returns the number of bytes written to `out`.
pub fn encode_request(op: Op, cmd: u8, payload: &[u8], out: &mut [u8]) -> Result<usize, Error> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge);
    }
    let total = REQUEST_HEADER_LEN + payload.len();
    if out.len() < total {
        return Err(Error::BufferTooSmall);
    }

    let crc = payload_crc(payload).to_le_bytes();
    out[0] = op as u8;
    out[1] = cmd;
    out[2] = payload.len() as u8;
    out[3] = crc[0];
    out[4] = crc[1];
    out[5] = crc7(&out[..5]);
    out[REQUEST_HEADER_LEN..total].copy_from_slice(payload);
    Ok(total)
}

pub fn decode_request(buf: &[u8]) -> Result<(RequestHeader, &[u8]), Error> {
    if buf.len() < REQUEST_HEADER_LEN {
        return Err(Error::LengthMismatch);
    }
    if crc7(&buf[..5]) != buf[5] {
        return Err(Error::HeaderCrc);
    }

    let header = RequestHeader {
        op: Op::try_from(buf[0])?,
        cmd: buf[1],
        payload_len: buf[2],
        payload_crc: u16::from_le_bytes([buf[3], buf[4]]),
    };
    let payload = &buf[REQUEST_HEADER_LEN..];
    if payload.len() != header.payload_len as usize {
        return Err(Error::PayloadLength);
    }
    if payload_crc(payload) != header.payload_crc {
        return Err(Error::PayloadCrc);
    }
    Ok((header, payload))
}

/// Encode a response frame the way the MCU lays it out. Used by simulators
/// and tooling; the host never sends responses.
pub fn encode_response(
    status: ResponseStatus,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize, Error> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge);
    }
    let total = RESPONSE_HEADER_LEN + payload.len();
    if out.len() < total {
        return Err(Error::BufferTooSmall);
    }

    let crc = payload_crc(payload).to_le_bytes();
    out[0] = status as u8;
    out[1] = payload.len() as u8;
    out[2] = crc[0];
    out[3] = crc[1];
    out[4] = crc7(&out[..4]);
    out[RESPONSE_HEADER_LEN..total].copy_from_slice(payload);
    Ok(total)
}

/// Validate the 5-byte response header. Bytes past the header are ignored.
pub fn decode_response_header(buf: &[u8]) -> Result<ResponseHeader, Error> {
    if buf.len() < RESPONSE_HEADER_LEN {
        return Err(Error::LengthMismatch);
    }
    if crc7(&buf[..4]) != buf[4] {
        return Err(Error::HeaderCrc);
    }
    Ok(ResponseHeader {
        status: ResponseStatus::try_from(buf[0])?,
        payload_len: buf[1],
        payload_crc: u16::from_le_bytes([buf[2], buf[3]]),
    })
}

/// Validate a full response (header plus payload) read in one transfer.
pub fn decode_response(buf: &[u8]) -> Result<(ResponseHeader, &[u8]), Error> {
    let header = decode_response_header(buf)?;
    if header.payload_len == 0 {
        return Ok((header, &[]));
    }

    let payload = &buf[RESPONSE_HEADER_LEN..];
    if payload.len() != header.payload_len as usize {
        return Err(Error::PayloadLength);
    }
    if crc16_ccitt_false(payload) != header.payload_crc {
        return Err(Error::PayloadCrc);
    }
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_request_bytes() {
        let mut out = [0u8; MAX_REQUEST_LEN];
        let len = encode_request(Op::Start, commands::PING, &[], &mut out).unwrap();
        assert_eq!(&out[..len], &[0x00, 0x00, 0x00, 0xFF, 0xFF, 0x57]);
    }

    #[test]
    fn get_result_request_bytes() {
        let mut out = [0u8; MAX_REQUEST_LEN];
        let len = encode_request(Op::GetResult, commands::READ_FW_VERSION, &[], &mut out).unwrap();
        assert_eq!(&out[..len], &[0x02, 0x02, 0x00, 0xFF, 0xFF, b'=']);
    }

    #[test]
    fn request_roundtrip() {
        let payload = [0x2C, 0x01, 0x00, 0x00, 0xEF, 0xBE, 0xAD, 0xDE];
        let mut out = [0u8; MAX_REQUEST_LEN];
        let len = encode_request(Op::Start, commands::UPDATE_INIT, &payload, &mut out).unwrap();
        assert_eq!(len, REQUEST_HEADER_LEN + payload.len());

        let (header, decoded) = decode_request(&out[..len]).unwrap();
        assert_eq!(header.op, Op::Start);
        assert_eq!(header.cmd, commands::UPDATE_INIT);
        assert_eq!(header.payload_len, 8);
        assert_eq!(decoded, &payload);
    }

    #[test]
    fn oversized_payload_rejected() {
        let payload = [0u8; MAX_PAYLOAD_LEN + 1];
        let mut out = [0u8; MAX_REQUEST_LEN + 8];
        assert_eq!(
            encode_request(Op::Start, 0, &payload, &mut out),
            Err(Error::PayloadTooLarge)
        );
    }

    #[test]
    fn short_output_buffer_rejected() {
        let mut out = [0u8; 7];
        assert_eq!(
            encode_request(Op::Start, 0, &[1, 2], &mut out),
            Err(Error::BufferTooSmall)
        );
    }

    #[test]
    fn empty_ok_response_header() {
        let mut out = [0u8; MAX_RESPONSE_LEN];
        let len = encode_response(ResponseStatus::Ok, &[], &mut out).unwrap();
        assert_eq!(&out[..len], &[0x00, 0x00, 0xFF, 0xFF, 0x75]);

        let (header, payload) = decode_response(&out[..len]).unwrap();
        assert_eq!(header.status, ResponseStatus::Ok);
        assert!(payload.is_empty());
    }

    #[test]
    fn version_response_decodes() {
        let raw = [0x00, 0x05, 0x6A, 0x1A, 0x18, b'2', b'.', b'0', b'.', b'0'];
        let header = decode_response_header(&raw[..RESPONSE_HEADER_LEN]).unwrap();
        assert_eq!(header.payload_len, 5);
        let (_, payload) = decode_response(&raw).unwrap();
        assert_eq!(payload, b"2.0.0");
    }

    #[test]
    fn header_bit_flips_detected() {
        let mut frame = [0u8; MAX_RESPONSE_LEN];
        let len =
            encode_response(ResponseStatus::Ok, &[0x78, 0x56, 0x34, 0x12], &mut frame).unwrap();
        for byte in 0..RESPONSE_HEADER_LEN {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    decode_response(&corrupted[..len]).is_err(),
                    "flip byte {byte} bit {bit} undetected"
                );
            }
        }
    }

    #[test]
    fn payload_bit_flips_detected() {
        let payload = *b"hardware v1.2";
        let mut frame = [0u8; MAX_RESPONSE_LEN];
        let len = encode_response(ResponseStatus::Ok, &payload, &mut frame).unwrap();
        for byte in RESPONSE_HEADER_LEN..len {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert_eq!(decode_response(&corrupted[..len]), Err(Error::PayloadCrc));
            }
        }
    }

    #[test]
    fn request_bit_flips_detected() {
        let mut frame = [0u8; MAX_REQUEST_LEN];
        let len = encode_request(Op::Start, 0x14, &[1, 0, 50], &mut frame).unwrap();
        for byte in 0..len {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert!(decode_request(&corrupted[..len]).is_err());
            }
        }
    }

    #[test]
    fn truncated_payload_is_length_error() {
        let mut frame = [0u8; MAX_RESPONSE_LEN];
        let len = encode_response(ResponseStatus::Ok, &[1, 2, 3, 4], &mut frame).unwrap();
        assert_eq!(decode_response(&frame[..len - 1]), Err(Error::PayloadLength));
    }

    #[test]
    fn undefined_status_rejected() {
        let mut raw = [0x80, 0x00, 0xFF, 0xFF, 0x00];
        raw[4] = crc7(&raw[..4]);
        assert_eq!(decode_response_header(&raw), Err(Error::UnknownStatus(0x80)));
        assert!(Error::UnknownStatus(0x80).is_transient());
    }

    #[test]
    fn status_classification() {
        assert!(!ResponseStatus::Pending.is_error());
        assert!(ResponseStatus::ErrCommand.is_error());
        assert_eq!(ResponseStatus::ErrCommand.name(), "ERR_COMMAND");
        assert_eq!(ResponseStatus::try_from(9), Ok(ResponseStatus::ErrCommand));
    }
}
