// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Trezor HID message framing
//!
//! ## Encoding (first report):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      '?'      |      '#'      |      '#'      |  MSG_TYPE..   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  ..MSG_TYPE   |                 LENGTH (BE)                   /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! /    LENGTH     |               DATA (55 bytes)                 /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Continuation reports are `'?'` followed by 63 bytes of data.

use byteorder::{BigEndian, ByteOrder};

use super::{MessageType, TrezorMessage};

/// HID report size
pub const REPORT_SIZE: usize = 64;

/// Report magic
pub const REPORT_MAGIC: u8 = b'?';

/// Message header magic (following the report magic in the first report)
pub const HEADER_MAGIC: [u8; 2] = [b'#', b'#'];

/// Length of the first report header
pub const HEADER_LEN: usize = 9;

/// Maximum accepted message length
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

/// A single Trezor HID report
pub type Report = [u8; REPORT_SIZE];

/// Trezor wire framing errors
#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum WireError {
    /// Report did not start with the expected magic
    #[error("Invalid report magic")]
    Magic,

    /// Report too short
    #[error("Truncated report ({0} bytes)")]
    Truncated(usize),

    /// Message exceeds accepted length
    #[error("Message too long ({0} bytes)")]
    TooLong(usize),

    /// Report after message completion
    #[error("Unexpected report after message completion")]
    Overrun,

    /// Message ended before the declared length
    #[error("Incomplete message")]
    Incomplete,

    /// Protobuf decoding failed
    #[error("Protobuf decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Message type did not match the expected type
    #[error("Unexpected message type {actual} (expected: {expected})")]
    UnexpectedType { expected: MessageType, actual: u16 },
}

/// Encode a message type and payload into HID reports
pub fn encode_reports(msg_type: u16, payload: &[u8]) -> Result<Vec<Report>, WireError> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(WireError::TooLong(payload.len()));
    }

    let mut reports = vec![];

    let mut r = [0u8; REPORT_SIZE];
    r[0] = REPORT_MAGIC;
    r[1..3].copy_from_slice(&HEADER_MAGIC);
    BigEndian::write_u16(&mut r[3..], msg_type);
    BigEndian::write_u32(&mut r[5..], payload.len() as u32);

    let n = payload.len().min(REPORT_SIZE - HEADER_LEN);
    r[HEADER_LEN..][..n].copy_from_slice(&payload[..n]);
    reports.push(r);

    for c in payload[n..].chunks(REPORT_SIZE - 1) {
        let mut r = [0u8; REPORT_SIZE];
        r[0] = REPORT_MAGIC;
        r[1..][..c.len()].copy_from_slice(c);
        reports.push(r);
    }

    Ok(reports)
}

/// Encode a typed message into HID reports
pub fn encode_message<M: TrezorMessage>(m: &M) -> Result<Vec<Report>, WireError> {
    encode_reports(M::TYPE as u16, &m.encode_to_vec())
}

/// Decode a typed message payload, checking the message type
pub fn decode_message<M: TrezorMessage>(msg_type: u16, payload: &[u8]) -> Result<M, WireError> {
    if msg_type != M::TYPE as u16 {
        return Err(WireError::UnexpectedType {
            expected: M::TYPE,
            actual: msg_type,
        });
    }

    let m = M::decode(payload)?;
    Ok(m)
}

/// Incremental message reader
#[derive(Clone, Debug, Default)]
pub struct MessageReader {
    header: Option<(u16, usize)>,
    data: Vec<u8>,
}

impl MessageReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a received report, returning `true` once the full message is available
    pub fn push(&mut self, report: &[u8]) -> Result<bool, WireError> {
        if self.is_complete() {
            return Err(WireError::Overrun);
        }

        if report.is_empty() {
            return Err(WireError::Truncated(0));
        }
        if report[0] != REPORT_MAGIC {
            return Err(WireError::Magic);
        }

        let d = match self.header {
            None => {
                if report.len() < HEADER_LEN {
                    return Err(WireError::Truncated(report.len()));
                }
                if report[1..3] != HEADER_MAGIC {
                    return Err(WireError::Magic);
                }

                let msg_type = BigEndian::read_u16(&report[3..]);
                let len = BigEndian::read_u32(&report[5..]) as usize;
                if len > MAX_MESSAGE_LEN {
                    return Err(WireError::TooLong(len));
                }

                self.header = Some((msg_type, len));
                self.data.reserve(len);

                &report[HEADER_LEN..]
            }
            Some(_) => &report[1..],
        };

        let n = d.len().min(self.remaining());
        self.data.extend_from_slice(&d[..n]);

        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.header, Some((_, n)) if self.data.len() >= n)
    }

    fn remaining(&self) -> usize {
        match self.header {
            Some((_, n)) => n.saturating_sub(self.data.len()),
            None => 0,
        }
    }

    /// Fetch the message type and payload
    pub fn finish(self) -> Result<(u16, Vec<u8>), WireError> {
        match (self.is_complete(), self.header) {
            (true, Some((msg_type, _))) => Ok((msg_type, self.data)),
            _ => Err(WireError::Incomplete),
        }
    }
}
