// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Ledger HID transport framing
//!
//! APDUs are split into 64-byte chunks for transmission over HID, responses
//! are reassembled from chunks until the declared length has been received.
//!
//! ## Encoding (first chunk):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         CHANNEL (BE)          |      TAG      |   SEQ (BE)..  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  ..SEQ (BE)   |         TOTAL_LEN (BE)        |    DATA..     /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               +
//! /                   DATA (57 bytes, zero padded)                /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Subsequent chunks omit `TOTAL_LEN` and carry 59 bytes of data.

use byteorder::{BigEndian, ByteOrder};
use log::trace;

/// HID channel identifier
pub const CHANNEL: u16 = 0x0101;

/// APDU tag
pub const TAG_APDU: u8 = 0x05;

/// HID chunk size
pub const CHUNK_SIZE: usize = 64;

/// HID report length for writes (report ID prefixed chunk)
pub const REPORT_SIZE: usize = CHUNK_SIZE + 1;

/// Offset of data in the first chunk
pub const FIRST_BLOCK_OFFSET: usize = 7;

/// Data capacity of the first chunk
pub const FIRST_BLOCK_SIZE: usize = CHUNK_SIZE - FIRST_BLOCK_OFFSET;

/// Offset of data in following chunks
pub const NEXT_BLOCK_OFFSET: usize = 5;

/// Data capacity of following chunks
pub const NEXT_BLOCK_SIZE: usize = CHUNK_SIZE - NEXT_BLOCK_OFFSET;

/// A single HID chunk
pub type Chunk = [u8; CHUNK_SIZE];

/// Framing errors, fatal for the current exchange
#[derive(Copy, Clone, PartialEq, Debug, thiserror::Error)]
pub enum FramingError {
    /// Chunk had an unexpected channel
    #[error("Unexpected HID channel 0x{0:04x}")]
    Channel(u16),

    /// Chunk had an unexpected tag
    #[error("Unexpected HID tag 0x{0:02x}")]
    Tag(u8),

    /// Chunk sequence number mismatch
    #[error("HID sequence mismatch (expected: {expected}, actual: {actual})")]
    Sequence { expected: u16, actual: u16 },

    /// Chunk too short to contain a header
    #[error("Truncated HID chunk ({0} bytes)")]
    Truncated(usize),

    /// Push after the response has completed
    #[error("Unexpected HID chunk after response completion")]
    Overrun,

    /// Response ended before the declared length was received
    #[error("Incomplete HID response")]
    Incomplete,

    /// Response too short to contain a status word
    #[error("HID response missing status word")]
    MissingStatus,

    /// Payload too long for a u16 length field
    #[error("HID payload too long ({0} bytes)")]
    TooLong(usize),
}

/// Split an APDU command into zero-padded HID chunks
pub fn frame(payload: &[u8]) -> Result<Vec<Chunk>, FramingError> {
    if payload.len() > u16::MAX as usize {
        return Err(FramingError::TooLong(payload.len()));
    }

    let mut chunks = vec![];
    let mut offset = 0;
    let mut seq = 0u16;

    loop {
        let mut c = [0u8; CHUNK_SIZE];

        BigEndian::write_u16(&mut c[0..], CHANNEL);
        c[2] = TAG_APDU;
        BigEndian::write_u16(&mut c[3..], seq);

        let (start, size) = match seq {
            0 => {
                BigEndian::write_u16(&mut c[5..], payload.len() as u16);
                (FIRST_BLOCK_OFFSET, FIRST_BLOCK_SIZE)
            }
            _ => (NEXT_BLOCK_OFFSET, NEXT_BLOCK_SIZE),
        };

        let n = (payload.len() - offset).min(size);
        c[start..][..n].copy_from_slice(&payload[offset..][..n]);

        offset += n;
        seq += 1;
        chunks.push(c);

        if offset >= payload.len() {
            break;
        }
    }

    trace!("framed {} bytes in {} chunks", payload.len(), chunks.len());

    Ok(chunks)
}

/// Prefix a chunk with the HID report ID (0x00) for writing
pub fn to_report(chunk: &Chunk) -> [u8; REPORT_SIZE] {
    let mut r = [0u8; REPORT_SIZE];
    r[1..].copy_from_slice(chunk);
    r
}

/// Incremental response reassembler
#[derive(Clone, Debug, Default)]
pub struct Reassembler {
    seq: u16,
    expected: Option<usize>,
    data: Vec<u8>,
}

impl Reassembler {
    /// Create a new reassembler expecting sequence number 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a received chunk, returning `true` once the declared length is available
    pub fn push(&mut self, chunk: &[u8]) -> Result<bool, FramingError> {
        if self.is_complete() {
            return Err(FramingError::Overrun);
        }

        let first = self.expected.is_none();
        let header_len = match first {
            true => FIRST_BLOCK_OFFSET,
            false => NEXT_BLOCK_OFFSET,
        };
        if chunk.len() < header_len {
            return Err(FramingError::Truncated(chunk.len()));
        }

        let channel = BigEndian::read_u16(&chunk[0..]);
        if channel != CHANNEL {
            return Err(FramingError::Channel(channel));
        }

        if chunk[2] != TAG_APDU {
            return Err(FramingError::Tag(chunk[2]));
        }

        let seq = BigEndian::read_u16(&chunk[3..]);
        if seq != self.seq {
            return Err(FramingError::Sequence {
                expected: self.seq,
                actual: seq,
            });
        }

        if first {
            let n = BigEndian::read_u16(&chunk[5..]) as usize;
            self.expected = Some(n);
            self.data.reserve(n);
        }

        let remaining = self.remaining();
        let d = &chunk[header_len..];
        let n = d.len().min(remaining);
        self.data.extend_from_slice(&d[..n]);

        self.seq = self.seq.wrapping_add(1);

        Ok(self.is_complete())
    }

    /// Check whether the full response has been received
    pub fn is_complete(&self) -> bool {
        matches!(self.expected, Some(n) if self.data.len() >= n)
    }

    fn remaining(&self) -> usize {
        match self.expected {
            Some(n) => n.saturating_sub(self.data.len()),
            None => 0,
        }
    }

    /// Split the reassembled response into payload and the trailing status word
    pub fn finish(self) -> Result<(Vec<u8>, u16), FramingError> {
        if !self.is_complete() {
            return Err(FramingError::Incomplete);
        }

        let mut data = self.data;

        if data.len() < 2 {
            return Err(FramingError::MissingStatus);
        }

        let sw = BigEndian::read_u16(&data[data.len() - 2..]);
        data.truncate(data.len() - 2);

        Ok((data, sw))
    }
}

/// Reassemble a complete response from received chunks
pub fn unframe<'a>(
    chunks: impl IntoIterator<Item = &'a [u8]>,
) -> Result<(Vec<u8>, u16), FramingError> {
    let mut r = Reassembler::new();

    for c in chunks {
        if r.push(c)? {
            break;
        }
    }

    r.finish()
}
