// Copyright (c) 2022-2023 The MobileCoin Foundation

//! APDU command encoding
//!
//! ## Encoding:
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      CLA      |      INS      |      P1       |      P2       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      LC       |           PAYLOAD (LC bytes, max 255)         /
//! +-+-+-+-+-+-+-+-+                                               +
//! /                                                               /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use encdec::Encode;

use crate::{ApduError, ApduStatic, MAX_APDU_PAYLOAD};

/// APDU command header length (CLA, INS, P1, P2, LC)
pub const APDU_HEADER_LEN: usize = 5;

/// APDU command header
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct ApduHeader {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}

impl ApduHeader {
    /// Fetch the header for a request object
    pub fn for_req<R: ApduStatic>(req: &R) -> Self {
        Self {
            cla: R::CLA,
            ins: R::INS,
            p1: req.p1(),
            p2: req.p2(),
        }
    }

    /// Parse a header from an encoded command
    pub fn parse(command: &[u8]) -> Result<(Self, &[u8]), ApduError> {
        if command.len() < APDU_HEADER_LEN {
            return Err(ApduError::InvalidLength);
        }

        let h = Self {
            cla: command[0],
            ins: command[1],
            p1: command[2],
            p2: command[3],
        };

        let n = command[4] as usize;
        if command.len() != APDU_HEADER_LEN + n {
            return Err(ApduError::InvalidLength);
        }

        Ok((h, &command[APDU_HEADER_LEN..]))
    }
}

/// Build a raw APDU command from header fields and payload
///
/// Payloads above [MAX_APDU_PAYLOAD] are rejected, callers must pre-chunk.
pub fn build_command(
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    payload: &[u8],
) -> Result<Vec<u8>, ApduError> {
    if payload.len() > MAX_APDU_PAYLOAD {
        return Err(ApduError::PayloadTooLarge(payload.len()));
    }

    let mut c = Vec::with_capacity(APDU_HEADER_LEN + payload.len());
    c.extend_from_slice(&[cla, ins, p1, p2, payload.len() as u8]);
    c.extend_from_slice(payload);

    Ok(c)
}

/// Encode a typed request to a raw APDU command
pub fn encode_command<R>(req: &R) -> Result<Vec<u8>, ApduError>
where
    R: ApduStatic + Encode<Error = ApduError>,
{
    let n = req.encode_len()?;
    if n > MAX_APDU_PAYLOAD {
        return Err(ApduError::PayloadTooLarge(n));
    }

    let mut buff = [0u8; MAX_APDU_PAYLOAD];
    let n = req.encode(&mut buff[..n])?;

    let h = ApduHeader::for_req(req);
    build_command(h.cla, h.ins, h.p1, h.p2, &buff[..n])
}
