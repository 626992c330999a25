// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol / APDU definitions for hardware signing device communication
//!
//! This module provides the wire level encodings used to talk to USB signing devices:
//!
//! - [framing] splits APDUs into 64-byte HID chunks (and reassembles responses) for Ledger devices
//! - [command] and [status] provide the ISO7816-style command header and status word handling
//! - [public_key], [trusted_input] and [tx] define the Ledger bitcoin application requests
//! - [trezor] provides the Trezor HID wire format and protobuf message definitions
//!
//! Ledger bitcoin app encodings are _mixed endian_, BIP32 path indices and the trusted input prevout
//! index are big-endian while transaction fields (version, sequence, values) follow the bitcoin
//! consensus little-endian encoding, so requests implement [encdec::Encode] manually.
//!

use core::fmt::Debug;

pub mod command;
pub mod framing;
pub mod prelude;
pub mod public_key;
pub mod status;
pub mod trezor;
pub mod trusted_input;
pub mod tx;

mod helpers;

/// Ledger bitcoin application APDU class
pub const BTC_APDU_CLA: u8 = 0xe0;

/// Maximum payload length for a single (short-form) APDU
pub const MAX_APDU_PAYLOAD: usize = 255;

/// Ledger bitcoin application instruction codes
#[derive(Copy, Clone, Debug, PartialEq, strum::Display)]
#[repr(u8)]
pub enum Instruction {
    /// Fetch a public key, address and chain code for a BIP32 path
    GetWalletPublicKey = 0x40,

    /// Stream a previous transaction to obtain a trusted input
    GetTrustedInput = 0x42,

    /// Start (or continue) hashing an untrusted transaction
    HashInputStart = 0x44,

    /// Sign the current input
    HashSign = 0x48,

    /// Provide transaction outputs (and change path) for hashing
    HashInputFinalizeFull = 0x4a,
}

/// Static APDU header information for a request type
///
/// Class and instruction are fixed per request type, parameters
/// may vary per instance (ie. first / continuation chunks).
pub trait ApduStatic {
    /// Class ID for APDU commands
    const CLA: u8;

    /// Instruction ID for APDU commands
    const INS: u8;

    /// Fetch P1 value (defaults to `0` if not extended)
    fn p1(&self) -> u8 {
        0
    }

    /// Fetch P2 value (defaults to `0` if not extended)
    fn p2(&self) -> u8 {
        0
    }
}

/// APDU encoding / decoding errors
#[derive(Copy, Clone, PartialEq, Debug, thiserror::Error)]
pub enum ApduError {
    /// Buffer too short for encoding / decoding
    #[error("Invalid buffer length")]
    InvalidLength,

    /// Malformed field encoding
    #[error("Invalid encoding")]
    InvalidEncoding,

    /// Payload exceeds the single APDU limit, callers must pre-chunk
    #[error("APDU payload too large ({0} bytes, max {MAX_APDU_PAYLOAD})")]
    PayloadTooLarge(usize),

    /// BIP32 path too long to encode
    #[error("Invalid derivation path length ({0})")]
    InvalidPath(usize),
}

impl From<encdec::Error> for ApduError {
    fn from(_: encdec::Error) -> Self {
        ApduError::InvalidLength
    }
}

impl From<bitcoin::consensus::encode::Error> for ApduError {
    fn from(_: bitcoin::consensus::encode::Error) -> Self {
        ApduError::InvalidEncoding
    }
}
