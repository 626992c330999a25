// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction related APDUs, used to hash and sign an untrusted transaction via the device.
//!
//! Signing proceeds by hashing the untrusted transaction inputs ([HashInputStartReq]),
//! outputs ([HashInputFinalizeReq]), then requesting a signature per input ([HashSignReq]).

mod hash_input;
pub use hash_input::*;

mod finalize;
pub use finalize::*;

mod sign;
pub use sign::*;

/// Default input sequence
pub const DEFAULT_SEQUENCE: u32 = 0xffff_ffff;

/// Input sequence signalling replace-by-fee
pub const RBF_SEQUENCE: u32 = DEFAULT_SEQUENCE - 2;

/// SIGHASH_ALL
pub const SIGHASH_ALL: u8 = 0x01;

/// Resolve the input sequence for an RBF setting
pub fn input_sequence(rbf: bool) -> u32 {
    match rbf {
        true => RBF_SEQUENCE,
        false => DEFAULT_SEQUENCE,
    }
}
