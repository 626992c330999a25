// Copyright (c) 2022-2023 The MobileCoin Foundation

use encdec::{DecodeOwned, Encode};

use super::SIGHASH_ALL;
use crate::{helpers::*, ApduError, ApduStatic, Instruction, BTC_APDU_CLA};

/// DER sequence tag, the device returns the signature with parity bits set in the first byte
pub const DER_SEQUENCE_TAG: u8 = 0x30;

/// Hash sign request APDU
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   PATH_LEN    |             PATH_INDEX_0 (BE)..               /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /   UV_LEN (0)  |                LOCK_TIME (BE)                 /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /   SIGHASH     |
/// +-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct HashSignReq {
    /// BIP32 path of the signing key
    pub path: Vec<u32>,
    /// Transaction lock time
    pub lock_time: u32,
    /// Signature hash type
    pub sighash: u8,
}

impl HashSignReq {
    /// Create a new [HashSignReq] APDU with SIGHASH_ALL
    pub fn new(path: &[u32], lock_time: u32) -> Self {
        Self {
            path: path.to_vec(),
            lock_time,
            sighash: SIGHASH_ALL,
        }
    }
}

impl ApduStatic for HashSignReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::HashSign as u8;
}

impl Encode for HashSignReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(path::enc_len(&self.path)? + 1 + 4 + 1)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        if buff.len() < self.encode_len()? {
            return Err(ApduError::InvalidLength);
        }

        let mut index = path::enc(&self.path, buff)?;

        // No user validation code
        buff[index] = 0x00;
        index += 1;

        index += write_u32_be(self.lock_time, &mut buff[index..])?;

        buff[index] = self.sighash;
        index += 1;

        Ok(index)
    }
}

/// Hash sign response, DER signature with the sighash type appended
#[derive(Clone, PartialEq, Debug)]
pub struct HashSignResp {
    pub signature: Vec<u8>,
}

impl DecodeOwned for HashSignResp {
    type Output = Self;

    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), ApduError> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }

        let mut signature = buff.to_vec();
        signature[0] = DER_SEQUENCE_TAG;

        Ok((Self { signature }, buff.len()))
    }
}
