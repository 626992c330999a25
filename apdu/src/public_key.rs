// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Wallet public key APDUs, for fetching BIP32 derived public keys

use encdec::{DecodeOwned, Encode};

use super::{ApduError, ApduStatic, Instruction, BTC_APDU_CLA};
use crate::helpers::*;

/// Uncompressed secp256k1 public key length
pub const UNCOMPRESSED_KEY_LEN: usize = 65;

/// BIP32 chain code length
pub const CHAIN_CODE_LEN: usize = 32;

/// Wallet public key request APDU.
///
/// Requests the public key, address and chain code for a BIP32 path.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   PATH_LEN    |              PATH_INDEX_0 (BE)..              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                    PATH_INDEX_N (BE, u32)                     /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct WalletPublicKeyReq {
    /// BIP32 path indices (hardened bit set where required)
    pub path: Vec<u32>,
}

impl WalletPublicKeyReq {
    /// Create a new [WalletPublicKeyReq] APDU
    pub fn new(path: &[u32]) -> Self {
        Self {
            path: path.to_vec(),
        }
    }
}

impl ApduStatic for WalletPublicKeyReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::GetWalletPublicKey as u8;
}

impl Encode for WalletPublicKeyReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        path::enc_len(&self.path)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        path::enc(&self.path, buff)
    }
}

/// Wallet public key response APDU
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    PK_LEN     |          PUBLIC_KEY (uncompressed, 65)        /
/// +-+-+-+-+-+-+-+-+                                               +
/// /                                                               /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   ADDR_LEN    |               ADDRESS (ASCII)                 /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                       CHAIN_CODE (32)                         /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct WalletPublicKeyResp {
    /// Public key as returned by the device (uncompressed)
    pub public_key: Vec<u8>,
    /// Device formatted address for the key
    pub address: String,
    /// BIP32 chain code
    pub chain_code: [u8; CHAIN_CODE_LEN],
}

impl DecodeOwned for WalletPublicKeyResp {
    type Output = Self;

    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), ApduError> {
        let mut index = 0;

        // Public key
        let pk_len = *buff.first().ok_or(ApduError::InvalidLength)? as usize;
        index += 1;
        if pk_len == 0 || buff.len() < index + pk_len {
            return Err(ApduError::InvalidLength);
        }
        let public_key = buff[index..][..pk_len].to_vec();
        index += pk_len;

        // Address
        let addr_len = *buff.get(index).ok_or(ApduError::InvalidLength)? as usize;
        index += 1;
        if buff.len() < index + addr_len {
            return Err(ApduError::InvalidLength);
        }
        let address = core::str::from_utf8(&buff[index..][..addr_len])
            .map_err(|_| ApduError::InvalidEncoding)?
            .to_string();
        index += addr_len;

        // Chain code
        if buff.len() < index + CHAIN_CODE_LEN {
            return Err(ApduError::InvalidLength);
        }
        let mut chain_code = [0u8; CHAIN_CODE_LEN];
        chain_code.copy_from_slice(&buff[index..][..CHAIN_CODE_LEN]);
        index += CHAIN_CODE_LEN;

        Ok((
            Self {
                public_key,
                address,
                chain_code,
            },
            index,
        ))
    }
}
