// Copyright (c) 2022-2023 The MobileCoin Foundation

use encdec::Encode;

use crate::{helpers::*, ApduError, ApduStatic, Instruction, BTC_APDU_CLA};

/// Output data chunk size for finalize requests
pub const OUT_CHUNK_SIZE: usize = 50;

/// P1 for the change path upload
pub const P1_CHANGE_PATH: u8 = 0xff;

/// P1 for the final output chunk
pub const P1_LAST: u8 = 0x80;

/// P1 for intermediate output chunks
pub const P1_MORE: u8 = 0x00;

/// Hash input finalize (full) request APDU
///
/// Provides the change path (if any) followed by the serialised outputs
/// (`VARINT(OUTPUT_COUNT) | TX_OUT..`) in [OUT_CHUNK_SIZE] chunks.
#[derive(Clone, PartialEq, Debug)]
pub enum HashInputFinalizeReq {
    /// BIP32 path of the change output
    ChangePath(Vec<u32>),
    /// Output data chunk
    Outputs { last: bool, data: Vec<u8> },
}

impl HashInputFinalizeReq {
    /// Split serialised outputs into finalize chunks
    pub fn output_chunks(outputs: &[u8]) -> Vec<Self> {
        let n = outputs.chunks(OUT_CHUNK_SIZE).count();

        outputs
            .chunks(OUT_CHUNK_SIZE)
            .enumerate()
            .map(|(i, c)| Self::Outputs {
                last: i + 1 == n,
                data: c.to_vec(),
            })
            .collect()
    }
}

impl ApduStatic for HashInputFinalizeReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::HashInputFinalizeFull as u8;

    fn p1(&self) -> u8 {
        match self {
            Self::ChangePath(_) => P1_CHANGE_PATH,
            Self::Outputs { last: true, .. } => P1_LAST,
            Self::Outputs { last: false, .. } => P1_MORE,
        }
    }
}

impl Encode for HashInputFinalizeReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        match self {
            Self::ChangePath(p) => path::enc_len(p),
            Self::Outputs { data, .. } => Ok(data.len()),
        }
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        match self {
            Self::ChangePath(p) => path::enc(p, buff),
            Self::Outputs { data, .. } => write_slice(data, buff),
        }
    }
}
