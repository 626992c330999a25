// Copyright (c) 2022-2023 The MobileCoin Foundation

use encdec::Encode;

use crate::{helpers::*, ApduError, ApduStatic, Instruction, BTC_APDU_CLA};

/// Hash input start mode (P2)
#[derive(Copy, Clone, PartialEq, Debug, strum::Display)]
#[repr(u8)]
pub enum StartMode {
    /// Start a new legacy transaction
    NewLegacy = 0x00,
    /// Start a new segwit transaction
    NewSegwit = 0x02,
    /// Continue hashing the current transaction
    Continue = 0x80,
}

/// Input reference kind for hash input records
#[derive(Clone, PartialEq, Debug)]
pub enum InputRef {
    /// Device issued trusted input, length prefixed
    Trusted(Vec<u8>),
    /// Locally built segwit input (`txid | index | value`), not length prefixed
    Segwit(Vec<u8>),
}

impl InputRef {
    /// Input flag byte
    pub fn flag(&self) -> u8 {
        match self {
            InputRef::Trusted(_) => 0x01,
            InputRef::Segwit(_) => 0x02,
        }
    }

    fn enc_len(&self) -> usize {
        match self {
            InputRef::Trusted(t) => 2 + t.len(),
            InputRef::Segwit(t) => 1 + t.len(),
        }
    }

    fn enc(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        if buff.len() < self.enc_len() {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = self.flag();
        let n = match self {
            InputRef::Trusted(t) => {
                if t.len() > u8::MAX as usize {
                    return Err(ApduError::InvalidLength);
                }
                buff[1] = t.len() as u8;
                2 + write_slice(t, &mut buff[2..])?
            }
            InputRef::Segwit(t) => 1 + write_slice(t, &mut buff[1..])?,
        };

        Ok(n)
    }
}

/// Hash input start request APDU
///
/// Sent once to initialise hashing (`Init`) then once per transaction input (`Input`).
///
/// ## Encoding (init, P1=0x00):
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       TX_VERSION (LE)                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                   VARINT(INPUT_COUNT)                         /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// ## Encoding (input, P1=0x80):
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     FLAG      |  (TOKEN_LEN)  |            TOKEN              /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /  VARINT(SCRIPT_LEN) |  SCRIPT |          SEQUENCE (LE)        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub enum HashInputStartReq {
    Init {
        mode: StartMode,
        version: u32,
        input_count: u64,
    },
    Input {
        input: InputRef,
        script: Vec<u8>,
        sequence: u32,
    },
}

impl HashInputStartReq {
    /// Create a new init request
    pub fn init(mode: StartMode, version: u32, input_count: usize) -> Self {
        Self::Init {
            mode,
            version,
            input_count: input_count as u64,
        }
    }

    /// Create a new input record, `script` is empty for inputs not being signed
    pub fn input(input: InputRef, script: &[u8], sequence: u32) -> Self {
        Self::Input {
            input,
            script: script.to_vec(),
            sequence,
        }
    }
}

impl ApduStatic for HashInputStartReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::HashInputStart as u8;

    fn p1(&self) -> u8 {
        match self {
            Self::Init { .. } => 0x00,
            Self::Input { .. } => 0x80,
        }
    }

    fn p2(&self) -> u8 {
        match self {
            Self::Init { mode, .. } => *mode as u8,
            Self::Input { .. } => 0x00,
        }
    }
}

impl Encode for HashInputStartReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        let n = match self {
            Self::Init { input_count, .. } => 4 + varint_len(*input_count),
            Self::Input { input, script, .. } => {
                input.enc_len() + varint_len(script.len() as u64) + script.len() + 4
            }
        };
        Ok(n)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let mut index = 0;

        match self {
            Self::Init {
                version,
                input_count,
                ..
            } => {
                index += write_u32_le(*version, &mut buff[index..])?;
                index += write_varint(*input_count, &mut buff[index..])?;
            }
            Self::Input {
                input,
                script,
                sequence,
            } => {
                index += input.enc(&mut buff[index..])?;
                index += write_varint(script.len() as u64, &mut buff[index..])?;
                index += write_slice(script, &mut buff[index..])?;
                index += write_u32_le(*sequence, &mut buff[index..])?;
            }
        }

        Ok(index)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::encode_apdu;

    #[test]
    fn hash_input_init_apdu() {
        let apdu = HashInputStartReq::init(StartMode::NewSegwit, 1, 2);
        assert_eq!(apdu.p1(), 0x00);
        assert_eq!(apdu.p2(), 0x02);
        assert_eq!(encode_apdu(&apdu), vec![0x01, 0x00, 0x00, 0x00, 0x02]);

        let apdu = HashInputStartReq::init(StartMode::Continue, 2, 1);
        assert_eq!(apdu.p2(), 0x80);
    }

    #[test]
    fn hash_input_trusted_apdu() {
        let apdu = HashInputStartReq::input(
            InputRef::Trusted(vec![0xaa; 56]),
            &[0x76, 0xa9],
            0xffff_fffd,
        );
        assert_eq!(apdu.p1(), 0x80);
        assert_eq!(apdu.p2(), 0x00);

        let d = encode_apdu(&apdu);
        assert_eq!(&d[..2], &[0x01, 56]);
        assert_eq!(&d[58..61], &[0x02, 0x76, 0xa9]);
        assert_eq!(&d[61..], &[0xfd, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn hash_input_segwit_apdu() {
        let apdu = HashInputStartReq::input(InputRef::Segwit(vec![0xbb; 44]), &[], 0xffff_ffff);

        let d = encode_apdu(&apdu);
        assert_eq!(d.len(), 1 + 44 + 1 + 4);
        assert_eq!(d[0], 0x02);
        assert_eq!(d[45], 0x00);
    }
}
