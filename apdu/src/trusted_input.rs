// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Trusted input APDUs, streaming a previous transaction to the device
//!
//! The previous transaction is replayed field by field, the response to the
//! final (lock time) chunk contains the _trusted input_ token to reference
//! the spent output in later hashing commands.
//!
//! ## Chunk sequence:
//! ```text
//! [P1=0x00] PREV_INDEX (BE u32) | VERSION (LE u32) | VARINT(INPUT_COUNT)
//! [P1=0x80] OUTPOINT (36) | VARINT(SCRIPT_LEN)               (per input)
//! [P1=0x80] SCRIPT_SIG | SEQUENCE (LE u32)                   (per input)
//! [P1=0x80] VARINT(OUTPUT_COUNT)
//! [P1=0x80] VALUE (LE u64) | VARINT(SCRIPT_LEN)              (per output)
//! [P1=0x80] SCRIPT_PUBKEY                                    (per output)
//! [P1=0x80] LOCK_TIME (LE u32)                          -> TRUSTED_INPUT
//! ```

use bitcoin::{consensus::encode::serialize, Transaction};
use encdec::{DecodeOwned, Encode};

use super::{ApduError, ApduStatic, Instruction, BTC_APDU_CLA, MAX_APDU_PAYLOAD};
use crate::helpers::*;

/// P1 for the first trusted input chunk
pub const P1_FIRST: u8 = 0x00;

/// P1 for continuation chunks
pub const P1_NEXT: u8 = 0x80;

/// Trusted input request chunk
#[derive(Clone, PartialEq, Debug)]
pub struct TrustedInputReq {
    /// First chunk of the stream
    pub first: bool,
    /// Chunk data
    pub data: Vec<u8>,
}

impl TrustedInputReq {
    fn next(data: Vec<u8>) -> Self {
        Self { first: false, data }
    }
}

impl ApduStatic for TrustedInputReq {
    const CLA: u8 = BTC_APDU_CLA;
    const INS: u8 = Instruction::GetTrustedInput as u8;

    fn p1(&self) -> u8 {
        match self.first {
            true => P1_FIRST,
            false => P1_NEXT,
        }
    }
}

impl Encode for TrustedInputReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(self.data.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        write_slice(&self.data, buff)
    }
}

/// Trusted input response (opaque device token)
#[derive(Clone, PartialEq, Debug)]
pub struct TrustedInputResp(pub Vec<u8>);

impl DecodeOwned for TrustedInputResp {
    type Output = Self;

    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), ApduError> {
        if buff.is_empty() {
            return Err(ApduError::InvalidLength);
        }
        Ok((Self(buff.to_vec()), buff.len()))
    }
}

/// Build the chunk sequence replaying `prev_tx` to obtain a trusted input for output `prev_index`
///
/// Each chunk fits a single APDU, long scripts are split over multiple continuation chunks.
pub fn trusted_input_chunks(
    prev_tx: &Transaction,
    prev_index: u32,
) -> Result<Vec<TrustedInputReq>, ApduError> {
    let mut chunks = vec![];
    let mut buff = [0u8; 16];

    // Header
    let mut d = Vec::with_capacity(17);
    let mut n = write_u32_be(prev_index, &mut buff)?;
    n += write_u32_le(prev_tx.version as u32, &mut buff[n..])?;
    n += write_varint(prev_tx.input.len() as u64, &mut buff[n..])?;
    d.extend_from_slice(&buff[..n]);
    chunks.push(TrustedInputReq { first: true, data: d });

    // Inputs
    for txin in &prev_tx.input {
        let mut d = serialize(&txin.previous_output);
        let n = write_varint(txin.script_sig.len() as u64, &mut buff)?;
        d.extend_from_slice(&buff[..n]);
        chunks.push(TrustedInputReq::next(d));

        let mut d = txin.script_sig.as_bytes().to_vec();
        d.extend_from_slice(&txin.sequence.0.to_le_bytes());
        push_split(&mut chunks, d);
    }

    // Outputs
    let n = write_varint(prev_tx.output.len() as u64, &mut buff)?;
    chunks.push(TrustedInputReq::next(buff[..n].to_vec()));

    for txout in &prev_tx.output {
        let mut d = txout.value.to_le_bytes().to_vec();
        let n = write_varint(txout.script_pubkey.len() as u64, &mut buff)?;
        d.extend_from_slice(&buff[..n]);
        chunks.push(TrustedInputReq::next(d));

        push_split(&mut chunks, txout.script_pubkey.as_bytes().to_vec());
    }

    // Lock time
    let lock_time = prev_tx.lock_time.to_consensus_u32();
    chunks.push(TrustedInputReq::next(lock_time.to_le_bytes().to_vec()));

    Ok(chunks)
}

/// Push continuation data, splitting at the APDU payload limit
fn push_split(chunks: &mut Vec<TrustedInputReq>, d: Vec<u8>) {
    if d.len() <= MAX_APDU_PAYLOAD {
        chunks.push(TrustedInputReq::next(d));
        return;
    }

    for c in d.chunks(MAX_APDU_PAYLOAD) {
        chunks.push(TrustedInputReq::next(c.to_vec()));
    }
}

#[cfg(test)]
mod test {
    use bitcoin::{
        absolute::LockTime, OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness,
    };

    use super::*;
    use crate::test::encode_apdu;

    fn prev_tx() -> Transaction {
        Transaction {
            version: 2,
            lock_time: LockTime::from_consensus(0x0102_0304),
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from(vec![0xaa; 4]),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![
                TxOut {
                    value: 1_000,
                    script_pubkey: ScriptBuf::from(vec![0xbb; 25]),
                },
                TxOut {
                    value: 2_000,
                    script_pubkey: ScriptBuf::from(vec![0xcc; 22]),
                },
            ],
        }
    }

    #[test]
    fn trusted_input_chunk_sequence() {
        let tx = prev_tx();
        let c = trusted_input_chunks(&tx, 1).unwrap();

        // header, (outpoint, script) per input, output count, (value, script) per output, lock time
        assert_eq!(c.len(), 1 + 2 + 1 + 4 + 1);

        assert!(c[0].first);
        assert_eq!(c[0].p1(), 0x00);
        assert_eq!(
            c[0].data,
            vec![0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x01]
        );

        assert!(c[1..].iter().all(|c| c.p1() == 0x80));

        // Outpoint + script length
        assert_eq!(c[1].data.len(), 36 + 1);
        assert_eq!(c[1].data[36], 4);

        // Script + sequence
        assert_eq!(c[2].data, vec![0xaa, 0xaa, 0xaa, 0xaa, 0xff, 0xff, 0xff, 0xff]);

        // Output count
        assert_eq!(c[3].data, vec![0x02]);

        // Value + script length
        assert_eq!(&c[4].data[..8], &1_000u64.to_le_bytes());
        assert_eq!(c[4].data[8], 25);
        assert_eq!(c[5].data, vec![0xbb; 25]);

        // Lock time
        assert_eq!(c[8].data, vec![0x04, 0x03, 0x02, 0x01]);

        for chunk in &c {
            encode_apdu(chunk);
        }
    }

    #[test]
    fn trusted_input_long_script() {
        let mut tx = prev_tx();
        tx.input[0].script_sig = ScriptBuf::from(vec![0xaa; 300]);

        let c = trusted_input_chunks(&tx, 0).unwrap();
        assert_eq!(c.len(), 10);
        assert_eq!(c[2].data.len(), MAX_APDU_PAYLOAD);
        assert_eq!(c[3].data.len(), 304 - MAX_APDU_PAYLOAD);
    }
}
