// Copyright (c) 2022-2023 The MobileCoin Foundation

use prost::Message;

use crate::Error;

/// Signature for a single input
#[derive(Clone, Debug, PartialEq)]
pub struct InputSignature {
    /// Input index
    pub index: u32,
    /// DER signature with sighash type
    pub signature: Vec<u8>,
    /// Compressed public key of the signing key
    pub public_key: [u8; 33],
}

impl InputSignature {
    /// Encode signature and key (`sig_len | sig | pk_len | pk`)
    pub fn encode_data(&self) -> Result<Vec<u8>, Error> {
        let sig_len = u8::try_from(self.signature.len())
            .map_err(|_| Error::MalformedResponse("signature length"))?;

        let mut d = Vec::with_capacity(2 + self.signature.len() + self.public_key.len());

        d.push(sig_len);
        d.extend_from_slice(&self.signature);
        d.push(self.public_key.len() as u8);
        d.extend_from_slice(&self.public_key);

        Ok(d)
    }
}

/// Signed transaction result, ordered signatures per input
#[derive(Clone, Debug, PartialEq)]
pub struct SignedTx {
    pub signatures: Vec<InputSignature>,
}

/// Protobuf signature container entry
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InputSig {
    #[prost(uint32, tag = "1")]
    pub index: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// Protobuf signature container
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InputSigs {
    #[prost(message, repeated, tag = "1")]
    pub inputsig: Vec<InputSig>,
}

impl SignedTx {
    /// Build the protobuf signature container
    pub fn to_input_sigs(&self) -> Result<InputSigs, Error> {
        let inputsig = self
            .signatures
            .iter()
            .map(|s| {
                Ok(InputSig {
                    index: s.index,
                    data: s.encode_data()?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(InputSigs { inputsig })
    }

    /// Encode the signature container
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(self.to_input_sigs()?.encode_to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_input_sigs() {
        let tx = SignedTx {
            signatures: vec![
                InputSignature {
                    index: 0,
                    signature: vec![0x30, 0x01, 0x01],
                    public_key: [0x02; 33],
                },
                InputSignature {
                    index: 1,
                    signature: vec![0x30, 0x02],
                    public_key: [0x03; 33],
                },
            ],
        };

        let d = tx.signatures[0].encode_data().unwrap();
        assert_eq!(&d[..4], &[3, 0x30, 0x01, 0x01]);
        assert_eq!(d[4], 33);
        assert_eq!(d.len(), 1 + 3 + 1 + 33);

        let encoded = tx.encode().unwrap();
        let decoded = InputSigs::decode(&encoded[..]).unwrap();

        assert_eq!(decoded.inputsig.len(), 2);
        assert_eq!(decoded.inputsig[1].index, 1);
        assert_eq!(
            decoded.inputsig[1].data,
            tx.signatures[1].encode_data().unwrap()
        );
    }

    #[test]
    fn oversized_signature_rejected() {
        let tx = SignedTx {
            signatures: vec![InputSignature {
                index: 0,
                signature: vec![0x30; 256],
                public_key: [0x02; 33],
            }],
        };

        assert!(matches!(
            tx.signatures[0].encode_data(),
            Err(Error::MalformedResponse(_))
        ));
        assert!(tx.encode().is_err());

        // 255 bytes is the largest encodable signature
        let s = InputSignature {
            signature: vec![0x30; 255],
            ..tx.signatures[0].clone()
        };
        assert_eq!(s.encode_data().unwrap()[0], 255);
    }
}
