// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::{collections::HashMap, str::FromStr};

use bitcoin::{
    bip32::DerivationPath, consensus::encode::deserialize, OutPoint, ScriptBuf, Transaction,
    TxOut, Txid,
};
use serde::{Deserialize, Serialize};

use hw_signer::tx::{ChangeOutput, SignInput, SignRequest, SignedTx, DEFAULT_TX_VERSION};

/// Hex encoded bytes
#[derive(Clone, PartialEq, Debug, Default)]
pub struct HexData(pub Vec<u8>);

impl FromStr for HexData {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(HexData)
    }
}

impl AsRef<[u8]> for HexData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::string::ToString for HexData {
    fn to_string(&self) -> String {
        hex::encode(&self.0)
    }
}

impl Serialize for HexData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for HexData {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        HexData::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Input to be signed, JSON form
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct InputFile {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub script_pubkey: HexData,
    pub path: String,
}

/// Transaction output, JSON form
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct OutputFile {
    pub value: u64,
    pub script_pubkey: HexData,
}

/// Change output, JSON form
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ChangeFile {
    pub value: u64,
    pub script_pubkey: HexData,
    pub path: String,
}

/// Sign request file
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SignRequestFile {
    pub inputs: Vec<InputFile>,
    pub recipients: Vec<OutputFile>,
    #[serde(default)]
    pub change: Option<ChangeFile>,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub rbf: bool,
    /// Consensus encoded previous transactions, required for legacy inputs
    #[serde(default)]
    pub supporting_txs: Vec<HexData>,
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default)]
    pub lock_time: Option<u32>,
}

fn parse_path(p: &str) -> anyhow::Result<DerivationPath> {
    DerivationPath::from_str(p).map_err(|e| anyhow::anyhow!("invalid path '{}': {}", p, e))
}

impl TryFrom<SignRequestFile> for SignRequest {
    type Error = anyhow::Error;

    fn try_from(f: SignRequestFile) -> Result<Self, Self::Error> {
        let mut inputs = Vec::with_capacity(f.inputs.len());
        for i in f.inputs {
            inputs.push(SignInput {
                outpoint: OutPoint {
                    txid: Txid::from_str(&i.txid)?,
                    vout: i.vout,
                },
                value: i.value,
                script_pubkey: ScriptBuf::from_bytes(i.script_pubkey.0),
                path: parse_path(&i.path)?,
            });
        }

        let recipients = f
            .recipients
            .into_iter()
            .map(|o| TxOut {
                value: o.value,
                script_pubkey: ScriptBuf::from_bytes(o.script_pubkey.0),
            })
            .collect();

        let change = match f.change {
            Some(c) => Some(ChangeOutput {
                value: c.value,
                script_pubkey: ScriptBuf::from_bytes(c.script_pubkey.0),
                path: parse_path(&c.path)?,
            }),
            None => None,
        };

        let mut supporting_txs = HashMap::new();
        for t in f.supporting_txs {
            let tx: Transaction = deserialize(t.as_ref())?;
            supporting_txs.insert(tx.txid(), tx);
        }

        Ok(SignRequest {
            inputs,
            recipients,
            change,
            fee: f.fee,
            rbf: f.rbf,
            supporting_txs,
            version: f.version.unwrap_or(DEFAULT_TX_VERSION),
            lock_time: f.lock_time.unwrap_or_default(),
        })
    }
}

/// Input signature, JSON form
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SignatureFile {
    pub index: u32,
    pub signature: HexData,
    pub public_key: HexData,
}

/// Signed transaction output file
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SignedTxFile {
    pub signatures: Vec<SignatureFile>,
    /// Encoded `InputSigs` container
    pub input_sigs: HexData,
}

impl TryFrom<&SignedTx> for SignedTxFile {
    type Error = anyhow::Error;

    fn try_from(s: &SignedTx) -> Result<Self, Self::Error> {
        Ok(Self {
            signatures: s
                .signatures
                .iter()
                .map(|s| SignatureFile {
                    index: s.index,
                    signature: HexData(s.signature.clone()),
                    public_key: HexData(s.public_key.to_vec()),
                })
                .collect(),
            input_sigs: HexData(s.encode()?),
        })
    }
}
