// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::collections::HashMap;

use bitcoin::{bip32::DerivationPath, OutPoint, ScriptBuf, Transaction, TxOut, Txid};

use hw_signer_apdu::tx::input_sequence;

use crate::{key::Purpose, Error};

/// Default transaction version
pub const DEFAULT_TX_VERSION: i32 = 1;

/// Input to be signed
#[derive(Clone, Debug, PartialEq)]
pub struct SignInput {
    /// Output being spent
    pub outpoint: OutPoint,
    /// Value of the spent output
    pub value: u64,
    /// Script of the spent output
    pub script_pubkey: ScriptBuf,
    /// Derivation path of the signing key
    pub path: DerivationPath,
}

impl SignInput {
    /// Resolve the input purpose from the signing path
    pub fn purpose(&self) -> Option<Purpose> {
        Purpose::from_path(&self.path)
    }
}

/// Change output, paid to a device controlled key
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeOutput {
    pub script_pubkey: ScriptBuf,
    pub value: u64,
    pub path: DerivationPath,
}

/// Transaction signing request
#[derive(Clone, Debug, PartialEq)]
pub struct SignRequest {
    pub inputs: Vec<SignInput>,
    pub recipients: Vec<TxOut>,
    pub change: Option<ChangeOutput>,
    /// Transaction fee, checked against inputs and outputs where non-zero
    pub fee: u64,
    /// Signal replace-by-fee via input sequences
    pub rbf: bool,
    /// Previous transactions by txid, required for legacy inputs
    pub supporting_txs: HashMap<Txid, Transaction>,
    pub version: i32,
    pub lock_time: u32,
}

impl Default for SignRequest {
    fn default() -> Self {
        Self {
            inputs: vec![],
            recipients: vec![],
            change: None,
            fee: 0,
            rbf: false,
            supporting_txs: HashMap::new(),
            version: DEFAULT_TX_VERSION,
            lock_time: 0,
        }
    }
}

/// Signing protocol variant
#[derive(Copy, Clone, Debug, PartialEq, strum::Display)]
pub enum Variant {
    /// Trusted inputs replayed from previous transactions
    Legacy,
    /// Locally built segwit inputs (nested and / or native)
    Segwit,
}

impl SignRequest {
    /// All outputs in transaction order (recipients, then change)
    pub fn outputs(&self) -> Vec<TxOut> {
        let mut o = self.recipients.clone();
        if let Some(c) = &self.change {
            o.push(TxOut {
                value: c.value,
                script_pubkey: c.script_pubkey.clone(),
            });
        }
        o
    }

    /// Sequence applied to every input
    pub fn sequence(&self) -> u32 {
        input_sequence(self.rbf)
    }

    /// Check request consistency
    pub fn validate(&self) -> Result<(), Error> {
        if self.inputs.is_empty() {
            return Err(Error::InvalidRequest("no inputs"));
        }
        if self.recipients.is_empty() {
            return Err(Error::InvalidRequest("no recipients"));
        }
        if self.inputs.iter().any(|i| i.path.as_ref().is_empty()) {
            return Err(Error::InvalidPath);
        }
        if matches!(&self.change, Some(c) if c.path.as_ref().is_empty()) {
            return Err(Error::InvalidPath);
        }

        let total_in = self
            .inputs
            .iter()
            .try_fold(0u64, |a, i| a.checked_add(i.value))
            .ok_or(Error::InvalidRequest("input value overflow"))?;
        let total_out = self
            .outputs()
            .iter()
            .try_fold(0u64, |a, o| a.checked_add(o.value))
            .ok_or(Error::InvalidRequest("output value overflow"))?;

        if total_out > total_in {
            return Err(Error::InvalidRequest("outputs exceed inputs"));
        }
        if self.fee != 0 && total_in - total_out != self.fee {
            return Err(Error::InvalidRequest("fee mismatch"));
        }

        Ok(())
    }

    /// Select the signing variant from input purposes
    ///
    /// Mixed legacy and segwit inputs are rejected.
    pub fn variant(&self) -> Result<Variant, Error> {
        let mut legacy = 0;
        let mut segwit = 0;

        for i in &self.inputs {
            match i.purpose() {
                Some(p) if p.is_segwit() => segwit += 1,
                Some(_) => legacy += 1,
                None => return Err(Error::InvalidPath),
            }
        }

        match (legacy, segwit) {
            (_, 0) => Ok(Variant::Legacy),
            (0, _) => Ok(Variant::Segwit),
            _ => Err(Error::UnsupportedInputMix),
        }
    }
}
