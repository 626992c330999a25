// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Segwit (nested and native) transaction hashing

use bitcoin::{hashes::Hash, PubkeyHash, ScriptBuf, WPubkeyHash};
use log::debug;

use hw_signer_apdu::tx::{HashInputStartReq, InputRef, StartMode};

use super::{SignInput, SignRequest, TrustedInput};
use crate::{
    handle::DeviceHandle,
    key::{KeyNode, Purpose},
    transport::Exchange,
    Error,
};

/// Build the P2WPKH redeem script (`0x00 0x14 <hash160(pk)>`) for a nested input
pub fn redeem_script(node: &KeyNode) -> ScriptBuf {
    ScriptBuf::new_v0_p2wpkh(&WPubkeyHash::hash(&node.public_key))
}

/// Build the P2PKH form witness script hashed when signing a segwit input
pub fn witness_script(input: &SignInput, node: &KeyNode) -> Result<ScriptBuf, Error> {
    match input.purpose() {
        Some(Purpose::NativeSegwit) => {
            let spk = input.script_pubkey.as_bytes();
            if !input.script_pubkey.is_v0_p2wpkh() {
                return Err(Error::InvalidRequest("native input script is not P2WPKH"));
            }

            let hash = PubkeyHash::from_slice(&spk[2..22])
                .map_err(|_| Error::InvalidRequest("invalid witness program"))?;
            Ok(ScriptBuf::new_p2pkh(&hash))
        }
        Some(Purpose::NestedSegwit) => Ok(ScriptBuf::new_p2pkh(&node.pubkey_hash())),
        _ => Err(Error::UnsupportedInputMix),
    }
}

/// Check the spent script matches the device key for input `index`
///
/// Nested inputs rebuild the redeem script and compare its P2SH form,
/// native inputs compare the witness program.
pub fn check_input(input: &SignInput, node: &KeyNode, index: usize) -> Result<(), Error> {
    let expected = match input.purpose() {
        Some(Purpose::NestedSegwit) => ScriptBuf::new_p2sh(&redeem_script(node).script_hash()),
        Some(Purpose::NativeSegwit) => redeem_script(node),
        _ => return Err(Error::UnsupportedInputMix),
    };

    if expected != input.script_pubkey {
        debug!(
            "script mismatch for input {} (expected: {:?}, actual: {:?})",
            index, expected, input.script_pubkey
        );
        return Err(Error::ScriptMismatch(index));
    }

    Ok(())
}

/// Hash all inputs (with empty scripts) to start a new segwit transaction
pub(crate) fn start_all<T: Exchange>(
    h: &mut DeviceHandle<T>,
    req: &SignRequest,
    trusted: &[TrustedInput],
) -> Result<(), Error> {
    debug!("Starting untrusted segwit tx ({} inputs)", req.inputs.len());

    h.request(&HashInputStartReq::init(
        StartMode::NewSegwit,
        req.version as u32,
        req.inputs.len(),
    ))?;

    for t in trusted {
        h.request(&HashInputStartReq::input(
            InputRef::Segwit(t.as_bytes().to_vec()),
            &[],
            req.sequence(),
        ))?;
    }

    Ok(())
}

/// Hash input `index` alone with its witness script, prior to signing
pub(crate) fn start_input<T: Exchange>(
    h: &mut DeviceHandle<T>,
    req: &SignRequest,
    trusted: &[TrustedInput],
    nodes: &[KeyNode],
    index: usize,
) -> Result<(), Error> {
    let input = &req.inputs[index];
    let script = witness_script(input, &nodes[index])?;

    debug!("Continuing untrusted segwit tx for input {}", index);

    h.request(&HashInputStartReq::init(
        StartMode::Continue,
        req.version as u32,
        1,
    ))?;

    h.request(&HashInputStartReq::input(
        InputRef::Segwit(trusted[index].as_bytes().to_vec()),
        script.as_bytes(),
        req.sequence(),
    ))?;

    Ok(())
}
