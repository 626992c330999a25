// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Ledger key and signing flows against an in-process mock device

use std::collections::HashMap;

use bitcoin::{hashes::Hash, Network, OutPoint, PubkeyHash, ScriptBuf, TxOut, WPubkeyHash};

use hw_signer::{
    cancel::CancelToken,
    key::{fingerprint, HARDENED},
    tx::{ChangeOutput, SignInput, SignRequest, SigningSession, State},
    DeviceHandle, Error,
};

mod helpers;
use helpers::*;

const INS_PUBLIC_KEY: u8 = 0x40;
const INS_TRUSTED_INPUT: u8 = 0x42;
const INS_HASH_START: u8 = 0x44;
const INS_HASH_SIGN: u8 = 0x48;
const INS_HASH_FINALIZE: u8 = 0x4a;

fn p2pkh(p: &str) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::hash(&mock_public_key(&indices(p))))
}

fn p2wpkh(p: &str) -> ScriptBuf {
    ScriptBuf::new_v0_p2wpkh(&WPubkeyHash::hash(&mock_public_key(&indices(p))))
}

fn recipient(value: u64) -> TxOut {
    TxOut {
        value,
        script_pubkey: ScriptBuf::new_p2pkh(&PubkeyHash::hash(&[0xab; 33])),
    }
}

/// Build a legacy request spending one output from each of two previous transactions
fn legacy_request() -> SignRequest {
    let paths = ["m/44'/0'/0'/0/0", "m/44'/0'/0'/0/1"];
    let mut supporting_txs = HashMap::new();
    let mut inputs = vec![];

    for (i, p) in paths.iter().enumerate() {
        let tx = prev_tx(vec![
            recipient(5_000),
            TxOut {
                value: 100_000 * (i as u64 + 1),
                script_pubkey: p2pkh(p),
            },
        ]);

        inputs.push(SignInput {
            outpoint: OutPoint {
                txid: tx.txid(),
                vout: 1,
            },
            value: 100_000 * (i as u64 + 1),
            script_pubkey: p2pkh(p),
            path: path(p),
        });
        supporting_txs.insert(tx.txid(), tx);
    }

    SignRequest {
        inputs,
        recipients: vec![recipient(250_000)],
        change: Some(ChangeOutput {
            script_pubkey: p2pkh("m/44'/0'/0'/1/0"),
            value: 40_000,
            path: path("m/44'/0'/0'/1/0"),
        }),
        fee: 10_000,
        supporting_txs,
        ..Default::default()
    }
}

#[test]
fn public_key_single_parent_lookup() {
    setup_logging();

    let m = MockLedger::new();
    let log = m.log();
    let mut h = DeviceHandle::from(m);

    let p = path("m/84'/0'/0'");
    let n = h.public_key(&p).unwrap();

    // Parent then child, no further requests
    assert_eq!(instructions(&log), vec![INS_PUBLIC_KEY, INS_PUBLIC_KEY]);
    let sent: Vec<_> = commands(&log, INS_PUBLIC_KEY)
        .iter()
        .map(|c| c[5] as usize)
        .collect();
    assert_eq!(sent, vec![2, 3]);

    assert_eq!(n.depth, 3);
    assert_eq!(n.child_number, HARDENED);
    assert_eq!(n.public_key, mock_public_key(&indices("m/84'/0'/0'")));
    assert_eq!(n.chain_code, mock_chain_code(&indices("m/84'/0'/0'")));
    assert_eq!(
        n.parent_fingerprint,
        fingerprint(&mock_public_key(&indices("m/84'/0'")))
    );

    let xpub = n.to_xpub(Network::Bitcoin).unwrap();
    assert!(xpub.to_string().starts_with("xpub"));
    assert_eq!(&xpub.encode()[5..9], &n.parent_fingerprint);
}

#[test]
fn public_key_root_has_no_parent() {
    let m = MockLedger::new();
    let log = m.log();
    let mut h = DeviceHandle::from(m);

    let n = h.public_key(&path("m/0'")).unwrap();

    assert_eq!(instructions(&log), vec![INS_PUBLIC_KEY]);
    assert_eq!(n.depth, 1);
    assert_eq!(n.parent_fingerprint, [0u8; 4]);
}

#[test]
fn wallet_info_xpubs() {
    let m = MockLedger::new();
    let mut h = DeviceHandle::from(m);

    let i = h.wallet_info(Network::Testnet, 0).unwrap();
    assert!(i.is_valid());
    assert!(i.xpub_native_segwit.starts_with("tpub"));
    assert_ne!(i.xpub_native_segwit, i.xpub_nested_segwit);
}

#[test]
fn legacy_two_inputs_with_change() {
    setup_logging();

    let m = MockLedger::new();
    let log = m.log();
    let mut h = DeviceHandle::from(m);

    let states = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
    let s = states.clone();

    let mut session = SigningSession::new(legacy_request())
        .unwrap()
        .with_observer(Box::new(move |state| s.lock().unwrap().push(state)));

    let signed = session.run(&mut h).unwrap();
    assert_eq!(session.state(), State::Complete);

    // Signatures in input order, normalised DER tag
    assert_eq!(signed.signatures.len(), 2);
    for (i, s) in signed.signatures.iter().enumerate() {
        assert_eq!(s.index, i as u32);
        assert_eq!(s.signature[0], 0x30);
        assert_eq!(*s.signature.last().unwrap(), 0x01);
    }
    assert_eq!(
        signed.signatures[1].public_key,
        mock_public_key(&indices("m/44'/0'/0'/0/1"))
    );

    // Two sign commands with distinct paths
    let signs = commands(&log, INS_HASH_SIGN);
    assert_eq!(signs.len(), 2);
    assert_ne!(signs[0], signs[1]);
    assert_eq!(&signs[0][5..][..21], &encode_path("m/44'/0'/0'/0/0")[..]);
    assert_eq!(&signs[1][5..][..21], &encode_path("m/44'/0'/0'/0/1")[..]);

    // Change path is sent once, prior to the first outputs chunk
    let finalize = commands(&log, INS_HASH_FINALIZE);
    let change: Vec<_> = finalize.iter().filter(|c| c[2] == 0xff).collect();
    assert_eq!(change.len(), 1);
    assert_eq!(finalize[0][2], 0xff);
    assert_eq!(&finalize[0][5..], &encode_path("m/44'/0'/0'/1/0")[..]);
    assert_eq!(finalize.last().unwrap()[2], 0x80);

    // Trusted inputs fetched for both inputs before hashing
    let ins = instructions(&log);
    let first_start = ins.iter().position(|i| *i == INS_HASH_START).unwrap();
    assert!(ins[..first_start].contains(&INS_TRUSTED_INPUT));
    assert!(!ins[first_start..].contains(&INS_TRUSTED_INPUT));

    // Per-input init, new then continue
    let inits: Vec<_> = commands(&log, INS_HASH_START)
        .into_iter()
        .filter(|c| c[2] == 0x00)
        .collect();
    assert_eq!(inits.len(), 2);
    assert_eq!(inits[0][3], 0x00);
    assert_eq!(inits[1][3], 0x80);

    // Only the input being signed exposes its script
    let records: Vec<_> = commands(&log, INS_HASH_START)
        .into_iter()
        .filter(|c| c[2] == 0x80)
        .collect();
    assert_eq!(records.len(), 4);
    // Records: trusted flag, length, token (56), script varint
    let script_len = |c: &Vec<u8>| c[5 + 2 + 56];
    assert_eq!(script_len(&records[0]), 25);
    assert_eq!(script_len(&records[1]), 0);
    assert_eq!(script_len(&records[2]), 0);
    assert_eq!(script_len(&records[3]), 25);

    use State::*;
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            TrustedInputCollection,
            UntrustedTxInit,
            OutputFinalize,
            InputSigning,
            UntrustedTxInit,
            OutputFinalize,
            InputSigning,
            Complete,
        ]
    );
}

fn encode_path(p: &str) -> Vec<u8> {
    let i = indices(p);
    let mut d = vec![i.len() as u8];
    for v in i {
        d.extend_from_slice(&v.to_be_bytes());
    }
    d
}

#[test]
fn legacy_missing_supporting_tx() {
    let mut req = legacy_request();
    let missing = req.inputs[1].outpoint.txid;
    req.supporting_txs.remove(&missing);

    let m = MockLedger::new();
    let log = m.log();
    let mut h = DeviceHandle::from(m);

    let mut session = SigningSession::new(req).unwrap();
    let r = session.run(&mut h);

    assert!(matches!(r, Err(Error::MissingSupportingTx(t)) if t == missing));
    assert_eq!(session.state(), State::Failed);
    assert!(commands(&log, INS_HASH_SIGN).is_empty());
}

#[test]
fn native_segwit_single_input() {
    setup_logging();

    let p = "m/84'/0'/0'/0/0";
    let req = SignRequest {
        inputs: vec![SignInput {
            outpoint: OutPoint {
                txid: prev_tx(vec![]).txid(),
                vout: 0,
            },
            value: 50_000,
            script_pubkey: p2wpkh(p),
            path: path(p),
        }],
        recipients: vec![recipient(45_000)],
        rbf: true,
        ..Default::default()
    };

    let m = MockLedger::new();
    let log = m.log();
    let mut h = DeviceHandle::from(m);

    let mut session = SigningSession::new(req).unwrap();
    let signed = session.run(&mut h).unwrap();

    assert_eq!(signed.signatures.len(), 1);
    assert_eq!(signed.signatures[0].public_key, mock_public_key(&indices(p)));
    assert!(!signed.encode().unwrap().is_empty());

    let ins = instructions(&log);
    assert!(!ins.contains(&INS_TRUSTED_INPUT));
    assert_eq!(ins.iter().filter(|i| **i == INS_HASH_SIGN).count(), 1);
    assert_eq!(*ins.last().unwrap(), INS_HASH_SIGN);

    let starts = commands(&log, INS_HASH_START);
    assert_eq!(starts.len(), 4);

    // New segwit transaction, all inputs with empty scripts
    assert_eq!((starts[0][2], starts[0][3]), (0x00, 0x02));
    assert_eq!(starts[1][5], 0x02);
    assert_eq!(starts[1][5 + 1 + 44], 0x00);
    assert_eq!(&starts[1][starts[1].len() - 4..], &[0xfd, 0xff, 0xff, 0xff]);

    // Per input continuation, P2PKH witness script
    assert_eq!((starts[2][2], starts[2][3]), (0x00, 0x80));
    let record = &starts[3];
    let script = &record[5 + 1 + 44 + 1..][..25];
    assert_eq!(script, p2pkh(p).as_bytes());

    // Outputs finalised once, without change
    let finalize = commands(&log, INS_HASH_FINALIZE);
    assert!(finalize.iter().all(|c| c[2] != 0xff));
    assert_eq!(finalize.last().unwrap()[2], 0x80);

    // Sign the continuation hash, lock time then SIGHASH_ALL
    let sign = commands(&log, INS_HASH_SIGN).remove(0);
    assert_eq!(&sign[sign.len() - 6..], &[0x00, 0, 0, 0, 0, 0x01]);
}

#[test]
fn nested_segwit_single_input() {
    let p = "m/49'/0'/0'/0/0";
    let req = SignRequest {
        inputs: vec![SignInput {
            outpoint: OutPoint {
                txid: prev_tx(vec![]).txid(),
                vout: 1,
            },
            value: 50_000,
            script_pubkey: ScriptBuf::new_p2sh(&p2wpkh(p).script_hash()),
            path: path(p),
        }],
        recipients: vec![recipient(45_000)],
        ..Default::default()
    };

    let m = MockLedger::new();
    let log = m.log();
    let mut h = DeviceHandle::from(m);

    let mut session = SigningSession::new(req).unwrap();
    let signed = session.run(&mut h).unwrap();

    assert_eq!(session.state(), State::Complete);
    assert_eq!(signed.signatures.len(), 1);
    assert_eq!(signed.signatures[0].public_key, mock_public_key(&indices(p)));

    let ins = instructions(&log);
    assert!(!ins.contains(&INS_TRUSTED_INPUT));
    assert_eq!(ins.iter().filter(|i| **i == INS_HASH_SIGN).count(), 1);

    // Witness script is the P2PKH form of the device key
    let starts = commands(&log, INS_HASH_START);
    assert_eq!(starts.len(), 4);
    let script = &starts[3][5 + 1 + 44 + 1..][..25];
    assert_eq!(script, p2pkh(p).as_bytes());
}

#[test]
fn nested_segwit_mismatch_fails_before_signing() {
    let p = "m/49'/0'/0'/0/0";
    let req = SignRequest {
        inputs: vec![SignInput {
            outpoint: OutPoint::null(),
            value: 50_000,
            // P2SH over the wrong redeem script
            script_pubkey: ScriptBuf::new_p2sh(&p2wpkh("m/49'/0'/0'/0/1").script_hash()),
            path: path(p),
        }],
        recipients: vec![recipient(45_000)],
        ..Default::default()
    };

    let m = MockLedger::new();
    let log = m.log();
    let mut h = DeviceHandle::from(m);

    let mut session = SigningSession::new(req).unwrap();
    let r = session.run(&mut h);

    assert!(matches!(r, Err(Error::ScriptMismatch(0))));
    assert_eq!(session.state(), State::Failed);

    let ins = instructions(&log);
    assert!(!ins.contains(&INS_HASH_START));
    assert!(!ins.contains(&INS_HASH_SIGN));
}

#[test]
fn mixed_inputs_rejected() {
    let mut req = legacy_request();
    req.inputs[1].path = path("m/84'/0'/0'/0/1");

    assert!(matches!(
        SigningSession::new(req),
        Err(Error::UnsupportedInputMix)
    ));
}

#[test]
fn cancellation_aborts_session() {
    let token = CancelToken::new();

    let m = MockLedger::new().cancel_on(INS_HASH_START, token.clone());
    let log = m.log();
    let mut h = DeviceHandle::new(m, token);

    let mut session = SigningSession::new(legacy_request()).unwrap();
    let r = session.run(&mut h);

    assert!(matches!(r, Err(Error::Cancelled)));
    assert_eq!(session.state(), State::Cancelled);

    // No commands issued following cancellation
    assert_eq!(commands(&log, INS_HASH_START).len(), 1);
    assert!(commands(&log, INS_HASH_SIGN).is_empty());
}

#[test]
fn user_rejection_aborts_session() {
    let m = MockLedger::new().fail_on(INS_HASH_SIGN, 0x6985);
    let mut h = DeviceHandle::from(m);

    let mut session = SigningSession::new(legacy_request()).unwrap();
    let r = session.run(&mut h);

    assert!(matches!(r, Err(Error::CancelledByUser)));
    assert_eq!(session.state(), State::Cancelled);
}

#[test]
fn device_locked() {
    let m = MockLedger::new().fail_on(INS_PUBLIC_KEY, 0x6982);
    let mut h = DeviceHandle::from(m);

    assert!(matches!(
        h.public_key(&path("m/44'/0'/0'")),
        Err(Error::NoEnvironment)
    ));
}
