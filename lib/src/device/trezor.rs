// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Trezor device, using the protobuf message protocol
//!
//! The connection is held between commands and initialised on first use. PIN
//! and passphrase requests raised during an operation are parked in the
//! [PendingTable] until resolved via [TrezorDevice::set_matrix_pin] or
//! [TrezorDevice::set_passphrase].

use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
};

use bitcoin::{bip32::DerivationPath, hashes::Hash, Address, Network, Transaction, Txid};
use log::{debug, warn};
use prost::Message;
use zeroize::{Zeroize, Zeroizing};

use hw_signer_apdu::{
    trezor::{
        coin_name,
        messages::{
            ButtonAck, Cancel, Failure, FailureType, Features, GetPublicKey, HdNodeType,
            Initialize, InputScriptType, OutputScriptType, PassphraseAck, PassphraseRequest,
            PinMatrixAck, PublicKey, RequestType, SignTx, TransactionType, TxAck, TxInputType,
            TxOutputBinType, TxOutputType, TxRequest,
        },
        wire::decode_message,
        MessageType, TrezorMessage,
    },
    tx::SIGHASH_ALL,
};

use super::{lock, Connect, Context, DeviceKey, DeviceState, PendingKind, PendingReply, PendingTable};
use crate::{
    cancel::CancelToken,
    event::{emit, Event, EventSender, TxStatus},
    key::{compress_key, path_indices, root_path, KeyNode, Purpose, WalletInfo},
    transport::TrezorLink,
    tx::{InputSignature, SignRequest, SignedTx, State},
    Error,
};

/// Boxed trezor transport
pub type TrezorTransport = Box<dyn TrezorLink + Send>;

/// Trezor transport connector
pub type TrezorConnector = Arc<dyn Connect<TrezorTransport>>;

/// Trezor signing device
#[derive(Clone)]
pub struct TrezorDevice {
    key: DeviceKey,
    connector: TrezorConnector,
    link: Arc<Mutex<Option<TrezorTransport>>>,
    pending: PendingTable,
    pub(crate) state: Arc<DeviceState>,
}

impl TrezorDevice {
    pub fn new(key: DeviceKey, connector: TrezorConnector) -> Self {
        Self {
            key,
            connector,
            link: Arc::new(Mutex::new(None)),
            pending: PendingTable::new(),
            state: Arc::new(DeviceState::default()),
        }
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    /// Run `f` in a blocking worker, connecting and initialising the device if required
    async fn run<F, R>(&self, ctx: &Context, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut TrezorSession) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let cancel = self.state.begin();
        let connector = self.connector.clone();
        let link = self.link.clone();
        let pending = self.pending.clone();
        let events = ctx.events.clone();
        let device_id = self.key.device_id.clone();

        let r = tokio::task::spawn_blocking(move || {
            debug!("Trezor worker start ({})", device_id);

            let mut guard = lock(&link);

            let connected = guard.is_some();
            if !connected {
                *guard = Some(connector.connect()?);
            }
            let t = guard.as_mut().ok_or(Error::NoDevice)?;

            let mut s = TrezorSession {
                link: t,
                pending: &pending,
                cancel: &cancel,
                events: &events,
                device_id: &device_id,
            };

            let r = match connected {
                true => f(&mut s),
                false => s.initialize().and_then(|_| f(&mut s)),
            };

            pending.clear();

            // Drop the connection where the device session state is unknown
            if let Err(e) = &r {
                if !connected || is_link_error(e) {
                    debug!("Dropping trezor connection ({}): {}", device_id, e);
                    *guard = None;
                }
            }

            debug!("Trezor worker done ({}, ok: {})", device_id, r.is_ok());

            r
        })
        .await
        .map_err(Error::from)
        .and_then(|r| r);

        self.state.finish(&r);

        r
    }

    /// Fetch the public key node for `path`
    pub async fn public_key(&self, ctx: &Context, path: &DerivationPath) -> Result<KeyNode, Error> {
        let path = path.clone();
        let coin = coin_name(ctx.config.testnet);

        self.run(ctx, move |s| s.public_key(&path, coin)).await
    }

    /// Fetch wallet identification keys
    pub async fn wallet_info(&self, ctx: &Context) -> Result<WalletInfo, Error> {
        let testnet = ctx.config.testnet;
        let account = ctx.config.account;

        self.run(ctx, move |s| s.wallet_info(testnet, account)).await
    }

    /// Sign a transaction
    pub async fn sign_transaction(
        &self,
        ctx: &Context,
        req: SignRequest,
    ) -> Result<SignedTx, Error> {
        req.validate()?;
        req.variant()?;

        let network = ctx.config.network();

        self.run(ctx, move |s| s.sign_transaction(&req, network)).await
    }

    /// Resolve a pending PIN request
    pub fn set_matrix_pin(&self, pin: &str) -> Result<(), Error> {
        self.pending
            .resolve(PendingReply::Pin(Zeroizing::new(pin.to_string())))
            .map(|_| ())
    }

    /// Resolve a pending passphrase request
    pub fn set_passphrase(&self, passphrase: &str, on_device: bool) -> Result<(), Error> {
        self.pending
            .resolve(PendingReply::Passphrase {
                passphrase: Zeroizing::new(passphrase.to_string()),
                on_device,
            })
            .map(|_| ())
    }

    /// Cancel the active operation, waking any worker waiting on user input
    pub fn cancel(&self) -> bool {
        let active = self.state.cancel();
        self.pending.clear();
        active
    }

    /// Check whether the device is waiting on a PIN or passphrase
    pub fn is_blocked(&self) -> bool {
        self.pending.is_awaiting()
    }

    /// Close the held connection
    pub fn release(&self) {
        if let Ok(mut l) = self.link.try_lock() {
            *l = None;
        }
    }
}

/// Errors after which the device session state is unknown
fn is_link_error(e: &Error) -> bool {
    #[cfg(feature = "transport_hid")]
    if matches!(e, Error::Hid(_)) {
        return true;
    }

    matches!(
        e,
        Error::Io(_)
            | Error::Timeout
            | Error::Wire(_)
            | Error::Protobuf(_)
            | Error::Cancelled
            | Error::NoDevice
    )
}

/// Map a trezor [Failure] message to an error
pub fn failure_error(f: Failure) -> Error {
    match f.code.and_then(FailureType::from_i32) {
        Some(FailureType::ActionCancelled) | Some(FailureType::PinCancelled) => {
            Error::CancelledByUser
        }
        _ => Error::Trezor {
            code: f.code,
            message: f.message.unwrap_or_default(),
        },
    }
}

/// Convert a trezor HD node to a [KeyNode]
pub fn key_node(n: &HdNodeType) -> Result<KeyNode, Error> {
    let chain_code = n
        .chain_code
        .as_slice()
        .try_into()
        .map_err(|_| Error::MalformedResponse("chain code length"))?;
    let public_key = n
        .public_key
        .as_deref()
        .ok_or(Error::MalformedResponse("missing public key"))?;

    Ok(KeyNode {
        depth: u8::try_from(n.depth).map_err(|_| Error::MalformedResponse("node depth"))?,
        child_number: n.child_num,
        parent_fingerprint: n.fingerprint.to_be_bytes(),
        chain_code,
        public_key: compress_key(public_key)?,
    })
}

/// Transaction hash in trezor (display) byte order
fn tx_hash(txid: &Txid) -> Vec<u8> {
    let mut b = txid.to_byte_array();
    b.reverse();
    b.to_vec()
}

/// Active device session, owned by a blocking worker
pub struct TrezorSession<'a> {
    link: &'a mut TrezorTransport,
    pending: &'a PendingTable,
    cancel: &'a CancelToken,
    events: &'a EventSender,
    device_id: &'a str,
}

impl<'a> TrezorSession<'a> {
    fn send<M: TrezorMessage + Debug>(&mut self, m: &M) -> Result<(), Error> {
        self.cancel.check()?;

        debug!(">>> {} ({} bytes)", M::TYPE, m.encoded_len());

        self.link.write_message(M::TYPE.into(), &m.encode_to_vec())
    }

    /// Send a message and await the response, servicing interleaved button, PIN and passphrase requests
    pub fn call<M, R>(&mut self, m: &M) -> Result<R, Error>
    where
        M: TrezorMessage + Debug,
        R: TrezorMessage,
    {
        self.send(m)?;

        loop {
            let (t, d) = self.link.read_message()?;

            let msg_type = MessageType::try_from(t).ok();
            debug!("<<< {:?} ({} bytes)", msg_type, d.len());

            match msg_type {
                Some(MessageType::ButtonRequest) => {
                    self.emit(Event::TxStatusChanged {
                        device_id: self.device_id.to_string(),
                        status: TxStatus::AwaitingConfirmation,
                    });
                    self.send(&ButtonAck {})?;
                }
                Some(MessageType::PinMatrixRequest) => {
                    let event = Event::PinRequested {
                        device_id: self.device_id.to_string(),
                    };

                    let mut ack = match self.await_reply(PendingKind::Pin, event)? {
                        PendingReply::Pin(p) => PinMatrixAck { pin: p.to_string() },
                        _ => return Err(Error::NotAwaiting),
                    };

                    let r = self.send(&ack);
                    ack.pin.zeroize();
                    r?;
                }
                Some(MessageType::PassphraseRequest) => {
                    let req = PassphraseRequest::decode(&d[..])?;
                    debug!("passphrase request (on device: {:?})", req.on_device);

                    let event = Event::PassphraseRequested {
                        device_id: self.device_id.to_string(),
                    };

                    let mut ack = match self.await_reply(PendingKind::Passphrase, event)? {
                        PendingReply::Passphrase {
                            on_device: true, ..
                        } => PassphraseAck {
                            passphrase: None,
                            on_device: Some(true),
                        },
                        PendingReply::Passphrase { passphrase, .. } => PassphraseAck {
                            passphrase: Some(passphrase.to_string()),
                            on_device: None,
                        },
                        _ => return Err(Error::NotAwaiting),
                    };

                    let r = self.send(&ack);
                    if let Some(p) = ack.passphrase.as_mut() {
                        p.zeroize();
                    }
                    r?;
                }
                Some(MessageType::Failure) => {
                    let f = Failure::decode(&d[..])?;
                    warn!("trezor failure: {:?}", f);
                    return Err(failure_error(f));
                }
                _ => {
                    let r = decode_message::<R>(t, &d)?;
                    return Ok(r);
                }
            }
        }
    }

    /// Park a request in the pending table and block until resolved
    fn await_reply(&mut self, kind: PendingKind, event: Event) -> Result<PendingReply, Error> {
        let (id, rx) = self.pending.register(kind);

        self.emit(event);

        match rx.blocking_recv() {
            Ok(r) => Ok(r),
            Err(_) => {
                debug!("{} request {} dropped, cancelling", kind, id);
                self.pending.remove(id);

                // Best effort, the connection is discarded following cancellation
                let _ = self
                    .link
                    .write_message(MessageType::Cancel.into(), &Cancel {}.encode_to_vec());

                Err(Error::Cancelled)
            }
        }
    }

    fn emit(&self, e: Event) {
        emit(self.events, e)
    }

    /// Reset the device session
    pub fn initialize(&mut self) -> Result<Features, Error> {
        let f: Features = self.call(&Initialize {})?;

        debug!(
            "trezor features: {:?} {:?} (v{}.{}.{}, pin: {:?})",
            f.vendor,
            f.label,
            f.major_version.unwrap_or_default(),
            f.minor_version.unwrap_or_default(),
            f.patch_version.unwrap_or_default(),
            f.pin_protection,
        );

        Ok(f)
    }

    /// Fetch the public key node for `path`
    pub fn public_key(&mut self, path: &DerivationPath, coin: &str) -> Result<KeyNode, Error> {
        if path.as_ref().is_empty() {
            return Err(Error::InvalidPath);
        }

        debug!("Requesting public key for path: {}", path);

        let r: PublicKey = self.call(&GetPublicKey {
            address_n: path_indices(path),
            coin_name: Some(coin.to_string()),
            ..Default::default()
        })?;

        key_node(&r.node)
    }

    /// Fetch wallet identification keys (root and account xpubs)
    pub fn wallet_info(&mut self, testnet: bool, account: u32) -> Result<WalletInfo, Error> {
        let coin = coin_name(testnet);
        let network = match testnet {
            true => Network::Testnet,
            false => Network::Bitcoin,
        };

        let mut xpub = |p: &DerivationPath| -> Result<String, Error> {
            let n = self.public_key(p, coin)?;
            Ok(n.to_xpub(network)?.to_string())
        };

        Ok(WalletInfo {
            xpub_root: xpub(&root_path())?,
            xpub_nested_segwit: xpub(&Purpose::NestedSegwit.account_path(testnet, account))?,
            xpub_native_segwit: xpub(&Purpose::NativeSegwit.account_path(testnet, account))?,
            xpub_legacy: xpub(&Purpose::NonSegwit.account_path(testnet, account))?,
            ..Default::default()
        })
    }

    /// Sign a transaction, answering device requests for current and previous transaction data
    pub fn sign_transaction(
        &mut self,
        req: &SignRequest,
        network: Network,
    ) -> Result<SignedTx, Error> {
        let coin = coin_name(network != Network::Bitcoin);

        // Input keys, returned alongside signatures
        let mut keys = Vec::with_capacity(req.inputs.len());
        for i in &req.inputs {
            keys.push(self.public_key(&i.path, coin)?.public_key);
        }

        let outputs = req.outputs();
        let mut signatures: Vec<Option<Vec<u8>>> = vec![None; req.inputs.len()];

        debug!(
            "Starting trezor tx ({} inputs, {} outputs)",
            req.inputs.len(),
            outputs.len()
        );

        let mut r: TxRequest = self.call(&SignTx {
            outputs_count: outputs.len() as u32,
            inputs_count: req.inputs.len() as u32,
            coin_name: Some(coin.to_string()),
            version: Some(req.version as u32),
            lock_time: Some(req.lock_time),
        })?;

        loop {
            if let Some(s) = &r.serialized {
                if let (Some(i), Some(sig)) = (s.signature_index, &s.signature) {
                    let slot = signatures
                        .get_mut(i as usize)
                        .ok_or(Error::MalformedResponse("signature index"))?;

                    let mut sig = sig.clone();
                    sig.push(SIGHASH_ALL);
                    *slot = Some(sig);
                }
            }

            let details = r.details.clone().unwrap_or_default();
            let index = details.request_index.unwrap_or_default() as usize;
            let prev = match &details.tx_hash {
                Some(h) => Some(supporting_tx(req, h)?),
                None => None,
            };

            let request_type = r
                .request_type
                .and_then(RequestType::from_i32)
                .ok_or(Error::MalformedResponse("tx request type"))?;

            debug!(
                "tx request: {:?} {} (prev: {:?})",
                request_type,
                index,
                prev.map(|p| p.txid())
            );

            let tx = match (request_type, prev) {
                (RequestType::TxFinished, _) => break,

                (RequestType::TxInput, None) => TransactionType {
                    inputs: vec![current_input(req, index)?],
                    ..Default::default()
                },
                (RequestType::TxOutput, None) => TransactionType {
                    outputs: vec![current_output(req, index, network)?],
                    ..Default::default()
                },
                (RequestType::TxMeta, None) => TransactionType {
                    version: Some(req.version as u32),
                    lock_time: Some(req.lock_time),
                    inputs_cnt: Some(req.inputs.len() as u32),
                    outputs_cnt: Some(outputs.len() as u32),
                    ..Default::default()
                },

                (RequestType::TxInput, Some(p)) => {
                    let i = p
                        .input
                        .get(index)
                        .ok_or(Error::MalformedResponse("previous input index"))?;

                    TransactionType {
                        inputs: vec![TxInputType {
                            prev_hash: tx_hash(&i.previous_output.txid),
                            prev_index: i.previous_output.vout,
                            script_sig: Some(i.script_sig.to_bytes()),
                            sequence: Some(i.sequence.0),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }
                }
                (RequestType::TxOutput, Some(p)) => {
                    let o = p
                        .output
                        .get(index)
                        .ok_or(Error::MalformedResponse("previous output index"))?;

                    TransactionType {
                        bin_outputs: vec![TxOutputBinType {
                            amount: o.value,
                            script_pubkey: o.script_pubkey.to_bytes(),
                        }],
                        ..Default::default()
                    }
                }
                (RequestType::TxMeta, Some(p)) => TransactionType {
                    version: Some(p.version as u32),
                    lock_time: Some(p.lock_time.to_consensus_u32()),
                    inputs_cnt: Some(p.input.len() as u32),
                    outputs_cnt: Some(p.output.len() as u32),
                    ..Default::default()
                },
            };

            r = self.call(&TxAck { tx: Some(tx) })?;
        }

        let signatures = signatures
            .into_iter()
            .zip(keys)
            .enumerate()
            .map(|(index, (s, public_key))| match s {
                Some(signature) => Ok(InputSignature {
                    index: index as u32,
                    signature,
                    public_key,
                }),
                None => Err(Error::MalformedResponse("missing input signature")),
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.emit(Event::TxStatusChanged {
            device_id: self.device_id.to_string(),
            status: TxStatus::Progress(State::Complete),
        });

        Ok(SignedTx { signatures })
    }
}

/// Resolve a previous transaction from a trezor tx hash
fn supporting_tx<'r>(req: &'r SignRequest, hash: &[u8]) -> Result<&'r Transaction, Error> {
    let mut b: [u8; 32] = hash
        .try_into()
        .map_err(|_| Error::MalformedResponse("tx hash length"))?;
    b.reverse();

    let txid = Txid::from_byte_array(b);
    req.supporting_txs
        .get(&txid)
        .ok_or(Error::MissingSupportingTx(txid))
}

fn current_input(req: &SignRequest, index: usize) -> Result<TxInputType, Error> {
    let i = req
        .inputs
        .get(index)
        .ok_or(Error::MalformedResponse("input index"))?;

    let script_type = match i.purpose() {
        Some(Purpose::NonSegwit) => InputScriptType::SpendAddress,
        Some(Purpose::NestedSegwit) => InputScriptType::SpendP2shWitness,
        Some(Purpose::NativeSegwit) => InputScriptType::SpendWitness,
        None => return Err(Error::InvalidPath),
    };

    Ok(TxInputType {
        address_n: path_indices(&i.path),
        prev_hash: tx_hash(&i.outpoint.txid),
        prev_index: i.outpoint.vout,
        script_sig: None,
        sequence: Some(req.sequence()),
        script_type: Some(script_type as i32),
        amount: Some(i.value),
    })
}

fn current_output(req: &SignRequest, index: usize, network: Network) -> Result<TxOutputType, Error> {
    if let Some(o) = req.recipients.get(index) {
        let address = Address::from_script(&o.script_pubkey, network)
            .map_err(|_| Error::InvalidRequest("recipient script has no address form"))?;

        return Ok(TxOutputType {
            address: Some(address.to_string()),
            address_n: vec![],
            amount: o.value,
            script_type: OutputScriptType::PayToAddress as i32,
        });
    }

    match &req.change {
        Some(c) if index == req.recipients.len() => {
            let script_type = match Purpose::from_path(&c.path) {
                Some(Purpose::NonSegwit) => OutputScriptType::PayToAddress,
                Some(Purpose::NestedSegwit) => OutputScriptType::PayToP2shWitness,
                Some(Purpose::NativeSegwit) => OutputScriptType::PayToWitness,
                None => return Err(Error::InvalidPath),
            };

            Ok(TxOutputType {
                address: None,
                address_n: path_indices(&c.path),
                amount: c.value,
                script_type: script_type as i32,
            })
        }
        _ => Err(Error::MalformedResponse("output index")),
    }
}
