// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction signing state machine
//!
//! A [SigningSession] turns a [SignRequest] into the ordered sequence of device
//! commands required to sign each input, for legacy or segwit inputs.
//!
//! ```text
//! Idle -> TrustedInputCollection -> UntrustedTxInit -> OutputFinalize -> InputSigning -> Complete
//!                                         ^                                   |
//!                                         +-----------------------------------+ (per input)
//! ```
//!
//! Any error moves the session to `Failed` (or `Cancelled`), no partial signatures are returned.

use bitcoin::{consensus::encode::serialize, OutPoint};
use log::{debug, warn};
use strum::{Display, EnumIter, EnumString};

use hw_signer_apdu::tx::{HashSignReq, HashSignResp};

use crate::{
    handle::DeviceHandle,
    key::{path_indices, KeyNode},
    transport::Exchange,
    Error,
};

mod request;
pub use request::*;

mod result;
pub use result::*;

mod legacy;
mod outputs;
mod segwit;

/// Signing session state
#[derive(Copy, Clone, PartialEq, Debug, EnumString, Display, EnumIter)]
pub enum State {
    Idle,
    TrustedInputCollection,
    UntrustedTxInit,
    OutputFinalize,
    InputSigning,
    Complete,
    Failed,
    Cancelled,
}

impl State {
    /// Check whether the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Complete | State::Failed | State::Cancelled)
    }
}

/// Session progress used to compute transitions
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Progress {
    /// Number of inputs signed
    pub signed: usize,
    /// Total number of inputs
    pub inputs: usize,
    /// Outputs have been finalised at least once
    pub finalized: bool,
}

/// Compute the next state following successful completion of `state`
pub fn next_state(variant: Variant, state: State, p: &Progress) -> State {
    use State::*;

    match (variant, state) {
        (_, Idle) => TrustedInputCollection,
        (_, TrustedInputCollection) => UntrustedTxInit,

        // Legacy transactions are hashed in full for each input
        (Variant::Legacy, UntrustedTxInit) => OutputFinalize,
        (Variant::Legacy, OutputFinalize) => InputSigning,

        // Segwit transactions are hashed in full once, then per input
        (Variant::Segwit, UntrustedTxInit) if !p.finalized => OutputFinalize,
        (Variant::Segwit, UntrustedTxInit) => InputSigning,
        (Variant::Segwit, OutputFinalize) => UntrustedTxInit,

        (_, InputSigning) if p.signed < p.inputs => UntrustedTxInit,
        (_, InputSigning) => Complete,

        (_, s) => s,
    }
}

/// Input reference token, one per input per session
#[derive(Clone, PartialEq, Debug)]
pub struct TrustedInput(Vec<u8>);

impl TrustedInput {
    /// Wrap a device issued trusted input
    pub fn new(d: Vec<u8>) -> Self {
        Self(d)
    }

    /// Build a segwit input reference (`txid | vout LE | value LE`)
    pub fn segwit(outpoint: &OutPoint, value: u64) -> Self {
        let mut d = serialize(outpoint);
        d.extend_from_slice(&value.to_le_bytes());
        Self(d)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Callback receiving state transitions
pub type Observer = Box<dyn FnMut(State) + Send>;

/// Transaction signing session
pub struct SigningSession {
    request: SignRequest,
    variant: Variant,
    state: State,
    trusted: Vec<TrustedInput>,
    nodes: Vec<KeyNode>,
    signatures: Vec<InputSignature>,
    finalized: bool,
    observer: Option<Observer>,
}

impl SigningSession {
    /// Create a new session, validating the request and selecting the signing variant
    pub fn new(request: SignRequest) -> Result<Self, Error> {
        request.validate()?;
        let variant = request.variant()?;

        Ok(Self {
            variant,
            state: State::Idle,
            trusted: Vec::with_capacity(request.inputs.len()),
            nodes: Vec::with_capacity(request.inputs.len()),
            signatures: Vec::with_capacity(request.inputs.len()),
            finalized: false,
            observer: None,
            request,
        })
    }

    /// Attach an observer for state transitions
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    fn progress(&self) -> Progress {
        Progress {
            signed: self.signatures.len(),
            inputs: self.request.inputs.len(),
            finalized: self.finalized,
        }
    }

    fn transition(&mut self, next: State) {
        debug!("tx state: {} -> {}", self.state, next);

        self.state = next;
        if let Some(o) = self.observer.as_mut() {
            o(next);
        }
    }

    /// Execute the session against a device handle
    ///
    /// On failure the session moves to `Failed` (or `Cancelled`) and no signatures are returned.
    pub fn run<T: Exchange>(&mut self, h: &mut DeviceHandle<T>) -> Result<SignedTx, Error> {
        if self.state != State::Idle {
            return Err(Error::InvalidRequest("session already executed"));
        }

        match self.drive(h) {
            Ok(tx) => Ok(tx),
            Err(e) => {
                warn!("tx signing aborted in state {}: {}", self.state, e);

                self.signatures.clear();
                match e.is_cancellation() {
                    true => self.transition(State::Cancelled),
                    false => self.transition(State::Failed),
                }

                Err(e)
            }
        }
    }

    fn drive<T: Exchange>(&mut self, h: &mut DeviceHandle<T>) -> Result<SignedTx, Error> {
        loop {
            let next = next_state(self.variant, self.state, &self.progress());
            self.transition(next);

            match (self.variant, self.state) {
                (_, State::TrustedInputCollection) => self.collect_inputs(h)?,

                (Variant::Legacy, State::UntrustedTxInit) => {
                    let index = self.signatures.len();
                    legacy::start_input(h, &self.request, &self.trusted, index)?;
                }
                (Variant::Segwit, State::UntrustedTxInit) if !self.finalized => {
                    segwit::start_all(h, &self.request, &self.trusted)?;
                }
                (Variant::Segwit, State::UntrustedTxInit) => {
                    let index = self.signatures.len();
                    segwit::start_input(h, &self.request, &self.trusted, &self.nodes, index)?;
                }

                (_, State::OutputFinalize) => {
                    outputs::finalize(h, &self.request, !self.finalized)?;
                    self.finalized = true;
                }

                (_, State::InputSigning) => {
                    let index = self.signatures.len();
                    let signature = self.sign_input(h, index)?;

                    self.signatures.push(InputSignature {
                        index: index as u32,
                        signature,
                        public_key: self.nodes[index].public_key,
                    });
                }

                (_, State::Complete) => {
                    return Ok(SignedTx {
                        signatures: self.signatures.clone(),
                    })
                }

                (_, s) => {
                    warn!("unexpected tx state: {}", s);
                    return Err(Error::InvalidRequest("invalid session state"));
                }
            }
        }
    }

    /// Fetch key nodes and trusted inputs for each input
    fn collect_inputs<T: Exchange>(&mut self, h: &mut DeviceHandle<T>) -> Result<(), Error> {
        for (i, input) in self.request.inputs.iter().enumerate() {
            let node = h.public_key(&input.path)?;

            let trusted = match self.variant {
                Variant::Legacy => {
                    let txid = input.outpoint.txid;
                    let prev = self
                        .request
                        .supporting_txs
                        .get(&txid)
                        .ok_or(Error::MissingSupportingTx(txid))?;

                    h.trusted_input(prev, input.outpoint.vout)?
                }
                Variant::Segwit => {
                    segwit::check_input(input, &node, i)?;
                    TrustedInput::segwit(&input.outpoint, input.value)
                }
            };

            self.nodes.push(node);
            self.trusted.push(trusted);
        }

        Ok(())
    }

    fn sign_input<T: Exchange>(
        &self,
        h: &mut DeviceHandle<T>,
        index: usize,
    ) -> Result<Vec<u8>, Error> {
        let input = &self.request.inputs[index];

        debug!("Signing input {} ({})", index, input.path);

        let req = HashSignReq::new(&path_indices(&input.path), self.request.lock_time);
        let resp: HashSignResp = h.request_decode(&req)?;

        Ok(resp.signature)
    }
}
