// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Ledger device, running the bitcoin application
//!
//! A connection is opened for each command and closed prior to the worker returning.

use std::sync::Arc;

use bitcoin::bip32::DerivationPath;
use log::debug;

use super::{Connect, Context, DeviceKey, DeviceState};
use crate::{
    event::{emit, Event, TxStatus},
    handle::DeviceHandle,
    key::{KeyNode, WalletInfo},
    transport::Exchange,
    tx::{SignRequest, SignedTx, SigningSession},
    Error,
};

/// Boxed ledger transport
pub type LedgerTransport = Box<dyn Exchange + Send>;

/// Ledger transport connector
pub type LedgerConnector = Arc<dyn Connect<LedgerTransport>>;

/// Ledger signing device
#[derive(Clone)]
pub struct LedgerDevice {
    key: DeviceKey,
    connector: LedgerConnector,
    pub(crate) state: Arc<DeviceState>,
}

impl LedgerDevice {
    pub fn new(key: DeviceKey, connector: LedgerConnector) -> Self {
        Self {
            key,
            connector,
            state: Arc::new(DeviceState::default()),
        }
    }

    pub fn key(&self) -> &DeviceKey {
        &self.key
    }

    /// Run `f` against a freshly connected handle in a blocking worker
    async fn run<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut DeviceHandle<LedgerTransport>) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let cancel = self.state.begin();
        let connector = self.connector.clone();
        let id = self.key.device_id.clone();

        let r = tokio::task::spawn_blocking(move || {
            debug!("Ledger worker start ({})", id);

            let t = connector.connect()?;
            let mut h = DeviceHandle::new(t, cancel);

            let r = f(&mut h);

            // Close the device before returning
            drop(h);

            debug!("Ledger worker done ({}, ok: {})", id, r.is_ok());

            r
        })
        .await
        .map_err(Error::from)
        .and_then(|r| r);

        self.state.finish(&r);

        r
    }

    /// Fetch the public key node for `path`
    pub async fn public_key(&self, _ctx: &Context, path: &DerivationPath) -> Result<KeyNode, Error> {
        let path = path.clone();
        self.run(move |h| h.public_key(&path)).await
    }

    /// Fetch wallet identification keys
    pub async fn wallet_info(&self, ctx: &Context) -> Result<WalletInfo, Error> {
        let network = ctx.config.network();
        let account = ctx.config.account;

        self.run(move |h| h.wallet_info(network, account)).await
    }

    /// Sign a transaction, publishing state transitions as events
    pub async fn sign_transaction(
        &self,
        ctx: &Context,
        req: SignRequest,
    ) -> Result<SignedTx, Error> {
        let events = ctx.events.clone();
        let device_id = self.key.device_id.clone();

        let session = SigningSession::new(req)?.with_observer(Box::new(move |state| {
            emit(
                &events,
                Event::TxStatusChanged {
                    device_id: device_id.clone(),
                    status: TxStatus::Progress(state),
                },
            );
        }));

        self.run(move |h| {
            let mut session = session;
            session.run(h)
        })
        .await
    }

    /// Trip the cancellation token of the active session
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }
}
