// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Signing device abstraction
//!
//! [Device] provides a closed set of capabilities over supported device
//! types. Device I/O is blocking and executed in dedicated
//! [tokio::task::spawn_blocking] workers, callers are expected to serialise
//! access per device (see [crate::DeviceManager]).

use std::{
    hash::{Hash, Hasher},
    sync::{Mutex, MutexGuard},
};

use bitcoin::bip32::DerivationPath;
use serde::{Deserialize, Serialize};

use crate::{
    cancel::CancelToken,
    event::EventSender,
    key::{KeyNode, WalletInfo},
    tx::{SignRequest, SignedTx},
    Config, Error,
};

mod ledger;
pub use ledger::*;

mod trezor;
pub use trezor::*;

mod pending;
pub use pending::*;

/// Supported device types
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Ledger,
    Trezor,
}

/// Device identification, equality and hashing use `device_id` only
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceKey {
    pub label: String,
    pub vendor: String,
    pub device_id: String,
    pub device_type: DeviceType,
}

impl PartialEq for DeviceKey {
    fn eq(&self, other: &Self) -> bool {
        self.device_id == other.device_id
    }
}

impl Eq for DeviceKey {}

impl Hash for DeviceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.device_id.hash(state)
    }
}

impl std::fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:16} ({}, {}, {})",
            self.label, self.device_type, self.vendor, self.device_id
        )
    }
}

/// Open a transport to a device, called from blocking workers
pub trait Connect<T>: Send + Sync {
    fn connect(&self) -> Result<T, Error>;
}

/// Context for device operations
#[derive(Clone, Debug)]
pub struct Context {
    pub config: Config,
    pub events: EventSender,
}

/// Device state shared between the manager and blocking workers
#[derive(Default)]
pub(crate) struct DeviceState {
    active: Mutex<Option<CancelToken>>,
    last_error: Mutex<Option<String>>,
}

impl DeviceState {
    /// Start an operation, returning the token for cancellation
    pub(crate) fn begin(&self) -> CancelToken {
        let t = CancelToken::new();
        *lock(&self.active) = Some(t.clone());
        t
    }

    /// Complete an operation, recording any failure
    pub(crate) fn finish<R>(&self, r: &Result<R, Error>) {
        *lock(&self.active) = None;
        if let Err(e) = r {
            *lock(&self.last_error) = Some(e.to_string());
        }
    }

    /// Trip the active cancellation token, if any
    pub(crate) fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(t) => {
                t.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        lock(&self.active).is_some()
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }
}

/// Lock a std mutex, recovering the guard where a worker panicked
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Signing device
#[derive(Clone)]
pub enum Device {
    Ledger(LedgerDevice),
    Trezor(TrezorDevice),
}

impl Device {
    /// Fetch device identification
    pub fn key(&self) -> &DeviceKey {
        match self {
            Device::Ledger(d) => d.key(),
            Device::Trezor(d) => d.key(),
        }
    }

    /// Fetch the public key node for `path`
    pub async fn public_key(&self, ctx: &Context, path: &DerivationPath) -> Result<KeyNode, Error> {
        match self {
            Device::Ledger(d) => d.public_key(ctx, path).await,
            Device::Trezor(d) => d.public_key(ctx, path).await,
        }
    }

    /// Fetch wallet identification keys
    pub async fn wallet_info(&self, ctx: &Context) -> Result<WalletInfo, Error> {
        let mut info = match self {
            Device::Ledger(d) => d.wallet_info(ctx).await?,
            Device::Trezor(d) => d.wallet_info(ctx).await?,
        };

        let k = self.key();
        info.vendor = k.vendor.clone();
        info.label = k.label.clone();
        info.device_id = k.device_id.clone();

        Ok(info)
    }

    /// Sign a transaction
    pub async fn sign_transaction(
        &self,
        ctx: &Context,
        req: SignRequest,
    ) -> Result<SignedTx, Error> {
        match self {
            Device::Ledger(d) => d.sign_transaction(ctx, req).await,
            Device::Trezor(d) => d.sign_transaction(ctx, req).await,
        }
    }

    /// Provide a matrix-encoded PIN for a pending request
    pub fn set_matrix_pin(&self, pin: &str) -> Result<(), Error> {
        match self {
            Device::Ledger(_) => Err(Error::Unsupported("ledger")),
            Device::Trezor(d) => d.set_matrix_pin(pin),
        }
    }

    /// Provide a passphrase (or request on-device entry) for a pending request
    pub fn set_passphrase(&self, passphrase: &str, on_device: bool) -> Result<(), Error> {
        match self {
            Device::Ledger(_) => Err(Error::Unsupported("ledger")),
            Device::Trezor(d) => d.set_passphrase(passphrase, on_device),
        }
    }

    /// Cancel any active operation (best effort)
    pub fn cancel(&self) -> bool {
        match self {
            Device::Ledger(d) => d.cancel(),
            Device::Trezor(d) => d.cancel(),
        }
    }

    /// Check whether the device is waiting on user input
    pub fn is_blocked(&self) -> bool {
        match self {
            Device::Ledger(_) => false,
            Device::Trezor(d) => d.is_blocked(),
        }
    }

    /// Check whether an operation is in progress
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Fetch the most recent error for this device
    pub fn last_error(&self) -> Option<String> {
        self.state().last_error()
    }

    /// Release held device resources
    pub fn release(&self) {
        match self {
            Device::Ledger(_) => (),
            Device::Trezor(d) => d.release(),
        }
    }

    fn state(&self) -> &DeviceState {
        match self {
            Device::Ledger(d) => &d.state,
            Device::Trezor(d) => &d.state,
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Device({:?})", self.key())
    }
}
