// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Asynchronous notifications published by the device manager

use strum::Display;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::{
    device::DeviceKey,
    key::{KeyNode, WalletInfo},
    tx::{SignedTx, State},
};

/// Transaction progress reported via [Event::TxStatusChanged]
#[derive(Copy, Clone, PartialEq, Debug, Display)]
pub enum TxStatus {
    /// Signing session transitioned to a new state
    Progress(State),
    /// Device is waiting for the user to confirm on screen
    AwaitingConfirmation,
}

/// Device manager events
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Enumeration completed, replacing the device list
    DevicesChanged(Vec<DeviceKey>),
    /// Public key fetched
    PublicKeyReady { device_id: String, node: KeyNode },
    /// Wallet identification keys fetched
    WalletInfoReady { device_id: String, info: WalletInfo },
    /// Device requires a PIN (see [crate::DeviceManager::set_pin])
    PinRequested { device_id: String },
    /// Device requires a passphrase (see [crate::DeviceManager::set_passphrase])
    PassphraseRequested { device_id: String },
    /// Requested device was not found during preparation
    DeviceNotFound { device_id: String },
    /// Requested device is available for signing
    DeviceReady { device_id: String },
    /// Transaction signing progress
    TxStatusChanged { device_id: String, status: TxStatus },
    /// User rejected the operation on the device
    CancelledOnDevice { device_id: String },
    /// Operation failed
    OperationFailed { device_id: String, reason: String },
    /// Transaction signed
    TxSigned { device_id: String, signed: SignedTx },
    /// Device list is stale and should be refreshed
    RescanRequested,
}

/// Event channel sender
pub type EventSender = UnboundedSender<Event>;

/// Event channel receiver
pub type EventReceiver = UnboundedReceiver<Event>;

/// Publish an event, ignoring closed channels
pub(crate) fn emit(events: &EventSender, e: Event) {
    log::trace!("event: {:?}", e);

    let _ = events.send(e);
}
