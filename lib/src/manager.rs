// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device manager
//!
//! Owns the device list, serialises access per device and publishes
//! [Event]s for completed operations.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};

use bitcoin::bip32::DerivationPath;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use tokio::sync::{mpsc, OwnedMutexGuard};

use crate::{
    backend::Backend,
    config::BusyPolicy,
    device::{lock, Context, Device, DeviceKey},
    event::{emit, Event, EventReceiver},
    key::{KeyNode, WalletInfo},
    tx::{SignRequest, SignedTx},
    Config, Error,
};

/// Join barrier for concurrent backend scans
///
/// Completes once every backend has reported, a repeated report from a
/// backend replaces the previous result and is not counted twice.
#[derive(Debug)]
pub struct ScanBarrier<T> {
    slots: Vec<Option<Vec<T>>>,
}

impl<T> ScanBarrier<T> {
    /// Create a barrier for `backends` reporters
    pub fn new(backends: usize) -> Self {
        Self {
            slots: (0..backends).map(|_| None).collect(),
        }
    }

    /// Record the results for a backend, returning true once all have reported
    pub fn report(&mut self, backend: usize, found: Vec<T>) -> bool {
        match self.slots.get_mut(backend) {
            Some(s) => *s = Some(found),
            None => warn!("scan report from unknown backend {}", backend),
        }

        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    /// Number of backends yet to report
    pub fn remaining(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Merge results in backend order
    pub fn finish(self) -> Vec<T> {
        self.slots.into_iter().flatten().flatten().collect()
    }
}

struct Inner {
    ctx: Context,
    backends: Vec<Arc<dyn Backend>>,
    devices: Mutex<Vec<Device>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    scanning: tokio::sync::Mutex<()>,
    last_error: Mutex<Option<String>>,
}

/// Device manager, cheaply cloneable
#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<Inner>,
}

impl DeviceManager {
    /// Create a manager over the provided backends, returning the event receiver
    pub fn new(config: Config, backends: Vec<Arc<dyn Backend>>) -> (Self, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();

        let inner = Inner {
            ctx: Context { config, events },
            backends,
            devices: Mutex::new(vec![]),
            locks: Mutex::new(HashMap::new()),
            scanning: tokio::sync::Mutex::new(()),
            last_error: Mutex::new(None),
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    pub fn config(&self) -> &Config {
        &self.inner.ctx.config
    }

    /// Enumerate devices on all backends, updating the device list
    ///
    /// Devices already known are retained, new devices are added and
    /// devices that no longer enumerate are dropped.
    pub async fn scan(&self) -> Result<Vec<DeviceKey>, Error> {
        let _scan = self.inner.scanning.try_lock().map_err(|_| Error::Busy)?;

        let backends = &self.inner.backends;
        debug!("Scanning {} backends", backends.len());

        let mut scans: FuturesUnordered<_> = backends
            .iter()
            .enumerate()
            .map(|(i, b)| async move {
                match b.scan().await {
                    Ok(v) => (i, v),
                    Err(e) => {
                        warn!("{} scan failed: {}", b.device_type(), e);
                        (i, vec![])
                    }
                }
            })
            .collect();

        let mut barrier = ScanBarrier::new(backends.len());
        while !barrier.is_complete() {
            match scans.next().await {
                Some((i, found)) => {
                    barrier.report(i, found);
                }
                None => {
                    warn!("scan aborted with {} backends pending", barrier.remaining());
                    break;
                }
            }
        }

        let found = barrier.finish();
        let keys: Vec<_> = found.iter().map(|d| d.key().clone()).collect();

        debug!("Found {} devices: {:?}", keys.len(), keys);

        {
            let mut devices = lock(&self.inner.devices);

            // Devices still present keep their state and any pending interaction
            let mut current: HashMap<_, _> = devices
                .drain(..)
                .map(|d| (d.key().device_id.clone(), d))
                .collect();
            *devices = found
                .into_iter()
                .map(|d| current.remove(&d.key().device_id).unwrap_or(d))
                .collect();

            for id in current.keys() {
                debug!("Device {} removed", id);
            }
        }

        self.prune_locks(&keys);

        emit(&self.inner.ctx.events, Event::DevicesChanged(keys.clone()));

        Ok(keys)
    }

    /// Fetch the current device list
    pub fn devices(&self) -> Vec<DeviceKey> {
        lock(&self.inner.devices)
            .iter()
            .map(|d| d.key().clone())
            .collect()
    }

    fn device(&self, id: &str) -> Result<Device, Error> {
        lock(&self.inner.devices)
            .iter()
            .find(|d| d.key().device_id == id)
            .cloned()
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))
    }

    fn device_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.inner.locks)
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Drop per-device locks for devices no longer present and not in use
    fn prune_locks(&self, keys: &[DeviceKey]) {
        lock(&self.inner.locks).retain(|id, l| {
            Arc::strong_count(l) > 1 || keys.iter().any(|k| &k.device_id == id)
        });
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        lock(&self.inner.locks).len()
    }

    /// Acquire exclusive access to a device per the configured busy policy
    async fn acquire(&self, id: &str) -> Result<OwnedMutexGuard<()>, Error> {
        let l = self.device_lock(id);

        match self.inner.ctx.config.busy_policy {
            BusyPolicy::Reject => l.try_lock_owned().map_err(|_| Error::Busy),
            BusyPolicy::Queue => Ok(l.lock_owned().await),
        }
    }

    /// Execute an operation with exclusive device access, publishing failures
    async fn with_device<F, Fut, R>(&self, id: &str, f: F) -> Result<R, Error>
    where
        F: FnOnce(Device, Context) -> Fut,
        Fut: Future<Output = Result<R, Error>>,
    {
        let device = match self.device(id) {
            Ok(d) => d,
            Err(e) => {
                emit(&self.inner.ctx.events, Event::RescanRequested);
                return Err(e);
            }
        };

        let _guard = self.acquire(id).await?;

        let r = f(device, self.inner.ctx.clone()).await;

        if let Err(e) = &r {
            warn!("Operation on {} failed: {}", id, e);

            *lock(&self.inner.last_error) = Some(e.to_string());

            let device_id = id.to_string();
            let event = match e {
                Error::CancelledByUser => Event::CancelledOnDevice { device_id },
                _ => Event::OperationFailed {
                    device_id,
                    reason: e.to_string(),
                },
            };
            emit(&self.inner.ctx.events, event);
        }

        r
    }

    /// Fetch the public key node for `path`
    pub async fn public_key(&self, id: &str, path: &DerivationPath) -> Result<KeyNode, Error> {
        let node = self
            .with_device(id, |d, ctx| async move { d.public_key(&ctx, path).await })
            .await?;

        emit(
            &self.inner.ctx.events,
            Event::PublicKeyReady {
                device_id: id.to_string(),
                node: node.clone(),
            },
        );

        Ok(node)
    }

    /// Fetch wallet identification keys
    pub async fn wallet_info(&self, id: &str) -> Result<WalletInfo, Error> {
        let info = self
            .with_device(id, |d, ctx| async move { d.wallet_info(&ctx).await })
            .await?;

        emit(
            &self.inner.ctx.events,
            Event::WalletInfoReady {
                device_id: id.to_string(),
                info: info.clone(),
            },
        );

        Ok(info)
    }

    /// Sign a transaction
    pub async fn sign_transaction(&self, id: &str, req: SignRequest) -> Result<SignedTx, Error> {
        let signed = self
            .with_device(id, |d, ctx| async move {
                d.sign_transaction(&ctx, req).await
            })
            .await?;

        emit(
            &self.inner.ctx.events,
            Event::TxSigned {
                device_id: id.to_string(),
                signed: signed.clone(),
            },
        );

        Ok(signed)
    }

    /// Provide a PIN to a device awaiting one
    pub fn set_pin(&self, id: &str, pin: &str) -> Result<(), Error> {
        self.device(id)?.set_matrix_pin(pin)
    }

    /// Provide a passphrase (or select on-device entry) to a device awaiting one
    pub fn set_passphrase(&self, id: &str, passphrase: &str, on_device: bool) -> Result<(), Error> {
        self.device(id)?.set_passphrase(passphrase, on_device)
    }

    /// Cancel the active operation on a device then release it
    pub async fn cancel(&self, id: &str) -> Result<(), Error> {
        let d = self.device(id)?;

        let active = d.cancel();
        debug!("Cancelling {} (active: {})", id, active);

        self.release_device(&d).await;

        Ok(())
    }

    /// Release a device (or all devices), waiting for any active operation to finish
    pub async fn release(&self, id: Option<&str>) {
        let devices = match id {
            Some(id) => self.device(id).into_iter().collect(),
            None => lock(&self.inner.devices).clone(),
        };

        for d in &devices {
            self.release_device(d).await;
        }
    }

    async fn release_device(&self, d: &Device) {
        let _guard = self.device_lock(&d.key().device_id).lock_owned().await;
        d.release();
    }

    /// Rescan and report whether a device is available
    pub async fn prepare(&self, id: &str) -> bool {
        if let Err(e) = self.scan().await {
            warn!("Scan failed: {}", e);
        }

        let found = self.device(id).is_ok();
        let device_id = id.to_string();

        emit(
            &self.inner.ctx.events,
            match found {
                true => Event::DeviceReady { device_id },
                false => Event::DeviceNotFound { device_id },
            },
        );

        found
    }

    /// Check whether a device is waiting on user input (PIN or passphrase)
    pub fn awaiting_user_action(&self, id: &str) -> bool {
        self.device(id).map(|d| d.is_blocked()).unwrap_or(false)
    }

    /// Fetch the most recent operation error
    pub fn last_device_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    /// Fetch the most recent error for a specific device
    pub fn device_error(&self, id: &str) -> Option<String> {
        self.device(id).ok().and_then(|d| d.last_error())
    }
}
