// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Correlation table for device requests awaiting user input
//!
//! Entries are registered when a device asks for a PIN or passphrase and are
//! resolved exactly once, dropping the table (or an entry) wakes the waiting
//! worker with an error.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use strum::Display;
use tokio::sync::oneshot;
use zeroize::Zeroizing;

use super::lock;
use crate::Error;

/// Kind of pending request
#[derive(Copy, Clone, PartialEq, Debug, Display)]
pub enum PendingKind {
    Pin,
    Passphrase,
}

/// User response to a pending request
#[derive(Clone, PartialEq)]
pub enum PendingReply {
    Pin(Zeroizing<String>),
    Passphrase {
        passphrase: Zeroizing<String>,
        on_device: bool,
    },
}

impl PendingReply {
    fn kind(&self) -> PendingKind {
        match self {
            PendingReply::Pin(_) => PendingKind::Pin,
            PendingReply::Passphrase { .. } => PendingKind::Passphrase,
        }
    }
}

impl core::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PendingReply::{}", self.kind())
    }
}

struct Pending {
    kind: PendingKind,
    reply: oneshot::Sender<PendingReply>,
}

/// Pending request table, shared between a device worker and the manager
#[derive(Clone, Default)]
pub struct PendingTable {
    next_id: Arc<AtomicU64>,
    entries: Arc<Mutex<BTreeMap<u64, Pending>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request, returning its id and the reply receiver
    pub fn register(&self, kind: PendingKind) -> (u64, oneshot::Receiver<PendingReply>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        lock(&self.entries).insert(id, Pending { kind, reply: tx });

        (id, rx)
    }

    /// Resolve the oldest pending request matching the reply kind
    pub fn resolve(&self, reply: PendingReply) -> Result<u64, Error> {
        let kind = reply.kind();

        let mut entries = lock(&self.entries);
        let id = entries
            .iter()
            .find(|(_, p)| p.kind == kind)
            .map(|(id, _)| *id)
            .ok_or(Error::NotAwaiting)?;

        let p = entries.remove(&id).ok_or(Error::NotAwaiting)?;

        // Receiver dropped where the worker has already exited
        p.reply.send(reply).map_err(|_| Error::NotAwaiting)?;

        Ok(id)
    }

    /// Remove a request without resolving it
    pub fn remove(&self, id: u64) {
        lock(&self.entries).remove(&id);
    }

    /// Check whether any request is awaiting user input
    pub fn is_awaiting(&self) -> bool {
        !lock(&self.entries).is_empty()
    }

    /// Drop all pending requests, waking waiting workers with an error
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}
