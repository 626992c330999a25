// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::Error;

/// Cooperative cancellation token, checked before each device command
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return [Error::Cancelled] if cancellation has been requested
    pub fn check(&self) -> Result<(), Error> {
        match self.is_cancelled() {
            true => Err(Error::Cancelled),
            false => Ok(()),
        }
    }
}
