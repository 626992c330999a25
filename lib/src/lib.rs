// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Hardware signer API Library (and CLI)
//!
//! Provides key export and bitcoin transaction signing over Ledger
//! (APDU over HID) and Trezor (protobuf over HID) devices.
//!
//! - [DeviceHandle] drives the ledger bitcoin application over an [transport::Exchange] transport
//! - [tx::SigningSession] implements the ledger transaction signing flows
//! - [device::Device] abstracts over supported device types
//! - [DeviceManager] enumerates devices via [backend::Backend]s, serialises
//!   per-device access and publishes [event::Event]s
//!
//! ```no_run
//! # async fn example() -> Result<(), hw_signer::Error> {
//! use hw_signer::{backend::hid_backends, Config, DeviceManager};
//!
//! let config = Config::default();
//! let (manager, mut events) = DeviceManager::new(config.clone(), hid_backends(&config)?);
//!
//! for d in manager.scan().await? {
//!     let info = manager.wallet_info(&d.device_id).await?;
//!     println!("{}: {}", d, info.xpub_root);
//! }
//!
//! while let Ok(e) = events.try_recv() {
//!     println!("{:?}", e);
//! }
//! # Ok(())
//! # }
//! ```

/// Re-export `hw-signer-apdu` for consumers
pub use hw_signer_apdu::{self as apdu};

pub mod backend;

pub mod cancel;

mod config;
pub use config::{BusyPolicy, Config};

pub mod device;

mod error;
pub use error::Error;

pub mod event;

mod handle;
pub use handle::DeviceHandle;

pub mod key;

mod manager;
pub use manager::{DeviceManager, ScanBarrier};

/// Re-export transports for consumer use
pub mod transport;

pub mod tx;
