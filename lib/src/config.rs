// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device manager configuration

use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// Policy for commands issued to a device with an operation in progress
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize, clap::ValueEnum, strum::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Fail immediately with [crate::Error::Busy]
    #[default]
    Reject,
    /// Wait for the active operation, commands execute in submission order
    Queue,
}

/// Device manager configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Use testnet derivation paths / coin names
    pub testnet: bool,

    /// Handling of concurrent commands to the same device
    pub busy_policy: BusyPolicy,

    /// HID read timeout (per report)
    pub read_timeout_ms: u64,

    /// Account index for wallet info derivation
    pub account: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            testnet: false,
            busy_policy: BusyPolicy::Reject,
            read_timeout_ms: 60_000,
            account: 0,
        }
    }
}

impl Config {
    /// Parse configuration from TOML
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Fetch the bitcoin network for the configuration
    pub fn network(&self) -> Network {
        match self.testnet {
            true => Network::Testnet,
            false => Network::Bitcoin,
        }
    }
}
