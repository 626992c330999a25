// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command line utility for hardware signing devices

use std::path::{Path, PathBuf};

use bitcoin::bip32::DerivationPath;
use clap::Parser;
use log::{debug, error, info, LevelFilter};
use serde::{de::DeserializeOwned, Serialize};

use hw_signer::{
    backend::hid_backends,
    device::DeviceKey,
    event::{Event, EventReceiver},
    tx::SignRequest,
    BusyPolicy, Config, DeviceManager,
};

mod helpers;
use helpers::*;

/// Hardware signer command line utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Configuration file (TOML)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Use testnet derivation and coin names
    #[clap(long)]
    testnet: bool,

    /// Handling of concurrent commands to a busy device
    #[clap(long, value_enum)]
    busy_policy: Option<BusyPolicy>,

    /// Device index (where more than one device is available)
    #[clap(long, default_value = "0")]
    device_index: usize,

    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, PartialEq, Debug, Parser)]
#[non_exhaustive]
enum Actions {
    /// List available devices
    List,

    /// Fetch the public key for a derivation path
    Pubkey {
        /// BIP32 derivation path (eg. m/84'/0'/0'/0/0)
        #[clap(long)]
        path: DerivationPath,
    },

    /// Fetch wallet identification keys
    WalletInfo,

    /// Sign a transaction
    Sign {
        /// Sign request file (JSON)
        #[clap(long)]
        request: String,

        /// Output file for signatures (JSON)
        #[clap(long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default())?;

    // Load configuration, applying overrides
    let mut config = match &args.config {
        Some(p) => Config::from_toml(&tokio::fs::read_to_string(p).await?)?,
        None => Config::default(),
    };
    if args.testnet {
        config.testnet = true;
    }
    if let Some(b) = args.busy_policy {
        config.busy_policy = b;
    }

    debug!("Using config: {:?}", config);

    // Setup device manager
    let (manager, events) = DeviceManager::new(config.clone(), hid_backends(&config)?);

    tokio::spawn(handle_events(manager.clone(), events));

    // List available devices
    let devices = manager.scan().await?;
    if devices.is_empty() {
        return Err(anyhow::anyhow!("No devices found"));
    }

    // Handle list command
    if args.cmd == Actions::List {
        info!("Devices:");
        for (i, d) in devices.iter().enumerate() {
            info!("  {}: {}", i, d);
        }

        return Ok(());
    }

    // Select device by index
    let d = match devices.get(args.device_index) {
        Some(d) => d,
        None => {
            return Err(anyhow::anyhow!(
                "Invalid device index: {} (max: {})",
                args.device_index,
                devices.len() - 1
            ))
        }
    };

    debug!("Using device {}: {}", args.device_index, d);

    if let Err(e) = execute(&manager, d, args.cmd).await {
        error!("Command failed: {}", e);
        manager.release(None).await;
        return Err(e);
    }

    manager.release(None).await;

    Ok(())
}

/// Execute a command against the selected device
async fn execute(manager: &DeviceManager, d: &DeviceKey, cmd: Actions) -> anyhow::Result<()> {
    debug!("Executing command: {:?}", cmd);

    match cmd {
        Actions::Pubkey { path } => {
            info!("requesting public key for path: {}", path);

            let n = manager.public_key(&d.device_id, &path).await?;

            info!("public key: {}", hex::encode(n.public_key));
            info!("chain code: {}", hex::encode(n.chain_code));
            info!("fingerprint: {}", hex::encode(n.parent_fingerprint));
            info!("xpub: {}", n.to_xpub(manager.config().network())?);
        }
        Actions::WalletInfo => {
            info!("requesting wallet info (account: {})", manager.config().account);

            let i = manager.wallet_info(&d.device_id).await?;

            info!("root: {}", i.xpub_root);
            info!("nested segwit: {}", i.xpub_nested_segwit);
            info!("native segwit: {}", i.xpub_native_segwit);
            info!("legacy: {}", i.xpub_legacy);
        }
        Actions::Sign { request, output } => {
            // Read in sign request
            let f: SignRequestFile = read_input(&request).await?;
            let req = SignRequest::try_from(f)?;

            debug!(
                "Signing transaction ({} inputs, {} recipients)",
                req.inputs.len(),
                req.recipients.len()
            );

            let signed = manager.sign_transaction(&d.device_id, req).await?;
            let resp = SignedTxFile::try_from(&signed)?;

            match output {
                Some(o) => write_output(&o, &resp).await?,
                None => info!("{}", serde_json::to_string_pretty(&resp)?),
            }
        }
        Actions::List => (),
    }

    Ok(())
}

/// Log events and prompt for PIN / passphrase entry where requested
async fn handle_events(manager: DeviceManager, mut events: EventReceiver) {
    while let Some(e) = events.recv().await {
        match e {
            Event::PinRequested { device_id } => {
                let r = match prompt("Enter PIN (matrix positions): ").await {
                    Ok(pin) => manager.set_pin(&device_id, &pin),
                    Err(e) => {
                        error!("Failed to read PIN: {}", e);
                        continue;
                    }
                };
                if let Err(e) = r {
                    error!("Failed to set PIN: {}", e);
                }
            }
            Event::PassphraseRequested { device_id } => {
                let r = match prompt("Enter passphrase (empty for on-device entry): ").await {
                    Ok(p) => manager.set_passphrase(&device_id, &p, p.is_empty()),
                    Err(e) => {
                        error!("Failed to read passphrase: {}", e);
                        continue;
                    }
                };
                if let Err(e) = r {
                    error!("Failed to set passphrase: {}", e);
                }
            }
            Event::TxStatusChanged { status, .. } => info!("tx status: {}", status),
            Event::CancelledOnDevice { device_id } => info!("cancelled on device {}", device_id),
            e => debug!("event: {:?}", e),
        }
    }
}

/// Read a line from stdin
async fn prompt(msg: &'static str) -> anyhow::Result<String> {
    let s = tokio::task::spawn_blocking(move || {
        eprint!("{}", msg);

        let mut s = String::new();
        std::io::stdin().read_line(&mut s).map(|_| s)
    })
    .await??;

    Ok(s.trim_end_matches(['\r', '\n']).to_string())
}

/// Helper to read input files where required
async fn read_input<T: DeserializeOwned>(file_name: &str) -> anyhow::Result<T> {
    debug!("Reading input from '{}'", file_name);

    let s = tokio::fs::read_to_string(file_name).await?;

    // Determine format from file name
    let p = Path::new(file_name);

    // Decode based on input extension
    let v = match p.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&s)?,
        _ => return Err(anyhow::anyhow!("unsupported input file format")),
    };

    Ok(v)
}

/// Helper to write output files if `--output` argument is provided
async fn write_output(file_name: &str, value: &impl Serialize) -> anyhow::Result<()> {
    debug!("Writing output to '{}'", file_name);

    // Determine format from file name
    let p = Path::new(file_name);
    match p.extension().and_then(|e| e.to_str()) {
        // Encode to JSON for `.json` files
        Some("json") => {
            let s = serde_json::to_string(value)?;
            tokio::fs::write(p, s).await?;
        }
        _ => return Err(anyhow::anyhow!("unsupported output file format")),
    }

    Ok(())
}
