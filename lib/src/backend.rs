// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device discovery backends
//!
//! Each [Backend] enumerates devices of a single type, the [crate::DeviceManager]
//! fans out to all configured backends on scan.

use async_trait::async_trait;

use crate::{
    device::{Device, DeviceType},
    Error,
};

#[cfg(feature = "transport_hid")]
pub use hid::*;

/// Device discovery backend
#[async_trait]
pub trait Backend: Send + Sync {
    /// Type of devices discovered by this backend
    fn device_type(&self) -> DeviceType;

    /// Enumerate connected devices
    async fn scan(&self) -> Result<Vec<Device>, Error>;
}

#[cfg(feature = "transport_hid")]
mod hid {
    use std::{
        ffi::CString,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use hidapi::{DeviceInfo, HidApi, HidDevice};
    use log::debug;

    use hw_signer_apdu::trezor::{TREZOR_ONE_PID, TREZOR_VID};

    use super::Backend;
    use crate::{
        device::{
            lock, Connect, Device, DeviceKey, DeviceType, LedgerConnector, LedgerDevice,
            LedgerTransport, TrezorConnector, TrezorDevice, TrezorTransport,
        },
        transport::{LedgerHid, TrezorHid},
        Config, Error,
    };

    /// Ledger USB vendor ID
    pub const LEDGER_VID: u16 = 0x2c97;

    /// Ledger HID usage page
    pub const LEDGER_USAGE_PAGE: u16 = 0xffa0;

    /// Shared HID context
    ///
    /// NOTE: only one context may exist at a time (workaround for global HID context errors on macos/m1)
    pub type HidContext = Arc<Mutex<HidApi>>;

    /// Create a shared HID context
    pub fn hid_context() -> Result<HidContext, Error> {
        let api = HidApi::new().map_err(|e| {
            debug!("HID init failed: {:?}", e);
            Error::HidInit
        })?;

        Ok(Arc::new(Mutex::new(api)))
    }

    /// Create HID backends for all supported device types
    pub fn hid_backends(config: &Config) -> Result<Vec<Arc<dyn Backend>>, Error> {
        let ctx = hid_context()?;

        Ok(vec![
            Arc::new(LedgerBackend::new(ctx.clone(), config)),
            Arc::new(TrezorBackend::new(ctx, config)),
        ])
    }

    /// Opens HID devices by path
    struct HidConnector {
        api: HidContext,
        path: CString,
        timeout_ms: u64,
    }

    impl HidConnector {
        fn open(&self) -> Result<HidDevice, Error> {
            let api = lock(&self.api);

            api.open_path(&self.path).map_err(|e| {
                debug!("Failed to open {:?}: {:?}", self.path, e);
                Error::NoDevice
            })
        }
    }

    impl Connect<LedgerTransport> for HidConnector {
        fn connect(&self) -> Result<LedgerTransport, Error> {
            Ok(Box::new(LedgerHid::new(self.open()?, self.timeout_ms)))
        }
    }

    impl Connect<TrezorTransport> for HidConnector {
        fn connect(&self) -> Result<TrezorTransport, Error> {
            Ok(Box::new(TrezorHid::new(self.open()?, self.timeout_ms)))
        }
    }

    fn device_key(d: &DeviceInfo, device_type: DeviceType) -> DeviceKey {
        DeviceKey {
            label: d.product_string().unwrap_or("UNKNOWN").to_string(),
            vendor: d
                .manufacturer_string()
                .unwrap_or(match device_type {
                    DeviceType::Ledger => "Ledger",
                    DeviceType::Trezor => "SatoshiLabs",
                })
                .to_string(),
            // Paths are unique per connected device, unlike serial numbers
            device_id: d.path().to_string_lossy().to_string(),
            device_type,
        }
    }

    /// Refresh and filter the HID device list
    async fn enumerate<F>(api: &HidContext, filter: F) -> Result<Vec<(DeviceKey, CString)>, Error>
    where
        F: Fn(&DeviceInfo) -> Option<DeviceType> + Send + 'static,
    {
        let api = api.clone();

        tokio::task::spawn_blocking(move || {
            let mut api = lock(&api);
            api.refresh_devices()?;

            let devices: Vec<_> = api
                .device_list()
                .filter_map(|d| filter(d).map(|t| (device_key(d, t), d.path().to_owned())))
                .collect();

            Ok::<_, Error>(devices)
        })
        .await?
    }

    /// Ledger HID backend
    pub struct LedgerBackend {
        api: HidContext,
        timeout_ms: u64,
    }

    impl LedgerBackend {
        pub fn new(api: HidContext, config: &Config) -> Self {
            Self {
                api,
                timeout_ms: config.read_timeout_ms,
            }
        }
    }

    #[async_trait]
    impl Backend for LedgerBackend {
        fn device_type(&self) -> DeviceType {
            DeviceType::Ledger
        }

        async fn scan(&self) -> Result<Vec<Device>, Error> {
            let found = enumerate(&self.api, |d| {
                let ledger = d.vendor_id() == LEDGER_VID
                    && (d.usage_page() == LEDGER_USAGE_PAGE || d.interface_number() == 0);
                ledger.then_some(DeviceType::Ledger)
            })
            .await?;

            debug!("Found {} ledger devices", found.len());

            Ok(found
                .into_iter()
                .map(|(key, path)| {
                    let c: LedgerConnector = Arc::new(HidConnector {
                        api: self.api.clone(),
                        path,
                        timeout_ms: self.timeout_ms,
                    });
                    Device::Ledger(LedgerDevice::new(key, c))
                })
                .collect())
        }
    }

    /// Trezor One HID backend
    pub struct TrezorBackend {
        api: HidContext,
        timeout_ms: u64,
    }

    impl TrezorBackend {
        pub fn new(api: HidContext, config: &Config) -> Self {
            Self {
                api,
                timeout_ms: config.read_timeout_ms,
            }
        }
    }

    #[async_trait]
    impl Backend for TrezorBackend {
        fn device_type(&self) -> DeviceType {
            DeviceType::Trezor
        }

        async fn scan(&self) -> Result<Vec<Device>, Error> {
            // Interface 1 is the debug link
            let found = enumerate(&self.api, |d| {
                let trezor = d.vendor_id() == TREZOR_VID
                    && d.product_id() == TREZOR_ONE_PID
                    && d.interface_number() <= 0;
                trezor.then_some(DeviceType::Trezor)
            })
            .await?;

            debug!("Found {} trezor devices", found.len());

            Ok(found
                .into_iter()
                .map(|(key, path)| {
                    let c: TrezorConnector = Arc::new(HidConnector {
                        api: self.api.clone(),
                        path,
                        timeout_ms: self.timeout_ms,
                    });
                    Device::Trezor(TrezorDevice::new(key, c))
                })
                .collect())
        }
    }
}
