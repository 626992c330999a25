// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Handle for connected ledger devices
//!
//! This provides methods for interacting with the device
//! and is generic over [Exchange] implementations

use core::fmt::Debug;

use bitcoin::{bip32::DerivationPath, Network, Transaction};
use encdec::{DecodeOwned, Encode};
use log::debug;

use hw_signer_apdu::{
    command::encode_command,
    public_key::{WalletPublicKeyReq, WalletPublicKeyResp},
    trusted_input::{trusted_input_chunks, TrustedInputResp},
    ApduError, ApduStatic,
};

use crate::{
    cancel::CancelToken,
    key::{compress_key, parent_path, path_indices, root_path, KeyNode, Purpose, WalletInfo},
    transport::Exchange,
    tx::TrustedInput,
    Error,
};

/// Handle for a connected ledger device.
///
/// This is generic over [Exchange] types to support different
/// underlying transports (and mocks for testing)
pub struct DeviceHandle<T: Exchange> {
    /// Device transport
    t: T,
    /// Cancellation token, checked prior to each command
    cancel: CancelToken,
}

/// Create a [DeviceHandle] wrapper from a type implementing [Exchange]
impl<T: Exchange> From<T> for DeviceHandle<T> {
    fn from(t: T) -> Self {
        Self {
            t,
            cancel: CancelToken::new(),
        }
    }
}

impl<T: Exchange> DeviceHandle<T> {
    /// Create a new handle with the provided cancellation token
    pub fn new(t: T, cancel: CancelToken) -> Self {
        Self { t, cancel }
    }

    /// Fetch the handle cancellation token
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Release the handle, returning the underlying transport
    pub fn into_inner(self) -> T {
        self.t
    }

    /// Issue a request, returning the response payload
    ///
    /// Cancellation is checked prior to transmission, non-OK status words are mapped to errors.
    pub fn request<REQ>(&mut self, req: &REQ) -> Result<Vec<u8>, Error>
    where
        REQ: ApduStatic + Encode<Error = ApduError> + Debug,
    {
        self.cancel.check()?;

        let c = encode_command(req)?;

        debug!(">>> {}", hex::encode(&c));

        let r = self.t.exchange(&c)?;

        debug!("<<< {} ({:04x})", hex::encode(&r.data), r.status);

        Error::check_status(r.status)?;

        Ok(r.data)
    }

    /// Issue a request and decode the response
    pub fn request_decode<REQ, ANS>(&mut self, req: &REQ) -> Result<ANS, Error>
    where
        REQ: ApduStatic + Encode<Error = ApduError> + Debug,
        ANS: DecodeOwned<Output = ANS, Error = ApduError>,
    {
        let d = self.request(req)?;

        let (a, _) =
            ANS::decode_owned(&d).map_err(|_| Error::MalformedResponse("response decode"))?;

        Ok(a)
    }

    /// Fetch the raw public key response for a path
    pub fn wallet_public_key(&mut self, path: &DerivationPath) -> Result<WalletPublicKeyResp, Error> {
        if path.as_ref().is_empty() {
            return Err(Error::InvalidPath);
        }

        let req = WalletPublicKeyReq::new(&path_indices(path));
        self.request_decode(&req)
    }

    /// Fetch the [KeyNode] for a path
    ///
    /// Where the path has more than one element the parent key is fetched
    /// first (a single additional request) to compute the parent fingerprint.
    pub fn public_key(&mut self, path: &DerivationPath) -> Result<KeyNode, Error> {
        debug!("Requesting public key for path: {}", path);

        let parent_key = match parent_path(path) {
            Some(p) => {
                let r = self.wallet_public_key(&p)?;
                Some(compress_key(&r.public_key)?)
            }
            None => None,
        };

        let resp = self.wallet_public_key(path)?;
        let public_key = compress_key(&resp.public_key)?;

        KeyNode::new(path, public_key, resp.chain_code, parent_key.as_ref())
    }

    /// Fetch wallet identification keys (root and account xpubs)
    pub fn wallet_info(&mut self, network: Network, account: u32) -> Result<WalletInfo, Error> {
        let testnet = network != Network::Bitcoin;

        debug!("Requesting wallet info (account: {}, testnet: {})", account, testnet);

        let mut xpub = |p: &DerivationPath| -> Result<String, Error> {
            let n = self.public_key(p)?;
            Ok(n.to_xpub(network)?.to_string())
        };

        Ok(WalletInfo {
            xpub_root: xpub(&root_path())?,
            xpub_nested_segwit: xpub(&Purpose::NestedSegwit.account_path(testnet, account))?,
            xpub_native_segwit: xpub(&Purpose::NativeSegwit.account_path(testnet, account))?,
            xpub_legacy: xpub(&Purpose::NonSegwit.account_path(testnet, account))?,
            ..Default::default()
        })
    }

    /// Replay a previous transaction to obtain a trusted input for output `vout`
    pub fn trusted_input(&mut self, prev_tx: &Transaction, vout: u32) -> Result<TrustedInput, Error> {
        debug!("Requesting trusted input for {}:{}", prev_tx.txid(), vout);

        let chunks = trusted_input_chunks(prev_tx, vout)?;

        let mut token = None;
        for c in &chunks {
            token = Some(self.request(c)?);
        }

        match token.map(|t| TrustedInputResp::decode_owned(&t)) {
            Some(Ok((t, _))) => Ok(TrustedInput::new(t.0)),
            _ => Err(Error::MalformedResponse("empty trusted input")),
        }
    }
}
