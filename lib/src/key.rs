// Copyright (c) 2022-2023 The MobileCoin Foundation

//! BIP32 key nodes and derivation path helpers

use bitcoin::{
    bip32::{ChildNumber, DerivationPath, ExtendedPubKey},
    hashes::{hash160, Hash},
    secp256k1, Network, PubkeyHash,
};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::Error;

/// BIP32 hardened index flag
pub const HARDENED: u32 = 0x8000_0000;

/// BIP32 extended public key version (mainnet, `xpub`)
pub const XPUB_VERSION: [u8; 4] = [0x04, 0x88, 0xb2, 0x1e];

/// BIP32 extended public key version (testnet, `tpub`)
pub const TPUB_VERSION: [u8; 4] = [0x04, 0x35, 0x87, 0xcf];

/// Derivation purpose, selecting the input script kind
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[repr(u32)]
pub enum Purpose {
    /// BIP44 legacy P2PKH
    NonSegwit = 44,
    /// BIP49 P2SH wrapped P2WPKH
    NestedSegwit = 49,
    /// BIP84 native P2WPKH
    NativeSegwit = 84,
}

impl Purpose {
    /// Resolve the purpose from the first (hardened) element of a path
    pub fn from_path(path: &DerivationPath) -> Option<Self> {
        match path.as_ref().first() {
            Some(ChildNumber::Hardened { index: 44 }) => Some(Purpose::NonSegwit),
            Some(ChildNumber::Hardened { index: 49 }) => Some(Purpose::NestedSegwit),
            Some(ChildNumber::Hardened { index: 84 }) => Some(Purpose::NativeSegwit),
            _ => None,
        }
    }

    pub fn is_segwit(&self) -> bool {
        !matches!(self, Purpose::NonSegwit)
    }

    /// Build the account path `m/purpose'/coin'/account'`
    pub fn account_path(&self, testnet: bool, account: u32) -> DerivationPath {
        let coin = match testnet {
            true => 1,
            false => 0,
        };

        DerivationPath::from(vec![
            ChildNumber::Hardened {
                index: *self as u32,
            },
            ChildNumber::Hardened { index: coin },
            ChildNumber::Hardened { index: account },
        ])
    }
}

/// Root path used for wallet identification (`m/0'`)
pub fn root_path() -> DerivationPath {
    DerivationPath::from(vec![ChildNumber::Hardened { index: 0 }])
}

/// Fetch raw path indices for APDU encoding
pub fn path_indices(path: &DerivationPath) -> Vec<u32> {
    path.as_ref().iter().map(|c| u32::from(*c)).collect()
}

/// Fetch the parent path, `None` where the path has a single element
pub fn parent_path(path: &DerivationPath) -> Option<DerivationPath> {
    let p = path.as_ref();
    match p.len() {
        0 | 1 => None,
        n => Some(DerivationPath::from(p[..n - 1].to_vec())),
    }
}

/// Compute the BIP32 fingerprint of a compressed public key
pub fn fingerprint(public_key: &[u8; 33]) -> [u8; 4] {
    let h = hash160::Hash::hash(public_key).to_byte_array();
    [h[0], h[1], h[2], h[3]]
}

/// Compress a secp256k1 public key (as returned by the device)
pub fn compress_key(public_key: &[u8]) -> Result<[u8; 33], Error> {
    let pk = secp256k1::PublicKey::from_slice(public_key)
        .map_err(|_| Error::MalformedResponse("invalid public key"))?;
    Ok(pk.serialize())
}

/// BIP32 public key node (never contains private material)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyNode {
    pub depth: u8,
    pub child_number: u32,
    pub parent_fingerprint: [u8; 4],
    pub chain_code: [u8; 32],
    pub public_key: [u8; 33],
}

impl KeyNode {
    /// Build a node for `path` from the device key and chain code, and the parent key where available
    pub fn new(
        path: &DerivationPath,
        public_key: [u8; 33],
        chain_code: [u8; 32],
        parent_key: Option<&[u8; 33]>,
    ) -> Result<Self, Error> {
        let p = path.as_ref();
        let child = p.last().ok_or(Error::InvalidPath)?;
        if p.len() > u8::MAX as usize {
            return Err(Error::InvalidPath);
        }

        Ok(Self {
            depth: p.len() as u8,
            child_number: u32::from(*child),
            parent_fingerprint: parent_key.map(fingerprint).unwrap_or_default(),
            chain_code,
            public_key,
        })
    }

    /// Fingerprint of this node
    pub fn fingerprint(&self) -> [u8; 4] {
        fingerprint(&self.public_key)
    }

    /// Hash160 of the public key
    pub fn pubkey_hash(&self) -> PubkeyHash {
        PubkeyHash::hash(&self.public_key)
    }

    /// BIP32 serialisation of the node
    pub fn encode(&self, network: Network) -> [u8; 78] {
        let mut d = [0u8; 78];

        d[0..4].copy_from_slice(match network {
            Network::Bitcoin => &XPUB_VERSION,
            _ => &TPUB_VERSION,
        });
        d[4] = self.depth;
        d[5..9].copy_from_slice(&self.parent_fingerprint);
        d[9..13].copy_from_slice(&self.child_number.to_be_bytes());
        d[13..45].copy_from_slice(&self.chain_code);
        d[45..78].copy_from_slice(&self.public_key);

        d
    }

    /// Convert to an extended public key
    pub fn to_xpub(&self, network: Network) -> Result<ExtendedPubKey, Error> {
        ExtendedPubKey::decode(&self.encode(network))
            .map_err(|_| Error::MalformedResponse("invalid extended key"))
    }
}

/// Wallet identification keys, as exported by a device
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub vendor: String,
    pub label: String,
    pub device_id: String,
    pub xpub_root: String,
    pub xpub_nested_segwit: String,
    pub xpub_native_segwit: String,
    pub xpub_legacy: String,
}

impl WalletInfo {
    pub fn is_valid(&self) -> bool {
        !self.xpub_root.is_empty()
            && !self.xpub_nested_segwit.is_empty()
            && !self.xpub_native_segwit.is_empty()
            && !self.xpub_legacy.is_empty()
    }
}
