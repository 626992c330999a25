// Copyright (c) 2022-2023 The MobileCoin Foundation

use hw_signer_apdu::{framing::FramingError, status::StatusWord, trezor::wire::WireError, ApduError};

/// Hardware signer API Error Type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HID Init Error
    #[error("could not create HidApi instance")]
    HidInit,

    /// Device could not be found or opened
    #[error("Device not found")]
    NoDevice,

    /// Device locked or application not open
    #[error("Device locked or application not open")]
    NoEnvironment,

    /// User rejected the operation on the device
    #[error("Operation cancelled on device")]
    CancelledByUser,

    /// Operation cancelled by the host
    #[error("Operation cancelled")]
    Cancelled,

    /// HID framing error
    #[error("Framing error: {0}")]
    SequenceOrFraming(#[from] FramingError),

    /// Trezor wire error
    #[error("Trezor wire error: {0}")]
    Wire(#[from] WireError),

    /// Unexpected or unparseable device response
    #[error("Malformed device response: {0}")]
    MalformedResponse(&'static str),

    /// Device internal error
    #[error("Device internal error")]
    InternalError,

    /// Unclassified device status word
    #[error("Device returned status 0x{0:04x}")]
    Status(u16),

    /// Read timeout waiting for the device
    #[error("Timeout waiting for device response")]
    Timeout,

    /// APDU encoding error
    #[error("APDU encoding error: {0}")]
    Apdu(#[from] ApduError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HID transport error
    #[cfg(feature = "transport_hid")]
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    /// Device already in use
    #[error("Device busy")]
    Busy,

    /// No device known with the provided id
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Operation not supported by the device
    #[error("Operation not supported by {0} devices")]
    Unsupported(&'static str),

    /// Legacy and witness inputs may not be mixed in a single request
    #[error("Mixed legacy and segwit inputs are not supported")]
    UnsupportedInputMix,

    /// Previous transaction required for a legacy input not provided
    #[error("Missing supporting transaction {0}")]
    MissingSupportingTx(bitcoin::Txid),

    /// Nested segwit redeem script does not match the input script
    #[error("Redeem script mismatch for input {0}")]
    ScriptMismatch(usize),

    /// Invalid derivation path
    #[error("Invalid derivation path")]
    InvalidPath,

    /// Invalid sign request
    #[error("Invalid request: {0}")]
    InvalidRequest(&'static str),

    /// No pending device request to resolve
    #[error("Device is not awaiting user input")]
    NotAwaiting,

    /// Trezor failure message
    #[error("Trezor failure (code: {code:?}): {message}")]
    Trezor { code: Option<i32>, message: String },

    /// Protobuf decoding failed
    #[error("Protobuf decode failed: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// Blocking worker failed to complete
    #[error("Worker failed: {0}")]
    Worker(String),
}

impl Error {
    /// Map a non-OK device status to an error
    pub fn from_status(sw: StatusWord) -> Option<Error> {
        match sw {
            StatusWord::Ok => None,
            StatusWord::NoDevice => Some(Error::NoDevice),
            StatusWord::NoEnvironment => Some(Error::NoEnvironment),
            StatusWord::CancelledByUser => Some(Error::CancelledByUser),
            StatusWord::InternalError => Some(Error::InternalError),
            StatusWord::Other(v) => Some(Error::Status(v)),
        }
    }

    /// Map a raw device status word to a result
    pub fn check_status(sw: u16) -> Result<(), Error> {
        match Self::from_status(StatusWord::from(sw)) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Check whether the error results from cancellation (host or device)
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::CancelledByUser)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Worker(e.to_string())
    }
}
