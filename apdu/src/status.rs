// Copyright (c) 2022-2023 The MobileCoin Foundation

//! APDU response status words

use strum::Display;

/// Successful completion
pub const SW_OK: u16 = 0x9000;
/// Security status not satisfied (device locked)
pub const SW_SECURITY_STATUS: u16 = 0x6982;
/// Conditions of use not satisfied (user rejected)
pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
/// Instruction not supported (application not open)
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6d00;
/// Class not supported (application not open)
pub const SW_CLA_NOT_SUPPORTED: u16 = 0x6e00;

/// Classified device response status
///
/// `NoDevice` is never produced from a status word, it is raised on device
/// open failure and shares this taxonomy for reporting.
#[derive(Copy, Clone, PartialEq, Debug, Display)]
pub enum StatusWord {
    /// Command completed
    Ok,
    /// Device could not be found / opened
    NoDevice,
    /// Device locked or application not open
    NoEnvironment,
    /// User rejected the operation on the device
    CancelledByUser,
    /// Device internal error (`0x6Fxx`)
    InternalError,
    /// Any other status word
    Other(u16),
}

impl From<u16> for StatusWord {
    fn from(sw: u16) -> Self {
        match sw {
            SW_OK => StatusWord::Ok,
            SW_CONDITIONS_NOT_SATISFIED => StatusWord::CancelledByUser,
            SW_SECURITY_STATUS | SW_INS_NOT_SUPPORTED | SW_CLA_NOT_SUPPORTED => {
                StatusWord::NoEnvironment
            }
            v if v & 0xff00 == 0x6f00 => StatusWord::InternalError,
            v => StatusWord::Other(v),
        }
    }
}

impl StatusWord {
    /// Check whether a status indicates success
    pub fn is_ok(&self) -> bool {
        *self == StatusWord::Ok
    }
}
