// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Trezor wire protocol definitions
//!
//! Trezor devices exchange protobuf encoded messages tagged with a message type,
//! framed over 64-byte HID reports (see [wire]).

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::Display;

pub mod messages;
pub mod wire;

/// Trezor USB vendor ID (Trezor One, HID)
pub const TREZOR_VID: u16 = 0x534c;

/// Trezor One USB product ID
pub const TREZOR_ONE_PID: u16 = 0x0001;

/// Trezor message type identifiers
#[derive(Copy, Clone, PartialEq, Debug, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum MessageType {
    Initialize = 0,
    Success = 2,
    Failure = 3,
    GetPublicKey = 11,
    PublicKey = 12,
    SignTx = 15,
    Features = 17,
    PinMatrixRequest = 18,
    PinMatrixAck = 19,
    Cancel = 20,
    TxRequest = 21,
    TxAck = 22,
    ButtonRequest = 26,
    ButtonAck = 27,
    PassphraseRequest = 41,
    PassphraseAck = 42,
}

/// Associate protobuf messages with their wire [MessageType]
pub trait TrezorMessage: prost::Message + Default {
    const TYPE: MessageType;
}

/// Helper macro for associating message types
macro_rules! trezor_message {
    ($($m:ident),* $(,)?) => {
        $(
            impl TrezorMessage for messages::$m {
                const TYPE: MessageType = MessageType::$m;
            }
        )*
    };
}

trezor_message!(
    Initialize,
    Success,
    Failure,
    GetPublicKey,
    PublicKey,
    SignTx,
    Features,
    PinMatrixRequest,
    PinMatrixAck,
    Cancel,
    TxRequest,
    TxAck,
    ButtonRequest,
    ButtonAck,
    PassphraseRequest,
    PassphraseAck,
);

/// Trezor coin name for a network
pub fn coin_name(testnet: bool) -> &'static str {
    match testnet {
        true => "Testnet",
        false => "Bitcoin",
    }
}
