// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Prelude to simplify downstream use of APDU objects

pub use encdec::{DecodeOwned, Encode};

pub use crate::{
    command::{build_command, encode_command, ApduHeader},
    framing::{frame, to_report, unframe, FramingError, Reassembler},
    public_key::{WalletPublicKeyReq, WalletPublicKeyResp},
    status::StatusWord,
    trusted_input::{trusted_input_chunks, TrustedInputReq, TrustedInputResp},
    tx::{
        input_sequence, HashInputFinalizeReq, HashInputStartReq, HashSignReq, HashSignResp,
        InputRef, StartMode,
    },
    ApduError, ApduStatic, Instruction,
};
